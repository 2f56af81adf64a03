pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod models;
pub mod prelude;
pub mod store;
pub mod utils;

// Re-export types
pub use crate::config::{BatchSampling, Hyperparameters, NetworkConfig};
pub use crate::core::{LayerTrait, Learnable};
pub use crate::error::{NNError, Result};
pub use crate::models::Network;

pub mod plot {
    pub mod plot_loss;
}
