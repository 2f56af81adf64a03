pub use serde::{Serialize, Deserialize};

pub use ndarray::*;
pub use ndarray_rand::RandomExt;
pub use ndarray_rand::rand_distr::Uniform;

pub use crate::models::{Network, TrainingPhase, TrainingReport};
pub use crate::error::*;
pub use crate::config::*;
pub use crate::data::{load_classifications, Batch, DataSource, InMemoryDataset};
pub use crate::store::{FileStore, MemoryStore, ParameterStore};

// Internal re-exports
pub use crate::core::{
    ConvolutionLayer,
    FullyConnectedLayer,
    Gradients,
    LayerTrait,
    Learnable,
    Normalization,
    Optimization,
    Parameters,
    PoolingLayer,
    ReluLayer,
};
