// src/core.rs
pub mod activations;
pub mod convolution;
pub mod fully_connected;
pub mod layers;
pub mod losses;
pub mod normalization;
pub mod optimizers;
pub mod output;
pub mod pooling;

// Re-export commonly used items
pub use activations::ReluLayer;
pub use convolution::ConvolutionLayer;
pub use fully_connected::FullyConnectedLayer;
pub use layers::{Gradients, LayerTrait, Learnable, Parameters};
pub use losses::{softmax, softmax_cross_entropy};
pub use normalization::Normalization;
pub use optimizers::{apply_optimization, regularization_loss, Optimization};
pub use pooling::PoolingLayer;
