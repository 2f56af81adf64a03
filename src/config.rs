use crate::prelude::*;
use std::fs;
use std::path::Path;

/// Learning rate, momentum and L2 strength. Fixed for the lifetime of a network.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub momentum: f64,
    pub regularization: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.9,
            regularization: 0.1,
        }
    }
}

impl Hyperparameters {
    pub fn new(learning_rate: f64, momentum: f64, regularization: f64) -> Result<Self> {
        let hyper = Self {
            learning_rate,
            momentum,
            regularization,
        };
        hyper.validate()?;
        Ok(hyper)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(NNError::InvalidHyperparameters(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(NNError::InvalidHyperparameters(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(NNError::InvalidHyperparameters(format!(
                "regularization strength must be non-negative, got {}",
                self.regularization
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl InputShape {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    pub fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(32, 32, 3)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ConvolutionConfig {
    pub filters: usize,
    pub filter_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl Default for ConvolutionConfig {
    fn default() -> Self {
        Self {
            filters: 64,
            filter_size: 3,
            stride: 1,
            padding: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PoolingConfig {
    pub size: usize,
    pub stride: usize,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self { size: 2, stride: 2 }
    }
}

/// How each training iteration picks its batch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BatchSampling {
    /// The same window `offset..offset + batch_size` every iteration.
    Fixed {
        #[serde(default)]
        offset: usize,
    },
    /// Consecutive windows, wrapping to the start when the next one would not fit.
    Sequential,
    /// A fresh random sample of indices per iteration.
    Shuffled { seed: u64 },
}

impl Default for BatchSampling {
    fn default() -> Self {
        BatchSampling::Fixed { offset: 0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Prefix of every checkpoint key.
    pub name: String,
    pub input: InputShape,
    pub convolution: ConvolutionConfig,
    pub pooling: PoolingConfig,
    pub hyperparameters: Hyperparameters,
    pub sampling: BatchSampling,
    pub init_seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "cnn".to_string(),
            input: InputShape::default(),
            convolution: ConvolutionConfig::default(),
            pooling: PoolingConfig::default(),
            hyperparameters: Hyperparameters::default(),
            sampling: BatchSampling::default(),
            init_seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Checks everything that can be checked without building the layers.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(NNError::ConfigError("network name must not be empty".into()));
        }
        if self.input.is_empty() {
            return Err(NNError::ConfigError(format!(
                "input dimensions must be greater than 0, got {:?}",
                self.input
            )));
        }
        self.hyperparameters.validate()
    }
}
