use crate::prelude::*;
use crate::core::losses::{softmax, softmax_cross_entropy};
use crate::core::optimizers::{regularization_loss, Optimization};
use crate::utils::argmax_rows;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

/// Where the orchestrator is inside the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Idle,
    ForwardPass,
    LossComputed,
    BackwardPass,
    ParametersUpdated,
    Checkpointed,
}

/// Outputs of every layer for one batch, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct Activations {
    pub conv: Array4<f64>,
    pub relu: Array4<f64>,
    pub pool: Array4<f64>,
    pub scores: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct NetworkGradients {
    pub conv: Gradients<Ix4>,
    pub fc: Gradients<Ix2>,
}

#[derive(Debug, Clone, Copy)]
pub struct IterationStats {
    /// Loss including the L2 terms.
    pub loss: f64,
    pub forward_time: Duration,
    pub backward_time: Duration,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub losses: Vec<f64>,
    pub elapsed: Duration,
}

/// Fixed conv -> relu -> pool -> fully-connected classifier.
pub struct Network<S: ParameterStore> {
    config: NetworkConfig,
    classes: Vec<String>,
    conv: ConvolutionLayer,
    relu: ReluLayer,
    pool: PoolingLayer,
    fc: FullyConnectedLayer,
    store: S,
    phase: TrainingPhase,
    rng: StdRng,
    cursor: usize,
}

impl<S: ParameterStore> Network<S> {
    /// Builds the layer pipeline and checks that every stage's output fits the next one.
    pub fn new(config: NetworkConfig, classes: Vec<String>, store: S) -> Result<Self> {
        config.validate()?;
        if classes.is_empty() {
            return Err(NNError::InvalidLayerConfiguration(
                "at least one classification is required".into(),
            ));
        }
        let mut rng = match config.init_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let input = config.input;
        let cc = config.convolution;
        let conv = ConvolutionLayer::with_rng(
            cc.filters,
            cc.filter_size,
            cc.stride,
            input.depth,
            cc.padding,
            &mut rng,
        )?;
        let (conv_w, conv_h) = conv.output_dims(input.width, input.height)?;
        let pool = PoolingLayer::new(config.pooling.size, config.pooling.stride)?;
        let (pool_w, pool_h) = pool.output_dims(conv_w, conv_h)?;
        let fc = FullyConnectedLayer::with_rng(pool_w, pool_h, cc.filters, classes.len(), &mut rng)?;

        let rng = match config.sampling {
            BatchSampling::Shuffled { seed } => StdRng::seed_from_u64(seed),
            _ => rng,
        };
        Ok(Self {
            config,
            classes,
            conv,
            relu: ReluLayer,
            pool,
            fc,
            store,
            phase: TrainingPhase::Idle,
            rng,
            cursor: 0,
        })
    }

    /// Like [`Network::new`], taking the class list from `source`.
    pub fn from_source<D: DataSource>(config: NetworkConfig, source: &D, store: S) -> Result<Self> {
        let classes = source.classifications()?;
        Self::new(config, classes, store)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.config.hyperparameters
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn conv(&self) -> &ConvolutionLayer {
        &self.conv
    }

    pub fn fc(&self) -> &FullyConnectedLayer {
        &self.fc
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn enter(&mut self, phase: TrainingPhase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn summary(&self) -> String {
        let input = self.config.input;
        let conv_dims = self
            .conv
            .output_dims(input.width, input.height)
            .map(|(w, h)| format!("(None, {}, {}, {})", w, h, self.conv.filters))
            .unwrap_or_default();
        let rows = [
            (self.conv.typ(), conv_dims.clone(), self.conv.params.count()),
            (self.relu.typ(), conv_dims, 0),
            (
                self.pool.typ(),
                format!("(None, {}, {}, {})", self.fc.width, self.fc.height, self.fc.depth),
                0,
            ),
            (
                self.fc.typ(),
                format!("(None, {})", self.fc.classes),
                self.fc.params.count(),
            ),
        ];

        let mut res = format!("\nModel {}\n", self.config.name);
        res.push_str("-------------------------------------------------------------\n");
        res.push_str("Layer (Type)\t\t Output shape\t\t No.of params\n");
        let mut total_param = 0;
        for (typ, shape, params) in rows.iter() {
            total_param += params;
            res.push_str(&format!("{:<16}\t {:<20}\t {}\n", typ, shape, params));
        }
        res.push_str("-------------------------------------------------------------\n");
        res.push_str(&format!("Total params: {}\n", total_param));
        res
    }

    /// Runs the pipeline and keeps every intermediate output.
    pub fn forward(&self, x: &Array4<f64>) -> Result<Activations> {
        let start = Instant::now();
        let conv = self.conv.forward(x)?;
        debug!("layer conv forward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let relu = self.relu.forward(&conv)?;
        debug!("layer relu forward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let pool = self.pool.forward(&relu)?;
        debug!("layer pool forward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let scores = self.fc.forward(&pool)?;
        debug!("layer fc forward done: time {:.3?}", start.elapsed());

        Ok(Activations {
            conv,
            relu,
            pool,
            scores,
        })
    }

    /// Back-propagates `d_scores` through the layers in reverse order.
    pub fn backward(
        &self,
        x: &Array4<f64>,
        acts: &Activations,
        d_scores: &Array2<f64>,
    ) -> Result<NetworkGradients> {
        let start = Instant::now();
        let (dx, fc) = self.fc.backward(d_scores, &acts.pool)?;
        debug!("layer fc backward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let (dx, ()) = self.pool.backward(&dx, &acts.relu)?;
        debug!("layer pool backward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let (dx, ()) = self.relu.backward(&dx, &acts.conv)?;
        debug!("layer relu backward done: time {:.3?}", start.elapsed());

        let start = Instant::now();
        let (_, conv) = self.conv.backward(&dx, x)?;
        debug!("layer conv backward done: time {:.3?}", start.elapsed());

        Ok(NetworkGradients { conv, fc })
    }

    /// Adds the L2 penalty of both learnable layers to `loss` and applies one
    /// momentum step. Returns the regularized loss.
    pub fn update(&mut self, loss: f64, grads: NetworkGradients) -> Result<f64> {
        let hyper = self.config.hyperparameters;
        // check both shapes before touching either layer
        for (g, p) in [
            (grads.conv.da.shape(), self.conv.params.a.shape()),
            (grads.fc.da.shape(), self.fc.params.a.shape()),
        ] {
            if g != p {
                return Err(NNError::LayerShapeMismatch(format!(
                    "weight gradient {:?} does not match weights {:?}",
                    g, p
                )));
            }
        }
        let loss = loss
            + self.conv.optimize(grads.conv, &hyper)?
            + self.fc.optimize(grads.fc, &hyper)?;
        self.enter(TrainingPhase::ParametersUpdated);
        Ok(loss)
    }

    /// Loss of `batch` under the current parameters, L2 terms included.
    pub fn evaluate(&self, batch: &Batch) -> Result<f64> {
        let acts = self.forward(&batch.images)?;
        let (loss, _) = softmax_cross_entropy(&acts.scores, &batch.labels)?;
        let lambda = self.config.hyperparameters.regularization;
        Ok(loss
            + regularization_loss(&self.conv.params, lambda)
            + regularization_loss(&self.fc.params, lambda))
    }

    /// One full iteration on `batch`: forward, loss, backward, update, checkpoint.
    ///
    /// A failed step leaves the network `Idle`; the store still holds the
    /// previous checkpoint.
    pub fn train_step(&mut self, batch: &Batch) -> Result<IterationStats> {
        let result = self.run_step(batch);
        if result.is_err() {
            self.enter(TrainingPhase::Idle);
        }
        result
    }

    fn run_step(&mut self, batch: &Batch) -> Result<IterationStats> {
        let start = Instant::now();
        self.enter(TrainingPhase::ForwardPass);
        let acts = self.forward(&batch.images)?;
        let middle = Instant::now();

        let (loss, d_scores) = softmax_cross_entropy(&acts.scores, &batch.labels)?;
        self.enter(TrainingPhase::LossComputed);
        debug!("data loss {:.6}", loss);

        self.enter(TrainingPhase::BackwardPass);
        let grads = self.backward(&batch.images, &acts, &d_scores)?;
        let end = Instant::now();
        drop(acts);

        let loss = self.update(loss, grads)?;
        self.save()?;

        Ok(IterationStats {
            loss,
            forward_time: middle - start,
            backward_time: end - middle,
        })
    }

    pub fn train<D: DataSource>(
        &mut self,
        source: &D,
        batch_size: usize,
        iterations: usize,
    ) -> Result<TrainingReport> {
        if batch_size == 0 || batch_size > source.len() {
            return Err(NNError::DatasetError(format!(
                "batch size {} invalid for dataset of {} samples",
                batch_size,
                source.len()
            )));
        }
        info!("Start training {}...", self.config.name);
        info!("Training data size: {}", batch_size);

        let time_begin = Instant::now();
        let mut losses = Vec::with_capacity(iterations);
        let mut fixed: Option<Batch> = None;
        for i in 0..iterations {
            info!("iteration {}:", i);
            let stats = match self.config.sampling {
                BatchSampling::Fixed { offset } => {
                    let batch = match fixed.take() {
                        Some(batch) => batch,
                        None => source.load_batch(offset, batch_size)?,
                    };
                    let stats = self.train_step(&batch)?;
                    fixed = Some(batch);
                    stats
                }
                BatchSampling::Sequential => {
                    let indices = self.next_window(source.len(), batch_size);
                    let batch = source.load_samples(&indices)?;
                    self.train_step(&batch)?
                }
                BatchSampling::Shuffled { .. } => {
                    let indices = rand::seq::index::sample(&mut self.rng, source.len(), batch_size).into_vec();
                    let batch = source.load_samples(&indices)?;
                    self.train_step(&batch)?
                }
            };
            if !stats.loss.is_finite() {
                warn!("loss is not finite at iteration {}", i);
            }
            info!(
                "forward time {:.3}, backward time {:.3}, loss {:.3}",
                stats.forward_time.as_secs_f64(),
                stats.backward_time.as_secs_f64(),
                stats.loss
            );
            losses.push(stats.loss);
        }
        self.enter(TrainingPhase::Idle);

        let elapsed = time_begin.elapsed();
        info!("training done, total time consumption {:.3}", elapsed.as_secs_f64());
        Ok(TrainingReport { losses, elapsed })
    }

    /// Indices of the next consecutive window, continuing from the start of the
    /// dataset once the end is reached.
    fn next_window(&mut self, len: usize, batch_size: usize) -> Vec<usize> {
        let indices = (0..batch_size).map(|i| (self.cursor + i) % len).collect();
        self.cursor = (self.cursor + batch_size) % len;
        indices
    }

    fn checkpoint_prefix(&self, layer: &str) -> String {
        format!("{}_{}", self.config.name, layer)
    }

    /// Writes A, b and V of both learnable layers as one batch.
    pub fn save(&mut self) -> Result<()> {
        let conv_prefix = self.checkpoint_prefix(self.conv.key());
        let fc_prefix = self.checkpoint_prefix(self.fc.key());
        let mut entries = self.conv.params.entries(&conv_prefix);
        entries.extend(self.fc.params.entries(&fc_prefix));
        self.store.save_all(&entries)?;
        self.enter(TrainingPhase::Checkpointed);
        Ok(())
    }

    /// Replaces all parameters with the stored ones, or none of them on error.
    pub fn reload(&mut self) -> Result<()> {
        let conv = self
            .conv
            .params
            .restored(&self.store, &self.checkpoint_prefix(self.conv.key()))?;
        let fc = self
            .fc
            .params
            .restored(&self.store, &self.checkpoint_prefix(self.fc.key()))?;
        self.conv.params = conv;
        self.fc.params = fc;
        Ok(())
    }

    /// Class scores `[N, C]` computed with the latest checkpoint, which is
    /// re-read on every call so writes by other networks sharing the store are seen.
    pub fn predict(&mut self, x: &Array4<f64>) -> Result<Array2<f64>> {
        self.reload()?;
        Ok(self.forward(x)?.scores)
    }

    /// Softmax of [`Network::predict`].
    pub fn predict_proba(&mut self, x: &Array4<f64>) -> Result<Array2<f64>> {
        Ok(softmax(&self.predict(x)?))
    }

    /// Most likely label per image.
    pub fn classify(&mut self, x: &Array4<f64>) -> Result<Vec<usize>> {
        Ok(argmax_rows(&self.predict(x)?))
    }

    /// Fraction of `batch` classified correctly.
    pub fn accuracy(&mut self, batch: &Batch) -> Result<f64> {
        if batch.is_empty() {
            return Err(NNError::InvalidInputShape("empty batch".into()));
        }
        let predicted = self.classify(&batch.images)?;
        let correct = predicted
            .iter()
            .zip(&batch.labels)
            .filter(|(p, y)| p == y)
            .count();
        Ok(correct as f64 / batch.len() as f64)
    }
}
