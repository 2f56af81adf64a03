use crate::prelude::*;
use crate::rand_array;
use crate::utils::xavier_limit;
use rand::Rng;

/// Dense layer mapping a flattened `[W, H, D]` volume to per-class scores.
#[derive(Debug, Clone)]
pub struct FullyConnectedLayer {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub classes: usize,
    /// `a` is `[W * H * D, C]`.
    pub params: Parameters<Ix2>,
}

impl FullyConnectedLayer {
    pub fn new(width: usize, height: usize, depth: usize, classes: usize) -> Result<Self> {
        Self::with_rng(width, height, depth, classes, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng>(
        width: usize,
        height: usize,
        depth: usize,
        classes: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if width == 0 || height == 0 || depth == 0 || classes == 0 {
            return Err(NNError::InvalidLayerConfiguration(
                "Layer dimensions must be greater than 0".to_string(),
            ));
        }
        let inputs = width * height * depth;
        let limit = xavier_limit(inputs, classes);
        Ok(Self {
            width,
            height,
            depth,
            classes,
            params: Parameters::new(rand_array!(rng, limit; inputs, classes), Array1::zeros(classes)),
        })
    }

    fn inputs(&self) -> usize {
        self.width * self.height * self.depth
    }

    fn flatten<'a>(&self, x: &'a Array4<f64>) -> Result<CowArray<'a, f64, Ix2>> {
        let (n, width, height, depth) = x.dim();
        if (width, height, depth) != (self.width, self.height, self.depth) {
            return Err(NNError::InvalidInputShape(format!(
                "fully connected layer expects [N, {}, {}, {}], got {:?}",
                self.width,
                self.height,
                self.depth,
                x.shape()
            )));
        }
        Ok(x.to_shape((n, self.inputs()))?)
    }
}

impl LayerTrait for FullyConnectedLayer {
    type Input = Array4<f64>;
    type Output = Array2<f64>;
    type Gradients = Gradients<Ix2>;

    fn forward(&self, x: &Array4<f64>) -> Result<Array2<f64>> {
        let a = self.flatten(x)?;
        Ok(a.dot(&self.params.a) + &self.params.b)
    }

    fn backward(&self, d_out: &Array2<f64>, x: &Array4<f64>) -> Result<(Array4<f64>, Gradients<Ix2>)> {
        let a = self.flatten(x)?;
        if d_out.dim() != (a.nrows(), self.classes) {
            return Err(NNError::LayerShapeMismatch(format!(
                "fully connected output gradient has shape {:?}, expected {:?}",
                d_out.shape(),
                [a.nrows(), self.classes]
            )));
        }
        // the loss gradient is already averaged over the batch
        let da = a.t().dot(d_out);
        let db = d_out.sum_axis(Axis(0));
        let dx = d_out.dot(&self.params.a.t()).into_shape_with_order(x.raw_dim())?;
        Ok((dx, Gradients { da, db }))
    }

    fn typ(&self) -> String {
        "FullyConnected".into()
    }
}

impl Learnable for FullyConnectedLayer {
    type Dim = Ix2;

    fn key(&self) -> &'static str {
        "fc"
    }

    fn parameters(&self) -> &Parameters<Ix2> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters<Ix2> {
        &mut self.params
    }
}
