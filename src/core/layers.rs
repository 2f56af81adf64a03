use crate::prelude::*;

/// Shared forward/backward contract of every layer in the pipeline.
///
/// `backward` is pure: it receives the input the layer saw during `forward`
/// together with the gradient of the loss w.r.t. the layer output, and returns
/// the gradient w.r.t. that input plus the layer's parameter gradients.
/// Parameters are only changed through [`Learnable`].
pub trait LayerTrait {
    type Input;
    type Output;
    type Gradients;

    fn forward(&self, x: &Self::Input) -> Result<Self::Output>;

    fn backward(
        &self,
        d_out: &Self::Output,
        x: &Self::Input,
    ) -> Result<(Self::Input, Self::Gradients)>;

    fn typ(&self) -> String;
}

/// Weights `a`, bias `b` and momentum velocity `v` (same shape as `a`).
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters<D: Dimension> {
    pub a: Array<f64, D>,
    pub b: Array1<f64>,
    pub v: Array<f64, D>,
}

#[derive(Debug, Clone)]
pub struct Gradients<D: Dimension> {
    pub da: Array<f64, D>,
    pub db: Array1<f64>,
}

/// Layers that own trainable parameters.
pub trait Learnable {
    type Dim: Dimension;

    /// Layer component of the checkpoint key, e.g. `conv` in `cnn_conv.A`.
    fn key(&self) -> &'static str;

    fn parameters(&self) -> &Parameters<Self::Dim>;

    fn parameters_mut(&mut self) -> &mut Parameters<Self::Dim>;
}

impl<D: Dimension> Parameters<D> {
    /// Starts with zero velocity.
    pub fn new(a: Array<f64, D>, b: Array1<f64>) -> Self {
        let v = Array::zeros(a.raw_dim());
        Self { a, b, v }
    }

    pub fn count(&self) -> usize {
        self.a.len() + self.b.len()
    }

    /// Keyed views of V, A and b, ready for [`ParameterStore::save_all`].
    pub fn entries(&self, prefix: &str) -> Vec<(String, ArrayViewD<'_, f64>)> {
        vec![
            (format!("{}.V", prefix), self.v.view().into_dyn()),
            (format!("{}.A", prefix), self.a.view().into_dyn()),
            (format!("{}.b", prefix), self.b.view().into_dyn()),
        ]
    }

    /// Reads a full set of tensors saved under `prefix`. `self` only supplies the
    /// expected shapes and is left untouched, so a failed read changes nothing.
    pub fn restored<S: ParameterStore + ?Sized>(&self, store: &S, prefix: &str) -> Result<Self> {
        Ok(Self {
            v: restore(store, &format!("{}.V", prefix), &self.v)?,
            a: restore(store, &format!("{}.A", prefix), &self.a)?,
            b: restore(store, &format!("{}.b", prefix), &self.b)?,
        })
    }
}

fn restore<S, D>(store: &S, key: &str, like: &Array<f64, D>) -> Result<Array<f64, D>>
where
    S: ParameterStore + ?Sized,
    D: Dimension,
{
    let tensor = store.load(key)?;
    if tensor.shape() != like.shape() {
        return Err(NNError::LayerShapeMismatch(format!(
            "checkpoint '{}' has shape {:?}, layer expects {:?}",
            key,
            tensor.shape(),
            like.shape()
        )));
    }
    Ok(tensor.into_dimensionality::<D>()?)
}
