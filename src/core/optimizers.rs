use crate::prelude::*;

/// Applies one update step to a learnable layer; see [`apply_optimization`].
pub trait Optimization: Learnable {
    fn optimize(&mut self, grads: Gradients<Self::Dim>, hyper: &Hyperparameters) -> Result<f64> {
        apply_optimization(self.parameters_mut(), grads, hyper)
    }
}

impl<T: Learnable> Optimization for T {}

/// `0.5 * lambda * ||A||^2`
pub fn regularization_loss<D: Dimension>(params: &Parameters<D>, lambda: f64) -> f64 {
    0.5 * lambda * params.a.iter().map(|w| w * w).sum::<f64>()
}

/// Momentum step with L2 weight decay:
/// `dA += lambda * A; V = mu * V - rho * dA; A += V; b -= rho * db`.
///
/// Returns the layer's regularization term evaluated before the step.
pub fn apply_optimization<D: Dimension>(
    params: &mut Parameters<D>,
    grads: Gradients<D>,
    hyper: &Hyperparameters,
) -> Result<f64> {
    let Gradients { mut da, db } = grads;
    if da.shape() != params.a.shape() || db.shape() != params.b.shape() {
        return Err(NNError::LayerShapeMismatch(format!(
            "gradients {:?}/{:?} do not match parameters {:?}/{:?}",
            da.shape(),
            db.shape(),
            params.a.shape(),
            params.b.shape()
        )));
    }
    let penalty = regularization_loss(params, hyper.regularization);

    da.scaled_add(hyper.regularization, &params.a);
    params.v *= hyper.momentum;
    params.v.scaled_add(-hyper.learning_rate, &da);
    params.a += &params.v;
    params.b.scaled_add(-hyper.learning_rate, &db);

    Ok(penalty)
}
