use ndarray::{Array, Dimension};

/// Affine rescaling of a value range `[lb, ub]` onto `[0, 1]`.
pub trait Normalization {
    fn to_unity(&mut self, lb: f64, ub: f64);
}

impl<D: Dimension> Normalization for Array<f64, D> {
    fn to_unity(&mut self, lb: f64, ub: f64) {
        let range = ub - lb;

        // A degenerate range maps everything to 0.0
        if range.abs() < f64::EPSILON {
            self.fill(0.0);
        } else {
            self.mapv_inplace(|v| (v - lb) / range);
        }
    }
}
