use crate::prelude::*;

/// Element-wise rectified linear unit. Has no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReluLayer;

impl LayerTrait for ReluLayer {
    type Input = Array4<f64>;
    type Output = Array4<f64>;
    type Gradients = ();

    fn forward(&self, x: &Array4<f64>) -> Result<Array4<f64>> {
        Ok(relu_forward(x))
    }

    fn backward(&self, d_out: &Array4<f64>, x: &Array4<f64>) -> Result<(Array4<f64>, ())> {
        if d_out.shape() != x.shape() {
            return Err(NNError::LayerShapeMismatch(format!(
                "relu output gradient has shape {:?}, input has {:?}",
                d_out.shape(),
                x.shape()
            )));
        }
        Ok((relu_backward(x, d_out), ()))
    }

    fn typ(&self) -> String {
        "ReLU".into()
    }
}

fn relu_forward<D: Dimension>(z: &Array<f64, D>) -> Array<f64, D> {
    z.mapv(|z| if z > 0.0 { z } else { 0.0 })
}

/// Gradient passes where the forward input was strictly positive.
fn relu_backward<D: Dimension>(z: &Array<f64, D>, da: &Array<f64, D>) -> Array<f64, D> {
    let mut dz = da.clone();
    Zip::from(&mut dz).and(z).for_each(|g, &z| {
        if z <= 0.0 {
            *g = 0.0;
        }
    });
    dz
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layers::gradcheck::{max_relative_error, numeric_gradient, weighted_sum};

    #[test]
    fn forward_clamps_negatives() {
        let x = Array4::from_shape_vec((1, 2, 2, 1), vec![-1.0, 0.0, 0.5, 3.0]).unwrap();
        let out = ReluLayer.forward(&x).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.5, 3.0]);
    }

    #[test]
    fn backward_passes_all_positive_input() {
        let x = Array4::from_elem((2, 3, 3, 2), 0.7);
        let d_out = Array4::from_shape_fn((2, 3, 3, 2), |(n, i, j, c)| (n + i + j + c) as f64 - 2.0);
        let (dx, ()) = ReluLayer.backward(&d_out, &x).unwrap();
        assert_eq!(dx, d_out);
    }

    #[test]
    fn backward_blocks_all_negative_input() {
        let x = Array4::from_elem((2, 3, 3, 2), -0.7);
        let d_out = Array4::ones((2, 3, 3, 2));
        let (dx, ()) = ReluLayer.backward(&d_out, &x).unwrap();
        assert!(dx.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn backward_zeroes_exactly_at_non_positive_inputs() {
        let x = Array4::from_shape_vec((1, 1, 4, 1), vec![-2.0, 0.0, 1e-9, 4.0]).unwrap();
        let d_out = Array4::from_elem((1, 1, 4, 1), 5.0);
        let (dx, ()) = ReluLayer.backward(&d_out, &x).unwrap();
        assert_eq!(dx.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 5.0, 5.0]);
    }

    #[test]
    fn backward_rejects_shape_mismatch() {
        let x = Array4::zeros((1, 2, 2, 1));
        assert!(matches!(
            ReluLayer.backward(&Array4::zeros((1, 2, 2, 2)), &x),
            Err(NNError::LayerShapeMismatch(_))
        ));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        // keep inputs away from the kink at zero
        let x = Array4::from_shape_fn((2, 3, 3, 2), |(n, i, j, c)| {
            let v = 0.1 + 0.3 * ((n * 7 + i * 5 + j * 3 + c) % 5) as f64;
            if (i + j + c) % 2 == 0 { v } else { -v }
        });
        let probe = Array4::from_shape_fn(x.raw_dim(), |(n, i, j, c)| ((n + 2 * i + 3 * j + c) % 4) as f64 - 1.5);
        let (dx, ()) = ReluLayer.backward(&probe, &x).unwrap();
        let numeric = numeric_gradient(&x, |xs| weighted_sum(&ReluLayer.forward(xs).unwrap(), &probe));
        assert!(max_relative_error(&dx, &numeric) < 1e-4);
    }
}
