use crate::prelude::*;
use crate::rand_array;
use crate::utils::xavier_limit;
use rand::Rng;

/// 2-D convolution over `[N, W, H, D]` batches.
///
/// Filters are stored as `[K, F, F, D]`; each output position is the dot
/// product of one filter with the zero-padded input patch under it, plus the
/// filter's bias. Both passes are lowered to matrix products over an
/// im2col matrix of shape `[outW * outH, F * F * D]`.
#[derive(Debug, Clone)]
pub struct ConvolutionLayer {
    pub filters: usize,
    pub filter_size: usize,
    pub stride: usize,
    pub depth: usize,
    pub padding: usize,
    pub params: Parameters<Ix4>,
}

impl ConvolutionLayer {
    pub fn new(
        filters: usize,
        filter_size: usize,
        stride: usize,
        depth: usize,
        padding: usize,
    ) -> Result<Self> {
        Self::with_rng(filters, filter_size, stride, depth, padding, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng>(
        filters: usize,
        filter_size: usize,
        stride: usize,
        depth: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if filters == 0 || filter_size == 0 || stride == 0 || depth == 0 {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "convolution needs non-zero filters, filter size, stride and depth \
                 (got {}, {}, {}, {})",
                filters, filter_size, stride, depth
            )));
        }
        let fan_in = filter_size * filter_size * depth;
        let fan_out = filters * filter_size * filter_size;
        let limit = xavier_limit(fan_in, fan_out);
        Ok(Self {
            filters,
            filter_size,
            stride,
            depth,
            padding,
            params: Parameters::new(
                rand_array!(rng, limit; filters, filter_size, filter_size, depth),
                Array1::zeros(filters),
            ),
        })
    }

    /// Spatial output size for an input of `width x height`.
    pub fn output_dims(&self, width: usize, height: usize) -> Result<(usize, usize)> {
        Ok((
            self.output_len(width, "width")?,
            self.output_len(height, "height")?,
        ))
    }

    fn output_len(&self, input: usize, axis: &str) -> Result<usize> {
        let padded = input + 2 * self.padding;
        if padded < self.filter_size || (padded - self.filter_size) % self.stride != 0 {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "convolution {}: ({} + 2*{} - {}) / {} + 1 is not a positive integer",
                axis, input, self.padding, self.filter_size, self.stride
            )));
        }
        Ok((padded - self.filter_size) / self.stride + 1)
    }

    fn fan_in(&self) -> usize {
        self.filter_size * self.filter_size * self.depth
    }

    fn check_input(&self, x: &Array4<f64>) -> Result<(usize, usize)> {
        let (_, width, height, depth) = x.dim();
        if depth != self.depth {
            return Err(NNError::InvalidInputShape(format!(
                "convolution expects depth {}, got input of shape {:?}",
                self.depth,
                x.shape()
            )));
        }
        self.output_dims(width, height)
    }

    fn pad(&self, x: &Array4<f64>) -> Array4<f64> {
        let p = self.padding;
        if p == 0 {
            return x.clone();
        }
        let (n, width, height, depth) = x.dim();
        let mut padded = Array4::zeros((n, width + 2 * p, height + 2 * p, depth));
        padded.slice_mut(s![.., p..p + width, p..p + height, ..]).assign(x);
        padded
    }

    /// Filters as a `[K, F * F * D]` matrix, rows in the same order as im2col rows.
    fn kernel_matrix(&self) -> Result<CowArray<'_, f64, Ix2>> {
        Ok(self.params.a.to_shape((self.filters, self.fan_in()))?)
    }

    fn im2col(&self, image: ArrayView3<f64>, out_w: usize, out_h: usize) -> Array2<f64> {
        let (f, st) = (self.filter_size, self.stride);
        let mut cols = Array2::zeros((out_w * out_h, self.fan_in()));
        for i in 0..out_w {
            for j in 0..out_h {
                let patch = image.slice(s![i * st..i * st + f, j * st..j * st + f, ..]);
                for (dst, src) in cols.row_mut(i * out_h + j).iter_mut().zip(patch.iter()) {
                    *dst = *src;
                }
            }
        }
        cols
    }

    /// Scatter-adds patch gradients back onto the (padded) image gradient.
    fn col2im(&self, d_cols: &Array2<f64>, d_image: &mut ArrayViewMut3<f64>, out_w: usize, out_h: usize) {
        let (f, st) = (self.filter_size, self.stride);
        for i in 0..out_w {
            for j in 0..out_h {
                let mut patch = d_image.slice_mut(s![i * st..i * st + f, j * st..j * st + f, ..]);
                for (dst, src) in patch.iter_mut().zip(d_cols.row(i * out_h + j).iter()) {
                    *dst += *src;
                }
            }
        }
    }
}

impl LayerTrait for ConvolutionLayer {
    type Input = Array4<f64>;
    type Output = Array4<f64>;
    type Gradients = Gradients<Ix4>;

    fn forward(&self, x: &Array4<f64>) -> Result<Array4<f64>> {
        let (out_w, out_h) = self.check_input(x)?;
        let n = x.dim().0;
        let padded = self.pad(x);
        let kernel = self.kernel_matrix()?;

        let mut out = Array4::zeros((n, out_w, out_h, self.filters));
        for (image, mut o) in padded.outer_iter().zip(out.outer_iter_mut()) {
            let cols = self.im2col(image, out_w, out_h);
            let z = cols.dot(&kernel.t()) + &self.params.b;
            o.assign(&z.into_shape_with_order((out_w, out_h, self.filters))?);
        }
        Ok(out)
    }

    fn backward(&self, d_out: &Array4<f64>, x: &Array4<f64>) -> Result<(Array4<f64>, Gradients<Ix4>)> {
        let (out_w, out_h) = self.check_input(x)?;
        let (n, width, height, depth) = x.dim();
        if d_out.dim() != (n, out_w, out_h, self.filters) {
            return Err(NNError::LayerShapeMismatch(format!(
                "convolution output gradient has shape {:?}, expected {:?}",
                d_out.shape(),
                [n, out_w, out_h, self.filters]
            )));
        }
        let padded = self.pad(x);
        let kernel = self.kernel_matrix()?;

        let mut da = Array2::<f64>::zeros((self.filters, self.fan_in()));
        let mut db = Array1::<f64>::zeros(self.filters);
        let mut d_padded = Array4::<f64>::zeros(padded.raw_dim());
        for ((image, grad), mut d_image) in padded
            .outer_iter()
            .zip(d_out.outer_iter())
            .zip(d_padded.outer_iter_mut())
        {
            let cols = self.im2col(image, out_w, out_h);
            let g = grad.to_shape((out_w * out_h, self.filters))?;
            da += &g.t().dot(&cols);
            db += &g.sum_axis(Axis(0));
            // transposed convolution: every output gradient spreads back through its filter
            let d_cols = g.dot(&kernel);
            self.col2im(&d_cols, &mut d_image, out_w, out_h);
        }

        let p = self.padding;
        let dx = d_padded
            .slice(s![.., p..p + width, p..p + height, ..])
            .to_owned();
        let da = da.into_shape_with_order((self.filters, self.filter_size, self.filter_size, depth))?;
        Ok((dx, Gradients { da, db }))
    }

    fn typ(&self) -> String {
        "Convolution".into()
    }
}

impl Learnable for ConvolutionLayer {
    type Dim = Ix4;

    fn key(&self) -> &'static str {
        "conv"
    }

    fn parameters(&self) -> &Parameters<Ix4> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters<Ix4> {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layers::gradcheck::{max_relative_error, numeric_gradient, weighted_sum};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer(filters: usize, size: usize, stride: usize, depth: usize, pad: usize) -> ConvolutionLayer {
        let mut rng = StdRng::seed_from_u64(11);
        ConvolutionLayer::with_rng(filters, size, stride, depth, pad, &mut rng).unwrap()
    }

    fn random_input(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        rand_array!(&mut rng, 1.0; shape.0, shape.1, shape.2, shape.3)
    }

    #[test]
    fn output_shape_follows_formula() {
        let x = Array4::zeros((2, 32, 32, 3));
        assert_eq!(layer(4, 3, 1, 3, 1).forward(&x).unwrap().dim(), (2, 32, 32, 4));
        assert_eq!(layer(2, 3, 1, 3, 0).forward(&x).unwrap().dim(), (2, 30, 30, 2));

        let x = Array4::zeros((1, 7, 9, 3));
        assert_eq!(layer(5, 3, 2, 3, 0).forward(&x).unwrap().dim(), (1, 3, 4, 5));
        assert_eq!(layer(5, 3, 2, 3, 1).output_dims(7, 9).unwrap(), (4, 5));
    }

    #[test]
    fn rejects_non_integer_output() {
        let conv = layer(2, 3, 2, 3, 0);
        assert!(matches!(
            conv.output_dims(8, 8),
            Err(NNError::InvalidLayerConfiguration(_))
        ));
        assert!(matches!(
            conv.forward(&Array4::zeros((1, 8, 8, 3))),
            Err(NNError::InvalidLayerConfiguration(_))
        ));
        assert!(matches!(
            layer(1, 5, 1, 1, 0).output_dims(3, 3),
            Err(NNError::InvalidLayerConfiguration(_))
        ));
    }

    #[test]
    fn rejects_zero_sized_configuration() {
        assert!(matches!(
            ConvolutionLayer::new(0, 3, 1, 3, 1),
            Err(NNError::InvalidLayerConfiguration(_))
        ));
        assert!(matches!(
            ConvolutionLayer::new(4, 3, 0, 3, 1),
            Err(NNError::InvalidLayerConfiguration(_))
        ));
    }

    #[test]
    fn rejects_depth_mismatch() {
        assert!(matches!(
            layer(2, 3, 1, 3, 1).forward(&Array4::zeros((1, 4, 4, 1))),
            Err(NNError::InvalidInputShape(_))
        ));
    }

    #[test]
    fn forward_sums_padded_patches() {
        let mut conv = layer(1, 3, 1, 1, 1);
        conv.params.a.fill(1.0);
        conv.params.b.fill(0.5);
        let x = Array4::ones((1, 3, 3, 1));
        let out = conv.forward(&x).unwrap();
        // corners see 4 pixels, edges 6, the centre all 9
        assert_abs_diff_eq!(out[[0, 0, 0, 0]], 4.5);
        assert_abs_diff_eq!(out[[0, 0, 1, 0]], 6.5);
        assert_abs_diff_eq!(out[[0, 1, 1, 0]], 9.5);
        assert_abs_diff_eq!(out[[0, 2, 2, 0]], 4.5);
    }

    #[test]
    fn forward_matches_direct_correlation() {
        let conv = layer(3, 2, 2, 2, 0);
        let x = random_input((2, 6, 4, 2), 5);
        let out = conv.forward(&x).unwrap();
        for n in 0..2 {
            for i in 0..3 {
                for j in 0..2 {
                    for k in 0..3 {
                        let patch = x.slice(s![n, 2 * i..2 * i + 2, 2 * j..2 * j + 2, ..]);
                        let filter = conv.params.a.slice(s![k, .., .., ..]);
                        let expected = (&patch * &filter).sum() + conv.params.b[k];
                        assert_abs_diff_eq!(out[[n, i, j, k]], expected, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn bias_gradient_sums_over_batch_and_positions() {
        let conv = layer(2, 3, 1, 1, 1);
        let x = random_input((3, 4, 4, 1), 8);
        let d_out = Array4::ones((3, 4, 4, 2));
        let (_, grads) = conv.backward(&d_out, &x).unwrap();
        assert_abs_diff_eq!(grads.db, Array1::from_elem(2, 48.0));
    }

    #[test]
    fn backward_rejects_wrong_gradient_shape() {
        let conv = layer(2, 3, 1, 1, 1);
        let x = Array4::zeros((1, 4, 4, 1));
        assert!(matches!(
            conv.backward(&Array4::zeros((1, 4, 4, 3)), &x),
            Err(NNError::LayerShapeMismatch(_))
        ));
    }

    #[test]
    fn gradients_match_finite_differences() {
        for &(size, stride, pad, width) in &[(3, 1, 1, 5), (2, 2, 0, 6), (3, 2, 1, 7)] {
            let conv = layer(3, size, stride, 2, pad);
            let x = random_input((2, width, width, 2), 21);
            let out = conv.forward(&x).unwrap();
            let probe = random_input(out.dim(), 34);
            let (dx, grads) = conv.backward(&probe, &x).unwrap();

            let numeric_da = numeric_gradient(&conv.params.a, |a| {
                let mut c = conv.clone();
                c.params.a = a.clone();
                weighted_sum(&c.forward(&x).unwrap(), &probe)
            });
            assert!(max_relative_error(&grads.da, &numeric_da) < 1e-4);

            let numeric_db = numeric_gradient(&conv.params.b, |b| {
                let mut c = conv.clone();
                c.params.b = b.clone();
                weighted_sum(&c.forward(&x).unwrap(), &probe)
            });
            assert!(max_relative_error(&grads.db, &numeric_db) < 1e-4);

            let numeric_dx = numeric_gradient(&x, |xs| weighted_sum(&conv.forward(xs).unwrap(), &probe));
            assert!(max_relative_error(&dx, &numeric_dx) < 1e-4);
        }
    }

    #[test]
    fn backward_leaves_parameters_untouched() {
        let conv = layer(2, 3, 1, 1, 1);
        let before = conv.params.clone();
        let x = random_input((1, 4, 4, 1), 2);
        conv.backward(&Array4::ones((1, 4, 4, 2)), &x).unwrap();
        assert_eq!(conv.params, before);
    }
}
