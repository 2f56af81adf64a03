use crate::prelude::*;

/// Max-pooling over each spatial plane of every channel.
///
/// Windows must tile the input exactly: `(in - size) % stride == 0`. The
/// arg-max is not stored; `backward` recomputes it from the forward input,
/// picking the first maximum in row-major window order.
#[derive(Debug, Clone, Copy)]
pub struct PoolingLayer {
    pub size: usize,
    pub stride: usize,
}

impl PoolingLayer {
    pub fn new(size: usize, stride: usize) -> Result<Self> {
        if size == 0 || stride == 0 {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "pooling window and stride must be non-zero (got {}, {})",
                size, stride
            )));
        }
        Ok(Self { size, stride })
    }

    pub fn output_dims(&self, width: usize, height: usize) -> Result<(usize, usize)> {
        Ok((
            self.output_len(width, "width")?,
            self.output_len(height, "height")?,
        ))
    }

    fn output_len(&self, input: usize, axis: &str) -> Result<usize> {
        if input < self.size || (input - self.size) % self.stride != 0 {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "pooling window {} with stride {} does not evenly cover input {} of {}",
                self.size, self.stride, axis, input
            )));
        }
        Ok((input - self.size) / self.stride + 1)
    }

    /// Position of the maximum inside window `(i, j)` of plane `(n, c)`.
    fn argmax(&self, x: &Array4<f64>, n: usize, i: usize, j: usize, c: usize) -> (usize, usize) {
        let (s0, s1) = (i * self.stride, j * self.stride);
        let window = x.slice(s![n, s0..s0 + self.size, s1..s1 + self.size, c]);
        let mut best = (0, 0);
        for ((a, b), &v) in window.indexed_iter() {
            if v > window[best] {
                best = (a, b);
            }
        }
        (s0 + best.0, s1 + best.1)
    }
}

impl LayerTrait for PoolingLayer {
    type Input = Array4<f64>;
    type Output = Array4<f64>;
    type Gradients = ();

    fn forward(&self, x: &Array4<f64>) -> Result<Array4<f64>> {
        let (n, width, height, depth) = x.dim();
        let (out_w, out_h) = self.output_dims(width, height)?;
        Ok(Array4::from_shape_fn((n, out_w, out_h, depth), |(n, i, j, c)| {
            let (a, b) = self.argmax(x, n, i, j, c);
            x[[n, a, b, c]]
        }))
    }

    fn backward(&self, d_out: &Array4<f64>, x: &Array4<f64>) -> Result<(Array4<f64>, ())> {
        let (n, width, height, depth) = x.dim();
        let (out_w, out_h) = self.output_dims(width, height)?;
        if d_out.dim() != (n, out_w, out_h, depth) {
            return Err(NNError::LayerShapeMismatch(format!(
                "pooling output gradient has shape {:?}, expected {:?}",
                d_out.shape(),
                [n, out_w, out_h, depth]
            )));
        }
        let mut dx = Array4::zeros(x.raw_dim());
        for ((n, i, j, c), &g) in d_out.indexed_iter() {
            let (a, b) = self.argmax(x, n, i, j, c);
            // overlapping windows may share a maximum
            dx[[n, a, b, c]] += g;
        }
        Ok((dx, ()))
    }

    fn typ(&self) -> String {
        "MaxPooling".into()
    }
}
