#[allow(unused)]
use crate::prelude::*;

/// Uniform random array in `[-limit, limit)` drawn from `rng`.
#[macro_export]
macro_rules! rand_array {
    ($rng:expr, $limit:expr; $($x:expr),*) => {
        {
            Array::random_using(($($x,)*), Uniform::new(-$limit, $limit), $rng)
        }
    };
}

/// Glorot/Xavier uniform bound.
pub fn xavier_limit(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

/// Index of the largest entry of each row; the first one wins ties.
pub fn argmax_rows(scores: &Array2<f64>) -> Vec<usize> {
    scores
        .outer_iter()
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}
