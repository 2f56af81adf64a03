use crate::prelude::*;

/// Row-wise softmax, stabilised by subtracting each row's maximum.
pub fn softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut probs = scores.clone();
    for mut row in probs.outer_iter_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
    probs
}

/// Mean cross-entropy of the softmax of `scores` against integer `labels`.
///
/// Returns the loss together with its gradient w.r.t. the scores,
/// `(softmax(scores) - onehot(labels)) / N`.
pub fn softmax_cross_entropy(scores: &Array2<f64>, labels: &[usize]) -> Result<(f64, Array2<f64>)> {
    let (n, classes) = scores.dim();
    if n == 0 || labels.len() != n {
        return Err(NNError::InvalidInputShape(format!(
            "{} labels for {} score rows",
            labels.len(),
            n
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&y| y >= classes) {
        return Err(NNError::InvalidLabel(format!(
            "label {} out of range for {} classes",
            bad, classes
        )));
    }

    let mut grad = softmax(scores);
    let mut loss = 0.0;
    for (mut row, &y) in grad.outer_iter_mut().zip(labels) {
        loss -= row[y].ln();
        row[y] -= 1.0;
    }
    let scale = n as f64;
    grad /= scale;
    Ok((loss / scale, grad))
}
