use crate::prelude::*;
use crate::utils::argmax_rows;
use csv::Writer;
use std::path::Path;

/// Writes one row per image: its index, the predicted class name and the
/// probability of every class.
pub fn write_predictions_to_csv<P: AsRef<Path>>(
    probabilities: &Array2<f64>,
    classes: &[String],
    file_path: P,
) -> Result<()> {
    if probabilities.ncols() != classes.len() {
        return Err(NNError::LayerShapeMismatch(format!(
            "{} probability columns for {} classes",
            probabilities.ncols(),
            classes.len()
        )));
    }
    let mut wtr = Writer::from_path(file_path)?;

    let mut header = vec!["index".to_string(), "predicted".to_string()];
    header.extend(classes.iter().cloned());
    wtr.write_record(&header)?;

    for (i, (row, best)) in probabilities
        .outer_iter()
        .zip(argmax_rows(probabilities))
        .enumerate()
    {
        let mut record = vec![i.to_string(), classes[best].clone()];
        record.extend(row.iter().map(|p| p.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
