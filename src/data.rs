use crate::prelude::*;
use csv::ReaderBuilder;
use std::fs;
use std::path::Path;

/// Images `[N, W, H, D]` with one class label each.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Array4<f64>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn new(images: Array4<f64>, labels: Vec<usize>) -> Result<Self> {
        if images.dim().0 != labels.len() {
            return Err(NNError::InvalidInputShape(format!(
                "{} images but {} labels",
                images.dim().0,
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Stacks batches along the image axis.
    pub fn concat(parts: &[Batch]) -> Result<Self> {
        if parts.is_empty() {
            return Err(NNError::DatasetError("cannot concatenate zero batches".into()));
        }
        let views: Vec<ArrayView4<f64>> = parts.iter().map(|b| b.images.view()).collect();
        let images = concatenate(Axis(0), &views)?;
        let labels = parts.iter().flat_map(|b| b.labels.iter().copied()).collect();
        Batch::new(images, labels)
    }
}

/// Where class names and training images come from.
pub trait DataSource {
    /// Ordered class names; label `i` means `classifications()[i]`.
    fn classifications(&self) -> Result<Vec<String>>;

    /// Number of samples available.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples `offset..offset + count`.
    fn load_batch(&self, offset: usize, count: usize) -> Result<Batch>;

    /// Samples at arbitrary indices, in the given order.
    fn load_samples(&self, indices: &[usize]) -> Result<Batch> {
        let parts = indices
            .iter()
            .map(|&i| self.load_batch(i, 1))
            .collect::<Result<Vec<_>>>()?;
        Batch::concat(&parts)
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    classes: Vec<String>,
    data: Batch,
}

impl InMemoryDataset {
    pub fn new(classes: Vec<String>, data: Batch) -> Result<Self> {
        if classes.is_empty() {
            return Err(NNError::DatasetError("no classifications".into()));
        }
        if let Some(&bad) = data.labels.iter().find(|&&y| y >= classes.len()) {
            return Err(NNError::InvalidLabel(format!(
                "label {} out of range for {} classes",
                bad,
                classes.len()
            )));
        }
        Ok(Self { classes, data })
    }

    /// Reads images from a header-less CSV where each row is
    /// `label, v_0, v_1, ...` with the values of one `[W, H, D]` image in
    /// row-major order, and class names from `classes_path`.
    ///
    /// With `pixel_range = Some((lb, ub))` the values are rescaled to `[0, 1]`.
    pub fn from_csv<P: AsRef<Path>, Q: AsRef<Path>>(
        images_path: P,
        classes_path: Q,
        shape: InputShape,
        pixel_range: Option<(f64, f64)>,
    ) -> Result<Self> {
        let classes = load_classifications(classes_path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(images_path)?;

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != shape.len() + 1 {
                return Err(NNError::DatasetError(format!(
                    "row {} has {} values, expected label + {}",
                    row,
                    record.len(),
                    shape.len()
                )));
            }
            labels.push(parse_field::<usize>(&record[0], row)?);
            for field in record.iter().skip(1) {
                values.push(parse_field::<f64>(field, row)?);
            }
        }

        let mut images =
            Array4::from_shape_vec((labels.len(), shape.width, shape.height, shape.depth), values)?;
        if let Some((lb, ub)) = pixel_range {
            images.to_unity(lb, ub);
        }
        Self::new(classes, Batch::new(images, labels)?)
    }

    pub fn data(&self) -> &Batch {
        &self.data
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, row: usize) -> Result<T> {
    field
        .parse()
        .map_err(|_| NNError::DatasetError(format!("row {}: cannot parse '{}'", row, field)))
}

impl DataSource for InMemoryDataset {
    fn classifications(&self) -> Result<Vec<String>> {
        Ok(self.classes.clone())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn load_batch(&self, offset: usize, count: usize) -> Result<Batch> {
        if count == 0 || offset + count > self.len() {
            return Err(NNError::DatasetError(format!(
                "batch {}..{} outside dataset of {} samples",
                offset,
                offset + count,
                self.len()
            )));
        }
        Batch::new(
            self.data
                .images
                .slice(s![offset..offset + count, .., .., ..])
                .to_owned(),
            self.data.labels[offset..offset + count].to_vec(),
        )
    }

    fn load_samples(&self, indices: &[usize]) -> Result<Batch> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(NNError::DatasetError(format!(
                "sample {} outside dataset of {} samples",
                bad,
                self.len()
            )));
        }
        Batch::new(
            self.data.images.select(Axis(0), indices),
            indices.iter().map(|&i| self.data.labels[i]).collect(),
        )
    }
}

/// One class name per non-empty line.
pub fn load_classifications<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let classes: Vec<String> = fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if classes.is_empty() {
        return Err(NNError::DatasetError("classification list is empty".into()));
    }
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn dataset() -> InMemoryDataset {
        let images = Array4::from_shape_fn((5, 2, 2, 1), |(n, i, j, _)| (n * 10 + i * 2 + j) as f64);
        let classes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        InMemoryDataset::new(classes, Batch::new(images, vec![0, 1, 2, 1, 0]).unwrap()).unwrap()
    }

    #[test]
    fn batch_rejects_label_count_mismatch() {
        assert!(matches!(
            Batch::new(Array4::zeros((3, 2, 2, 1)), vec![0, 1]),
            Err(NNError::InvalidInputShape(_))
        ));
    }

    #[test]
    fn load_batch_slices_window() {
        let batch = dataset().load_batch(1, 3).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.labels, vec![1, 2, 1]);
        assert_eq!(batch.images[[0, 0, 0, 0]], 10.0);
        assert_eq!(batch.images[[2, 1, 1, 0]], 33.0);
    }

    #[test]
    fn load_batch_rejects_out_of_range() {
        assert!(matches!(dataset().load_batch(3, 3), Err(NNError::DatasetError(_))));
        assert!(matches!(dataset().load_batch(0, 0), Err(NNError::DatasetError(_))));
    }

    #[test]
    fn load_samples_keeps_requested_order() {
        let data = dataset();
        let batch = data.load_samples(&[4, 0, 2]).unwrap();
        assert_eq!(batch.labels, vec![0, 0, 2]);
        assert_eq!(batch.images[[0, 0, 0, 0]], 40.0);
        assert_eq!(batch.images[[2, 0, 0, 0]], 20.0);
        assert!(matches!(data.load_samples(&[5]), Err(NNError::DatasetError(_))));
    }

    #[test]
    fn default_load_samples_concatenates_windows() {
        struct Windows(InMemoryDataset);
        impl DataSource for Windows {
            fn classifications(&self) -> Result<Vec<String>> {
                self.0.classifications()
            }
            fn len(&self) -> usize {
                self.0.len()
            }
            fn load_batch(&self, offset: usize, count: usize) -> Result<Batch> {
                self.0.load_batch(offset, count)
            }
        }
        let data = dataset();
        let wrapped = Windows(data.clone());
        assert_eq!(
            wrapped.load_samples(&[3, 1]).unwrap(),
            data.load_samples(&[3, 1]).unwrap()
        );
    }

    #[test]
    fn rejects_labels_outside_classification_list() {
        let batch = Batch::new(Array4::zeros((1, 1, 1, 1)), vec![2]).unwrap();
        assert!(matches!(
            InMemoryDataset::new(vec!["x".into(), "y".into()], batch),
            Err(NNError::InvalidLabel(_))
        ));
    }

    #[test]
    fn reads_csv_images_and_class_list() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("train.csv");
        let classes = dir.path().join("classes.txt");
        fs::write(&classes, "zeros\n\nones\n").unwrap();
        fs::write(&images, "0, 0,0,0,0\n1, 255,255,255,0\n").unwrap();

        let data = InMemoryDataset::from_csv(&images, &classes, InputShape::new(2, 2, 1), Some((0.0, 255.0))).unwrap();
        assert_eq!(data.classifications().unwrap(), vec!["zeros", "ones"]);
        assert_eq!(data.len(), 2);
        assert_eq!(data.data().labels, vec![0, 1]);
        assert_abs_diff_eq!(data.data().images[[1, 0, 1, 0]], 1.0);
        assert_abs_diff_eq!(data.data().images[[1, 1, 1, 0]], 0.0);
    }

    #[test]
    fn csv_rows_must_match_shape() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("train.csv");
        let classes = dir.path().join("classes.txt");
        fs::write(&classes, "a\nb\n").unwrap();
        fs::write(&images, "0,1,2,3\n").unwrap();
        assert!(matches!(
            InMemoryDataset::from_csv(&images, &classes, InputShape::new(2, 2, 1), None),
            Err(NNError::DatasetError(_))
        ));
    }

    #[test]
    fn empty_class_list_is_an_error() {
        let dir = tempdir().unwrap();
        let classes = dir.path().join("classes.txt");
        fs::write(&classes, "\n  \n").unwrap();
        assert!(matches!(load_classifications(&classes), Err(NNError::DatasetError(_))));
    }
}
