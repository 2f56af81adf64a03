use crate::prelude::*;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Key-value persistence for parameter tensors. Saving an existing key overwrites it.
pub trait ParameterStore {
    fn save(&mut self, key: &str, tensor: ArrayViewD<'_, f64>) -> Result<()>;

    /// Saves a set of tensors that belong together. Implementations stage every
    /// entry before committing any, so a failed call leaves the previous set intact.
    fn save_all(&mut self, entries: &[(String, ArrayViewD<'_, f64>)]) -> Result<()>;

    /// Fails with [`NNError::NoCheckpoint`] when nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<ArrayD<f64>>;

    fn contains(&self, key: &str) -> bool;
}

/// One bincode file per key, `<dir>/<key>.bin`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(NNError::ModelSaveError(format!("invalid parameter key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.bin", key)))
    }
}

impl ParameterStore for FileStore {
    fn save(&mut self, key: &str, tensor: ArrayViewD<'_, f64>) -> Result<()> {
        self.save_all(&[(key.to_string(), tensor)])
    }

    /// Writes every tensor to a temporary file in the store directory, then
    /// renames them into place once all writes succeeded.
    fn save_all(&mut self, entries: &[(String, ArrayViewD<'_, f64>)]) -> Result<()> {
        let mut staged = Vec::with_capacity(entries.len());
        for (key, tensor) in entries {
            let path = self.path_for(key)?;
            let encoded: Vec<u8> = bincode::serialize(tensor)?;
            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(&encoded)?;
            tmp.as_file().sync_all()?;
            staged.push((tmp, path));
        }
        for (tmp, path) in staged {
            tmp.persist(&path).map_err(|e| e.error)?;
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<ArrayD<f64>> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(NNError::NoCheckpoint(key.to_string()));
        }
        let mut buffer = Vec::new();
        File::open(&path)?.read_to_end(&mut buffer)?;
        Ok(bincode::deserialize(&buffer)?)
    }

    fn contains(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// In-process store, handy for tests and throwaway runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tensors: HashMap<String, ArrayD<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl ParameterStore for MemoryStore {
    fn save(&mut self, key: &str, tensor: ArrayViewD<'_, f64>) -> Result<()> {
        self.tensors.insert(key.to_string(), tensor.to_owned());
        Ok(())
    }

    fn save_all(&mut self, entries: &[(String, ArrayViewD<'_, f64>)]) -> Result<()> {
        for (key, tensor) in entries {
            self.save(key, tensor.view())?;
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<ArrayD<f64>> {
        self.tensors
            .get(key)
            .cloned()
            .ok_or_else(|| NNError::NoCheckpoint(key.to_string()))
    }

    fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> ArrayD<f64> {
        Array4::from_shape_fn((2, 3, 3, 2), |(k, i, j, d)| {
            (k as f64 - 0.5) * (i * 3 + j) as f64 / 7.0 + d as f64 * 1e-9
        })
        .into_dyn()
    }

    #[test]
    fn file_store_roundtrip_is_bit_identical() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("checkpoints")).unwrap();
        let tensor = sample();
        store.save("cnn_conv.A", tensor.view()).unwrap();
        assert!(store.contains("cnn_conv.A"));
        assert!(dir.path().join("checkpoints/cnn_conv.A.bin").is_file());

        let loaded = store.load("cnn_conv.A").unwrap();
        assert_eq!(loaded.shape(), tensor.shape());
        for (a, b) in loaded.iter().zip(tensor.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn file_store_overwrites() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        store.save("cnn_fc.b", array![1.0, 2.0].into_dyn().view()).unwrap();
        store.save("cnn_fc.b", array![3.0].into_dyn().view()).unwrap();
        assert_eq!(store.load("cnn_fc.b").unwrap(), array![3.0].into_dyn());
    }

    #[test]
    fn missing_key_is_no_checkpoint() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(!store.contains("cnn_fc.A"));
        assert!(matches!(store.load("cnn_fc.A"), Err(NNError::NoCheckpoint(k)) if k == "cnn_fc.A"));
        assert!(matches!(MemoryStore::new().load("x"), Err(NNError::NoCheckpoint(_))));
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.save("../escape", sample().view()),
            Err(NNError::ModelSaveError(_))
        ));
    }

    #[test]
    fn failed_batch_leaves_previous_tensors() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        store.save("cnn_conv.A", array![1.0].into_dyn().view()).unwrap();

        let new = array![2.0].into_dyn();
        let entries = vec![
            ("cnn_conv.A".to_string(), new.view()),
            ("../cnn_fc.A".to_string(), new.view()),
        ];
        assert!(store.save_all(&entries).is_err());
        assert_eq!(store.load("cnn_conv.A").unwrap(), array![1.0].into_dyn());
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        let t = sample();
        let entries = vec![("a".to_string(), t.view()), ("b".to_string(), t.view())];
        store.save_all(&entries).unwrap();
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.save("k", sample().view()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("k").unwrap(), sample());
    }
}
