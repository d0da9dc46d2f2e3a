//! A minimal execution context: holds the variable state of an instantiated
//! network and persists it to checkpoints. The exporter owns exactly one
//! session for the lifetime of an export and must release it on every path.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{NpzReader, NpzWriter};

use crate::error::{ImportError, Result};

#[derive(Debug, Default)]
pub struct Session {
    variables: BTreeMap<String, ArrayD<f32>>,
    closed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable to a value, replacing any previous binding.
    pub fn assign(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        if self.closed {
            return Err(ImportError::SessionClosed);
        }
        self.variables.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &BTreeMap<String, ArrayD<f32>> {
        &self.variables
    }

    /// Persist the variable state to a checkpoint archive.
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if self.closed {
            return Err(ImportError::SessionClosed);
        }
        let mut npz = NpzWriter::new_compressed(File::create(path)?);
        for (name, value) in &self.variables {
            npz.add_array(name.as_str(), value)?;
        }
        npz.finish()?;
        log::info!("Checkpoint saved: {}", path.display());
        Ok(())
    }

    /// Restore variable state from a checkpoint archive.
    pub fn restore_checkpoint(path: &Path) -> Result<BTreeMap<String, ArrayD<f32>>> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let names = npz.names()?;
        let mut variables = BTreeMap::new();
        for name in names {
            let value: ArrayD<f32> = npz.by_name(&name)?;
            let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
            variables.insert(key, value);
        }
        Ok(variables)
    }

    /// Release the variable state. Safe to call more than once.
    pub fn close(&mut self) {
        self.variables.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            log::debug!("Session dropped without close, releasing variables");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.ckpt");

        let mut session = Session::new();
        let value = ArrayD::from_shape_vec(vec![2, 3], vec![1.0; 6]).unwrap();
        session.assign("conv1/weights", value.clone()).unwrap();
        session.save_checkpoint(&path).unwrap();
        session.close();

        let restored = Session::restore_checkpoint(&path).unwrap();
        assert_eq!(restored.get("conv1/weights"), Some(&value));
    }

    #[test]
    fn closed_session_rejects_assignment() {
        let mut session = Session::new();
        session.close();
        let value = ArrayD::zeros(vec![1]);
        assert!(matches!(
            session.assign("x", value),
            Err(ImportError::SessionClosed)
        ));
    }
}
