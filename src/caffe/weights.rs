//! Reads stored weight tensors out of a binary `.caffemodel` file.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::ArrayD;
use prost::Message;

use crate::caffe::protos::NetParameter;
use crate::error::{ImportError, Result};

/// Per-layer stored tensors in the source convention, in blob order
/// (e.g. kernel then bias for a convolution). Never mutated after creation;
/// the data transformer produces a new mapping instead.
#[derive(Debug, Clone, Default)]
pub struct WeightBlob {
    entries: BTreeMap<String, Vec<ArrayD<f32>>>,
}

impl WeightBlob {
    pub fn get(&self, layer: &str) -> Option<&[ArrayD<f32>]> {
        self.entries.get(layer).map(Vec::as_slice)
    }

    pub fn insert(&mut self, layer: String, tensors: Vec<ArrayD<f32>>) {
        self.entries.insert(layer, tensors);
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `.caffemodel` file into a [`WeightBlob`].
pub fn read_caffemodel(path: &Path) -> Result<WeightBlob> {
    log::info!("Reading weights: {}", path.display());
    let bytes = std::fs::read(path).map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let net = NetParameter::decode(bytes.as_slice())?;

    let mut blob = WeightBlob::default();
    for layer in &net.layer {
        let name = match layer.name.as_deref() {
            Some(name) if !layer.blobs.is_empty() => name,
            _ => continue,
        };
        let tensors = layer
            .blobs
            .iter()
            .map(|stored| {
                let dims = stored.dims();
                ArrayD::from_shape_vec(dims.clone(), stored.data.clone()).map_err(|_| {
                    ImportError::Parse(format!(
                        "layer `{name}` stores {} values for shape {dims:?}",
                        stored.data.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        blob.insert(name.to_string(), tensors);
    }

    log::debug!("Layers with stored weights: {}", blob.entries.len());
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caffe::protos::{BlobProto, BlobShape, LayerParameter};

    fn blob(dims: Vec<i64>, data: Vec<f32>) -> BlobProto {
        BlobProto {
            shape: Some(BlobShape { dim: dims }),
            data,
            num: None,
            channels: None,
            height: None,
            width: None,
        }
    }

    #[test]
    fn decodes_an_encoded_net() {
        let net = NetParameter {
            name: Some("LeNet".into()),
            layer: vec![
                LayerParameter {
                    name: Some("conv1".into()),
                    r#type: Some("Convolution".into()),
                    blobs: vec![
                        blob(vec![2, 1, 3, 3], vec![0.5; 18]),
                        blob(vec![2], vec![0.0, 1.0]),
                    ],
                },
                LayerParameter {
                    name: Some("relu1".into()),
                    r#type: Some("ReLU".into()),
                    blobs: vec![],
                },
            ],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.caffemodel");
        std::fs::write(&path, net.encode_to_vec()).unwrap();

        let weights = read_caffemodel(&path).unwrap();
        let conv = weights.get("conv1").unwrap();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0].shape(), &[2, 1, 3, 3]);
        assert_eq!(conv[1].shape(), &[2]);
        // Layers without stored tensors do not get entries.
        assert!(weights.get("relu1").is_none());
    }

    #[test]
    fn legacy_dimension_fields_are_honored() {
        let stored = BlobProto {
            shape: None,
            data: vec![0.0; 10],
            num: Some(1),
            channels: Some(1),
            height: Some(1),
            width: Some(10),
        };
        assert_eq!(stored.dims(), vec![10]);
    }

    #[test]
    fn element_count_mismatch_is_rejected() {
        let net = NetParameter {
            name: None,
            layer: vec![LayerParameter {
                name: Some("conv1".into()),
                r#type: None,
                blobs: vec![blob(vec![2, 2], vec![0.0; 3])],
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.caffemodel");
        std::fs::write(&path, net.encode_to_vec()).unwrap();
        assert!(matches!(
            read_caffemodel(&path),
            Err(ImportError::Parse(_))
        ));
    }
}
