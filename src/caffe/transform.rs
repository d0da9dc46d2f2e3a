//! Reorders stored weight tensors from the source convention to the target
//! convention, reconciling every tensor against the shapes the layer mapper
//! declared. A pure function of (graph, weights): no session state, and the
//! output is a distinct type that cannot be fed back in.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use ndarray_npy::{NpzReader, NpzWriter};

use crate::caffe::ir::{CaffeGraph, LayerKind};
use crate::caffe::to_tf::{weight_specs, LayerWeightSpec};
use crate::caffe::weights::WeightBlob;
use crate::error::{ImportError, Result};

/// Per-layer tensors in the target convention, keyed by slot name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformedWeights {
    entries: BTreeMap<String, Vec<(String, ArrayD<f32>)>>,
}

impl TransformedWeights {
    pub fn get(&self, layer: &str) -> Option<&[(String, ArrayD<f32>)]> {
        self.entries.get(layer).map(Vec::as_slice)
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist as a compressed archive with `layer/slot` entry names, the
    /// layout [`Network::load`](crate::tf::Network::load) expects.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut npz = NpzWriter::new_compressed(File::create(path)?);
        for (layer, slots) in &self.entries {
            for (slot, tensor) in slots {
                npz.add_array(format!("{layer}/{slot}"), tensor)?;
            }
        }
        npz.finish()?;
        log::info!("Transformed weights saved: {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut npz = NpzReader::new(file)?;
        let mut entries: BTreeMap<String, Vec<(String, ArrayD<f32>)>> = BTreeMap::new();
        for name in npz.names()? {
            let tensor: ArrayD<f32> = npz.by_name(&name)?;
            let key = name.strip_suffix(".npy").unwrap_or(&name);
            let (layer, slot) = key.split_once('/').ok_or_else(|| {
                ImportError::Parse(format!("weight archive entry `{name}` is not layer/slot"))
            })?;
            entries.entry(layer.to_string()).or_default().push((slot.to_string(), tensor));
        }
        Ok(Self { entries })
    }
}

/// Transform stored weights into the target convention.
///
/// Layers without stored weights are skipped here and surface as
/// `WeightLoadError` when the weight file is loaded into a model. Stored
/// layers the graph does not contain are ignored.
pub fn transform(graph: &CaffeGraph, weights: &WeightBlob) -> Result<TransformedWeights> {
    let specs = weight_specs(graph)?;
    let mut entries = BTreeMap::new();

    for spec in &specs {
        let Some(stored) = weights.get(&spec.layer) else {
            log::debug!("no stored weights for `{}`", spec.layer);
            continue;
        };
        reconcile(spec, stored)?;
        entries.insert(spec.layer.clone(), transform_layer(graph, spec, stored)?);
    }

    for layer in weights.layers() {
        if !entries.contains_key(layer) {
            log::debug!("ignoring stored weights for `{layer}`: not in the graph");
        }
    }
    Ok(TransformedWeights { entries })
}

/// Check the stored tensors against the mapper's declared shapes. Never
/// coerces: any disagreement is fatal.
fn reconcile(spec: &LayerWeightSpec, stored: &[ArrayD<f32>]) -> Result<()> {
    if stored.len() > spec.slots.len() {
        return Err(ImportError::Parse(format!(
            "layer `{}` stores {} tensors, the mapper expects {}",
            spec.layer,
            stored.len(),
            spec.slots.len()
        )));
    }
    for (index, slot) in spec.slots.iter().enumerate() {
        let actual = stored.get(index).map(|t| t.shape().to_vec()).unwrap_or_default();
        if actual != slot.shape {
            return Err(ImportError::WeightShapeMismatch {
                layer: spec.layer.clone(),
                slot: slot.name.to_string(),
                expected: slot.shape.clone(),
                actual,
            });
        }
    }
    Ok(())
}

fn transform_layer(
    graph: &CaffeGraph,
    spec: &LayerWeightSpec,
    stored: &[ArrayD<f32>],
) -> Result<Vec<(String, ArrayD<f32>)>> {
    match spec.kind {
        LayerKind::Convolution => {
            // (out, in, h, w) -> (h, w, in, out)
            let mut slots =
                vec![("weights".to_string(), standardize(stored[0].view().permuted_axes(IxDyn(&[2, 3, 1, 0]))))];
            if let Some(bias) = stored.get(1) {
                slots.push(("biases".to_string(), bias.clone()));
            }
            Ok(slots)
        }
        LayerKind::InnerProduct => {
            let node = graph.get_node(&spec.layer)?;
            let parent = graph.get_node(&node.parents[0])?.shape();
            let weight = if parent.height * parent.width == 1 {
                // (out, in) -> (in, out)
                standardize(stored[0].view().reversed_axes())
            } else {
                // The stored matrix flattens the input in (c, h, w) order;
                // the target flattens in (h, w, c). Route the rows through
                // the spatial layout before transposing.
                let out = stored[0].shape()[0];
                let spatial = reshape(
                    &stored[0],
                    &[out, parent.channels, parent.height, parent.width],
                );
                let reordered = standardize(spatial.view().permuted_axes(IxDyn(&[0, 2, 3, 1])));
                let flat = reshape(&reordered, &[out, parent.height * parent.width * parent.channels]);
                standardize(flat.view().reversed_axes())
            };
            let mut slots = vec![("weights".to_string(), weight)];
            if let Some(bias) = stored.get(1) {
                slots.push(("biases".to_string(), bias.clone()));
            }
            Ok(slots)
        }
        LayerKind::BatchNorm => {
            // The source stores a moving-average scale factor as a third
            // blob; statistics are divided by it and the factor dropped.
            let factor = stored[2][[0]];
            let scale = if factor == 0.0 { 0.0 } else { 1.0 / factor };
            Ok(vec![
                ("mean".to_string(), stored[0].mapv(|v| v * scale)),
                ("variance".to_string(), stored[1].mapv(|v| v * scale)),
            ])
        }
        kind => Err(ImportError::UnsupportedLayer(kind.to_string())),
    }
}

fn standardize(view: ArrayViewD<'_, f32>) -> ArrayD<f32> {
    ArrayD::from_shape_vec(view.shape().to_vec(), view.iter().copied().collect())
        .expect("element count is preserved")
}

fn reshape(tensor: &ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(shape.to_vec(), tensor.iter().copied().collect())
        .expect("element count is preserved")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caffe::from_caffe::parse_prototxt;
    use crate::caffe::ir::Phase;

    const CONV_NET: &str = r#"
        name: "Scenario"
        layer { name: "data" type: "Input" top: "data"
                input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } } }
        layer { name: "conv1" type: "Convolution" bottom: "data" top: "conv1"
                convolution_param { num_output: 8 kernel_size: 5 } }
        layer { name: "prob" type: "Softmax" bottom: "conv1" top: "prob" }
    "#;

    fn conv_blob() -> WeightBlob {
        let kernel: Vec<f32> = (0..8 * 3 * 5 * 5).map(|v| v as f32).collect();
        let mut blob = WeightBlob::default();
        blob.insert(
            "conv1".into(),
            vec![
                ArrayD::from_shape_vec(vec![8, 3, 5, 5], kernel).unwrap(),
                ArrayD::from_shape_vec(vec![8], vec![0.0; 8]).unwrap(),
            ],
        );
        blob
    }

    #[test]
    fn conv_kernels_move_to_hwio() {
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let blob = conv_blob();
        let transformed = transform(&graph, &blob).unwrap();

        let slots = transformed.get("conv1").unwrap();
        assert_eq!(slots[0].0, "weights");
        assert_eq!(slots[0].1.shape(), &[5, 5, 3, 8]);
        // target[h, w, i, o] must equal source[o, i, h, w]
        let source = &blob.get("conv1").unwrap()[0];
        assert_eq!(slots[0].1[[4, 2, 1, 7]], source[[7, 1, 4, 2]]);
        assert_eq!(slots[1].0, "biases");
    }

    #[test]
    fn transform_is_deterministic() {
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let blob = conv_blob();
        let first = transform(&graph, &blob).unwrap();
        let second = transform(&graph, &blob).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn already_transformed_weights_are_rejected() {
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let transformed = transform(&graph, &conv_blob()).unwrap();

        // Rebuild a source-side blob out of the transformed tensors. The
        // kernel now carries the target layout, which the mapper's declared
        // shape rules out, so a second pass cannot silently double-apply.
        let mut fed_back = WeightBlob::default();
        fed_back.insert(
            "conv1".into(),
            transformed.get("conv1").unwrap().iter().map(|(_, t)| t.clone()).collect(),
        );
        assert!(matches!(
            transform(&graph, &fed_back),
            Err(ImportError::WeightShapeMismatch { layer, slot, .. })
                if layer == "conv1" && slot == "weights"
        ));
    }

    #[test]
    fn wrong_stored_shape_is_never_coerced() {
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let mut blob = WeightBlob::default();
        blob.insert(
            "conv1".into(),
            vec![
                ArrayD::zeros(vec![8, 3, 3, 3]),
                ArrayD::zeros(vec![8]),
            ],
        );
        assert!(matches!(
            transform(&graph, &blob),
            Err(ImportError::WeightShapeMismatch { expected, actual, .. })
                if expected == vec![8, 3, 5, 5] && actual == vec![8, 3, 3, 3]
        ));
    }

    #[test]
    fn missing_layers_are_left_to_load_time() {
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let transformed = transform(&graph, &WeightBlob::default()).unwrap();
        assert!(transformed.is_empty());
    }

    #[test]
    fn spatial_inner_product_rows_are_reordered() {
        let graph = parse_prototxt(
            r#"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 2 dim: 2 dim: 1 } } }
            layer { name: "ip" type: "InnerProduct" bottom: "data" top: "ip"
                    inner_product_param { num_output: 3 } }
            "#,
            Phase::Test,
        )
        .unwrap();
        let mut blob = WeightBlob::default();
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        blob.insert(
            "ip".into(),
            vec![
                ArrayD::from_shape_vec(vec![3, 4], values).unwrap(),
                ArrayD::from_shape_vec(vec![3], vec![0.0; 3]).unwrap(),
            ],
        );
        let transformed = transform(&graph, &blob).unwrap();
        let weight = &transformed.get("ip").unwrap()[0].1;
        assert_eq!(weight.shape(), &[4, 3]);
        // Source row 0 is [0, 1, 2, 3] in (c, h, w) order; the target column
        // must read it back in (h, w, c) order: [0, 2, 1, 3].
        let column: Vec<f32> = (0..4).map(|r| weight[[r, 0]]).collect();
        assert_eq!(column, vec![0.0, 2.0, 1.0, 3.0]);
    }

    #[test]
    fn batch_norm_statistics_are_unscaled() {
        let graph = parse_prototxt(
            r#"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 2 dim: 4 dim: 4 } } }
            layer { name: "bn" type: "BatchNorm" bottom: "data" top: "bn" }
            "#,
            Phase::Test,
        )
        .unwrap();
        let mut blob = WeightBlob::default();
        blob.insert(
            "bn".into(),
            vec![
                ArrayD::from_shape_vec(vec![2], vec![2.0, 4.0]).unwrap(),
                ArrayD::from_shape_vec(vec![2], vec![8.0, 16.0]).unwrap(),
                ArrayD::from_shape_vec(vec![1], vec![2.0]).unwrap(),
            ],
        );
        let transformed = transform(&graph, &blob).unwrap();
        let slots = transformed.get("bn").unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].1.as_slice().unwrap(), &[1.0, 2.0]);
        assert_eq!(slots[1].1.as_slice().unwrap(), &[4.0, 8.0]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.npz");
        let graph = parse_prototxt(CONV_NET, Phase::Test).unwrap();
        let transformed = transform(&graph, &conv_blob()).unwrap();
        transformed.save(&path).unwrap();
        assert_eq!(TransformedWeights::load(&path).unwrap(), transformed);
    }
}
