//! End-to-end conversion scenarios against real files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;

use caffe_import::caffe::ir::Phase;
use caffe_import::caffe::protos::{BlobProto, BlobShape, LayerParameter, NetParameter};
use caffe_import::caffe::{parse_prototxt, TransformedWeights};
use caffe_import::tf::freeze::FreezeMode;
use caffe_import::tf::proto::{attr_value::Value, GraphDef};
use caffe_import::tf::{Placeholder, TensorMap};
use caffe_import::{Converter, ImportError};

const DEFINITION: &str = r#"
name: "Scenario"
layer {
  name: "data"
  type: "Input"
  top: "data"
  input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } }
}
layer {
  name: "conv1"
  type: "Convolution"
  bottom: "data"
  top: "conv1"
  convolution_param { num_output: 8 kernel_size: 3 }
}
layer {
  name: "prob"
  type: "Softmax"
  bottom: "conv1"
  top: "prob"
}
"#;

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

fn write_fixtures(dir: &Path, with_weights: bool) -> (PathBuf, PathBuf) {
    let def_path = dir.join("scenario.prototxt");
    fs::write(&def_path, DEFINITION).unwrap();

    let blobs = if with_weights {
        vec![
            blob(
                vec![8, 3, 3, 3],
                (0..8 * 3 * 3 * 3).map(|v| v as f32).collect(),
            ),
            blob(vec![8], vec![0.0; 8]),
        ]
    } else {
        vec![]
    };
    let net = NetParameter {
        name: Some("Scenario".into()),
        layer: vec![LayerParameter {
            name: Some("conv1".into()),
            r#type: Some("Convolution".into()),
            blobs,
        }],
    };
    let model_path = dir.join("scenario.caffemodel");
    fs::write(&model_path, net.encode_to_vec()).unwrap();
    (def_path, model_path)
}

#[test]
fn scenario_a_data_output() {
    let dir = tempfile::tempdir().unwrap();
    let (def_path, model_path) = write_fixtures(dir.path(), true);
    let out = dir.path().join("out.weights");

    Converter::new()
        .definition(&def_path)
        .caffemodel(&model_path)
        .data_output_path(&out)
        .run()
        .unwrap();

    let weights = TransformedWeights::load(&out).unwrap();
    let layers: Vec<_> = weights.layers().collect();
    assert_eq!(layers, vec!["conv1"]);
    let slots = weights.get("conv1").unwrap();
    assert_eq!(slots[0].0, "weights");
    assert_eq!(slots[0].1.shape(), &[3, 3, 3, 8]);
}

#[test]
fn scenario_b_code_output() {
    let dir = tempfile::tempdir().unwrap();
    let (def_path, _) = write_fixtures(dir.path(), true);
    let out = dir.path().join("out.code");

    Converter::new()
        .definition(&def_path)
        .code_output_path(&out)
        .run()
        .unwrap();

    let source = fs::read_to_string(&out).unwrap();
    // A class named after the graph, whose constructor takes the mapping
    // keyed by the input node's name.
    assert!(source.contains("pub struct Scenario"));
    assert!(source.contains("pub fn new(inputs: &TensorMap)"));
    assert!(source.contains("net.input(\"data\""));
    assert!(source.contains("net.mark_output(prob)"));
}

#[test]
fn scenario_c_standalone_optimize_for_inference() {
    let dir = tempfile::tempdir().unwrap();
    let (def_path, model_path) = write_fixtures(dir.path(), true);
    let out = dir.path().join("out.graph");

    Converter::new()
        .definition(&def_path)
        .caffemodel(&model_path)
        .standalone_output_path(&out)
        .freeze(FreezeMode::OptimizeForInference)
        .run()
        .unwrap();

    // Three artifacts: the raw graph under the requested name, plus the
    // optimized binary and text serializations.
    let binary = out.with_extension("pb");
    let text = out.with_extension("pbtxt");
    assert!(out.exists());
    assert!(binary.exists());
    assert!(text.exists());

    let optimized = GraphDef::decode(fs::read(&binary).unwrap().as_slice()).unwrap();
    // Variables were folded into constants.
    assert!(optimized.node.iter().all(|n| n.op != "VariableV2"));

    // The output node keeps the shape the last graph node declared.
    let prob = optimized.get_node("prob").expect("output node survives optimization");
    let shapes = match &prob.attr["_output_shapes"].value {
        Some(Value::List(list)) => &list.shape,
        other => panic!("unexpected _output_shapes: {other:?}"),
    };
    let dims: Vec<i64> = shapes[0].dim.iter().map(|d| d.size).collect();
    assert_eq!(dims, vec![1, 6, 6, 8]);

    assert!(fs::read_to_string(&text).unwrap().contains("op: \"Softmax\""));
}

#[test]
fn standalone_freeze_graph_folds_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (def_path, model_path) = write_fixtures(dir.path(), true);
    let out = dir.path().join("frozen.graph");

    Converter::new()
        .definition(&def_path)
        .caffemodel(&model_path)
        .standalone_output_path(&out)
        .freeze(FreezeMode::FreezeGraph)
        .run()
        .unwrap();

    let frozen = GraphDef::decode(fs::read(&out).unwrap().as_slice()).unwrap();
    assert!(frozen.node.iter().all(|n| n.op != "VariableV2"));
    assert!(frozen.node.iter().any(|n| n.op == "Const"));
}

#[test]
fn missing_weights_abort_the_standalone_export() {
    let dir = tempfile::tempdir().unwrap();
    let (def_path, model_path) = write_fixtures(dir.path(), false);
    let out = dir.path().join("out.graph");

    let result = Converter::new()
        .definition(&def_path)
        .caffemodel(&model_path)
        .standalone_output_path(&out)
        .run();
    assert!(matches!(result, Err(ImportError::WeightLoad(layer)) if layer == "conv1"));
}

#[test]
fn rebuilding_from_the_builder_result_is_structurally_stable() {
    let graph = parse_prototxt(DEFINITION, Phase::Test).unwrap();
    let inputs = TensorMap::from([(
        "data".to_string(),
        Placeholder::new(graph.input_node().shape()),
    )]);

    let first = graph.into_tf().unwrap().build_network(&inputs).unwrap();
    let second = graph.into_tf().unwrap().build_network(&inputs).unwrap();

    // Same node count, op kinds and connectivity on every reconstruction.
    assert_eq!(first.graph_def(), second.graph_def());
    let ops: Vec<_> = first.graph_def().node.iter().map(|n| n.op.as_str()).collect();
    assert_eq!(
        ops,
        vec!["Placeholder", "VariableV2", "Conv2D", "VariableV2", "BiasAdd", "Softmax"]
    );
}

#[test]
fn train_phase_keeps_dropout_in_generated_source() {
    let dir = tempfile::tempdir().unwrap();
    let definition = r#"
        name: "Scenario"
        layer { name: "data" type: "Input" top: "data"
                input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } } }
        layer { name: "conv1" type: "Convolution" bottom: "data" top: "conv1"
                convolution_param { num_output: 8 kernel_size: 3 } }
        layer { name: "drop1" type: "Dropout" bottom: "conv1" top: "conv1"
                dropout_param { dropout_ratio: 0.4 } }
        layer { name: "prob" type: "Softmax" bottom: "conv1" top: "prob" }
    "#;
    let def_path = dir.path().join("net.prototxt");
    fs::write(&def_path, definition).unwrap();

    let test_out = dir.path().join("test.code");
    Converter::new()
        .definition(&def_path)
        .code_output_path(&test_out)
        .run()
        .unwrap();
    assert!(!fs::read_to_string(&test_out).unwrap().contains("dropout"));

    let train_out = dir.path().join("train.code");
    Converter::new()
        .definition(&def_path)
        .code_output_path(&train_out)
        .phase(Phase::Train)
        .run()
        .unwrap();
    assert!(fs::read_to_string(&train_out).unwrap().contains("net.dropout(\"drop1\""));
}
