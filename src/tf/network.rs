//! The constructible network object. Both consumers of the builder result
//! drive this same API: the in-memory instantiation used by the standalone
//! exporter, and the generated source, which reconstructs the network
//! through these methods when compiled into a downstream crate.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::NpzReader;

use crate::caffe::ir::TensorShape;
use crate::caffe::op_configuration::{
    BatchNormConfig, Conv2dConfig, DropoutConfig, EltwiseOp, LinearConfig, LrnConfig,
    Pool2dConfig, PoolKind,
};
use crate::error::{ImportError, Result};
use crate::tf::proto::{
    attr_value::{ListValue, Value},
    shape_proto, AttrValue, GraphDef, NodeDef, TensorProto, DT_FLOAT, DT_INT32,
};
use crate::tf::session::Session;

/// A caller-supplied symbolic input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub shape: TensorShape,
}

impl Placeholder {
    pub fn new(shape: TensorShape) -> Self {
        Self { shape }
    }
}

/// Mapping from input-node names to caller-supplied input tensors; the
/// generated class constructor takes this.
pub type TensorMap = HashMap<String, Placeholder>;

/// Opaque reference to a tensor produced by a network operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorHandle(usize);

#[derive(Debug, Clone)]
struct Registered {
    node: String,
    shape: TensorShape,
}

#[derive(Debug, Clone, PartialEq)]
struct WeightSlot {
    layer: String,
    slot: &'static str,
    /// Shape in the target convention, validated at load time.
    shape: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct Network {
    name: String,
    graph: GraphDef,
    tensors: Vec<Registered>,
    slots: Vec<WeightSlot>,
    inputs: Vec<String>,
    outputs: Vec<usize>,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph_def(&self) -> &GraphDef {
        &self.graph
    }

    pub fn shape(&self, tensor: TensorHandle) -> TensorShape {
        self.tensors[tensor.0].shape
    }

    pub fn node_name(&self, tensor: TensorHandle) -> &str {
        &self.tensors[tensor.0].node
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    /// Node names marked as graph outputs, in marking order.
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|&i| self.tensors[i].node.as_str()).collect()
    }

    /// Shapes of the marked outputs, in marking order.
    pub fn output_shapes(&self) -> Vec<TensorShape> {
        self.outputs.iter().map(|&i| self.tensors[i].shape).collect()
    }

    pub fn mark_output(&mut self, tensor: TensorHandle) {
        self.outputs.push(tensor.0);
    }

    /// Declared weight slots as `(layer, slot, shape)` triples.
    pub fn weight_slots(&self) -> impl Iterator<Item = (&str, &str, &[usize])> {
        self.slots.iter().map(|s| (s.layer.as_str(), s.slot, s.shape.as_slice()))
    }

    /// Bind the named input to a caller-supplied placeholder.
    pub fn input(
        &mut self,
        name: &str,
        shape: [usize; 4],
        inputs: &TensorMap,
    ) -> Result<TensorHandle> {
        let declared = TensorShape::new(shape[0], shape[1], shape[2], shape[3]);
        let supplied = inputs
            .get(name)
            .ok_or_else(|| ImportError::Lookup(format!("input `{name}`")))?;
        if supplied.shape != declared {
            return Err(ImportError::Shape {
                layer: name.to_string(),
                reason: format!(
                    "supplied input has shape {}, the graph declares {declared}",
                    supplied.shape
                ),
            });
        }
        self.inputs.push(name.to_string());
        let node = self.add_op(
            name,
            "Placeholder",
            vec![],
            vec![
                ("dtype", Value::Type(DT_FLOAT)),
                ("shape", Value::Shape(shape_proto(&declared.to_nhwc()))),
            ],
            declared,
        );
        Ok(node)
    }

    pub fn conv2d(
        &mut self,
        name: &str,
        input: TensorHandle,
        config: Conv2dConfig,
    ) -> Result<TensorHandle> {
        let in_shape = self.shape(input);
        if in_shape.channels != config.channels[0] {
            return Err(ImportError::Shape {
                layer: name.to_string(),
                reason: format!(
                    "input carries {} channels, configuration expects {}",
                    in_shape.channels, config.channels[0]
                ),
            });
        }
        let out_shape = config.output_shape(in_shape).ok_or_else(|| ImportError::Shape {
            layer: name.to_string(),
            reason: format!("kernel {:?} does not fit input {in_shape}", config.kernel_size),
        })?;

        let kernel = vec![
            config.kernel_size[0],
            config.kernel_size[1],
            config.channels[0] / config.groups,
            config.channels[1],
        ];
        let weights = self.add_variable(name, "weights", kernel);
        let parent = self.tensors[input.0].node.clone();

        let conv_name = if config.bias { format!("{name}/Conv2D") } else { name.to_string() };
        let attrs = vec![
            ("T", Value::Type(DT_FLOAT)),
            ("strides", spatial_list(config.stride)),
            ("dilations", spatial_list(config.dilation)),
            ("padding", padding_attr(config.padding)),
        ];
        self.add_node(&conv_name, "Conv2D", vec![parent, weights], attrs, Some(out_shape));

        if config.bias {
            let biases = self.add_variable(name, "biases", vec![config.channels[1]]);
            self.add_node(
                name,
                "BiasAdd",
                vec![conv_name, biases],
                vec![("T", Value::Type(DT_FLOAT))],
                Some(out_shape),
            );
        }
        Ok(self.register(name, out_shape))
    }

    pub fn pool2d(
        &mut self,
        name: &str,
        input: TensorHandle,
        config: Pool2dConfig,
    ) -> Result<TensorHandle> {
        let in_shape = self.shape(input);
        let out_shape = config.output_shape(in_shape).ok_or_else(|| ImportError::Shape {
            layer: name.to_string(),
            reason: format!("kernel {:?} does not fit input {in_shape}", config.kernel_size),
        })?;
        let op = match config.kind {
            PoolKind::Max => "MaxPool",
            PoolKind::Average => "AvgPool",
        };
        let ksize = if config.global {
            [in_shape.height, in_shape.width]
        } else {
            config.kernel_size
        };
        let parent = self.tensors[input.0].node.clone();
        self.add_node(
            name,
            op,
            vec![parent],
            vec![
                ("T", Value::Type(DT_FLOAT)),
                ("ksize", spatial_list(ksize)),
                ("strides", spatial_list(config.stride)),
                ("padding", padding_attr(config.padding)),
            ],
            Some(out_shape),
        );
        Ok(self.register(name, out_shape))
    }

    pub fn linear(
        &mut self,
        name: &str,
        input: TensorHandle,
        config: LinearConfig,
    ) -> Result<TensorHandle> {
        let in_shape = self.shape(input);
        let flat = in_shape.height * in_shape.width * in_shape.channels;
        if flat != config.d_input {
            return Err(ImportError::Shape {
                layer: name.to_string(),
                reason: format!(
                    "input flattens to {flat}, configuration expects {}",
                    config.d_input
                ),
            });
        }

        let mut x = self.tensors[input.0].node.clone();
        // Spatial inputs are flattened before the matrix product; the weight
        // transformer reorders rows to match this layout.
        if in_shape.height * in_shape.width != 1 {
            x = self.reshape_to(name, x, config.d_input);
        }

        let weights = self.add_variable(name, "weights", vec![config.d_input, config.d_output]);
        let out_shape = TensorShape::new(in_shape.batch_size, 1, 1, config.d_output);
        let matmul_name = if config.bias { format!("{name}/MatMul") } else { name.to_string() };
        self.add_node(
            &matmul_name,
            "MatMul",
            vec![x, weights],
            vec![("T", Value::Type(DT_FLOAT))],
            Some(out_shape),
        );
        if config.bias {
            let biases = self.add_variable(name, "biases", vec![config.d_output]);
            self.add_node(
                name,
                "BiasAdd",
                vec![matmul_name, biases],
                vec![("T", Value::Type(DT_FLOAT))],
                Some(out_shape),
            );
        }
        Ok(self.register(name, out_shape))
    }

    pub fn relu(&mut self, name: &str, input: TensorHandle) -> Result<TensorHandle> {
        self.unary(name, "Relu", input)
    }

    pub fn sigmoid(&mut self, name: &str, input: TensorHandle) -> Result<TensorHandle> {
        self.unary(name, "Sigmoid", input)
    }

    pub fn tanh(&mut self, name: &str, input: TensorHandle) -> Result<TensorHandle> {
        self.unary(name, "Tanh", input)
    }

    pub fn softmax(&mut self, name: &str, input: TensorHandle) -> Result<TensorHandle> {
        self.unary(name, "Softmax", input)
    }

    pub fn lrn(&mut self, name: &str, input: TensorHandle, config: LrnConfig) -> Result<TensorHandle> {
        let shape = self.shape(input);
        let parent = self.tensors[input.0].node.clone();
        self.add_node(
            name,
            "LRN",
            vec![parent],
            vec![
                ("depth_radius", Value::I(((config.local_size - 1) / 2) as i64)),
                ("alpha", Value::F(config.alpha)),
                ("beta", Value::F(config.beta)),
                ("bias", Value::F(config.k)),
            ],
            Some(shape),
        );
        Ok(self.register(name, shape))
    }

    pub fn concat(&mut self, name: &str, inputs: &[TensorHandle]) -> Result<TensorHandle> {
        let first = self.shape(
            *inputs
                .first()
                .ok_or_else(|| ImportError::Lookup(format!("inputs of `{name}`")))?,
        );
        let mut channels = 0;
        for &input in inputs {
            let shape = self.shape(input);
            if (shape.batch_size, shape.height, shape.width)
                != (first.batch_size, first.height, first.width)
            {
                return Err(ImportError::Shape {
                    layer: name.to_string(),
                    reason: format!("cannot concatenate {shape} with {first}"),
                });
            }
            channels += shape.channels;
        }
        let out_shape = TensorShape::new(first.batch_size, first.height, first.width, channels);

        let axis = format!("{name}/axis");
        self.add_node(
            &axis,
            "Const",
            vec![],
            vec![
                ("dtype", Value::Type(DT_INT32)),
                (
                    "value",
                    Value::Tensor(TensorProto {
                        dtype: DT_INT32,
                        tensor_shape: Some(shape_proto(&[])),
                        float_val: vec![],
                        int_val: vec![3],
                    }),
                ),
            ],
            None,
        );
        let mut node_inputs: Vec<String> =
            inputs.iter().map(|&h| self.tensors[h.0].node.clone()).collect();
        node_inputs.push(axis);
        self.add_node(
            name,
            "ConcatV2",
            node_inputs,
            vec![
                ("T", Value::Type(DT_FLOAT)),
                ("N", Value::I(inputs.len() as i64)),
            ],
            Some(out_shape),
        );
        Ok(self.register(name, out_shape))
    }

    pub fn dropout(
        &mut self,
        name: &str,
        input: TensorHandle,
        config: DropoutConfig,
    ) -> Result<TensorHandle> {
        let shape = self.shape(input);
        let parent = self.tensors[input.0].node.clone();
        self.add_node(
            name,
            "Dropout",
            vec![parent],
            vec![
                ("T", Value::Type(DT_FLOAT)),
                ("keep_prob", Value::F(config.keep_prob)),
            ],
            Some(shape),
        );
        Ok(self.register(name, shape))
    }

    pub fn batch_norm(
        &mut self,
        name: &str,
        input: TensorHandle,
        config: BatchNormConfig,
    ) -> Result<TensorHandle> {
        let shape = self.shape(input);
        let mean = self.add_variable(name, "mean", vec![shape.channels]);
        let variance = self.add_variable(name, "variance", vec![shape.channels]);
        let parent = self.tensors[input.0].node.clone();
        self.add_node(
            name,
            "BatchNormWithGlobalNormalization",
            vec![parent, mean, variance],
            vec![
                ("T", Value::Type(DT_FLOAT)),
                ("variance_epsilon", Value::F(config.epsilon)),
            ],
            Some(shape),
        );
        Ok(self.register(name, shape))
    }

    pub fn eltwise(
        &mut self,
        name: &str,
        op: EltwiseOp,
        inputs: &[TensorHandle],
    ) -> Result<TensorHandle> {
        if inputs.len() < 2 {
            return Err(ImportError::Shape {
                layer: name.to_string(),
                reason: format!("elementwise needs at least two inputs, got {}", inputs.len()),
            });
        }
        let shape = self.shape(inputs[0]);
        for &input in &inputs[1..] {
            if self.shape(input) != shape {
                return Err(ImportError::Shape {
                    layer: name.to_string(),
                    reason: format!("elementwise inputs disagree: {} vs {shape}", self.shape(input)),
                });
            }
        }
        let op_name = match op {
            EltwiseOp::Sum => "Add",
            EltwiseOp::Prod => "Mul",
            EltwiseOp::Max => "Maximum",
        };
        let mut acc = self.tensors[inputs[0].0].node.clone();
        for (index, &input) in inputs[1..].iter().enumerate() {
            let last = index == inputs.len() - 2;
            let node_name = if last { name.to_string() } else { format!("{name}/{op_name}{index}") };
            let rhs = self.tensors[input.0].node.clone();
            self.add_node(
                &node_name,
                op_name,
                vec![acc, rhs],
                vec![("T", Value::Type(DT_FLOAT))],
                Some(shape),
            );
            acc = node_name;
        }
        Ok(self.register(name, shape))
    }

    pub fn flatten(&mut self, name: &str, input: TensorHandle) -> Result<TensorHandle> {
        let in_shape = self.shape(input);
        let flat = in_shape.height * in_shape.width * in_shape.channels;
        let parent = self.tensors[input.0].node.clone();
        self.reshape_node(name, name, parent, flat);
        Ok(self.register(name, TensorShape::new(in_shape.batch_size, 1, 1, flat)))
    }

    /// Assign each stored tensor to its operator's parameter slot, by layer
    /// name, inside the given session. Missing layers are fatal; extra
    /// entries in the archive are ignored.
    pub fn load(&self, path: &Path, session: &mut Session) -> Result<()> {
        log::info!("Loading weights from {}", path.display());
        let file = File::open(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut npz = NpzReader::new(file)?;
        let names = npz.names()?;
        let index: HashMap<String, String> = names
            .iter()
            .map(|n| (n.strip_suffix(".npy").unwrap_or(n).to_string(), n.clone()))
            .collect();

        for slot in &self.slots {
            let key = format!("{}/{}", slot.layer, slot.slot);
            let archive_name = index
                .get(&key)
                .ok_or_else(|| ImportError::WeightLoad(slot.layer.clone()))?;
            let value: ArrayD<f32> = npz.by_name(archive_name)?;
            if value.shape() != slot.shape.as_slice() {
                return Err(ImportError::WeightShapeMismatch {
                    layer: slot.layer.clone(),
                    slot: slot.slot.to_string(),
                    expected: slot.shape.clone(),
                    actual: value.shape().to_vec(),
                });
            }
            session.assign(&key, value)?;
        }
        log::info!("Loaded {} weight tensors", self.slots.len());
        Ok(())
    }

    fn unary(&mut self, name: &str, op: &str, input: TensorHandle) -> Result<TensorHandle> {
        let shape = self.shape(input);
        let parent = self.tensors[input.0].node.clone();
        self.add_node(name, op, vec![parent], vec![("T", Value::Type(DT_FLOAT))], Some(shape));
        Ok(self.register(name, shape))
    }

    fn reshape_to(&mut self, layer: &str, input_node: String, width: usize) -> String {
        let node = format!("{layer}/Reshape");
        self.reshape_node(layer, &node, input_node, width);
        node
    }

    fn reshape_node(&mut self, layer: &str, node: &str, input_node: String, width: usize) {
        let shape_name = format!("{layer}/shape");
        self.add_node(
            &shape_name,
            "Const",
            vec![],
            vec![
                ("dtype", Value::Type(DT_INT32)),
                (
                    "value",
                    Value::Tensor(TensorProto {
                        dtype: DT_INT32,
                        tensor_shape: Some(shape_proto(&[2])),
                        float_val: vec![],
                        int_val: vec![-1, width as i32],
                    }),
                ),
            ],
            None,
        );
        self.add_node(
            node,
            "Reshape",
            vec![input_node, shape_name],
            vec![("T", Value::Type(DT_FLOAT))],
            None,
        );
    }

    fn add_variable(&mut self, layer: &str, slot: &'static str, dims: Vec<usize>) -> String {
        let node = format!("{layer}/{slot}");
        self.add_node(
            &node,
            "VariableV2",
            vec![],
            vec![
                ("dtype", Value::Type(DT_FLOAT)),
                ("shape", Value::Shape(shape_proto(&dims))),
            ],
            None,
        );
        self.slots.push(WeightSlot { layer: layer.to_string(), slot, shape: dims });
        node
    }

    fn add_op(
        &mut self,
        name: &str,
        op: &str,
        inputs: Vec<String>,
        attrs: Vec<(&str, Value)>,
        shape: TensorShape,
    ) -> TensorHandle {
        self.add_node(name, op, inputs, attrs, Some(shape));
        self.register(name, shape)
    }

    fn add_node(
        &mut self,
        name: &str,
        op: &str,
        inputs: Vec<String>,
        attrs: Vec<(&str, Value)>,
        out_shape: Option<TensorShape>,
    ) {
        let mut attr: std::collections::BTreeMap<String, AttrValue> =
            attrs.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect();
        if let Some(shape) = out_shape {
            attr.insert(
                "_output_shapes".to_string(),
                Value::List(ListValue { i: vec![], shape: vec![shape_proto(&shape.to_nhwc())] })
                    .into(),
            );
        }
        self.graph.node.push(NodeDef {
            name: name.to_string(),
            op: op.to_string(),
            input: inputs,
            device: String::new(),
            attr,
        });
    }

    fn register(&mut self, node: &str, shape: TensorShape) -> TensorHandle {
        self.tensors.push(Registered { node: node.to_string(), shape });
        TensorHandle(self.tensors.len() - 1)
    }
}

fn spatial_list(pair: [usize; 2]) -> Value {
    Value::List(ListValue {
        i: vec![1, pair[0] as i64, pair[1] as i64, 1],
        shape: vec![],
    })
}

fn padding_attr(padding: [usize; 2]) -> Value {
    let mode: &[u8] = if padding == [0, 0] { b"VALID" } else { b"SAME" };
    Value::S(mode.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::NpzWriter;

    fn small_net() -> Network {
        let mut net = Network::new("Probe");
        let inputs = TensorMap::from([(
            "data".to_string(),
            Placeholder::new(TensorShape::new(1, 8, 8, 3)),
        )]);
        let data = net.input("data", [1, 8, 8, 3], &inputs).unwrap();
        let conv = net
            .conv2d("conv1", data, Conv2dConfig::new([3, 8], [3, 3]))
            .unwrap();
        let relu = net.relu("relu1", conv).unwrap();
        net.mark_output(relu);
        net
    }

    #[test]
    fn records_ops_variables_and_shapes() {
        let net = small_net();
        let graph = net.graph_def();
        let ops: Vec<_> = graph.node.iter().map(|n| n.op.as_str()).collect();
        assert_eq!(
            ops,
            vec!["Placeholder", "VariableV2", "Conv2D", "VariableV2", "BiasAdd", "Relu"]
        );
        let conv = graph.get_node("conv1/Conv2D").unwrap();
        assert_eq!(conv.input, vec!["data", "conv1/weights"]);
        assert_eq!(net.output_names(), vec!["relu1"]);

        let slots: Vec<_> = net.weight_slots().collect();
        assert_eq!(
            slots,
            vec![
                ("conv1", "weights", &[3usize, 3, 3, 8][..]),
                ("conv1", "biases", &[8usize][..]),
            ]
        );
    }

    #[test]
    fn missing_input_placeholder_is_an_error() {
        let mut net = Network::new("Probe");
        let inputs = TensorMap::new();
        assert!(matches!(
            net.input("data", [1, 8, 8, 3], &inputs),
            Err(ImportError::Lookup(_))
        ));
    }

    #[test]
    fn channel_mismatch_is_a_shape_error() {
        let mut net = Network::new("Probe");
        let inputs = TensorMap::from([(
            "data".to_string(),
            Placeholder::new(TensorShape::new(1, 8, 8, 3)),
        )]);
        let data = net.input("data", [1, 8, 8, 3], &inputs).unwrap();
        assert!(matches!(
            net.conv2d("conv1", data, Conv2dConfig::new([4, 8], [3, 3])),
            Err(ImportError::Shape { .. })
        ));
    }

    #[test]
    fn load_assigns_slots_and_rejects_missing_layers() {
        let dir = tempfile::tempdir().unwrap();
        let net = small_net();

        // Archive without the convolution weights: loading must fail.
        let empty = dir.path().join("empty.npz");
        let mut npz = NpzWriter::new_compressed(File::create(&empty).unwrap());
        npz.add_array("other/weights", &ArrayD::<f32>::zeros(vec![1])).unwrap();
        npz.finish().unwrap();
        let mut session = Session::new();
        assert!(matches!(
            net.load(&empty, &mut session),
            Err(ImportError::WeightLoad(layer)) if layer == "conv1"
        ));

        // Complete archive with an extra, ignored entry.
        let full = dir.path().join("full.npz");
        let mut npz = NpzWriter::new_compressed(File::create(&full).unwrap());
        npz.add_array("conv1/weights", &ArrayD::<f32>::zeros(vec![3, 3, 3, 8])).unwrap();
        npz.add_array("conv1/biases", &ArrayD::<f32>::zeros(vec![8])).unwrap();
        npz.add_array("unused/extra", &ArrayD::<f32>::zeros(vec![2])).unwrap();
        npz.finish().unwrap();
        let mut session = Session::new();
        net.load(&full, &mut session).unwrap();
        assert!(session.get("conv1/weights").is_some());
        assert!(session.get("unused/extra").is_none());
        session.close();
    }

    #[test]
    fn load_rejects_wrong_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let net = small_net();
        let path = dir.path().join("bad.npz");
        let mut npz = NpzWriter::new_compressed(File::create(&path).unwrap());
        npz.add_array("conv1/weights", &ArrayD::<f32>::zeros(vec![8, 3, 3, 3])).unwrap();
        npz.add_array("conv1/biases", &ArrayD::<f32>::zeros(vec![8])).unwrap();
        npz.finish().unwrap();
        let mut session = Session::new();
        assert!(matches!(
            net.load(&path, &mut session),
            Err(ImportError::WeightShapeMismatch { slot, .. }) if slot == "weights"
        ));
    }
}
