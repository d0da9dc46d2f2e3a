use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::error::{ImportError, Result};

/// Output shape of a layer, in the source framework's bookkeeping order.
///
/// Spatial extents are tracked explicitly rather than as a bare `Vec` because
/// every shape rule in the converter needs to name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorShape {
    pub batch_size: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    pub fn new(batch_size: usize, height: usize, width: usize, channels: usize) -> Self {
        Self { batch_size, height, width, channels }
    }

    /// The shape as the target framework lays it out: `[N, H, W, C]`.
    pub fn to_nhwc(self) -> [usize; 4] {
        [self.batch_size, self.height, self.width, self.channels]
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.batch_size, self.height, self.width, self.channels
        )
    }
}

/// Conversion phase. Affects which layers survive graph construction:
/// layers carrying `include`/`exclude` rules are filtered against it, and
/// dropout is elided entirely at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Train,
    #[default]
    Test,
}

/// The list of recognized layer types.
///
/// Parsing accepts every variant; the layer mapper only maps a subset and
/// reports the rest as unsupported. Keeping the two sets distinct means an
/// unknown string is a `ParseError` while a known-but-unmapped kind is an
/// `UnsupportedLayerError` naming the offending type.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, EnumString, Display)]
pub enum LayerKind {
    Input,
    Convolution,
    Pooling,
    InnerProduct,
    ReLU,
    Sigmoid,
    TanH,
    Softmax,
    LRN,
    Concat,
    Dropout,
    BatchNorm,
    Eltwise,
    Flatten,
    // Parsed but not mapped.
    Deconvolution,
    Scale,
    Power,
    Data,
    Accuracy,
    SoftmaxWithLoss,
}

/// A single layer parameter value, lifted out of the prototxt field tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    Bool(bool),
    String(String),
}

impl AttributeValue {
    /// The callers below only run on attributes the parser produced itself,
    /// so a kind mismatch is a bug in the converter, not user input.
    pub fn into_i64(self) -> i64 {
        match self {
            AttributeValue::Int(v) => v,
            other => panic!("attribute is not an int: {other:?}"),
        }
    }

    pub fn into_i64s(self) -> Vec<i64> {
        match self {
            AttributeValue::Int(v) => vec![v],
            AttributeValue::Ints(v) => v,
            other => panic!("attribute is not an int list: {other:?}"),
        }
    }

    pub fn into_f32(self) -> f32 {
        match self {
            AttributeValue::Float(v) => v,
            AttributeValue::Int(v) => v as f32,
            other => panic!("attribute is not a float: {other:?}"),
        }
    }

    pub fn into_bool(self) -> bool {
        match self {
            AttributeValue::Bool(v) => v,
            other => panic!("attribute is not a bool: {other:?}"),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            AttributeValue::String(v) => v,
            other => panic!("attribute is not a string: {other:?}"),
        }
    }
}

pub type Attributes = HashMap<String, AttributeValue>;

/// One node of the layer graph.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    pub kind: LayerKind,
    /// Names of parent nodes, resolved from blob (`bottom`) references.
    pub parents: Vec<String>,
    /// Layer parameters, flattened to dotted keys
    /// (e.g. `convolution_param.num_output`).
    pub params: Attributes,
    /// `None` until shape inference succeeds, then immutable.
    pub output_shape: Option<TensorShape>,
}

impl Node {
    pub fn new(name: String, kind: LayerKind, parents: Vec<String>, params: Attributes) -> Self {
        Self { name, kind, parents, params, output_shape: None }
    }

    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.params.get(key)
    }

    /// Inferred output shape. Only call after shape inference has run.
    pub fn shape(&self) -> TensorShape {
        self.output_shape
            .unwrap_or_else(|| panic!("shape of `{}` not inferred yet", self.name))
    }
}

/// The layer graph: nodes in topological (insertion) order.
///
/// The first node is the designated input node, the last the designated
/// output node for downstream export.
#[derive(Debug, Clone, Serialize)]
pub struct CaffeGraph {
    pub name: String,
    pub phase: Phase,
    pub nodes: Vec<Node>,
}

impl CaffeGraph {
    pub fn get_node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| ImportError::Lookup(name.to_string()))
    }

    pub fn input_node(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn output_node(&self) -> &Node {
        self.nodes.last().expect("graph is never empty")
    }
}
