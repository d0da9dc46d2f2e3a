//! Wire-format subset of the target framework's `GraphDef` protobuf, plus a
//! text-format writer for `.pbtxt` output. Field numbers follow the
//! framework's graph.proto; only what the exporter emits is modeled.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::Result;

/// `DT_FLOAT` in the target framework's `DataType` enum. The converter only
/// ever emits single-precision graphs.
pub const DT_FLOAT: i32 = 1;

/// `DT_INT32`, used for shape and axis constants.
pub const DT_INT32: i32 = 3;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphDef {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeDef>,
    #[prost(int32, tag = "3")]
    pub version: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeDef {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub op: String,
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(string, tag = "4")]
    pub device: String,
    #[prost(btree_map = "string, message", tag = "5")]
    pub attr: BTreeMap<String, AttrValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttrValue {
    #[prost(oneof = "attr_value::Value", tags = "2, 3, 4, 5, 6, 7, 8, 1")]
    pub value: Option<attr_value::Value>,
}

pub mod attr_value {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListValue {
        #[prost(int64, repeated, tag = "3")]
        pub i: Vec<i64>,
        #[prost(message, repeated, tag = "7")]
        pub shape: Vec<super::TensorShapeProto>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bytes, tag = "2")]
        S(Vec<u8>),
        #[prost(int64, tag = "3")]
        I(i64),
        #[prost(float, tag = "4")]
        F(f32),
        #[prost(bool, tag = "5")]
        B(bool),
        #[prost(int32, tag = "6")]
        Type(i32),
        #[prost(message, tag = "7")]
        Shape(super::TensorShapeProto),
        #[prost(message, tag = "8")]
        Tensor(super::TensorProto),
        #[prost(message, tag = "1")]
        List(ListValue),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: Vec<tensor_shape_proto::Dim>,
}

pub mod tensor_shape_proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Dim {
        #[prost(int64, tag = "1")]
        pub size: i64,
        #[prost(string, tag = "2")]
        pub name: String,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    #[prost(int32, tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub tensor_shape: Option<TensorShapeProto>,
    #[prost(float, repeated, tag = "5")]
    pub float_val: Vec<f32>,
    #[prost(int32, repeated, tag = "7")]
    pub int_val: Vec<i32>,
}

pub fn shape_proto(dims: &[usize]) -> TensorShapeProto {
    TensorShapeProto {
        dim: dims
            .iter()
            .map(|&size| tensor_shape_proto::Dim { size: size as i64, name: String::new() })
            .collect(),
    }
}

impl From<attr_value::Value> for AttrValue {
    fn from(value: attr_value::Value) -> Self {
        AttrValue { value: Some(value) }
    }
}

impl GraphDef {
    pub fn get_node(&self, name: &str) -> Option<&NodeDef> {
        self.node.iter().find(|n| n.name == name)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>> {
        use prost::Message;
        Ok(self.encode_to_vec())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.write_to_bytes()?)?;
        Ok(())
    }

    /// Renders the graph in the framework's text format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for node in &self.node {
            out.push_str("node {\n");
            let _ = writeln!(out, "  name: {:?}", node.name);
            let _ = writeln!(out, "  op: {:?}", node.op);
            for input in &node.input {
                let _ = writeln!(out, "  input: {input:?}");
            }
            for (key, value) in &node.attr {
                out.push_str("  attr {\n");
                let _ = writeln!(out, "    key: {key:?}");
                out.push_str("    value {\n");
                write_attr_value(&mut out, value, 6);
                out.push_str("    }\n");
                out.push_str("  }\n");
            }
            out.push_str("}\n");
        }
        let _ = writeln!(out, "version: {}", self.version);
        out
    }
}

fn write_attr_value(out: &mut String, value: &AttrValue, indent: usize) {
    use attr_value::Value;
    let pad = " ".repeat(indent);
    match &value.value {
        None => {}
        Some(Value::S(bytes)) => {
            let _ = writeln!(out, "{pad}s: {:?}", String::from_utf8_lossy(bytes));
        }
        Some(Value::I(v)) => {
            let _ = writeln!(out, "{pad}i: {v}");
        }
        Some(Value::F(v)) => {
            let _ = writeln!(out, "{pad}f: {v}");
        }
        Some(Value::B(v)) => {
            let _ = writeln!(out, "{pad}b: {v}");
        }
        Some(Value::Type(v)) => {
            let name = match *v {
                DT_FLOAT => "DT_FLOAT".to_string(),
                DT_INT32 => "DT_INT32".to_string(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "{pad}type: {name}");
        }
        Some(Value::Shape(shape)) => write_shape(out, shape, indent),
        Some(Value::Tensor(tensor)) => {
            let _ = writeln!(out, "{pad}tensor {{");
            let _ = writeln!(out, "{pad}  dtype: DT_FLOAT");
            if let Some(shape) = &tensor.tensor_shape {
                write_shape(out, shape, indent + 2);
            }
            // Tensor payloads are elided in text output to keep .pbtxt
            // artifacts reviewable; the binary sibling carries the data.
            let _ = writeln!(out, "{pad}  # {} values elided", tensor.float_val.len());
            let _ = writeln!(out, "{pad}}}");
        }
        Some(Value::List(list)) => {
            let _ = writeln!(out, "{pad}list {{");
            for v in &list.i {
                let _ = writeln!(out, "{pad}  i: {v}");
            }
            for shape in &list.shape {
                write_shape(out, shape, indent + 2);
            }
            let _ = writeln!(out, "{pad}}}");
        }
    }
}

fn write_shape(out: &mut String, shape: &TensorShapeProto, indent: usize) {
    let pad = " ".repeat(indent);
    let _ = writeln!(out, "{pad}shape {{");
    for dim in &shape.dim {
        let _ = writeln!(out, "{pad}  dim {{ size: {} }}", dim.size);
    }
    let _ = writeln!(out, "{pad}}}");
}
