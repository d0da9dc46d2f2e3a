//! Builds the layer IR from a parsed network definition: resolves blob
//! wiring (`bottom`/`top`, including in-place layers), filters layers by
//! phase, elides inference-time dropout and runs shape inference.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use crate::caffe::ir::{AttributeValue, Attributes, CaffeGraph, LayerKind, Node, Phase};
use crate::caffe::prototxt::{self, Document, Value};
use crate::caffe::shape_inference::shape_inference;
use crate::error::{ImportError, Result};

/// Parse a `.prototxt` file into a [`CaffeGraph`] for the given phase.
pub fn parse_prototxt_file(path: &Path, phase: Phase) -> Result<CaffeGraph> {
    log::info!("Parsing network definition: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_prototxt(&text, phase)
}

/// Parse a network definition from text.
pub fn parse_prototxt(text: &str, phase: Phase) -> Result<CaffeGraph> {
    let doc = prototxt::parse_document(text)?;
    let graph = GraphBuilder::new(phase).build(&doc)?;

    log::debug!("Number of nodes: {}", graph.nodes.len());
    Ok(graph)
}

struct GraphBuilder {
    phase: Phase,
    /// Maps a blob name to the node currently producing it. In-place layers
    /// (top == bottom) take the blob over from their parent, which is how
    /// chained `conv -> relu` definitions resolve without explicit renames.
    producer: HashMap<String, String>,
    seen_names: HashSet<String>,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            producer: HashMap::new(),
            seen_names: HashSet::new(),
            nodes: Vec::new(),
        }
    }

    fn build(mut self, doc: &Document) -> Result<CaffeGraph> {
        let name = doc.get_str("name").unwrap_or("Net").to_string();

        for layer in doc.get_all("layer") {
            let layer = layer
                .as_message()
                .ok_or_else(|| ImportError::Parse("`layer` is not a message".into()))?;
            if self.included_in_phase(layer)? {
                self.add_layer(layer)?;
            }
        }

        if self.nodes.is_empty() {
            return Err(ImportError::Parse("definition contains no layers".into()));
        }
        if self.nodes[0].kind != LayerKind::Input {
            return Err(ImportError::Parse(format!(
                "first layer must be an Input layer, found `{}`",
                self.nodes[0].name
            )));
        }

        let mut graph = CaffeGraph { name, phase: self.phase, nodes: self.nodes };
        shape_inference(&mut graph)?;
        Ok(graph)
    }

    fn add_layer(&mut self, layer: &Document) -> Result<()> {
        let name = layer
            .get_str("name")
            .ok_or_else(|| ImportError::Parse("layer without a name".into()))?
            .to_string();
        if !self.seen_names.insert(name.clone()) {
            return Err(ImportError::Parse(format!("duplicate layer name `{name}`")));
        }

        let type_name = layer
            .get_str("type")
            .ok_or_else(|| ImportError::Parse(format!("layer `{name}` without a type")))?;
        let kind = LayerKind::from_str(type_name)
            .map_err(|_| ImportError::Parse(format!("unknown layer type `{type_name}`")))?;

        let bottoms: Vec<&str> = layer.get_all("bottom").filter_map(Value::as_str).collect();
        let tops: Vec<&str> = layer.get_all("top").filter_map(Value::as_str).collect();

        let parents = bottoms
            .iter()
            .map(|blob| {
                self.producer.get(*blob).cloned().ok_or_else(|| {
                    ImportError::Parse(format!(
                        "layer `{name}` consumes blob `{blob}` that no layer produces"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // At inference time dropout is the identity; elide the node and let
        // its consumers see its parent instead.
        if kind == LayerKind::Dropout && self.phase == Phase::Test {
            let parent = parents.first().cloned().ok_or_else(|| {
                ImportError::Parse(format!("dropout layer `{name}` has no bottom"))
            })?;
            for top in tops {
                self.producer.insert(top.to_string(), parent.clone());
            }
            return Ok(());
        }

        let mut params = Attributes::new();
        flatten_params(layer, "", &mut params);
        self.nodes.push(Node::new(name.clone(), kind, parents, params));
        for top in tops {
            self.producer.insert(top.to_string(), name.clone());
        }
        Ok(())
    }

    /// Applies `include`/`exclude` phase rules the way the source framework
    /// does: any matching exclude drops the layer; if include rules exist,
    /// at least one must match.
    fn included_in_phase(&self, layer: &Document) -> Result<bool> {
        let rule_phase = |rule: &Document| -> Result<Option<Phase>> {
            match rule.get("phase") {
                None => Ok(None),
                Some(value) => {
                    let text = value.as_enum().ok_or_else(|| {
                        ImportError::Parse("phase rule is not an identifier".into())
                    })?;
                    match text {
                        "TEST" => Ok(Some(Phase::Test)),
                        "TRAIN" => Ok(Some(Phase::Train)),
                        other => Err(ImportError::Parse(format!("unknown phase `{other}`"))),
                    }
                }
            }
        };

        for rule in layer.get_all("exclude").filter_map(Value::as_message) {
            if rule_phase(rule)? == Some(self.phase) {
                return Ok(false);
            }
        }

        let mut includes = layer.get_all("include").filter_map(Value::as_message).peekable();
        if includes.peek().is_none() {
            return Ok(true);
        }
        for rule in includes {
            match rule_phase(rule)? {
                Some(phase) if phase == self.phase => return Ok(true),
                Some(_) => {}
                None => return Ok(true),
            }
        }
        Ok(false)
    }
}

/// Flattens nested parameter messages to dotted keys, merging repeated
/// integer fields into lists (`shape.dim: 1 shape.dim: 3` -> `Ints`).
fn flatten_params(doc: &Document, prefix: &str, out: &mut Attributes) {
    const WIRING_FIELDS: [&str; 6] = ["name", "type", "bottom", "top", "include", "exclude"];

    for field in &doc.fields {
        if prefix.is_empty() && WIRING_FIELDS.contains(&field.name.as_str()) {
            continue;
        }
        let key = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        match &field.value {
            Value::Message(inner) => flatten_params(inner, &key, out),
            Value::Int(v) => merge_int(out, key, *v),
            Value::Float(v) => {
                out.insert(key, AttributeValue::Float(*v));
            }
            Value::Bool(v) => {
                out.insert(key, AttributeValue::Bool(*v));
            }
            Value::String(v) | Value::Enum(v) => {
                out.insert(key, AttributeValue::String(v.clone()));
            }
        }
    }
}

fn merge_int(out: &mut Attributes, key: String, value: i64) {
    match out.remove(&key) {
        None => {
            out.insert(key, AttributeValue::Int(value));
        }
        Some(AttributeValue::Int(prev)) => {
            out.insert(key, AttributeValue::Ints(vec![prev, value]));
        }
        Some(AttributeValue::Ints(mut list)) => {
            list.push(value);
            out.insert(key, AttributeValue::Ints(list));
        }
        Some(_) => {
            out.insert(key, AttributeValue::Int(value));
        }
    }
}
