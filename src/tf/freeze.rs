//! Injected freeze/optimize capabilities. The exporter's state machine only
//! knows the [`Freezer`] trait; the two shipped implementations mirror the
//! target framework's `freeze_graph` and `optimize_for_inference` tools and
//! can be swapped out for testing or for the real backend.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use ndarray::ArrayD;
use strum_macros::{Display, EnumString};

use crate::error::{ImportError, Result};
use crate::tf::proto::{attr_value::Value, GraphDef, NodeDef, TensorProto, DT_FLOAT, shape_proto};
use crate::tf::session::Session;

/// Which freeze capability the caller selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FreezeMode {
    #[default]
    None,
    FreezeGraph,
    OptimizeForInference,
}

/// Everything a freeze capability may consult.
pub struct FreezeContext<'a> {
    pub graph_def: &'a GraphDef,
    pub session: &'a Session,
    pub checkpoint_path: &'a Path,
    pub output_node: &'a str,
    pub standalone_path: &'a Path,
}

pub trait Freezer {
    fn name(&self) -> &'static str;

    fn freeze(&self, ctx: &FreezeContext<'_>) -> Result<()>;
}

/// The shipped capability for a mode, if the mode calls for one.
pub fn freezer_for(mode: FreezeMode) -> Option<Box<dyn Freezer>> {
    match mode {
        FreezeMode::None => None,
        FreezeMode::FreezeGraph => Some(Box::new(FreezeGraph)),
        FreezeMode::OptimizeForInference => Some(Box::new(OptimizeForInference)),
    }
}

/// Folds checkpoint variables into the serialized graph and overwrites the
/// standalone artifact with the frozen result.
pub struct FreezeGraph;

impl Freezer for FreezeGraph {
    fn name(&self) -> &'static str {
        "freeze_graph"
    }

    fn freeze(&self, ctx: &FreezeContext<'_>) -> Result<()> {
        let variables = Session::restore_checkpoint(ctx.checkpoint_path)?;
        let frozen = convert_variables_to_constants(ctx.graph_def, &variables, self.name())?;
        require_node(&frozen, ctx.output_node, self.name())?;
        frozen.save_to(ctx.standalone_path)?;
        log::info!("Frozen graph written: {}", ctx.standalone_path.display());
        Ok(())
    }
}

/// Folds the live session's variables into constants, prunes everything the
/// output node does not depend on, and writes binary and text serializations
/// beside the standalone artifact.
pub struct OptimizeForInference;

impl Freezer for OptimizeForInference {
    fn name(&self) -> &'static str {
        "optimize_for_inference"
    }

    fn freeze(&self, ctx: &FreezeContext<'_>) -> Result<()> {
        let frozen =
            convert_variables_to_constants(ctx.graph_def, ctx.session.variables(), self.name())?;
        let optimized = prune_unreachable(frozen, ctx.output_node, self.name())?;

        let binary = ctx.standalone_path.with_extension("pb");
        let text = ctx.standalone_path.with_extension("pbtxt");
        optimized.save_to(&binary)?;
        std::fs::write(&text, optimized.to_text())?;
        log::info!(
            "Optimized graph written: {} and {}",
            binary.display(),
            text.display()
        );
        Ok(())
    }
}

/// Replace every variable node by a constant carrying its value.
fn convert_variables_to_constants(
    graph: &GraphDef,
    variables: &BTreeMap<String, ArrayD<f32>>,
    op: &str,
) -> Result<GraphDef> {
    let mut out = graph.clone();
    for node in &mut out.node {
        if node.op != "VariableV2" {
            continue;
        }
        let value = variables.get(&node.name).ok_or_else(|| ImportError::Freeze {
            op: op.to_string(),
            reason: format!("no stored value for variable `{}`", node.name),
        })?;
        *node = NodeDef {
            name: node.name.clone(),
            op: "Const".to_string(),
            input: vec![],
            device: String::new(),
            attr: BTreeMap::from([
                ("dtype".to_string(), Value::Type(DT_FLOAT).into()),
                (
                    "value".to_string(),
                    Value::Tensor(TensorProto {
                        dtype: DT_FLOAT,
                        tensor_shape: Some(shape_proto(value.shape())),
                        float_val: value.iter().copied().collect(),
                        int_val: vec![],
                    })
                    .into(),
                ),
            ]),
        };
    }
    Ok(out)
}

/// Drop nodes the output does not transitively depend on.
fn prune_unreachable(graph: GraphDef, output: &str, op: &str) -> Result<GraphDef> {
    require_node(&graph, output, op)?;
    let mut reachable: HashSet<String> = HashSet::new();
    let mut stack = vec![output.to_string()];
    while let Some(name) = stack.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        if let Some(node) = graph.get_node(&name) {
            for input in &node.input {
                let input = input.trim_start_matches('^');
                let input = input.split(':').next().unwrap_or(input);
                stack.push(input.to_string());
            }
        }
    }
    let node = graph
        .node
        .into_iter()
        .filter(|n| reachable.contains(&n.name))
        .collect();
    Ok(GraphDef { node, version: graph.version })
}

fn require_node(graph: &GraphDef, name: &str, op: &str) -> Result<()> {
    if graph.get_node(name).is_none() {
        return Err(ImportError::Freeze {
            op: op.to_string(),
            reason: format!("output node `{name}` is not in the graph"),
        });
    }
    Ok(())
}
