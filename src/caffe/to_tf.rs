//! The layer mapper: converts the source IR into the target builder result,
//! one registered node per layer, and declares the stored-weight shapes each
//! layer must provide. Dispatch is a closed match over [`LayerKind`]; a kind
//! with no arm here is a fatal `UnsupportedLayerError`.

use crate::caffe::ir::{CaffeGraph, LayerKind, Node, TensorShape};
use crate::caffe::op_configuration::{
    batch_norm_config, conv2d_config, dropout_config, eltwise_config, linear_config, lrn_config,
    pool2d_config,
};
use crate::error::{ImportError, Result};
use crate::tf::graph::TfGraph;
use crate::tf::node::batch_norm::BatchNormNode;
use crate::tf::node::concat::ConcatNode;
use crate::tf::node::conv2d::Conv2dNode;
use crate::tf::node::dropout::DropoutNode;
use crate::tf::node::eltwise::EltwiseNode;
use crate::tf::node::flatten::FlattenNode;
use crate::tf::node::input::InputNode;
use crate::tf::node::linear::LinearNode;
use crate::tf::node::lrn::LrnNode;
use crate::tf::node::pool2d::Pool2dNode;
use crate::tf::node::unary::{UnaryKind, UnaryNode};
use crate::tf::Scope;

impl CaffeGraph {
    /// Convert the layer graph into the target builder result.
    pub fn into_tf(&self) -> Result<TfGraph> {
        let mut graph = TfGraph::new(self.name.clone());
        let mut scope = Scope::default();

        for node in &self.nodes {
            match node.kind {
                LayerKind::Input => {
                    let shape = node.shape();
                    graph.register(InputNode::new(
                        node.name.clone(),
                        shape,
                        scope.tensor(&node.name, Some(shape)),
                    ));
                }
                LayerKind::Convolution => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    let config = conv2d_config(node, in_shape.channels)?;
                    graph.register(Conv2dNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        config,
                    ));
                }
                LayerKind::Pooling => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    graph.register(Pool2dNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        pool2d_config(node)?,
                    ));
                }
                LayerKind::InnerProduct => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    let flat = in_shape.height * in_shape.width * in_shape.channels;
                    graph.register(LinearNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        linear_config(node, flat)?,
                    ));
                }
                LayerKind::ReLU => self.unary(&mut graph, &mut scope, node, UnaryKind::Relu)?,
                LayerKind::Sigmoid => {
                    self.unary(&mut graph, &mut scope, node, UnaryKind::Sigmoid)?
                }
                LayerKind::TanH => self.unary(&mut graph, &mut scope, node, UnaryKind::Tanh)?,
                LayerKind::Softmax => {
                    self.unary(&mut graph, &mut scope, node, UnaryKind::Softmax)?
                }
                LayerKind::LRN => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    graph.register(LrnNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        lrn_config(node),
                    ));
                }
                LayerKind::Concat => {
                    let inputs = node
                        .parents
                        .iter()
                        .map(|parent| {
                            let shape = self.get_node(parent)?.shape();
                            Ok(scope.tensor(parent, Some(shape)))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    graph.register(ConcatNode::new(
                        node.name.clone(),
                        inputs,
                        scope.tensor(&node.name, node.output_shape),
                    ));
                }
                LayerKind::Dropout => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    graph.register(DropoutNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        dropout_config(node),
                    ));
                }
                LayerKind::BatchNorm => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    graph.register(BatchNormNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                        batch_norm_config(node),
                    ));
                }
                LayerKind::Eltwise => {
                    let inputs = node
                        .parents
                        .iter()
                        .map(|parent| {
                            let shape = self.get_node(parent)?.shape();
                            Ok(scope.tensor(parent, Some(shape)))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    graph.register(EltwiseNode::new(
                        node.name.clone(),
                        inputs,
                        scope.tensor(&node.name, node.output_shape),
                        eltwise_config(node)?,
                    ));
                }
                LayerKind::Flatten => {
                    let (parent, in_shape) = self.sole_parent(node)?;
                    graph.register(FlattenNode::new(
                        node.name.clone(),
                        scope.tensor(parent, Some(in_shape)),
                        scope.tensor(&node.name, node.output_shape),
                    ));
                }
                unsupported => {
                    return Err(ImportError::UnsupportedLayer(unsupported.to_string()))
                }
            }
        }

        graph.register_input_output(
            vec![self.input_node().name.clone()],
            vec![self.output_node().name.clone()],
        );
        Ok(graph)
    }

    fn unary(
        &self,
        graph: &mut TfGraph,
        scope: &mut Scope,
        node: &Node,
        kind: UnaryKind,
    ) -> Result<()> {
        let (parent, in_shape) = self.sole_parent(node)?;
        graph.register(UnaryNode::new(
            node.name.clone(),
            scope.tensor(parent, Some(in_shape)),
            scope.tensor(&node.name, node.output_shape),
            kind,
        ));
        Ok(())
    }

    fn sole_parent<'a>(&self, node: &'a Node) -> Result<(&'a str, TensorShape)> {
        let parent = node.parents.first().ok_or_else(|| ImportError::Shape {
            layer: node.name.clone(),
            reason: "layer has no input".into(),
        })?;
        Ok((parent.as_str(), self.get_node(parent)?.shape()))
    }
}

/// One expected stored tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: &'static str,
    /// Shape in the source convention.
    pub shape: Vec<usize>,
}

/// The stored tensors a layer must provide, as the mapper declares them.
/// The data transformer reconciles every weight file against this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerWeightSpec {
    pub layer: String,
    pub kind: LayerKind,
    pub slots: Vec<SlotSpec>,
}

/// Expected stored-weight shapes for every weight-bearing layer.
pub fn weight_specs(graph: &CaffeGraph) -> Result<Vec<LayerWeightSpec>> {
    let mut specs = Vec::new();
    for node in &graph.nodes {
        let parent_shape = || -> Result<TensorShape> {
            let parent = node.parents.first().ok_or_else(|| ImportError::Shape {
                layer: node.name.clone(),
                reason: "layer has no input".into(),
            })?;
            Ok(graph.get_node(parent)?.shape())
        };
        let slots = match node.kind {
            LayerKind::Convolution => {
                let in_shape = parent_shape()?;
                let config = conv2d_config(node, in_shape.channels)?;
                let mut slots = vec![SlotSpec {
                    name: "weights",
                    shape: vec![
                        config.channels[1],
                        config.channels[0] / config.groups,
                        config.kernel_size[0],
                        config.kernel_size[1],
                    ],
                }];
                if config.bias {
                    slots.push(SlotSpec { name: "biases", shape: vec![config.channels[1]] });
                }
                slots
            }
            LayerKind::InnerProduct => {
                let in_shape = parent_shape()?;
                let flat = in_shape.height * in_shape.width * in_shape.channels;
                let config = linear_config(node, flat)?;
                let mut slots = vec![SlotSpec {
                    name: "weights",
                    shape: vec![config.d_output, config.d_input],
                }];
                if config.bias {
                    slots.push(SlotSpec { name: "biases", shape: vec![config.d_output] });
                }
                slots
            }
            LayerKind::BatchNorm => {
                let channels = parent_shape()?.channels;
                vec![
                    SlotSpec { name: "mean", shape: vec![channels] },
                    SlotSpec { name: "variance", shape: vec![channels] },
                    SlotSpec { name: "scale_factor", shape: vec![1] },
                ]
            }
            LayerKind::Input
            | LayerKind::Pooling
            | LayerKind::ReLU
            | LayerKind::Sigmoid
            | LayerKind::TanH
            | LayerKind::Softmax
            | LayerKind::LRN
            | LayerKind::Concat
            | LayerKind::Dropout
            | LayerKind::Eltwise
            | LayerKind::Flatten => continue,
            unsupported => return Err(ImportError::UnsupportedLayer(unsupported.to_string())),
        };
        specs.push(LayerWeightSpec { layer: node.name.clone(), kind: node.kind, slots });
    }
    Ok(specs)
}
