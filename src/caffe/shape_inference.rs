//! Infers the output shape of each node, in topological order. Runs once
//! during graph construction; a node's shape is immutable afterwards.

use crate::caffe::ir::{CaffeGraph, LayerKind, Node, TensorShape};
use crate::caffe::op_configuration::{
    concat_axis, conv2d_config, input_shape, linear_config, pool2d_config,
};
use crate::error::{ImportError, Result};

pub fn shape_inference(graph: &mut CaffeGraph) -> Result<()> {
    for index in 0..graph.nodes.len() {
        let shape = infer_node(graph, index)?;
        graph.nodes[index].output_shape = Some(shape);
    }
    Ok(())
}

fn infer_node(graph: &CaffeGraph, index: usize) -> Result<TensorShape> {
    let node = &graph.nodes[index];
    let parents = parent_shapes(graph, node)?;

    match node.kind {
        LayerKind::Input => input_shape(node),
        LayerKind::Convolution => {
            let input = sole_parent(node, &parents)?;
            let config = conv2d_config(node, input.channels)?;
            config.output_shape(input).ok_or_else(|| ImportError::Shape {
                layer: node.name.clone(),
                reason: format!(
                    "kernel {:?} with padding {:?} does not fit input {input}",
                    config.kernel_size, config.padding
                ),
            })
        }
        LayerKind::Pooling => {
            let input = sole_parent(node, &parents)?;
            let config = pool2d_config(node)?;
            config.output_shape(input).ok_or_else(|| ImportError::Shape {
                layer: node.name.clone(),
                reason: format!("kernel {:?} does not fit input {input}", config.kernel_size),
            })
        }
        LayerKind::InnerProduct => {
            let input = sole_parent(node, &parents)?;
            let flat = input.height * input.width * input.channels;
            let config = linear_config(node, flat)?;
            Ok(TensorShape::new(input.batch_size, 1, 1, config.d_output))
        }
        LayerKind::Flatten => {
            let input = sole_parent(node, &parents)?;
            Ok(TensorShape::new(
                input.batch_size,
                1,
                1,
                input.height * input.width * input.channels,
            ))
        }
        LayerKind::Concat => {
            let axis = concat_axis(node);
            if axis != 1 {
                return Err(ImportError::Shape {
                    layer: node.name.clone(),
                    reason: format!("only channel concatenation is supported, got axis {axis}"),
                });
            }
            let first = *parents.first().ok_or_else(|| missing_parent(node))?;
            for shape in &parents[1..] {
                if (shape.batch_size, shape.height, shape.width)
                    != (first.batch_size, first.height, first.width)
                {
                    return Err(ImportError::Shape {
                        layer: node.name.clone(),
                        reason: format!("cannot concatenate {shape} with {first}"),
                    });
                }
            }
            let channels = parents.iter().map(|s| s.channels).sum();
            Ok(TensorShape::new(first.batch_size, first.height, first.width, channels))
        }
        LayerKind::Eltwise => {
            let first = *parents.first().ok_or_else(|| missing_parent(node))?;
            for shape in &parents[1..] {
                if *shape != first {
                    return Err(ImportError::Shape {
                        layer: node.name.clone(),
                        reason: format!("elementwise inputs disagree: {shape} vs {first}"),
                    });
                }
            }
            Ok(first)
        }
        LayerKind::ReLU
        | LayerKind::Sigmoid
        | LayerKind::TanH
        | LayerKind::Softmax
        | LayerKind::LRN
        | LayerKind::Dropout
        | LayerKind::BatchNorm
        | LayerKind::Scale
        | LayerKind::Power => sole_parent(node, &parents),
        // Kinds the mapper will reject anyway; pass the shape through so the
        // graph is still inspectable before the mapping fails.
        LayerKind::Deconvolution
        | LayerKind::Data
        | LayerKind::Accuracy
        | LayerKind::SoftmaxWithLoss => {
            log::warn!(
                "shape of `{}` ({}) passed through from its first input",
                node.name,
                node.kind
            );
            parents.first().copied().ok_or_else(|| missing_parent(node))
        }
    }
}

fn parent_shapes(graph: &CaffeGraph, node: &Node) -> Result<Vec<TensorShape>> {
    node.parents
        .iter()
        .map(|name| Ok(graph.get_node(name)?.shape()))
        .collect()
}

fn sole_parent(node: &Node, parents: &[TensorShape]) -> Result<TensorShape> {
    match parents {
        [shape] => Ok(*shape),
        [] => Err(missing_parent(node)),
        many => Err(ImportError::Shape {
            layer: node.name.clone(),
            reason: format!("expected one input, got {}", many.len()),
        }),
    }
}

fn missing_parent(node: &Node) -> ImportError {
    ImportError::Shape {
        layer: node.name.clone(),
        reason: "node has no input to infer a shape from".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caffe::from_caffe::parse_prototxt;
    use crate::caffe::ir::Phase;

    #[test]
    fn shapes_flow_through_a_conv_stack() {
        let graph = parse_prototxt(
            r#"
            name: "Probe"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 3 dim: 28 dim: 28 } } }
            layer { name: "conv1" type: "Convolution" bottom: "data" top: "conv1"
                    convolution_param { num_output: 8 kernel_size: 5 } }
            layer { name: "pool1" type: "Pooling" bottom: "conv1" top: "pool1"
                    pooling_param { pool: MAX kernel_size: 2 stride: 2 } }
            layer { name: "ip1" type: "InnerProduct" bottom: "pool1" top: "ip1"
                    inner_product_param { num_output: 10 } }
            "#,
            Phase::Test,
        )
        .unwrap();

        let shape = |name: &str| graph.get_node(name).unwrap().shape();
        assert_eq!(shape("data"), TensorShape::new(1, 28, 28, 3));
        assert_eq!(shape("conv1"), TensorShape::new(1, 24, 24, 8));
        assert_eq!(shape("pool1"), TensorShape::new(1, 12, 12, 8));
        assert_eq!(shape("ip1"), TensorShape::new(1, 1, 1, 10));
    }

    #[test]
    fn concat_sums_channels() {
        let graph = parse_prototxt(
            r#"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } } }
            layer { name: "a" type: "Convolution" bottom: "data" top: "a"
                    convolution_param { num_output: 4 kernel_size: 1 } }
            layer { name: "b" type: "Convolution" bottom: "data" top: "b"
                    convolution_param { num_output: 6 kernel_size: 1 } }
            layer { name: "cat" type: "Concat" bottom: "a" bottom: "b" top: "cat" }
            "#,
            Phase::Test,
        )
        .unwrap();
        assert_eq!(
            graph.get_node("cat").unwrap().shape(),
            TensorShape::new(1, 8, 8, 10)
        );
    }

    #[test]
    fn mismatched_concat_inputs_fail() {
        let result = parse_prototxt(
            r#"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } } }
            layer { name: "a" type: "Convolution" bottom: "data" top: "a"
                    convolution_param { num_output: 4 kernel_size: 1 } }
            layer { name: "b" type: "Convolution" bottom: "data" top: "b"
                    convolution_param { num_output: 4 kernel_size: 3 } }
            layer { name: "cat" type: "Concat" bottom: "a" bottom: "b" top: "cat" }
            "#,
            Phase::Test,
        );
        assert!(matches!(result, Err(ImportError::Shape { layer, .. }) if layer == "cat"));
    }

    #[test]
    fn oversized_kernel_fails() {
        let result = parse_prototxt(
            r#"
            layer { name: "data" type: "Input" top: "data"
                    input_param { shape { dim: 1 dim: 1 dim: 4 dim: 4 } } }
            layer { name: "conv" type: "Convolution" bottom: "data" top: "conv"
                    convolution_param { num_output: 2 kernel_size: 7 } }
            "#,
            Phase::Test,
        );
        assert!(matches!(result, Err(ImportError::Shape { layer, .. }) if layer == "conv"));
    }
}
