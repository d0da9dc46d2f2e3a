//! Per-layer-kind configuration extraction. Each supported kind has a config
//! struct holding the target operator's constructor arguments, an extraction
//! function reading the node's flattened parameters, and (for spatial
//! operators) the output-shape rule shared by shape inference and the
//! network builder.

use crate::caffe::ir::{AttributeValue, Node, TensorShape};
use crate::error::{ImportError, Result};

/// Configuration for 2D convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dConfig {
    /// `[in, out]` channel counts.
    pub channels: [usize; 2],
    /// Kernel size `[height, width]`.
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    /// Zero padding `[height, width]`, applied symmetrically.
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub groups: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    pub fn new(channels: [usize; 2], kernel_size: [usize; 2]) -> Self {
        Self {
            channels,
            kernel_size,
            stride: [1, 1],
            padding: [0, 0],
            dilation: [1, 1],
            groups: 1,
            bias: true,
        }
    }

    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: [usize; 2]) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: [usize; 2]) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Convolution output extents round down.
    pub fn output_shape(&self, input: TensorShape) -> Option<TensorShape> {
        let extent = |size: usize, axis: usize| -> Option<usize> {
            let window = (self.kernel_size[axis] - 1) * self.dilation[axis] + 1;
            let padded = size + 2 * self.padding[axis];
            if padded < window {
                return None;
            }
            Some((padded - window) / self.stride[axis] + 1)
        };
        Some(TensorShape::new(
            input.batch_size,
            extent(input.height, 0)?,
            extent(input.width, 1)?,
            self.channels[1],
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Average,
}

/// Configuration for 2D pooling.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool2dConfig {
    pub kind: PoolKind,
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    /// Pool over the whole spatial extent, whatever it is.
    pub global: bool,
}

impl Pool2dConfig {
    pub fn new(kind: PoolKind, kernel_size: [usize; 2]) -> Self {
        Self { kind, kernel_size, stride: [1, 1], padding: [0, 0], global: false }
    }

    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: [usize; 2]) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Pooling output extents round up, unlike convolution.
    pub fn output_shape(&self, input: TensorShape) -> Option<TensorShape> {
        if self.global {
            return Some(TensorShape::new(input.batch_size, 1, 1, input.channels));
        }
        let extent = |size: usize, axis: usize| -> Option<usize> {
            let padded = size + 2 * self.padding[axis];
            if padded < self.kernel_size[axis] {
                return None;
            }
            Some((padded - self.kernel_size[axis]).div_ceil(self.stride[axis]) + 1)
        };
        Some(TensorShape::new(
            input.batch_size,
            extent(input.height, 0)?,
            extent(input.width, 1)?,
            input.channels,
        ))
    }
}

/// Configuration for fully connected layers.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConfig {
    pub d_input: usize,
    pub d_output: usize,
    pub bias: bool,
}

impl LinearConfig {
    pub fn new(d_input: usize, d_output: usize) -> Self {
        Self { d_input, d_output, bias: true }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Local response normalization across channels.
#[derive(Debug, Clone, PartialEq)]
pub struct LrnConfig {
    pub local_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropoutConfig {
    pub keep_prob: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EltwiseOp {
    Sum,
    Prod,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormConfig {
    pub epsilon: f32,
}

fn get_usize(node: &Node, key: &str) -> Option<usize> {
    node.attr(key).map(|v| v.clone().into_i64() as usize)
}

fn get_f32(node: &Node, key: &str, default: f32) -> f32 {
    node.attr(key).map(|v| v.clone().into_f32()).unwrap_or(default)
}

/// Reads a possibly `_h`/`_w`-split spatial pair, e.g. `kernel_size` or
/// `kernel_h`/`kernel_w`.
fn spatial_pair(node: &Node, param: &str, field: &str, default: usize) -> [usize; 2] {
    let h = get_usize(node, &format!("{param}.{field}_h"));
    let w = get_usize(node, &format!("{param}.{field}_w"));
    if let (Some(h), Some(w)) = (h, w) {
        return [h, w];
    }
    match get_usize(node, &format!("{param}.{field}")) {
        Some(v) => [v, v],
        None => [default, default],
    }
}

/// Create a [`Conv2dConfig`] from a convolution node. The input channel
/// count comes from the parent's inferred shape.
pub fn conv2d_config(node: &Node, channels_in: usize) -> Result<Conv2dConfig> {
    let num_output = get_usize(node, "convolution_param.num_output").ok_or_else(|| {
        ImportError::Parse(format!("convolution `{}` without num_output", node.name))
    })?;
    let kernel = spatial_pair(node, "convolution_param", "kernel_size", 0);
    if kernel[0] == 0 || kernel[1] == 0 {
        return Err(ImportError::Parse(format!(
            "convolution `{}` without kernel_size",
            node.name
        )));
    }
    let groups = get_usize(node, "convolution_param.group").unwrap_or(1);
    if groups == 0 || channels_in % groups != 0 || num_output % groups != 0 {
        return Err(ImportError::Shape {
            layer: node.name.clone(),
            reason: format!(
                "group count {groups} does not divide channels {channels_in} -> {num_output}"
            ),
        });
    }
    let bias = node
        .attr("convolution_param.bias_term")
        .map(|v| v.clone().into_bool())
        .unwrap_or(true);

    Ok(Conv2dConfig::new([channels_in, num_output], kernel)
        .with_stride(spatial_pair(node, "convolution_param", "stride", 1))
        .with_padding(spatial_pair(node, "convolution_param", "pad", 0))
        .with_dilation(spatial_pair(node, "convolution_param", "dilation", 1))
        .with_groups(groups)
        .with_bias(bias))
}

/// Create a [`Pool2dConfig`] from a pooling node.
pub fn pool2d_config(node: &Node) -> Result<Pool2dConfig> {
    let kind = match node.attr("pooling_param.pool") {
        None => PoolKind::Max,
        Some(AttributeValue::String(s)) if s.as_str() == "MAX" => PoolKind::Max,
        Some(AttributeValue::String(s)) if s.as_str() == "AVE" => PoolKind::Average,
        Some(other) => {
            return Err(ImportError::Parse(format!(
                "pooling `{}` has unsupported pool mode {other:?}",
                node.name
            )))
        }
    };
    let global = node
        .attr("pooling_param.global_pooling")
        .map(|v| v.clone().into_bool())
        .unwrap_or(false);
    let kernel = spatial_pair(node, "pooling_param", "kernel_size", 0);
    if !global && (kernel[0] == 0 || kernel[1] == 0) {
        return Err(ImportError::Parse(format!(
            "pooling `{}` without kernel_size",
            node.name
        )));
    }

    Ok(Pool2dConfig::new(kind, kernel)
        .with_stride(spatial_pair(node, "pooling_param", "stride", 1))
        .with_padding(spatial_pair(node, "pooling_param", "pad", 0))
        .with_global(global))
}

/// Create a [`LinearConfig`] from an inner-product node. The input width is
/// the flattened extent of the parent's shape.
pub fn linear_config(node: &Node, d_input: usize) -> Result<LinearConfig> {
    let num_output = get_usize(node, "inner_product_param.num_output").ok_or_else(|| {
        ImportError::Parse(format!("inner product `{}` without num_output", node.name))
    })?;
    let bias = node
        .attr("inner_product_param.bias_term")
        .map(|v| v.clone().into_bool())
        .unwrap_or(true);
    Ok(LinearConfig::new(d_input, num_output).with_bias(bias))
}

pub fn lrn_config(node: &Node) -> LrnConfig {
    LrnConfig {
        local_size: get_usize(node, "lrn_param.local_size").unwrap_or(5),
        alpha: get_f32(node, "lrn_param.alpha", 1.0),
        beta: get_f32(node, "lrn_param.beta", 0.75),
        k: get_f32(node, "lrn_param.k", 1.0),
    }
}

pub fn dropout_config(node: &Node) -> DropoutConfig {
    let ratio = get_f32(node, "dropout_param.dropout_ratio", 0.5);
    DropoutConfig { keep_prob: 1.0 - ratio }
}

/// Concat axis in the source convention (1 = channels).
pub fn concat_axis(node: &Node) -> i64 {
    node.attr("concat_param.axis")
        .map(|v| v.clone().into_i64())
        .unwrap_or(1)
}

pub fn eltwise_config(node: &Node) -> Result<EltwiseOp> {
    match node.attr("eltwise_param.operation") {
        None => Ok(EltwiseOp::Sum),
        Some(AttributeValue::String(s)) if s.as_str() == "SUM" => Ok(EltwiseOp::Sum),
        Some(AttributeValue::String(s)) if s.as_str() == "PROD" => Ok(EltwiseOp::Prod),
        Some(AttributeValue::String(s)) if s.as_str() == "MAX" => Ok(EltwiseOp::Max),
        Some(other) => Err(ImportError::Parse(format!(
            "eltwise `{}` has unsupported operation {other:?}",
            node.name
        ))),
    }
}

pub fn batch_norm_config(node: &Node) -> BatchNormConfig {
    BatchNormConfig { epsilon: get_f32(node, "batch_norm_param.eps", 1e-5) }
}

/// Declared shape of an input node, converted from the source `[N, C, H, W]`
/// order to the converter's bookkeeping order.
pub fn input_shape(node: &Node) -> Result<TensorShape> {
    let dims = node
        .attr("input_param.shape.dim")
        .map(|v| v.clone().into_i64s())
        .ok_or_else(|| ImportError::Shape {
            layer: node.name.clone(),
            reason: "input layer has no declared shape".into(),
        })?;
    if dims.len() != 4 || dims.iter().any(|&d| d <= 0) {
        return Err(ImportError::Shape {
            layer: node.name.clone(),
            reason: format!("input shape must be 4 positive dims, got {dims:?}"),
        });
    }
    Ok(TensorShape::new(
        dims[0] as usize,
        dims[2] as usize,
        dims[3] as usize,
        dims[1] as usize,
    ))
}
