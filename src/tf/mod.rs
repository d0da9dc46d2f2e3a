//! The target side of the converter: the in-memory graph builder, the
//! generated-code node set, the execution session, the serialized graph
//! protobuf and the injected freeze capabilities.

pub mod freeze;
pub mod graph;
pub mod node;
pub mod proto;

mod codegen;
mod imports;
mod network;
mod scope;
mod session;
mod ty;

pub use imports::TfImports;
pub use network::{Network, Placeholder, TensorHandle, TensorMap};
pub use session::Session;
pub use ty::TensorType;

// The generated source imports operator configurations through this module,
// so the caffe-side types are re-exported here under the names it uses.
pub use crate::caffe::op_configuration::{
    BatchNormConfig, Conv2dConfig, DropoutConfig, EltwiseOp, LinearConfig, LrnConfig,
    Pool2dConfig, PoolKind,
};

pub(crate) use codegen::*;
pub(crate) use scope::*;
