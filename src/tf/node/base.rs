use std::collections::HashMap;

use proc_macro2::TokenStream;

use crate::error::{ImportError, Result};
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::ty::TensorType;

use super::{
    batch_norm::BatchNormNode, concat::ConcatNode, conv2d::Conv2dNode, dropout::DropoutNode,
    eltwise::EltwiseNode, flatten::FlattenNode, input::InputNode, linear::LinearNode,
    lrn::LrnNode, pool2d::Pool2dNode, unary::UnaryNode,
};

/// One operator of the builder result. Every implementation drives the same
/// construction twice: once as a statement in the generated source
/// ([`build_stmt`](NodeCodegen::build_stmt)) and once against an in-memory
/// [`Network`] ([`apply`](NodeCodegen::apply)), so the two stay equivalent
/// by construction.
pub trait NodeCodegen: std::fmt::Debug {
    fn inputs(&self) -> Vec<&TensorType>;

    fn output(&self) -> &TensorType;

    /// The builder-call statement in the generated constructor.
    fn build_stmt(&self) -> TokenStream;

    /// Register the imports the statement needs.
    fn register_imports(&self, _imports: &mut TfImports) {}

    /// Replay the construction on an in-memory network.
    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        inputs: &TensorMap,
    ) -> Result<()>;

    fn into_node(self) -> Node;
}

/// Look up the handle a parent operator registered.
pub(crate) fn parent_handle(
    handles: &HashMap<String, TensorHandle>,
    name: &str,
) -> Result<TensorHandle> {
    handles
        .get(name)
        .copied()
        .ok_or_else(|| ImportError::Lookup(name.to_string()))
}

#[derive(Debug)]
pub enum Node {
    Input(InputNode),
    Conv2d(Conv2dNode),
    Pool2d(Pool2dNode),
    Linear(LinearNode),
    Unary(UnaryNode),
    Lrn(LrnNode),
    Concat(ConcatNode),
    Dropout(DropoutNode),
    BatchNorm(BatchNormNode),
    Eltwise(EltwiseNode),
    Flatten(FlattenNode),
}

macro_rules! match_all {
    ($self:expr, $method:ident ( $($arg:expr),* )) => {{
        match $self {
            Node::Input(node) => node.$method($($arg),*),
            Node::Conv2d(node) => node.$method($($arg),*),
            Node::Pool2d(node) => node.$method($($arg),*),
            Node::Linear(node) => node.$method($($arg),*),
            Node::Unary(node) => node.$method($($arg),*),
            Node::Lrn(node) => node.$method($($arg),*),
            Node::Concat(node) => node.$method($($arg),*),
            Node::Dropout(node) => node.$method($($arg),*),
            Node::BatchNorm(node) => node.$method($($arg),*),
            Node::Eltwise(node) => node.$method($($arg),*),
            Node::Flatten(node) => node.$method($($arg),*),
        }
    }};
}

impl NodeCodegen for Node {
    fn inputs(&self) -> Vec<&TensorType> {
        match_all!(self, inputs())
    }

    fn output(&self) -> &TensorType {
        match_all!(self, output())
    }

    fn build_stmt(&self) -> TokenStream {
        match_all!(self, build_stmt())
    }

    fn register_imports(&self, imports: &mut TfImports) {
        match_all!(self, register_imports(imports))
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        inputs: &TensorMap,
    ) -> Result<()> {
        match_all!(self, apply(net, handles, inputs))
    }

    fn into_node(self) -> Node {
        self
    }
}
