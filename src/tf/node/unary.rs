use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::error::Result;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// Activation-style operators: one input, one output, no parameters.
#[derive(Debug, Clone, new)]
pub struct UnaryNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub kind: UnaryKind,
}

impl NodeCodegen for UnaryNode {
    fn inputs(&self) -> Vec<&TensorType> {
        vec![&self.input]
    }

    fn output(&self) -> &TensorType {
        &self.output
    }

    fn build_stmt(&self) -> TokenStream {
        let output = &self.output.ident;
        let input = &self.input.ident;
        let name = &self.name;
        let method = match self.kind {
            UnaryKind::Relu => quote! { relu },
            UnaryKind::Sigmoid => quote! { sigmoid },
            UnaryKind::Tanh => quote! { tanh },
            UnaryKind::Softmax => quote! { softmax },
        };

        quote! {
            let #output = net.#method(#name, #input)?;
        }
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = match self.kind {
            UnaryKind::Relu => net.relu(&self.name, input)?,
            UnaryKind::Sigmoid => net.sigmoid(&self.name, input)?,
            UnaryKind::Tanh => net.tanh(&self.name, input)?,
            UnaryKind::Softmax => net.softmax(&self.name, input)?,
        };
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Unary(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tf::node::test_helpers::assert_tokens;
    use crate::tf::scope::Scope;

    #[test]
    fn test_codegen() {
        let mut scope = Scope::default();
        let node = UnaryNode::new(
            "relu1".into(),
            scope.tensor("conv1", None),
            scope.tensor("relu1", None),
            UnaryKind::Relu,
        );

        let expected = quote! {
            let relu1 = net.relu("relu1", conv1)?;
        };
        assert_tokens(node.build_stmt(), expected);
    }
}
