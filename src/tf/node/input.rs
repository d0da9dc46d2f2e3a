use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::ir::TensorShape;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{Node, NodeCodegen};
use crate::tf::ty::TensorType;

/// The designated input node: binds a caller-supplied placeholder to the
/// graph's declared input shape.
#[derive(Debug, Clone, new)]
pub struct InputNode {
    pub name: String,
    pub shape: TensorShape,
    pub output: TensorType,
}

impl NodeCodegen for InputNode {
    fn inputs(&self) -> Vec<&TensorType> {
        vec![]
    }

    fn output(&self) -> &TensorType {
        &self.output
    }

    fn build_stmt(&self) -> TokenStream {
        let output = &self.output.ident;
        let name = &self.name;
        let shape = self.shape.to_nhwc().to_tokens();

        quote! {
            let #output = net.input(#name, #shape, inputs)?;
        }
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        inputs: &TensorMap,
    ) -> Result<()> {
        let handle = net.input(&self.name, self.shape.to_nhwc(), inputs)?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Input(self)
    }
}
