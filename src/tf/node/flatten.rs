use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::error::Result;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct FlattenNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
}

impl NodeCodegen for FlattenNode {
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

        quote! {
            let #output = net.flatten(#name, #input)?;
        }
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.flatten(&self.name, input)?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Flatten(self)
    }
}
