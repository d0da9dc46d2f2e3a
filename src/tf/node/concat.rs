use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::error::Result;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

/// Channel concatenation. The source axis (1, channels) maps to the
/// target's innermost axis; the network builder hard-codes that.
#[derive(Debug, Clone, new)]
pub struct ConcatNode {
    pub name: String,
    pub inputs: Vec<TensorType>,
    pub output: TensorType,
}

impl NodeCodegen for ConcatNode {
    fn inputs(&self) -> Vec<&TensorType> {
        self.inputs.iter().collect()
    }

    fn output(&self) -> &TensorType {
        &self.output
    }

    fn build_stmt(&self) -> TokenStream {
        let output = &self.output.ident;
        let name = &self.name;
        let inputs = self.inputs.iter().map(|t| &t.ident);

        quote! {
            let #output = net.concat(#name, &[#(#inputs),*])?;
        }
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let parents = self
            .inputs
            .iter()
            .map(|t| parent_handle(handles, &t.name))
            .collect::<Result<Vec<_>>>()?;
        let handle = net.concat(&self.name, &parents)?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Concat(self)
    }
}
