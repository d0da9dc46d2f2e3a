use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::EltwiseOp;
use crate::error::Result;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct EltwiseNode {
    pub name: String,
    pub inputs: Vec<TensorType>,
    pub output: TensorType,
    pub op: EltwiseOp,
}

impl NodeCodegen for EltwiseNode {
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
        let op = match self.op {
            EltwiseOp::Sum => quote! { EltwiseOp::Sum },
            EltwiseOp::Prod => quote! { EltwiseOp::Prod },
            EltwiseOp::Max => quote! { EltwiseOp::Max },
        };

        quote! {
            let #output = net.eltwise(#name, #op, &[#(#inputs),*])?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::EltwiseOp");
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
        let handle = net.eltwise(&self.name, self.op, &parents)?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Eltwise(self)
    }
}
