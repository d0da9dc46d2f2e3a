use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::BatchNormConfig;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

/// Batch normalization with stored statistics; the transformer folds the
/// source's moving-average scale factor into mean and variance beforehand.
#[derive(Debug, Clone, new)]
pub struct BatchNormNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: BatchNormConfig,
}

impl NodeCodegen for BatchNormNode {
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
        let epsilon = self.config.epsilon.to_tokens();

        quote! {
            let #output = net.batch_norm(#name, #input, BatchNormConfig { epsilon: #epsilon })?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::BatchNormConfig");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.batch_norm(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::BatchNorm(self)
    }
}
