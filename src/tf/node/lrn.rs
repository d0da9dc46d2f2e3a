use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::LrnConfig;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct LrnNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: LrnConfig,
}

impl NodeCodegen for LrnNode {
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
        let local_size = self.config.local_size.to_tokens();
        let alpha = self.config.alpha.to_tokens();
        let beta = self.config.beta.to_tokens();
        let k = self.config.k.to_tokens();

        quote! {
            let #output = net.lrn(#name, #input, LrnConfig {
                local_size: #local_size,
                alpha: #alpha,
                beta: #beta,
                k: #k,
            })?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::LrnConfig");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.lrn(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Lrn(self)
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
        let node = LrnNode::new(
            "norm1".into(),
            scope.tensor("pool1", None),
            scope.tensor("norm1", None),
            LrnConfig { local_size: 5, alpha: 0.0001, beta: 0.75, k: 1.0 },
        );

        let expected = quote! {
            let norm1 = net.lrn("norm1", pool1, LrnConfig {
                local_size: 5,
                alpha: 0.0001,
                beta: 0.75,
                k: 1.0,
            })?;
        };
        assert_tokens(node.build_stmt(), expected);
    }
}
