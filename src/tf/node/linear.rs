use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::LinearConfig;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct LinearNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: LinearConfig,
}

impl NodeCodegen for LinearNode {
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
        let d_input = self.config.d_input.to_tokens();
        let d_output = self.config.d_output.to_tokens();
        let bias = self.config.bias.to_tokens();

        quote! {
            let #output = net.linear(#name, #input, LinearConfig::new(#d_input, #d_output)
                .with_bias(#bias))?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::LinearConfig");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.linear(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Linear(self)
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
        let node = LinearNode::new(
            "ip1".into(),
            scope.tensor("pool2", None),
            scope.tensor("ip1", None),
            LinearConfig::new(800, 500),
        );

        let expected = quote! {
            let ip1 = net.linear("ip1", pool2, LinearConfig::new(800, 500)
                .with_bias(true))?;
        };
        assert_tokens(node.build_stmt(), expected);
    }
}
