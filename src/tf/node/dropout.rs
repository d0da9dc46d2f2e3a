use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::DropoutConfig;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

/// Train-phase dropout. At inference time the graph builder elides the
/// layer before mapping, so this node never appears in `test` conversions.
#[derive(Debug, Clone, new)]
pub struct DropoutNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: DropoutConfig,
}

impl NodeCodegen for DropoutNode {
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
        let keep_prob = self.config.keep_prob.to_tokens();

        quote! {
            let #output = net.dropout(#name, #input, DropoutConfig { keep_prob: #keep_prob })?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::DropoutConfig");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.dropout(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Dropout(self)
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
        let node = DropoutNode::new(
            "drop6".into(),
            scope.tensor("fc6", None),
            scope.tensor("drop6", None),
            DropoutConfig { keep_prob: 0.5 },
        );

        let expected = quote! {
            let drop6 = net.dropout("drop6", fc6, DropoutConfig { keep_prob: 0.5 })?;
        };
        assert_tokens(node.build_stmt(), expected);
    }
}
