use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::{Pool2dConfig, PoolKind};
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct Pool2dNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: Pool2dConfig,
}

impl NodeCodegen for Pool2dNode {
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
        let kind = match self.config.kind {
            PoolKind::Max => quote! { PoolKind::Max },
            PoolKind::Average => quote! { PoolKind::Average },
        };
        let kernel_size = self.config.kernel_size.to_tokens();
        let stride = self.config.stride.to_tokens();
        let padding = self.config.padding.to_tokens();
        let global = if self.config.global {
            quote! { .with_global(true) }
        } else {
            quote! {}
        };

        quote! {
            let #output = net.pool2d(#name, #input, Pool2dConfig::new(#kind, #kernel_size)
                .with_stride(#stride)
                .with_padding(#padding)
                #global)?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::Pool2dConfig");
        imports.register("caffe_import::tf::PoolKind");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.pool2d(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Pool2d(self)
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
        let node = Pool2dNode::new(
            "pool1".into(),
            scope.tensor("conv1", None),
            scope.tensor("pool1", None),
            Pool2dConfig::new(PoolKind::Max, [2, 2]).with_stride([2, 2]),
        );

        let expected = quote! {
            let pool1 = net.pool2d("pool1", conv1, Pool2dConfig::new(PoolKind::Max, [2, 2])
                .with_stride([2, 2])
                .with_padding([0, 0]))?;
        };
        assert_tokens(node.build_stmt(), expected);
    }

    #[test]
    fn test_codegen_global() {
        let mut scope = Scope::default();
        let node = Pool2dNode::new(
            "pool5".into(),
            scope.tensor("conv5", None),
            scope.tensor("pool5", None),
            Pool2dConfig::new(PoolKind::Average, [0, 0]).with_global(true),
        );

        let expected = quote! {
            let pool5 = net.pool2d("pool5", conv5, Pool2dConfig::new(PoolKind::Average, [0, 0])
                .with_stride([1, 1])
                .with_padding([0, 0])
                .with_global(true))?;
        };
        assert_tokens(node.build_stmt(), expected);
    }
}
