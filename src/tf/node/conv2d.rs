use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;

use crate::caffe::op_configuration::Conv2dConfig;
use crate::error::Result;
use crate::tf::codegen::ToTokens;
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorHandle, TensorMap};
use crate::tf::node::{parent_handle, Node, NodeCodegen};
use crate::tf::ty::TensorType;

#[derive(Debug, Clone, new)]
pub struct Conv2dNode {
    pub name: String,
    pub input: TensorType,
    pub output: TensorType,
    pub config: Conv2dConfig,
}

impl NodeCodegen for Conv2dNode {
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
        let channels = self.config.channels.to_tokens();
        let kernel_size = self.config.kernel_size.to_tokens();
        let stride = self.config.stride.to_tokens();
        let padding = self.config.padding.to_tokens();
        let dilation = self.config.dilation.to_tokens();
        let groups = self.config.groups.to_tokens();
        let bias = self.config.bias.to_tokens();

        quote! {
            let #output = net.conv2d(#name, #input, Conv2dConfig::new(#channels, #kernel_size)
                .with_stride(#stride)
                .with_padding(#padding)
                .with_dilation(#dilation)
                .with_groups(#groups)
                .with_bias(#bias))?;
        }
    }

    fn register_imports(&self, imports: &mut TfImports) {
        imports.register("caffe_import::tf::Conv2dConfig");
    }

    fn apply(
        &self,
        net: &mut Network,
        handles: &mut HashMap<String, TensorHandle>,
        _inputs: &TensorMap,
    ) -> Result<()> {
        let input = parent_handle(handles, &self.input.name)?;
        let handle = net.conv2d(&self.name, input, self.config.clone())?;
        handles.insert(self.name.clone(), handle);
        Ok(())
    }

    fn into_node(self) -> Node {
        Node::Conv2d(self)
    }
}
