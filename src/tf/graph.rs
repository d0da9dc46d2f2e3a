use std::collections::HashMap;

use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;

use crate::error::{ImportError, Result};
use crate::tf::imports::TfImports;
use crate::tf::network::{Network, TensorMap};
use crate::tf::node::{Node, NodeCodegen};

/// The builder result: an in-memory description of the target graph.
///
/// This is the code generator's primary product. Textual source emission
/// ([`codegen`](TfGraph::codegen)) and model instantiation
/// ([`build_network`](TfGraph::build_network)) are two serializations of the
/// same node list, so the generated class and the exporter's live model
/// cannot drift apart.
#[derive(Debug, Default)]
pub struct TfGraph {
    name: String,
    imports: TfImports,
    nodes: Vec<Node>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl TfGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Nodes must be registered in the order they execute.
    pub fn register<N: NodeCodegen + 'static>(&mut self, node: N) {
        self.nodes.push(node.into_node());
    }

    pub fn register_input_output(&mut self, inputs: Vec<String>, outputs: Vec<String>) {
        self.input_names = inputs;
        self.output_names = outputs;
    }

    /// The identifier the generated class gets. The graph name comes from an
    /// arbitrary definition string, so this is where a name that cannot form
    /// a type identifier surfaces.
    pub fn class_name(&self) -> Result<Ident> {
        let mut out = String::with_capacity(self.name.len());
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c);
            } else {
                out.push('_');
            }
        }
        if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ImportError::CodeLoad(format!(
                "graph name `{}` cannot name a class",
                self.name
            )));
        }
        Ok(Ident::new(&out, Span::call_site()))
    }

    /// Emit the source of a class that rebuilds this graph: a struct named
    /// after the graph, a constructor taking the input-tensor mapping, and a
    /// weight-loading method.
    pub fn codegen(mut self) -> Result<TokenStream> {
        let class = self.class_name()?;
        let output_idents = self.output_idents()?;

        self.imports.register("caffe_import::Result");
        self.imports.register("caffe_import::tf::Network");
        self.imports.register("caffe_import::tf::Session");
        self.imports.register("caffe_import::tf::TensorMap");
        self.imports.register("std::path::Path");
        for node in &self.nodes {
            node.register_imports(&mut self.imports);
        }
        let imports = self.imports.codegen();

        let name = &self.name;
        let mut body = quote! {};
        self.nodes.iter().map(|node| node.build_stmt()).for_each(|stmt| body.extend(stmt));

        Ok(quote! {
            #imports

            pub struct #class {
                net: Network,
            }

            impl #class {
                pub fn new(inputs: &TensorMap) -> Result<Self> {
                    let mut net = Network::new(#name);

                    #body

                    #(net.mark_output(#output_idents);)*

                    Ok(Self { net })
                }

                pub fn load(&mut self, weights: &Path, session: &mut Session) -> Result<()> {
                    self.net.load(weights, session)
                }

                pub fn into_network(self) -> Network {
                    self.net
                }
            }
        })
    }

    /// Materialize a live network bound to the supplied input tensors.
    pub fn build_network(&self, inputs: &TensorMap) -> Result<Network> {
        self.class_name()?;
        let mut net = Network::new(&self.name);
        let mut handles = HashMap::new();
        for node in &self.nodes {
            node.apply(&mut net, &mut handles, inputs)?;
        }
        for output in &self.output_names {
            let handle = handles
                .get(output)
                .copied()
                .ok_or_else(|| ImportError::Lookup(output.clone()))?;
            net.mark_output(handle);
        }
        Ok(net)
    }

    fn output_idents(&self) -> Result<Vec<Ident>> {
        self.output_names
            .iter()
            .map(|name| {
                self.nodes
                    .iter()
                    .find(|node| node.output().name == *name)
                    .map(|node| node.output().ident.clone())
                    .ok_or_else(|| ImportError::Lookup(name.clone()))
            })
            .collect()
    }
}
