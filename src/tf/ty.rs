use proc_macro2::Ident;

use crate::caffe::ir::TensorShape;

/// A tensor as the code generator sees it: the IR name it came from, the
/// variable identifier it becomes in generated source, and the inferred
/// shape when one is known.
#[derive(Debug, Clone)]
pub struct TensorType {
    pub name: String,
    pub ident: Ident,
    pub shape: Option<TensorShape>,
}

impl TensorType {
    pub fn new(name: impl Into<String>, ident: Ident, shape: Option<TensorShape>) -> Self {
        Self { name: name.into(), ident, shape }
    }
}
