use std::collections::{HashMap, HashSet};

use proc_macro2::{Ident, Span};

use crate::caffe::ir::TensorShape;
use crate::tf::ty::TensorType;

/// Tracks the mapping from IR tensor names to generated-code variable
/// identifiers. Layer names are arbitrary strings; identifiers must be
/// valid and unique, so sanitized names get numeric suffixes on collision.
#[derive(Debug, Default)]
pub struct Scope {
    assigned: HashMap<String, Ident>,
    taken: HashSet<String>,
}

impl Scope {
    /// The variable for an IR tensor name, creating it on first use.
    pub fn tensor(&mut self, name: &str, shape: Option<TensorShape>) -> TensorType {
        if let Some(ident) = self.assigned.get(name) {
            return TensorType::new(name, ident.clone(), shape);
        }
        let mut candidate = sanitize(name);
        if !self.taken.insert(candidate.clone()) {
            let mut counter = 2;
            loop {
                let suffixed = format!("{candidate}_{counter}");
                if self.taken.insert(suffixed.clone()) {
                    candidate = suffixed;
                    break;
                }
                counter += 1;
            }
        }
        let ident = Ident::new(&candidate, Span::call_site());
        self.assigned.insert(name.to_string(), ident.clone());
        TensorType::new(name, ident, shape)
    }
}

fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    // Avoid colliding with the receiver names the generated code uses.
    if matches!(out.as_str(), "net" | "inputs" | "self") {
        out.push('_');
    }
    out
}
