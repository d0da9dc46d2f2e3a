use std::collections::BTreeSet;

use proc_macro2::TokenStream;
use quote::quote;

/// Keeps track of the imports the generated source needs.
#[derive(Debug, Default)]
pub struct TfImports {
    imports: BTreeSet<String>,
}

impl TfImports {
    pub fn register(&mut self, import: &str) {
        self.imports.insert(import.to_string());
    }

    pub fn codegen(&self) -> TokenStream {
        let mut tokens = quote! {};
        for import in &self.imports {
            let path: TokenStream = import.parse().expect("import paths are valid");
            tokens.extend(quote! { use #path; });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_sorted_unique_use_statements() {
        let mut imports = TfImports::default();
        imports.register("std::path::Path");
        imports.register("caffe_import::tf::Network");
        imports.register("std::path::Path");

        let expected = quote! {
            use caffe_import::tf::Network;
            use std::path::Path;
        };
        assert_eq!(imports.codegen().to_string(), expected.to_string());
    }
}
