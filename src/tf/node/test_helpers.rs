use proc_macro2::TokenStream;
use quote::quote;

use crate::formatter::format_tokens;

/// Compare two token streams after formatting, so tests read like the
/// generated source they assert on.
pub fn assert_tokens(tokens1: TokenStream, tokens2: TokenStream) {
    // `build_stmt` produces statement fragments, which are not valid at
    // file scope; wrap both sides identically so the file-level formatter
    // can parse them before comparison.
    let wrap = |tokens: TokenStream| format_tokens(quote! { fn __wrap() { #tokens } });
    pretty_assertions::assert_eq!(wrap(tokens1), wrap(tokens2));
}
