use proc_macro2::{Literal, TokenStream};
use quote::quote;

/// Token emission for configuration values in generated source. Named like
/// the `quote` trait on purpose: nodes import exactly one of the two.
pub trait ToTokens {
    fn to_tokens(&self) -> TokenStream;
}

impl ToTokens for usize {
    fn to_tokens(&self) -> TokenStream {
        let literal = Literal::usize_unsuffixed(*self);
        quote! { #literal }
    }
}

impl ToTokens for f32 {
    fn to_tokens(&self) -> TokenStream {
        let literal = Literal::f32_unsuffixed(*self);
        quote! { #literal }
    }
}

impl ToTokens for bool {
    fn to_tokens(&self) -> TokenStream {
        if *self {
            quote! { true }
        } else {
            quote! { false }
        }
    }
}

impl<T: ToTokens, const N: usize> ToTokens for [T; N] {
    fn to_tokens(&self) -> TokenStream {
        let items = self.iter().map(T::to_tokens);
        quote! { [#(#items),*] }
    }
}
