use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod layer;

/// Implements `AsLayer` by forwarding to the field marked `#[layer]`.
///
/// A tuple struct with a single field forwards to that field. The container attribute
/// accepts `crate = "path"` to relocate the `dygraph` crate and `bound = "..."` to add
/// where-predicates to the generated impl.
#[proc_macro_derive(AsLayer, attributes(layer))]
pub fn derive_as_layer(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = layer::derive_as_layer(input);
    expanded.into()
}
