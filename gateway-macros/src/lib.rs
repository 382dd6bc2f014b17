//! Derive macro for gateway-core node payload types.
//!
//! This crate provides `#[derive(NodePayload)]`, which implements the
//! `gateway_core::graph::NodePayload` trait so a node's typed output struct
//! can be stored into and fetched back out of `GraphState` without the
//! node name being repeated as a string literal at every call site.
//!
//! # Example
//!
//! ```ignore
//! use gateway_core::NodePayload;
//!
//! #[derive(NodePayload, serde::Serialize, serde::Deserialize)]
//! #[node_payload(name = "generate_response")]
//! struct ChatResponse {
//!     text: String,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Error, LitStr};

/// Derive macro for implementing the `NodePayload` trait.
///
/// # Attributes
///
/// - `#[node_payload(name = "...")]` - Required. The graph node name this
///   payload is stored under.
#[proc_macro_derive(NodePayload, attributes(node_payload))]
pub fn derive_node_payload(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_node_payload_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_node_payload_impl(input: DeriveInput) -> Result<TokenStream2, Error> {
    let name = &input.ident;
    let node_name = parse_node_name(&input)?;

    Ok(quote! {
        impl ::gateway_core::graph::NodePayload for #name {
            const NODE_NAME: &'static str = #node_name;
        }
    })
}

fn parse_node_name(input: &DeriveInput) -> Result<String, Error> {
    for attr in &input.attrs {
        if !attr.path().is_ident("node_payload") {
            continue;
        }

        let mut node_name = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                node_name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown node_payload attribute, expected 'name'"))
            }
        })?;

        if let Some(name) = node_name {
            return Ok(name);
        }
    }

    Err(Error::new(
        input.ident.span(),
        "missing #[node_payload(name = \"...\")] attribute",
    ))
}
