//! Derive macro backing the entity codec's tag grammar.
//!
//! `#[derive(StoreEntity)]` expands a struct's fields into `IntoEntity` /
//! `FromEntity` impls (and the matching `IntoValue` / `FromValue` impls used
//! when the struct is nested inside another entity), following the
//! `#[datastore(name = "...", skip, noindex, omitempty, flatten, key)]`
//! attribute grammar in place of the reflection-based tag parsing a
//! reflective host language would use.

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod struct_codec;

#[proc_macro_derive(StoreEntity, attributes(datastore))]
pub fn derive_store_entity(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    struct_codec::derive_store_entity(&ast).into()
}
