// Code generation for `#[derive(StoreEntity)]`.
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, Type};

struct FieldPlan {
    ident: Ident,
    ty: Type,
    prop_name: String,
    skip: bool,
    noindex: bool,
    omitempty: bool,
    flatten: bool,
    is_key: bool,
}

/// Parses the `#[datastore(...)]` attribute on one field into the tag grammar
/// described by the entity codec's `<name>,<opt>,<opt>...` rules.
fn parse_field(field: &syn::Field) -> FieldPlan {
    let ident = field.ident.clone().expect("tuple structs are not supported");
    let mut prop_name = ident.to_string();
    let mut skip = false;
    let mut noindex = false;
    let mut omitempty = false;
    let mut flatten = false;
    let mut is_key = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("datastore") {
            continue;
        }
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: syn::LitStr = value.parse()?;
                prop_name = lit.value();
            } else if meta.path.is_ident("skip") {
                skip = true;
            } else if meta.path.is_ident("noindex") {
                noindex = true;
            } else if meta.path.is_ident("omitempty") {
                omitempty = true;
            } else if meta.path.is_ident("flatten") {
                flatten = true;
            } else if meta.path.is_ident("key") {
                is_key = true;
            }
            Ok(())
        });
    }

    FieldPlan {
        ident,
        ty: field.ty.clone(),
        prop_name,
        skip,
        noindex,
        omitempty,
        flatten,
        is_key,
    }
}

pub fn derive_store_entity(input: &DeriveInput) -> TokenStream {
    let name = &input.ident;

    let Data::Struct(data) = &input.data else {
        return syn::Error::new_spanned(input, "StoreEntity can only be derived for structs")
            .to_compile_error();
    };
    let Fields::Named(fields) = &data.fields else {
        return syn::Error::new_spanned(input, "StoreEntity requires named fields")
            .to_compile_error();
    };

    let plans: Vec<FieldPlan> = fields.named.iter().map(parse_field).collect();
    let key_field = plans.iter().find(|p| p.is_key).map(|p| &p.ident);

    let encode_arms = plans.iter().filter(|p| !p.skip && !p.is_key).map(|p| {
        let field_ident = &p.ident;
        let prop_name = &p.prop_name;
        let noindex = p.noindex;

        let push = quote! {
            props.insert(
                #prop_name.to_string(),
                ::datastore::entity::Property {
                    value: ::datastore::value::IntoValue::into_value(&self.#field_ident)?,
                    indexed: !#noindex,
                },
            );
        };

        if p.flatten {
            quote! {
                for (child_name, child_prop) in
                    ::datastore::entity::IntoEntity::into_entity(&self.#field_ident)?.into_properties()
                {
                    props.insert(format!("{}.{}", #prop_name, child_name), child_prop);
                }
            }
        } else if p.omitempty {
            quote! {
                if !::datastore::value::IsZero::is_zero(&self.#field_ident) {
                    #push
                }
            }
        } else {
            push
        }
    });

    let decode_arms = plans.iter().filter(|p| !p.skip && !p.is_key).map(|p| {
        let field_ident = &p.ident;
        let prop_name = &p.prop_name;
        let ty = &p.ty;

        if p.flatten {
            let prefix = format!("{}.", p.prop_name);
            quote! {
                {
                    let mut child = ::datastore::entity::Entity::empty();
                    for (name, prop) in entity.properties_ref() {
                        if let Some(rest) = name.strip_prefix(#prefix) {
                            child.insert(rest.to_string(), prop.clone());
                        }
                    }
                    ::datastore::entity::FromEntity::from_entity(&child, &mut out.#field_ident)?;
                }
            }
        } else {
            quote! {
                if let Some(prop) = entity.get(#prop_name) {
                    out.#field_ident = <#ty as ::datastore::value::FromValue>::from_value(&prop.value)
                        .map_err(|source| ::datastore::error::Error::InvalidEntityType {
                            detail: format!("property {:?}: {}", #prop_name, source),
                        })?;
                }
            }
        }
    });

    let key_decode = key_field.map(|key_field| {
        quote! {
            if let Some(key) = entity.key() {
                out.#key_field = Some(key.clone());
            }
        }
    });

    quote! {
        impl ::datastore::entity::IntoEntity for #name {
            fn into_entity(
                &self,
            ) -> ::std::result::Result<::datastore::entity::Entity, ::datastore::error::Error> {
                let mut props = ::std::collections::BTreeMap::new();
                #(#encode_arms)*
                Ok(::datastore::entity::Entity::from_properties(props))
            }
        }

        impl ::datastore::entity::FromEntity for #name {
            fn from_entity(
                entity: &::datastore::entity::Entity,
                out: &mut Self,
            ) -> ::std::result::Result<(), ::datastore::error::Error> {
                #(#decode_arms)*
                #key_decode
                Ok(())
            }
        }

        impl ::datastore::value::IntoValue for #name {
            fn into_value(
                &self,
            ) -> ::std::result::Result<::datastore::value::Value, ::datastore::error::Error> {
                Ok(::datastore::value::Value::Entity(
                    ::datastore::entity::IntoEntity::into_entity(self)?,
                ))
            }
        }

        impl ::datastore::value::FromValue for #name
        where
            #name: ::std::default::Default,
        {
            fn from_value(
                value: &::datastore::value::Value,
            ) -> ::std::result::Result<Self, ::datastore::error::ValueError> {
                match value {
                    ::datastore::value::Value::Entity(entity) => {
                        let mut out = Self::default();
                        ::datastore::entity::FromEntity::from_entity(entity, &mut out)
                            .map_err(|err| ::datastore::error::ValueError(err.to_string()))?;
                        Ok(out)
                    }
                    other => Err(::datastore::error::ValueError(format!(
                        "expected entity value, found {other:?}"
                    ))),
                }
            }
        }
    }
}
