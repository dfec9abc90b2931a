// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::format_ident;
use quote::quote;
use syn::DeriveInput;
use syn::Field;
use syn::FieldsNamed;
use syn::Ident;
use syn::parse_macro_input;

/// Generate a [`captap::ddi::kstat::KStatProvider`] implementation
/// given a struct of named fields of type
/// [`captap::ddi::kstat::KStatU64`].
///
/// ```Rust
/// #[derive(KStatProvider)]
/// struct DescStats {
///     received: KStatU64,
///     dropped: KStatU64,
/// }
/// ```
///
/// This macro generates the following code based on the struct above.
///
/// ```Rust
/// #[derive(Clone, Debug, Default)]
/// pub struct DescStatsSnap {
///     pub received: u64,
///     pub dropped: u64,
/// }
///
/// impl KStatProvider for DescStats {
///     const NUM_FIELDS: u32 = 2;
///     type Snap = DescStatsSnap;
///
///     fn init(&mut self) -> result::Result<(), kstat::Error> {
///         self.received.init("received")?;
///         self.dropped.init("dropped")?;
///         Ok(())
///     }
///
///     fn new() -> Self { ... }
///     fn reset(&mut self) { ... }
///     fn snapshot(&self) -> Self::Snap { ... }
/// }
/// ````
#[proc_macro_derive(KStatProvider)]
pub fn derive_kstat_provider(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let DeriveInput { ident, data, .. } = input;
    let fields: Vec<Field> = match data {
        syn::Data::Struct(s) => match s.fields {
            syn::Fields::Named(FieldsNamed { named, .. }) => {
                named.into_iter().collect()
            }

            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "a KStatProvider must have named fields",
                ));
            }
        },

        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "only a struct may be a KStatProvider",
            ));
        }
    };

    let num_fields = fields.len() as u32;
    let fields_ident: Vec<Ident> =
        fields.iter().filter_map(|f| f.ident.clone()).collect();
    let ident_snap = format_ident!("{}Snap", ident);

    Ok(quote! {
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        pub struct #ident_snap {
            #( pub #fields_ident: u64, )*
        }

        impl KStatProvider for #ident {
            const NUM_FIELDS: u32 = #num_fields;
            type Snap = #ident_snap;

            fn init(
                &mut self
            ) -> core::result::Result<(), kstat::Error> {
                #( self.#fields_ident.init(stringify!(#fields_ident))?; )*
                Ok(())
            }

            fn new() -> Self {
                use ::captap::ddi::kstat::KStatU64;

                Self {
                    #( #fields_ident: KStatU64::new(), )*
                }
            }

            fn reset(&mut self) {
                #( self.#fields_ident.set(0); )*
            }

            fn snapshot(&self) -> Self::Snap {
                #ident_snap {
                    #( #fields_ident: self.#fields_ident.val(), )*
                }
            }
        }
    })
}
