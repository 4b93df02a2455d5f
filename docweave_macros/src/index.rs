use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub fn derive_index(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut table = input.ident.to_string();
    for attr in &input.attrs {
        if !attr.path().is_ident("index") {
            continue;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                table = value.value();
                Ok(())
            } else {
                Err(meta.error("unsupported index attribute, expected `name`"))
            }
        });
        if let Err(err) = parsed {
            return err.to_compile_error().into();
        }
    }

    let expanded = quote! {
        impl #impl_generics ::docweave::Index for #name #ty_generics #where_clause {
            const NAME: &'static str = #table;
        }
    };

    TokenStream::from(expanded)
}
