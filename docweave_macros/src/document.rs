use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // #[document(type_name = "...")], defaulting to the struct name
    let type_name = extract_type_name(&input);

    // Field marked #[document(id)], or the field named `id`
    let id_field = match extract_id_field(&input) {
        Ok(field) => field,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        impl #impl_generics ::docweave::Document for #name #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #type_name;

            fn id(&self) -> i64 {
                self.#id_field
            }

            fn set_id(&mut self, id: i64) {
                self.#id_field = id;
            }
        }
    };

    TokenStream::from(expanded)
}

fn extract_type_name(input: &DeriveInput) -> String {
    for attr in &input.attrs {
        if !attr.path().is_ident("document") {
            continue;
        }

        let mut type_name = None;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("type_name") {
                let value: LitStr = meta.value()?.parse()?;
                type_name = Some(value.value());
            }
            Ok(())
        });

        if let Some(t) = type_name {
            return t;
        }
    }

    input.ident.to_string()
}

fn extract_id_field(input: &DeriveInput) -> syn::Result<syn::Ident> {
    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new_spanned(&input.ident, "Document can only be derived for structs"));
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return Err(syn::Error::new_spanned(&input.ident, "Document requires named fields"));
    };

    for field in &fields.named {
        for attr in &field.attrs {
            if attr.path().is_ident("document") {
                let mut is_id = false;
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("id") {
                        is_id = true;
                    }
                    Ok(())
                })?;
                if let (true, Some(ident)) = (is_id, &field.ident) {
                    return Ok(ident.clone());
                }
            }
        }
    }

    fields
        .named
        .iter()
        .filter_map(|f| f.ident.as_ref())
        .find(|ident| *ident == "id")
        .cloned()
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &input.ident,
                "Document derive: no field marked with #[document(id)] and no field named `id`",
            )
        })
}
