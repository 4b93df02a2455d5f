mod document;
mod index;

use proc_macro::TokenStream;

/// Derive macro implementing `docweave::Document`.
///
/// # Usage
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Clone, Document)]
/// #[document(type_name = "Article")]
/// struct Article {
///     #[document(id)]
///     pub key: i64,
///     pub title: String,
/// }
/// ```
///
/// The type name defaults to the struct name, the id to a field named `id`.
/// The id field must be an `i64`.
#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    document::derive_document(input)
}

/// Derive macro implementing `docweave::Index`.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Clone, Index)]
/// #[index(name = "ArticlesByDay")]
/// struct ArticlesByDay {
///     day: u32,
///     count: i64,
/// }
/// ```
///
/// Without `name` the struct name is the index table name.
#[proc_macro_derive(Index, attributes(index))]
pub fn derive_index(input: TokenStream) -> TokenStream {
    index::derive_index(input)
}
