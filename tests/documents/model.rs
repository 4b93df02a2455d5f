//! Documents used by the session lifecycle tests.

use docweave::{Document, Index};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Document)]
pub struct Note {
    pub id: i64,
    pub text: String,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            id: 0,
            text: text.to_string(),
        }
    }
}

/// Id kept in a field not named `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Document)]
#[document(type_name = "Invoice")]
pub struct Invoice {
    #[document(id)]
    pub number: i64,
    pub total: u64,
}

/// Collides with the Document table itself.
#[derive(Clone, Debug, Serialize, Deserialize, Document)]
#[document(type_name = "Document")]
pub struct RawDocument {
    pub id: i64,
}

/// Named like a registered index table.
#[derive(Clone, Debug, Serialize, Deserialize, Document)]
#[document(type_name = "NoteByText")]
pub struct Impostor {
    pub id: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Index)]
pub struct NoteByText {
    pub text: String,
}

pub struct NoteIndexes;

impl docweave::IndexProvider for NoteIndexes {
    type Document = Note;

    fn describe(&self, context: &mut docweave::DescribeContext<Note>) {
        context
            .for_index::<NoteByText>()
            .map(|note: &Note| Some(NoteByText { text: note.text.clone() }));
    }
}
