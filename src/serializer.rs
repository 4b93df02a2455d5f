use serde_json::Value;

use crate::error::Result;

/// Turns document content into the opaque text stored by the content storage.
pub trait ContentSerializer: Send + Sync {
    fn serialize(&self, content: &Value) -> Result<String>;

    fn deserialize(&self, text: &str) -> Result<Value>;
}

/// Compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ContentSerializer for JsonSerializer {
    fn serialize(&self, content: &Value) -> Result<String> {
        Ok(serde_json::to_string(content)?)
    }

    fn deserialize(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;

    #[test]
    fn json_serializer_is_compact_and_reports_bad_input() {
        let text = JsonSerializer.serialize(&json!({ "a": [1, 2] })).unwrap();
        assert_eq!(text, r#"{"a":[1,2]}"#);
        assert_eq!(JsonSerializer.deserialize(&text).unwrap(), json!({ "a": [1, 2] }));
        assert!(matches!(
            JsonSerializer.deserialize("{oops"),
            Err(StoreError::Serialization(_))
        ));
    }
}
