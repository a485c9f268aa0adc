//! Room document parsing
//!
//! A room payload is an opaque JSON object produced by the map editor. The
//! directory only cares about one field: the room name, read from `"room"`
//! (the editor's map format) or, failing that, `"name"`.

use crate::error::{Error, Result};
use crate::types::RoomName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields that may carry the room name, in lookup order
pub const NAME_FIELDS: [&str; 2] = ["room", "name"];

/// A validated room document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RoomPayload {
    name: String,
    document: Map<String, Value>,
}

impl RoomPayload {
    /// Parse and validate JSON text submitted by a client or peer
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::WrongRoomFormat(format!("invalid JSON: {e}")))?;
        Self::try_from(value)
    }

    /// The room name this document declares
    pub fn name(&self) -> RoomName {
        RoomName(self.name.clone())
    }

    /// The full document
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Compact JSON text, as served by `getRoom`
    pub fn to_json_string(&self) -> String {
        // A Map of Values always serializes
        Value::Object(self.document.clone()).to_string()
    }
}

impl TryFrom<Value> for RoomPayload {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(document) = value else {
            return Err(Error::WrongRoomFormat("payload is not a JSON object".into()));
        };

        let name = NAME_FIELDS
            .iter()
            .find_map(|field| document.get(*field))
            .ok_or_else(|| Error::WrongRoomFormat("missing room name".into()))?;

        let name = match name {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::String(_) => return Err(Error::WrongRoomFormat("empty room name".into())),
            _ => return Err(Error::WrongRoomFormat("room name is not a string".into())),
        };

        Ok(Self { name, document })
    }
}

impl From<RoomPayload> for Value {
    fn from(payload: RoomPayload) -> Self {
        Value::Object(payload.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editor_format() {
        let payload = RoomPayload::parse(r#"{"data":[[1,2],[3,4]],"room":"tutorial"}"#).unwrap();
        assert_eq!(payload.name(), RoomName::from("tutorial"));
        assert!(payload.document().contains_key("data"));
    }

    #[test]
    fn test_parse_name_field() {
        let payload = RoomPayload::parse(r#"{"name":"arena","owner":"alice"}"#).unwrap();
        assert_eq!(payload.name(), RoomName::from("arena"));
    }

    #[test]
    fn test_room_field_wins() {
        let payload = RoomPayload::parse(r#"{"name":"other","room":"arena"}"#).unwrap();
        assert_eq!(payload.name().as_str(), "arena");
    }

    #[test]
    fn test_wrong_formats() {
        for text in [
            "not json",
            "[1, 2, 3]",
            r#"{"data":[]}"#,
            r#"{"room":""}"#,
            r#"{"room":42}"#,
        ] {
            assert!(
                matches!(RoomPayload::parse(text), Err(Error::WrongRoomFormat(_))),
                "accepted {text}"
            );
        }
    }

    #[test]
    fn test_json_text_preserves_document() {
        let payload = RoomPayload::parse(r#"{"room":"arena","data":[1]}"#).unwrap();
        let again = RoomPayload::parse(&payload.to_json_string()).unwrap();
        assert_eq!(payload, again);
    }
}
