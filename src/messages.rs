//! Pending-message support: the RCC queues notifications ("AUX1 relay
//! activated", ...) that can be read one by one through the MESSAGE object
//! type. The catalog mapping message numbers to human strings ships as a
//! JSON file.

use serde::Deserialize;
use serde_json::Value;

use crate::constants::XcomLevel;
use crate::data::MessageRsp;
use crate::error::{XcomError, XcomResult};

/// One message definition from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XcomMessageDef {
    pub level: XcomLevel,
    pub number: u16,
    pub string: String,
}

#[derive(Debug, Deserialize)]
struct RawMessageDef {
    lvl: Option<Value>,
    nr: Option<Value>,
    msg: Option<String>,
}

impl RawMessageDef {
    fn into_def(self) -> Option<XcomMessageDef> {
        let lvl = self.lvl?;
        let number = self.nr?.as_u64()?;
        let string = self.msg?;

        let level = match &lvl {
            Value::String(s) => s.parse().ok()?,
            // some catalog revisions carry the raw numeric level
            Value::Number(n) if n.as_u64() == Some(1) => XcomLevel::Info,
            _ => return None,
        };

        Some(XcomMessageDef {
            level,
            number: number as u16,
            string: string.trim().to_string(),
        })
    }
}

/// The loaded message catalog
#[derive(Debug, Clone)]
pub struct XcomMessageSet {
    messages: Vec<XcomMessageDef>,
}

impl XcomMessageSet {
    pub fn from_json(text: &str) -> XcomResult<Self> {
        let raw: Vec<RawMessageDef> = serde_json::from_str(text)
            .map_err(|e| XcomError::configuration(format!("Invalid message catalog: {e}")))?;

        Ok(XcomMessageSet {
            messages: raw.into_iter().filter_map(RawMessageDef::into_def).collect(),
        })
    }

    pub async fn load(path: &str) -> XcomResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| XcomError::configuration(format!("Cannot read {path}: {e}")))?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get_by_nr(&self, nr: u16) -> XcomResult<&XcomMessageDef> {
        self.messages
            .iter()
            .find(|m| m.number == nr)
            .ok_or_else(|| XcomError::not_found(format!("Unknown message nr {nr}")))
    }

    pub fn string_by_nr(&self, nr: u16) -> XcomResult<String> {
        Ok(self.get_by_nr(nr)?.string.clone())
    }
}

/// A decoded pending message, with its number resolved against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XcomMessage {
    /// Number of messages still pending on the RCC
    pub message_total: u32,
    pub message_number: u16,
    /// Bus address of the device that raised the message
    pub source_address: u32,
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    pub value: i32,
    /// Human-readable message text; a fallback string for unknown numbers
    pub message_string: String,
}

impl XcomMessage {
    /// Combine a wire response with the catalog. Unknown message numbers
    /// render a fallback string, never fail.
    pub fn from_response(rsp: MessageRsp, catalog: Option<&XcomMessageSet>) -> Self {
        let message_string = catalog
            .and_then(|c| c.string_by_nr(rsp.message_number).ok())
            .unwrap_or_else(|| format!("({}): unknown message", rsp.message_number));

        XcomMessage {
            message_total: rsp.message_total,
            message_number: rsp.message_number,
            source_address: rsp.source_address,
            timestamp: rsp.timestamp,
            value: rsp.value,
            message_string,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"lvl": "INFO", "nr": 0, "msg": "Warning (000): Battery low"},
        {"lvl": "INFO", "nr": 1, "msg": "Warning (001): Battery too high "},
        {"lvl": "INFO", "msg": "broken entry without nr"}
    ]"#;

    fn response(number: u16) -> MessageRsp {
        MessageRsp {
            message_total: 10,
            message_number: number,
            source_address: 101,
            timestamp: 1_700_000_000,
            value: 1234,
        }
    }

    #[test]
    fn test_catalog_parse_and_lookup() {
        let set = XcomMessageSet::from_json(CATALOG).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.string_by_nr(1).unwrap(), "Warning (001): Battery too high");
        assert!(set.get_by_nr(99).is_err());
    }

    #[test]
    fn test_message_resolution() {
        let set = XcomMessageSet::from_json(CATALOG).unwrap();

        let msg = XcomMessage::from_response(response(0), Some(&set));
        assert_eq!(msg.message_total, 10);
        assert_eq!(msg.source_address, 101);
        assert_eq!(msg.value, 1234);
        assert_eq!(msg.message_string, "Warning (000): Battery low");

        // unknown numbers and a missing catalog fall back, never fail
        let msg = XcomMessage::from_response(response(77), Some(&set));
        assert_eq!(msg.message_string, "(77): unknown message");
        let msg = XcomMessage::from_response(response(0), None);
        assert_eq!(msg.message_string, "(0): unknown message");
    }
}
