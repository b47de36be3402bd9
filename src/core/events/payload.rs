//! Raw webhook body shapes as the provider sends them.
//!
//! Every field is optional and unknown fields are ignored, so newer provider
//! payloads keep deserializing. Query-string deliveries arrive with every value
//! as a string, so numeric fields accept either form.

use serde::{Deserialize, Deserializer};

/// Timestamp as delivered: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// A call endpoint, either a bare number or a typed endpoint object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawEndpoint {
    Number(String),
    Typed {
        #[serde(default)]
        number: Option<String>,
        #[serde(default)]
        uri: Option<String>,
        #[serde(default)]
        user: Option<String>,
    },
}

impl RawEndpoint {
    pub fn leg(&self) -> Option<String> {
        match self {
            RawEndpoint::Number(n) => Some(n.clone()),
            RawEndpoint::Typed { number, uri, user } => {
                number.clone().or_else(|| uri.clone()).or_else(|| user.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawDtmf {
    pub digits: Option<String>,
    pub timed_out: Option<bool>,
}

/// Union of the fields carried by answer, event, recording, dtmf and error webhooks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawWebhook {
    #[serde(alias = "call_uuid")]
    pub uuid: Option<String>,
    #[serde(alias = "conversation_id")]
    pub conversation_uuid: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    #[serde(alias = "seq", deserialize_with = "lenient_u64")]
    pub sequence: Option<u64>,
    #[serde(alias = "event_uuid")]
    pub event_id: Option<String>,
    pub status: Option<String>,
    pub direction: Option<String>,
    pub from: Option<RawEndpoint>,
    pub to: Option<RawEndpoint>,
    pub recording_uuid: Option<String>,
    pub recording_url: Option<String>,
    pub dtmf: Option<RawDtmf>,
    pub digits: Option<String>,
    #[serde(alias = "message", alias = "error")]
    pub reason: Option<String>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(u64),
        Text(String),
    }

    match Option::<NumOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrText::Num(n)) => Ok(Some(n)),
        Some(NumOrText::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid sequence number '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw: RawWebhook = serde_json::from_value(json!({
            "uuid": "c1",
            "timestamp": "2024-05-01T10:00:00Z",
            "rate": "0.0127",
            "network": "US-FIXED"
        }))
        .unwrap();
        assert_eq!(raw.uuid.as_deref(), Some("c1"));
    }

    #[test]
    fn test_sequence_from_string_or_number() {
        let a: RawWebhook = serde_json::from_value(json!({"seq": "7"})).unwrap();
        let b: RawWebhook = serde_json::from_value(json!({"sequence": 7})).unwrap();
        assert_eq!(a.sequence, Some(7));
        assert_eq!(b.sequence, Some(7));
        assert!(serde_json::from_value::<RawWebhook>(json!({"seq": "seven"})).is_err());
    }

    #[test]
    fn test_endpoint_shapes() {
        let raw: RawWebhook = serde_json::from_value(json!({
            "from": "14155550100",
            "to": {"type": "phone", "number": "14155550199"}
        }))
        .unwrap();
        assert_eq!(raw.from.unwrap().leg().as_deref(), Some("14155550100"));
        assert_eq!(raw.to.unwrap().leg().as_deref(), Some("14155550199"));
    }
}
