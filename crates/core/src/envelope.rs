//! Canonical in-memory record for one FIX message in flight.
//!
//! Two wire encodings are accepted on ingress: a JSON object (preferred)
//! and a single-line `MessageEnvelope(key=value, ...)` text form kept for
//! older producers. Egress to the broker always emits JSON. The derived
//! order fields (`symbol`, `side`, `order_qty`, `price`) and the parsed
//! tag map are transient: rebuilt from `raw_message` after decode, never
//! serialised.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FixError;
use crate::fix::{self, parse_tags, process_raw_message};

/// One FIX message plus routing metadata, as carried through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixEnvelope {
    /// Session identity of the form `FIX.<v>:<sender>-><target>`.
    #[serde(default)]
    pub session_id: String,

    #[serde(default)]
    pub sender_comp_id: String,

    #[serde(default)]
    pub target_comp_id: String,

    /// FIX tag 35.
    #[serde(default)]
    pub msg_type: String,

    /// FIX tag 11.
    #[serde(rename = "clOrdID", default, skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,

    /// When the envelope was constructed; ISO-8601 UTC on the wire.
    #[serde(default = "Utc::now")]
    pub created_timestamp: DateTime<Utc>,

    /// The original FIX payload, SOH delimiters included.
    #[serde(default)]
    pub raw_message: String,

    // Derived order fields (tags 55/54/38/44) — rebuilt from
    // `raw_message`, never on the wire.
    #[serde(skip)]
    pub symbol: Option<String>,
    #[serde(skip)]
    pub side: Option<String>,
    #[serde(skip)]
    pub order_qty: Option<String>,
    #[serde(skip)]
    pub price: Option<String>,

    /// Full tag → value map of `raw_message`; not persisted to the broker.
    #[serde(skip)]
    pub parsed_tags: HashMap<u32, String>,

    // Dead-letter error fields, populated only when the envelope is
    // diverted to a dead-letter topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_route_id: Option<String>,
}

impl Default for FixEnvelope {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            sender_comp_id: String::new(),
            target_comp_id: String::new(),
            msg_type: String::new(),
            cl_ord_id: None,
            created_timestamp: Utc::now(),
            raw_message: String::new(),
            symbol: None,
            side: None,
            order_qty: None,
            price: None,
            parsed_tags: HashMap::new(),
            error_message: None,
            error_type: None,
            error_timestamp: None,
            error_route_id: None,
        }
    }
}

impl FixEnvelope {
    /// Build an envelope around a raw wire payload (output-side ingress).
    ///
    /// The session id takes the `FIX.4.4:<sender>-><target>` form and the
    /// payload is normalised and parsed immediately.
    pub fn from_raw(sender_comp_id: &str, target_comp_id: &str, raw: &str) -> Self {
        let mut envelope = Self {
            session_id: format!("FIX.4.4:{sender_comp_id}->{target_comp_id}"),
            sender_comp_id: sender_comp_id.to_string(),
            target_comp_id: target_comp_id.to_string(),
            raw_message: raw.to_string(),
            ..Self::default()
        };
        envelope.enrich_from_raw();
        envelope
    }

    /// Decode a broker payload: JSON preferred, text form accepted.
    pub fn decode(payload: &str) -> Result<Self, FixError> {
        match serde_json::from_str::<Self>(payload) {
            Ok(envelope) => Ok(envelope),
            Err(json_err) => {
                if payload.trim_start().starts_with("MessageEnvelope(") {
                    Self::from_text(payload)
                } else {
                    Err(FixError::Json(json_err))
                }
            }
        }
    }

    /// Decode the single-line `MessageEnvelope(k=v, ...)` text form.
    ///
    /// `rawMessage` is taken verbatim — a trailing SOH survives decoding.
    /// Unknown keys are ignored; an unparseable timestamp falls back to
    /// "now".
    pub fn from_text(line: &str) -> Result<Self, FixError> {
        let body = line
            .trim()
            .strip_prefix("MessageEnvelope(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| {
                FixError::TextForm("expected a MessageEnvelope(...) line".to_string())
            })?;

        let mut envelope = Self::default();
        for pair in body.split(", ") {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "sessionId" => envelope.session_id = non_null(value),
                "senderCompId" => envelope.sender_comp_id = non_null(value),
                "targetCompId" => envelope.target_comp_id = non_null(value),
                "msgType" => envelope.msg_type = non_null(value),
                "clOrdID" => envelope.cl_ord_id = opt_non_null(value),
                "createdTimestamp" => {
                    envelope.created_timestamp =
                        value.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
                            debug!(value, "unparseable envelope timestamp, using now");
                            Utc::now()
                        });
                }
                "rawMessage" => envelope.raw_message = value.to_string(),
                "errorMessage" => envelope.error_message = opt_non_null(value),
                "errorType" => envelope.error_type = opt_non_null(value),
                "errorRouteId" => envelope.error_route_id = opt_non_null(value),
                _ => {}
            }
        }
        Ok(envelope)
    }

    /// Serialise for the broker. Only JSON is ever emitted.
    pub fn to_json(&self) -> Result<String, FixError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Normalise `raw_message` and rebuild the derived fields from it.
    ///
    /// Typed header fields (`msg_type`, comp ids, `cl_ord_id`) are filled
    /// only when unset so a decoded envelope keeps what the producer said;
    /// the order fields and the tag map always reflect the payload.
    pub fn enrich_from_raw(&mut self) {
        if self.raw_message.is_empty() {
            return;
        }
        self.raw_message = process_raw_message(&self.raw_message);
        let tags = parse_tags(&self.raw_message);

        if self.msg_type.is_empty() {
            if let Some(value) = tags.get(&fix::TAG_MSG_TYPE) {
                self.msg_type = value.clone();
            }
        }
        if self.sender_comp_id.is_empty() {
            if let Some(value) = tags.get(&fix::TAG_SENDER_COMP_ID) {
                self.sender_comp_id = value.clone();
            }
        }
        if self.target_comp_id.is_empty() {
            if let Some(value) = tags.get(&fix::TAG_TARGET_COMP_ID) {
                self.target_comp_id = value.clone();
            }
        }
        if self.cl_ord_id.is_none() {
            self.cl_ord_id = tags.get(&fix::TAG_CL_ORD_ID).cloned();
        }
        self.symbol = tags.get(&fix::TAG_SYMBOL).cloned();
        self.side = tags.get(&fix::TAG_SIDE).cloned();
        self.order_qty = tags.get(&fix::TAG_ORDER_QTY).cloned();
        self.price = tags.get(&fix::TAG_PRICE).cloned();
        self.parsed_tags = tags;
    }

    /// Check the fields dispatch requires are present.
    pub fn ensure_routable(&self) -> Result<(), FixError> {
        if self.raw_message.is_empty() {
            return Err(FixError::InvalidPayload("empty rawMessage".to_string()));
        }
        if self.msg_type.is_empty() {
            return Err(FixError::InvalidPayload(
                "missing msgType (tag 35)".to_string(),
            ));
        }
        Ok(())
    }

    /// Stamp the dead-letter error fields.
    pub fn with_error(mut self, route_id: &str, error_type: &str, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self.error_type = Some(error_type.to_string());
        self.error_timestamp = Some(Utc::now());
        self.error_route_id = Some(route_id.to_string());
        self
    }
}

impl std::fmt::Display for FixEnvelope {
    /// The single-line text form. The counterpart of [`FixEnvelope::from_text`].
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MessageEnvelope(sessionId={}, senderCompId={}, targetCompId={}, msgType={}, \
             clOrdID={}, createdTimestamp={}, rawMessage={})",
            self.session_id,
            self.sender_comp_id,
            self.target_comp_id,
            self.msg_type,
            self.cl_ord_id.as_deref().unwrap_or("null"),
            self.created_timestamp.to_rfc3339(),
            self.raw_message,
        )
    }
}

fn non_null(value: &str) -> String {
    if value == "null" {
        String::new()
    } else {
        value.to_string()
    }
}

fn opt_non_null(value: &str) -> Option<String> {
    if value == "null" || value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    #[test]
    fn from_raw_derives_fields() {
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        assert_eq!(env.session_id, "FIX.4.4:GTWY->EXEC");
        assert_eq!(env.msg_type, "D");
        assert_eq!(env.symbol.as_deref(), Some("AAPL"));
        assert_eq!(env.cl_ord_id.as_deref(), Some("ORDER123"));
        assert_eq!(env.parsed_tags[&35], "D");
        assert!(env.raw_message.ends_with('\u{1}'));
    }

    #[test]
    fn json_round_trip_preserves_serialised_fields() {
        let mut env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let json = env.to_json().unwrap();

        // Transient fields never appear on the wire.
        assert!(!json.contains("parsedTags"));
        assert!(!json.contains("symbol"));
        assert!(!json.contains("orderQty"));
        assert!(json.contains("\"clOrdID\":\"ORDER123\""));

        let mut decoded = FixEnvelope::decode(&json).unwrap();
        assert!(decoded.parsed_tags.is_empty());
        decoded.enrich_from_raw();

        // Compare after rebuilding the transient fields on both sides.
        env.enrich_from_raw();
        assert_eq!(env, decoded);
    }

    #[test]
    fn decode_ignores_unknown_properties() {
        let json = r#"{"sessionId":"FIX.4.4:A->B","msgType":"D","rawMessage":"8=FIX.4.435=D","somethingElse":42}"#;
        let env = FixEnvelope::decode(&json).unwrap();
        assert_eq!(env.session_id, "FIX.4.4:A->B");
        assert_eq!(env.msg_type, "D");
    }

    #[test]
    fn decode_defaults_timestamp_to_now() {
        let before = Utc::now();
        let env = FixEnvelope::decode(r#"{"msgType":"D"}"#).unwrap();
        assert!(env.created_timestamp >= before);
    }

    #[test]
    fn text_form_round_trip() {
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let line = env.to_string();
        assert!(line.starts_with("MessageEnvelope("));

        let decoded = FixEnvelope::from_text(&line).unwrap();
        assert_eq!(decoded.session_id, env.session_id);
        assert_eq!(decoded.msg_type, env.msg_type);
        assert_eq!(decoded.cl_ord_id, env.cl_ord_id);
        // Verbatim raw message, trailing SOH intact.
        assert_eq!(decoded.raw_message, env.raw_message);
        assert!(decoded.raw_message.ends_with('\u{1}'));
    }

    #[test]
    fn text_form_bad_timestamp_falls_back_to_now() {
        let line =
            "MessageEnvelope(sessionId=FIX.4.4:A->B, msgType=D, createdTimestamp=yesterday, rawMessage=8=FIX.4.4\u{1}35=D\u{1})";
        let before = Utc::now();
        let env = FixEnvelope::from_text(line).unwrap();
        assert!(env.created_timestamp >= before);
        assert_eq!(env.msg_type, "D");
    }

    #[test]
    fn text_form_rejects_other_shapes() {
        assert!(FixEnvelope::from_text("not an envelope").is_err());
    }

    #[test]
    fn decode_prefers_json_then_text() {
        let json = r#"{"msgType":"8"}"#;
        assert_eq!(FixEnvelope::decode(json).unwrap().msg_type, "8");

        let text = "MessageEnvelope(sessionId=s, senderCompId=A, targetCompId=B, msgType=D, createdTimestamp=2024-03-01T09:30:00Z, rawMessage=8=FIX.4.4\u{1}35=D\u{1})";
        let env = FixEnvelope::decode(text).unwrap();
        assert_eq!(env.msg_type, "D");
        assert_eq!(
            env.created_timestamp,
            "2024-03-01T09:30:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn enrich_unescapes_literal_sequences() {
        let mut env = FixEnvelope {
            raw_message: "8=FIX.4.4\\u000135=D\\u000155=MSFT".to_string(),
            ..FixEnvelope::default()
        };
        env.enrich_from_raw();
        assert_eq!(env.msg_type, "D");
        assert_eq!(env.symbol.as_deref(), Some("MSFT"));
        assert!(env.raw_message.ends_with('\u{1}'));
    }

    #[test]
    fn enrich_keeps_producer_supplied_headers() {
        let mut env = FixEnvelope {
            msg_type: "8".to_string(),
            sender_comp_id: "OVERRIDE".to_string(),
            raw_message: ORDER.to_string(),
            ..FixEnvelope::default()
        };
        env.enrich_from_raw();
        assert_eq!(env.msg_type, "8");
        assert_eq!(env.sender_comp_id, "OVERRIDE");
        // Derived order fields still come from the payload.
        assert_eq!(env.symbol.as_deref(), Some("AAPL"));
    }

    #[test]
    fn routable_requires_payload_and_type() {
        let env = FixEnvelope::from_raw("A", "B", ORDER);
        assert!(env.ensure_routable().is_ok());

        let empty = FixEnvelope::default();
        assert!(empty.ensure_routable().is_err());
    }

    #[test]
    fn with_error_stamps_all_fields() {
        let env = FixEnvelope::from_raw("A", "B", ORDER)
            .with_error("R1", "NetworkError", "connection refused");
        assert_eq!(env.error_route_id.as_deref(), Some("R1"));
        assert_eq!(env.error_type.as_deref(), Some("NetworkError"));
        assert!(env.error_timestamp.is_some());

        let json = env.to_json().unwrap();
        assert!(json.contains("\"errorType\":\"NetworkError\""));
        assert!(json.contains("\"errorRouteId\":\"R1\""));
    }
}
