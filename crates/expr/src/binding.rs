//! Binds an envelope and its tag map into an evaluation [`Context`].

use std::collections::HashMap;

use fixgate_core::{fix, FixEnvelope};

use crate::eval::Context;
use crate::value::Value;

fn opt(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Str(s.clone()),
        None => Value::Null,
    }
}

/// Build the variable bindings for one evaluation.
///
/// In scope: every envelope field under its JSON name, the whole
/// `envelope` object, the symbolic name of every parsed tag (`Symbol`,
/// `MsgType`, ...) with a `Tag<N>` fallback, `Tag<N>` for every tag
/// regardless, and the `parsedTags` map itself. When the envelope carries
/// its own non-empty tag map it wins over the explicitly supplied one.
pub fn envelope_context(envelope: &FixEnvelope, tags: &HashMap<u32, String>) -> Context {
    let effective = if !envelope.parsed_tags.is_empty() {
        &envelope.parsed_tags
    } else {
        tags
    };

    let mut ctx = Context::new();

    let fields = [
        ("sessionId", Value::Str(envelope.session_id.clone())),
        ("senderCompId", Value::Str(envelope.sender_comp_id.clone())),
        ("targetCompId", Value::Str(envelope.target_comp_id.clone())),
        ("msgType", Value::Str(envelope.msg_type.clone())),
        ("clOrdID", opt(&envelope.cl_ord_id)),
        ("symbol", opt(&envelope.symbol)),
        ("side", opt(&envelope.side)),
        ("orderQty", opt(&envelope.order_qty)),
        ("price", opt(&envelope.price)),
        ("rawMessage", Value::Str(envelope.raw_message.clone())),
        (
            "createdTimestamp",
            Value::Str(envelope.created_timestamp.to_rfc3339()),
        ),
    ];

    let mut object = HashMap::with_capacity(fields.len());
    for (name, value) in fields {
        object.insert(name.to_string(), value.clone());
        ctx.set(name, value);
    }
    ctx.set("envelope", Value::Object(object));

    let mut tag_map = HashMap::with_capacity(effective.len());
    for (&tag, raw) in effective {
        let value = Value::Str(raw.clone());
        if let Some(name) = fix::tag_name(tag) {
            ctx.set(name, value.clone());
        }
        ctx.set(format!("Tag{tag}"), value.clone());
        tag_map.insert(tag.to_string(), value);
    }
    ctx.set("parsedTags", Value::Object(tag_map));

    ctx
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    #[test]
    fn binds_envelope_fields_and_tags() {
        let env = FixEnvelope::from_raw("GTWY", "EXEC", ORDER);
        let ctx = envelope_context(&env, &HashMap::new());

        assert_eq!(ctx.get("msgType"), Some(&Value::Str("D".into())));
        assert_eq!(ctx.get("Symbol"), Some(&Value::Str("AAPL".into())));
        assert_eq!(ctx.get("Tag55"), Some(&Value::Str("AAPL".into())));
        assert_eq!(ctx.get("SenderCompID"), Some(&Value::Str("GTWY".into())));
        assert_eq!(
            ctx.get("sessionId"),
            Some(&Value::Str("FIX.4.4:GTWY->EXEC".into()))
        );
    }

    #[test]
    fn unknown_tag_gets_fallback_name_only() {
        let env = FixEnvelope::from_raw("A", "B", "8=FIX.4.4\u{1}35=D\u{1}9999=x\u{1}");
        let ctx = envelope_context(&env, &HashMap::new());
        assert_eq!(ctx.get("Tag9999"), Some(&Value::Str("x".into())));
    }

    #[test]
    fn envelope_tags_win_over_explicit_map() {
        let env = FixEnvelope::from_raw("A", "B", "8=FIX.4.4\u{1}35=D\u{1}");
        let mut other = HashMap::new();
        other.insert(35, "8".to_string());

        let ctx = envelope_context(&env, &other);
        assert_eq!(ctx.get("MsgType"), Some(&Value::Str("D".into())));
    }

    #[test]
    fn explicit_map_used_when_envelope_has_none() {
        let env = FixEnvelope::default();
        let mut tags = HashMap::new();
        tags.insert(55, "MSFT".to_string());

        let ctx = envelope_context(&env, &tags);
        assert_eq!(ctx.get("Symbol"), Some(&Value::Str("MSFT".into())));
    }

    #[test]
    fn missing_optionals_bind_to_null() {
        let env = FixEnvelope::from_raw("A", "B", "8=FIX.4.4\u{1}35=0\u{1}");
        let ctx = envelope_context(&env, &HashMap::new());
        assert_eq!(ctx.get("symbol"), Some(&Value::Null));
        assert_eq!(ctx.get("clOrdID"), Some(&Value::Null));
    }
}
