//! FIX tag parsing and raw-message normalisation.
//!
//! A FIX payload is a sequence of `tag=value` fields delimited by the SOH
//! byte (`0x01`). The gateway treats payloads as opaque beyond this tag
//! layer: it never maintains session state, it only reads the handful of
//! tags routing needs (8, 9, 35, 49, 54, 55, 56, 11, 38, 44).

use std::collections::HashMap;

use tracing::debug;

/// The SOH field delimiter.
pub const SOH: char = '\u{0001}';

// ── Tag numbers consumed by the gateway ─────────────────────────────

pub const TAG_BEGIN_STRING: u32 = 8;
pub const TAG_BODY_LENGTH: u32 = 9;
pub const TAG_CHECK_SUM: u32 = 10;
pub const TAG_CL_ORD_ID: u32 = 11;
pub const TAG_MSG_SEQ_NUM: u32 = 34;
pub const TAG_MSG_TYPE: u32 = 35;
pub const TAG_ORDER_QTY: u32 = 38;
pub const TAG_ORD_TYPE: u32 = 40;
pub const TAG_PRICE: u32 = 44;
pub const TAG_SENDER_COMP_ID: u32 = 49;
pub const TAG_SENDING_TIME: u32 = 52;
pub const TAG_SIDE: u32 = 54;
pub const TAG_SYMBOL: u32 = 55;
pub const TAG_TARGET_COMP_ID: u32 = 56;
pub const TAG_TIME_IN_FORCE: u32 = 59;

/// Symbolic name for a FIX tag, when one is known.
///
/// The table covers the tags the gateway and its partition expressions
/// care about; everything else falls back to `Tag<N>` naming.
pub fn tag_name(tag: u32) -> Option<&'static str> {
    match tag {
        TAG_BEGIN_STRING => Some("BeginString"),
        TAG_BODY_LENGTH => Some("BodyLength"),
        TAG_CHECK_SUM => Some("CheckSum"),
        TAG_CL_ORD_ID => Some("ClOrdID"),
        TAG_MSG_SEQ_NUM => Some("MsgSeqNum"),
        TAG_MSG_TYPE => Some("MsgType"),
        TAG_ORDER_QTY => Some("OrderQty"),
        TAG_ORD_TYPE => Some("OrdType"),
        TAG_PRICE => Some("Price"),
        TAG_SENDER_COMP_ID => Some("SenderCompID"),
        TAG_SENDING_TIME => Some("SendingTime"),
        TAG_SIDE => Some("Side"),
        TAG_SYMBOL => Some("Symbol"),
        TAG_TARGET_COMP_ID => Some("TargetCompID"),
        TAG_TIME_IN_FORCE => Some("TimeInForce"),
        _ => None,
    }
}

/// Split a FIX payload on SOH into a tag → value map.
///
/// Malformed fields (no `=`, non-numeric tag) are silently skipped.
/// Repeated tags keep the last value; the duplication is flagged at
/// debug level.
pub fn parse_tags(raw: &str) -> HashMap<u32, String> {
    let mut tags = HashMap::new();
    for field in raw.split(SOH) {
        if field.is_empty() {
            continue;
        }
        let Some((tag, value)) = field.split_once('=') else {
            continue;
        };
        let Ok(tag) = tag.parse::<u32>() else {
            continue;
        };
        if let Some(previous) = tags.insert(tag, value.to_string()) {
            debug!(tag, previous = %previous, "duplicate FIX tag, last value wins");
        }
    }
    tags
}

/// Append a trailing SOH iff the payload is non-empty and lacks one.
pub fn ensure_trailing_soh(raw: &str) -> String {
    if raw.is_empty() || raw.ends_with(SOH) {
        raw.to_string()
    } else {
        let mut out = String::with_capacity(raw.len() + 1);
        out.push_str(raw);
        out.push(SOH);
        out
    }
}

/// Replace literal six-character `\uXXXX` sequences with their code point.
///
/// A malformed escape (short input, bad hex, invalid code point) keeps the
/// backslash in place and scanning continues after it.
pub fn unescape_unicode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail
            .as_bytes()
            .get(1)
            .filter(|&&b| b == b'u')
            .and_then(|_| tail.get(2..6))
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[6..];
            }
            None => {
                out.push('\\');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Normalise an inbound raw payload: unescape, then guarantee trailing SOH.
pub fn process_raw_message(raw: &str) -> String {
    ensure_trailing_soh(&unescape_unicode(raw))
}

/// A payload is considered FIX iff it starts with `8=FIX` and has at
/// least one SOH delimiter.
pub fn is_valid(raw: &str) -> bool {
    raw.starts_with("8=FIX") && raw.contains(SOH)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str =
        "8=FIX.4.4\u{1}9=100\u{1}35=D\u{1}49=GTWY\u{1}56=EXEC\u{1}55=AAPL\u{1}11=ORDER123\u{1}10=000\u{1}";

    #[test]
    fn parse_new_order_single() {
        let tags = parse_tags(ORDER);
        assert_eq!(tags.len(), 8);
        assert_eq!(tags[&8], "FIX.4.4");
        assert_eq!(tags[&9], "100");
        assert_eq!(tags[&35], "D");
        assert_eq!(tags[&49], "GTWY");
        assert_eq!(tags[&56], "EXEC");
        assert_eq!(tags[&55], "AAPL");
        assert_eq!(tags[&11], "ORDER123");
        assert_eq!(tags[&10], "000");
    }

    #[test]
    fn parse_skips_malformed_fields() {
        let raw = "8=FIX.4.4\u{1}nonsense\u{1}abc=def\u{1}35=D\u{1}";
        let tags = parse_tags(raw);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[&35], "D");
    }

    #[test]
    fn parse_duplicate_tag_last_wins() {
        let raw = "35=D\u{1}35=8\u{1}";
        assert_eq!(parse_tags(raw)[&35], "8");
    }

    #[test]
    fn parse_empty_value_kept() {
        let tags = parse_tags("58=\u{1}");
        assert_eq!(tags[&58], "");
    }

    #[test]
    fn parse_round_trip_with_trailing_soh() {
        // Normalising the terminator never changes the parsed mapping.
        let without = ORDER.trim_end_matches(SOH);
        assert_eq!(parse_tags(&ensure_trailing_soh(without)), parse_tags(without));
        assert!(parse_tags(without).contains_key(&35));
    }

    #[test]
    fn trailing_soh_appended_once() {
        assert_eq!(ensure_trailing_soh("35=D"), "35=D\u{1}");
        assert_eq!(ensure_trailing_soh("35=D\u{1}"), "35=D\u{1}");
        assert_eq!(ensure_trailing_soh(""), "");
    }

    #[test]
    fn trailing_soh_idempotent() {
        let x = "8=FIX.4.4\u{1}35=D";
        assert_eq!(
            ensure_trailing_soh(&ensure_trailing_soh(x)),
            ensure_trailing_soh(x)
        );
        assert_eq!(
            process_raw_message(&process_raw_message(x)),
            process_raw_message(x)
        );
    }

    #[test]
    fn unescape_basic() {
        assert_eq!(unescape_unicode("AAPL\\u0041"), "AAPLA");
        assert_eq!(unescape_unicode("\\u00e9clair"), "éclair");
    }

    #[test]
    fn unescape_malformed_keeps_backslash() {
        assert_eq!(unescape_unicode("\\uZZZZ"), "\\uZZZZ");
        assert_eq!(unescape_unicode("tail\\u00"), "tail\\u00");
        assert_eq!(unescape_unicode("just\\here"), "just\\here");
    }

    #[test]
    fn unescape_soh_escape() {
        assert_eq!(unescape_unicode("35=D\\u0001"), "35=D\u{1}");
    }

    #[test]
    fn process_raw_unescapes_then_terminates() {
        assert_eq!(process_raw_message("35=D\\u000149=GTWY"), "35=D\u{1}49=GTWY\u{1}");
    }

    #[test]
    fn validity_check() {
        assert!(is_valid(ORDER));
        assert!(!is_valid("9=100\u{1}35=D\u{1}"));
        assert!(!is_valid("8=FIX.4.4 no delimiter"));
        assert!(!is_valid(""));
    }

    #[test]
    fn tag_names_cover_glossary() {
        assert_eq!(tag_name(8), Some("BeginString"));
        assert_eq!(tag_name(35), Some("MsgType"));
        assert_eq!(tag_name(59), Some("TimeInForce"));
        assert_eq!(tag_name(9999), None);
    }
}
