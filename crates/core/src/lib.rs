pub mod envelope;
pub mod error;
pub mod fix;

pub use envelope::FixEnvelope;
pub use error::FixError;
pub use fix::{
    ensure_trailing_soh, is_valid, parse_tags, process_raw_message, tag_name, unescape_unicode,
    SOH,
};
