pub mod validation;
pub use validation::{
    normalize_e164, validate_call_id, validate_dtmf, validate_http_url, validate_id,
    validate_speak_text,
};
