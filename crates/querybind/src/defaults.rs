//! Default-value generation for fields that carry a generator.

use crate::coerce::DATETIME_FORMAT;
use chrono::Local;
use querybind_core::{DefaultValue, Value};
use rand::Rng;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LENGTH: usize = 21;

/// Produce a value for a field whose default the caller did not supply.
pub fn generate(default: &DefaultValue) -> Value {
    match default {
        DefaultValue::Literal(value) => value.clone(),
        DefaultValue::Now => Value::Text(now()),
        DefaultValue::Uuid => Value::Text(uuid::Uuid::new_v4().to_string()),
        DefaultValue::Cuid => Value::Text(random_id()),
    }
}

/// Call-time timestamp in storage format.
pub fn now() -> String {
    Local::now().format(DATETIME_FORMAT).to_string()
}

/// 21-character random identifier over a lowercase base-36 alphabet.
fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
