//! Text scrubbing for artifacts headed to renderers that choke on control
//! characters.

use serde_json::Value;

use crate::artifact::Artifact;

/// C0 controls, DEL and C1 controls
#[inline]
fn is_stripped(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}'..='\u{9F}')
}

/// Remove control characters, then trim surrounding whitespace.
///
/// Newlines and tabs are control characters too and go with the rest.
pub fn clean_text(input: &str) -> String {
    let cleaned: String = input.chars().filter(|c| !is_stripped(*c)).collect();
    cleaned.trim().to_string()
}

/// Clean every string value reachable from the artifact's fields.
///
/// `id` and `created_at` are left alone.
pub fn scrub_artifact(artifact: &mut Artifact) {
    for value in artifact.fields.values_mut() {
        scrub_value(value);
    }
}

fn scrub_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.chars().any(is_stripped) || s.trim().len() != s.len() {
                *s = clean_text(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(scrub_value),
        Value::Object(map) => map.values_mut().for_each(scrub_value),
        _ => {}
    }
}
