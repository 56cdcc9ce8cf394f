//! Serialize-then-deserialize discipline for boundary payloads.
//!
//! Anything posted across a context boundary must survive a structural
//! clone. A payload that fails to serialise degrades to `None` (posted as
//! null) so the receiving side always sees a well-formed message.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub fn sanitize<T: Serialize>(value: &T) -> Option<Value> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(err) => {
            warn!("payload failed structural clone, posting null: {err}");
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("payload failed structural clone, posting null: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn serializable_payloads_pass_through() {
        let value = sanitize(&serde_json::json!({"funnel_id": "f1"})).unwrap();
        assert_eq!(value["funnel_id"], "f1");
    }

    #[test]
    fn unserializable_payloads_degrade_to_null() {
        // Maps with non-string keys cannot cross the JSON boundary.
        let mut bad: HashMap<(u8, u8), &str> = HashMap::new();
        bad.insert((1, 2), "x");
        assert!(sanitize(&bad).is_none());
    }

    #[test]
    fn non_finite_numbers_degrade_to_null_fields() {
        // f64::NAN serialises as null under serde_json; the envelope still
        // arrives well-formed rather than aborting the send.
        let value = sanitize(&serde_json::json!({"score": f64::NAN}));
        assert!(value.is_some());
    }
}
