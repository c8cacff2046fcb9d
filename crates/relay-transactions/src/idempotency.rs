//! Idempotency resolution for repeated submissions.
//!
//! Given an existing transaction and an incoming request with the same
//! id, decide whether the request is a legitimate retry of the same
//! operation or a different operation colliding on the id.
//!
//! The similarity score divides matching non-critical fields by a total
//! that counts both existing non-critical, non-ignored keys and keys
//! that appear only in the request. Single-field drift between retries
//! (a client IP, a device id) must not read as a conflict; a changed
//! amount must, regardless of how similar the rest looks.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Classification of an incoming request against an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// Same operation; treat the request as a retry.
    Same,
    /// Different operation colliding on the id; reject.
    Conflict,
}

/// Configurable payload comparator.
#[derive(Debug, Clone)]
pub struct IdempotencyResolver {
    /// Fields that must match exactly; dotted paths descend into
    /// nested objects.
    critical_fields: Vec<String>,
    /// Fields dropped from both sides before similarity scoring.
    ignored_fields: HashSet<String>,
    /// Minimum similarity percentage for `Same`.
    similarity_threshold: u32,
}

/// Absolute tolerance for numeric leaf comparison.
const NUMERIC_EPSILON: f64 = 1e-4;

impl Default for IdempotencyResolver {
    fn default() -> Self {
        Self {
            critical_fields: ["amount", "accountNumber", "description", "reference"]
                .map(String::from)
                .to_vec(),
            ignored_fields: ["timestamp", "clientIp", "deviceId"]
                .map(String::from)
                .into_iter()
                .collect(),
            similarity_threshold: 80,
        }
    }
}

impl IdempotencyResolver {
    #[must_use]
    pub fn new(
        critical_fields: Vec<String>,
        ignored_fields: Vec<String>,
        similarity_threshold: u32,
    ) -> Self {
        Self {
            critical_fields,
            ignored_fields: ignored_fields.into_iter().collect(),
            similarity_threshold,
        }
    }

    /// Classify a request against the stored transaction.
    #[must_use]
    pub fn classify(
        &self,
        transaction_id: Uuid,
        existing_origin: &str,
        existing_payload: &Value,
        request_origin: &str,
        request_payload: &Value,
    ) -> IdempotencyOutcome {
        if existing_origin != request_origin {
            warn!(
                transaction_id = %transaction_id,
                existing_origin,
                request_origin,
                "Idempotency check failed: origin system mismatch"
            );
            return IdempotencyOutcome::Conflict;
        }

        let (Some(existing), Some(request)) =
            (existing_payload.as_object(), request_payload.as_object())
        else {
            // Non-object payloads compare structurally.
            return if existing_payload == request_payload {
                IdempotencyOutcome::Same
            } else {
                IdempotencyOutcome::Conflict
            };
        };

        for field in &self.critical_fields {
            if !field_values_equal(existing_payload, request_payload, field) {
                warn!(
                    transaction_id = %transaction_id,
                    field = %field,
                    "Idempotency check failed: critical field differs"
                );
                return IdempotencyOutcome::Conflict;
            }
        }

        let mut total_fields = 0u32;
        let mut matching_fields = 0u32;

        for key in existing.keys() {
            if self.ignored_fields.contains(key) || self.critical_fields.contains(key) {
                continue;
            }
            total_fields += 1;
            if field_values_equal(existing_payload, request_payload, key) {
                matching_fields += 1;
            }
        }

        // Keys present only in the request still widen the denominator.
        for key in request.keys() {
            if !existing.contains_key(key) && !self.ignored_fields.contains(key) {
                total_fields += 1;
            }
        }

        let similarity = if total_fields > 0 {
            matching_fields * 100 / total_fields
        } else {
            100
        };

        if similarity >= self.similarity_threshold {
            IdempotencyOutcome::Same
        } else {
            warn!(
                transaction_id = %transaction_id,
                similarity,
                threshold = self.similarity_threshold,
                "Idempotency check failed: similarity below threshold"
            );
            IdempotencyOutcome::Conflict
        }
    }
}

/// Compare one field across two payloads, descending dotted paths and
/// comparing numeric leaves within `NUMERIC_EPSILON`.
fn field_values_equal(a: &Value, b: &Value, field: &str) -> bool {
    if let Some((head, rest)) = field.split_once('.') {
        let sub_a = a.get(head);
        let sub_b = b.get(head);
        return match (sub_a, sub_b) {
            (Some(va), Some(vb)) if va.is_object() && vb.is_object() => {
                field_values_equal(va, vb, rest)
            }
            _ => sub_a == sub_b,
        };
    }

    let va = a.get(field);
    let vb = b.get(field);

    if let (Some(na), Some(nb)) = (va.and_then(Value::as_f64), vb.and_then(Value::as_f64)) {
        return (na - nb).abs() < NUMERIC_EPSILON;
    }

    va == vb
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> IdempotencyResolver {
        IdempotencyResolver::default()
    }

    fn classify(resolver: &IdempotencyResolver, existing: Value, request: Value) -> IdempotencyOutcome {
        resolver.classify(Uuid::nil(), "billing", &existing, "billing", &request)
    }

    #[test]
    fn test_identical_payload_is_same() {
        let payload = json!({"amount": 100, "reference": "r1", "channel": "web"});
        assert_eq!(
            classify(&resolver(), payload.clone(), payload),
            IdempotencyOutcome::Same
        );
    }

    #[test]
    fn test_origin_mismatch_is_conflict() {
        let payload = json!({"amount": 100});
        let outcome = resolver().classify(Uuid::nil(), "billing", &payload, "cards", &payload);
        assert_eq!(outcome, IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_changed_critical_field_is_conflict() {
        let existing = json!({"amount": 100, "reference": "r1"});
        let request = json!({"amount": 200, "reference": "r1"});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_ignored_field_drift_is_same() {
        let existing = json!({"amount": 100, "clientIp": "10.0.0.1", "timestamp": 1});
        let request = json!({"amount": 100, "clientIp": "10.0.0.9", "timestamp": 2});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Same);
    }

    #[test]
    fn test_numeric_tolerance() {
        let existing = json!({"amount": 100.00001});
        let request = json!({"amount": 100.00002});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Same);

        let request = json!({"amount": 100.01});
        let existing = json!({"amount": 100.00001});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_nested_critical_path() {
        let r = IdempotencyResolver::new(
            vec!["details.amount".to_string()],
            vec![],
            80,
        );
        let existing = json!({"details": {"amount": 50}});
        let same = json!({"details": {"amount": 50}});
        let changed = json!({"details": {"amount": 51}});
        assert_eq!(classify(&r, existing.clone(), same), IdempotencyOutcome::Same);
        assert_eq!(classify(&r, existing, changed), IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_similarity_below_threshold_is_conflict() {
        // Five non-critical fields, four changed: 1/5 = 20% < 80%.
        let existing = json!({
            "amount": 100,
            "a": 1, "b": 2, "c": 3, "d": 4, "e": 5
        });
        let request = json!({
            "amount": 100,
            "a": 9, "b": 9, "c": 9, "d": 9, "e": 5
        });
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_new_keys_widen_denominator() {
        // One matching existing field plus four request-only keys:
        // 1/5 = 20% < 80%.
        let existing = json!({"amount": 100, "a": 1});
        let request = json!({"amount": 100, "a": 1, "w": 1, "x": 2, "y": 3, "z": 4});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Conflict);
    }

    #[test]
    fn test_no_comparable_fields_is_same() {
        let existing = json!({"amount": 100});
        let request = json!({"amount": 100});
        assert_eq!(classify(&resolver(), existing, request), IdempotencyOutcome::Same);
    }

    #[test]
    fn test_non_object_payloads_compare_structurally() {
        assert_eq!(
            classify(&resolver(), json!(null), json!(null)),
            IdempotencyOutcome::Same
        );
        assert_eq!(
            classify(&resolver(), json!(null), json!({"amount": 1})),
            IdempotencyOutcome::Conflict
        );
    }
}
