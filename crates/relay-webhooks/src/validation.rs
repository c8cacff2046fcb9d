//! Callback URL and event-set validation.

use url::Url;

use relay_core::EventType;

use crate::error::WebhookError;

/// Validate a webhook callback URL: HTTPS only, a plausible host, no
/// loopback targets.
pub fn validate_callback_url(raw: &str) -> Result<(), WebhookError> {
    if raw.trim().is_empty() {
        return Err(WebhookError::InvalidUrl("Webhook URL cannot be empty".into()));
    }

    let parsed = Url::parse(raw)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    if parsed.scheme() != "https" {
        return Err(WebhookError::InvalidUrl(
            "Webhook URL must use HTTPS".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("Webhook URL must have a host".into()))?;

    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower == "127.0.0.1" || lower == "::1" || lower == "[::1]" {
        return Err(WebhookError::InvalidUrl(
            "Webhook URL cannot point to loopback".to_string(),
        ));
    }

    // Host charset mirrors the accepted registration grammar.
    if !lower
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(WebhookError::InvalidUrl(format!(
            "Webhook URL host contains invalid characters: {host}"
        )));
    }

    Ok(())
}

/// Validate that the event set is non-empty and every name is a known
/// event type.
pub fn validate_event_types(event_types: &[String]) -> Result<(), WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "Event set cannot be empty".to_string(),
        ));
    }
    for name in event_types {
        if EventType::parse(name).is_none() {
            return Err(WebhookError::Validation(format!(
                "Unknown event type: {name}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_https_url() {
        assert!(validate_callback_url("https://example.com/webhooks").is_ok());
        assert!(validate_callback_url("https://hooks.example.com:8443/cb?x=1").is_ok());
    }

    #[test]
    fn test_http_rejected() {
        assert!(matches!(
            validate_callback_url("http://example.com/webhooks"),
            Err(WebhookError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_loopback_rejected() {
        assert!(validate_callback_url("https://localhost/hook").is_err());
        assert!(validate_callback_url("https://127.0.0.1/hook").is_err());
        assert!(validate_callback_url("https://[::1]/hook").is_err());
    }

    #[test]
    fn test_empty_and_garbage_rejected() {
        assert!(validate_callback_url("").is_err());
        assert!(validate_callback_url("   ").is_err());
        assert!(validate_callback_url("not a url").is_err());
        assert!(validate_callback_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_event_set_must_be_non_empty() {
        assert!(validate_event_types(&[]).is_err());
    }

    #[test]
    fn test_known_event_types_accepted() {
        let names: Vec<String> = EventType::all().iter().map(|e| e.as_str().into()).collect();
        assert!(validate_event_types(&names).is_ok());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = validate_event_types(&["TransactionExploded".into()]).unwrap_err();
        assert!(err.to_string().contains("TransactionExploded"));
    }
}
