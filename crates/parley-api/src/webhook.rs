use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use parley_types::api::IdentityEvent;

use crate::error::ApiError;
use crate::helpers::{now_ms, with_db};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Reject webhooks whose timestamp is more than this far from now, in
/// either direction.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Identity-provider webhook: user lifecycle events with an HMAC-SHA256
/// signed payload. `user.created` / `user.updated` upsert the user record
/// keyed by the provider's id; anything else is acknowledged and ignored.
pub async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let msg_id = header_str(&headers, "webhook-id")?;
    let timestamp = header_str(&headers, "webhook-timestamp")?;
    let signature = header_str(&headers, "webhook-signature")?;

    let now_secs = now_ms() / 1_000;
    if !verify_signature(&state.webhook_secret, msg_id, timestamp, signature, &body, now_secs) {
        warn!("Webhook signature verification failed for message {}", msg_id);
        return Err(ApiError::BadRequest("invalid webhook signature"));
    }

    let event: IdentityEvent = serde_json::from_str(&body)
        .map_err(|_| ApiError::BadRequest("malformed webhook payload"))?;

    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let profile = event.data;
            let now = now_ms();
            let user_id = with_db(&state, move |db| {
                db.upsert_user(&profile.id, &profile.name, &profile.email, &profile.avatar_url, now)
            })
            .await?;
            info!("Synced user {} from {} event", user_id, event.kind);
        }
        other => {
            info!("Ignoring identity event type {}", other);
        }
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "ok": true }))))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::BadRequest("missing webhook headers"))
}

/// Verify a svix-format signature: the signed content is
/// `{id}.{timestamp}.{body}`, the secret is `whsec_` + base64 key, and the
/// signature header holds space-separated `v1,<base64 mac>` candidates.
fn verify_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    signature_header: &str,
    body: &str,
    now_secs: i64,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_secs - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
        return false;
    }

    let key_b64 = secret.strip_prefix("whsec_").unwrap_or(secret);
    let Ok(key) = B64.decode(key_b64) else {
        return false;
    };

    let signed_content = format!("{msg_id}.{timestamp}.{body}");

    for candidate in signature_header.split(' ') {
        let Some(sig_b64) = candidate.strip_prefix("v1,") else {
            continue;
        };
        let Ok(sig) = B64.decode(sig_b64) else {
            continue;
        };

        // Mac::verify_slice is constant-time
        let mut mac = match HmacSha256::new_from_slice(&key) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(signed_content.as_bytes());
        if mac.verify_slice(&sig).is_ok() {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_C2FVsBQIhrscChlQIMV+b5sSYspob7oD";

    fn sign(secret: &str, msg_id: &str, timestamp: i64, body: &str) -> String {
        let key = B64.decode(secret.strip_prefix("whsec_").unwrap()).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{msg_id}.{timestamp}.{body}").as_bytes());
        format!("v1,{}", B64.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = r#"{"type":"user.created","data":{"id":"ext_1","name":"Ada"}}"#;
        let sig = sign(SECRET, "msg_1", 1_700_000_000, body);
        assert!(verify_signature(SECRET, "msg_1", "1700000000", &sig, body, 1_700_000_000));
    }

    #[test]
    fn test_second_candidate_accepted() {
        let body = "{}";
        let sig = sign(SECRET, "msg_1", 1_700_000_000, body);
        let header = format!("v1,AAAA {sig}");
        assert!(verify_signature(SECRET, "msg_1", "1700000000", &header, body, 1_700_000_000));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = "{}";
        let sig = sign("whsec_b3RoZXIta2V5LW90aGVyLWtleS0x", "msg_1", 1_700_000_000, body);
        assert!(!verify_signature(SECRET, "msg_1", "1700000000", &sig, body, 1_700_000_000));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign(SECRET, "msg_1", 1_700_000_000, r#"{"a":1}"#);
        assert!(!verify_signature(SECRET, "msg_1", "1700000000", &sig, r#"{"a":2}"#, 1_700_000_000));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = "{}";
        let sig = sign(SECRET, "msg_1", 1_700_000_000, body);
        // six minutes later
        assert!(!verify_signature(SECRET, "msg_1", "1700000000", &sig, body, 1_700_000_360));
    }

    #[test]
    fn test_garbage_header_rejected() {
        assert!(!verify_signature(SECRET, "msg_1", "not-a-number", "v1,AAAA", "{}", 0));
        assert!(!verify_signature(SECRET, "msg_1", "1700000000", "nonsense", "{}", 1_700_000_000));
    }
}
