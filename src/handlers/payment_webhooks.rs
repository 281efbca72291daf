use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::{errors::ServiceError, services::reconciliation::PaymentNotification, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Receives payment notifications from the provider.
///
/// The body is only used to learn which payment to look at; status, amount
/// and external reference are corroborated by fetching the payment from the
/// provider. After signature verification, every outcome — including
/// internal failures — is acknowledged with 200, because the provider
/// retries aggressively on error responses and duplicate side effects are
/// worse than a missed update.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment.webhook_secret.clone() {
        let ok = verify_signature(
            &headers,
            &body,
            &secret,
            state.config.payment.webhook_tolerance_secs,
        );
        if !ok {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    if let Err(e) = process_notification(&state, &body).await {
        // acknowledged anyway; surfaced to operators through the log only
        error!(error = %e, "payment webhook processing failed");
    }

    Ok(Json(json!({ "received": true })))
}

async fn process_notification(state: &AppState, body: &Bytes) -> Result<(), ServiceError> {
    let envelope: Value = serde_json::from_slice(body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let kind = envelope
        .get("type")
        .or_else(|| envelope.get("topic"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if kind != "payment" {
        info!(kind, "ignoring non-payment webhook");
        return Ok(());
    }

    let Some(payment_id) = payment_id_from(&envelope) else {
        warn!("payment webhook without a payment id");
        return Ok(());
    };

    // never trust the webhook body for status or amount
    let details = state
        .services
        .payment_provider
        .fetch_payment(&payment_id)
        .await?;

    let Some(external_reference) = details.external_reference.clone() else {
        warn!(payment_id = %details.id, "payment has no external reference, cannot correlate");
        return Ok(());
    };

    let notification = PaymentNotification {
        provider_payment_id: details.id,
        provider_status: details.status,
        external_reference,
        amount_cents: details.transaction_amount_cents,
        payer_email: details.payer_email,
        occurred_at: Utc::now(),
    };

    let outcome = state
        .services
        .reconciliation
        .reconcile(&notification)
        .await?;
    info!(?outcome, "payment notification reconciled");
    Ok(())
}

fn payment_id_from(envelope: &Value) -> Option<String> {
    let data_id = envelope.get("data").and_then(|d| d.get("id"));
    let id = data_id.or_else(|| envelope.get("resource_id"))?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Generic HMAC verification over `x-timestamp` and `x-signature` headers,
/// signing `"{timestamp}.{body}"`.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(secret: &str, body: &[u8], ts: i64) -> HeaderMap {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = Bytes::from_static(b"{\"type\":\"payment\"}");
        let headers = signed_headers("s3cret", &body, Utc::now().timestamp());
        assert!(verify_signature(&headers, &body, "s3cret", 300));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = Bytes::from_static(b"{}");
        let headers = signed_headers("s3cret", &body, Utc::now().timestamp());
        assert!(!verify_signature(&headers, &body, "other", 300));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = Bytes::from_static(b"{}");
        let headers = signed_headers("s3cret", &body, Utc::now().timestamp() - 3600);
        assert!(!verify_signature(&headers, &body, "s3cret", 300));
    }

    #[test]
    fn test_missing_headers_rejected() {
        let body = Bytes::from_static(b"{}");
        assert!(!verify_signature(&HeaderMap::new(), &body, "s3cret", 300));
    }

    #[test]
    fn test_payment_id_from_string_and_number() {
        let envelope: Value =
            serde_json::from_str(r#"{"type":"payment","data":{"id":"123"}}"#).unwrap();
        assert_eq!(payment_id_from(&envelope).as_deref(), Some("123"));

        let envelope: Value =
            serde_json::from_str(r#"{"type":"payment","data":{"id":456}}"#).unwrap();
        assert_eq!(payment_id_from(&envelope).as_deref(), Some("456"));

        let envelope: Value = serde_json::from_str(r#"{"type":"payment"}"#).unwrap();
        assert_eq!(payment_id_from(&envelope), None);
    }
}
