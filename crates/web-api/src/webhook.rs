//! Inbound alert webhook.
//!
//! Accepts `application/json` or `text/plain` bodies (alert providers send
//! both), so the body is taken raw and parsed manually. Response codes:
//! 400 malformed body, 422 schema violation, 401 secret mismatch, 200 with
//! the admission outcome otherwise; internal failures surface as 500 with
//! a structured error body.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use daytrader_core::EngineError;
use daytrader_engine::{Admission, ExitOverrides, IncomingAlert};

use crate::server::ApiState;

const ACTIONS: [&str; 3] = ["BUY_CALL", "BUY_PUT", "CLOSE"];

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    secret: String,
    ticker: String,
    action: String,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    #[allow(dead_code)]
    comment: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<i64>,
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn receive_webhook(State(state): State<ApiState>, raw_body: String) -> Response {
    tracing::info!(body = raw_body, "Webhook received");

    // 400: not JSON at all.
    let value: serde_json::Value = match serde_json::from_str(&raw_body) {
        Ok(value) => value,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, format!("invalid JSON: {err}")),
    };

    // 422: JSON that does not match the alert schema.
    let payload: WebhookPayload = match serde_json::from_value(value) {
        Ok(payload) => payload,
        Err(err) => {
            return error_body(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("schema violation: {err}"),
            )
        }
    };
    let action = payload.action.to_uppercase();
    if !ACTIONS.contains(&action.as_str()) {
        return error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("action must be one of {ACTIONS:?}"),
        );
    }

    let source = match payload.source.as_deref() {
        Some("manual_test") => "manual_test",
        Some("retake") => "retake",
        _ => "external",
    };
    let incoming = IncomingAlert {
        ticker: payload.ticker.clone(),
        action,
        price: payload.price,
        secret: Some(payload.secret.clone()),
        raw_payload: raw_body,
        source: source.to_string(),
        confluence: None,
        exit_overrides: ExitOverrides::default(),
        entry_atr: None,
    };

    match state.pipeline.process(incoming).await {
        Ok(Admission::Accepted { trade_id, message }) => {
            let status = if action_is_close(&payload.action) {
                "processed"
            } else {
                "accepted"
            };
            Json(WebhookResponse {
                status: status.to_string(),
                message,
                trade_id: Some(trade_id),
            })
            .into_response()
        }
        Ok(Admission::Rejected { message, .. }) => Json(WebhookResponse {
            status: "rejected".to_string(),
            message,
            trade_id: None,
        })
        .into_response(),
        Ok(Admission::Errored { message }) => Json(WebhookResponse {
            status: "rejected".to_string(),
            message,
            trade_id: None,
        })
        .into_response(),
        Err(err) => match err.downcast_ref::<EngineError>() {
            Some(EngineError::Auth) => {
                error_body(StatusCode::UNAUTHORIZED, "invalid webhook secret".to_string())
            }
            _ => {
                tracing::error!(%err, "Webhook processing failed");
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("error processing alert: {err}"),
                )
            }
        },
    }
}

fn action_is_close(action: &str) -> bool {
    action.eq_ignore_ascii_case("CLOSE")
}
