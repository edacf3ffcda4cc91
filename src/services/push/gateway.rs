use crate::common::error::{ApiError, ApiResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

static PUSH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Expo(nent)?PushToken\[[^\]]+\]$").expect("valid regex"));

/// Pure format check, no network call. The gateway only accepts tokens
/// of the form `ExponentPushToken[...]` or `ExpoPushToken[...]`.
pub fn is_expo_push_token(token: &str) -> bool {
    PUSH_TOKEN_RE.is_match(token)
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub priority: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushErrorCode {
    DeviceNotRegistered,
    MessageTooBig,
    MessageRateExceeded,
    InvalidCredentials,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushErrorDetails {
    #[serde(default)]
    pub error: Option<PushErrorCode>,
}

/// Synchronous acknowledgment for one submitted message. Order matches
/// the submitted message order within one gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicket {
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<PushErrorDetails>,
}

impl PushTicket {
    pub fn is_device_not_registered(&self) -> bool {
        self.status == DeliveryStatus::Error
            && self
                .details
                .as_ref()
                .and_then(|d| d.error)
                .map(|e| e == PushErrorCode::DeviceNotRegistered)
                .unwrap_or(false)
    }
}

/// Deferred delivery outcome for a previously ticketed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReceipt {
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<PushErrorDetails>,
}

impl PushReceipt {
    pub fn is_device_not_registered(&self) -> bool {
        self.status == DeliveryStatus::Error
            && self
                .details
                .as_ref()
                .and_then(|d| d.error)
                .map(|e| e == PushErrorCode::DeviceNotRegistered)
                .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct ReceiptsResponse {
    data: HashMap<String, PushReceipt>,
}

#[derive(Debug, Serialize)]
struct ReceiptsRequest<'a> {
    ids: &'a [String],
}

/// One gateway call. Callers are responsible for staying under the
/// gateway's documented per-call limits (see `PushConfig`).
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn submit(&self, messages: &[PushMessage]) -> ApiResult<Vec<PushTicket>>;

    async fn fetch_receipts(&self, ids: &[String]) -> ApiResult<HashMap<String, PushReceipt>>;
}

#[derive(Debug, Clone)]
pub struct ExpoPushGateway {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl ExpoPushGateway {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
            access_token,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json");

        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        builder
    }
}

#[async_trait]
impl PushTransport for ExpoPushGateway {
    async fn submit(&self, messages: &[PushMessage]) -> ApiResult<Vec<PushTicket>> {
        let response = self
            .request("/--/api/v2/push/send")
            .json(messages)
            .send()
            .await
            .map_err(|e| ApiError::internal(format!("Failed to reach push gateway: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Push gateway returned error: {} - {}", status, body);
            return Err(ApiError::internal(format!("Push gateway error: {}", status)));
        }

        let send_response: SendResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal(format!("Failed to parse gateway response: {}", e)))?;

        debug!("Push gateway accepted {} tickets", send_response.data.len());
        Ok(send_response.data)
    }

    async fn fetch_receipts(&self, ids: &[String]) -> ApiResult<HashMap<String, PushReceipt>> {
        let response = self
            .request("/--/api/v2/push/getReceipts")
            .json(&ReceiptsRequest { ids })
            .send()
            .await
            .map_err(|e| ApiError::internal(format!("Failed to reach push gateway: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Push gateway receipts error: {} - {}", status, body);
            return Err(ApiError::internal(format!("Push gateway error: {}", status)));
        }

        let receipts: ReceiptsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal(format!("Failed to parse receipts response: {}", e)))?;

        Ok(receipts.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_token_format_validator() {
        assert!(is_expo_push_token("ExponentPushToken[abc123]"));
        assert!(is_expo_push_token("ExpoPushToken[xyz-789]"));
        assert!(!is_expo_push_token("not-a-real-token"));
        assert!(!is_expo_push_token("ExponentPushToken[]"));
        assert!(!is_expo_push_token("ExponentPushToken[abc"));
        assert!(!is_expo_push_token("FcmToken[abc]"));
        assert!(!is_expo_push_token(""));
    }

    #[test]
    fn test_ticket_error_code_parsing() {
        let ticket: PushTicket = serde_json::from_value(json!({
            "status": "error",
            "message": "The recipient device is not registered",
            "details": {"error": "DeviceNotRegistered"}
        }))
        .unwrap();

        assert!(ticket.is_device_not_registered());

        let rate_limited: PushTicket = serde_json::from_value(json!({
            "status": "error",
            "details": {"error": "MessageRateExceeded"}
        }))
        .unwrap();

        assert!(!rate_limited.is_device_not_registered());

        let unknown: PushTicket = serde_json::from_value(json!({
            "status": "error",
            "details": {"error": "SomeFutureError"}
        }))
        .unwrap();

        assert_eq!(
            unknown.details.unwrap().error,
            Some(PushErrorCode::Unknown)
        );
    }

    #[tokio::test]
    async fn test_submit_returns_tickets_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/--/api/v2/push/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"status": "ok", "id": "ticket-1"},
                    {"status": "error", "message": "bad device", "details": {"error": "DeviceNotRegistered"}}
                ]
            })))
            .mount(&server)
            .await;

        let gateway = ExpoPushGateway::new(server.uri(), None, Duration::from_secs(5));
        let messages = vec![
            PushMessage {
                to: "ExponentPushToken[a]".to_string(),
                sound: "default".to_string(),
                title: "t".to_string(),
                body: "b".to_string(),
                data: json!({}),
                priority: "high".to_string(),
                channel_id: "prayer-timings".to_string(),
            },
            PushMessage {
                to: "ExponentPushToken[b]".to_string(),
                sound: "default".to_string(),
                title: "t".to_string(),
                body: "b".to_string(),
                data: json!({}),
                priority: "high".to_string(),
                channel_id: "prayer-timings".to_string(),
            },
        ];

        let tickets = gateway.submit(&messages).await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].status, DeliveryStatus::Ok);
        assert_eq!(tickets[0].id.as_deref(), Some("ticket-1"));
        assert!(tickets[1].is_device_not_registered());
    }

    #[tokio::test]
    async fn test_submit_gateway_failure_is_internal_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/--/api/v2/push/send"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let gateway = ExpoPushGateway::new(server.uri(), None, Duration::from_secs(5));
        let result = gateway.submit(&[]).await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn test_fetch_receipts() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/--/api/v2/push/getReceipts"))
            .and(body_partial_json(json!({"ids": ["ticket-1", "ticket-2"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "ticket-1": {"status": "ok"},
                    "ticket-2": {"status": "error", "details": {"error": "MessageRateExceeded"}}
                }
            })))
            .mount(&server)
            .await;

        let gateway = ExpoPushGateway::new(server.uri(), None, Duration::from_secs(5));
        let ids = vec!["ticket-1".to_string(), "ticket-2".to_string()];
        let receipts = gateway.fetch_receipts(&ids).await.unwrap();

        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts["ticket-1"].status, DeliveryStatus::Ok);
        assert_eq!(receipts["ticket-2"].status, DeliveryStatus::Error);
        assert!(!receipts["ticket-2"].is_device_not_registered());
    }
}
