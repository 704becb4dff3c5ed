//! Aura RPC Client
//! Pilot in Command: Booking Acquisition
//! Mission: One POST per query unit, classified into data the caller can branch on
//!
//! The partner portal exposes its Apex controllers through the Aura
//! `ApexActionController/ACTION$execute` endpoint. Requests are form-encoded:
//! a JSON `message` envelope plus the page's `aura.context` and `aura.token`.
//! The session itself travels in the `Cookie` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::bookings::harvest::BookingSource;
use crate::models::{Credentials, QueryUnit};

pub const PORTAL_AURA_BASE: &str =
    "https://www.sobhapartnerportal.com/partnerportal/s/sfsites/aura";

const APEX_DESCRIPTOR: &str = "aura://ApexActionController/ACTION$execute";
const ACTION_ID: &str = "197;a";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";
const REQUEST_ID_LEN: usize = 16;
const REQUEST_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const BODY_PREVIEW_CHARS: usize = 500;

/// Substrings in an action error that mean the captured session is dead.
/// Matched case-insensitively against the serialized error. This is text
/// matching, not a structured code, and will miss rewordings.
pub const SESSION_EXPIRED_MARKERS: &[&str] = &["expired", "invalid_session_id"];

/// Which Apex method to call, and from which community page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcTarget {
    pub namespace: String,
    pub classname: String,
    pub method: String,
    pub page_uri: String,
}

impl Default for RpcTarget {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            classname: "SitevisitChartController".to_string(),
            method: "getBookingDataDetails".to_string(),
            page_uri: "/partnerportal/s/performance".to_string(),
        }
    }
}

/// Why a call never produced an application-level answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Status(u16),
    Timeout,
    Connection(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Status(code) => write!(f, "HTTP {}", code),
            TransportFailure::Timeout => write!(f, "request timed out"),
            TransportFailure::Connection(reason) => write!(f, "connection error: {}", reason),
        }
    }
}

/// Outcome of one RPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    /// Action state SUCCESS, or an envelope we do not recognise (payload `Null`).
    Success(Value),
    /// Action state ERROR; carries the serialized error detail.
    ApplicationError(String),
    /// Action state ERROR and the detail says the session is gone.
    SessionExpired(String),
    TransportError(TransportFailure),
    /// 2xx with a body that is not JSON.
    Malformed(String),
}

impl RpcResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcResponse::Success(_) => "success",
            RpcResponse::ApplicationError(_) => "application_error",
            RpcResponse::SessionExpired(_) => "session_expired",
            RpcResponse::TransportError(_) => "transport_error",
            RpcResponse::Malformed(_) => "malformed",
        }
    }
}

/// Fresh correlation id for `X-SFDC-Request-Id`.
pub fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..REQUEST_ID_LEN)
        .map(|_| REQUEST_ID_ALPHABET[rng.gen_range(0..REQUEST_ID_ALPHABET.len())] as char)
        .collect()
}

/// Build the `message` envelope for one Apex call.
pub fn build_message(target: &RpcTarget, unit: &QueryUnit) -> Value {
    json!({
        "actions": [{
            "id": ACTION_ID,
            "descriptor": APEX_DESCRIPTOR,
            "callingDescriptor": "UNKNOWN",
            "params": {
                "namespace": target.namespace,
                "classname": target.classname,
                "method": target.method,
                "params": unit.params,
                "cacheable": false,
                "isContinuation": false,
            }
        }]
    })
}

/// Classify a completed HTTP exchange.
pub fn classify_response(status: u16, body: &str) -> RpcResponse {
    if !(200..300).contains(&status) {
        return RpcResponse::TransportError(TransportFailure::Status(status));
    }

    let data: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, body_preview = %preview(body), "Response body is not JSON");
            return RpcResponse::Malformed(e.to_string());
        }
    };

    let action = data.pointer("/actions/0");
    match action.and_then(|a| a.get("state")).and_then(Value::as_str) {
        Some("SUCCESS") => {
            let payload = action
                .and_then(|a| a.get("returnValue"))
                .cloned()
                .unwrap_or(Value::Null);
            RpcResponse::Success(payload)
        }
        Some("ERROR") => {
            let detail = action
                .and_then(|a| a.get("error"))
                .map(Value::to_string)
                .unwrap_or_else(|| "null".to_string());
            if is_session_expired(&detail) {
                RpcResponse::SessionExpired(detail)
            } else {
                RpcResponse::ApplicationError(detail)
            }
        }
        state => {
            warn!(
                state = ?state,
                body_preview = %preview(body),
                "⚠️ Unexpected response envelope, treating as empty"
            );
            RpcResponse::Success(Value::Null)
        }
    }
}

pub fn is_session_expired(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    SESSION_EXPIRED_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

pub struct AuraClient {
    client: Client,
    endpoint: Url,
    origin: String,
    target: RpcTarget,
    credentials: Credentials,
}

impl AuraClient {
    pub fn new(
        base_url: &str,
        target: RpcTarget,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build portal HTTP client")?;

        let mut endpoint =
            Url::parse(base_url).with_context(|| format!("Invalid portal base URL {}", base_url))?;
        endpoint
            .query_pairs_mut()
            .append_pair("r", "18")
            .append_pair("aura.ApexAction.execute", "1");
        let origin = endpoint.origin().ascii_serialization();

        Ok(Self {
            client,
            endpoint,
            origin,
            target,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn target(&self) -> &RpcTarget {
        &self.target
    }

    /// Issue exactly one call for `unit`. Never retries.
    pub async fn fetch(&self, unit: &QueryUnit) -> RpcResponse {
        let message = build_message(&self.target, unit).to_string();
        let request_id = generate_request_id();
        let lds_endpoints = format!(
            "ApexActionController.execute:{}.{}",
            self.target.classname, self.target.method
        );
        let referer = format!("{}{}", self.origin, self.target.page_uri);

        info!(unit = %unit.label, request_id = %request_id, "🚀 Fetching bookings");

        let form = [
            ("message", message.as_str()),
            ("aura.context", self.credentials.aura_context.as_str()),
            ("aura.pageURI", self.target.page_uri.as_str()),
            ("aura.token", self.credentials.aura_token.as_str()),
        ];

        let sent = self
            .client
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::COOKIE, &self.credentials.cookie_header)
            .header(header::ORIGIN, &self.origin)
            .header(header::REFERER, referer)
            .header("X-SFDC-Request-Id", &request_id)
            .header("X-SFDC-LDS-Endpoints", lds_endpoints)
            .form(&form)
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => return RpcResponse::TransportError(transport_failure(&e)),
        };

        let status = response.status();
        debug!(unit = %unit.label, status = status.as_u16(), "📥 Portal response");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("⚠️ Portal rejected the session (401). Capture fresh cookie and aura tokens.");
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return RpcResponse::TransportError(transport_failure(&e)),
        };

        let outcome = classify_response(status.as_u16(), &body);
        match &outcome {
            RpcResponse::ApplicationError(detail) => {
                error!(unit = %unit.label, detail = %preview(detail), "❌ Portal action error")
            }
            RpcResponse::SessionExpired(_) => {
                error!(unit = %unit.label, "🚫 Session expired. Update authentication tokens.")
            }
            _ => {}
        }
        outcome
    }
}

fn transport_failure(e: &reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Timeout
    } else if let Some(status) = e.status() {
        TransportFailure::Status(status.as_u16())
    } else {
        TransportFailure::Connection(e.to_string())
    }
}

#[async_trait]
impl BookingSource for AuraClient {
    async fn fetch(&self, unit: &QueryUnit) -> RpcResponse {
        AuraClient::fetch(self, unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials::new("sid=abc123", "tok-1", r#"{"mode":"PROD"}"#)
    }

    #[test]
    fn request_id_is_sixteen_lowercase_alphanumerics() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(id, generate_request_id());
    }

    #[test]
    fn message_carries_target_and_unit_params() {
        let msg = build_message(&RpcTarget::default(), &QueryUnit::year(2023));
        let params = &msg["actions"][0]["params"];
        assert_eq!(msg["actions"][0]["descriptor"], APEX_DESCRIPTOR);
        assert_eq!(params["classname"], "SitevisitChartController");
        assert_eq!(params["method"], "getBookingDataDetails");
        assert_eq!(params["params"]["selectedYear"], 2023);
        assert_eq!(params["cacheable"], false);
    }

    #[test]
    fn success_hands_back_return_value_unresolved() {
        let body = r#"{"actions":[{"state":"SUCCESS","returnValue":{"returnValue":[{"Name":"B-1"}]}}]}"#;
        match classify_response(200, body) {
            RpcResponse::Success(payload) => {
                assert_eq!(payload["returnValue"][0]["Name"], "B-1")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_session_error_is_session_expired() {
        let body = r#"{"actions":[{"state":"ERROR","error":[{"message":"INVALID_SESSION_ID: Session expired or invalid"}]}]}"#;
        assert!(matches!(
            classify_response(200, body),
            RpcResponse::SessionExpired(_)
        ));
    }

    #[test]
    fn other_action_errors_stay_application_errors() {
        let body = r#"{"actions":[{"state":"ERROR","error":[{"message":"List index out of bounds: 0"}]}]}"#;
        match classify_response(200, body) {
            RpcResponse::ApplicationError(detail) => assert!(detail.contains("out of bounds")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn envelope_drift_is_empty_success() {
        for body in [r#"{}"#, r#"{"actions":[]}"#, r#"{"actions":[{"state":"INCOMPLETE"}]}"#] {
            assert_eq!(classify_response(200, body), RpcResponse::Success(Value::Null));
        }
    }

    #[test]
    fn non_json_body_is_malformed() {
        assert!(matches!(
            classify_response(200, "<html>login</html>"),
            RpcResponse::Malformed(_)
        ));
    }

    #[test]
    fn non_2xx_is_transport_error() {
        assert_eq!(
            classify_response(401, ""),
            RpcResponse::TransportError(TransportFailure::Status(401))
        );
        assert_eq!(
            classify_response(503, "{}"),
            RpcResponse::TransportError(TransportFailure::Status(503))
        );
    }

    #[test]
    fn endpoint_gets_apex_query_and_origin() {
        let client = AuraClient::new(
            PORTAL_AURA_BASE,
            RpcTarget::default(),
            creds(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://www.sobhapartnerportal.com/partnerportal/s/sfsites/aura?r=18&aura.ApexAction.execute=1"
        );
        assert_eq!(client.origin, "https://www.sobhapartnerportal.com");
    }

    #[tokio::test]
    async fn fetch_posts_form_with_tokens_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aura"))
            .and(query_param("aura.ApexAction.execute", "1"))
            .and(header("cookie", "sid=abc123"))
            .and(header_exists("x-sfdc-request-id"))
            .and(body_string_contains("aura.token=tok-1"))
            .and(body_string_contains("getBookingDataDetails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "actions": [{ "state": "SUCCESS", "returnValue": [{ "Name": "B-7" }] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuraClient::new(
            &format!("{}/aura", server.uri()),
            RpcTarget::default(),
            creds(),
            Duration::from_secs(5),
        )
        .unwrap();

        match client.fetch(&QueryUnit::year(2025)).await {
            RpcResponse::Success(payload) => assert_eq!(payload[0]["Name"], "B-7"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_reports_http_status_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = AuraClient::new(
            &format!("{}/aura", server.uri()),
            RpcTarget::default(),
            creds(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.fetch(&QueryUnit::year(2025)).await,
            RpcResponse::TransportError(TransportFailure::Status(500))
        );
    }

    #[tokio::test]
    async fn fetch_reports_slow_server_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = AuraClient::new(
            &format!("{}/aura", server.uri()),
            RpcTarget::default(),
            creds(),
            Duration::from_millis(50),
        )
        .unwrap();

        assert_eq!(
            client.fetch(&QueryUnit::year(2025)).await,
            RpcResponse::TransportError(TransportFailure::Timeout)
        );
    }
}
