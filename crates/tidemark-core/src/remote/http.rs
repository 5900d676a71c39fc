//! HTTP implementation of the remote traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    CredentialProvider, MutationTransport, PullSource, RemoteError, RemoteResult, SyncStateRemote,
};
use crate::config::ClientConfig;
use crate::models::{EntityFamily, MutationKind, RemoteRecord, SyncBatch, SyncConfirmation};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("credentials", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::Other(error.to_string()))?;
        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    pub fn from_config(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> RemoteResult<Self> {
        Self::new(config.api_base_url.clone(), config.request_timeout, credentials)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> RemoteResult<String> {
        let api_key = self.credentials.api_key().ok_or(RemoteError::MissingApiKey)?;

        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .header(API_KEY_HEADER, api_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if status.is_success() {
            tracing::debug!(method = %method, path, status = status.as_u16(), "Remote call succeeded");
            return Ok(text);
        }

        tracing::debug!(method = %method, path, status = status.as_u16(), "Remote call failed");
        if status == StatusCode::CONFLICT {
            return Err(RemoteError::Conflict { body: text });
        }
        Err(RemoteError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, &text),
        })
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> RemoteResult<String> {
        let body = serde_json::to_value(body).map_err(|error| RemoteError::Decode(error.to_string()))?;
        self.request(Method::POST, path, Some(&body)).await
    }
}

#[async_trait]
impl MutationTransport for HttpRemote {
    async fn send(&self, kind: &MutationKind) -> RemoteResult<()> {
        let body = kind.request_body();
        let text = self.request(Method::POST, &kind.endpoint(), Some(&body)).await?;
        ensure_not_rejected(&text)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SyncStateResponse {
    Wrapped { records: Vec<RemoteRecord> },
    Bare(Vec<RemoteRecord>),
}

#[derive(Serialize)]
struct ConfirmBody<'a> {
    confirmations: &'a [SyncConfirmation],
}

#[async_trait]
impl SyncStateRemote for HttpRemote {
    async fn fetch_sync_state(&self, family: EntityFamily) -> RemoteResult<Vec<RemoteRecord>> {
        let path = family_path(family, "sync-state");
        let text = self.request(Method::GET, &path, None).await?;
        let response: SyncStateResponse =
            serde_json::from_str(&text).map_err(|error| RemoteError::Decode(error.to_string()))?;
        Ok(match response {
            SyncStateResponse::Wrapped { records } | SyncStateResponse::Bare(records) => records,
        })
    }

    async fn push_batch(&self, family: EntityFamily, batch: &SyncBatch) -> RemoteResult<()> {
        let text = self.post_json(&family_path(family, "sync-batch"), batch).await?;
        ensure_not_rejected(&text)
    }

    async fn confirm_sync(
        &self,
        family: EntityFamily,
        confirmations: &[SyncConfirmation],
    ) -> RemoteResult<()> {
        let text = self
            .post_json(&family_path(family, "confirm-sync"), &ConfirmBody { confirmations })
            .await?;
        ensure_not_rejected(&text)
    }
}

#[async_trait]
impl PullSource for HttpRemote {
    async fn fetch(&self, path: &str) -> RemoteResult<Value> {
        let text = self.request(Method::GET, path, None).await?;
        if text.trim().is_empty() {
            return Err(RemoteError::InvalidResponse);
        }
        serde_json::from_str(&text).map_err(|error| RemoteError::Decode(error.to_string()))
    }
}

fn family_path(family: EntityFamily, action: &str) -> String {
    format!("/webhook/{}-{action}", family.endpoint_prefix())
}

#[derive(Debug, Deserialize)]
struct Acknowledgement {
    success: Option<bool>,
    message: Option<String>,
    error: Option<String>,
}

/// Webhooks answer 200 with `{"success": false}` for soft rejections.
fn ensure_not_rejected(body: &str) -> RemoteResult<()> {
    let Ok(ack) = serde_json::from_str::<Acknowledgement>(body) else {
        return Ok(());
    };
    if ack.success == Some(false) {
        let message = ack
            .message
            .or(ack.error)
            .unwrap_or_else(|| "request rejected".to_string());
        return Err(RemoteError::Rejected(message));
    }
    Ok(())
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_connect() {
        RemoteError::Connectivity(error.to_string())
    } else if error.is_builder() {
        RemoteError::InvalidUrl(error.to_string())
    } else if error.is_decode() || error.is_body() {
        RemoteError::Decode(error.to_string())
    } else {
        RemoteError::Other(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| RemoteError::InvalidUrl("base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidUrl(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordFields, RecordOrigin, SyncStatus};
    use crate::remote::StaticCredentials;
    use crate::classify::{classify, ErrorClass};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_for(server: &MockServer, key: Option<&str>) -> HttpRemote {
        HttpRemote::new(
            server.uri(),
            Duration::from_secs(5),
            Arc::new(StaticCredentials::new(key.map(str::to_string))),
        )
        .unwrap()
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":" bad amount "}"#),
            "bad amount (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[tokio::test]
    async fn send_posts_body_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/tidemark-water"))
            .and(header("X-API-Key", "key-1"))
            .and(body_json(json!({ "amount_ml": 250 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("key-1"));
        remote
            .send(&MutationKind::Water { amount_ml: 250 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_without_key_skips_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let remote = remote_for(&server, None);
        let error = remote
            .send(&MutationKind::Water { amount_ml: 250 })
            .await
            .unwrap_err();
        assert_eq!(error, RemoteError::MissingApiKey);
    }

    #[tokio::test]
    async fn conflict_status_keeps_raw_body() {
        let server = MockServer::start().await;
        let body = r#"{"conflict_type":"duplicate","resolution":"server_wins","message":"dup"}"#;
        Mock::given(method("POST"))
            .and(path("/webhook/tidemark-food"))
            .respond_with(ResponseTemplate::new(409).set_body_string(body))
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("k"));
        let error = remote
            .send(&MutationKind::Food {
                text: "eggs".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            error,
            RemoteError::Conflict {
                body: body.to_string()
            }
        );
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/webhook/tidemark-dashboard"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": "down" })))
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("k"));
        let error = remote.fetch("/webhook/tidemark-dashboard").await.unwrap_err();
        assert_eq!(
            error,
            RemoteError::Status {
                status: 503,
                message: "down (503)".to_string()
            }
        );
    }

    #[tokio::test]
    async fn soft_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": false, "message": "unknown meal" })),
            )
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("k"));
        let error = remote
            .send(&MutationKind::Food {
                text: "??".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(error, RemoteError::Rejected("unknown meal".to_string()));
        assert_eq!(classify(&error), ErrorClass::ClientError);
    }

    #[tokio::test]
    async fn fetch_sync_state_accepts_wrapped_records() {
        let server = MockServer::start().await;
        let record = RemoteRecord {
            local_id: "evt-1".to_string(),
            fields: RecordFields {
                title: "Standup".to_string(),
                ..RecordFields::default()
            },
            sync_status: SyncStatus::Synced,
            origin: RecordOrigin::Local,
            updated_at: Utc::now(),
            remote_modified_at: None,
        };
        Mock::given(method("GET"))
            .and(path("/webhook/calendar-sync-state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [record.clone()] })))
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("k"));
        let records = remote.fetch_sync_state(EntityFamily::Events).await.unwrap();
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn undecodable_sync_state_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/webhook/reminders-sync-state"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let remote = remote_for(&server, Some("k"));
        let error = remote
            .fetch_sync_state(EntityFamily::Reminders)
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_connectivity_error() {
        let remote = HttpRemote::new(
            "http://127.0.0.1:9",
            Duration::from_secs(2),
            Arc::new(StaticCredentials::new(Some("k".to_string()))),
        )
        .unwrap();
        let error = remote.fetch("/webhook/tidemark-dashboard").await.unwrap_err();
        assert!(matches!(
            error,
            RemoteError::Connectivity(_) | RemoteError::Timeout | RemoteError::Other(_)
        ));
    }

    #[test]
    fn debug_redacts_credentials() {
        let remote = HttpRemote::new(
            "https://api.example.com",
            Duration::from_secs(1),
            Arc::new(StaticCredentials::new(Some("secret".to_string()))),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
    }
}
