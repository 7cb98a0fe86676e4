//! Delivery of incidents to the incident services with failover.
//!
//! # Protocol
//!
//! One forward is at most two sequential attempts:
//!
//! ```text
//! START -> main -> 201 ..................... Created   (final)
//!               -> other status < 500 ...... Rejected  (final)
//!               -> 5xx / transport failure -> redundant -> whatever it yields (final)
//! ```
//!
//! Failover is decided purely on the status class of the main reply. Body
//! content and latency are never consulted, so a malformed 2xx from the main
//! service is final. Transport failures (timeout, refused connection, DNS)
//! are reported as a synthesized `503 {"error": "Service unavailable"}` and
//! fail over like any other 5xx.
//!
//! # Duplicates
//!
//! There is no deduplication across the two services. If the main service
//! committed the incident and then failed (e.g. timed out after the write),
//! the redundant service will create a second record. Delivery is
//! at-least-once-attempted, not at-most-once.

use crate::http::{UpstreamReply, send_to_upstream, upstream_url};
use crate::identity::CredentialTransport;
use crate::incident::{Attachment, IncidentRequest};
use crate::metrics_defs::{BACKEND_FAILOVER, BACKEND_REQUEST_DURATION, BACKEND_REQUESTS};
use http::StatusCode;
use reqwest::multipart::{Form, Part};
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use url::Url;

/// Which of the two incident services handled an attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendRole {
    Main,
    Redundant,
}

impl BackendRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Main => "main",
            BackendRole::Redundant => "redundant",
        }
    }
}

/// Primary and secondary base URLs for the create-incident operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub primary: Url,
    pub secondary: Url,
}

impl Endpoint {
    pub fn url(&self, role: BackendRole) -> &Url {
        match role {
            BackendRole::Main => &self.primary,
            BackendRole::Redundant => &self.secondary,
        }
    }
}

/// Classification of a single attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The service answered 201
    Created,
    /// Any other status below 500
    Rejected,
    /// The service answered 5xx
    ServerError,
    /// The service could not be reached or did not answer in time
    Unavailable,
}

impl Outcome {
    fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::ServerError
        } else if status == StatusCode::CREATED {
            Outcome::Created
        } else {
            Outcome::Rejected
        }
    }

    pub fn triggers_failover(&self) -> bool {
        matches!(self, Outcome::ServerError | Outcome::Unavailable)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Rejected => "rejected",
            Outcome::ServerError => "server_error",
            Outcome::Unavailable => "unavailable",
        }
    }
}

/// Body of a create call
#[derive(Clone, Copy, Debug)]
pub enum Payload<'a> {
    /// `POST {base}/` with the incident as JSON
    Json(&'a IncidentRequest),
    /// `POST {base}/user-incident` with form fields and an optional file part
    Form {
        incident: &'a IncidentRequest,
        attachment: Option<&'a Attachment>,
    },
}

impl Payload<'_> {
    pub fn path(&self) -> &'static str {
        match self {
            Payload::Json(_) => "/",
            Payload::Form { .. } => "/user-incident",
        }
    }

    // multipart forms are single-use, so each attempt builds its own
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Payload::Json(incident) => request.json(incident),
            Payload::Form {
                incident,
                attachment,
            } => {
                let mut form = incident
                    .form_fields()
                    .into_iter()
                    .fold(Form::new(), |form, (name, value)| form.text(name, value));
                if let Some(attachment) = attachment {
                    form = form.part("file", attachment_part(attachment));
                }
                request.multipart(form)
            }
        }
    }
}

fn attachment_part(attachment: &Attachment) -> Part {
    let part = || {
        let part = Part::bytes(attachment.data.to_vec());
        match &attachment.file_name {
            Some(file_name) => part.file_name(file_name.clone()),
            None => part,
        }
    };

    match attachment.content_type.as_deref() {
        Some(content_type) => part().mime_str(content_type).unwrap_or_else(|e| {
            tracing::warn!(content_type, error = %e, "Dropping unparsable attachment content type");
            part()
        }),
        None => part(),
    }
}

/// Final result of a forward
#[derive(Clone, Debug, PartialEq)]
pub struct Forwarded {
    pub reply: UpstreamReply,
    pub outcome: Outcome,
    /// The service that produced `reply`
    pub served_by: BackendRole,
    /// 1 or 2
    pub attempts: u8,
}

#[derive(Clone)]
pub struct BackendForwarder {
    client: reqwest::Client,
    endpoint: Endpoint,
    transport: CredentialTransport,
    timeout: Duration,
}

impl BackendForwarder {
    pub fn new(
        client: reqwest::Client,
        endpoint: Endpoint,
        transport: CredentialTransport,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            transport,
            timeout,
        }
    }

    /// Delivers `payload` to the main service, failing over to the redundant
    /// service once if the main one answers 5xx or cannot be reached.
    pub async fn forward(&self, payload: Payload<'_>, token: Option<&str>) -> Forwarded {
        let (reply, outcome) = self.attempt(BackendRole::Main, payload, token).await;
        if !outcome.triggers_failover() {
            return Forwarded {
                reply,
                outcome,
                served_by: BackendRole::Main,
                attempts: 1,
            };
        }

        tracing::warn!(
            status = %reply.status,
            outcome = outcome.as_str(),
            path = payload.path(),
            "Main incident service failed, retrying against redundant service"
        );
        if outcome == Outcome::ServerError {
            tracing::debug!(
                "Main incident service answered after receiving the request; \
                 the incident may be duplicated by the redundant service"
            );
        }
        counter!(BACKEND_FAILOVER).increment(1);

        let (reply, outcome) = self.attempt(BackendRole::Redundant, payload, token).await;
        Forwarded {
            reply,
            outcome,
            served_by: BackendRole::Redundant,
            attempts: 2,
        }
    }

    async fn attempt(
        &self,
        role: BackendRole,
        payload: Payload<'_>,
        token: Option<&str>,
    ) -> (UpstreamReply, Outcome) {
        let url = upstream_url(self.endpoint.url(role), payload.path());

        let mut request = payload.apply(self.client.post(&url).timeout(self.timeout));
        if let Some(token) = token {
            request = self.transport.attach(request, token);
        }

        let start = Instant::now();
        let (reply, outcome) = match send_to_upstream(request, role.as_str()).await {
            Ok(reply) => {
                let outcome = Outcome::from_status(reply.status);
                (reply, outcome)
            }
            Err(e) => {
                tracing::warn!(backend = role.as_str(), url = %url, error = %e, "Incident service unreachable");
                (UpstreamReply::unavailable(), Outcome::Unavailable)
            }
        };

        histogram!(BACKEND_REQUEST_DURATION, "backend" => role.as_str())
            .record(start.elapsed().as_secs_f64());
        counter!(
            BACKEND_REQUESTS,
            "backend" => role.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        tracing::debug!(
            backend = role.as_str(),
            status = %reply.status,
            outcome = outcome.as_str(),
            "Incident service attempt finished"
        );

        (reply, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{IncidentChannel, IncidentPriority, IncidentState};
    use bytes::Bytes;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn incident() -> IncidentRequest {
        IncidentRequest {
            user_id: Uuid::parse_str("6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10").unwrap(),
            company_id: Uuid::parse_str("0b7a0f5e-2c3d-4e5f-8a9b-1c2d3e4f5a6b").unwrap(),
            manager_id: None,
            description: "fire".to_string(),
            state: IncidentState::Open,
            channel: IncidentChannel::Phone,
            priority: IncidentPriority::Medium,
        }
    }

    fn forwarder(primary: &str, secondary: &str, timeout: Duration) -> BackendForwarder {
        BackendForwarder::new(
            reqwest::Client::new(),
            Endpoint {
                primary: Url::parse(primary).unwrap(),
                secondary: Url::parse(secondary).unwrap(),
            },
            CredentialTransport::default(),
            timeout,
        )
    }

    fn unused_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    async fn mount_create(server: &MockServer, status: u16, body: serde_json::Value, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;
        let id = Uuid::new_v4().to_string();

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("token", "signed"))
            .and(body_json(json!({
                "user_id": "6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10",
                "company_id": "0b7a0f5e-2c3d-4e5f-8a9b-1c2d3e4f5a6b",
                "manager_id": null,
                "description": "fire",
                "state": "open",
                "channel": "phone",
                "priority": "medium"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": id})))
            .expect(1)
            .mount(&primary)
            .await;
        mount_create(&secondary, 201, json!({}), 0).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), Some("signed"))
            .await;

        assert_eq!(result.outcome, Outcome::Created);
        assert_eq!(result.served_by, BackendRole::Main);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.reply.body["id"], id);
    }

    #[tokio::test]
    async fn test_primary_server_error_fails_over() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        mount_create(&primary, 503, json!({"error": "db down"}), 1).await;
        mount_create(&secondary, 201, json!({"id": "I1"}), 1).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), Some("signed"))
            .await;

        assert_eq!(result.reply.status, StatusCode::CREATED);
        assert_eq!(result.served_by, BackendRole::Redundant);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_secondary_result_is_final() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        mount_create(&primary, 500, json!({"error": "boom"}), 1).await;
        mount_create(&secondary, 502, json!({"error": "bad gateway"}), 1).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), None)
            .await;

        assert_eq!(result.outcome, Outcome::ServerError);
        assert_eq!(result.reply.status, StatusCode::BAD_GATEWAY);
        assert_eq!(result.reply.body, json!({"error": "bad gateway"}));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        mount_create(&primary, 409, json!({"detail": "conflict"}), 1).await;
        mount_create(&secondary, 201, json!({"id": "I1"}), 0).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), Some("signed"))
            .await;

        assert_eq!(result.outcome, Outcome::Rejected);
        assert_eq!(result.reply.status, StatusCode::CONFLICT);
        assert_eq!(result.reply.body, json!({"detail": "conflict"}));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_malformed_success_is_not_retried() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string("<html>created</html>"))
            .expect(1)
            .mount(&primary)
            .await;
        mount_create(&secondary, 201, json!({"id": "I1"}), 0).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), None)
            .await;

        assert_eq!(result.outcome, Outcome::Created);
        assert_eq!(result.reply.body, json!("<html>created</html>"));
    }

    #[tokio::test]
    async fn test_unreachable_primary_fails_over() {
        let secondary = MockServer::start().await;
        mount_create(&secondary, 201, json!({"id": "I1"}), 1).await;

        let incident = incident();
        let result = forwarder(&unused_port_url(), &secondary.uri(), Duration::from_secs(5))
            .forward(Payload::Json(&incident), None)
            .await;

        assert_eq!(result.outcome, Outcome::Created);
        assert_eq!(result.served_by, BackendRole::Redundant);
    }

    #[tokio::test]
    async fn test_slow_primary_times_out_and_fails_over() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&primary)
            .await;
        mount_create(&secondary, 201, json!({"id": "I1"}), 1).await;

        let incident = incident();
        let result = forwarder(&primary.uri(), &secondary.uri(), Duration::from_millis(200))
            .forward(Payload::Json(&incident), None)
            .await;

        assert_eq!(result.reply.body["id"], "I1");
        assert_eq!(result.served_by, BackendRole::Redundant);
    }

    #[tokio::test]
    async fn test_both_unreachable_yields_synthesized_unavailable() {
        let incident = incident();
        let result = forwarder(&unused_port_url(), &unused_port_url(), Duration::from_secs(1))
            .forward(Payload::Json(&incident), None)
            .await;

        assert_eq!(result.outcome, Outcome::Unavailable);
        assert_eq!(result.reply, UpstreamReply::unavailable());
        assert_eq!(result.reply.body, json!({"error": "Service unavailable"}));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_form_payload_targets_user_incident_path() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/incident-command-main/user-incident"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&primary)
            .await;
        Mock::given(method("POST"))
            .and(path("/incident-command-backup/user-incident"))
            .and(body_string_contains("name=\"channel\""))
            .and(body_string_contains("filename=\"photo.jpg\""))
            .and(body_string_contains("jpeg-bytes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "I2"})))
            .expect(1)
            .mount(&secondary)
            .await;

        let incident = incident();
        let attachment = Attachment {
            file_name: Some("photo.jpg".to_string()),
            content_type: Some("image/jpeg".to_string()),
            data: Bytes::from_static(b"jpeg-bytes"),
        };
        let result = forwarder(
            &format!("{}/incident-command-main", primary.uri()),
            &format!("{}/incident-command-backup/", secondary.uri()),
            Duration::from_secs(5),
        )
        .forward(
            Payload::Form {
                incident: &incident,
                attachment: Some(&attachment),
            },
            None,
        )
        .await;

        assert_eq!(result.reply.body["id"], "I2");
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::from_status(StatusCode::CREATED), Outcome::Created);
        assert_eq!(Outcome::from_status(StatusCode::OK), Outcome::Rejected);
        assert_eq!(Outcome::from_status(StatusCode::NOT_FOUND), Outcome::Rejected);
        assert_eq!(
            Outcome::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            Outcome::ServerError
        );
        assert_eq!(
            Outcome::from_status(StatusCode::from_u16(599).unwrap()),
            Outcome::ServerError
        );
        assert!(Outcome::Unavailable.triggers_failover());
        assert!(!Outcome::Rejected.triggers_failover());
    }
}
