use crate::errors::GatewayError;
use crate::gateway::IncidentGateway;
use crate::incident::{Attachment, IncidentRecord, IncidentRequest, ValidationError};
use crate::metrics_defs::{INCIDENT_REQUEST_DURATION, INCIDENT_REQUESTS};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const CREATE_ROUTE: &str = "create";
const USER_INCIDENT_ROUTE: &str = "user_incident";

pub fn router(gateway: Arc<IncidentGateway>) -> Router {
    let upload_limit = DefaultBodyLimit::max(gateway.max_upload_bytes());

    Router::new()
        .route("/incident-command/", post(create_incident))
        .route(
            "/incident-command/user-incident",
            post(create_user_incident).layer(upload_limit),
        )
        .with_state(gateway)
}

async fn create_incident(
    State(gateway): State<Arc<IncidentGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let result = match IncidentRequest::from_json(&body) {
        Ok(incident) => gateway.create_incident(&headers, &incident).await,
        Err(e) => Err(e.into()),
    };
    respond(CREATE_ROUTE, start, result)
}

async fn create_user_incident(
    State(gateway): State<Arc<IncidentGateway>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let start = Instant::now();
    let result = match read_form(multipart).await {
        Ok((incident, attachment)) => {
            gateway
                .create_user_incident(&headers, &incident, attachment.as_ref())
                .await
        }
        Err(e) => Err(e),
    };
    respond(USER_INCIDENT_ROUTE, start, result)
}

fn respond(
    route: &'static str,
    start: Instant,
    result: Result<IncidentRecord, GatewayError>,
) -> Response {
    let response = match result {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => {
            tracing::debug!(route, error = %e, "Incident request failed");
            e.into_response()
        }
    };

    counter!(
        INCIDENT_REQUESTS,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    histogram!(INCIDENT_REQUEST_DURATION, "route" => route).record(start.elapsed().as_secs_f64());

    response
}

/// Collects the text fields and the optional `file` part of a form submission.
async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(IncidentRequest, Option<Attachment>), GatewayError> {
    let mut multipart = multipart.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;

    let mut fields = HashMap::new();
    let mut attachment = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        if name == "file" {
            let file_name = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(str::to_owned);
            let data = field.bytes().await.map_err(malformed)?;
            // Browsers send an empty, unnamed part when no file was picked
            if file_name.is_some() || !data.is_empty() {
                attachment = Some(Attachment {
                    file_name,
                    content_type,
                    data,
                });
            }
        } else {
            let value = field.text().await.map_err(malformed)?;
            fields.insert(name, value);
        }
    }

    let incident = IncidentRequest::from_form_fields(&fields)?;
    Ok((incident, attachment))
}

/// Oversized bodies keep their 413; every other multipart failure is a
/// malformed body.
fn malformed(error: MultipartError) -> GatewayError {
    match error.status() {
        StatusCode::PAYLOAD_TOO_LARGE => GatewayError::PayloadTooLarge(error.body_text()),
        _ => ValidationError::MalformedBody(error.body_text()).into(),
    }
}
