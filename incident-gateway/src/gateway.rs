use crate::config::{Config, RouteMode};
use crate::errors::{GatewayError, Result};
use crate::forwarder::{BackendForwarder, Endpoint, Forwarded, Outcome, Payload};
use crate::identity::{CredentialTransport, IdentityVerifier};
use crate::incident::{Attachment, IncidentRecord, IncidentRequest};
use crate::user_lookup::UserLookupClient;
use http::{HeaderMap, StatusCode};

/// Orchestrates a create: authenticate, look up the user, forward with
/// failover, map the backend reply.
///
/// Payload validation happens before any of this, when the request body is
/// parsed into an [`IncidentRequest`].
pub struct IncidentGateway {
    identity: IdentityVerifier,
    transport: CredentialTransport,
    users: UserLookupClient,
    forwarder: BackendForwarder,
    create_mode: RouteMode,
    user_incident_mode: RouteMode,
    max_upload_bytes: usize,
}

impl IncidentGateway {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        let timeout = config.request_timeout();

        Ok(Self {
            identity: IdentityVerifier::new(&config.jwt_secret),
            transport: config.credential_transport.clone(),
            users: UserLookupClient::new(
                client.clone(),
                config.user_service_url.clone(),
                config.credential_transport.clone(),
                timeout,
            ),
            forwarder: BackendForwarder::new(
                client,
                Endpoint {
                    primary: config.incident_service.main_url.clone(),
                    secondary: config.incident_service.redundant_url.clone(),
                },
                config.credential_transport.clone(),
                timeout,
            ),
            create_mode: config.routes.create,
            user_incident_mode: config.routes.user_incident,
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// `POST /incident-command/`
    pub async fn create_incident(
        &self,
        headers: &HeaderMap,
        incident: &IncidentRequest,
    ) -> Result<IncidentRecord> {
        self.submit(self.create_mode, headers, incident, Payload::Json(incident))
            .await
    }

    /// `POST /incident-command/user-incident`
    pub async fn create_user_incident(
        &self,
        headers: &HeaderMap,
        incident: &IncidentRequest,
        attachment: Option<&Attachment>,
    ) -> Result<IncidentRecord> {
        let payload = Payload::Form {
            incident,
            attachment,
        };
        self.submit(self.user_incident_mode, headers, incident, payload)
            .await
    }

    async fn submit(
        &self,
        mode: RouteMode,
        headers: &HeaderMap,
        incident: &IncidentRequest,
        payload: Payload<'_>,
    ) -> Result<IncidentRecord> {
        let token = match mode.require_auth {
            true => Some(self.outbound_token(headers)?),
            false => None,
        };

        if mode.require_user_lookup {
            let reply = self.users.lookup(&incident.user_id, token.as_deref()).await;
            if reply.status != StatusCode::OK {
                tracing::info!(
                    user_id = %incident.user_id,
                    status = %reply.status,
                    "User lookup rejected incident"
                );
                return Err(GatewayError::UserLookupFailed {
                    status: reply.status,
                    body: reply.body,
                });
            }
        }

        let forwarded = self.forwarder.forward(payload, token.as_deref()).await;
        into_record(forwarded)
    }

    /// Decodes the inbound credential and re-signs its claims for the
    /// outbound hops. Claim content is not altered.
    fn outbound_token(&self, headers: &HeaderMap) -> Result<String> {
        let Some(token) = self.transport.extract(headers) else {
            tracing::info!("Rejected request without credentials");
            return Err(GatewayError::Unauthorized);
        };

        let claims = self.identity.decode(token).map_err(|e| {
            tracing::info!(error = %e, "Rejected request with invalid credentials");
            GatewayError::Unauthorized
        })?;

        self.identity
            .encode(&claims)
            .map_err(|e| GatewayError::InternalError(e.to_string()))
    }
}

fn into_record(forwarded: Forwarded) -> Result<IncidentRecord> {
    let Forwarded { reply, outcome, .. } = forwarded;

    match outcome {
        Outcome::Created => serde_json::from_value(reply.body)
            .map_err(|e| GatewayError::InvalidBackendResponse(e.to_string())),
        Outcome::Rejected => Err(GatewayError::BackendClientError {
            status: reply.status,
            body: reply.body,
        }),
        Outcome::ServerError => Err(GatewayError::BackendServerError {
            status: reply.status,
            body: reply.body,
        }),
        Outcome::Unavailable => Err(GatewayError::BackendUnavailable { body: reply.body }),
    }
}
