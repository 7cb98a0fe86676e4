use crate::http::{UpstreamReply, send_to_upstream, upstream_url};
use crate::identity::CredentialTransport;
use crate::metrics_defs::USER_LOOKUPS;
use shared::counter;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Client for the user service
///
/// Issues exactly one read per lookup: no retry, no failover.
#[derive(Clone)]
pub struct UserLookupClient {
    client: reqwest::Client,
    base_url: Url,
    transport: CredentialTransport,
    timeout: Duration,
}

impl UserLookupClient {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        transport: CredentialTransport,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url,
            transport,
            timeout,
        }
    }

    /// Fetches `/user/{user_id}`.
    ///
    /// A 200 means the user exists and is visible to the caller. Any other
    /// reply is returned as-is for the caller to relay; a transport failure
    /// becomes the synthesized 503 reply.
    pub async fn lookup(&self, user_id: &Uuid, token: Option<&str>) -> UpstreamReply {
        let url = upstream_url(&self.base_url, &format!("/user/{user_id}"));

        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(token) = token {
            request = self.transport.attach(request, token);
        }

        let reply = match send_to_upstream(request, "user-service").await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "User service unreachable");
                UpstreamReply::unavailable()
            }
        };

        counter!(USER_LOOKUPS, "status" => reply.status.as_u16().to_string()).increment(1);
        reply
    }
}
