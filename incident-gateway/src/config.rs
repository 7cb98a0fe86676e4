use crate::identity::CredentialTransport;
use http::HeaderName;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_USER_SERVICE_URL: &str = "USER_SERVICE_URL";
pub const ENV_INCIDENT_SERVICE_URL_MAIN: &str = "INCIDENT_SERVICE_URL_MAIN";
pub const ENV_INCIDENT_SERVICE_URL_REDUNDANT: &str = "INCIDENT_SERVICE_URL_REDUNDANT";
pub const ENV_JWT_SECRET_KEY: &str = "JWT_SECRET_KEY";

pub const DEFAULT_JWT_SECRET: &str = "secret_key";
const DEFAULT_USER_SERVICE_URL: &str = "http://localhost:8002";
const DEFAULT_MAIN_URL: &str = "http://localhost:8004/incident-command-main";
const DEFAULT_REDUNDANT_URL: &str = "http://localhost:8005/incident-command-backup";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Request timeout cannot be 0")]
    InvalidTimeout,

    #[error("Upload size limit cannot be 0")]
    InvalidUploadLimit,

    #[error("JWT secret cannot be empty")]
    EmptySecret,

    #[error("Invalid credential header name: {0:?}")]
    InvalidCredentialHeader(String),

    #[error("Main and redundant incident services must be different URLs: {0}")]
    SameIncidentServiceUrls(Url),

    #[error("{name} is not a valid URL: {source}")]
    InvalidEnvUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Gateway configuration
///
/// Every field has a default suitable for local development only. Production
/// deployments are expected to override the service URLs and the secret,
/// either in the config file or through the environment.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for incident requests
    pub listener: Listener,
    /// Optional listener for `/health` and `/ready`
    pub admin_listener: Option<Listener>,
    /// Base URL of the user service
    pub user_service_url: Url,
    pub incident_service: IncidentServiceConfig,
    /// Shared HS256 secret used to verify and re-sign identity tokens
    pub jwt_secret: String,
    pub credential_transport: CredentialTransport,
    /// Timeout applied to every outbound call
    pub request_timeout_secs: u64,
    /// Largest multipart body accepted by `POST /incident-command/user-incident`
    pub max_upload_bytes: usize,
    pub routes: RoutesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: Listener::default(),
            admin_listener: None,
            user_service_url: default_url(DEFAULT_USER_SERVICE_URL),
            incident_service: IncidentServiceConfig::default(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            credential_transport: CredentialTransport::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            routes: RoutesConfig::default(),
        }
    }
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin_listener) = &self.admin_listener {
            admin_listener.validate()?;
        }

        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        if self.max_upload_bytes == 0 {
            return Err(ValidationError::InvalidUploadLimit);
        }

        if self.jwt_secret.is_empty() {
            return Err(ValidationError::EmptySecret);
        }

        if let CredentialTransport::Header { name } = &self.credential_transport
            && HeaderName::from_bytes(name.as_bytes()).is_err()
        {
            return Err(ValidationError::InvalidCredentialHeader(name.clone()));
        }

        if self.incident_service.main_url == self.incident_service.redundant_url {
            return Err(ValidationError::SameIncidentServiceUrls(
                self.incident_service.main_url.clone(),
            ));
        }

        Ok(())
    }

    /// Applies the environment overrides for the service URLs and the secret.
    ///
    /// `lookup` is usually `|name| std::env::var(name).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url_var = |name: &'static str| -> Result<Option<Url>, ValidationError> {
            lookup(name)
                .map(|value| Url::parse(&value))
                .transpose()
                .map_err(|source| ValidationError::InvalidEnvUrl { name, source })
        };

        if let Some(url) = url_var(ENV_USER_SERVICE_URL)? {
            self.user_service_url = url;
        }
        if let Some(url) = url_var(ENV_INCIDENT_SERVICE_URL_MAIN)? {
            self.incident_service.main_url = url;
        }
        if let Some(url) = url_var(ENV_INCIDENT_SERVICE_URL_REDUNDANT)? {
            self.incident_service.redundant_url = url;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET_KEY) {
            self.jwt_secret = secret;
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_url(url: &str) -> Url {
    Url::parse(url).expect("default URLs are valid")
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The two interchangeable incident storage services
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IncidentServiceConfig {
    /// Tried first for every create
    pub main_url: Url,
    /// Tried only after the main service answers 5xx or cannot be reached
    pub redundant_url: Url,
}

impl Default for IncidentServiceConfig {
    fn default() -> Self {
        Self {
            main_url: default_url(DEFAULT_MAIN_URL),
            redundant_url: default_url(DEFAULT_REDUNDANT_URL),
        }
    }
}

/// Checks performed before an entry point forwards an incident
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RouteMode {
    pub require_auth: bool,
    pub require_user_lookup: bool,
}

/// Deployment mode of each entry point
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutesConfig {
    /// `POST /incident-command/` (JSON)
    pub create: RouteMode,
    /// `POST /incident-command/user-incident` (multipart form)
    pub user_incident: RouteMode,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            create: RouteMode {
                require_auth: true,
                require_user_lookup: true,
            },
            user_incident: RouteMode {
                require_auth: false,
                require_user_lookup: false,
            },
        }
    }
}
