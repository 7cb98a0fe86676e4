//! Incident data model and the fixed request schema.
//!
//! Every payload that leaves the gateway is an [`IncidentRequest`] that passed
//! [`IncidentRequest::validate`]; both entry points (JSON and multipart form)
//! converge on that type before any network call is made.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_CREATED_MESSAGE: &str = "Incident created successfully";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Field {field} is not a valid UUID: {value}")]
    InvalidUuid { field: &'static str, value: String },

    #[error("Field {field} has unsupported value: {value}")]
    UnsupportedValue { field: &'static str, value: String },
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(ValidationError::UnsupportedValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Lifecycle state of an incident
    IncidentState, "state", {
        Open => "open",
        InProgress => "in_progress",
        Closed => "closed",
        Escalated => "escalated",
    }
);

impl Default for IncidentState {
    fn default() -> Self {
        IncidentState::Open
    }
}

wire_enum!(
    /// Channel through which the incident was reported
    IncidentChannel, "channel", {
        Phone => "phone",
        Email => "email",
        Chat => "chat",
        Mobile => "mobile",
    }
);

wire_enum!(
    IncidentPriority, "priority", {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

/// Normalized create-incident payload sent to the incident services
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRequest {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub description: String,
    #[serde(default)]
    pub state: IncidentState,
    pub channel: IncidentChannel,
    pub priority: IncidentPriority,
}

impl IncidentRequest {
    /// Parses and validates a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let request: IncidentRequest = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Parses and validates the text fields of a multipart form submission.
    ///
    /// Form submissions come from the mobile client, so `channel` defaults to
    /// `mobile` and `priority` to `medium` when omitted.
    pub fn from_form_fields(fields: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let request = IncidentRequest {
            user_id: parse_uuid(fields, "user_id")?,
            company_id: parse_uuid(fields, "company_id")?,
            manager_id: match non_empty(fields, "manager_id") {
                Some(_) => Some(parse_uuid(fields, "manager_id")?),
                None => None,
            },
            description: required(fields, "description")?.to_string(),
            state: parse_or(fields, "state", IncidentState::Open)?,
            channel: parse_or(fields, "channel", IncidentChannel::Mobile)?,
            priority: parse_or(fields, "priority", IncidentPriority::Medium)?,
        };
        request.validate()?;
        Ok(request)
    }

    /// Checks the constraints the type system does not already enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyField("description"));
        }
        Ok(())
    }

    /// Text fields for the multipart variant of the backend call.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("user_id", self.user_id.to_string()),
            ("company_id", self.company_id.to_string()),
            ("description", self.description.clone()),
            ("state", self.state.to_string()),
            ("channel", self.channel.to_string()),
            ("priority", self.priority.to_string()),
        ];
        if let Some(manager_id) = self.manager_id {
            fields.push(("manager_id", manager_id.to_string()));
        }
        fields
    }
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    match fields.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ValidationError::EmptyField(name)),
        None => Err(ValidationError::MissingField(name)),
    }
}

fn parse_uuid(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<Uuid, ValidationError> {
    let value = required(fields, name)?.trim();
    Uuid::parse_str(value).map_err(|_| ValidationError::InvalidUuid {
        field: name,
        value: value.to_string(),
    })
}

fn parse_or<T>(
    fields: &HashMap<String, String>,
    name: &'static str,
    default: T,
) -> Result<T, ValidationError>
where
    T: FromStr<Err = ValidationError>,
{
    match non_empty(fields, name) {
        Some(value) => value.parse(),
        None => Ok(default),
    }
}

/// File uploaded alongside a multipart submission
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Response returned to the caller once a backend created the incident.
///
/// Built only from what a backend returned; fields of the backend record
/// beyond these two are not surfaced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    #[serde(default = "default_created_message")]
    pub message: String,
}

fn default_created_message() -> String {
    DEFAULT_CREATED_MESSAGE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn valid_json() -> Value {
        json!({
            "user_id": "6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10",
            "company_id": "0b7a0f5e-2c3d-4e5f-8a9b-1c2d3e4f5a6b",
            "description": "fire",
            "channel": "phone",
            "priority": "medium"
        })
    }

    fn parse(value: &Value) -> Result<IncidentRequest, ValidationError> {
        IncidentRequest::from_json(value.to_string().as_bytes())
    }

    #[test]
    fn test_state_defaults_to_open() {
        let request = parse(&valid_json()).unwrap();
        assert_eq!(request.state, IncidentState::Open);
        assert_eq!(request.manager_id, None);
        assert_eq!(request.channel, IncidentChannel::Phone);
        assert_eq!(request.priority, IncidentPriority::Medium);
    }

    #[test]
    fn test_rejects_values_outside_schema() {
        let cases = [
            ("user_id", json!("invalid-uuid")),
            ("company_id", json!("invalid-uuid")),
            ("manager_id", json!("not-a-uuid")),
            ("state", json!("invalid")),
            ("channel", json!("invalid")),
            ("priority", json!("urgent")),
            ("description", json!(42)),
        ];

        for (field, value) in cases {
            let mut body = valid_json();
            body[field] = value;
            assert!(
                matches!(parse(&body), Err(ValidationError::MalformedBody(_))),
                "{field} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_missing_and_empty_fields() {
        for field in ["user_id", "company_id", "description", "channel", "priority"] {
            let mut body = valid_json();
            body.as_object_mut().unwrap().remove(field);
            assert!(parse(&body).is_err(), "missing {field} should be rejected");
        }

        let mut body = valid_json();
        body["description"] = json!("   ");
        assert_eq!(
            parse(&body).unwrap_err(),
            ValidationError::EmptyField("description")
        );

        assert!(IncidentRequest::from_json(b"{not json").is_err());
    }

    #[test]
    fn test_serializes_canonical_wire_format() {
        let mut body = valid_json();
        body["state"] = json!("in_progress");
        let request = parse(&body).unwrap();

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["user_id"], "6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10");
        assert_eq!(wire["manager_id"], Value::Null);
        assert_eq!(wire["state"], "in_progress");
        assert_eq!(wire["channel"], "phone");
    }

    #[test]
    fn test_form_fields_apply_mobile_defaults() {
        let fields = HashMap::from([
            (
                "user_id".to_string(),
                "6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10".to_string(),
            ),
            (
                "company_id".to_string(),
                "0b7a0f5e-2c3d-4e5f-8a9b-1c2d3e4f5a6b".to_string(),
            ),
            ("description".to_string(), "broken screen".to_string()),
        ]);

        let request = IncidentRequest::from_form_fields(&fields).unwrap();
        assert_eq!(request.state, IncidentState::Open);
        assert_eq!(request.channel, IncidentChannel::Mobile);
        assert_eq!(request.priority, IncidentPriority::Medium);

        let form = request.form_fields();
        assert!(form.contains(&("channel", "mobile".to_string())));
        assert!(!form.iter().any(|(name, _)| *name == "manager_id"));
    }

    #[test]
    fn test_form_fields_are_validated() {
        let base = HashMap::from([
            (
                "user_id".to_string(),
                "6f1c1d1e-8f5e-4a57-9c84-4c2f5f1c2a10".to_string(),
            ),
            (
                "company_id".to_string(),
                "0b7a0f5e-2c3d-4e5f-8a9b-1c2d3e4f5a6b".to_string(),
            ),
            ("description".to_string(), "broken screen".to_string()),
        ]);

        let mut fields = base.clone();
        fields.insert("priority".to_string(), "urgent".to_string());
        assert_eq!(
            IncidentRequest::from_form_fields(&fields).unwrap_err(),
            ValidationError::UnsupportedValue {
                field: "priority",
                value: "urgent".to_string()
            }
        );

        let mut fields = base.clone();
        fields.insert("user_id".to_string(), "U1".to_string());
        assert!(matches!(
            IncidentRequest::from_form_fields(&fields),
            Err(ValidationError::InvalidUuid {
                field: "user_id",
                ..
            })
        ));

        let mut fields = base;
        fields.remove("description");
        assert_eq!(
            IncidentRequest::from_form_fields(&fields).unwrap_err(),
            ValidationError::MissingField("description")
        );
    }

    #[test]
    fn test_record_message_defaults() {
        let record: IncidentRecord = serde_json::from_value(json!({
            "id": "1d7d2b3c-7a51-4c4e-9a34-2b8a7c1f9e00",
            "description": "fire",
            "creation_date": "2023-01-01T00:00:00"
        }))
        .unwrap();
        assert_eq!(record.message, DEFAULT_CREATED_MESSAGE);
    }
}
