use thiserror::Error;

/// A request failed its endpoint rule before reaching the network.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field(s): {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },
    #[error("at least one of {} is required", .fields.join(", "))]
    MissingOneOf { fields: Vec<String> },
    #[error("{action} requires a resolved contact id")]
    MissingContactId { action: String },
    #[error("no endpoint rule for {operation} {action}")]
    UnsupportedAction { action: String, operation: String },
}

impl ValidationError {
    /// Field names the caller still has to supply.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::MissingFields { fields } | Self::MissingOneOf { fields } => fields.clone(),
            Self::MissingContactId { .. } => vec!["contact_id".to_string()],
            Self::UnsupportedAction { .. } => Vec::new(),
        }
    }
}

/// The user's CRM connection cannot be used.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("no CRM profile is connected for user `{user_id}`")]
    NotConnected { user_id: String },
    #[error("the CRM connection for user `{user_id}` is disabled")]
    Disabled { user_id: String },
    #[error("the CRM connection for user `{user_id}` has no api key or secret")]
    MissingCredentials { user_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{
        ApplicationError, DomainError, InterfaceError, ProfileError, ValidationError,
    };

    #[test]
    fn validation_error_names_every_missing_field() {
        let error = ValidationError::MissingFields {
            fields: vec!["contact_id".to_string(), "note".to_string()],
        };
        assert_eq!(error.to_string(), "missing required field(s): contact_id, note");
        assert_eq!(error.fields(), vec!["contact_id".to_string(), "note".to_string()]);

        let one_of = ValidationError::MissingOneOf {
            fields: vec!["contact_id".to_string(), "phone_id".to_string()],
        };
        assert_eq!(one_of.to_string(), "at least one of contact_id, phone_id is required");
    }

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::from(ValidationError::MissingFields {
            fields: vec!["contact_id".to_string()],
        }))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, ref message }
                if correlation_id == "req-1" && message.contains("contact_id")
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn profile_error_stays_distinguishable_through_domain_layer() {
        let domain = DomainError::from(ProfileError::Disabled { user_id: "u-1".to_string() });
        assert!(matches!(domain, DomainError::Profile(ProfileError::Disabled { .. })));
        assert!(domain.to_string().contains("disabled"));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing crm base url".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
