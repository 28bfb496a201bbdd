pub mod config;
pub mod context;
pub mod endpoints;
pub mod errors;
pub mod intent;
pub mod profile;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use context::ConversationContext;
pub use endpoints::{rule_for, validate_required, CrmAction, CrmOperation, EndpointRule, HttpMethod};
pub use errors::{ApplicationError, DomainError, InterfaceError, ProfileError, ValidationError};
pub use intent::{IntentDescriptor, IntentKind, SubjectRef};
pub use profile::{CrmCredentials, CrmProfile};
