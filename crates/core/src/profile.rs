use secrecy::{ExposeSecret, SecretString};

use crate::errors::ProfileError;

/// A user's CRM connection as stored by the profile collaborator.
#[derive(Clone, Debug)]
pub struct CrmProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub enabled: bool,
}

/// Per-user CRM credentials, checked for presence.
#[derive(Clone, Debug)]
pub struct CrmCredentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
}

impl CrmProfile {
    pub fn credentials(&self) -> Result<CrmCredentials, ProfileError> {
        if !self.enabled {
            return Err(ProfileError::Disabled { user_id: self.user_id.clone() });
        }
        if self.api_key.expose_secret().trim().is_empty()
            || self.api_secret.expose_secret().trim().is_empty()
        {
            return Err(ProfileError::MissingCredentials { user_id: self.user_id.clone() });
        }
        Ok(CrmCredentials { api_key: self.api_key.clone(), api_secret: self.api_secret.clone() })
    }

    pub fn greeting_name(&self) -> Option<&str> {
        self.display_name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }
}

/// Resolves credentials for `user_id`, distinguishing "never connected".
pub fn credentials_for(
    user_id: &str,
    profile: Option<&CrmProfile>,
) -> Result<CrmCredentials, ProfileError> {
    profile
        .ok_or_else(|| ProfileError::NotConnected { user_id: user_id.to_string() })?
        .credentials()
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{credentials_for, CrmProfile};
    use crate::errors::ProfileError;

    fn profile(enabled: bool, secret: &str) -> CrmProfile {
        CrmProfile {
            user_id: "u-1".to_string(),
            display_name: Some(" Dana ".to_string()),
            api_key: "key-1".to_string().into(),
            api_secret: secret.to_string().into(),
            enabled,
        }
    }

    #[test]
    fn enabled_profile_yields_credentials() {
        let credentials = credentials_for("u-1", Some(&profile(true, "s3cret"))).expect("connected");
        assert_eq!(credentials.api_key.expose_secret(), "key-1");
        assert_eq!(profile(true, "s3cret").greeting_name(), Some("Dana"));
    }

    #[test]
    fn absent_disabled_and_blank_profiles_fail_distinguishably() {
        assert_eq!(
            credentials_for("u-9", None).err(),
            Some(ProfileError::NotConnected { user_id: "u-9".to_string() })
        );
        assert_eq!(
            credentials_for("u-1", Some(&profile(false, "s3cret"))).err(),
            Some(ProfileError::Disabled { user_id: "u-1".to_string() })
        );
        assert_eq!(
            credentials_for("u-1", Some(&profile(true, " "))).err(),
            Some(ProfileError::MissingCredentials { user_id: "u-1".to_string() })
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let debug = format!("{:?}", profile(true, "s3cret"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("key-1"));
    }
}
