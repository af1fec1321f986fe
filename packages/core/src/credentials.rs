//! Control-plane credentials.
//!
//! Static keys from the environment win; otherwise the instance profile
//! attached to the instance is read from the metadata service.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::MetadataSource;

const ROLE_LIST_KEY: &str = "iam/security-credentials/";

/// Signing credentials for the control-plane API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Instance-profile document served by the metadata service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceProfileCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
}

impl Credentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Some(Self {
            access_key_id: non_empty("AWS_ACCESS_KEY_ID")?,
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY")?,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        })
    }

    /// Fetches the instance profile's temporary credentials.
    pub fn from_instance_profile(source: &dyn MetadataSource) -> Result<Self> {
        let roles = source.get(ROLE_LIST_KEY).map_err(|e| Error::Credentials {
            message: format!("no instance profile available: {}", e),
        })?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::Credentials {
                message: "instance profile lists no role".to_string(),
            })?;
        debug!("Using instance profile role '{}'", role);

        let document = source
            .get(&format!("{}{}", ROLE_LIST_KEY, role))
            .map_err(|e| Error::Credentials {
                message: format!("failed to fetch credentials for role '{}': {}", role, e),
            })?;
        let parsed: InstanceProfileCredentials =
            serde_json::from_str(&document).map_err(|e| Error::Credentials {
                message: format!("malformed credentials document: {}", e),
            })?;

        Ok(Self {
            access_key_id: parsed.access_key_id,
            secret_access_key: parsed.secret_access_key,
            session_token: parsed.token.filter(|token| !token.is_empty()),
        })
    }

    /// Environment credentials, falling back to the instance profile.
    pub fn resolve(source: &dyn MetadataSource) -> Result<Self> {
        if let Some(credentials) = Self::from_env() {
            debug!("Using credentials from the environment");
            return Ok(credentials);
        }
        Self::from_instance_profile(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::FakeMetadata;

    const PROFILE_DOCUMENT: &str = r#"{
        "Code": "Success",
        "LastUpdated": "2024-03-01T10:00:00Z",
        "Type": "AWS-HMAC",
        "AccessKeyId": "ASIAEXAMPLE",
        "SecretAccessKey": "secret",
        "Token": "session",
        "Expiration": "2024-03-01T16:00:00Z"
    }"#;

    #[test]
    fn test_from_lookup() {
        let credentials = Credentials::from_lookup(|name| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKIDEXAMPLE".to_string()),
            "AWS_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            "AWS_SESSION_TOKEN" => Some(String::new()),
            _ => None,
        })
        .unwrap();

        assert_eq!(credentials.access_key_id, "AKIDEXAMPLE");
        assert_eq!(credentials.session_token, None);
    }

    #[test]
    fn test_from_lookup_requires_both_keys() {
        let credentials = Credentials::from_lookup(|name| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKIDEXAMPLE".to_string()),
            _ => None,
        });
        assert!(credentials.is_none());
    }

    #[test]
    fn test_from_instance_profile() {
        let source = FakeMetadata::with(&[
            ("iam/security-credentials/", "volume-role\n"),
            ("iam/security-credentials/volume-role", PROFILE_DOCUMENT),
        ]);

        let credentials = Credentials::from_instance_profile(&source).unwrap();
        assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credentials.secret_access_key, "secret");
        assert_eq!(credentials.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_missing_instance_profile() {
        let source = FakeMetadata::default();
        let err = Credentials::from_instance_profile(&source).unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "very-secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("\"token\""));
    }
}
