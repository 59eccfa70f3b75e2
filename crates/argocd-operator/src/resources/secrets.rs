//! Admin credentials and the server signing key

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::collections::BTreeMap;

use super::{ResourceBuilder, SERVER};
use crate::error::{OperatorError, Result};

pub const ARGOCD_SECRET: &str = "argocd-secret";
pub const ADMIN_PASSWORD_KEY: &str = "admin.password";
pub const ADMIN_PASSWORD_MTIME_KEY: &str = "admin.passwordMtime";
pub const SERVER_SECRET_KEY: &str = "server.secretkey";

const PASSWORD_LENGTH: usize = 24;

/// Random alphanumeric admin password
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Random 32 byte key, base64 encoded
pub fn generate_secret_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// bcrypt hash as stored in `admin.password`. Hashing is CPU bound and
/// runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| OperatorError::Credentials(format!("hashing task failed: {}", e)))?
        .map_err(OperatorError::from)
}

fn byte_data(entries: Vec<(&str, String)>) -> BTreeMap<String, ByteString> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
        .collect()
}

impl ResourceBuilder<'_> {
    /// `<cr>-cluster`
    pub fn cluster_secret_name(&self) -> String {
        self.component_name("cluster")
    }

    /// Build the `<cr>-cluster` secret holding the plain admin password
    pub fn build_cluster_secret(&self, password: &str) -> Secret {
        Secret {
            metadata: self.metadata(self.cluster_secret_name(), "cluster"),
            type_: Some("Opaque".to_string()),
            data: Some(byte_data(vec![(ADMIN_PASSWORD_KEY, password.to_string())])),
            ..Default::default()
        }
    }

    /// Build argocd-secret with a fresh server key and, when given, the
    /// hashed admin password and its mtime. Applied with missing-keys-only
    /// semantics.
    pub fn build_argocd_secret(&self, admin: Option<(&str, &str)>) -> Secret {
        let mut entries = vec![(SERVER_SECRET_KEY, generate_secret_key())];
        if let Some((password_hash, mtime)) = admin {
            entries.push((ADMIN_PASSWORD_KEY, password_hash.to_string()));
            entries.push((ADMIN_PASSWORD_MTIME_KEY, mtime.to_string()));
        }
        Secret {
            metadata: self.metadata(ARGOCD_SECRET, SERVER),
            type_: Some("Opaque".to_string()),
            data: Some(byte_data(entries)),
            ..Default::default()
        }
    }
}

/// Read a UTF-8 value out of a Secret
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::create_test_argocd;

    #[test]
    fn test_generate_password() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_secret_key() {
        let key = generate_secret_key();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[tokio::test]
    async fn test_hash_password_verifies() {
        let hash = hash_password("s3cret").await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(bcrypt::verify("s3cret", &hash).unwrap());
    }

    #[test]
    fn test_cluster_secret() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let secret = builder.build_cluster_secret("password");

        assert_eq!(secret.metadata.name.as_deref(), Some("example-cluster"));
        assert_eq!(
            secret_value(&secret, ADMIN_PASSWORD_KEY).as_deref(),
            Some("password")
        );
    }

    #[test]
    fn test_argocd_secret_keys() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let secret = builder.build_argocd_secret(Some(("$2b$10$hash", "2026-01-01T00:00:00Z")));

        assert_eq!(secret.metadata.name.as_deref(), Some("argocd-secret"));
        let data = secret.data.as_ref().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(
            secret_value(&secret, ADMIN_PASSWORD_MTIME_KEY).as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
        assert!(data.contains_key(SERVER_SECRET_KEY));
    }

    #[test]
    fn test_argocd_secret_without_admin() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let secret = builder.build_argocd_secret(None);

        let data = secret.data.as_ref().unwrap();
        assert_eq!(data.len(), 1);
        assert!(!data.contains_key(ADMIN_PASSWORD_KEY));
    }
}
