//! OpenDAL Operator factory for tundra vault backends

use anyhow::{Context, Result};
use opendal::Operator;
use tundra_core::config::{StorageBackend, StorageConfig};

/// Access keys for S3-compatible endpoints
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    /// Read AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY (or the TUNDRA_ prefixed variants)
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("TUNDRA_ACCESS_KEY_ID"))
            .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("TUNDRA_SECRET_ACCESS_KEY"))
            .context("S3 credentials not set: export AWS_SECRET_ACCESS_KEY")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Expand a leading `~/` using $HOME
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{rest}", home.trim_end_matches('/')),
        _ => path.to_string(),
    }
}

/// Build an OpenDAL Operator for the configured backend.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP this returns an
/// error; otherwise a warning is logged for non-HTTPS endpoints. Credentials
/// are only consulted for S3.
pub fn build_operator(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let root = expand_home(&storage.root.to_string_lossy());

    let op = match storage.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),

        StorageBackend::Fs => {
            let builder = opendal::services::Fs::default().root(&root);
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }

        StorageBackend::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP; access keys travel unencrypted. \
                     Set storage.enforce_tls = true and use HTTPS in production."
                );
            }
            let creds = creds.context("S3 backend requires credentials")?;

            // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
            let builder = opendal::services::S3::default()
                .root(&root)
                .endpoint(&storage.endpoint)
                .region(&storage.region)
                .bucket(&storage.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);

            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
    };

    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
        }
    }

    #[test]
    fn test_build_memory() {
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_build_fs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig {
            backend: StorageBackend::Fs,
            root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_s3_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:8333".into(),
            root: PathBuf::from("/vaults"),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_http_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://insecure:8333".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_operator(&storage, Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(
            result.unwrap_err().to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_s3_requires_credentials() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "https://s3.example.com".into(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_err());
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
    }
}
