//! Time-limited GET/PUT URLs for object-store keys.
//!
//! URLs carry SigV4-style query parameters and are opaque to consumers; they
//! are a transient view over a key and may be regenerated cheaply. Only bare
//! keys are persisted.

use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOp {
    Get,
    Put,
}

impl SignOp {
    fn method(&self) -> &'static str {
        match self {
            SignOp::Get => "GET",
            SignOp::Put => "PUT",
        }
    }
}

/// Presigned-URL provider over one object-store endpoint.
pub struct UrlSigner {
    endpoint: String,
    access_key_id: String,
    secret_access_key: String,
    default_ttl: Duration,
}

impl UrlSigner {
    /// Fails with a configuration error when the endpoint or key pair is
    /// missing.
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        let endpoint = storage
            .endpoint
            .as_deref()
            .ok_or_else(|| {
                PipelineError::Config(
                    "Storage endpoint not set. Set PODPIPE_STORAGE_ENDPOINT.".to_string(),
                )
            })?
            .trim_end_matches('/')
            .to_string();
        let access_key_id = storage.access_key_id.clone().ok_or_else(|| {
            PipelineError::Config("Storage access key not set. Set PODPIPE_ACCESS_KEY_ID.".to_string())
        })?;
        let secret_access_key = storage.secret_access_key.clone().ok_or_else(|| {
            PipelineError::Config(
                "Storage secret not set. Set PODPIPE_SECRET_ACCESS_KEY.".to_string(),
            )
        })?;
        Ok(Self {
            endpoint,
            access_key_id,
            secret_access_key,
            default_ttl: Duration::from_secs(storage.presign_ttl_secs.max(1)),
        })
    }

    pub fn presign(&self, op: SignOp, key: &str, content_type: Option<&str>) -> Result<String> {
        self.presign_with_ttl(op, key, content_type, self.default_ttl)
    }

    pub fn presign_with_ttl(
        &self,
        op: SignOp,
        key: &str,
        content_type: Option<&str>,
        ttl: Duration,
    ) -> Result<String> {
        if key.is_empty() {
            return Err(PipelineError::Config("Cannot presign an empty key".to_string()));
        }

        let date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let expires = ttl.as_secs();

        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            op.method(),
            key,
            date,
            expires,
            content_type.unwrap_or(""),
            self.access_key_id,
        );
        let mut hasher = Sha256::new();
        hasher.update(self.secret_access_key.as_bytes());
        hasher.update(canonical.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(hasher.finalize());

        let mut url = format!(
            "{}/{}?X-Amz-Algorithm=SIG-HMAC-SHA256&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            self.endpoint, key, self.access_key_id, date, expires,
        );
        if let Some(ct) = content_type {
            url.push_str("&X-Amz-ContentType=");
            url.push_str(&ct.replace('/', "%2F"));
        }
        url.push_str("&X-Amz-Signature=");
        url.push_str(&signature);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> StorageConfig {
        StorageConfig {
            endpoint: Some("https://media.example.com".to_string()),
            access_key_id: Some("AKTEST".to_string()),
            secret_access_key: Some("secret".to_string()),
            presign_ttl_secs: 900,
        }
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let mut cfg = storage();
        cfg.secret_access_key = None;
        assert!(matches!(
            UrlSigner::from_config(&cfg),
            Err(PipelineError::Config(_))
        ));

        let mut cfg = storage();
        cfg.endpoint = None;
        assert!(matches!(
            UrlSigner::from_config(&cfg),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_presigned_url_shape() {
        let signer = UrlSigner::from_config(&storage()).unwrap();
        let url = signer
            .presign(SignOp::Get, "encoded/ep/mp3_128.mp3", None)
            .unwrap();

        assert!(url.starts_with("https://media.example.com/encoded/ep/mp3_128.mp3?"));
        assert!(url.contains("X-Amz-Credential=AKTEST"));
        assert!(url.contains("X-Amz-Expires=900"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_put_and_get_sign_differently() {
        let signer = UrlSigner::from_config(&storage()).unwrap();
        let get = signer.presign(SignOp::Get, "chunks/a/b.ogg", None).unwrap();
        let put = signer
            .presign(SignOp::Put, "chunks/a/b.ogg", Some("audio/ogg"))
            .unwrap();

        let sig = |u: &str| {
            u.split("X-Amz-Signature=")
                .nth(1)
                .map(str::to_string)
                .unwrap()
        };
        assert_ne!(sig(&get), sig(&put));
        assert!(put.contains("X-Amz-ContentType=audio%2Fogg"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let signer = UrlSigner::from_config(&storage()).unwrap();
        assert!(signer.presign(SignOp::Get, "", None).is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let mut cfg = storage();
        cfg.endpoint = Some("https://media.example.com/".to_string());
        let signer = UrlSigner::from_config(&cfg).unwrap();
        let url = signer.presign(SignOp::Get, "a/b", None).unwrap();
        assert!(url.starts_with("https://media.example.com/a/b?"));
    }
}
