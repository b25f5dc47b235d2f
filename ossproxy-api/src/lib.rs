#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Custom resource definitions and wire types shared between the
//! `ossproxy-watcher` reflector and the `ossproxy-proxy` request pipeline.

mod route;
mod upstream;

pub use route::{CachePolicy, OSSProxyRoute, OSSProxyRouteSpec, UpstreamRef};
pub use upstream::{
    Credentials, InlineCredentials, OSSProxyUpstream, OSSProxyUpstreamSpec, Provider, RetrySpec,
    SecretRef, TimeoutSpec,
};

pub use k8s_openapi::api::core::v1::Secret;
pub use kube::{
    api::{Api, ListParams, ObjectMeta},
    Client, Resource, ResourceExt,
};

/// Decoded, ready-to-sign access keys for an upstream.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl ResolvedCredentials {
    /// Decodes an upstream's credentials, preferring `secretRef` (resolved
    /// against `secret`) over `inline` values when both are present.
    pub fn decode(
        upstream: &OSSProxyUpstreamSpec,
        secret: Option<&Secret>,
    ) -> Result<Self, CredentialError> {
        if let Some(secret_ref) = &upstream.credentials.secret_ref {
            let secret = secret.ok_or(CredentialError::MissingSecret)?;
            let data = secret.data.as_ref().ok_or(CredentialError::MissingSecret)?;
            let access_key_id = decode_key(data, &secret_ref.access_key_id_key)?;
            let secret_access_key = decode_key(data, &secret_ref.secret_access_key_key)?;
            return Ok(Self {
                access_key_id,
                secret_access_key,
            });
        }

        if let Some(inline) = &upstream.credentials.inline {
            return Ok(Self {
                access_key_id: inline.access_key_id.clone(),
                secret_access_key: inline.secret_access_key.clone(),
            });
        }

        Err(CredentialError::Unconfigured)
    }
}

fn decode_key(
    data: &std::collections::BTreeMap<String, k8s_openapi::ByteString>,
    key: &str,
) -> Result<String, CredentialError> {
    let bytes = &data
        .get(key)
        .ok_or_else(|| CredentialError::MissingKey(key.to_string()))?
        .0;
    String::from_utf8(bytes.clone()).map_err(|_| CredentialError::NotUtf8(key.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("upstream credentials reference a secret that has not been resolved")]
    MissingSecret,
    #[error("secret does not contain key {0:?}")]
    MissingKey(String),
    #[error("secret key {0:?} is not valid UTF-8")]
    NotUtf8(String),
    #[error("upstream has neither inline credentials nor a secretRef")]
    Unconfigured,
}
