use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares an S3-compatible object store an `OSSProxyRoute` can bind to.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ossfe.imvictor.tech",
    version = "v1",
    kind = "OSSProxyUpstream",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OSSProxyUpstreamSpec {
    pub provider: Provider,

    pub region: String,

    /// `host[:port]` of the object store.
    pub endpoint: String,

    #[serde(default = "default_true")]
    pub use_https: bool,

    #[serde(default)]
    pub path_style: bool,

    pub credentials: Credentials,

    pub timeout: Option<TimeoutSpec>,

    pub retry: Option<RetrySpec>,
}

fn default_true() -> bool {
    true
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Generic
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Aliyun,
    Tencent,
    Minio,
    Generic,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Inline access keys. Mutually exclusive with `secretRef` in practice,
    /// though the type doesn't enforce it — `secretRef` takes precedence
    /// when both are set.
    pub inline: Option<InlineCredentials>,

    pub secret_ref: Option<SecretRef>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InlineCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default = "default_access_key_id_key")]
    pub access_key_id_key: String,
    #[serde(default = "default_secret_access_key_key")]
    pub secret_access_key_key: String,
}

fn default_access_key_id_key() -> String {
    "accessKeyId".to_string()
}

fn default_secret_access_key_key() -> String {
    "secretAccessKey".to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSpec {
    /// Connect timeout, in seconds. Defaults to 10.
    pub connect: Option<u64>,
}

impl TimeoutSpec {
    pub const DEFAULT_CONNECT_SECS: u64 = 10;

    pub fn connect_secs(&self) -> u64 {
        self.connect.unwrap_or(Self::DEFAULT_CONNECT_SECS)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    pub max_attempts: Option<u32>,
}

impl OSSProxyUpstreamSpec {
    pub fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.timeout
                .map(|t| t.connect_secs())
                .unwrap_or(TimeoutSpec::DEFAULT_CONNECT_SECS),
        )
    }

    /// Namespace the referenced secret lives in, defaulting to the
    /// upstream's own namespace when unset.
    pub fn secret_namespace<'a>(&'a self, upstream_namespace: &'a str) -> Option<&'a str> {
        self.credentials
            .secret_ref
            .as_ref()
            .map(|r| r.namespace.as_deref().unwrap_or(upstream_namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_with_secret_ref(namespace: Option<&str>) -> OSSProxyUpstreamSpec {
        OSSProxyUpstreamSpec {
            credentials: Credentials {
                inline: None,
                secret_ref: Some(SecretRef {
                    name: "creds".to_string(),
                    namespace: namespace.map(str::to_string),
                    access_key_id_key: default_access_key_id_key(),
                    secret_access_key_key: default_secret_access_key_key(),
                }),
            },
            ..Default::default()
        }
    }

    #[test]
    fn secret_namespace_defaults_to_upstream_namespace() {
        let upstream = upstream_with_secret_ref(None);
        assert_eq!(upstream.secret_namespace("ns-a"), Some("ns-a"));
    }

    #[test]
    fn secret_namespace_honors_explicit_override() {
        let upstream = upstream_with_secret_ref(Some("ns-b"));
        assert_eq!(upstream.secret_namespace("ns-a"), Some("ns-b"));
    }

    #[test]
    fn secret_namespace_is_none_without_secret_ref() {
        let upstream = OSSProxyUpstreamSpec::default();
        assert_eq!(upstream.secret_namespace("ns-a"), None);
    }
}
