//! Cloud provider trait definition

use crate::error::Result;
use crate::graph::{Params, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cloud provider abstraction trait
///
/// Adapters translate the three primitive operations into calls against a
/// concrete cloud API. Errors must be classified through
/// [`CloudError`](crate::CloudError) so the engine can tell transient
/// failures from permanent ones.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Create a resource from fully resolved parameters
    async fn create(&self, request: &CreateRequest) -> Result<CreatedResource>;

    /// Look up a previously created resource
    async fn describe(&self, kind: ResourceKind, external_id: &str) -> Result<ResourceDescription>;

    /// Delete a resource; `CloudError::NotFound` means it is already gone
    async fn delete(&self, kind: ResourceKind, external_id: &str) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Input of [`CloudProvider::create`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Logical name, used by adapters for tagging
    pub logical_name: String,

    pub kind: ResourceKind,

    /// Parameters with every reference already substituted
    pub params: Params,
}

impl CreateRequest {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Integer parameter; numeric strings are accepted
    pub fn u64_param(&self, key: &str) -> Option<u64> {
        match self.params.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }

    /// String list parameter; a single string counts as a one-element list
    pub fn str_list_param(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Output of [`CloudProvider::create`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedResource {
    /// Provider-assigned identifier
    pub external_id: String,

    /// Additional outputs (DNS names, ARNs, ...) that other nodes may reference
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl CreatedResource {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Live state of a resource as seen by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Available,
    Pending,
    Missing,
}

impl std::fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveStatus::Available => write!(f, "available"),
            LiveStatus::Pending => write!(f, "pending"),
            LiveStatus::Missing => write!(f, "missing"),
        }
    }
}

/// Output of [`CloudProvider::describe`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub status: LiveStatus,

    /// Live parameters in the same shape as the declared ones, when the
    /// provider can reconstruct them
    pub params: Option<Params>,
}

impl ResourceDescription {
    pub fn available() -> Self {
        Self {
            status: LiveStatus::Available,
            params: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            status: LiveStatus::Missing,
            params: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_params() {
        let mut params = Params::new();
        params.insert("port".into(), json!("443"));
        params.insert("min_size".into(), json!(2));
        params.insert("subnets".into(), json!(["subnet-1", "subnet-2"]));
        params.insert("single".into(), json!("subnet-3"));
        let request = CreateRequest {
            logical_name: "web".into(),
            kind: ResourceKind::Listener,
            params,
        };

        assert_eq!(request.u64_param("port"), Some(443));
        assert_eq!(request.u64_param("min_size"), Some(2));
        assert_eq!(request.str_list_param("subnets"), vec!["subnet-1", "subnet-2"]);
        assert_eq!(request.str_list_param("single"), vec!["subnet-3"]);
        assert!(request.str_list_param("missing").is_empty());
    }

    #[test]
    fn test_auth_status() {
        assert!(AuthStatus::ok("123456789012").authenticated);
        let failed = AuthStatus::failed("no credentials");
        assert!(!failed.authenticated);
        assert_eq!(failed.error.as_deref(), Some("no credentials"));
    }
}
