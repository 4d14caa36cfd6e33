//! Parameter resolution and fingerprints
//!
//! Before a node is created its `${...}` references are replaced with the
//! outputs of already realized dependencies. The fingerprint is taken over
//! the *resolved* parameters, so replacing an upstream resource changes the
//! fingerprint of everything that points at it.

use crate::error::ProvisionFailure;
use crate::graph::{Params, Reference, ResourceKind, ResourceNode, scan_placeholders};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// What a realized node exposes to the nodes that reference it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ResolvedOutput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    fn lookup(&self, attribute: Option<&str>) -> Option<Value> {
        match attribute {
            None | Some("id") => Some(Value::String(self.id.clone())),
            Some(attr) => self.attributes.get(attr).cloned(),
        }
    }
}

/// Outputs of realized nodes, keyed by logical name
pub type ResolvedOutputs = HashMap<String, ResolvedOutput>;

fn lookup(outputs: &ResolvedOutputs, reference: &Reference) -> Result<Value, ProvisionFailure> {
    outputs
        .get(&reference.target)
        .and_then(|o| o.lookup(reference.attribute.as_deref()))
        .ok_or_else(|| {
            ProvisionFailure::MissingOutput(match &reference.attribute {
                Some(attr) => format!("{}.{}", reference.target, attr),
                None => reference.target.clone(),
            })
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_value(value: &Value, outputs: &ResolvedOutputs) -> Result<Value, ProvisionFailure> {
    match value {
        Value::String(text) => {
            // A lone placeholder keeps the output's JSON type
            if let Some(reference) = Reference::whole(text) {
                return lookup(outputs, &reference);
            }
            let mut pieces = Vec::new();
            scan_placeholders(text, |range, reference| pieces.push((range, reference)))
                .map_err(ProvisionFailure::MissingOutput)?;
            if pieces.is_empty() {
                return Ok(value.clone());
            }
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for (range, reference) in pieces {
                out.push_str(&text[last..range.start]);
                out.push_str(&render(&lookup(outputs, &reference)?));
                last = range.end;
            }
            out.push_str(&text[last..]);
            Ok(Value::String(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, outputs)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Substitutes every reference in the node's parameters
pub fn resolve_params(node: &ResourceNode, outputs: &ResolvedOutputs) -> Result<Params, ProvisionFailure> {
    node.params
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, outputs)?)))
        .collect()
}

/// Lowercase hex BLAKE3 digest of the kind and resolved parameters
pub fn fingerprint(kind: ResourceKind, params: &Params) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        kind: ResourceKind,
        params: &'a Params,
    }

    // BTreeMap keys serialize sorted; nested objects use serde_json's sorted map
    let bytes = serde_json::to_vec(&Canonical { kind, params }).unwrap_or_default();
    hex::encode(blake3::hash(&bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> ResolvedOutputs {
        let mut lb = ResolvedOutput::new("arn:lb/app/web");
        lb.attributes
            .insert("dns_name".into(), json!("web-123.elb.amazonaws.com"));
        lb.attributes.insert("port".into(), json!(443));
        ResolvedOutputs::from([
            ("vpc".to_string(), ResolvedOutput::new("vpc-0abc")),
            ("lb".to_string(), lb),
        ])
    }

    #[test]
    fn test_resolve_whole_and_embedded() {
        let node = ResourceNode::new("web", ResourceKind::Listener)
            .with_param("load_balancer", "${lb}")
            .with_param("port", "${lb.port}")
            .with_param("note", "served by ${lb.dns_name} in ${vpc}")
            .with_param("tags", json!([{"value": "${vpc.id}"}]));

        let params = resolve_params(&node, &outputs()).unwrap();
        assert_eq!(params["load_balancer"], json!("arn:lb/app/web"));
        assert_eq!(params["port"], json!(443));
        assert_eq!(
            params["note"],
            json!("served by web-123.elb.amazonaws.com in vpc-0abc")
        );
        assert_eq!(params["tags"], json!([{"value": "vpc-0abc"}]));
    }

    #[test]
    fn test_resolve_missing_output() {
        let node = ResourceNode::new("s", ResourceKind::Subnet).with_param("network", "${other}");
        match resolve_params(&node, &outputs()).unwrap_err() {
            ProvisionFailure::MissingOutput(name) => assert_eq!(name, "other"),
            other => panic!("unexpected: {other:?}"),
        }

        let node = ResourceNode::new("s", ResourceKind::Subnet).with_param("x", "${lb.zone}");
        assert!(matches!(
            resolve_params(&node, &outputs()),
            Err(ProvisionFailure::MissingOutput(name)) if name == "lb.zone"
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let mut a = Params::new();
        a.insert("cidr_block".into(), json!("10.0.0.0/16"));
        a.insert("enable_dns".into(), json!({"support": true, "hostnames": true}));

        let mut b = Params::new();
        b.insert("enable_dns".into(), json!({"hostnames": true, "support": true}));
        b.insert("cidr_block".into(), json!("10.0.0.0/16"));

        let fa = fingerprint(ResourceKind::Network, &a);
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, fingerprint(ResourceKind::Network, &b));
        assert_ne!(fa, fingerprint(ResourceKind::Subnet, &a));

        b.insert("cidr_block".into(), json!("10.1.0.0/16"));
        assert_ne!(fa, fingerprint(ResourceKind::Network, &b));
    }
}
