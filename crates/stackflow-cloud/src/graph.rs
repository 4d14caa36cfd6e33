//! Declarative resource graph
//!
//! A [`ResourceGraph`] is an ordered set of [`ResourceNode`]s keyed by
//! logical name. Parameters may refer to other nodes with `${name}` (the
//! external ID) or `${name.attr}` (an output attribute); every referenced
//! name is an implicit dependency.

use crate::error::{GraphError, StackResult};
use crate::resolver;
use crate::schema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Declared parameters of a resource, kept sorted for stable fingerprints
pub type Params = BTreeMap<String, serde_json::Value>;

/// Kind of cloud resource a node describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityGroup,
    LaunchTemplate,
    AutoscalingGroup,
    LoadBalancer,
    TargetGroup,
    Listener,
    /// Listener routing rule
    Route,
    InternetGateway,
    RouteTable,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::SecurityGroup,
        ResourceKind::LaunchTemplate,
        ResourceKind::AutoscalingGroup,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::Route,
        ResourceKind::InternetGateway,
        ResourceKind::RouteTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::LaunchTemplate => "launch-template",
            ResourceKind::AutoscalingGroup => "autoscaling-group",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::Listener => "listener",
            ResourceKind::Route => "route",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::RouteTable => "route-table",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown resource kind '{}' (expected one of: {})",
                    s,
                    ResourceKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// `${target}` or `${target.attribute}` inside a parameter string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub attribute: Option<String>,
}

impl Reference {
    /// Parses the inside of a `${...}` placeholder
    fn parse(inner: &str) -> Option<Self> {
        let (target, attribute) = match inner.split_once('.') {
            Some((t, a)) => (t, Some(a)),
            None => (inner, None),
        };
        if !is_valid_name(target) || attribute.is_some_and(|a| a.is_empty()) {
            return None;
        }
        Some(Self {
            target: target.to_string(),
            attribute: attribute.map(|a| a.to_string()),
        })
    }

    /// Returns the reference when `value` consists of exactly one placeholder
    pub fn whole(value: &str) -> Option<Self> {
        let inner = value.strip_prefix("${")?.strip_suffix('}')?;
        if inner.contains("${") || inner.contains('}') {
            return None;
        }
        Self::parse(inner)
    }
}

/// Calls `f` with every placeholder found in `text`, in order.
///
/// Fails on an unterminated or malformed placeholder; the error carries the
/// offending text.
pub(crate) fn scan_placeholders(
    text: &str,
    mut f: impl FnMut(std::ops::Range<usize>, Reference),
) -> Result<(), String> {
    let mut offset = 0;
    while let Some(start) = text[offset..].find("${") {
        let start = offset + start;
        let Some(len) = text[start + 2..].find('}') else {
            return Err(text[start..].to_string());
        };
        let end = start + 2 + len;
        let inner = &text[start + 2..end];
        let reference = Reference::parse(inner).ok_or_else(|| text[start..=end].to_string())?;
        f(start..end + 1, reference);
        offset = end + 1;
    }
    Ok(())
}

fn collect_references(
    node: &str,
    value: &serde_json::Value,
    out: &mut Vec<Reference>,
) -> Result<(), GraphError> {
    match value {
        serde_json::Value::String(s) => scan_placeholders(s, |_, r| out.push(r)).map_err(|bad| {
            GraphError::InvalidReference {
                node: node.to_string(),
                reference: bad,
            }
        }),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(node, item, out)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_references(node, item, out)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One cloud resource to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical name, unique within the graph and stable across runs
    pub name: String,

    pub kind: ResourceKind,

    #[serde(default)]
    pub params: Params,

    /// Explicitly declared dependencies
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: Params::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// All references in the parameters, in parameter order
    pub fn references(&self) -> Result<Vec<Reference>, GraphError> {
        let mut refs = Vec::new();
        for value in self.params.values() {
            collect_references(&self.name, value, &mut refs)?;
        }
        Ok(refs)
    }

    /// Declared dependencies followed by referenced names, without duplicates.
    ///
    /// Malformed references are skipped here; [`ResourceGraph::validate`]
    /// reports them.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let referenced = self.references().unwrap_or_default();
        for name in self
            .depends_on
            .iter()
            .cloned()
            .chain(referenced.into_iter().map(|r| r.target))
        {
            if !deps.contains(&name) {
                deps.push(name);
            }
        }
        deps
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Ordered set of resource nodes keyed by logical name
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = ResourceNode>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add(node)?;
        }
        Ok(graph)
    }

    /// Appends a node; declaration order is kept and used for tie-breaking
    pub fn add(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.name) {
            return Err(GraphError::DuplicateName(node.name));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declaration index of a node
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks names, references, acyclicity and kind-specific parameters.
    ///
    /// Has no side effects. Cycles are reported before parameter problems.
    pub fn validate(&self) -> StackResult<()> {
        for node in &self.nodes {
            if !is_valid_name(&node.name) {
                return Err(GraphError::InvalidName(node.name.clone()).into());
            }
            node.references()?;
            for dep in node.dependencies() {
                if !self.contains(&dep) {
                    return Err(GraphError::UnresolvedDependency {
                        node: node.name.clone(),
                        missing: dep,
                    }
                    .into());
                }
            }
        }

        if let Some(cycle) = resolver::find_cycle(self) {
            return Err(cycle.into());
        }

        for node in &self.nodes {
            schema::check_node(self, node)?;
        }
        schema::check_graph(self)?;

        tracing::debug!(nodes = self.nodes.len(), "Resource graph is valid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use serde_json::json;

    fn network(name: &str) -> ResourceNode {
        ResourceNode::new(name, ResourceKind::Network).with_param("cidr_block", "10.0.0.0/16")
    }

    fn subnet(name: &str, vpc: &str, cidr: &str) -> ResourceNode {
        ResourceNode::new(name, ResourceKind::Subnet)
            .with_param("network", format!("${{{}}}", vpc))
            .with_param("cidr_block", cidr)
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
        assert_eq!(
            serde_json::to_value(ResourceKind::AutoscalingGroup).unwrap(),
            json!("autoscaling-group")
        );
    }

    #[test]
    fn test_references_become_dependencies() {
        let node = ResourceNode::new("web", ResourceKind::Listener)
            .with_param("load_balancer", "${lb}")
            .with_param("fixed_response", json!({"message_body": "hello from ${lb.dns_name}"}))
            .with_dependency("tg");

        // Parameters are visited in key order: fixed_response, load_balancer
        let refs = node.references().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].attribute.as_deref(), Some("dns_name"));
        assert_eq!(refs[1].attribute, None);
        assert_eq!(node.dependencies(), vec!["tg".to_string(), "lb".to_string()]);
    }

    #[test]
    fn test_whole_reference() {
        assert_eq!(
            Reference::whole("${vpc}"),
            Some(Reference {
                target: "vpc".into(),
                attribute: None
            })
        );
        assert!(Reference::whole("prefix-${vpc}").is_none());
        assert!(Reference::whole("vpc-0123").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = ResourceGraph::from_nodes([network("vpc"), network("vpc")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName("vpc".into()));
    }

    #[test]
    fn test_validate_unresolved_dependency() {
        let graph = ResourceGraph::from_nodes([subnet("a", "missing", "10.0.1.0/24")]).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(
            err,
            StackError::Graph(GraphError::UnresolvedDependency { ref missing, .. }) if missing == "missing"
        ));
    }

    #[test]
    fn test_validate_malformed_reference() {
        let graph = ResourceGraph::from_nodes([
            network("vpc"),
            ResourceNode::new("a", ResourceKind::Subnet)
                .with_param("network", "${vpc")
                .with_param("cidr_block", "10.0.1.0/24"),
        ])
        .unwrap();
        assert!(matches!(
            graph.validate().unwrap_err(),
            StackError::Graph(GraphError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_validate_cycle_before_schema() {
        // Parameters are invalid too, but the cycle wins
        let graph = ResourceGraph::from_nodes([
            ResourceNode::new("a", ResourceKind::Network).with_dependency("b"),
            ResourceNode::new("b", ResourceKind::Network).with_dependency("a"),
        ])
        .unwrap();
        match graph.validate().unwrap_err() {
            StackError::Cycle(cycle) => {
                assert!(cycle.path.contains(&"a".to_string()));
                assert!(cycle.path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_self_dependency_is_cycle() {
        let graph = ResourceGraph::from_nodes([network("vpc").with_dependency("vpc")]).unwrap();
        assert!(matches!(graph.validate(), Err(StackError::Cycle(_))));
    }

    #[test]
    fn test_validate_invalid_name() {
        let graph = ResourceGraph::from_nodes([network("my vpc")]).unwrap();
        assert!(matches!(
            graph.validate(),
            Err(StackError::Graph(GraphError::InvalidName(_)))
        ));
    }

    #[test]
    fn test_validate_ok() {
        let graph = ResourceGraph::from_nodes([
            network("vpc"),
            subnet("a", "vpc", "10.0.1.0/24"),
            subnet("b", "vpc", "10.0.2.0/24"),
        ])
        .unwrap();
        graph.validate().unwrap();
        assert_eq!(graph.position("b"), Some(2));
    }
}
