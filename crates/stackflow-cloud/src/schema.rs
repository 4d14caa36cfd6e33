//! Kind-specific parameter checks
//!
//! Reference parameters accept either `${name}` pointing at a node of the
//! expected kind, or a literal external ID of a resource created outside
//! the graph (e.g. an existing `vpc-0105c14ae6db35835`).

use crate::error::GraphError;
use crate::graph::{Reference, ResourceGraph, ResourceKind, ResourceNode};
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// IPv4 block in CIDR notation, host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    fn mask(prefix: u8) -> u32 {
        if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `other` lies entirely inside this block
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix
            && u32::from(other.addr) & Self::mask(self.prefix) == u32::from(self.addr)
    }
}

impl std::str::FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in a.b.c.d/n form", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("'{}' is not an IPv4 address", addr))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("prefix '{}' must be 0-32", prefix))?;
        if u32::from(addr) & !Self::mask(prefix) != 0 {
            return Err(format!("'{}' has host bits set", s));
        }
        Ok(Self { addr, prefix })
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Target of a reference parameter
enum Target<'a> {
    Node(&'a ResourceNode),
    External,
}

struct Checker<'a> {
    graph: &'a ResourceGraph,
    node: &'a ResourceNode,
}

impl<'a> Checker<'a> {
    fn invalid(&self, param: &str, reason: impl Into<String>) -> GraphError {
        GraphError::InvalidParameter {
            node: self.node.name.clone(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    fn missing(&self, param: &str) -> GraphError {
        GraphError::MissingParameter {
            node: self.node.name.clone(),
            kind: self.node.kind,
            param: param.to_string(),
        }
    }

    fn required(&self, key: &str) -> Result<&'a Value, GraphError> {
        self.node.params.get(key).ok_or_else(|| self.missing(key))
    }

    fn str_value<'v>(&self, key: &str, value: &'v Value) -> Result<&'v str, GraphError> {
        value
            .as_str()
            .ok_or_else(|| self.invalid(key, "expected a string"))
    }

    fn required_str(&self, key: &str) -> Result<&'a str, GraphError> {
        let value = self.required(key)?;
        self.str_value(key, value)
    }

    fn optional_str(&self, key: &str) -> Result<Option<&'a str>, GraphError> {
        self.node
            .params
            .get(key)
            .map(|v| self.str_value(key, v))
            .transpose()
    }

    fn u64_value(&self, key: &str, value: &Value) -> Result<u64, GraphError> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| self.invalid(key, "expected a non-negative integer")),
            Value::String(s) => s
                .parse()
                .map_err(|_| self.invalid(key, "expected a non-negative integer")),
            _ => Err(self.invalid(key, "expected a non-negative integer")),
        }
    }

    fn optional_u64(&self, key: &str) -> Result<Option<u64>, GraphError> {
        self.node
            .params
            .get(key)
            .map(|v| self.u64_value(key, v))
            .transpose()
    }

    fn port(&self, key: &str, value: &Value, min: u64) -> Result<u64, GraphError> {
        let port = self.u64_value(key, value)?;
        if !(min..=65535).contains(&port) {
            return Err(self.invalid(key, format!("port {} is outside {}-65535", port, min)));
        }
        Ok(port)
    }

    fn optional_bool(&self, key: &str) -> Result<(), GraphError> {
        match self.node.params.get(key) {
            None | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err(self.invalid(key, "expected true or false")),
        }
    }

    fn one_of(&self, key: &str, allowed: &[&str]) -> Result<(), GraphError> {
        if let Some(value) = self.optional_str(key)?
            && !allowed.contains(&value)
        {
            return Err(self.invalid(
                key,
                format!("'{}' is not one of: {}", value, allowed.join(", ")),
            ));
        }
        Ok(())
    }

    fn cidr_value(&self, key: &str, value: &Value) -> Result<Ipv4Cidr, GraphError> {
        self.str_value(key, value)?
            .parse()
            .map_err(|reason: String| self.invalid(key, reason))
    }

    fn target(&self, key: &str, raw: &str, expected: ResourceKind) -> Result<Target<'a>, GraphError> {
        if raw.trim().is_empty() {
            return Err(self.invalid(key, "empty reference"));
        }
        let Some(reference) = Reference::whole(raw) else {
            if raw.contains("${") {
                return Err(self.invalid(key, "must be a single ${name} reference"));
            }
            return Ok(Target::External);
        };
        if reference.attribute.is_some() {
            // An attribute is an arbitrary output, its kind cannot be checked
            return Ok(Target::External);
        }
        // Existence is checked by ResourceGraph::validate before schema checks
        let Some(target) = self.graph.get(&reference.target) else {
            return Err(GraphError::UnresolvedDependency {
                node: self.node.name.clone(),
                missing: reference.target,
            });
        };
        if target.kind != expected {
            return Err(GraphError::WrongReferenceKind {
                node: self.node.name.clone(),
                param: key.to_string(),
                target: target.name.clone(),
                expected,
                actual: target.kind,
            });
        }
        Ok(Target::Node(target))
    }

    fn reference(&self, key: &str, expected: ResourceKind) -> Result<Target<'a>, GraphError> {
        let raw = self.required_str(key)?;
        self.target(key, raw, expected)
    }

    fn reference_list(
        &self,
        key: &str,
        expected: ResourceKind,
        required: bool,
    ) -> Result<(), GraphError> {
        let items = match self.node.params.get(key) {
            None if required => return Err(self.missing(key)),
            None => return Ok(()),
            Some(Value::Array(items)) => items,
            Some(Value::String(single)) => {
                self.target(key, single, expected)?;
                return Ok(());
            }
            Some(_) => return Err(self.invalid(key, "expected a list of references")),
        };
        if required && items.is_empty() {
            return Err(self.invalid(key, "must not be empty"));
        }
        for item in items {
            let raw = self.str_value(key, item)?;
            self.target(key, raw, expected)?;
        }
        Ok(())
    }

    fn objects(&self, key: &str) -> Result<Vec<&'a serde_json::Map<String, Value>>, GraphError> {
        match self.node.params.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Object(single)) => Ok(vec![single]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| self.invalid(key, "expected a list of objects"))
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "expected a list of objects")),
        }
    }
}

/// Checks one node's parameters against its kind
pub(crate) fn check_node(graph: &ResourceGraph, node: &ResourceNode) -> Result<(), GraphError> {
    let c = Checker { graph, node };

    match node.kind {
        ResourceKind::Network => {
            let cidr = c.required("cidr_block")?;
            c.cidr_value("cidr_block", cidr)?;
            c.optional_bool("enable_dns_support")?;
            c.optional_bool("enable_dns_hostnames")?;
        }
        ResourceKind::Subnet => {
            let parent = c.reference("network", ResourceKind::Network)?;
            let cidr = c.cidr_value("cidr_block", c.required("cidr_block")?)?;
            if let Target::Node(network) = parent
                && let Some(parent_cidr) = network.param("cidr_block")
            {
                let parent_cidr = c.cidr_value("cidr_block", parent_cidr)?;
                if !parent_cidr.contains(&cidr) {
                    return Err(c.invalid(
                        "cidr_block",
                        format!(
                            "{} is not contained in network '{}' ({})",
                            cidr, network.name, parent_cidr
                        ),
                    ));
                }
            }
            c.optional_str("availability_zone")?;
            c.optional_bool("map_public_ip")?;
        }
        ResourceKind::SecurityGroup => {
            c.reference("network", ResourceKind::Network)?;
            c.optional_str("group_name")?;
            c.optional_str("description")?;
            for rule in c.objects("ingress")? {
                let from = rule
                    .get("from_port")
                    .ok_or_else(|| c.invalid("ingress", "rule is missing from_port"))?;
                let from = c.port("ingress", from, 0)?;
                let to = match rule.get("to_port") {
                    Some(v) => c.port("ingress", v, 0)?,
                    None => from,
                };
                if from > to {
                    return Err(c.invalid(
                        "ingress",
                        format!("from_port {} is greater than to_port {}", from, to),
                    ));
                }
                let cidr = rule
                    .get("cidr")
                    .ok_or_else(|| c.invalid("ingress", "rule is missing cidr"))?;
                c.cidr_value("ingress", cidr)?;
                if let Some(protocol) = rule.get("protocol") {
                    let protocol = c.str_value("ingress", protocol)?;
                    if !["tcp", "udp", "icmp", "-1"].contains(&protocol) {
                        return Err(c.invalid(
                            "ingress",
                            format!("unknown protocol '{}'", protocol),
                        ));
                    }
                }
            }
        }
        ResourceKind::LaunchTemplate => {
            c.required_str("image_id")?;
            c.required_str("instance_type")?;
            c.optional_str("key_name")?;
            c.optional_str("user_data")?;
            c.optional_str("iam_instance_profile")?;
            c.reference_list("security_groups", ResourceKind::SecurityGroup, false)?;
        }
        ResourceKind::AutoscalingGroup => {
            c.reference("launch_template", ResourceKind::LaunchTemplate)?;
            c.reference_list("subnets", ResourceKind::Subnet, true)?;
            c.reference_list("target_groups", ResourceKind::TargetGroup, false)?;
            let min = c.optional_u64("min_size")?.unwrap_or(1);
            let max = c.optional_u64("max_size")?.unwrap_or(min.max(1));
            let desired = c.optional_u64("desired_capacity")?.unwrap_or(min);
            if !(min <= desired && desired <= max) {
                return Err(c.invalid(
                    "desired_capacity",
                    format!(
                        "requires min_size <= desired_capacity <= max_size, got {} <= {} <= {}",
                        min, desired, max
                    ),
                ));
            }
            c.one_of("health_check_type", &["EC2", "ELB"])?;
        }
        ResourceKind::LoadBalancer => {
            c.reference_list("subnets", ResourceKind::Subnet, true)?;
            c.reference_list("security_groups", ResourceKind::SecurityGroup, false)?;
            c.one_of("scheme", &["internet-facing", "internal"])?;
            c.one_of("lb_type", &["application", "network"])?;
        }
        ResourceKind::TargetGroup => {
            c.reference("network", ResourceKind::Network)?;
            c.port("port", c.required("port")?, 1)?;
            c.one_of("protocol", &["HTTP", "HTTPS", "TCP"])?;
            c.one_of("target_type", &["instance", "ip"])?;
            c.optional_str("health_check_path")?;
        }
        ResourceKind::Listener => {
            c.reference("load_balancer", ResourceKind::LoadBalancer)?;
            c.port("port", c.required("port")?, 1)?;
            c.one_of("protocol", &["HTTP", "HTTPS", "TCP"])?;
            let forward = node.params.contains_key("target_group");
            let fixed = node.params.contains_key("fixed_response");
            match (forward, fixed) {
                (true, true) => {
                    return Err(c.invalid(
                        "target_group",
                        "set either target_group or fixed_response, not both",
                    ));
                }
                (false, false) => return Err(c.missing("target_group")),
                (true, false) => {
                    c.reference("target_group", ResourceKind::TargetGroup)?;
                }
                (false, true) => {
                    let response = c
                        .objects("fixed_response")?
                        .into_iter()
                        .next()
                        .ok_or_else(|| c.invalid("fixed_response", "expected an object"))?;
                    let status = response
                        .get("status_code")
                        .ok_or_else(|| c.invalid("fixed_response", "missing status_code"))?;
                    let status = c.u64_value("fixed_response", status)?;
                    if !(200..=599).contains(&status) {
                        return Err(c.invalid(
                            "fixed_response",
                            format!("status_code {} is outside 200-599", status),
                        ));
                    }
                }
            }
        }
        ResourceKind::Route => {
            c.reference("listener", ResourceKind::Listener)?;
            c.reference("target_group", ResourceKind::TargetGroup)?;
            let priority = c.u64_value("priority", c.required("priority")?)?;
            if !(1..=50000).contains(&priority) {
                return Err(c.invalid(
                    "priority",
                    format!("{} is outside 1-50000", priority),
                ));
            }
            match c.required("path_patterns")? {
                Value::String(_) => {}
                Value::Array(items) if !items.is_empty() => {
                    for item in items {
                        c.str_value("path_patterns", item)?;
                    }
                }
                Value::Array(_) => return Err(c.invalid("path_patterns", "must not be empty")),
                _ => return Err(c.invalid("path_patterns", "expected a list of strings")),
            }
        }
        ResourceKind::InternetGateway => {
            c.reference("network", ResourceKind::Network)?;
        }
        ResourceKind::RouteTable => {
            c.reference("network", ResourceKind::Network)?;
            for route in c.objects("routes")? {
                let destination = route
                    .get("destination_cidr")
                    .ok_or_else(|| c.invalid("routes", "route is missing destination_cidr"))?;
                c.cidr_value("routes", destination)?;
                let gateway = route
                    .get("gateway")
                    .ok_or_else(|| c.invalid("routes", "route is missing gateway"))?;
                let gateway = c.str_value("routes", gateway)?;
                c.target("routes", gateway, ResourceKind::InternetGateway)?;
            }
            c.reference_list("subnets", ResourceKind::Subnet, false)?;
        }
    }
    Ok(())
}

/// Checks that span several nodes
pub(crate) fn check_graph(graph: &ResourceGraph) -> Result<(), GraphError> {
    let mut priorities: HashMap<(String, u64), &str> = HashMap::new();
    for node in graph.iter().filter(|n| n.kind == ResourceKind::Route) {
        let (Some(listener), Some(priority)) = (
            node.param_str("listener"),
            node.param("priority").and_then(|p| {
                p.as_u64()
                    .or_else(|| p.as_str().and_then(|s| s.parse().ok()))
            }),
        ) else {
            continue;
        };
        if let Some(first) = priorities.insert((listener.to_string(), priority), node.name.as_str()) {
            let listener = Reference::whole(listener)
                .map(|r| r.target)
                .unwrap_or_else(|| listener.to_string());
            return Err(GraphError::DuplicatePriority {
                listener,
                priority,
                first: first.to_string(),
                second: node.name.clone(),
            });
        }
    }
    Ok(())
}
