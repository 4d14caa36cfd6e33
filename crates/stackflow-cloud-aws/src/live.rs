//! Live state of described resources, in the shape of declared parameters

use aws_sdk_ec2::types::{InternetGateway, RouteTable, SecurityGroup, Subnet, Vpc};
use aws_sdk_elasticloadbalancingv2::types::{Listener, LoadBalancer, Rule, TargetGroup};
use serde_json::Value;
use stackflow_cloud::{LiveStatus, Params, ResourceDescription};

#[derive(Default)]
struct LiveParams(Params);

impl LiveParams {
    fn put(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), value.into());
        }
        self
    }

    fn describe(self, status: LiveStatus) -> ResourceDescription {
        ResourceDescription {
            status,
            params: if self.0.is_empty() { None } else { Some(self.0) },
        }
    }
}

fn state_status(state: Option<&str>, ready: &str) -> LiveStatus {
    match state {
        Some(s) if s == ready => LiveStatus::Available,
        Some(_) => LiveStatus::Pending,
        None => LiveStatus::Available,
    }
}

pub fn vpc(vpc: &Vpc) -> ResourceDescription {
    LiveParams::default()
        .put("cidr_block", vpc.cidr_block())
        .describe(state_status(vpc.state().map(|s| s.as_str()), "available"))
}

pub fn subnet(subnet: &Subnet) -> ResourceDescription {
    LiveParams::default()
        .put("network", subnet.vpc_id())
        .put("cidr_block", subnet.cidr_block())
        .put("availability_zone", subnet.availability_zone())
        .describe(state_status(subnet.state().map(|s| s.as_str()), "available"))
}

pub fn security_group(group: &SecurityGroup) -> ResourceDescription {
    LiveParams::default()
        .put("network", group.vpc_id())
        .describe(LiveStatus::Available)
}

/// Auto Scaling groups only report a status while being deleted
pub fn autoscaling_group(status: Option<&str>) -> ResourceDescription {
    match status {
        Some(_) => ResourceDescription {
            status: LiveStatus::Pending,
            params: None,
        },
        None => ResourceDescription::available(),
    }
}

pub fn load_balancer(lb: &LoadBalancer) -> ResourceDescription {
    LiveParams::default()
        .put("scheme", lb.scheme().map(|s| s.as_str()))
        .put("lb_type", lb.r#type().map(|t| t.as_str()))
        .describe(state_status(
            lb.state().and_then(|s| s.code()).map(|c| c.as_str()),
            "active",
        ))
}

pub fn target_group(group: &TargetGroup) -> ResourceDescription {
    LiveParams::default()
        .put("network", group.vpc_id())
        .put("port", group.port())
        .put("protocol", group.protocol().map(|p| p.as_str()))
        .describe(LiveStatus::Available)
}

pub fn listener(listener: &Listener) -> ResourceDescription {
    LiveParams::default()
        .put("port", listener.port())
        .put("protocol", listener.protocol().map(|p| p.as_str()))
        .describe(LiveStatus::Available)
}

pub fn rule(rule: &Rule) -> ResourceDescription {
    LiveParams::default()
        .put("priority", rule.priority())
        .describe(LiveStatus::Available)
}

/// VPCs an internet gateway must be detached from before deletion
pub fn attached_networks(gateway: &InternetGateway) -> Vec<String> {
    gateway
        .attachments()
        .iter()
        .filter_map(|a| a.vpc_id())
        .map(str::to_string)
        .collect()
}

/// Explicit subnet associations of a route table; the main one stays
pub fn subnet_associations(table: &RouteTable) -> Vec<String> {
    table
        .associations()
        .iter()
        .filter(|a| a.main() != Some(true))
        .filter_map(|a| a.route_table_association_id())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{
        AttachmentStatus, InternetGatewayAttachment, RouteTableAssociation, SubnetState, VpcState,
    };
    use aws_sdk_elasticloadbalancingv2::types::{
        LoadBalancerSchemeEnum, LoadBalancerState, LoadBalancerStateEnum, ProtocolEnum,
    };
    use serde_json::json;

    #[test]
    fn test_subnet_params() {
        let subnet = Subnet::builder()
            .subnet_id("subnet-1")
            .vpc_id("vpc-1")
            .cidr_block("10.0.1.0/24")
            .availability_zone("us-west-1a")
            .state(SubnetState::Available)
            .build();
        let description = super::subnet(&subnet);
        assert_eq!(description.status, LiveStatus::Available);
        let params = description.params.unwrap();
        assert_eq!(params["network"], "vpc-1");
        assert_eq!(params["cidr_block"], "10.0.1.0/24");
        assert_eq!(params["availability_zone"], "us-west-1a");
    }

    #[test]
    fn test_pending_vpc() {
        let vpc = Vpc::builder()
            .vpc_id("vpc-1")
            .cidr_block("10.0.0.0/16")
            .state(VpcState::Pending)
            .build();
        assert_eq!(super::vpc(&vpc).status, LiveStatus::Pending);
    }

    #[test]
    fn test_load_balancer_state() {
        let lb = LoadBalancer::builder()
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .state(
                LoadBalancerState::builder()
                    .code(LoadBalancerStateEnum::Provisioning)
                    .build(),
            )
            .build();
        let description = load_balancer(&lb);
        assert_eq!(description.status, LiveStatus::Pending);
        assert_eq!(description.params.unwrap()["scheme"], "internet-facing");
    }

    #[test]
    fn test_target_group_port_is_numeric() {
        let group = TargetGroup::builder()
            .vpc_id("vpc-1")
            .port(3000)
            .protocol(ProtocolEnum::Http)
            .build();
        let params = target_group(&group).params.unwrap();
        assert_eq!(params["port"], json!(3000));
        assert_eq!(params["protocol"], "HTTP");
    }

    #[test]
    fn test_autoscaling_group_status() {
        assert_eq!(autoscaling_group(None).status, LiveStatus::Available);
        assert_eq!(
            autoscaling_group(Some("Delete in progress")).status,
            LiveStatus::Pending
        );
    }

    #[test]
    fn test_teardown_targets() {
        let gateway = InternetGateway::builder()
            .internet_gateway_id("igw-1")
            .attachments(
                InternetGatewayAttachment::builder()
                    .vpc_id("vpc-1")
                    .state(AttachmentStatus::Attached)
                    .build(),
            )
            .build();
        assert_eq!(attached_networks(&gateway), vec!["vpc-1"]);

        let table = RouteTable::builder()
            .associations(
                RouteTableAssociation::builder()
                    .main(false)
                    .route_table_association_id("rtbassoc-1")
                    .build(),
            )
            .associations(
                RouteTableAssociation::builder()
                    .main(true)
                    .route_table_association_id("rtbassoc-main")
                    .build(),
            )
            .build();
        assert_eq!(subnet_associations(&table), vec!["rtbassoc-1"]);
    }
}
