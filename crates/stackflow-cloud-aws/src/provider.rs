//! AWS provider implementation

use crate::context::AwsContext;
use crate::error::{AwsError, Result};
use crate::live;
use crate::request::{
    autoscaling_tags, elbv2_tags, forward_action, group_size, ingress_permissions, int_param,
    launch_template_data, listener_actions, required, required_int, route_entries,
    rule_conditions, tag_specification,
};
use async_trait::async_trait;
use aws_sdk_autoscaling::types::LaunchTemplateSpecification;
use aws_sdk_ec2::types::{AttributeBooleanValue, ResourceType};
use aws_sdk_elasticloadbalancingv2::types::{
    LoadBalancerSchemeEnum, LoadBalancerTypeEnum, ProtocolEnum, TargetTypeEnum,
};
use stackflow_cloud::{
    AuthStatus, CloudProvider, CreateRequest, CreatedResource, LiveStatus, ResourceDescription,
    ResourceKind,
};
use std::time::Duration;

fn unexpected(what: &str) -> AwsError {
    AwsError::UnexpectedResponse(what.to_string())
}

fn enabled(value: bool) -> AttributeBooleanValue {
    AttributeBooleanValue::builder().value(value).build()
}

/// AWS provider backed by the AWS SDK
pub struct AwsProvider {
    context: AwsContext,
    ec2: aws_sdk_ec2::Client,
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
    autoscaling: aws_sdk_autoscaling::Client,
    poll_interval: Duration,
    delete_timeout: Duration,
}

impl AwsProvider {
    /// Loads the SDK configuration for `region`, optionally from a named profile
    pub async fn new(region: &str, profile: Option<&str>) -> Self {
        Self::from_context(AwsContext::new(region, profile).await)
    }

    pub fn from_context(context: AwsContext) -> Self {
        Self {
            ec2: context.ec2_client(),
            elbv2: context.elbv2_client(),
            autoscaling: context.autoscaling_client(),
            context,
            poll_interval: Duration::from_secs(10),
            delete_timeout: Duration::from_secs(600),
        }
    }

    pub fn region(&self) -> &str {
        self.context.region()
    }

    async fn create_resource(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let created = self.create_primary(request).await?;
        let id = created.external_id.clone();

        // Without a record the engine would create a duplicate next time,
        // so a half-configured resource is removed again
        if let Err(err) = self.configure(request, &id).await {
            tracing::warn!(
                name = %request.logical_name,
                id = %id,
                error = %err,
                "Configuration failed, removing the new resource"
            );
            if let Err(cleanup) = self.delete_resource(request.kind, &id).await {
                tracing::error!(id = %id, error = %cleanup, "Cleanup failed");
            }
            return Err(err);
        }

        tracing::info!(kind = %request.kind, id = %id, "Created AWS resource");
        Ok(created)
    }

    /// Primary create call; returns the new resource's ID and attributes
    async fn create_primary(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let name = request.logical_name.as_str();
        let created = match request.kind {
            ResourceKind::Network => {
                let output = self
                    .ec2
                    .create_vpc()
                    .cidr_block(required(request, "cidr_block")?)
                    .tag_specifications(tag_specification(ResourceType::Vpc, name))
                    .send()
                    .await?;
                let vpc = output.vpc().ok_or_else(|| unexpected("Vpc"))?;
                CreatedResource::new(vpc.vpc_id().ok_or_else(|| unexpected("VpcId"))?)
            }

            ResourceKind::Subnet => {
                let output = self
                    .ec2
                    .create_subnet()
                    .vpc_id(required(request, "network")?)
                    .cidr_block(required(request, "cidr_block")?)
                    .set_availability_zone(
                        request.str_param("availability_zone").map(str::to_string),
                    )
                    .tag_specifications(tag_specification(ResourceType::Subnet, name))
                    .send()
                    .await?;
                let subnet = output.subnet().ok_or_else(|| unexpected("Subnet"))?;
                let mut created = CreatedResource::new(
                    subnet.subnet_id().ok_or_else(|| unexpected("SubnetId"))?,
                );
                if let Some(zone) = subnet.availability_zone() {
                    created = created.with_attribute("availability_zone", zone);
                }
                created
            }

            ResourceKind::SecurityGroup => {
                let description = request
                    .str_param("description")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Managed by stackflow ({})", name));
                let output = self
                    .ec2
                    .create_security_group()
                    .group_name(request.str_param("group_name").unwrap_or(name))
                    .description(description)
                    .vpc_id(required(request, "network")?)
                    .tag_specifications(tag_specification(ResourceType::SecurityGroup, name))
                    .send()
                    .await?;
                CreatedResource::new(output.group_id().ok_or_else(|| unexpected("GroupId"))?)
            }

            ResourceKind::LaunchTemplate => {
                let output = self
                    .ec2
                    .create_launch_template()
                    .launch_template_name(name)
                    .launch_template_data(launch_template_data(request)?)
                    .tag_specifications(tag_specification(ResourceType::LaunchTemplate, name))
                    .send()
                    .await?;
                let template = output
                    .launch_template()
                    .ok_or_else(|| unexpected("LaunchTemplate"))?;
                let mut created = CreatedResource::new(
                    template
                        .launch_template_id()
                        .ok_or_else(|| unexpected("LaunchTemplateId"))?,
                );
                if let Some(version) = template.latest_version_number() {
                    created = created.with_attribute("latest_version", version);
                }
                created
            }

            // Auto Scaling groups are addressed by name
            ResourceKind::AutoscalingGroup => {
                let size = group_size(request)?;
                self.autoscaling
                    .create_auto_scaling_group()
                    .auto_scaling_group_name(name)
                    .launch_template(
                        LaunchTemplateSpecification::builder()
                            .launch_template_id(required(request, "launch_template")?)
                            .version("$Latest")
                            .build(),
                    )
                    .min_size(size.min)
                    .max_size(size.max)
                    .desired_capacity(size.desired)
                    .vpc_zone_identifier(request.str_list_param("subnets").join(","))
                    .set_target_group_arns(non_empty(request.str_list_param("target_groups")))
                    .set_health_check_type(
                        request.str_param("health_check_type").map(str::to_string),
                    )
                    .set_health_check_grace_period(int_param(
                        request,
                        "health_check_grace_period",
                    )?)
                    .set_tags(Some(autoscaling_tags(name)?))
                    .send()
                    .await?;
                CreatedResource::new(name)
            }

            ResourceKind::LoadBalancer => {
                let output = self
                    .elbv2
                    .create_load_balancer()
                    .name(name)
                    .set_subnets(non_empty(request.str_list_param("subnets")))
                    .set_security_groups(non_empty(request.str_list_param("security_groups")))
                    .set_scheme(request.str_param("scheme").map(LoadBalancerSchemeEnum::from))
                    .set_type(request.str_param("lb_type").map(LoadBalancerTypeEnum::from))
                    .set_tags(Some(elbv2_tags(name)?))
                    .send()
                    .await?;
                let lb = output
                    .load_balancers()
                    .first()
                    .ok_or_else(|| unexpected("LoadBalancers"))?;
                CreatedResource::new(
                    lb.load_balancer_arn()
                        .ok_or_else(|| unexpected("LoadBalancerArn"))?,
                )
                .with_attribute(
                    "dns_name",
                    lb.dns_name().ok_or_else(|| unexpected("DNSName"))?,
                )
                .with_attribute(
                    "zone_id",
                    lb.canonical_hosted_zone_id().unwrap_or_default(),
                )
            }

            ResourceKind::TargetGroup => {
                let output = self
                    .elbv2
                    .create_target_group()
                    .name(name)
                    .protocol(ProtocolEnum::from(
                        request.str_param("protocol").unwrap_or("HTTP"),
                    ))
                    .port(required_int(request, "port")?)
                    .vpc_id(required(request, "network")?)
                    .set_target_type(request.str_param("target_type").map(TargetTypeEnum::from))
                    .set_health_check_path(
                        request.str_param("health_check_path").map(str::to_string),
                    )
                    .set_tags(Some(elbv2_tags(name)?))
                    .send()
                    .await?;
                let group = output
                    .target_groups()
                    .first()
                    .ok_or_else(|| unexpected("TargetGroups"))?;
                CreatedResource::new(
                    group
                        .target_group_arn()
                        .ok_or_else(|| unexpected("TargetGroupArn"))?,
                )
            }

            ResourceKind::Listener => {
                let output = self
                    .elbv2
                    .create_listener()
                    .load_balancer_arn(required(request, "load_balancer")?)
                    .protocol(ProtocolEnum::from(
                        request.str_param("protocol").unwrap_or("HTTP"),
                    ))
                    .port(required_int(request, "port")?)
                    .default_actions(listener_actions(request)?)
                    .set_tags(Some(elbv2_tags(name)?))
                    .send()
                    .await?;
                let listener = output
                    .listeners()
                    .first()
                    .ok_or_else(|| unexpected("Listeners"))?;
                CreatedResource::new(
                    listener
                        .listener_arn()
                        .ok_or_else(|| unexpected("ListenerArn"))?,
                )
            }

            ResourceKind::Route => {
                let output = self
                    .elbv2
                    .create_rule()
                    .listener_arn(required(request, "listener")?)
                    .priority(required_int(request, "priority")?)
                    .set_conditions(Some(rule_conditions(request)))
                    .actions(forward_action(name, required(request, "target_group")?)?)
                    .set_tags(Some(elbv2_tags(name)?))
                    .send()
                    .await?;
                let rule = output.rules().first().ok_or_else(|| unexpected("Rules"))?;
                CreatedResource::new(rule.rule_arn().ok_or_else(|| unexpected("RuleArn"))?)
            }

            ResourceKind::InternetGateway => {
                let output = self
                    .ec2
                    .create_internet_gateway()
                    .tag_specifications(tag_specification(ResourceType::InternetGateway, name))
                    .send()
                    .await?;
                let gateway = output
                    .internet_gateway()
                    .ok_or_else(|| unexpected("InternetGateway"))?;
                CreatedResource::new(
                    gateway
                        .internet_gateway_id()
                        .ok_or_else(|| unexpected("InternetGatewayId"))?,
                )
            }

            ResourceKind::RouteTable => {
                let output = self
                    .ec2
                    .create_route_table()
                    .vpc_id(required(request, "network")?)
                    .tag_specifications(tag_specification(ResourceType::RouteTable, name))
                    .send()
                    .await?;
                let table = output
                    .route_table()
                    .ok_or_else(|| unexpected("RouteTable"))?;
                CreatedResource::new(
                    table
                        .route_table_id()
                        .ok_or_else(|| unexpected("RouteTableId"))?,
                )
            }
        };
        Ok(created)
    }

    /// Calls that complete a resource after its primary create call
    async fn configure(&self, request: &CreateRequest, id: &str) -> Result<()> {
        match request.kind {
            ResourceKind::Network => {
                // One attribute per call
                if let Some(value) = request.bool_param("enable_dns_support") {
                    self.ec2
                        .modify_vpc_attribute()
                        .vpc_id(id)
                        .enable_dns_support(enabled(value))
                        .send()
                        .await?;
                }
                if let Some(value) = request.bool_param("enable_dns_hostnames") {
                    self.ec2
                        .modify_vpc_attribute()
                        .vpc_id(id)
                        .enable_dns_hostnames(enabled(value))
                        .send()
                        .await?;
                }
            }
            ResourceKind::Subnet => {
                if request.bool_param("map_public_ip") == Some(true) {
                    self.ec2
                        .modify_subnet_attribute()
                        .subnet_id(id)
                        .map_public_ip_on_launch(enabled(true))
                        .send()
                        .await?;
                }
            }
            ResourceKind::SecurityGroup => {
                let permissions = ingress_permissions(request);
                if !permissions.is_empty() {
                    self.ec2
                        .authorize_security_group_ingress()
                        .group_id(id)
                        .set_ip_permissions(Some(permissions))
                        .send()
                        .await?;
                }
            }
            ResourceKind::InternetGateway => {
                self.ec2
                    .attach_internet_gateway()
                    .internet_gateway_id(id)
                    .vpc_id(required(request, "network")?)
                    .send()
                    .await?;
            }
            ResourceKind::RouteTable => {
                for (destination, gateway) in route_entries(request) {
                    self.ec2
                        .create_route()
                        .route_table_id(id)
                        .destination_cidr_block(destination)
                        .gateway_id(gateway)
                        .send()
                        .await?;
                }
                for subnet in request.str_list_param("subnets") {
                    self.ec2
                        .associate_route_table()
                        .route_table_id(id)
                        .subnet_id(subnet)
                        .send()
                        .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn describe_resource(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<ResourceDescription> {
        match self.describe_live(kind, id).await {
            Ok(Some(description)) => Ok(description),
            Ok(None) => Ok(ResourceDescription::missing()),
            Err(err) if err.is_not_found() => Ok(ResourceDescription::missing()),
            Err(err) => Err(err),
        }
    }

    /// `None` when the describe call returned no matching item
    async fn describe_live(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<ResourceDescription>> {
        let description = match kind {
            ResourceKind::Network => {
                let output = self.ec2.describe_vpcs().vpc_ids(id).send().await?;
                output.vpcs().first().map(live::vpc)
            }
            ResourceKind::Subnet => {
                let output = self.ec2.describe_subnets().subnet_ids(id).send().await?;
                output.subnets().first().map(live::subnet)
            }
            ResourceKind::SecurityGroup => {
                let output = self
                    .ec2
                    .describe_security_groups()
                    .group_ids(id)
                    .send()
                    .await?;
                output.security_groups().first().map(live::security_group)
            }
            ResourceKind::LaunchTemplate => {
                let output = self
                    .ec2
                    .describe_launch_templates()
                    .launch_template_ids(id)
                    .send()
                    .await?;
                output
                    .launch_templates()
                    .first()
                    .map(|_| ResourceDescription::available())
            }
            ResourceKind::AutoscalingGroup => {
                let output = self
                    .autoscaling
                    .describe_auto_scaling_groups()
                    .auto_scaling_group_names(id)
                    .send()
                    .await?;
                output
                    .auto_scaling_groups()
                    .first()
                    .map(|group| live::autoscaling_group(group.status()))
            }
            ResourceKind::LoadBalancer => {
                let output = self
                    .elbv2
                    .describe_load_balancers()
                    .load_balancer_arns(id)
                    .send()
                    .await?;
                output.load_balancers().first().map(live::load_balancer)
            }
            ResourceKind::TargetGroup => {
                let output = self
                    .elbv2
                    .describe_target_groups()
                    .target_group_arns(id)
                    .send()
                    .await?;
                output.target_groups().first().map(live::target_group)
            }
            ResourceKind::Listener => {
                let output = self
                    .elbv2
                    .describe_listeners()
                    .listener_arns(id)
                    .send()
                    .await?;
                output.listeners().first().map(live::listener)
            }
            ResourceKind::Route => {
                let output = self.elbv2.describe_rules().rule_arns(id).send().await?;
                output.rules().first().map(live::rule)
            }
            ResourceKind::InternetGateway => {
                let output = self
                    .ec2
                    .describe_internet_gateways()
                    .internet_gateway_ids(id)
                    .send()
                    .await?;
                output
                    .internet_gateways()
                    .first()
                    .map(|_| ResourceDescription::available())
            }
            ResourceKind::RouteTable => {
                let output = self
                    .ec2
                    .describe_route_tables()
                    .route_table_ids(id)
                    .send()
                    .await?;
                output
                    .route_tables()
                    .first()
                    .map(|_| ResourceDescription::available())
            }
        };
        Ok(description)
    }

    /// Polls until a resource is gone; Auto Scaling deletes asynchronously
    async fn wait_until_gone(&self, kind: ResourceKind, id: &str) -> Result<()> {
        let started = std::time::Instant::now();
        loop {
            let description = self.describe_resource(kind, id).await?;
            if description.status == LiveStatus::Missing {
                return Ok(());
            }
            if started.elapsed() >= self.delete_timeout {
                return Err(AwsError::Timeout(format!(
                    "{} {} is still being deleted",
                    kind, id
                )));
            }
            tracing::debug!(kind = %kind, id = %id, "Waiting for deletion");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Removes what blocks deletion: gateway attachments and subnet associations
    async fn release_dependencies(&self, kind: ResourceKind, id: &str) -> Result<()> {
        match kind {
            ResourceKind::InternetGateway => {
                let output = self
                    .ec2
                    .describe_internet_gateways()
                    .internet_gateway_ids(id)
                    .send()
                    .await?;
                for gateway in output.internet_gateways() {
                    for vpc in live::attached_networks(gateway) {
                        self.ec2
                            .detach_internet_gateway()
                            .internet_gateway_id(id)
                            .vpc_id(vpc)
                            .send()
                            .await?;
                    }
                }
            }
            ResourceKind::RouteTable => {
                let output = self
                    .ec2
                    .describe_route_tables()
                    .route_table_ids(id)
                    .send()
                    .await?;
                for table in output.route_tables() {
                    for association in live::subnet_associations(table) {
                        self.ec2
                            .disassociate_route_table()
                            .association_id(association)
                            .send()
                            .await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.release_dependencies(kind, id).await?;

        match kind {
            ResourceKind::Network => {
                self.ec2.delete_vpc().vpc_id(id).send().await?;
            }
            ResourceKind::Subnet => {
                self.ec2.delete_subnet().subnet_id(id).send().await?;
            }
            ResourceKind::SecurityGroup => {
                self.ec2.delete_security_group().group_id(id).send().await?;
            }
            ResourceKind::LaunchTemplate => {
                self.ec2
                    .delete_launch_template()
                    .launch_template_id(id)
                    .send()
                    .await?;
            }
            ResourceKind::AutoscalingGroup => {
                self.autoscaling
                    .delete_auto_scaling_group()
                    .auto_scaling_group_name(id)
                    .force_delete(true)
                    .send()
                    .await?;
                self.wait_until_gone(kind, id).await?;
            }
            ResourceKind::LoadBalancer => {
                self.elbv2
                    .delete_load_balancer()
                    .load_balancer_arn(id)
                    .send()
                    .await?;
            }
            ResourceKind::TargetGroup => {
                self.elbv2
                    .delete_target_group()
                    .target_group_arn(id)
                    .send()
                    .await?;
            }
            ResourceKind::Listener => {
                self.elbv2.delete_listener().listener_arn(id).send().await?;
            }
            ResourceKind::Route => {
                self.elbv2.delete_rule().rule_arn(id).send().await?;
            }
            ResourceKind::InternetGateway => {
                self.ec2
                    .delete_internet_gateway()
                    .internet_gateway_id(id)
                    .send()
                    .await?;
            }
            ResourceKind::RouteTable => {
                self.ec2
                    .delete_route_table()
                    .route_table_id(id)
                    .send()
                    .await?;
            }
        }

        tracing::info!(kind = %kind, id = %id, "Deleted AWS resource");
        Ok(())
    }

    /// Caller identity as `arn (account)`
    async fn caller_identity(&self) -> Result<String> {
        let output = self
            .context
            .sts_client()
            .get_caller_identity()
            .send()
            .await?;
        let arn = output.arn().ok_or_else(|| unexpected("Arn"))?;
        let account = output.account().ok_or_else(|| unexpected("Account"))?;
        Ok(format!("{} ({})", arn, account))
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() { None } else { Some(values) }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn display_name(&self) -> &str {
        "Amazon Web Services"
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        match self.caller_identity().await {
            Ok(identity) => Ok(AuthStatus::ok(identity)),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn create(&self, request: &CreateRequest) -> stackflow_cloud::Result<CreatedResource> {
        Ok(self.create_resource(request).await?)
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        external_id: &str,
    ) -> stackflow_cloud::Result<ResourceDescription> {
        Ok(self.describe_resource(kind, external_id).await?)
    }

    async fn delete(&self, kind: ResourceKind, external_id: &str) -> stackflow_cloud::Result<()> {
        Ok(self.delete_resource(kind, external_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_identity() {
        let provider = AwsProvider::new("us-west-1", None).await;
        assert_eq!(provider.name(), "aws");
        assert_eq!(provider.display_name(), "Amazon Web Services");
        assert_eq!(provider.region(), "us-west-1");
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Vec::new()), None);
        assert_eq!(non_empty(vec!["a".into()]), Some(vec!["a".to_string()]));
    }
}
