//! SDK input types built from create requests

use crate::error::{AwsError, Result};
use aws_sdk_ec2::types::{
    IpPermission, IpRange, LaunchTemplateIamInstanceProfileSpecificationRequest,
    LaunchTemplateTagSpecificationRequest, RequestLaunchTemplateData, ResourceType, Tag,
    TagSpecification,
};
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, FixedResponseActionConfig, HostHeaderConditionConfig,
    PathPatternConditionConfig, RuleCondition,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use stackflow_cloud::CreateRequest;

/// Tag carrying the logical name on every tagged resource
pub const NAME_TAG: &str = "stackflow:name";

pub fn required<'a>(request: &'a CreateRequest, key: &str) -> Result<&'a str> {
    request
        .str_param(key)
        .ok_or_else(|| AwsError::MissingParameter(format!("{}.{}", request.logical_name, key)))
}

/// Numeric parameter as the `i32` the SDK expects
pub fn int_param(request: &CreateRequest, key: &str) -> Result<Option<i32>> {
    request
        .u64_param(key)
        .map(|value| {
            i32::try_from(value).map_err(|_| {
                AwsError::InvalidParameter(format!(
                    "{}.{} is out of range: {}",
                    request.logical_name, key, value
                ))
            })
        })
        .transpose()
}

pub fn required_int(request: &CreateRequest, key: &str) -> Result<i32> {
    int_param(request, key)?
        .ok_or_else(|| AwsError::MissingParameter(format!("{}.{}", request.logical_name, key)))
}

fn built<T, E: std::fmt::Display>(name: &str, result: std::result::Result<T, E>) -> Result<T> {
    result.map_err(|e| AwsError::InvalidParameter(format!("{}: {}", name, e)))
}

fn ec2_tags(name: &str) -> [Tag; 2] {
    [
        Tag::builder().key("Name").value(name).build(),
        Tag::builder().key(NAME_TAG).value(name).build(),
    ]
}

pub fn tag_specification(resource_type: ResourceType, name: &str) -> TagSpecification {
    ec2_tags(name)
        .into_iter()
        .fold(
            TagSpecification::builder().resource_type(resource_type),
            |builder, tag| builder.tags(tag),
        )
        .build()
}

pub fn elbv2_tags(name: &str) -> Result<Vec<aws_sdk_elasticloadbalancingv2::types::Tag>> {
    ["Name", NAME_TAG]
        .into_iter()
        .map(|key| {
            built(
                name,
                aws_sdk_elasticloadbalancingv2::types::Tag::builder()
                    .key(key)
                    .value(name)
                    .build(),
            )
        })
        .collect()
}

pub fn autoscaling_tags(name: &str) -> Result<Vec<aws_sdk_autoscaling::types::Tag>> {
    ["Name", NAME_TAG]
        .into_iter()
        .map(|key| {
            built(
                name,
                aws_sdk_autoscaling::types::Tag::builder()
                    .resource_id(name)
                    .resource_type("auto-scaling-group")
                    .key(key)
                    .value(name)
                    .propagate_at_launch(true)
                    .build(),
            )
        })
        .collect()
}

pub fn launch_template_data(request: &CreateRequest) -> Result<RequestLaunchTemplateData> {
    let name = request.logical_name.as_str();
    let mut data = RequestLaunchTemplateData::builder()
        .image_id(required(request, "image_id")?)
        .instance_type(required(request, "instance_type")?.into())
        .set_key_name(request.str_param("key_name").map(str::to_string))
        .set_user_data(request.str_param("user_data").map(|script| BASE64.encode(script)))
        .tag_specifications(
            ec2_tags(name)
                .into_iter()
                .fold(
                    LaunchTemplateTagSpecificationRequest::builder()
                        .resource_type(ResourceType::Instance),
                    |builder, tag| builder.tags(tag),
                )
                .build(),
        );
    let groups = request.str_list_param("security_groups");
    if !groups.is_empty() {
        data = data.set_security_group_ids(Some(groups));
    }
    if let Some(profile) = request.str_param("iam_instance_profile") {
        data = data.iam_instance_profile(
            LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                .name(profile)
                .build(),
        );
    }
    Ok(data.build())
}

/// Default action of a listener: forward to a target group or a fixed response
pub fn listener_actions(request: &CreateRequest) -> Result<Action> {
    let name = request.logical_name.as_str();
    if let Some(target_group) = request.str_param("target_group") {
        return forward_action(name, target_group);
    }

    let response = request
        .params
        .get("fixed_response")
        .and_then(|v| v.as_object())
        .ok_or_else(|| AwsError::MissingParameter(format!("{}.target_group", name)))?;
    let status = match response.get("status_code") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => "200".to_string(),
    };
    let config = built(
        name,
        FixedResponseActionConfig::builder()
            .status_code(status)
            .content_type(
                response
                    .get("content_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("text/plain"),
            )
            .set_message_body(
                response
                    .get("message_body")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            )
            .build(),
    )?;
    built(
        name,
        Action::builder()
            .r#type(ActionTypeEnum::FixedResponse)
            .fixed_response_config(config)
            .build(),
    )
}

pub fn forward_action(name: &str, target_group: &str) -> Result<Action> {
    built(
        name,
        Action::builder()
            .r#type(ActionTypeEnum::Forward)
            .target_group_arn(target_group)
            .build(),
    )
}

/// Path patterns, plus host headers when given
pub fn rule_conditions(request: &CreateRequest) -> Vec<RuleCondition> {
    let mut conditions = vec![
        RuleCondition::builder()
            .field("path-pattern")
            .path_pattern_config(
                PathPatternConditionConfig::builder()
                    .set_values(Some(request.str_list_param("path_patterns")))
                    .build(),
            )
            .build(),
    ];
    let hosts = request.str_list_param("host_headers");
    if !hosts.is_empty() {
        conditions.push(
            RuleCondition::builder()
                .field("host-header")
                .host_header_config(
                    HostHeaderConditionConfig::builder()
                        .set_values(Some(hosts))
                        .build(),
                )
                .build(),
        );
    }
    conditions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSize {
    pub min: i32,
    pub max: i32,
    pub desired: i32,
}

/// Auto Scaling sizes; desired defaults to min, max to at least one
pub fn group_size(request: &CreateRequest) -> Result<GroupSize> {
    let min = int_param(request, "min_size")?.unwrap_or(1);
    let max = int_param(request, "max_size")?.unwrap_or(min.max(1));
    let desired = int_param(request, "desired_capacity")?.unwrap_or(min);
    Ok(GroupSize { min, max, desired })
}

pub fn ingress_permissions(request: &CreateRequest) -> Vec<IpPermission> {
    let rules: Vec<&serde_json::Map<String, Value>> = match request.params.get("ingress") {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_object()).collect(),
        Some(Value::Object(single)) => vec![single],
        _ => Vec::new(),
    };
    let port = |v: Option<&Value>| -> Option<i32> {
        match v? {
            Value::Number(n) => n.as_i64().and_then(|p| i32::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    };
    rules
        .into_iter()
        .filter_map(|rule| {
            let from = port(rule.get("from_port"))?;
            let to = port(rule.get("to_port")).unwrap_or(from);
            let cidr = rule.get("cidr")?.as_str()?;
            let protocol = rule.get("protocol").and_then(|v| v.as_str()).unwrap_or("tcp");
            Some(
                IpPermission::builder()
                    .ip_protocol(protocol)
                    .from_port(from)
                    .to_port(to)
                    .ip_ranges(IpRange::builder().cidr_ip(cidr).build())
                    .build(),
            )
        })
        .collect()
}

/// `(destination_cidr, gateway)` pairs of a route table
pub fn route_entries(request: &CreateRequest) -> Vec<(String, String)> {
    request
        .params
        .get("routes")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|route| {
            Some((
                route.get("destination_cidr")?.as_str()?.to_string(),
                route.get("gateway")?.as_str()?.to_string(),
            ))
        })
        .collect()
}
