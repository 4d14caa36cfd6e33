//! End-to-end lifecycle of a complete web stack against the in-memory provider

use serde_json::json;
use stackflow_cloud::testing::MemoryProvider;
use stackflow_cloud::{
    ActionType, Engine, EngineOptions, Ledger, ResourceGraph, ResourceKind, ResourceNode,
    RetryConfig, StackError, StateManager,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn web_stack() -> ResourceGraph {
    ResourceGraph::from_nodes([
        ResourceNode::new("vpc", ResourceKind::Network)
            .with_param("cidr_block", "10.0.0.0/16")
            .with_param("enable_dns_hostnames", true),
        ResourceNode::new("public-a", ResourceKind::Subnet)
            .with_param("network", "${vpc}")
            .with_param("cidr_block", "10.0.1.0/24")
            .with_param("availability_zone", "us-east-1a"),
        ResourceNode::new("public-b", ResourceKind::Subnet)
            .with_param("network", "${vpc}")
            .with_param("cidr_block", "10.0.2.0/24")
            .with_param("availability_zone", "us-east-1b"),
        ResourceNode::new("web-sg", ResourceKind::SecurityGroup)
            .with_param("network", "${vpc}")
            .with_param(
                "ingress",
                json!([
                    {"protocol": "tcp", "from_port": 80, "to_port": 80, "cidr": "0.0.0.0/0"},
                    {"protocol": "tcp", "from_port": 22, "cidr": "10.0.0.0/16"}
                ]),
            ),
        ResourceNode::new("web-lt", ResourceKind::LaunchTemplate)
            .with_param("image_id", "ami-0abcdef1234567890")
            .with_param("instance_type", "t3.micro")
            .with_param("security_groups", json!(["${web-sg}"])),
        ResourceNode::new("igw", ResourceKind::InternetGateway).with_param("network", "${vpc}"),
        ResourceNode::new("public-rt", ResourceKind::RouteTable)
            .with_param("network", "${vpc}")
            .with_param(
                "routes",
                json!([{"destination_cidr": "0.0.0.0/0", "gateway": "${igw}"}]),
            )
            .with_param("subnets", json!(["${public-a}", "${public-b}"])),
        ResourceNode::new("web-lb", ResourceKind::LoadBalancer)
            .with_param("subnets", json!(["${public-a}", "${public-b}"]))
            .with_param("security_groups", json!(["${web-sg}"]))
            .with_param("scheme", "internet-facing")
            .with_param("lb_type", "application")
            .with_dependency("public-rt"),
        ResourceNode::new("app-tg", ResourceKind::TargetGroup)
            .with_param("network", "${vpc}")
            .with_param("port", 80)
            .with_param("protocol", "HTTP"),
        ResourceNode::new("api-tg", ResourceKind::TargetGroup)
            .with_param("network", "${vpc}")
            .with_param("port", 8080)
            .with_param("protocol", "HTTP"),
        ResourceNode::new("web-asg", ResourceKind::AutoscalingGroup)
            .with_param("launch_template", "${web-lt}")
            .with_param("subnets", json!(["${public-a}", "${public-b}"]))
            .with_param("target_groups", json!(["${app-tg}"]))
            .with_param("min_size", 1)
            .with_param("max_size", 3)
            .with_param("desired_capacity", 2),
        ResourceNode::new("http", ResourceKind::Listener)
            .with_param("load_balancer", "${web-lb}")
            .with_param("port", 80)
            .with_param("protocol", "HTTP")
            .with_param("target_group", "${app-tg}"),
        ResourceNode::new("api-route", ResourceKind::Route)
            .with_param("listener", "${http}")
            .with_param("priority", 10)
            .with_param("path_patterns", json!(["/api/*"]))
            .with_param("target_group", "${api-tg}"),
    ])
    .unwrap()
}

fn options() -> EngineOptions {
    EngineOptions {
        retry: RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        },
        ..EngineOptions::default()
    }
}

async fn engine_at(provider: &Arc<MemoryProvider>, root: &std::path::Path) -> Engine {
    let ledger = Ledger::open(StateManager::new(root)).await.unwrap();
    Engine::new(provider.clone(), Arc::new(ledger)).with_options(options())
}

#[tokio::test]
async fn test_web_stack_apply_reapply_destroy() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let graph = web_stack();

    let engine = engine_at(&provider, dir.path()).await;
    let plan = engine.preview(&graph).await.unwrap();
    assert_eq!(plan.actions.len(), 13);
    assert_eq!(plan.actions[0].name, "vpc");

    let report = engine.apply(&graph).await.unwrap();
    assert_eq!(report.created.len(), 13);
    assert_eq!(provider.resource_count(), 13);

    // A fresh process sees the persisted ledger and has nothing to do
    provider.clear_calls();
    let engine = engine_at(&provider, dir.path()).await;
    let plan = engine.preview(&graph).await.unwrap();
    assert!(plan.actions.iter().all(|a| a.action_type == ActionType::NoOp));
    let report = engine.apply(&graph).await.unwrap();
    assert!(report.is_noop());
    assert!(provider.creates().is_empty());

    let report = engine.destroy(&graph).await.unwrap();
    assert_eq!(report.deleted.len(), 13);
    assert_eq!(report.deleted.last().map(String::as_str), Some("vpc"));
    assert_eq!(provider.resource_count(), 0);
    assert!(engine.ledger().list().await.is_empty());
}

#[tokio::test]
async fn test_listener_sees_load_balancer_outputs() {
    let provider = Arc::new(MemoryProvider::new());
    let mut nodes: Vec<ResourceNode> = web_stack().nodes().to_vec();
    nodes.push(
        ResourceNode::new("status", ResourceKind::Listener)
            .with_param("load_balancer", "${web-lb}")
            .with_param("port", 8081)
            .with_param(
                "fixed_response",
                json!({"status_code": 200, "message_body": "ok from ${web-lb.dns_name}"}),
            ),
    );
    let graph = ResourceGraph::from_nodes(nodes).unwrap();
    let engine = Engine::new(provider.clone(), Arc::new(Ledger::in_memory())).with_options(options());

    engine.apply(&graph).await.unwrap();
    let params = provider.live_params("status").unwrap();
    assert_eq!(
        params["fixed_response"]["message_body"],
        json!("ok from web-lb.elb.memory.internal")
    );
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_failure_point() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let graph = web_stack();

    provider.fail_create(
        "web-asg",
        [stackflow_cloud::CloudError::QuotaExceeded("instances".into())],
    );
    let engine = engine_at(&provider, dir.path()).await;
    let err = engine.apply(&graph).await.unwrap_err();
    let StackError::PartialCompletion(partial) = err else {
        panic!("expected partial completion");
    };
    assert!(partial.pending.contains(&"web-asg".to_string()));
    assert!(partial.completed.contains(&"vpc".to_string()));
    let completed = partial.completed.clone();

    provider.clear_calls();
    let engine = engine_at(&provider, dir.path()).await;
    let report = engine.apply(&graph).await.unwrap();
    for name in &completed {
        assert!(!provider.creates().contains(name), "{name} was created twice");
    }
    assert!(provider.creates().contains(&"web-asg".to_string()));
    assert_eq!(report.reused.len() + report.created.len(), 13);
}
