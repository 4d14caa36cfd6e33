//! Stackflow provisioning core
//!
//! This crate turns a declarative resource graph into cloud resources,
//! idempotently and resumably.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  stackflow CLI                   │
//! │          (stack plan / apply / destroy)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ ResourceGraph│─▶│   Resolver   │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌──────────────┐  ┌──────▼───────┐             │
//! │  │    Ledger    │◀─│    Engine    │             │
//! │  │ (state.json) │  │ retry / pool │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌────────────────────────▼─────────────────┐   │
//! │  │          Provider Abstraction            │   │
//! │  │  trait CloudProvider { ... }             │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │      aws      │
//!           │   provider    │
//!           └───────────────┘
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod provider;
pub mod resolver;
pub mod retry;
mod schema;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use action::{Action, ActionType, ApplyReport, Plan, PlanSummary};
pub use engine::{Engine, EngineOptions, ReplacePolicy};
pub use error::{
    CloudError, CycleError, DriftError, FailureClass, GraphError, Operation,
    PartialCompletionError, ProvisionError, ProvisionFailure, Result, StackError, StackResult,
    StateError,
};
pub use fingerprint::{ResolvedOutput, ResolvedOutputs, fingerprint, resolve_params};
pub use graph::{Params, Reference, ResourceGraph, ResourceKind, ResourceNode};
pub use provider::{
    AuthStatus, CloudProvider, CreateRequest, CreatedResource, LiveStatus, ResourceDescription,
};
pub use resolver::{ExecutionPlan, resolve};
pub use retry::{RetryConfig, RetryError, with_retry};
pub use schema::Ipv4Cidr;
pub use state::{
    Ledger, LedgerState, ProvisioningRecord, RecordStatus, StateLock, StateManager,
};
