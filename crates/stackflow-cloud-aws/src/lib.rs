//! AWS provider for Stackflow
//!
//! This crate implements the CloudProvider trait for AWS on top of the AWS
//! SDK, covering the networking, compute and load-balancing resources a web
//! stack needs.
//!
//! # Requirements
//!
//! - Credentials from the standard AWS chain (environment, shared config
//!   files, SSO or instance metadata), optionally from a named profile
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::CloudProvider;
//! use stackflow_cloud_aws::AwsProvider;
//!
//! let provider = AwsProvider::new("us-west-1", None).await;
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

pub mod context;
pub mod error;
pub mod live;
pub mod provider;
pub mod request;

pub use context::AwsContext;
pub use error::{AwsError, Result, classify};
pub use provider::AwsProvider;
pub use request::NAME_TAG;
