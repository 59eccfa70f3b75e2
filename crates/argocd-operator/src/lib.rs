//! # Argo CD Kubernetes Operator
//!
//! Kubernetes operator that installs and maintains Argo CD. A single `ArgoCD`
//! custom resource describes an installation; the operator turns it into
//! the Deployments, StatefulSet, Services, ConfigMaps, Secrets, RBAC and
//! edge objects Argo CD needs and keeps them converged.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use argocd_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     let capabilities = ClusterCapabilities::discover(client.clone()).await?;
//!     run_controller(client, OperatorConfig::default(), capabilities).await
//! }
//! ```
//!
//! ## Architecture
//!
//! Every desired object flows through the same pipeline:
//!
//! 1. **Build**: [`resources::ResourceBuilder`] renders the object from the spec
//! 2. **Mutate**: [`request::ResourceRequest`] runs the kind's mutation chain
//!    (node placement, OpenShift security context, SCC rules)
//! 3. **Apply**: [`apply::reconcile_object`] creates the object or replaces it
//!    when a managed field differs from the live copy
//! 4. **Status**: [`status`] derives component health and the overall phase
//!
//! ## Modules
//!
//! - [`crd`] - `ArgoCD` and `NotificationsConfiguration` types with validation
//! - [`controller`] - ArgoCD reconciliation and controller setup
//! - [`notifications`] - notifications controller sub-reconciler
//! - [`notifications_configuration_controller`] - renders `argocd-notifications-cm`
//! - [`capabilities`] - optional API discovery (Routes, Prometheus Operator)
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource Definitions
//!
//! ```yaml
//! apiVersion: argoproj.io/v1beta1
//! kind: ArgoCD
//! metadata:
//!   name: example
//! spec:
//!   server:
//!     insecure: true
//!     route:
//!       enabled: true
//!   notifications:
//!     enabled: true
//!   prometheus:
//!     enabled: true
//! ```
//!
//! ## Metrics
//!
//! - `argocd_operator_reconciliations_total` - Total reconciliation attempts
//! - `argocd_operator_reconciliation_errors_total` - Reconciliation errors
//! - `argocd_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod apply;
pub mod capabilities;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod notifications;
pub mod notifications_configuration_controller;
pub mod request;
pub mod resources;
pub mod status;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::apply::{reconcile_object, ApplyOutcome, Reconcilable};
    pub use crate::capabilities::ClusterCapabilities;
    pub use crate::config::OperatorConfig;
    pub use crate::controller::{run_controller, ControllerContext, ControllerMetrics};
    pub use crate::crd::{
        ArgoCD, ArgoCDCondition, ArgoCDPhase, ArgoCDSpec, ArgoCDStatus, ComponentStatus,
        NotificationsConfiguration, NotificationsConfigurationSpec,
        NotificationsConfigurationStatus,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::notifications_configuration_controller::run_notifications_configuration_controller;
    pub use crate::request::{MutateFn, ResourceRequest};
    pub use crate::resources::ResourceBuilder;
}
