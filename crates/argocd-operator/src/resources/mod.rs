//! Kubernetes Resource Builders
//!
//! Generates the desired state of every object an Argo CD installation
//! consists of. Builders are pure: they read the `ArgoCD` resource and
//! return Kubernetes objects; applying them is the controller's job.
//!
//! | Module | Objects |
//! |--------|---------|
//! | `configmaps` | argocd-cm, argocd-rbac-cm, known hosts, TLS certs, GPG keys |
//! | `secrets` | `<cr>-cluster`, argocd-secret |
//! | `rbac` | ServiceAccounts, Roles, RoleBindings, ClusterRoles, ClusterRoleBindings |
//! | `services` | component Services and metrics Services |
//! | `workloads` | redis, repo-server, server, application-controller, applicationset |
//! | `networking` | server Route, server and gRPC Ingresses |
//! | `monitoring` | ServiceMonitors, PrometheusRule |

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

use crate::crd::ArgoCD;
use crate::error::{OperatorError, Result};

pub mod configmaps;
pub mod monitoring;
pub mod networking;
pub mod rbac;
pub mod secrets;
pub mod services;
pub mod workloads;

// Component names; resource names are `<cr>-<component>`
pub const SERVER: &str = "server";
pub const REPO_SERVER: &str = "repo-server";
pub const REDIS: &str = "redis";
pub const APPLICATION_CONTROLLER: &str = "application-controller";
pub const APPLICATIONSET_CONTROLLER: &str = "applicationset-controller";
pub const NOTIFICATIONS_CONTROLLER: &str = "notifications-controller";

// Container ports
pub const SERVER_PORT: i32 = 8080;
pub const SERVER_METRICS_PORT: i32 = 8083;
pub const REPO_SERVER_PORT: i32 = 8081;
pub const REPO_SERVER_METRICS_PORT: i32 = 8084;
pub const CONTROLLER_METRICS_PORT: i32 = 8082;
pub const REDIS_PORT: i32 = 6379;
pub const APPLICATIONSET_WEBHOOK_PORT: i32 = 7000;
pub const APPLICATIONSET_METRICS_PORT: i32 = 8080;
pub const NOTIFICATIONS_METRICS_PORT: i32 = 9001;

/// Builder for generating Kubernetes resources from an ArgoCD resource
pub struct ResourceBuilder<'a> {
    argocd: &'a ArgoCD,
    name: String,
    namespace: String,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(argocd: &'a ArgoCD) -> Result<Self> {
        let name = argocd
            .metadata
            .name
            .clone()
            .ok_or_else(|| OperatorError::InvalidConfig("ArgoCD name is required".to_string()))?;

        let namespace = argocd.metadata.namespace.clone().ok_or_else(|| {
            OperatorError::InvalidConfig("ArgoCD namespace is required".to_string())
        })?;

        Ok(Self {
            argocd,
            name,
            namespace,
        })
    }

    pub fn argocd(&self) -> &ArgoCD {
        self.argocd
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<cr>-<component>`
    pub fn component_name(&self, component: &str) -> String {
        format!("{}-{}", self.name, component)
    }

    /// `<cr>-argocd-<component>`
    pub fn service_account_name(&self, component: &str) -> String {
        format!("{}-argocd-{}", self.name, component)
    }

    /// Cluster-scoped names include the namespace so that instances in
    /// different namespaces do not collide
    pub fn cluster_resource_name(&self, component: &str) -> String {
        format!("{}-{}-argocd-{}", self.name, self.namespace, component)
    }

    /// `host:port` of the redis the components talk to
    pub fn redis_address(&self) -> String {
        match &self.argocd.spec.redis.remote {
            Some(remote) => remote.clone(),
            None => format!("{}:{}", self.component_name(REDIS), REDIS_PORT),
        }
    }

    /// `host:port` of the repo server
    pub fn repo_server_address(&self) -> String {
        format!("{}:{}", self.component_name(REPO_SERVER), REPO_SERVER_PORT)
    }

    /// External host of the API server
    pub fn server_host(&self) -> String {
        self.argocd
            .spec
            .server
            .host
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    /// External host of the gRPC endpoint
    pub fn grpc_host(&self) -> String {
        self.argocd
            .spec
            .server
            .grpc
            .host
            .clone()
            .unwrap_or_else(|| format!("{}-grpc", self.name))
    }

    /// Get owner reference for managed resources
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "argoproj.io/v1beta1".to_string(),
            kind: "ArgoCD".to_string(),
            name: self.name.clone(),
            uid: self.argocd.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        self.argocd.spec.get_labels(&self.name, component)
    }

    pub fn selector_labels(&self, component: &str) -> BTreeMap<String, String> {
        self.argocd.spec.get_selector_labels(&self.name, component)
    }

    /// Metadata for a namespaced object owned by the instance
    pub fn metadata(&self, name: impl Into<String>, component: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels(component)),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Metadata for a cluster-scoped object; a namespaced owner cannot own
    /// it, so the instance namespace is recorded as a label instead
    pub fn cluster_metadata(&self, name: impl Into<String>, component: &str) -> ObjectMeta {
        let mut labels = self.labels(component);
        labels.insert(
            "argocd.argoproj.io/instance-namespace".to_string(),
            self.namespace.clone(),
        );
        ObjectMeta {
            name: Some(name.into()),
            labels: Some(labels),
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::crd::{ArgoCD, ArgoCDSpec};

    pub fn create_test_argocd(name: &str) -> ArgoCD {
        create_test_argocd_with(name, ArgoCDSpec::default())
    }

    pub fn create_test_argocd_with(name: &str, spec: ArgoCDSpec) -> ArgoCD {
        let mut argocd = ArgoCD::new(name, spec);
        argocd.metadata.namespace = Some("argocd".to_string());
        argocd.metadata.uid = Some("test-uid-12345".to_string());
        argocd.metadata.generation = Some(1);
        argocd
    }
}
