//! Cluster capability detection
//!
//! Optional integrations (OpenShift Routes, Prometheus Operator) are only
//! reconciled when their APIs are served by the cluster. Discovery runs once
//! at startup and the resolved `ApiResource`s are shared by every controller.

use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::error::Result;

/// OpenShift route API group
pub const ROUTE_GROUP: &str = "route.openshift.io";

/// Prometheus Operator API group
pub const MONITORING_GROUP: &str = "monitoring.coreos.com";

/// APIs available to the operator beyond the core Kubernetes types
#[derive(Debug, Clone, Default)]
pub struct ClusterCapabilities {
    /// `route.openshift.io/v1` Route
    pub routes: Option<ApiResource>,
    /// `monitoring.coreos.com/v1` ServiceMonitor
    pub service_monitors: Option<ApiResource>,
    /// `monitoring.coreos.com/v1` PrometheusRule
    pub prometheus_rules: Option<ApiResource>,
}

impl ClusterCapabilities {
    /// Run API discovery restricted to the optional groups
    pub async fn discover(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client)
            .filter(&[ROUTE_GROUP, MONITORING_GROUP])
            .run()
            .await?;

        let find = |group: &str, kind: &str| {
            discovery
                .get(group)
                .and_then(|g| g.recommended_kind(kind))
                .map(|(ar, _caps)| ar)
        };

        let capabilities = Self {
            routes: find(ROUTE_GROUP, "Route"),
            service_monitors: find(MONITORING_GROUP, "ServiceMonitor"),
            prometheus_rules: find(MONITORING_GROUP, "PrometheusRule"),
        };

        if capabilities.routes.is_none() {
            info!("Route API not found, OpenShift integrations disabled");
        }
        if capabilities.service_monitors.is_none() {
            warn!("ServiceMonitor API not found, prometheus.enabled will be ignored");
        }
        if capabilities.prometheus_rules.is_none() {
            warn!("PrometheusRule API not found, monitoring.enabled will be ignored");
        }

        Ok(capabilities)
    }

    /// OpenShift is detected by the presence of the Route API
    pub fn is_openshift(&self) -> bool {
        self.routes.is_some()
    }

    /// Capabilities of an OpenShift cluster running the Prometheus Operator
    #[cfg(test)]
    pub fn openshift() -> Self {
        Self {
            routes: Some(api_resource(ROUTE_GROUP, "v1", "Route", "routes")),
            service_monitors: Some(api_resource(
                MONITORING_GROUP,
                "v1",
                "ServiceMonitor",
                "servicemonitors",
            )),
            prometheus_rules: Some(api_resource(
                MONITORING_GROUP,
                "v1",
                "PrometheusRule",
                "prometheusrules",
            )),
        }
    }
}

/// Build an `ApiResource` for a known group/version/kind
pub fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", group, version),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}
