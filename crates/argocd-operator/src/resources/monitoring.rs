//! Prometheus Operator objects: ServiceMonitors and the component alert rule

use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use super::{
    ResourceBuilder, APPLICATIONSET_CONTROLLER, APPLICATION_CONTROLLER, NOTIFICATIONS_CONTROLLER,
    REDIS, REPO_SERVER, SERVER,
};

pub const COMPONENT_STATUS_RULE: &str = "argocd-component-status-alert";

/// A metrics Service a ServiceMonitor points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsTarget {
    /// Name of both the Service and its ServiceMonitor
    pub name: String,
    pub component: &'static str,
}

impl ResourceBuilder<'_> {
    /// Metrics Services of the enabled core components
    pub fn metrics_targets(&self) -> Vec<MetricsTarget> {
        let mut targets = vec![
            MetricsTarget {
                name: format!("{}-metrics", self.component_name(SERVER)),
                component: SERVER,
            },
            MetricsTarget {
                name: self.component_name(REPO_SERVER),
                component: REPO_SERVER,
            },
            MetricsTarget {
                name: format!("{}-metrics", self.component_name(APPLICATION_CONTROLLER)),
                component: APPLICATION_CONTROLLER,
            },
        ];
        if self.argocd().spec.application_set_enabled() {
            targets.push(MetricsTarget {
                name: self.component_name(APPLICATIONSET_CONTROLLER),
                component: APPLICATIONSET_CONTROLLER,
            });
        }
        targets
    }

    /// ServiceMonitor scraping the `metrics` port of one Service
    pub fn build_service_monitor(&self, ar: &ApiResource, target: &MetricsTarget) -> DynamicObject {
        let mut metadata = self.metadata(target.name.clone(), target.component);
        if let Some(labels) = metadata.labels.as_mut() {
            labels.insert("release".to_string(), "prometheus-operator".to_string());
        }

        let spec = serde_json::json!({
            "selector": {
                "matchLabels": self.selector_labels(target.component)
            },
            "namespaceSelector": {
                "matchNames": [self.namespace()]
            },
            "endpoints": [
                { "port": "metrics" }
            ]
        });

        let mut object =
            DynamicObject::new(&target.name, ar).data(serde_json::json!({ "spec": spec }));
        object.metadata = metadata;
        object
    }

    /// Alert rules firing when a workload has fewer ready replicas than desired
    pub fn build_component_status_rule(&self, ar: &ApiResource) -> DynamicObject {
        let spec = &self.argocd().spec;
        let namespace = self.namespace();

        let mut rules = vec![workload_alert(
            "ApplicationController",
            "statefulset",
            &self.component_name(APPLICATION_CONTROLLER),
            namespace,
        )];

        let mut deployments = vec![("Server", SERVER), ("RepoServer", REPO_SERVER)];
        if spec.redis_enabled() {
            deployments.push(("Redis", REDIS));
        }
        if spec.application_set_enabled() {
            deployments.push(("ApplicationSetController", APPLICATIONSET_CONTROLLER));
        }
        if spec.notifications.enabled {
            deployments.push(("NotificationsController", NOTIFICATIONS_CONTROLLER));
        }
        for (alert, component) in deployments {
            rules.push(workload_alert(
                alert,
                "deployment",
                &self.component_name(component),
                namespace,
            ));
        }

        let body = serde_json::json!({
            "spec": {
                "groups": [{
                    "name": "ArgoCDComponentStatus",
                    "rules": rules
                }]
            }
        });

        let mut metadata = self.metadata(COMPONENT_STATUS_RULE, SERVER);
        if let Some(labels) = metadata.labels.as_mut() {
            labels.insert("role".to_string(), "alert-rules".to_string());
        }
        let mut object = DynamicObject::new(COMPONENT_STATUS_RULE, ar).data(body);
        object.metadata = metadata;
        object
    }
}

fn workload_alert(
    alert: &str,
    workload_kind: &str,
    workload: &str,
    namespace: &str,
) -> serde_json::Value {
    let selector = format!(
        "{kind}=\"{workload}\",namespace=\"{namespace}\"",
        kind = workload_kind,
    );
    serde_json::json!({
        "alert": format!("{}NotReady", alert),
        "expr": format!(
            "kube_{kind}_status_replicas{{{sel}}} != kube_{kind}_status_replicas_ready{{{sel}}}",
            kind = workload_kind,
            sel = selector,
        ),
        "for": "1m",
        "labels": { "severity": "warning" },
        "annotations": {
            "message": format!(
                "{} {} in namespace {} has not matched the expected number of ready replicas for longer than a minute.",
                workload_kind, workload, namespace
            )
        }
    })
}
