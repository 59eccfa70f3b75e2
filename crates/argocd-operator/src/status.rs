//! Status derivation for ArgoCD resources
//!
//! Component health is read from the workloads the operator manages. The
//! overall phase only considers components that are enabled in the spec.

use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, StatefulSet};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DynamicObject};
use kube::Client;
use tracing::debug;

use crate::capabilities::ClusterCapabilities;
use crate::crd::{ArgoCDCondition, ArgoCDPhase, ArgoCDStatus, ComponentStatus};
use crate::error::Result;
use crate::resources::{
    ResourceBuilder, APPLICATIONSET_CONTROLLER, APPLICATION_CONTROLLER, NOTIFICATIONS_CONTROLLER,
    REDIS, REPO_SERVER, SERVER,
};

pub const CONDITION_RECONCILED: &str = "Reconciled";
pub const CONDITION_AVAILABLE: &str = "Available";

/// Status of a Deployment-backed component
pub fn deployment_status(deployment: Option<&Deployment>) -> ComponentStatus {
    let Some(deployment) = deployment else {
        return ComponentStatus::Unknown;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();

    let conditions: &[DeploymentCondition] = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    let failed = conditions.iter().any(|c| {
        (c.type_ == "ReplicaFailure" && c.status == "True")
            || (c.type_ == "Progressing"
                && c.status == "False"
                && c.reason.as_deref() == Some("ProgressDeadlineExceeded"))
    });
    if failed {
        return ComponentStatus::Failed;
    }

    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    replica_status(desired, ready)
}

/// Status of a StatefulSet-backed component
pub fn statefulset_status(statefulset: Option<&StatefulSet>) -> ComponentStatus {
    let Some(statefulset) = statefulset else {
        return ComponentStatus::Unknown;
    };
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = statefulset
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    replica_status(desired, ready)
}

fn replica_status(desired: i32, ready: i32) -> ComponentStatus {
    if desired > 0 && ready == desired {
        ComponentStatus::Running
    } else {
        ComponentStatus::Pending
    }
}

/// Overall phase from `(enabled, status)` pairs
pub fn derive_phase(components: &[(bool, ComponentStatus)]) -> ArgoCDPhase {
    let enabled: Vec<ComponentStatus> = components
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, status)| *status)
        .collect();

    if enabled.contains(&ComponentStatus::Failed) {
        ArgoCDPhase::Failed
    } else if enabled.iter().all(|s| *s == ComponentStatus::Running) {
        ArgoCDPhase::Available
    } else {
        ArgoCDPhase::Pending
    }
}

/// Host assigned to a Route, preferring the admitted host in its status
pub fn route_host(route: &DynamicObject) -> Option<String> {
    route.data["status"]["ingress"][0]["host"]
        .as_str()
        .or_else(|| route.data["spec"]["host"].as_str())
        .map(str::to_string)
}

/// Host of the first Ingress rule
pub fn ingress_host(ingress: &Ingress) -> Option<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .and_then(|rules| rules.first())
        .and_then(|rule| rule.host.clone())
}

/// Build a condition, keeping the previous transition time when the status
/// did not flip
pub fn condition(
    condition_type: &str,
    ok: bool,
    reason: &str,
    message: Option<String>,
    previous: &[ArgoCDCondition],
) -> ArgoCDCondition {
    let status = if ok { "True" } else { "False" };
    let last_transition_time = previous
        .iter()
        .find(|c| c.condition_type == condition_type && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    ArgoCDCondition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message,
        last_transition_time: Some(last_transition_time),
    }
}

/// Observed state of every component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentStatuses {
    pub application_controller: ComponentStatus,
    pub application_set_controller: ComponentStatus,
    pub notifications_controller: ComponentStatus,
    pub redis: ComponentStatus,
    pub repo: ComponentStatus,
    pub server: ComponentStatus,
}

/// Assemble the status of a successfully applied installation
pub fn build_status(
    builder: &ResourceBuilder<'_>,
    components: ComponentStatuses,
    host: Option<String>,
) -> ArgoCDStatus {
    let argocd = builder.argocd();
    let spec = &argocd.spec;
    let previous = argocd
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let mut components = components;
    if !spec.redis_enabled() {
        components.redis = ComponentStatus::Unknown;
    }
    if !spec.application_set_enabled() {
        components.application_set_controller = ComponentStatus::Unknown;
    }
    if !spec.notifications.enabled {
        components.notifications_controller = ComponentStatus::Unknown;
    }

    let phase = derive_phase(&[
        (true, components.application_controller),
        (true, components.repo),
        (true, components.server),
        (spec.redis_enabled(), components.redis),
        (
            spec.application_set_enabled(),
            components.application_set_controller,
        ),
        (
            spec.notifications.enabled,
            components.notifications_controller,
        ),
    ]);

    let available = phase == ArgoCDPhase::Available;
    let conditions = vec![
        condition(
            CONDITION_RECONCILED,
            true,
            "ReconcileSucceeded",
            None,
            previous,
        ),
        condition(
            CONDITION_AVAILABLE,
            available,
            if available {
                "AllComponentsRunning"
            } else {
                "ComponentsNotReady"
            },
            None,
            previous,
        ),
    ];

    ArgoCDStatus {
        phase,
        application_controller: components.application_controller,
        application_set_controller: components.application_set_controller,
        notifications_controller: components.notifications_controller,
        redis: components.redis,
        repo: components.repo,
        server: components.server,
        host,
        conditions,
        observed_generation: argocd.metadata.generation.unwrap_or(0),
        last_updated: Some(Utc::now().to_rfc3339()),
        message: None,
    }
}

/// Status recorded when the spec was rejected before anything was applied
pub fn build_failed_status(builder: &ResourceBuilder<'_>, message: String) -> ArgoCDStatus {
    let argocd = builder.argocd();
    let previous = argocd.status.clone().unwrap_or_default();

    ArgoCDStatus {
        phase: ArgoCDPhase::Failed,
        conditions: vec![
            condition(
                CONDITION_RECONCILED,
                false,
                "ValidationFailed",
                Some(message.clone()),
                &previous.conditions,
            ),
            condition(
                CONDITION_AVAILABLE,
                false,
                "ValidationFailed",
                None,
                &previous.conditions,
            ),
        ],
        observed_generation: argocd.metadata.generation.unwrap_or(0),
        last_updated: Some(Utc::now().to_rfc3339()),
        message: Some(message),
        ..previous
    }
}

/// True when `next` differs from the recorded status in anything but the
/// update timestamp
pub fn status_changed(previous: Option<&ArgoCDStatus>, next: &ArgoCDStatus) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let stamped = ArgoCDStatus {
        last_updated: previous.last_updated.clone(),
        ..next.clone()
    };
    *previous != stamped
}

/// Read the workloads and edge objects of an installation
pub async fn observe(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<(ComponentStatuses, Option<String>)> {
    let namespace = builder.namespace();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);

    let deployment = |component: &'static str| {
        let api = deployments.clone();
        let name = builder.component_name(component);
        async move { api.get_opt(&name).await }
    };

    let components = ComponentStatuses {
        application_controller: statefulset_status(
            statefulsets
                .get_opt(&builder.component_name(APPLICATION_CONTROLLER))
                .await?
                .as_ref(),
        ),
        application_set_controller: deployment_status(
            deployment(APPLICATIONSET_CONTROLLER).await?.as_ref(),
        ),
        notifications_controller: deployment_status(
            deployment(NOTIFICATIONS_CONTROLLER).await?.as_ref(),
        ),
        redis: deployment_status(deployment(REDIS).await?.as_ref()),
        repo: deployment_status(deployment(REPO_SERVER).await?.as_ref()),
        server: deployment_status(deployment(SERVER).await?.as_ref()),
    };

    let server = &builder.argocd().spec.server;
    let mut host = None;
    if let (true, Some(ar)) = (server.route.enabled, caps.routes.as_ref()) {
        let routes: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, ar);
        host = routes
            .get_opt(&builder.component_name(SERVER))
            .await?
            .as_ref()
            .and_then(route_host);
    }
    if host.is_none() && server.ingress.enabled {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        host = ingresses
            .get_opt(&builder.component_name(SERVER))
            .await?
            .as_ref()
            .and_then(ingress_host);
    }

    debug!(?components, host = host.as_deref(), "Observed installation");
    Ok((components, host))
}
