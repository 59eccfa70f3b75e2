//! ArgoCD Controller
//!
//! This module implements the Kubernetes controller pattern for managing
//! ArgoCD custom resources. Each reconcile walks the installation in a fixed
//! order: secrets, config maps, RBAC, services, workloads, networking,
//! monitoring, notifications and finally the status subresource.

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::{watcher, Config};
use kube::runtime::{reflector, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::apply::{
    delete_if_exists, merge_seeded_configmap, reconcile_object, reconcile_object_with, MANAGED_BY,
};
use crate::capabilities::ClusterCapabilities;
use crate::config::OperatorConfig;
use crate::crd::{validation_messages, ArgoCD, ArgoCDStatus};
use crate::error::{OperatorError, Result};
use crate::notifications::reconcile_notifications;
use crate::request::ResourceRequest;
use crate::resources::monitoring::COMPONENT_STATUS_RULE;
use crate::resources::rbac::{role_rules, CLUSTER_RBAC_COMPONENTS};
use crate::resources::secrets::{
    generate_password, hash_password, secret_value, ADMIN_PASSWORD_KEY, ARGOCD_SECRET,
};
use crate::resources::{ResourceBuilder, APPLICATIONSET_CONTROLLER, REDIS, SERVER};
use crate::status;

/// Finalizer guarding cluster-scoped cleanup
pub const FINALIZER_NAME: &str = "argoproj.io/finalizer";

/// Requeue interval for successful reconciliations
const DEFAULT_REQUEUE_SECONDS: u64 = 300;

/// Base delay for error backoff
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context passed to the controller
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,
    /// Operator-wide settings
    pub config: OperatorConfig,
    /// Optional APIs found at startup
    pub capabilities: ClusterCapabilities,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-instance error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
    /// Identity used for Kubernetes events
    pub reporter: Reporter,
}

impl ControllerContext {
    pub fn new(client: Client, config: OperatorConfig, capabilities: ClusterCapabilities) -> Self {
        Self {
            client,
            config,
            capabilities,
            metrics: Some(ControllerMetrics::new()),
            error_counts: dashmap::DashMap::new(),
            reporter: Reporter {
                controller: MANAGED_BY.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    /// Publish an event on the ArgoCD object; failures are only logged
    async fn publish_event(
        &self,
        argocd: &ArgoCD,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let event = Event {
            type_,
            reason: reason.into(),
            note,
            action: "Reconcile".into(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(&event, &argocd.object_ref(&())).await {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("argocd_operator_reconciliations_total"),
            errors: metrics::counter!("argocd_operator_reconciliation_errors_total"),
            duration: metrics::histogram!("argocd_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Watch `api` in the operator's namespace, or cluster-wide
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Start the ArgoCD controller
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    capabilities: ClusterCapabilities,
) -> Result<()> {
    let namespace = config.namespace.clone();
    let ns = namespace.as_deref();
    let instances: Api<ArgoCD> = scoped_api(&client, ns);

    info!(
        namespace = ns.unwrap_or("all"),
        openshift = capabilities.is_openshift(),
        "Starting ArgoCD controller"
    );

    // Status writes do not bump the generation and must not retrigger us
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(instances, Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(spec_or_lifecycle_change);

    let controller = Controller::for_stream(stream, reader)
        .owns(scoped_api::<Deployment>(&client, ns), Config::default())
        .owns(scoped_api::<StatefulSet>(&client, ns), Config::default())
        .owns(scoped_api::<Service>(&client, ns), Config::default())
        .owns(scoped_api::<ConfigMap>(&client, ns), Config::default())
        .owns(scoped_api::<Secret>(&client, ns), Config::default());

    let ctx = Arc::new(ControllerContext::new(client, config, capabilities));

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(argocd, ctx), fields(name = %argocd.name_any(), namespace = argocd.namespace()))]
async fn reconcile(argocd: Arc<ArgoCD>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let namespace = argocd.namespace().unwrap_or_else(|| "default".to_string());
    let key = backoff_key(&argocd);
    let instances: Api<ArgoCD> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&instances, FINALIZER_NAME, argocd, |event| async {
        match event {
            FinalizerEvent::Apply(argocd) => apply_argocd(argocd, ctx.clone()).await,
            FinalizerEvent::Cleanup(argocd) => cleanup_argocd(argocd, ctx.clone()).await,
        }
    })
    .await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    if result.is_ok() {
        ctx.error_counts.remove(&key);
    }

    result.map_err(|e| {
        if let Some(ref metrics) = ctx.metrics {
            metrics.errors.increment(1);
        }
        match e {
            kube::runtime::finalizer::Error::ApplyFailed(err)
            | kube::runtime::finalizer::Error::CleanupFailed(err) => err,
            other => OperatorError::ReconcileFailed(other.to_string()),
        }
    })
}

/// Changes worth a reconcile: the spec (generation), the finalizer list and
/// the start of deletion. Adding the finalizer must pass, since the finalizer
/// helper waits for that event before the first apply.
fn spec_or_lifecycle_change(argocd: &ArgoCD) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    argocd.meta().generation.hash(&mut hasher);
    argocd.finalizers().hash(&mut hasher);
    argocd.meta().deletion_timestamp.is_some().hash(&mut hasher);
    Some(hasher.finish())
}

fn backoff_key(argocd: &ArgoCD) -> String {
    format!(
        "{}/{}",
        argocd.namespace().unwrap_or_default(),
        argocd.name_any()
    )
}

/// Apply (create/update) every resource of the installation
#[instrument(skip(argocd, ctx))]
async fn apply_argocd(argocd: Arc<ArgoCD>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let builder = ResourceBuilder::new(&argocd)?;
    let client = &ctx.client;
    let caps = &ctx.capabilities;

    info!(name = %builder.name(), namespace = %builder.namespace(), "Reconciling ArgoCD");

    if let Err(errors) = argocd.spec.validate() {
        let message = validation_messages(&errors).join("; ");
        warn!(name = %builder.name(), errors = %message, "ArgoCD spec validation failed");
        ctx.publish_event(
            &argocd,
            EventType::Warning,
            "ValidationFailed",
            Some(message.clone()),
        )
        .await;
        let failed = status::build_failed_status(&builder, message.clone());
        if status::status_changed(argocd.status.as_ref(), &failed) {
            update_status(client, &builder, failed).await?;
        }
        return Err(OperatorError::ValidationError(message));
    }

    reconcile_secrets(client, &builder, caps).await?;
    reconcile_configmaps(client, &builder, caps).await?;
    reconcile_rbac(client, &builder, caps, &ctx.config).await?;
    reconcile_services(client, &builder, caps).await?;
    reconcile_workloads(client, &builder, caps).await?;
    reconcile_networking(client, &builder, caps).await?;
    reconcile_monitoring(client, &builder, caps).await?;
    reconcile_notifications(client, &builder, caps).await?;

    let (components, host) = status::observe(client, &builder, caps).await?;
    let new_status = status::build_status(&builder, components, host);
    let phase = new_status.phase;
    if status::status_changed(argocd.status.as_ref(), &new_status) {
        update_status(client, &builder, new_status).await?;
        ctx.publish_event(
            &argocd,
            EventType::Normal,
            "Reconciled",
            Some(format!("Installation reconciled, phase {:?}", phase)),
        )
        .await;
    }
    info!(name = %builder.name(), ?phase, "Reconciliation complete");

    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_REQUEUE_SECONDS,
    )))
}

/// Admin credentials: `<cr>-cluster` holds the plain password, argocd-secret
/// its bcrypt hash. Neither overwrites keys that already exist.
async fn reconcile_secrets(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), builder.namespace());

    let existing = secrets.get_opt(&builder.cluster_secret_name()).await?;
    let password = match existing
        .as_ref()
        .and_then(|s| secret_value(s, ADMIN_PASSWORD_KEY))
    {
        Some(password) => password,
        None => {
            let password = generate_password();
            let secret = ResourceRequest::new(builder.build_cluster_secret(&password))
                .build(argocd, caps)?;
            reconcile_object(&secrets, secret).await?;
            info!(secret = %builder.cluster_secret_name(), "Generated admin password");
            password
        }
    };

    let live = secrets.get_opt(ARGOCD_SECRET).await?;
    let has_admin = live
        .as_ref()
        .and_then(|s| secret_value(s, ADMIN_PASSWORD_KEY))
        .is_some();

    // bcrypt is slow on purpose; only hash when the key is missing
    let desired = if has_admin {
        builder.build_argocd_secret(None)
    } else {
        let hash = hash_password(&password).await?;
        let mtime = Utc::now().to_rfc3339();
        builder.build_argocd_secret(Some((hash.as_str(), mtime.as_str())))
    };
    let desired = ResourceRequest::new(desired).build(argocd, caps)?;
    reconcile_object(&secrets, desired).await?;
    Ok(())
}

async fn reconcile_configmaps(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), builder.namespace());
    for cm in builder.build_configmaps() {
        let cm = ResourceRequest::new(cm).build(builder.argocd(), caps)?;
        reconcile_object(&api, cm).await?;
    }
    for cm in builder.build_seeded_configmaps() {
        let cm = ResourceRequest::new(cm).build(builder.argocd(), caps)?;
        reconcile_object_with(&api, cm, merge_seeded_configmap).await?;
    }
    Ok(())
}

async fn reconcile_rbac(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
    config: &OperatorConfig,
) -> Result<()> {
    let argocd = builder.argocd();
    let namespace = builder.namespace();
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    let bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);

    let components = builder.rbac_components();
    for component in &components {
        let sa = ResourceRequest::new(builder.build_service_account(component))
            .build(argocd, caps)?;
        reconcile_object(&accounts, sa).await?;

        let role = ResourceRequest::new(builder.build_role(component, role_rules(component)))
            .build(argocd, caps)?;
        reconcile_object(&roles, role).await?;

        let binding = ResourceRequest::new(builder.build_role_binding(component))
            .build(argocd, caps)?;
        reconcile_object(&bindings, binding).await?;
    }

    // Optional components lose their RBAC when switched off
    for component in [REDIS, APPLICATIONSET_CONTROLLER] {
        if !components.contains(&component) {
            let name = builder.service_account_name(component);
            delete_if_exists(&bindings, &name).await?;
            delete_if_exists(&roles, &name).await?;
            delete_if_exists(&accounts, &name).await?;
        }
    }

    if config.is_cluster_config_namespace(namespace) {
        let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
        let cluster_bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
        for component in CLUSTER_RBAC_COMPONENTS {
            let role = ResourceRequest::new(builder.build_cluster_role(component))
                .build(argocd, caps)?;
            reconcile_object(&cluster_roles, role).await?;

            let binding = ResourceRequest::new(builder.build_cluster_role_binding(component))
                .build(argocd, caps)?;
            reconcile_object(&cluster_bindings, binding).await?;
        }
    } else {
        delete_cluster_rbac(client, builder).await?;
    }

    Ok(())
}

/// Remove the ClusterRoles and ClusterRoleBindings of an instance
async fn delete_cluster_rbac(client: &Client, builder: &ResourceBuilder<'_>) -> Result<()> {
    let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
    let cluster_bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
    for component in CLUSTER_RBAC_COMPONENTS {
        let name = builder.cluster_resource_name(component);
        delete_if_exists(&cluster_bindings, &name).await?;
        delete_if_exists(&cluster_roles, &name).await?;
    }
    Ok(())
}

async fn reconcile_services(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    let api: Api<Service> = Api::namespaced(client.clone(), builder.namespace());

    for service in builder.build_services() {
        let service = ResourceRequest::new(service).build(argocd, caps)?;
        reconcile_object(&api, service).await?;
    }

    if argocd.spec.redis_enabled() {
        let service = ResourceRequest::new(builder.build_redis_service()).build(argocd, caps)?;
        reconcile_object(&api, service).await?;
    } else {
        delete_if_exists(&api, &builder.component_name(REDIS)).await?;
    }

    if argocd.spec.application_set_enabled() {
        let service =
            ResourceRequest::new(builder.build_applicationset_service()).build(argocd, caps)?;
        reconcile_object(&api, service).await?;
    } else {
        delete_if_exists(&api, &builder.component_name(APPLICATIONSET_CONTROLLER)).await?;
    }

    Ok(())
}

async fn reconcile_workloads(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    let namespace = builder.namespace();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);

    if argocd.spec.redis_enabled() {
        let redis = ResourceRequest::new(builder.build_redis_deployment()).build(argocd, caps)?;
        reconcile_object(&deployments, redis).await?;
    } else {
        delete_if_exists(&deployments, &builder.component_name(REDIS)).await?;
    }

    for deployment in [
        builder.build_repo_server_deployment(),
        builder.build_server_deployment(),
    ] {
        let deployment = ResourceRequest::new(deployment).build(argocd, caps)?;
        reconcile_object(&deployments, deployment).await?;
    }

    let controller = ResourceRequest::new(builder.build_application_controller_statefulset())
        .build(argocd, caps)?;
    reconcile_object(&statefulsets, controller).await?;

    match builder.build_applicationset_deployment() {
        Some(appset) => {
            let appset = ResourceRequest::new(appset).build(argocd, caps)?;
            reconcile_object(&deployments, appset).await?;
        }
        None => {
            delete_if_exists(
                &deployments,
                &builder.component_name(APPLICATIONSET_CONTROLLER),
            )
            .await?;
        }
    }

    Ok(())
}

async fn reconcile_networking(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    let server = &argocd.spec.server;
    let namespace = builder.namespace();
    let server_name = builder.component_name(SERVER);

    if let Some(ar) = &caps.routes {
        let routes = Api::<DynamicObject>::namespaced_with(client.clone(), namespace, ar);
        if server.route.enabled {
            let route = ResourceRequest::new(builder.build_server_route(ar)).build(argocd, caps)?;
            reconcile_object(&routes, route).await?;
        } else {
            delete_if_exists(&routes, &server_name).await?;
        }
    } else if server.route.enabled {
        warn!(name = %builder.name(), "Route requested but route.openshift.io is not served");
    }

    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
    if server.ingress.enabled {
        let ingress = ResourceRequest::new(builder.build_server_ingress()).build(argocd, caps)?;
        reconcile_object(&ingresses, ingress).await?;
    } else {
        delete_if_exists(&ingresses, &server_name).await?;
    }

    if server.grpc.ingress.enabled {
        let ingress = ResourceRequest::new(builder.build_grpc_ingress()).build(argocd, caps)?;
        reconcile_object(&ingresses, ingress).await?;
    } else {
        delete_if_exists(&ingresses, &format!("{}-grpc", builder.name())).await?;
    }

    Ok(())
}

async fn reconcile_monitoring(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    let spec = &argocd.spec;
    let namespace = builder.namespace();

    if let Some(ar) = &caps.service_monitors {
        let monitors = Api::<DynamicObject>::namespaced_with(client.clone(), namespace, ar);
        let targets = builder.metrics_targets();
        if spec.prometheus.enabled {
            for target in &targets {
                let monitor = ResourceRequest::new(builder.build_service_monitor(ar, target))
                    .build(argocd, caps)?;
                reconcile_object(&monitors, monitor).await?;
            }
        } else {
            for target in &targets {
                delete_if_exists(&monitors, &target.name).await?;
            }
        }
        if !spec.application_set_enabled() {
            delete_if_exists(&monitors, &builder.component_name(APPLICATIONSET_CONTROLLER))
                .await?;
        }
    } else if spec.prometheus.enabled {
        warn!(name = %builder.name(), "Prometheus requested but ServiceMonitor CRD is missing");
    }

    if let Some(ar) = &caps.prometheus_rules {
        let rules = Api::<DynamicObject>::namespaced_with(client.clone(), namespace, ar);
        if spec.monitoring.enabled {
            let rule = ResourceRequest::new(builder.build_component_status_rule(ar))
                .build(argocd, caps)?;
            reconcile_object(&rules, rule).await?;
        } else {
            delete_if_exists(&rules, COMPONENT_STATUS_RULE).await?;
        }
    } else if spec.monitoring.enabled {
        warn!(name = %builder.name(), "Monitoring requested but PrometheusRule CRD is missing");
    }

    Ok(())
}

/// Cleanup resources when the instance is deleted
#[instrument(skip(argocd, ctx))]
async fn cleanup_argocd(argocd: Arc<ArgoCD>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let builder = ResourceBuilder::new(&argocd)?;

    info!(name = %builder.name(), namespace = %builder.namespace(), "Cleaning up ArgoCD resources");

    // Namespaced objects carry owner references and are garbage collected;
    // cluster-scoped RBAC cannot point at a namespaced owner.
    delete_cluster_rbac(&ctx.client, &builder).await?;

    info!(name = %builder.name(), "Cleanup complete");
    Ok(Action::await_change())
}

async fn update_status(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    status: ArgoCDStatus,
) -> Result<()> {
    let api: Api<ArgoCD> = Api::namespaced(client.clone(), builder.namespace());

    debug!(name = %builder.name(), phase = ?status.phase, "Updating ArgoCD status");

    let patch = serde_json::json!({
        "status": status
    });
    api.patch_status(builder.name(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(OperatorError::from)?;

    Ok(())
}

/// Delay before the next attempt after `retries` consecutive failures
fn backoff_delay(error: &OperatorError, retries: u32) -> Duration {
    // 30s → 60s → 120s → 240s → 480s → 600s (capped)
    error.requeue_delay().unwrap_or_else(|| {
        let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
        let backoff = base * 2u32.saturating_pow(retries.saturating_sub(1).min(5));
        backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
    })
}

/// Error policy for the controller: exponential backoff per instance
fn error_policy(argocd: Arc<ArgoCD>, error: &OperatorError, ctx: Arc<ControllerContext>) -> Action {
    let key = backoff_key(&argocd);
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    let delay = backoff_delay(error, retries);

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::create_test_argocd;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let error = OperatorError::ValidationError("bad".to_string());
        let delays: Vec<u64> = (1..=8).map(|r| backoff_delay(&error, r).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 480, 600, 600, 600]);
    }

    #[test]
    fn test_retryable_errors_use_fixed_delay() {
        let error = OperatorError::ReconcileFailed("api server".to_string());
        assert_eq!(backoff_delay(&error, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(&error, 6), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_key() {
        let argocd = create_test_argocd("example");
        assert_eq!(backoff_key(&argocd), "argocd/example");
    }

    #[test]
    fn test_status_writes_do_not_retrigger() {
        let argocd = create_test_argocd("example");
        let before = spec_or_lifecycle_change(&argocd);

        let mut with_status = argocd.clone();
        with_status.status = Some(ArgoCDStatus {
            last_updated: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..Default::default()
        });
        with_status.metadata.resource_version = Some("42".to_string());
        assert_eq!(spec_or_lifecycle_change(&with_status), before);

        let mut finalized = argocd.clone();
        finalized.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
        assert_ne!(spec_or_lifecycle_change(&finalized), before);

        let mut edited = argocd;
        edited.metadata.generation = Some(2);
        assert_ne!(spec_or_lifecycle_change(&edited), before);
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(FINALIZER_NAME, "argoproj.io/finalizer");
    }
}
