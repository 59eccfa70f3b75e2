//! NotificationsConfiguration Controller
//!
//! Renders each `NotificationsConfiguration` into the
//! `argocd-notifications-cm` ConfigMap read by the notifications controller
//! and reports the outcome as a condition on the resource.

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::{watcher, Config};
use kube::runtime::{predicates, reflector, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::apply::{reconcile_object, MANAGED_BY};
use crate::crd::{
    validation_messages, NotificationsConfiguration, NotificationsConfigurationSpec,
    NotificationsConfigurationStatus,
};
use crate::error::{OperatorError, Result};
use crate::notifications::DEFAULT_NOTIFICATIONS_CONFIGURATION;
use crate::status::condition;

/// ConfigMap consumed by the notifications controller
pub const NOTIFICATIONS_CM: &str = "argocd-notifications-cm";

const CONDITION_RECONCILED: &str = "Reconciled";
const CONDITION_FAILED: &str = "Failed";

const REQUEUE_SECONDS: u64 = 300;
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Context passed to the NotificationsConfiguration controller
pub struct NotificationsConfigurationContext {
    /// Kubernetes client
    pub client: Client,
    /// Metrics recorder
    pub metrics: Option<NotificationsConfigurationMetrics>,
}

/// Metrics for the NotificationsConfiguration controller
#[derive(Clone)]
pub struct NotificationsConfigurationMetrics {
    pub reconciliations: metrics::Counter,
    pub errors: metrics::Counter,
    pub duration: metrics::Histogram,
}

impl NotificationsConfigurationMetrics {
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!(
                "argocd_operator_notifications_configuration_reconciliations_total"
            ),
            errors: metrics::counter!(
                "argocd_operator_notifications_configuration_reconciliation_errors_total"
            ),
            duration: metrics::histogram!(
                "argocd_operator_notifications_configuration_reconciliation_duration_seconds"
            ),
        }
    }
}

impl Default for NotificationsConfigurationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the NotificationsConfiguration controller
pub async fn run_notifications_configuration_controller(
    client: Client,
    namespace: Option<String>,
) -> Result<()> {
    let configs: Api<NotificationsConfiguration> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let configmaps: Api<ConfigMap> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(NotificationsConfigurationContext {
        client,
        metrics: Some(NotificationsConfigurationMetrics::new()),
    });

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting NotificationsConfiguration controller"
    );

    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(configs, Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    Controller::for_stream(stream, reader)
        .owns(configmaps, Config::default())
        .run(reconcile_configuration, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "NotificationsConfiguration reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "NotificationsConfiguration reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(config, ctx), fields(name = %config.name_any(), namespace = config.namespace()))]
async fn reconcile_configuration(
    config: Arc<NotificationsConfiguration>,
    ctx: Arc<NotificationsConfigurationContext>,
) -> Result<Action> {
    let start = Instant::now();
    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let result = apply_configuration(&config, &ctx.client).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    let status = match &result {
        Ok(()) => build_status(&config, None),
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
            build_status(&config, Some(e.to_string()))
        }
    };
    if status_changed(config.status.as_ref(), &status) {
        update_status(&ctx.client, &config, status).await?;
    }

    result.map(|()| Action::requeue(Duration::from_secs(REQUEUE_SECONDS)))
}

async fn apply_configuration(config: &NotificationsConfiguration, client: &Client) -> Result<()> {
    let namespace = config.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig("NotificationsConfiguration must be namespaced".to_string())
    })?;

    check_configuration_name(config)?;

    if let Err(errors) = config.spec.validate() {
        let message = validation_messages(&errors).join("; ");
        warn!(name = %config.name_any(), errors = %message, "NotificationsConfiguration validation failed");
        return Err(OperatorError::ValidationError(message));
    }

    let configmap = build_notifications_configmap(config, &namespace)?;
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let outcome = reconcile_object(&api, configmap).await?;
    debug!(?outcome, "Applied {}", NOTIFICATIONS_CM);
    Ok(())
}

/// All configurations of a namespace would render into the same ConfigMap;
/// only the one the ArgoCD controller creates is used.
fn check_configuration_name(config: &NotificationsConfiguration) -> Result<()> {
    let name = config.name_any();
    if name == DEFAULT_NOTIFICATIONS_CONFIGURATION {
        return Ok(());
    }
    Err(OperatorError::ValidationError(format!(
        "only '{}' is rendered into {}; '{}' is ignored",
        DEFAULT_NOTIFICATIONS_CONFIGURATION, NOTIFICATIONS_CM, name
    )))
}

/// Flatten the configuration into notifications ConfigMap data
pub fn render_notifications_data(
    spec: &NotificationsConfigurationSpec,
) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();

    for (prefix, entries) in [
        ("template.", &spec.templates),
        ("trigger.", &spec.triggers),
        ("service.", &spec.services),
    ] {
        for (key, value) in entries {
            let key = if key.starts_with(prefix) {
                key.clone()
            } else {
                format!("{}{}", prefix, key)
            };
            data.insert(key, value.clone());
        }
    }

    if let Some(subscriptions) = spec.subscriptions.as_ref().filter(|s| !s.trim().is_empty()) {
        data.insert("subscriptions".to_string(), subscriptions.clone());
    }
    if !spec.context.is_empty() {
        data.insert("context".to_string(), serde_yaml::to_string(&spec.context)?);
    }

    Ok(data)
}

/// `argocd-notifications-cm` owned by the configuration resource
pub fn build_notifications_configmap(
    config: &NotificationsConfiguration,
    namespace: &str,
) -> Result<ConfigMap> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), NOTIFICATIONS_CM.to_string());
    labels.insert("app.kubernetes.io/part-of".to_string(), "argocd".to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(NOTIFICATIONS_CM.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(config)]),
            ..Default::default()
        },
        data: Some(render_notifications_data(&config.spec)?),
        ..Default::default()
    })
}

fn owner_reference(config: &NotificationsConfiguration) -> OwnerReference {
    OwnerReference {
        api_version: NotificationsConfiguration::api_version(&()).to_string(),
        kind: NotificationsConfiguration::kind(&()).to_string(),
        name: config.name_any(),
        uid: config.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn build_status(
    config: &NotificationsConfiguration,
    error: Option<String>,
) -> NotificationsConfigurationStatus {
    let previous = config
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let current = match error {
        None => condition(
            CONDITION_RECONCILED,
            true,
            "ConfigMapRendered",
            None,
            previous,
        ),
        Some(message) => condition(
            CONDITION_FAILED,
            true,
            "RenderFailed",
            Some(message),
            previous,
        ),
    };

    NotificationsConfigurationStatus {
        conditions: vec![current],
        observed_generation: config.metadata.generation.unwrap_or(0),
        last_updated: Some(Utc::now().to_rfc3339()),
    }
}

fn status_changed(
    previous: Option<&NotificationsConfigurationStatus>,
    next: &NotificationsConfigurationStatus,
) -> bool {
    match previous {
        Some(previous) => {
            previous.conditions != next.conditions
                || previous.observed_generation != next.observed_generation
        }
        None => true,
    }
}

async fn update_status(
    client: &Client,
    config: &NotificationsConfiguration,
    status: NotificationsConfigurationStatus,
) -> Result<()> {
    let namespace = config.namespace().unwrap_or_default();
    let api: Api<NotificationsConfiguration> = Api::namespaced(client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &config.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

fn error_policy(
    config: Arc<NotificationsConfiguration>,
    error: &OperatorError,
    _ctx: Arc<NotificationsConfigurationContext>,
) -> Action {
    warn!(
        name = %config.name_any(),
        error = %error,
        "NotificationsConfiguration reconciliation error, will retry"
    );
    Action::requeue(
        error
            .requeue_delay()
            .unwrap_or(Duration::from_secs(ERROR_REQUEUE_SECONDS * 2)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{default_notifications_configuration_spec, DEFAULT_TRIGGER_COUNT};

    fn create_test_configuration(spec: NotificationsConfigurationSpec) -> NotificationsConfiguration {
        let mut config = NotificationsConfiguration::new("default-notifications-configuration", spec);
        config.metadata.namespace = Some("argocd".to_string());
        config.metadata.uid = Some("config-uid".to_string());
        config.metadata.generation = Some(3);
        config
    }

    #[test]
    fn test_render_prefixes_keys() {
        let mut spec = NotificationsConfigurationSpec::default();
        spec.templates
            .insert("app-deployed".to_string(), "message: deployed".to_string());
        spec.triggers
            .insert("trigger.on-deployed".to_string(), "- send: [app-deployed]".to_string());
        spec.services
            .insert("slack".to_string(), "token: $slack-token".to_string());

        let data = render_notifications_data(&spec).unwrap();
        assert_eq!(data["template.app-deployed"], "message: deployed");
        assert_eq!(data["trigger.on-deployed"], "- send: [app-deployed]");
        assert_eq!(data["service.slack"], "token: $slack-token");
        assert!(!data.contains_key("trigger.trigger.on-deployed"));
        assert!(!data.contains_key("context"));
        assert!(!data.contains_key("subscriptions"));
    }

    #[test]
    fn test_render_context_and_subscriptions() {
        let mut spec = NotificationsConfigurationSpec::default();
        spec.context
            .insert("argocdUrl".to_string(), "https://argocd.example.com".to_string());
        spec.subscriptions = Some("- recipients: [slack:alerts]\n  triggers: [on-sync-failed]\n".to_string());

        let data = render_notifications_data(&spec).unwrap();
        let context: BTreeMap<String, String> = serde_yaml::from_str(&data["context"]).unwrap();
        assert_eq!(context["argocdUrl"], "https://argocd.example.com");
        assert!(data["subscriptions"].contains("on-sync-failed"));
    }

    #[test]
    fn test_render_defaults() {
        let data = render_notifications_data(&default_notifications_configuration_spec()).unwrap();
        let triggers = data.keys().filter(|k| k.starts_with("trigger.")).count();
        assert_eq!(triggers, DEFAULT_TRIGGER_COUNT);
        assert!(data.contains_key("trigger.on-sync-failed"));
        assert!(data.contains_key("template.app-sync-failed"));
    }

    #[test]
    fn test_configmap_owned_by_configuration() {
        let config = create_test_configuration(NotificationsConfigurationSpec::default());
        let cm = build_notifications_configmap(&config, "argocd").unwrap();

        assert_eq!(cm.metadata.name.as_deref(), Some(NOTIFICATIONS_CM));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("argocd"));
        let owner = &cm.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "NotificationsConfiguration");
        assert_eq!(owner.api_version, "argoproj.io/v1alpha1");
        assert_eq!(owner.uid, "config-uid");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(
            cm.metadata.labels.unwrap()["app.kubernetes.io/managed-by"],
            "argocd-operator"
        );
    }

    #[test]
    fn test_only_default_configuration_is_rendered() {
        let config = create_test_configuration(NotificationsConfigurationSpec::default());
        assert!(check_configuration_name(&config).is_ok());

        let mut other = NotificationsConfiguration::new(
            "team-notifications",
            NotificationsConfigurationSpec::default(),
        );
        other.metadata.namespace = Some("argocd".to_string());
        let err = check_configuration_name(&other).unwrap_err();
        assert!(matches!(err, OperatorError::ValidationError(_)));

        let status = build_status(&other, Some(err.to_string()));
        assert_eq!(status.conditions[0].condition_type, "Failed");
        assert!(status.conditions[0]
            .message
            .as_deref()
            .unwrap()
            .contains("team-notifications"));
    }

    #[test]
    fn test_unchanged_status_is_not_rewritten() {
        let mut config = create_test_configuration(NotificationsConfigurationSpec::default());
        let first = build_status(&config, None);
        assert!(status_changed(None, &first));

        config.status = Some(NotificationsConfigurationStatus {
            last_updated: Some("2024-01-01T00:00:00+00:00".to_string()),
            ..first
        });
        let again = build_status(&config, None);
        assert!(!status_changed(config.status.as_ref(), &again));

        let failed = build_status(&config, Some("bad key".to_string()));
        assert!(status_changed(config.status.as_ref(), &failed));
    }

    #[test]
    fn test_status_conditions() {
        let config = create_test_configuration(NotificationsConfigurationSpec::default());

        let ok = build_status(&config, None);
        assert_eq!(ok.observed_generation, 3);
        assert_eq!(ok.conditions[0].condition_type, "Reconciled");
        assert_eq!(ok.conditions[0].status, "True");

        let failed = build_status(&config, Some("bad key".to_string()));
        assert_eq!(failed.conditions[0].condition_type, "Failed");
        assert_eq!(failed.conditions[0].message.as_deref(), Some("bad key"));
    }
}
