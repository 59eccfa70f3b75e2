//! Notifications sub-controller
//!
//! When `notifications.enabled` is set, the ArgoCD reconciler hands over to
//! this module to deploy the notifications controller together with its
//! RBAC, secret, metrics Service and the default NotificationsConfiguration.
//! When disabled, everything it would create is removed again.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding};
use kube::api::{Api, DynamicObject};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::apply::{create_if_missing, delete_if_exists, reconcile_object};
use crate::capabilities::ClusterCapabilities;
use crate::crd::{NotificationsConfiguration, NotificationsConfigurationSpec};
use crate::error::Result;
use crate::request::ResourceRequest;
use crate::resources::configmaps::ARGOCD_TLS_CERTS_CM;
use crate::resources::monitoring::MetricsTarget;
use crate::resources::rbac::rule;
use crate::resources::services::service_port;
use crate::resources::workloads::{
    config_map_volume, container_port, mount, with_logging_args, ContainerParams,
};
use crate::resources::{ResourceBuilder, NOTIFICATIONS_CONTROLLER, NOTIFICATIONS_METRICS_PORT};

pub const NOTIFICATIONS_SECRET: &str = "argocd-notifications-secret";
pub const DEFAULT_NOTIFICATIONS_CONFIGURATION: &str = "default-notifications-configuration";

/// Permissions of the notifications controller
pub fn notifications_role_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &["argoproj.io"],
            &["applications", "appprojects"],
            &["get", "list", "watch", "update", "patch"],
        ),
        rule(&[""], &["configmaps", "secrets"], &["get", "list", "watch"]),
    ]
}

fn message_template(text: &str) -> String {
    format!(
        "email:\n  subject: {text}\nmessage: |\n  {text}\n  Application details: {{{{.context.argocdUrl}}}}/applications/{{{{.app.metadata.name}}}}.\nslack:\n  attachments: |\n    [{{\n      \"title\": \"{{{{.app.metadata.name}}}}\",\n      \"title_link\": \"{{{{.context.argocdUrl}}}}/applications/{{{{.app.metadata.name}}}}\"\n    }}]\n"
    )
}

fn trigger(description: &str, send: &str, when: &str, once_per: Option<&str>) -> String {
    let once_per = once_per
        .map(|field| format!("  oncePer: {}\n", field))
        .unwrap_or_default();
    format!(
        "- description: {description}\n{once_per}  send:\n  - {send}\n  when: {when}\n"
    )
}

/// Templates and triggers shipped with every new installation
pub fn default_notifications_configuration_spec() -> NotificationsConfigurationSpec {
    let templates: BTreeMap<String, String> = [
        ("app-created", "Application {{.app.metadata.name}} has been created."),
        ("app-deleted", "Application {{.app.metadata.name}} has been deleted."),
        (
            "app-deployed",
            "Application {{.app.metadata.name}} is now running new version of deployments manifests.",
        ),
        (
            "app-health-degraded",
            "Application {{.app.metadata.name}} has degraded.",
        ),
        (
            "app-sync-failed",
            "Failed to sync application {{.app.metadata.name}}.",
        ),
        (
            "app-sync-running",
            "Start syncing application {{.app.metadata.name}}.",
        ),
        (
            "app-sync-status-unknown",
            "Application {{.app.metadata.name}} sync is 'Unknown'.",
        ),
        (
            "app-sync-succeeded",
            "Application {{.app.metadata.name}} has been successfully synced.",
        ),
    ]
    .into_iter()
    .map(|(name, text)| (name.to_string(), message_template(text)))
    .collect();

    let triggers: BTreeMap<String, String> = [
        (
            "on-created",
            trigger("Application is created.", "app-created", "\"true\"", Some("app.metadata.name")),
        ),
        (
            "on-deleted",
            trigger(
                "Application is deleted.",
                "app-deleted",
                "app.metadata.deletionTimestamp != nil",
                Some("app.metadata.name"),
            ),
        ),
        (
            "on-deployed",
            trigger(
                "Application is synced and healthy. Triggered once per commit.",
                "app-deployed",
                "app.status.operationState.phase in ['Succeeded'] and app.status.health.status == 'Healthy'",
                Some("app.status.operationState.syncResult.revision"),
            ),
        ),
        (
            "on-health-degraded",
            trigger(
                "Application has degraded",
                "app-health-degraded",
                "app.status.health.status == 'Degraded'",
                None,
            ),
        ),
        (
            "on-sync-failed",
            trigger(
                "Application syncing has failed",
                "app-sync-failed",
                "app.status.operationState.phase in ['Error', 'Failed']",
                None,
            ),
        ),
        (
            "on-sync-running",
            trigger(
                "Application is being synced",
                "app-sync-running",
                "app.status.operationState.phase in ['Running']",
                None,
            ),
        ),
        (
            "on-sync-status-unknown",
            trigger(
                "Application status is 'Unknown'",
                "app-sync-status-unknown",
                "app.status.sync.status == 'Unknown'",
                None,
            ),
        ),
        (
            "on-sync-succeeded",
            trigger(
                "Application syncing has succeeded",
                "app-sync-succeeded",
                "app.status.operationState.phase in ['Succeeded']",
                None,
            ),
        ),
    ]
    .into_iter()
    .map(|(name, body)| (name.to_string(), body))
    .collect();

    NotificationsConfigurationSpec {
        templates,
        triggers,
        ..Default::default()
    }
}

impl ResourceBuilder<'_> {
    pub fn build_notifications_secret(&self) -> Secret {
        Secret {
            metadata: self.metadata(NOTIFICATIONS_SECRET, NOTIFICATIONS_CONTROLLER),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    pub fn build_default_notifications_configuration(&self) -> NotificationsConfiguration {
        let mut config = NotificationsConfiguration::new(
            DEFAULT_NOTIFICATIONS_CONFIGURATION,
            default_notifications_configuration_spec(),
        );
        config.metadata = self.metadata(DEFAULT_NOTIFICATIONS_CONFIGURATION, NOTIFICATIONS_CONTROLLER);
        config
    }

    pub fn build_notifications_deployment(&self) -> Deployment {
        let spec = &self.argocd().spec;
        let notifications = &spec.notifications;

        let command = with_logging_args(
            vec![
                "argocd-notifications".to_string(),
                "--argocd-repo-server".to_string(),
                self.repo_server_address(),
            ],
            &notifications.log_level,
            &notifications.log_format,
            &[],
        );

        let container = self.build_container(ContainerParams {
            name: "argocd-notifications-controller",
            image: spec.get_notifications_image(),
            command: Some(command),
            args: None,
            env: notifications.env.clone(),
            ports: vec![container_port("metrics", NOTIFICATIONS_METRICS_PORT)],
            resources: notifications.resources.clone(),
            volume_mounts: vec![mount("tls-certs", "/app/config/tls")],
            liveness_probe: None,
            readiness_probe: None,
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            service_account_name: Some(self.service_account_name(NOTIFICATIONS_CONTROLLER)),
            volumes: Some(vec![config_map_volume("tls-certs", ARGOCD_TLS_CERTS_CM)]),
            ..Default::default()
        };
        self.build_deployment(NOTIFICATIONS_CONTROLLER, notifications.replicas, pod_spec)
    }

    pub fn notifications_metrics_target(&self) -> MetricsTarget {
        MetricsTarget {
            name: format!("{}-metrics", self.component_name(NOTIFICATIONS_CONTROLLER)),
            component: NOTIFICATIONS_CONTROLLER,
        }
    }

    pub fn build_notifications_metrics_service(&self) -> Service {
        let target = self.notifications_metrics_target();
        self.build_service(
            target.name,
            NOTIFICATIONS_CONTROLLER,
            "ClusterIP",
            vec![service_port(
                "metrics",
                NOTIFICATIONS_METRICS_PORT,
                NOTIFICATIONS_METRICS_PORT,
            )],
        )
    }
}

/// Bring the notifications controller in line with `notifications.enabled`
#[instrument(skip_all, fields(name = %builder.name(), namespace = %builder.namespace()))]
pub async fn reconcile_notifications(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let argocd = builder.argocd();
    if !argocd.spec.notifications.enabled {
        return delete_notifications_resources(client, builder, caps).await;
    }

    let namespace = builder.namespace();
    debug!("Reconciling notifications controller");

    let sa = ResourceRequest::new(builder.build_service_account(NOTIFICATIONS_CONTROLLER))
        .build(argocd, caps)?;
    reconcile_object(&Api::<ServiceAccount>::namespaced(client.clone(), namespace), sa).await?;

    let role = ResourceRequest::new(
        builder.build_role(NOTIFICATIONS_CONTROLLER, notifications_role_rules()),
    )
    .build(argocd, caps)?;
    reconcile_object(&Api::<Role>::namespaced(client.clone(), namespace), role).await?;

    let binding = ResourceRequest::new(builder.build_role_binding(NOTIFICATIONS_CONTROLLER))
        .build(argocd, caps)?;
    reconcile_object(&Api::<RoleBinding>::namespaced(client.clone(), namespace), binding).await?;

    // Users store service credentials here; never overwritten
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    create_if_missing(&secrets, &builder.build_notifications_secret()).await?;

    let configs: Api<NotificationsConfiguration> = Api::namespaced(client.clone(), namespace);
    if create_if_missing(&configs, &builder.build_default_notifications_configuration()).await? {
        info!("Created default NotificationsConfiguration");
    }

    let deployment = ResourceRequest::new(builder.build_notifications_deployment())
        .build(argocd, caps)?;
    reconcile_object(&Api::<Deployment>::namespaced(client.clone(), namespace), deployment)
        .await?;

    let service = ResourceRequest::new(builder.build_notifications_metrics_service())
        .build(argocd, caps)?;
    reconcile_object(&Api::<Service>::namespaced(client.clone(), namespace), service).await?;

    if let Some(ar) = &caps.service_monitors {
        let monitors = Api::<DynamicObject>::namespaced_with(client.clone(), namespace, ar);
        let target = builder.notifications_metrics_target();
        if argocd.spec.prometheus.enabled {
            let monitor = builder.build_service_monitor(ar, &target);
            reconcile_object(&monitors, monitor).await?;
        } else {
            delete_if_exists(&monitors, &target.name).await?;
        }
    }

    Ok(())
}

/// Remove everything `reconcile_notifications` creates
pub async fn delete_notifications_resources(
    client: &Client,
    builder: &ResourceBuilder<'_>,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let namespace = builder.namespace();
    let component_name = builder.component_name(NOTIFICATIONS_CONTROLLER);
    let account_name = builder.service_account_name(NOTIFICATIONS_CONTROLLER);
    let target = builder.notifications_metrics_target();

    let mut deleted = false;
    deleted |= delete_if_exists(
        &Api::<Deployment>::namespaced(client.clone(), namespace),
        &component_name,
    )
    .await?;
    deleted |= delete_if_exists(
        &Api::<Service>::namespaced(client.clone(), namespace),
        &target.name,
    )
    .await?;
    if let Some(ar) = &caps.service_monitors {
        deleted |= delete_if_exists(
            &Api::<DynamicObject>::namespaced_with(client.clone(), namespace, ar),
            &target.name,
        )
        .await?;
    }
    deleted |= delete_if_exists(
        &Api::<NotificationsConfiguration>::namespaced(client.clone(), namespace),
        DEFAULT_NOTIFICATIONS_CONFIGURATION,
    )
    .await?;
    deleted |= delete_if_exists(
        &Api::<Secret>::namespaced(client.clone(), namespace),
        NOTIFICATIONS_SECRET,
    )
    .await?;
    deleted |= delete_if_exists(
        &Api::<RoleBinding>::namespaced(client.clone(), namespace),
        &account_name,
    )
    .await?;
    deleted |= delete_if_exists(
        &Api::<Role>::namespaced(client.clone(), namespace),
        &account_name,
    )
    .await?;
    deleted |= delete_if_exists(
        &Api::<ServiceAccount>::namespaced(client.clone(), namespace),
        &account_name,
    )
    .await?;

    if deleted {
        info!(namespace = %namespace, "Removed notifications controller resources");
    }
    Ok(())
}

/// Number of default triggers, exposed for the configuration controller tests
#[cfg(test)]
pub(crate) const DEFAULT_TRIGGER_COUNT: usize = 8;
