//! Reconcile-diff-update against the Kubernetes API
//!
//! The live object is fetched; when absent the desired object is created,
//! otherwise a fixed per-kind list of fields is compared and the live object
//! is replaced only when one of them differs. Fields outside that list are
//! left to whoever else writes them (defaulting, other controllers).

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, PodTemplateSpec, ResourceRequirements, Secret,
    Service, ServiceAccount, ServicePort, VolumeMount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

use crate::error::{OperatorError, Result};

/// Field manager label value identifying objects we own
pub const MANAGED_BY: &str = "argocd-operator";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// What `reconcile_object` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    /// Replaced; lists the fields that differed
    Updated(Vec<&'static str>),
    /// Deleted and created again because an immutable field changed
    Recreated,
    Unchanged,
}

/// Per-kind field comparison
pub trait Reconcilable {
    /// Kind name used in logs and errors
    fn object_kind(&self) -> String;

    /// Copy every managed field that differs from `desired` onto `self` and
    /// return the names of those fields
    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str>;

    /// True when `desired` changes a field the API server refuses to update
    fn requires_recreate(&self, _desired: &Self) -> bool {
        false
    }
}

/// Refuse to touch objects another manager claims
pub fn verify_ownership<K: Resource>(existing: &K, kind: &str) -> Result<()> {
    let labels = existing.meta().labels.as_ref();
    match labels.and_then(|l| l.get(MANAGED_BY_LABEL)) {
        Some(manager) if manager != MANAGED_BY => Err(OperatorError::OwnershipConflict {
            kind: kind.to_string(),
            name: existing.meta().name.clone().unwrap_or_default(),
            manager: manager.clone(),
        }),
        _ => Ok(()),
    }
}

/// Create `desired` when missing, otherwise update the managed fields
pub async fn reconcile_object<K>(api: &Api<K>, desired: K) -> Result<ApplyOutcome>
where
    K: Resource + Reconcilable + Clone + Serialize + DeserializeOwned + Debug,
{
    reconcile_object_with(api, desired, K::merge_from).await
}

/// Same as [`reconcile_object`] with a caller supplied field merge
pub async fn reconcile_object_with<K, F>(api: &Api<K>, desired: K, merge: F) -> Result<ApplyOutcome>
where
    K: Resource + Reconcilable + Clone + Serialize + DeserializeOwned + Debug,
    F: FnOnce(&mut K, &K) -> Vec<&'static str>,
{
    let kind = desired.object_kind();
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("{} missing metadata.name", kind)))?;

    let Some(mut live) = api.get_opt(&name).await? else {
        api.create(&PostParams::default(), &desired).await?;
        info!(kind = %kind, name = %name, "Created resource");
        return Ok(ApplyOutcome::Created);
    };

    verify_ownership(&live, &kind)?;

    if live.requires_recreate(&desired) {
        api.delete(&name, &DeleteParams::background()).await?;
        // The old object may still be terminating; a conflict is retried
        // on the next reconcile.
        api.create(&PostParams::default(), &desired)
            .await
            .map_err(|e| {
                OperatorError::ReconcileFailed(format!("recreating {}/{}: {}", kind, name, e))
            })?;
        info!(kind = %kind, name = %name, "Recreated resource with immutable field change");
        return Ok(ApplyOutcome::Recreated);
    }

    let changed = merge(&mut live, &desired);
    if changed.is_empty() {
        debug!(kind = %kind, name = %name, "Resource up to date");
        return Ok(ApplyOutcome::Unchanged);
    }

    api.replace(&name, &PostParams::default(), &live).await?;
    info!(kind = %kind, name = %name, fields = ?changed, "Updated resource");
    Ok(ApplyOutcome::Updated(changed))
}

/// Create `desired` unless an object of that name exists; never updates.
/// Returns true when the object was created.
pub async fn create_if_missing<K>(api: &Api<K>, desired: &K) -> Result<bool>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = desired.name_any();
    if api.get_opt(&name).await?.is_some() {
        return Ok(false);
    }
    match api.create(&PostParams::default(), desired).await {
        Ok(_) => {
            info!(name = %name, "Created resource");
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete by name; a missing object counts as success.
/// Returns true when something was deleted.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(name = %name, "Deleted resource");
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn sync<T: PartialEq + Clone>(
    live: &mut T,
    desired: &T,
    field: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if live != desired {
        *live = desired.clone();
        changed.push(field);
    }
}

/// Like `sync`, but an unset value and an empty one are the same. The API
/// server drops empty lists and maps and fills some structs with `{}`.
fn sync_defaulted<T: PartialEq + Clone + Default>(
    live: &mut Option<T>,
    desired: &Option<T>,
    field: &'static str,
    changed: &mut Vec<&'static str>,
) {
    let unset = T::default();
    if live.as_ref().unwrap_or(&unset) != desired.as_ref().unwrap_or(&unset) {
        *live = desired.clone();
        changed.push(field);
    }
}

/// Add the keys of `desired` that `live` lacks; existing values are kept
fn add_missing_keys<V: Clone>(
    live: &mut Option<BTreeMap<String, V>>,
    desired: &Option<BTreeMap<String, V>>,
) -> bool {
    let Some(wanted) = desired.as_ref() else {
        return false;
    };
    let data = live.get_or_insert_with(Default::default);
    let mut added = false;
    for (key, value) in wanted {
        if !data.contains_key(key) {
            data.insert(key.clone(), value.clone());
            added = true;
        }
    }
    added
}

/// Desired labels must be present on the live object; extra live labels stay
fn sync_labels(live: &mut ObjectMeta, desired: &ObjectMeta, changed: &mut Vec<&'static str>) {
    let Some(wanted) = desired.labels.as_ref() else {
        return;
    };
    let labels = live.labels.get_or_insert_with(Default::default);
    let mut differs = false;
    for (key, value) in wanted {
        if labels.get(key) != Some(value) {
            labels.insert(key.clone(), value.clone());
            differs = true;
        }
    }
    if differs {
        changed.push("labels");
    }
}

fn sync_annotations(live: &mut ObjectMeta, desired: &ObjectMeta, changed: &mut Vec<&'static str>) {
    let Some(wanted) = desired.annotations.as_ref() else {
        return;
    };
    let annotations = live.annotations.get_or_insert_with(Default::default);
    let mut differs = false;
    for (key, value) in wanted {
        if annotations.get(key) != Some(value) {
            annotations.insert(key.clone(), value.clone());
            differs = true;
        }
    }
    if differs {
        changed.push("annotations");
    }
}

/// Adopt objects created before the owner reference existed
fn sync_owner(live: &mut ObjectMeta, desired: &ObjectMeta, changed: &mut Vec<&'static str>) {
    if live.owner_references.is_none() && desired.owner_references.is_some() {
        live.owner_references = desired.owner_references.clone();
        changed.push("ownerReferences");
    }
}

fn sync_meta(live: &mut ObjectMeta, desired: &ObjectMeta, changed: &mut Vec<&'static str>) {
    sync_labels(live, desired, changed);
    sync_owner(live, desired, changed);
}

macro_rules! static_kind {
    () => {
        fn object_kind(&self) -> String {
            <Self as Resource>::kind(&()).to_string()
        }
    };
}

impl Reconcilable for ConfigMap {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.data, &desired.data, "data", &mut changed);
        sync(
            &mut self.binary_data,
            &desired.binary_data,
            "binaryData",
            &mut changed,
        );
        changed
    }
}

/// Merge for ConfigMaps that only carry initial entries and are edited
/// afterwards (known hosts, TLS certificates, GPG keys): keys are added when
/// missing, nothing is changed or removed.
pub fn merge_seeded_configmap(live: &mut ConfigMap, desired: &ConfigMap) -> Vec<&'static str> {
    let mut changed = Vec::new();
    sync_meta(&mut live.metadata, &desired.metadata, &mut changed);
    if add_missing_keys(&mut live.data, &desired.data) {
        changed.push("data");
    }
    changed
}

impl Reconcilable for Secret {
    static_kind!();

    /// Only keys missing from the live Secret are added, so generated
    /// credentials and user edits survive.
    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        if add_missing_keys(&mut self.data, &desired.data) {
            changed.push("data");
        }
        changed
    }
}

impl Reconcilable for ServiceAccount {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        changed
    }
}

impl Reconcilable for Role {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.rules, &desired.rules, "rules", &mut changed);
        changed
    }
}

impl Reconcilable for ClusterRole {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.rules, &desired.rules, "rules", &mut changed);
        changed
    }
}

impl Reconcilable for RoleBinding {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.subjects, &desired.subjects, "subjects", &mut changed);
        changed
    }

    fn requires_recreate(&self, desired: &Self) -> bool {
        self.role_ref != desired.role_ref
    }
}

impl Reconcilable for ClusterRoleBinding {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.subjects, &desired.subjects, "subjects", &mut changed);
        changed
    }

    fn requires_recreate(&self, desired: &Self) -> bool {
        self.role_ref != desired.role_ref
    }
}

/// Service types that get node ports allocated
fn allocates_node_ports(type_: Option<&str>) -> bool {
    matches!(type_, Some("NodePort") | Some("LoadBalancer"))
}

/// Server-assigned node ports are kept when the desired port leaves them unset
fn with_live_node_ports(desired: &[ServicePort], live: &[ServicePort]) -> Vec<ServicePort> {
    desired
        .iter()
        .map(|port| {
            let mut port = port.clone();
            if port.node_port.is_none() {
                port.node_port = live
                    .iter()
                    .find(|p| p.name == port.name && p.port == port.port)
                    .and_then(|p| p.node_port);
            }
            port
        })
        .collect()
}

impl Reconcilable for Service {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);

        let Some(wanted) = desired.spec.as_ref() else {
            return changed;
        };
        let spec = self.spec.get_or_insert_with(Default::default);

        sync(&mut spec.type_, &wanted.type_, "type", &mut changed);
        sync(&mut spec.selector, &wanted.selector, "selector", &mut changed);

        // A ClusterIP Service must not carry node ports
        let wanted_ports = if allocates_node_ports(wanted.type_.as_deref()) {
            let live_ports = spec.ports.clone().unwrap_or_default();
            wanted
                .ports
                .as_ref()
                .map(|ports| with_live_node_ports(ports, &live_ports))
        } else {
            wanted.ports.clone()
        };
        sync(&mut spec.ports, &wanted_ports, "ports", &mut changed);
        changed
    }
}

type ContainerFields<'a> = (
    &'a String,
    &'a Option<String>,
    &'a Option<String>,
    &'a [String],
    &'a [String],
    &'a [EnvVar],
    Option<&'a ResourceRequirements>,
    &'a [VolumeMount],
    &'a [ContainerPort],
);

/// The container fields the operator owns. Empty lists read back as unset.
fn container_fields(c: &Container) -> ContainerFields<'_> {
    let resources = c
        .resources
        .as_ref()
        .filter(|r| **r != ResourceRequirements::default());
    (
        &c.name,
        &c.image,
        &c.image_pull_policy,
        c.command.as_deref().unwrap_or_default(),
        c.args.as_deref().unwrap_or_default(),
        c.env.as_deref().unwrap_or_default(),
        resources,
        c.volume_mounts.as_deref().unwrap_or_default(),
        c.ports.as_deref().unwrap_or_default(),
    )
}

fn containers_differ(live: &[Container], desired: &[Container]) -> bool {
    live.len() != desired.len()
        || live
            .iter()
            .zip(desired)
            .any(|(l, d)| container_fields(l) != container_fields(d))
}

/// Compare the managed parts of a pod template
fn merge_pod_template(
    live: &mut PodTemplateSpec,
    desired: &PodTemplateSpec,
    changed: &mut Vec<&'static str>,
) {
    let mut template_meta = live.metadata.take().unwrap_or_default();
    if let Some(wanted_meta) = desired.metadata.as_ref() {
        sync_labels(&mut template_meta, wanted_meta, changed);
    }
    live.metadata = Some(template_meta);

    let Some(wanted) = desired.spec.as_ref() else {
        return;
    };
    let spec = live.spec.get_or_insert_with(Default::default);

    if containers_differ(&spec.containers, &wanted.containers) {
        spec.containers = wanted.containers.clone();
        changed.push("containers");
    }
    let live_init = spec.init_containers.as_deref().unwrap_or_default();
    let wanted_init = wanted.init_containers.as_deref().unwrap_or_default();
    if containers_differ(live_init, wanted_init) {
        spec.init_containers = wanted.init_containers.clone();
        changed.push("initContainers");
    }
    sync_defaulted(&mut spec.volumes, &wanted.volumes, "volumes", changed);
    sync(
        &mut spec.service_account_name,
        &wanted.service_account_name,
        "serviceAccountName",
        changed,
    );
    sync_defaulted(
        &mut spec.node_selector,
        &wanted.node_selector,
        "nodeSelector",
        changed,
    );
    sync_defaulted(
        &mut spec.tolerations,
        &wanted.tolerations,
        "tolerations",
        changed,
    );
    sync_defaulted(
        &mut spec.security_context,
        &wanted.security_context,
        "securityContext",
        changed,
    );
}

impl Reconcilable for Deployment {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);

        let Some(wanted) = desired.spec.as_ref() else {
            return changed;
        };
        let spec = self.spec.get_or_insert_with(Default::default);
        sync(&mut spec.replicas, &wanted.replicas, "replicas", &mut changed);
        merge_pod_template(&mut spec.template, &wanted.template, &mut changed);
        changed
    }

    fn requires_recreate(&self, desired: &Self) -> bool {
        let live = self.spec.as_ref().map(|s| &s.selector);
        let wanted = desired.spec.as_ref().map(|s| &s.selector);
        live.is_some() && wanted.is_some() && live != wanted
    }
}

impl Reconcilable for StatefulSet {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);

        let Some(wanted) = desired.spec.as_ref() else {
            return changed;
        };
        let spec = self.spec.get_or_insert_with(Default::default);
        sync(&mut spec.replicas, &wanted.replicas, "replicas", &mut changed);
        merge_pod_template(&mut spec.template, &wanted.template, &mut changed);
        changed
    }

    fn requires_recreate(&self, desired: &Self) -> bool {
        let live = self.spec.as_ref().map(|s| (&s.selector, &s.service_name));
        let wanted = desired.spec.as_ref().map(|s| (&s.selector, &s.service_name));
        live.is_some() && wanted.is_some() && live != wanted
    }
}

impl Reconcilable for Ingress {
    static_kind!();

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync_annotations(&mut self.metadata, &desired.metadata, &mut changed);
        sync(&mut self.spec, &desired.spec, "spec", &mut changed);
        changed
    }
}

/// Merge `desired` into `live`. Keys only present on the live side, such as
/// a Route host assigned by the router, are kept.
fn merge_json(live: &mut serde_json::Value, desired: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (live, desired) {
        (Value::Object(live), Value::Object(desired)) => {
            let mut changed = false;
            for (key, value) in desired {
                match live.get_mut(key) {
                    Some(existing) => changed |= merge_json(existing, value),
                    None => {
                        live.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        (live, desired) => {
            if *live != *desired {
                *live = desired.clone();
                true
            } else {
                false
            }
        }
    }
}

impl Reconcilable for DynamicObject {
    fn object_kind(&self) -> String {
        self.types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_else(|| "DynamicObject".to_string())
    }

    fn merge_from(&mut self, desired: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        sync_meta(&mut self.metadata, &desired.metadata, &mut changed);
        sync_annotations(&mut self.metadata, &desired.metadata, &mut changed);
        if let Some(spec) = desired.data.get("spec") {
            if !self.data.is_object() {
                self.data = serde_json::json!({});
            }
            if merge_json(&mut self.data["spec"], spec) {
                changed.push("spec");
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{PodSecurityContext, PodSpec, ServiceSpec};
    use k8s_openapi::api::rbac::v1::RoleRef;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use k8s_openapi::ByteString;

    fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn deployment(image: &str, replicas: i32) -> Deployment {
        let selector: BTreeMap<String, String> =
            [("app.kubernetes.io/name".to_string(), "example-server".to_string())].into();
        Deployment {
            metadata: meta("example-server", &[(MANAGED_BY_LABEL, MANAGED_BY)]),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "argocd-server".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_verify_ownership() {
        let ours = ConfigMap {
            metadata: meta("argocd-cm", &[(MANAGED_BY_LABEL, MANAGED_BY)]),
            ..Default::default()
        };
        assert!(verify_ownership(&ours, "ConfigMap").is_ok());

        let unlabeled = ConfigMap {
            metadata: meta("argocd-cm", &[]),
            ..Default::default()
        };
        assert!(verify_ownership(&unlabeled, "ConfigMap").is_ok());

        let foreign = ConfigMap {
            metadata: meta("argocd-cm", &[(MANAGED_BY_LABEL, "helm")]),
            ..Default::default()
        };
        assert!(matches!(
            verify_ownership(&foreign, "ConfigMap"),
            Err(OperatorError::OwnershipConflict { .. })
        ));
    }

    #[test]
    fn test_configmap_data_change() {
        let mut live = ConfigMap {
            metadata: meta("argocd-cm", &[("extra", "kept")]),
            data: Some([("a".to_string(), "1".to_string())].into()),
            ..Default::default()
        };
        let desired = ConfigMap {
            metadata: meta("argocd-cm", &[("app.kubernetes.io/part-of", "argocd")]),
            data: Some([("a".to_string(), "2".to_string())].into()),
            ..Default::default()
        };

        let changed = live.merge_from(&desired);
        assert_eq!(changed, vec!["labels", "data"]);
        assert_eq!(live.data.as_ref().unwrap()["a"], "2");
        let labels = live.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["extra"], "kept");

        assert!(live.merge_from(&desired).is_empty());
    }

    #[test]
    fn test_secret_only_adds_missing_keys() {
        let mut live = Secret {
            metadata: meta("argocd-secret", &[]),
            data: Some([("admin.password".to_string(), ByteString(b"old".to_vec()))].into()),
            ..Default::default()
        };
        let desired = Secret {
            metadata: meta("argocd-secret", &[]),
            data: Some(
                [
                    ("admin.password".to_string(), ByteString(b"new".to_vec())),
                    ("server.secretkey".to_string(), ByteString(b"key".to_vec())),
                ]
                .into(),
            ),
            ..Default::default()
        };

        assert_eq!(live.merge_from(&desired), vec!["data"]);
        let data = live.data.unwrap();
        assert_eq!(data["admin.password"].0, b"old".to_vec());
        assert_eq!(data["server.secretkey"].0, b"key".to_vec());
    }

    #[test]
    fn test_rolebinding_role_ref_change_recreates() {
        let binding = |role: &str| RoleBinding {
            metadata: meta("example-argocd-server", &[]),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role.to_string(),
            },
            subjects: None,
        };
        assert!(!binding("a").requires_recreate(&binding("a")));
        assert!(binding("a").requires_recreate(&binding("b")));
    }

    #[test]
    fn test_service_keeps_node_ports() {
        let port = |node_port: Option<i32>| ServicePort {
            name: Some("http".to_string()),
            port: 80,
            node_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        };
        let mut live = Service {
            metadata: meta("example-server", &[]),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![port(Some(30080))]),
                cluster_ip: Some("10.0.0.1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let desired = Service {
            metadata: meta("example-server", &[]),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![port(None)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(live.merge_from(&desired).is_empty());
        assert_eq!(
            live.spec.as_ref().unwrap().cluster_ip.as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_deployment_image_and_replicas() {
        let mut live = deployment("quay.io/argoproj/argocd:v2.12.0", 1);
        let desired = deployment("quay.io/argoproj/argocd:v2.13.1", 2);

        let changed = live.merge_from(&desired);
        assert_eq!(changed, vec!["replicas", "containers"]);

        let spec = live.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.template.spec.unwrap().containers[0].image.as_deref(),
            Some("quay.io/argoproj/argocd:v2.13.1")
        );
    }

    #[test]
    fn test_deployment_ignores_server_defaults() {
        let mut live = deployment("quay.io/argoproj/argocd:v2.13.1", 1);
        let container = &mut live.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0];
        container.termination_message_path = Some("/dev/termination-log".to_string());

        let desired = deployment("quay.io/argoproj/argocd:v2.13.1", 1);
        assert!(live.merge_from(&desired).is_empty());
    }

    #[test]
    fn test_pod_template_ignores_empty_server_defaults() {
        let desired = deployment("quay.io/argoproj/argocd:v2.13.1", 1);
        let mut live = desired.clone();
        {
            let pod = live.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
            pod.security_context = Some(PodSecurityContext::default());
            pod.node_selector = Some(BTreeMap::new());
            pod.containers[0].env = Some(vec![]);
            pod.containers[0].resources = Some(ResourceRequirements::default());
        }

        assert!(live.merge_from(&desired).is_empty());
        assert!(live.merge_from(&desired).is_empty());
    }

    #[test]
    fn test_pod_security_context_change_is_applied() {
        let mut live = deployment("img", 1);
        live.spec.as_mut().unwrap().template.spec.as_mut().unwrap().security_context =
            Some(PodSecurityContext::default());
        let mut desired = deployment("img", 1);
        desired.spec.as_mut().unwrap().template.spec.as_mut().unwrap().security_context =
            Some(PodSecurityContext {
                run_as_non_root: Some(true),
                ..Default::default()
            });

        assert_eq!(live.merge_from(&desired), vec!["securityContext"]);
        assert!(live.merge_from(&desired).is_empty());
    }

    #[test]
    fn test_seeded_configmap_keeps_user_keys() {
        let mut live = ConfigMap {
            metadata: meta("argocd-gpg-keys-cm", &[(MANAGED_BY_LABEL, MANAGED_BY)]),
            data: Some([("4AEE18F83AFDEB23".to_string(), "user key".to_string())].into()),
            ..Default::default()
        };
        let desired = ConfigMap {
            metadata: meta("argocd-gpg-keys-cm", &[(MANAGED_BY_LABEL, MANAGED_BY)]),
            data: Some(BTreeMap::new()),
            ..Default::default()
        };
        assert!(merge_seeded_configmap(&mut live, &desired).is_empty());
        assert_eq!(live.data.as_ref().unwrap()["4AEE18F83AFDEB23"], "user key");

        let seeded = ConfigMap {
            metadata: meta("argocd-gpg-keys-cm", &[(MANAGED_BY_LABEL, MANAGED_BY)]),
            data: Some(
                [
                    ("4AEE18F83AFDEB23".to_string(), "seed".to_string()),
                    ("ABCDEF0123456789".to_string(), "new".to_string()),
                ]
                .into(),
            ),
            ..Default::default()
        };
        assert_eq!(merge_seeded_configmap(&mut live, &seeded), vec!["data"]);
        let data = live.data.unwrap();
        assert_eq!(data["4AEE18F83AFDEB23"], "user key");
        assert_eq!(data["ABCDEF0123456789"], "new");
    }

    #[test]
    fn test_service_type_change_drops_node_ports() {
        let port = |name: &str, number: i32, node_port: Option<i32>| ServicePort {
            name: Some(name.to_string()),
            port: number,
            node_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        };
        let mut live = Service {
            metadata: meta("example-server", &[]),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![
                    port("http", 80, Some(30080)),
                    port("https", 443, Some(30083)),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let desired = Service {
            metadata: meta("example-server", &[]),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ports: Some(vec![port("http", 80, None), port("https", 443, None)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(live.merge_from(&desired), vec!["type", "ports"]);
        let spec = live.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(spec.ports.unwrap().iter().all(|p| p.node_port.is_none()));
    }

    #[test]
    fn test_deployment_selector_change_recreates() {
        let live = deployment("img", 1);
        let mut desired = deployment("img", 1);
        desired.spec.as_mut().unwrap().selector.match_labels =
            Some([("app".to_string(), "other".to_string())].into());
        assert!(live.requires_recreate(&desired));
        assert!(!live.requires_recreate(&deployment("img", 1)));
    }

    #[test]
    fn test_dynamic_object_spec() {
        let ar = crate::capabilities::api_resource(
            "monitoring.coreos.com",
            "v1",
            "ServiceMonitor",
            "servicemonitors",
        );
        let mut live = DynamicObject::new("example-server-metrics", &ar)
            .data(serde_json::json!({"spec": {"endpoints": [{"port": "metrics"}]}}));
        let desired = DynamicObject::new("example-server-metrics", &ar)
            .data(serde_json::json!({"spec": {"endpoints": [{"port": "metrics", "interval": "30s"}]}}));

        assert_eq!(live.object_kind(), "ServiceMonitor");
        assert_eq!(live.merge_from(&desired), vec!["spec"]);
        assert!(live.merge_from(&desired).is_empty());
    }

    #[test]
    fn test_dynamic_object_keeps_server_assigned_fields() {
        let ar = crate::capabilities::api_resource("route.openshift.io", "v1", "Route", "routes");
        let mut live = DynamicObject::new("example-server", &ar).data(serde_json::json!({
            "spec": {"host": "example-server-argocd.apps.cluster", "tls": {"termination": "edge"}}
        }));
        let desired = DynamicObject::new("example-server", &ar)
            .data(serde_json::json!({"spec": {"tls": {"termination": "edge"}}}));

        assert!(live.merge_from(&desired).is_empty());
        assert_eq!(
            live.data["spec"]["host"],
            "example-server-argocd.apps.cluster"
        );
    }
}
