//! Request/mutation pipeline
//!
//! Every object the operator creates goes through a [`ResourceRequest`]: the
//! builder produces the desired object from the `ArgoCD` spec, and the
//! request runs a chain of [`MutateFn`]s over it before it reaches the
//! apply layer. Mutations carry the platform specific adjustments
//! (OpenShift security context constraints, node placement) so the builders
//! stay platform agnostic.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role};
use kube::{Resource, ResourceExt};

use crate::capabilities::ClusterCapabilities;
use crate::crd::ArgoCD;
use crate::error::{OperatorError, Result};

/// A step that adjusts the desired object before it is applied
pub type MutateFn<K> = fn(&ArgoCD, &mut K, &ClusterCapabilities) -> Result<()>;

/// Node label every workload is pinned to
const OS_SELECTOR_KEY: &str = "kubernetes.io/os";

/// SCC granted to Argo CD service accounts on OpenShift
const OPENSHIFT_SCC: &str = "restricted-v2";

/// The mutation chain a kind starts with
pub trait DefaultMutations: Sized {
    fn default_mutations() -> Vec<MutateFn<Self>> {
        Vec::new()
    }
}

/// Desired object plus the mutations to run over it
pub struct ResourceRequest<K> {
    object: K,
    mutations: Vec<MutateFn<K>>,
}

impl<K> ResourceRequest<K>
where
    K: DefaultMutations + Resource,
{
    /// Start a request seeded with the kind's default mutations
    pub fn new(object: K) -> Self {
        Self {
            object,
            mutations: K::default_mutations(),
        }
    }

    /// Append a mutation; mutations run in registration order
    pub fn with_mutation(mut self, mutation: MutateFn<K>) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    /// Run the chain and return the final object, stopping at the first error
    pub fn build(self, argocd: &ArgoCD, capabilities: &ClusterCapabilities) -> Result<K> {
        let mut object = self.object;
        for mutation in &self.mutations {
            mutation(argocd, &mut object, capabilities)?;
        }
        Ok(object)
    }
}

impl DefaultMutations for Deployment {
    fn default_mutations() -> Vec<MutateFn<Self>> {
        vec![deployment_node_placement, deployment_security_context]
    }
}

impl DefaultMutations for StatefulSet {
    fn default_mutations() -> Vec<MutateFn<Self>> {
        vec![statefulset_node_placement, statefulset_security_context]
    }
}

impl DefaultMutations for Role {
    fn default_mutations() -> Vec<MutateFn<Self>> {
        vec![add_openshift_scc_rule as MutateFn<Self>]
    }
}

macro_rules! no_default_mutations {
    ($($kind:ty),* $(,)?) => {
        $(impl DefaultMutations for $kind {})*
    };
}

no_default_mutations!(
    k8s_openapi::api::core::v1::ConfigMap,
    k8s_openapi::api::core::v1::Secret,
    k8s_openapi::api::core::v1::Service,
    k8s_openapi::api::core::v1::ServiceAccount,
    k8s_openapi::api::rbac::v1::RoleBinding,
    k8s_openapi::api::rbac::v1::ClusterRole,
    k8s_openapi::api::rbac::v1::ClusterRoleBinding,
    k8s_openapi::api::networking::v1::Ingress,
    kube::api::DynamicObject,
    crate::crd::NotificationsConfiguration,
);

fn deployment_pod_spec(d: &mut Deployment) -> Option<&mut PodSpec> {
    d.spec.as_mut()?.template.spec.as_mut()
}

fn statefulset_pod_spec(s: &mut StatefulSet) -> Option<&mut PodSpec> {
    s.spec.as_mut()?.template.spec.as_mut()
}

fn pod_spec_mut<K, F>(object: &mut K, get: F) -> Result<&mut PodSpec>
where
    K: Resource<DynamicType = ()>,
    F: FnOnce(&mut K) -> Option<&mut PodSpec>,
{
    let name = object.name_any();
    get(object).ok_or_else(|| OperatorError::MutationFailed {
        kind: K::kind(&()).to_string(),
        name,
        reason: "pod template has no spec".to_string(),
    })
}

fn deployment_node_placement(
    argocd: &ArgoCD,
    deployment: &mut Deployment,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let spec = pod_spec_mut(deployment, deployment_pod_spec)?;
    apply_node_placement(argocd, spec, caps)
}

fn deployment_security_context(
    argocd: &ArgoCD,
    deployment: &mut Deployment,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let spec = pod_spec_mut(deployment, deployment_pod_spec)?;
    apply_openshift_security_context(argocd, spec, caps)
}

fn statefulset_node_placement(
    argocd: &ArgoCD,
    sts: &mut StatefulSet,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let spec = pod_spec_mut(sts, statefulset_pod_spec)?;
    apply_node_placement(argocd, spec, caps)
}

fn statefulset_security_context(
    argocd: &ArgoCD,
    sts: &mut StatefulSet,
    caps: &ClusterCapabilities,
) -> Result<()> {
    let spec = pod_spec_mut(sts, statefulset_pod_spec)?;
    apply_openshift_security_context(argocd, spec, caps)
}

/// Merge the instance node selector and tolerations into a pod spec
fn apply_node_placement(
    argocd: &ArgoCD,
    spec: &mut PodSpec,
    _caps: &ClusterCapabilities,
) -> Result<()> {
    let placement = &argocd.spec.node_placement;

    let selector = spec.node_selector.get_or_insert_with(Default::default);
    selector
        .entry(OS_SELECTOR_KEY.to_string())
        .or_insert_with(|| "linux".to_string());
    for (key, value) in &placement.node_selector {
        selector.insert(key.clone(), value.clone());
    }

    if !placement.tolerations.is_empty() {
        let tolerations = spec.tolerations.get_or_insert_with(Vec::new);
        for toleration in &placement.tolerations {
            if !tolerations.contains(toleration) {
                tolerations.push(toleration.clone());
            }
        }
    }
    Ok(())
}

/// OpenShift assigns UIDs from the namespace range; fixed ids are rejected
/// by the restricted SCC.
fn apply_openshift_security_context(
    _argocd: &ArgoCD,
    spec: &mut PodSpec,
    caps: &ClusterCapabilities,
) -> Result<()> {
    if !caps.is_openshift() {
        return Ok(());
    }

    if let Some(ctx) = spec.security_context.as_mut() {
        ctx.run_as_user = None;
        ctx.run_as_group = None;
        ctx.fs_group = None;
    }
    for container in spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten())
    {
        if let Some(ctx) = container.security_context.as_mut() {
            ctx.run_as_user = None;
            ctx.run_as_group = None;
        }
    }
    Ok(())
}

fn openshift_scc_rule() -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec!["security.openshift.io".to_string()]),
        resources: Some(vec!["securitycontextconstraints".to_string()]),
        resource_names: Some(vec![OPENSHIFT_SCC.to_string()]),
        verbs: vec!["use".to_string()],
        ..Default::default()
    }
}

fn add_openshift_scc_rule(
    _argocd: &ArgoCD,
    role: &mut Role,
    caps: &ClusterCapabilities,
) -> Result<()> {
    if !caps.is_openshift() {
        return Ok(());
    }
    let rule = openshift_scc_rule();
    let rules = role.rules.get_or_insert_with(Vec::new);
    if !rules.contains(&rule) {
        rules.push(rule);
    }
    Ok(())
}
