//! Service accounts and RBAC for the Argo CD components

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

use super::{
    ResourceBuilder, APPLICATIONSET_CONTROLLER, APPLICATION_CONTROLLER, REDIS, SERVER,
};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Components that get a namespaced ServiceAccount, Role and RoleBinding
pub const NAMESPACED_RBAC_COMPONENTS: [&str; 3] = [SERVER, APPLICATION_CONTROLLER, REDIS];

/// Components that may get cluster-wide permissions
pub const CLUSTER_RBAC_COMPONENTS: [&str; 2] = [SERVER, APPLICATION_CONTROLLER];

pub(crate) fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

const ALL_VERBS: &[&str] = &["create", "get", "list", "watch", "update", "patch", "delete"];

/// Namespaced permissions per component
pub fn role_rules(component: &str) -> Vec<PolicyRule> {
    match component {
        SERVER => vec![
            rule(&["*"], &["*"], &["get", "delete", "patch"]),
            rule(
                &["argoproj.io"],
                &["applications", "appprojects", "applicationsets"],
                ALL_VERBS,
            ),
            rule(&[""], &["secrets", "configmaps"], ALL_VERBS),
            rule(&[""], &["events"], &["create", "list"]),
        ],
        APPLICATION_CONTROLLER => vec![rule(&["*"], &["*"], &["*"])],
        APPLICATIONSET_CONTROLLER => vec![
            rule(
                &["argoproj.io"],
                &[
                    "applications",
                    "applicationsets",
                    "applicationsets/finalizers",
                    "applicationsets/status",
                    "appprojects",
                ],
                ALL_VERBS,
            ),
            rule(&[""], &["secrets", "configmaps"], &["get", "list", "watch"]),
            rule(&[""], &["events"], &["create", "get", "list", "patch", "watch"]),
            rule(&["apps", "extensions"], &["deployments"], &["get", "list", "watch"]),
            rule(&["coordination.k8s.io"], &["leases"], ALL_VERBS),
        ],
        _ => Vec::new(),
    }
}

/// Cluster-wide permissions per component
pub fn cluster_role_rules(component: &str) -> Vec<PolicyRule> {
    match component {
        SERVER => vec![
            rule(&["*"], &["*"], &["get", "delete", "patch"]),
            rule(&[""], &["events"], &["list"]),
            rule(&[""], &["pods", "pods/log"], &["get"]),
            rule(&["argoproj.io"], &["applications", "applicationsets"], ALL_VERBS),
            rule(&["batch"], &["jobs"], &["create"]),
            rule(&["argoproj.io"], &["workflows"], &["create"]),
        ],
        APPLICATION_CONTROLLER => vec![
            rule(&["*"], &["*"], &["*"]),
            PolicyRule {
                non_resource_urls: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
        ],
        _ => Vec::new(),
    }
}

impl ResourceBuilder<'_> {
    pub fn build_service_account(&self, component: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(self.service_account_name(component), component),
            ..Default::default()
        }
    }

    pub fn build_role(&self, component: &str, rules: Vec<PolicyRule>) -> Role {
        Role {
            metadata: self.metadata(self.service_account_name(component), component),
            rules: Some(rules),
        }
    }

    /// Bind the component's Role to its ServiceAccount
    pub fn build_role_binding(&self, component: &str) -> RoleBinding {
        let name = self.service_account_name(component);
        RoleBinding {
            metadata: self.metadata(name.clone(), component),
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "Role".to_string(),
                name: name.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name,
                namespace: Some(self.namespace().to_string()),
                ..Default::default()
            }]),
        }
    }

    pub fn build_cluster_role(&self, component: &str) -> ClusterRole {
        ClusterRole {
            metadata: self.cluster_metadata(self.cluster_resource_name(component), component),
            rules: Some(cluster_role_rules(component)),
            ..Default::default()
        }
    }

    pub fn build_cluster_role_binding(&self, component: &str) -> ClusterRoleBinding {
        let name = self.cluster_resource_name(component);
        ClusterRoleBinding {
            metadata: self.cluster_metadata(name.clone(), component),
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name,
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: self.service_account_name(component),
                namespace: Some(self.namespace().to_string()),
                ..Default::default()
            }]),
        }
    }

    /// Components needing namespaced RBAC for this instance
    pub fn rbac_components(&self) -> Vec<&'static str> {
        let spec = &self.argocd().spec;
        NAMESPACED_RBAC_COMPONENTS
            .into_iter()
            .filter(|c| *c != REDIS || spec.redis_enabled())
            .chain(
                spec.application_set_enabled()
                    .then_some(APPLICATIONSET_CONTROLLER),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::create_test_argocd;
    use crate::crd::ApplicationSetSpec;

    #[test]
    fn test_role_binding_wiring() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();

        let sa = builder.build_service_account(SERVER);
        let role = builder.build_role(SERVER, role_rules(SERVER));
        let binding = builder.build_role_binding(SERVER);

        assert_eq!(sa.metadata.name.as_deref(), Some("example-argocd-server"));
        assert_eq!(role.metadata.name, sa.metadata.name);
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(Some(binding.role_ref.name.as_str()), role.metadata.name.as_deref());

        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.namespace.as_deref(), Some("argocd"));
    }

    #[test]
    fn test_cluster_role_binding() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let binding = builder.build_cluster_role_binding(APPLICATION_CONTROLLER);

        assert_eq!(
            binding.metadata.name.as_deref(),
            Some("example-argocd-argocd-application-controller")
        );
        assert_eq!(binding.role_ref.kind, "ClusterRole");
        assert_eq!(
            binding.subjects.unwrap()[0].name,
            "example-argocd-application-controller"
        );
        assert!(binding.metadata.owner_references.is_none());
    }

    #[test]
    fn test_controller_cluster_rules() {
        let rules = cluster_role_rules(APPLICATION_CONTROLLER);
        assert!(rules
            .iter()
            .any(|r| r.non_resource_urls.as_deref() == Some(&["*".to_string()][..])));
        assert!(cluster_role_rules(REDIS).is_empty());
    }

    #[test]
    fn test_rbac_components() {
        let mut argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        assert_eq!(
            builder.rbac_components(),
            vec![SERVER, APPLICATION_CONTROLLER, REDIS]
        );

        argocd.spec.redis.remote = Some("redis:6379".to_string());
        argocd.spec.application_set = Some(ApplicationSetSpec::default());
        let builder = ResourceBuilder::new(&argocd).unwrap();
        assert_eq!(
            builder.rbac_components(),
            vec![SERVER, APPLICATION_CONTROLLER, APPLICATIONSET_CONTROLLER]
        );
    }
}
