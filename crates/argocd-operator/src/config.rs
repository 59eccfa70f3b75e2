//! Operator-wide settings shared by the controllers

/// Settings resolved from the command line
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches the whole cluster
    pub namespace: Option<String>,

    /// Namespaces whose Argo CD instances may manage cluster-scoped resources
    pub cluster_config_namespaces: Vec<String>,
}

impl OperatorConfig {
    /// Parse a comma separated namespace list as found in
    /// `ARGOCD_CLUSTER_CONFIG_NAMESPACES`
    pub fn new(namespace: Option<String>, cluster_config_namespaces: &str) -> Self {
        let cluster_config_namespaces = cluster_config_namespaces
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(String::from)
            .collect();
        Self {
            namespace,
            cluster_config_namespaces,
        }
    }

    /// True when instances in `namespace` get cluster-scoped RBAC.
    /// `*` allows every namespace.
    pub fn is_cluster_config_namespace(&self, namespace: &str) -> bool {
        self.cluster_config_namespaces
            .iter()
            .any(|ns| ns == "*" || ns == namespace)
    }
}
