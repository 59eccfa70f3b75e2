//! ConfigMaps read by the Argo CD components
//!
//! The names are fixed because Argo CD looks them up by name in its own
//! namespace.

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

use super::ResourceBuilder;

pub const ARGOCD_CM: &str = "argocd-cm";
pub const ARGOCD_RBAC_CM: &str = "argocd-rbac-cm";
pub const ARGOCD_KNOWN_HOSTS_CM: &str = "argocd-ssh-known-hosts-cm";
pub const ARGOCD_TLS_CERTS_CM: &str = "argocd-tls-certs-cm";
pub const ARGOCD_GPG_KEYS_CM: &str = "argocd-gpg-keys-cm";

const CONFIG_COMPONENT: &str = "config";

/// Host keys of the public Git hosting services
pub const DEFAULT_KNOWN_HOSTS: &str = "\
bitbucket.org ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIazEu89wgQZ4bqs3d63QSMzYVa0MuJ2e2gKTKqu+UUO
github.com ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBEmKSENjQEezOmxkZMy7opKgwFB9nkt5YRrYMjNuG5N87uRgg6CLrbo5wAdT/y6v0mKV0U2w0WZ2YB/++Tpockg=
github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl
gitlab.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf
";

impl ResourceBuilder<'_> {
    fn configmap(&self, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(name, CONFIG_COMPONENT),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Build argocd-cm, the main Argo CD settings
    pub fn build_argocd_cm(&self) -> ConfigMap {
        let spec = &self.argocd().spec;
        let mut data = BTreeMap::new();

        data.insert(
            "application.instanceLabelKey".to_string(),
            spec.application_instance_label_key.clone(),
        );
        data.insert("admin.enabled".to_string(), (!spec.disable_admin).to_string());
        data.insert(
            "users.anonymous.enabled".to_string(),
            spec.users_anonymous_enabled.to_string(),
        );
        data.insert(
            "statusbadge.enabled".to_string(),
            spec.status_badge_enabled.to_string(),
        );
        data.insert("url".to_string(), format!("https://{}", self.server_host()));

        let optional = [
            ("resource.exclusions", &spec.resource_exclusions),
            ("resource.inclusions", &spec.resource_inclusions),
            ("kustomize.buildOptions", &spec.kustomize_build_options),
            ("oidc.config", &spec.oidc_config),
            ("timeout.reconciliation", &spec.controller.app_sync),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                data.insert(key.to_string(), value.clone());
            }
        }

        if let Some(banner) = &spec.banner {
            data.insert("ui.bannercontent".to_string(), banner.content.clone());
            if let Some(url) = &banner.url {
                data.insert("ui.bannerurl".to_string(), url.clone());
            }
        }

        // extraConfig wins over everything above
        data.extend(spec.extra_config.clone());

        self.configmap(ARGOCD_CM, data)
    }

    /// Build argocd-rbac-cm
    pub fn build_rbac_cm(&self) -> ConfigMap {
        let rbac = &self.argocd().spec.rbac;
        let mut data = BTreeMap::new();

        data.insert(
            "policy.default".to_string(),
            rbac.default_policy.clone().unwrap_or_default(),
        );
        data.insert(
            "policy.csv".to_string(),
            rbac.policy.clone().unwrap_or_default(),
        );
        data.insert("scopes".to_string(), rbac.scopes.clone().unwrap_or_default());
        if let Some(mode) = &rbac.policy_matcher_mode {
            data.insert("policy.matchMode".to_string(), mode.clone());
        }

        self.configmap(ARGOCD_RBAC_CM, data)
    }

    /// Build argocd-ssh-known-hosts-cm
    pub fn build_ssh_known_hosts_cm(&self) -> ConfigMap {
        let hosts = &self.argocd().spec.initial_ssh_known_hosts;
        let mut known_hosts = String::new();

        if !hosts.exclude_defaults {
            known_hosts.push_str(DEFAULT_KNOWN_HOSTS);
        }
        if let Some(keys) = &hosts.keys {
            known_hosts.push_str(keys.trim_end());
            known_hosts.push('\n');
        }

        let mut data = BTreeMap::new();
        data.insert("ssh_known_hosts".to_string(), known_hosts);
        self.configmap(ARGOCD_KNOWN_HOSTS_CM, data)
    }

    /// Build argocd-tls-certs-cm
    pub fn build_tls_certs_cm(&self) -> ConfigMap {
        let certs = self.argocd().spec.tls.initial_certs.clone();
        self.configmap(ARGOCD_TLS_CERTS_CM, certs)
    }

    /// Build argocd-gpg-keys-cm; keys are added by users through the API
    pub fn build_gpg_keys_cm(&self) -> ConfigMap {
        self.configmap(ARGOCD_GPG_KEYS_CM, BTreeMap::new())
    }

    /// ConfigMaps fully rendered from the spec, in apply order
    pub fn build_configmaps(&self) -> Vec<ConfigMap> {
        vec![self.build_argocd_cm(), self.build_rbac_cm()]
    }

    /// ConfigMaps that only receive their initial entries. Argo CD writes
    /// to them afterwards (`argocd cert add-ssh`, `add-tls`, `gpg add`).
    pub fn build_seeded_configmaps(&self) -> Vec<ConfigMap> {
        vec![
            self.build_ssh_known_hosts_cm(),
            self.build_tls_certs_cm(),
            self.build_gpg_keys_cm(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BannerSpec;
    use crate::resources::test_support::create_test_argocd;

    #[test]
    fn test_default_argocd_cm() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let cm = builder.build_argocd_cm();

        assert_eq!(cm.metadata.name.as_deref(), Some("argocd-cm"));
        let data = cm.data.unwrap();
        assert_eq!(data["application.instanceLabelKey"], "app.kubernetes.io/instance");
        assert_eq!(data["admin.enabled"], "true");
        assert_eq!(data["users.anonymous.enabled"], "false");
        assert_eq!(data["url"], "https://example");
        assert!(!data.contains_key("oidc.config"));
    }

    #[test]
    fn test_argocd_cm_options() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.disable_admin = true;
        argocd.spec.oidc_config = Some("name: SSO".to_string());
        argocd.spec.controller.app_sync = Some("5m".to_string());
        argocd.spec.banner = Some(BannerSpec {
            content: "maintenance tonight".to_string(),
            url: Some("https://status.example.com".to_string()),
        });

        let builder = ResourceBuilder::new(&argocd).unwrap();
        let data = builder.build_argocd_cm().data.unwrap();

        assert_eq!(data["admin.enabled"], "false");
        assert_eq!(data["oidc.config"], "name: SSO");
        assert_eq!(data["timeout.reconciliation"], "5m");
        assert_eq!(data["ui.bannercontent"], "maintenance tonight");
        assert_eq!(data["ui.bannerurl"], "https://status.example.com");
    }

    #[test]
    fn test_extra_config_overrides() {
        let mut argocd = create_test_argocd("example");
        argocd
            .spec
            .extra_config
            .insert("admin.enabled".to_string(), "false".to_string());
        argocd
            .spec
            .extra_config
            .insert("exec.enabled".to_string(), "true".to_string());

        let builder = ResourceBuilder::new(&argocd).unwrap();
        let data = builder.build_argocd_cm().data.unwrap();
        assert_eq!(data["admin.enabled"], "false");
        assert_eq!(data["exec.enabled"], "true");
    }

    #[test]
    fn test_rbac_cm() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.rbac.default_policy = Some("role:readonly".to_string());
        argocd.spec.rbac.policy_matcher_mode = Some("regex".to_string());

        let builder = ResourceBuilder::new(&argocd).unwrap();
        let data = builder.build_rbac_cm().data.unwrap();
        assert_eq!(data["policy.default"], "role:readonly");
        assert_eq!(data["policy.csv"], "");
        assert_eq!(data["scopes"], "[groups]");
        assert_eq!(data["policy.matchMode"], "regex");
    }

    #[test]
    fn test_known_hosts() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.initial_ssh_known_hosts.keys =
            Some("git.example.com ssh-ed25519 AAAAexample".to_string());

        let builder = ResourceBuilder::new(&argocd).unwrap();
        let hosts = builder.build_ssh_known_hosts_cm().data.unwrap()["ssh_known_hosts"].clone();
        assert!(hosts.contains("github.com"));
        assert!(hosts.ends_with("git.example.com ssh-ed25519 AAAAexample\n"));

        argocd.spec.initial_ssh_known_hosts.exclude_defaults = true;
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let hosts = builder.build_ssh_known_hosts_cm().data.unwrap()["ssh_known_hosts"].clone();
        assert_eq!(hosts, "git.example.com ssh-ed25519 AAAAexample\n");
    }

    #[test]
    fn test_tls_certs_cm() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.tls.initial_certs.insert(
            "git.example.com".to_string(),
            "-----BEGIN CERTIFICATE-----".to_string(),
        );
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let cm = builder.build_tls_certs_cm();
        assert_eq!(cm.data.unwrap().len(), 1);
    }

    #[test]
    fn test_all_configmaps_owned() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let cms = builder.build_configmaps();
        let seeded = builder.build_seeded_configmaps();
        assert_eq!(cms.len(), 2);
        assert_eq!(
            seeded.iter().map(|cm| cm.metadata.name.clone().unwrap()).collect::<Vec<_>>(),
            vec![ARGOCD_KNOWN_HOSTS_CM, ARGOCD_TLS_CERTS_CM, ARGOCD_GPG_KEYS_CM]
        );
        for cm in cms.into_iter().chain(seeded) {
            assert!(cm.metadata.owner_references.is_some());
        }
    }
}
