//! Deployments and the application controller StatefulSet

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    HTTPGetAction, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SeccompProfile, SecurityContext, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::configmaps::{ARGOCD_GPG_KEYS_CM, ARGOCD_KNOWN_HOSTS_CM, ARGOCD_TLS_CERTS_CM};
use super::{
    ResourceBuilder, APPLICATIONSET_CONTROLLER, APPLICATIONSET_METRICS_PORT,
    APPLICATIONSET_WEBHOOK_PORT, APPLICATION_CONTROLLER, CONTROLLER_METRICS_PORT, REDIS,
    REDIS_PORT, REPO_SERVER, REPO_SERVER_METRICS_PORT, REPO_SERVER_PORT, SERVER,
    SERVER_METRICS_PORT, SERVER_PORT,
};

/// UID the upstream redis image runs as
const REDIS_UID: i64 = 999;

pub(crate) fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32, initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(30),
        ..Default::default()
    }
}

fn tcp_probe(port: i32, initial_delay_seconds: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        ..Default::default()
    }
}

/// Container security context accepted by the restricted pod security standard
pub(crate) fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ConfigMap volume; mode is set explicitly so the live object compares equal
pub(crate) fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            default_mode: Some(420),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub(crate) fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Known hosts, TLS certs and GPG keys used by anything that talks to Git
fn repository_volumes() -> (Vec<Volume>, Vec<VolumeMount>) {
    (
        vec![
            config_map_volume("ssh-known-hosts", ARGOCD_KNOWN_HOSTS_CM),
            config_map_volume("tls-certs", ARGOCD_TLS_CERTS_CM),
            config_map_volume("gpg-keys", ARGOCD_GPG_KEYS_CM),
            empty_dir_volume("gpg-keyring"),
            empty_dir_volume("tmp"),
        ],
        vec![
            mount("ssh-known-hosts", "/app/config/ssh"),
            mount("tls-certs", "/app/config/tls"),
            mount("gpg-keys", "/app/config/gpg/source"),
            mount("gpg-keyring", "/app/config/gpg/keys"),
            mount("tmp", "/tmp"),
        ],
    )
}

/// `--loglevel`/`--logformat` followed by user supplied arguments
pub(crate) fn with_logging_args(
    mut command: Vec<String>,
    log_level: &str,
    log_format: &str,
    extra: &[String],
) -> Vec<String> {
    command.extend([
        "--loglevel".to_string(),
        log_level.to_string(),
        "--logformat".to_string(),
        log_format.to_string(),
    ]);
    command.extend(extra.iter().cloned());
    command
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Per-component container settings
pub(crate) struct ContainerParams {
    pub name: &'static str,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: Vec<EnvVar>,
    pub ports: Vec<ContainerPort>,
    pub resources: Option<ResourceRequirements>,
    pub volume_mounts: Vec<VolumeMount>,
    pub liveness_probe: Option<Probe>,
    pub readiness_probe: Option<Probe>,
}

impl ResourceBuilder<'_> {
    pub(crate) fn build_container(&self, params: ContainerParams) -> Container {
        Container {
            name: params.name.to_string(),
            image: Some(params.image),
            image_pull_policy: Some(self.argocd().spec.image_pull_policy.clone()),
            command: params.command,
            args: params.args,
            env: (!params.env.is_empty()).then_some(params.env),
            ports: Some(params.ports),
            resources: params.resources,
            volume_mounts: (!params.volume_mounts.is_empty()).then_some(params.volume_mounts),
            liveness_probe: params.liveness_probe,
            readiness_probe: params.readiness_probe,
            security_context: Some(restricted_security_context()),
            ..Default::default()
        }
    }

    pub(crate) fn pod_template(&self, component: &str, spec: PodSpec) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels(component)),
                ..Default::default()
            }),
            spec: Some(spec),
        }
    }

    fn label_selector(&self, component: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some(self.selector_labels(component)),
            ..Default::default()
        }
    }

    pub(crate) fn build_deployment(
        &self,
        component: &str,
        replicas: i32,
        pod_spec: PodSpec,
    ) -> Deployment {
        Deployment {
            metadata: self.metadata(self.component_name(component), component),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: self.label_selector(component),
                template: self.pod_template(component, pod_spec),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Redis cache shared by server, repo-server and controller
    pub fn build_redis_deployment(&self) -> Deployment {
        let spec = &self.argocd().spec;
        let container = self.build_container(ContainerParams {
            name: "redis",
            image: spec.get_redis_image(),
            command: None,
            args: Some(strings(&["--save", "", "--appendonly", "no"])),
            env: vec![],
            ports: vec![container_port("redis", REDIS_PORT)],
            resources: spec.redis.resources.clone(),
            volume_mounts: vec![mount("data", "/data")],
            liveness_probe: Some(tcp_probe(REDIS_PORT, 10)),
            readiness_probe: Some(tcp_probe(REDIS_PORT, 5)),
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            service_account_name: Some(self.service_account_name(REDIS)),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(REDIS_UID),
                fs_group: Some(REDIS_UID),
                ..Default::default()
            }),
            volumes: Some(vec![empty_dir_volume("data")]),
            ..Default::default()
        };
        self.build_deployment(REDIS, 1, pod_spec)
    }

    /// Repo server: renders manifests from Git, Helm and Kustomize sources
    pub fn build_repo_server_deployment(&self) -> Deployment {
        let spec = &self.argocd().spec;
        let repo = &spec.repo;

        let command = with_logging_args(
            vec![
                "uid_entrypoint.sh".to_string(),
                "argocd-repo-server".to_string(),
                "--redis".to_string(),
                self.redis_address(),
            ],
            &repo.log_level,
            &repo.log_format,
            &repo.extra_repo_command_args,
        );

        let mut env = Vec::new();
        if let Some(timeout) = repo.exec_timeout {
            env.push(env_var("ARGOCD_EXEC_TIMEOUT", format!("{}s", timeout)));
        }
        env.extend(repo.env.clone());

        let (volumes, volume_mounts) = repository_volumes();
        let container = self.build_container(ContainerParams {
            name: "argocd-repo-server",
            image: spec.get_image(),
            command: Some(command),
            args: None,
            env,
            ports: vec![
                container_port("server", REPO_SERVER_PORT),
                container_port("metrics", REPO_SERVER_METRICS_PORT),
            ],
            resources: repo.resources.clone(),
            volume_mounts,
            liveness_probe: Some(tcp_probe(REPO_SERVER_PORT, 5)),
            readiness_probe: Some(tcp_probe(REPO_SERVER_PORT, 5)),
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            ..Default::default()
        };
        self.build_deployment(REPO_SERVER, repo.replicas, pod_spec)
    }

    /// API server and web UI
    pub fn build_server_deployment(&self) -> Deployment {
        let spec = &self.argocd().spec;
        let server = &spec.server;

        let mut base = vec![
            "argocd-server".to_string(),
            "--staticassets".to_string(),
            "/shared/app".to_string(),
            "--repo-server".to_string(),
            self.repo_server_address(),
            "--redis".to_string(),
            self.redis_address(),
        ];
        if server.insecure {
            base.push("--insecure".to_string());
        }
        let command = with_logging_args(
            base,
            &server.log_level,
            &server.log_format,
            &server.extra_command_args,
        );

        let container = self.build_container(ContainerParams {
            name: "argocd-server",
            image: spec.get_image(),
            command: Some(command),
            args: None,
            env: server.env.clone(),
            ports: vec![
                container_port("server", SERVER_PORT),
                container_port("metrics", SERVER_METRICS_PORT),
            ],
            resources: server.resources.clone(),
            volume_mounts: vec![
                mount("ssh-known-hosts", "/app/config/ssh"),
                mount("tls-certs", "/app/config/tls"),
                mount("tmp", "/tmp"),
            ],
            liveness_probe: Some(http_probe("/healthz?full=true", SERVER_PORT, 3)),
            readiness_probe: Some(http_probe("/healthz", SERVER_PORT, 3)),
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            service_account_name: Some(self.service_account_name(SERVER)),
            volumes: Some(vec![
                config_map_volume("ssh-known-hosts", ARGOCD_KNOWN_HOSTS_CM),
                config_map_volume("tls-certs", ARGOCD_TLS_CERTS_CM),
                empty_dir_volume("tmp"),
            ]),
            ..Default::default()
        };
        self.build_deployment(SERVER, server.replicas, pod_spec)
    }

    /// Application controller; one replica per shard
    pub fn build_application_controller_statefulset(&self) -> StatefulSet {
        let spec = &self.argocd().spec;
        let controller = &spec.controller;
        let replicas = spec.controller_replicas();

        let command = with_logging_args(
            vec![
                "argocd-application-controller".to_string(),
                "--operation-processors".to_string(),
                controller.processors.operation.to_string(),
                "--status-processors".to_string(),
                controller.processors.status.to_string(),
                "--kubectl-parallelism-limit".to_string(),
                controller.parallelism_limit.to_string(),
                "--redis".to_string(),
                self.redis_address(),
                "--repo-server".to_string(),
                self.repo_server_address(),
            ],
            &controller.log_level,
            &controller.log_format,
            &controller.extra_command_args,
        );

        let mut env = vec![
            env_var("HOME", "/home/argocd"),
            env_var("ARGOCD_CONTROLLER_REPLICAS", replicas.to_string()),
        ];
        env.extend(controller.env.clone());

        let container = self.build_container(ContainerParams {
            name: "argocd-application-controller",
            image: spec.get_image(),
            command: Some(command),
            args: None,
            env,
            ports: vec![container_port("metrics", CONTROLLER_METRICS_PORT)],
            resources: controller.resources.clone(),
            volume_mounts: vec![mount("argocd-home", "/home/argocd"), mount("tmp", "/tmp")],
            liveness_probe: None,
            readiness_probe: Some(http_probe("/healthz", CONTROLLER_METRICS_PORT, 5)),
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            service_account_name: Some(self.service_account_name(APPLICATION_CONTROLLER)),
            volumes: Some(vec![
                empty_dir_volume("argocd-home"),
                empty_dir_volume("tmp"),
            ]),
            ..Default::default()
        };

        StatefulSet {
            metadata: self.metadata(
                self.component_name(APPLICATION_CONTROLLER),
                APPLICATION_CONTROLLER,
            ),
            spec: Some(StatefulSetSpec {
                service_name: Some(self.component_name(APPLICATION_CONTROLLER)),
                replicas: Some(replicas),
                selector: self.label_selector(APPLICATION_CONTROLLER),
                template: self.pod_template(APPLICATION_CONTROLLER, pod_spec),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// ApplicationSet controller, when `applicationSet` is present
    pub fn build_applicationset_deployment(&self) -> Option<Deployment> {
        let spec = &self.argocd().spec;
        let appset = spec.application_set.as_ref()?;

        let command = with_logging_args(
            vec![
                "entrypoint.sh".to_string(),
                "argocd-applicationset-controller".to_string(),
                "--argocd-repo-server".to_string(),
                self.repo_server_address(),
            ],
            &appset.log_level,
            &appset.log_format,
            &appset.extra_command_args,
        );

        let (volumes, volume_mounts) = repository_volumes();
        let container = self.build_container(ContainerParams {
            name: "argocd-applicationset-controller",
            image: spec.get_image(),
            command: Some(command),
            args: None,
            env: appset.env.clone(),
            ports: vec![
                container_port("webhook", APPLICATIONSET_WEBHOOK_PORT),
                container_port("metrics", APPLICATIONSET_METRICS_PORT),
            ],
            resources: appset.resources.clone(),
            volume_mounts,
            liveness_probe: None,
            readiness_probe: None,
        });

        let pod_spec = PodSpec {
            containers: vec![container],
            service_account_name: Some(self.service_account_name(APPLICATIONSET_CONTROLLER)),
            volumes: Some(volumes),
            ..Default::default()
        };
        Some(self.build_deployment(APPLICATIONSET_CONTROLLER, 1, pod_spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ApplicationSetSpec;
    use crate::resources::test_support::create_test_argocd;

    fn container_of(deployment: &Deployment) -> Container {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0].clone()
    }

    fn has_pair(command: &[String], flag: &str, value: &str) -> bool {
        command.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_server_deployment() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.server.insecure = true;
        argocd.spec.server.replicas = 3;
        argocd.spec.server.extra_command_args = vec!["--rootpath".to_string(), "/argocd".to_string()];
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let deployment = builder.build_server_deployment();

        assert_eq!(deployment.metadata.name.as_deref(), Some("example-server"));
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap()["app.kubernetes.io/name"],
            "example-server"
        );

        let container = container_of(&deployment);
        assert_eq!(
            container.image.as_deref(),
            Some("quay.io/argoproj/argocd:v2.13.1")
        );
        let command = container.command.unwrap();
        assert!(command.contains(&"--insecure".to_string()));
        assert!(has_pair(&command, "--redis", "example-redis:6379"));
        assert!(has_pair(&command, "--repo-server", "example-repo-server:8081"));
        assert_eq!(command.last().map(String::as_str), Some("/argocd"));
    }

    #[test]
    fn test_repo_server_exec_timeout() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.repo.exec_timeout = Some(300);
        argocd.spec.repo.log_level = "debug".to_string();
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let container = container_of(&builder.build_repo_server_deployment());

        let env = container.env.unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "ARGOCD_EXEC_TIMEOUT" && e.value.as_deref() == Some("300s")));
        assert!(has_pair(&container.command.unwrap(), "--loglevel", "debug"));
        assert_eq!(container.volume_mounts.unwrap().len(), 5);
    }

    #[test]
    fn test_controller_statefulset_sharding() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.controller.sharding.enabled = true;
        argocd.spec.controller.sharding.replicas = 3;
        argocd.spec.controller.processors.operation = 25;
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let sts = builder.build_application_controller_statefulset();

        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let pod = spec.template.spec.unwrap();
        assert_eq!(
            pod.service_account_name.as_deref(),
            Some("example-argocd-application-controller")
        );
        let container = &pod.containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "ARGOCD_CONTROLLER_REPLICAS" && e.value.as_deref() == Some("3")));
        assert!(has_pair(
            container.command.as_ref().unwrap(),
            "--operation-processors",
            "25"
        ));
    }

    #[test]
    fn test_redis_deployment() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let deployment = builder.build_redis_deployment();

        let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(
            pod.security_context.as_ref().unwrap().run_as_user,
            Some(REDIS_UID)
        );
        let container = container_of(&deployment);
        assert_eq!(
            container.image.as_deref(),
            Some("docker.io/library/redis:7.0.15-alpine")
        );
        assert_eq!(container.ports.unwrap()[0].container_port, 6379);
    }

    #[test]
    fn test_applicationset_optional() {
        let mut argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        assert!(builder.build_applicationset_deployment().is_none());

        argocd.spec.application_set = Some(ApplicationSetSpec::default());
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let deployment = builder.build_applicationset_deployment().unwrap();
        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("example-applicationset-controller")
        );
        let ports = container_of(&deployment).ports.unwrap();
        assert_eq!(ports[0].container_port, 7000);
    }

    #[test]
    fn test_user_env_is_appended() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.controller.env.push(env_var("ARGOCD_RECONCILIATION_JITTER", "60"));
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let sts = builder.build_application_controller_statefulset();

        let env = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert_eq!(env.len(), 3);
        assert_eq!(env[2].name, "ARGOCD_RECONCILIATION_JITTER");
    }
}
