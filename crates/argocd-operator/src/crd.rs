//! Custom Resource Definitions for the Argo CD Kubernetes Operator
//!
//! This module defines the `ArgoCD` CRD describing a complete Argo CD
//! installation, and the `NotificationsConfiguration` CRD carrying the
//! templates, triggers and services of the notifications controller.

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Argo CD release deployed when the spec does not pin one
pub const DEFAULT_ARGOCD_VERSION: &str = "v2.13.1";

/// Argo CD image repository
pub const DEFAULT_ARGOCD_IMAGE: &str = "quay.io/argoproj/argocd";

/// Redis image repository
pub const DEFAULT_REDIS_IMAGE: &str = "docker.io/library/redis";

/// Redis tag deployed when the spec does not pin one
pub const DEFAULT_REDIS_VERSION: &str = "7.0.15-alpine";

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Regex for Go-style durations as accepted by Argo CD flags (e.g. "3m", "90s")
static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(\.[0-9]+)?(ms|s|m|h))+$").unwrap());

/// Validate a container image reference
fn validate_image(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed (uses default)
    }
    if value.len() > 255 {
        return Err(ValidationError::new("image_too_long")
            .with_message("image reference exceeds 255 characters".into()));
    }
    if value.contains("..") || value.starts_with('/') || value.starts_with('-') {
        return Err(ValidationError::new("invalid_image")
            .with_message(format!("'{}' is not a valid container image", value).into()));
    }
    Ok(())
}

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 {
        return Err(
            ValidationError::new("name_too_long").with_message("name exceeds 63 characters".into())
        );
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate environment variables passed through to Argo CD containers
fn validate_env_vars(vars: &[EnvVar]) -> Result<(), ValidationError> {
    const MAX_ENV_VARS: usize = 100;
    if vars.len() > MAX_ENV_VARS {
        return Err(ValidationError::new("too_many_env_vars").with_message(
            format!("maximum {} environment variables allowed", MAX_ENV_VARS).into(),
        ));
    }
    let forbidden_names = [
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "DYLD_INSERT_LIBRARIES",
        "DYLD_LIBRARY_PATH",
    ];
    for var in vars {
        if var.name.is_empty() || var.name.len() > 256 {
            return Err(ValidationError::new("invalid_env_name")
                .with_message("environment variable name must be 1-256 characters".into()));
        }
        if var.value.is_some()
            && (forbidden_names.contains(&var.name.as_str()) || var.name.starts_with("LD_AUDIT"))
        {
            return Err(ValidationError::new("forbidden_env_var").with_message(
                format!(
                    "environment variable '{}' is not allowed for security",
                    var.name
                )
                .into(),
            ));
        }
    }
    Ok(())
}

/// Validate image pull policy
fn validate_pull_policy(policy: &str) -> Result<(), ValidationError> {
    match policy {
        "Always" | "IfNotPresent" | "Never" => Ok(()),
        _ => Err(ValidationError::new("invalid_pull_policy")
            .with_message("imagePullPolicy must be Always, IfNotPresent, or Never".into())),
    }
}

/// Validate Argo CD component log level
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")
            .with_message("logLevel must be debug, info, warn, or error".into())),
    }
}

/// Validate Argo CD component log format
fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_format")
            .with_message("logFormat must be text or json".into())),
    }
}

fn validate_service_type(service_type: &str) -> Result<(), ValidationError> {
    match service_type {
        "ClusterIP" | "NodePort" | "LoadBalancer" => Ok(()),
        _ => Err(ValidationError::new("invalid_service_type")
            .with_message("service type must be ClusterIP, NodePort, or LoadBalancer".into())),
    }
}

fn validate_route_termination(termination: &str) -> Result<(), ValidationError> {
    match termination {
        "edge" | "passthrough" | "reencrypt" => Ok(()),
        _ => Err(ValidationError::new("invalid_termination")
            .with_message("route termination must be edge, passthrough, or reencrypt".into())),
    }
}

fn validate_insecure_edge_policy(policy: &str) -> Result<(), ValidationError> {
    match policy {
        "None" | "Allow" | "Redirect" => Ok(()),
        _ => Err(ValidationError::new("invalid_insecure_edge_policy").with_message(
            "insecureEdgeTerminationPolicy must be None, Allow, or Redirect".into(),
        )),
    }
}

fn validate_policy_matcher_mode(mode: &str) -> Result<(), ValidationError> {
    match mode {
        "glob" | "regex" => Ok(()),
        _ => Err(ValidationError::new("invalid_policy_matcher_mode")
            .with_message("policyMatcherMode must be glob or regex".into())),
    }
}

fn validate_duration(duration: &str) -> Result<(), ValidationError> {
    if !DURATION_REGEX.is_match(duration) {
        return Err(ValidationError::new("invalid_duration").with_message(
            format!("'{}' is not a valid duration (e.g., 90s, 3m)", duration).into(),
        ));
    }
    Ok(())
}

/// Validate annotations map
fn validate_annotations(annotations: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if annotations.len() > 50 {
        return Err(ValidationError::new("too_many_annotations")
            .with_message("maximum 50 annotations allowed".into()));
    }
    for (key, value) in annotations {
        if key.len() > 253 {
            return Err(ValidationError::new("annotation_key_too_long")
                .with_message(format!("annotation key '{}' exceeds 253 characters", key).into()));
        }
        if value.len() > 262144 {
            return Err(ValidationError::new("annotation_value_too_long")
                .with_message(format!("annotation '{}' value exceeds 256KB", key).into()));
        }
    }
    Ok(())
}

/// Validate node selector map
fn validate_node_selector(selectors: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if selectors.len() > 20 {
        return Err(ValidationError::new("too_many_selectors")
            .with_message("maximum 20 node selectors allowed".into()));
    }
    for (key, value) in selectors {
        if key.len() > 253 || value.len() > 63 {
            return Err(ValidationError::new("selector_too_long")
                .with_message("selector key max 253 chars, value max 63 chars".into()));
        }
    }
    Ok(())
}

/// Keys of free-form config maps must be valid ConfigMap keys
fn validate_config_keys(config: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    static KEY_REGEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap());
    for key in config.keys() {
        if key.len() > 253 || !KEY_REGEX.is_match(key) {
            return Err(ValidationError::new("invalid_config_key")
                .with_message(format!("'{}' is not a valid ConfigMap key", key).into()));
        }
    }
    Ok(())
}

/// Settings that are individually valid but contradict each other
fn validate_argocd_spec(spec: &ArgoCDSpec) -> Result<(), ValidationError> {
    let server = &spec.server;
    if server.route.enabled && server.insecure && server.route.termination == "passthrough" {
        return Err(ValidationError::new("route_passthrough_insecure").with_message(
            "route termination 'passthrough' requires TLS on the server; use 'edge' with insecure".into(),
        ));
    }
    if spec.redis.remote.is_some() && (spec.redis.image.is_some() || spec.redis.version.is_some()) {
        return Err(ValidationError::new("redis_remote_with_image").with_message(
            "redis.image and redis.version cannot be set together with redis.remote".into(),
        ));
    }
    Ok(())
}

fn preserve_unknown_object(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

fn preserve_unknown_list(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}

/// Collect every message of a (possibly nested) validation failure
/// as `path: message` strings.
pub fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    fn walk(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
        for (field, kind) in errors.errors() {
            // Struct-level checks are reported under `__all__`
            let field = match field.to_string() {
                f if f == "__all__" => "spec".to_string(),
                f => f,
            };
            let path = if prefix.is_empty() {
                field
            } else {
                format!("{}.{}", prefix, field)
            };
            match kind {
                ValidationErrorsKind::Field(errs) => {
                    for e in errs {
                        let msg = e
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string());
                        out.push(format!("{}: {}", path, msg));
                    }
                }
                ValidationErrorsKind::Struct(nested) => walk(&path, nested, out),
                ValidationErrorsKind::List(items) => {
                    for (idx, nested) in items {
                        walk(&format!("{}[{}]", path, idx), nested, out);
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    walk("", errors, &mut out);
    out.sort();
    out
}

/// ArgoCD custom resource definition
///
/// Represents one Argo CD installation. The operator watches these resources
/// and reconciles the Argo CD workloads, configuration and RBAC in the
/// resource's namespace to match the specification.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "argoproj.io",
    version = "v1beta1",
    kind = "ArgoCD",
    plural = "argocds",
    shortname = "argocd",
    namespaced,
    status = "ArgoCDStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".status.server"}"#,
    printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".status.host"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_argocd_spec"))]
pub struct ArgoCDSpec {
    /// Argo CD version (image tag or `sha256:` digest)
    #[serde(default = "default_version")]
    #[validate(length(min = 1, max = 128, message = "version must be 1-128 characters"))]
    pub version: String,

    /// Argo CD container image repository (overrides the default)
    #[serde(default)]
    #[validate(custom(function = "validate_image"))]
    pub image: Option<String>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default = "default_image_pull_policy")]
    #[validate(custom(function = "validate_pull_policy"))]
    pub image_pull_policy: String,

    /// Label key Argo CD uses to track application resources
    #[serde(default = "default_instance_label_key")]
    #[validate(length(min = 1, max = 317))]
    pub application_instance_label_key: String,

    /// Disable the built-in admin user
    #[serde(default)]
    pub disable_admin: bool,

    /// Enable anonymous read-only access
    #[serde(default)]
    pub users_anonymous_enabled: bool,

    /// Enable application status badges
    #[serde(default)]
    pub status_badge_enabled: bool,

    /// `resource.exclusions` YAML for argocd-cm
    #[serde(default)]
    pub resource_exclusions: Option<String>,

    /// `resource.inclusions` YAML for argocd-cm
    #[serde(default)]
    pub resource_inclusions: Option<String>,

    /// Extra `kustomize build` options
    #[serde(default)]
    pub kustomize_build_options: Option<String>,

    /// OIDC configuration YAML
    #[serde(default)]
    pub oidc_config: Option<String>,

    /// UI banner
    #[serde(default)]
    #[validate(nested)]
    pub banner: Option<BannerSpec>,

    /// Additional argocd-cm entries; applied last and override operator keys
    #[serde(default)]
    #[validate(custom(function = "validate_config_keys"))]
    pub extra_config: BTreeMap<String, String>,

    /// SSH known hosts seeded into argocd-ssh-known-hosts-cm
    #[serde(default)]
    pub initial_ssh_known_hosts: SshKnownHostsSpec,

    /// TLS certificates seeded into argocd-tls-certs-cm
    #[serde(default)]
    #[validate(nested)]
    pub tls: TlsSpec,

    /// RBAC policy rendered into argocd-rbac-cm
    #[serde(default)]
    #[validate(nested)]
    pub rbac: RbacSpec,

    /// Node selector and tolerations applied to every workload
    #[serde(default)]
    #[validate(nested)]
    pub node_placement: NodePlacementSpec,

    /// API server configuration
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSpec,

    /// Repo server configuration
    #[serde(default)]
    #[validate(nested)]
    pub repo: RepoServerSpec,

    /// Application controller configuration
    #[serde(default)]
    #[validate(nested)]
    pub controller: ApplicationControllerSpec,

    /// Redis configuration
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisSpec,

    /// ApplicationSet controller; enabled when present
    #[serde(default)]
    #[validate(nested)]
    pub application_set: Option<ApplicationSetSpec>,

    /// Notifications controller configuration
    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationsSpec,

    /// Prometheus ServiceMonitor integration
    #[serde(default)]
    pub prometheus: PrometheusSpec,

    /// PrometheusRule with workload availability alerts
    #[serde(default)]
    pub monitoring: MonitoringSpec,
}

impl Default for ArgoCDSpec {
    fn default() -> Self {
        Self {
            version: default_version(),
            image: None,
            image_pull_policy: default_image_pull_policy(),
            application_instance_label_key: default_instance_label_key(),
            disable_admin: false,
            users_anonymous_enabled: false,
            status_badge_enabled: false,
            resource_exclusions: None,
            resource_inclusions: None,
            kustomize_build_options: None,
            oidc_config: None,
            banner: None,
            extra_config: BTreeMap::new(),
            initial_ssh_known_hosts: SshKnownHostsSpec::default(),
            tls: TlsSpec::default(),
            rbac: RbacSpec::default(),
            node_placement: NodePlacementSpec::default(),
            server: ServerSpec::default(),
            repo: RepoServerSpec::default(),
            controller: ApplicationControllerSpec::default(),
            redis: RedisSpec::default(),
            application_set: None,
            notifications: NotificationsSpec::default(),
            prometheus: PrometheusSpec::default(),
            monitoring: MonitoringSpec::default(),
        }
    }
}

/// UI banner shown by the Argo CD web UI
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BannerSpec {
    /// Banner text
    #[validate(length(min = 1, max = 1024, message = "banner content must be 1-1024 characters"))]
    pub content: String,

    /// Optional link
    #[serde(default)]
    #[validate(url)]
    pub url: Option<String>,
}

/// SSH known hosts configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshKnownHostsSpec {
    /// Do not include the well-known public Git hosts
    #[serde(default)]
    pub exclude_defaults: bool,

    /// Additional `ssh_known_hosts` lines
    #[serde(default)]
    pub keys: Option<String>,
}

/// TLS certificate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Repository server name to PEM certificate
    #[serde(default)]
    #[validate(custom(function = "validate_config_keys"))]
    pub initial_certs: BTreeMap<String, String>,
}

/// RBAC configuration for argocd-rbac-cm
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RbacSpec {
    /// Default role for authenticated users (e.g. `role:readonly`)
    #[serde(default)]
    pub default_policy: Option<String>,

    /// Casbin CSV policy
    #[serde(default)]
    pub policy: Option<String>,

    /// OIDC scopes examined for RBAC group membership
    #[serde(default = "default_rbac_scopes")]
    pub scopes: Option<String>,

    /// Policy matcher (glob or regex)
    #[serde(default)]
    #[validate(custom(function = "validate_policy_matcher_mode"))]
    pub policy_matcher_mode: Option<String>,
}

impl Default for RbacSpec {
    fn default() -> Self {
        Self {
            default_policy: None,
            policy: None,
            scopes: default_rbac_scopes(),
            policy_matcher_mode: None,
        }
    }
}

/// Node placement applied to every managed workload
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacementSpec {
    /// Node selector for pod scheduling (max 20 selectors)
    #[serde(default)]
    #[validate(custom(function = "validate_node_selector"))]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations for pod scheduling
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub tolerations: Vec<Toleration>,
}

/// Argo CD API server configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Number of server replicas (0-50)
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 50, message = "replicas must be between 0 and 50"))]
    pub replicas: i32,

    /// Serve plain HTTP and leave TLS to the ingress
    #[serde(default)]
    pub insecure: bool,

    /// External hostname used for Route/Ingress (defaults to the instance name)
    #[serde(default)]
    #[validate(length(max = 253))]
    pub host: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Environment variables
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Vec<EnvVar>,

    /// Additional command line arguments
    #[serde(default)]
    #[validate(length(max = 50))]
    pub extra_command_args: Vec<String>,

    /// Service exposure
    #[serde(default)]
    #[validate(nested)]
    pub service: ServerServiceSpec,

    /// OpenShift Route
    #[serde(default)]
    #[validate(nested)]
    pub route: RouteSpec,

    /// Ingress for the web UI and REST API
    #[serde(default)]
    #[validate(nested)]
    pub ingress: IngressSpec,

    /// gRPC endpoint exposure
    #[serde(default)]
    #[validate(nested)]
    pub grpc: GrpcSpec,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            replicas: 1,
            insecure: false,
            host: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
            resources: None,
            env: vec![],
            extra_command_args: vec![],
            service: ServerServiceSpec::default(),
            route: RouteSpec::default(),
            ingress: IngressSpec::default(),
            grpc: GrpcSpec::default(),
        }
    }
}

/// Server Service configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ServerServiceSpec {
    /// Service type
    #[serde(rename = "type", default = "default_service_type")]
    #[validate(custom(function = "validate_service_type"))]
    pub service_type: String,
}

impl Default for ServerServiceSpec {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
        }
    }
}

/// OpenShift Route configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Create the Route (ignored when the cluster has no Route API)
    #[serde(default)]
    pub enabled: bool,

    /// TLS termination (edge, passthrough, reencrypt)
    #[serde(default = "default_route_termination")]
    #[validate(custom(function = "validate_route_termination"))]
    pub termination: String,

    /// Handling of plain HTTP requests (None, Allow, Redirect)
    #[serde(default = "default_insecure_edge_policy")]
    #[validate(custom(function = "validate_insecure_edge_policy"))]
    pub insecure_edge_termination_policy: String,

    /// Additional annotations
    #[serde(default)]
    #[validate(custom(function = "validate_annotations"))]
    pub annotations: BTreeMap<String, String>,
}

impl Default for RouteSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            termination: default_route_termination(),
            insecure_edge_termination_policy: default_insecure_edge_policy(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Ingress configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Create the Ingress
    #[serde(default)]
    pub enabled: bool,

    /// IngressClass to use
    #[serde(default)]
    #[validate(custom(function = "validate_k8s_name"))]
    pub ingress_class_name: Option<String>,

    /// Additional annotations (merged over operator defaults)
    #[serde(default)]
    #[validate(custom(function = "validate_annotations"))]
    pub annotations: BTreeMap<String, String>,

    /// TLS configuration; defaults to the host with secret `argocd-tls`
    #[serde(default)]
    #[validate(nested)]
    pub tls: Vec<IngressTlsSpec>,
}

/// Ingress TLS entry
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsSpec {
    /// Hosts covered by the certificate
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Secret holding the certificate
    #[serde(default)]
    #[validate(custom(function = "validate_k8s_name"))]
    pub secret_name: Option<String>,
}

/// gRPC exposure
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSpec {
    /// Hostname for the gRPC Ingress (defaults to `<instance>-grpc`)
    #[serde(default)]
    #[validate(length(max = 253))]
    pub host: Option<String>,

    /// Ingress for the gRPC endpoint
    #[serde(default)]
    #[validate(nested)]
    pub ingress: IngressSpec,
}

/// Repo server configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RepoServerSpec {
    /// Number of repo server replicas (0-50)
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 50, message = "replicas must be between 0 and 50"))]
    pub replicas: i32,

    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Environment variables
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Vec<EnvVar>,

    /// Timeout in seconds for tool execution (helm, kustomize, git)
    #[serde(default)]
    #[validate(range(min = 1, max = 3600, message = "execTimeout must be 1-3600 seconds"))]
    pub exec_timeout: Option<i32>,

    /// Additional command line arguments
    #[serde(default)]
    #[validate(length(max = 50))]
    pub extra_repo_command_args: Vec<String>,
}

impl Default for RepoServerSpec {
    fn default() -> Self {
        Self {
            replicas: 1,
            log_level: default_log_level(),
            log_format: default_log_format(),
            resources: None,
            env: vec![],
            exec_timeout: None,
            extra_repo_command_args: vec![],
        }
    }
}

/// Application controller configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationControllerSpec {
    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Environment variables
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Vec<EnvVar>,

    /// Reconciliation worker pools
    #[serde(default)]
    #[validate(nested)]
    pub processors: ProcessorsSpec,

    /// Maximum concurrent `kubectl` invocations (1-100)
    #[serde(default = "default_parallelism_limit")]
    #[validate(range(min = 1, max = 100, message = "parallelismLimit must be 1-100"))]
    pub parallelism_limit: i32,

    /// Application resync period written to `timeout.reconciliation` (e.g. "3m")
    #[serde(default)]
    #[validate(custom(function = "validate_duration"))]
    pub app_sync: Option<String>,

    /// Controller sharding
    #[serde(default)]
    #[validate(nested)]
    pub sharding: ShardingSpec,

    /// Additional command line arguments
    #[serde(default)]
    #[validate(length(max = 50))]
    pub extra_command_args: Vec<String>,
}

impl Default for ApplicationControllerSpec {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            resources: None,
            env: vec![],
            processors: ProcessorsSpec::default(),
            parallelism_limit: default_parallelism_limit(),
            app_sync: None,
            sharding: ShardingSpec::default(),
            extra_command_args: vec![],
        }
    }
}

/// Application controller worker pools
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorsSpec {
    /// Operation processors (1-500)
    #[serde(default = "default_operation_processors")]
    #[validate(range(min = 1, max = 500, message = "operation processors must be 1-500"))]
    pub operation: i32,

    /// Status processors (1-500)
    #[serde(default = "default_status_processors")]
    #[validate(range(min = 1, max = 500, message = "status processors must be 1-500"))]
    pub status: i32,
}

impl Default for ProcessorsSpec {
    fn default() -> Self {
        Self {
            operation: default_operation_processors(),
            status: default_status_processors(),
        }
    }
}

/// Application controller sharding
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShardingSpec {
    /// Run one controller shard per replica
    #[serde(default)]
    pub enabled: bool,

    /// Number of shards (1-50)
    #[serde(default = "default_one")]
    #[validate(range(min = 1, max = 50, message = "shard replicas must be between 1 and 50"))]
    pub replicas: i32,
}

impl Default for ShardingSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            replicas: 1,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Redis image repository
    #[serde(default)]
    #[validate(custom(function = "validate_image"))]
    pub image: Option<String>,

    /// Redis image tag
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub version: Option<String>,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Use an externally managed redis (`host:port`) instead of deploying one
    #[serde(default)]
    #[validate(length(min = 1, max = 512))]
    pub remote: Option<String>,
}

/// ApplicationSet controller configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSetSpec {
    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Environment variables
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Vec<EnvVar>,

    /// Additional command line arguments
    #[serde(default)]
    #[validate(length(max = 50))]
    pub extra_command_args: Vec<String>,
}

impl Default for ApplicationSetSpec {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            resources: None,
            env: vec![],
            extra_command_args: vec![],
        }
    }
}

/// Notifications controller configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsSpec {
    /// Deploy the notifications controller
    #[serde(default)]
    pub enabled: bool,

    /// Number of replicas (0-1; the controller is not horizontally scalable)
    #[serde(default = "default_one")]
    #[validate(range(min = 0, max = 1, message = "notifications replicas must be 0 or 1"))]
    pub replicas: i32,

    /// Image repository (defaults to the Argo CD image)
    #[serde(default)]
    #[validate(custom(function = "validate_image"))]
    pub image: Option<String>,

    /// Image tag (defaults to the Argo CD version)
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub version: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,

    /// Environment variables
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    #[validate(custom(function = "validate_env_vars"))]
    pub env: Vec<EnvVar>,
}

impl Default for NotificationsSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            replicas: 1,
            image: None,
            version: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
            resources: None,
            env: vec![],
        }
    }
}

/// Prometheus Operator integration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Create ServiceMonitors for every metrics Service
    #[serde(default)]
    pub enabled: bool,
}

/// Workload availability alerting
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Create the component status PrometheusRule
    #[serde(default)]
    pub enabled: bool,
}

/// Status of an ArgoCD resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDStatus {
    /// Overall phase
    pub phase: ArgoCDPhase,

    /// Application controller status
    #[serde(default)]
    pub application_controller: ComponentStatus,

    /// ApplicationSet controller status
    #[serde(default)]
    pub application_set_controller: ComponentStatus,

    /// Notifications controller status
    #[serde(default)]
    pub notifications_controller: ComponentStatus,

    /// Redis status
    #[serde(default)]
    pub redis: ComponentStatus,

    /// Repo server status
    #[serde(default)]
    pub repo: ComponentStatus,

    /// API server status
    #[serde(default)]
    pub server: ComponentStatus,

    /// External host of the API server (Route or Ingress)
    pub host: Option<String>,

    /// Conditions describing the installation
    #[serde(default)]
    pub conditions: Vec<ArgoCDCondition>,

    /// Last observed generation
    pub observed_generation: i64,

    /// Last time the status was updated
    pub last_updated: Option<String>,

    /// Error message if any
    pub message: Option<String>,
}

/// Overall phase of an Argo CD installation
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ArgoCDPhase {
    /// Components are being rolled out
    #[default]
    Pending,
    /// Every enabled component is running
    Available,
    /// At least one component failed
    Failed,
    /// State could not be determined
    Unknown,
}

/// State of one Argo CD workload
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Workload missing or disabled
    #[default]
    Unknown,
    /// All desired replicas are ready
    Running,
    /// Rollout in progress
    Pending,
    /// Rollout failed
    Failed,
}

/// Condition describing an aspect of the installation
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, Unknown)
    pub status: String,

    /// Reason for the condition
    pub reason: Option<String>,

    /// Human-readable message
    pub message: Option<String>,

    /// Last transition time
    pub last_transition_time: Option<String>,
}

// Default value functions
fn default_version() -> String {
    DEFAULT_ARGOCD_VERSION.to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_instance_label_key() -> String {
    "app.kubernetes.io/instance".to_string()
}

fn default_rbac_scopes() -> Option<String> {
    Some("[groups]".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

fn default_route_termination() -> String {
    "passthrough".to_string()
}

fn default_insecure_edge_policy() -> String {
    "Redirect".to_string()
}

fn default_parallelism_limit() -> i32 {
    10
}

fn default_operation_processors() -> i32 {
    10
}

fn default_status_processors() -> i32 {
    20
}

fn default_one() -> i32 {
    1
}

/// Join repository and tag, using `@` for digests
fn image_reference(repository: &str, tag: &str) -> String {
    if tag.starts_with("sha256:") {
        format!("{}@{}", repository, tag)
    } else {
        format!("{}:{}", repository, tag)
    }
}

impl ArgoCDSpec {
    /// Full Argo CD image shared by the Argo CD components
    pub fn get_image(&self) -> String {
        let repository = self.image.as_deref().unwrap_or(DEFAULT_ARGOCD_IMAGE);
        image_reference(repository, &self.version)
    }

    /// Full redis image
    pub fn get_redis_image(&self) -> String {
        let repository = self.redis.image.as_deref().unwrap_or(DEFAULT_REDIS_IMAGE);
        let tag = self.redis.version.as_deref().unwrap_or(DEFAULT_REDIS_VERSION);
        image_reference(repository, tag)
    }

    /// Full notifications controller image
    pub fn get_notifications_image(&self) -> String {
        let repository = self
            .notifications
            .image
            .as_deref()
            .or(self.image.as_deref())
            .unwrap_or(DEFAULT_ARGOCD_IMAGE);
        let tag = self
            .notifications
            .version
            .as_deref()
            .unwrap_or(&self.version);
        image_reference(repository, tag)
    }

    /// True unless an external redis is configured
    pub fn redis_enabled(&self) -> bool {
        self.redis.remote.is_none()
    }

    /// True when the ApplicationSet controller should run
    pub fn application_set_enabled(&self) -> bool {
        self.application_set.is_some()
    }

    /// Number of application controller replicas
    pub fn controller_replicas(&self) -> i32 {
        if self.controller.sharding.enabled {
            self.controller.sharding.replicas
        } else {
            1
        }
    }

    /// Get labels for managed resources of one component
    pub fn get_labels(&self, instance: &str, component: &str) -> BTreeMap<String, String> {
        let mut labels = self.get_selector_labels(instance, component);
        labels.insert("app.kubernetes.io/part-of".to_string(), "argocd".to_string());
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            component.to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "argocd-operator".to_string(),
        );
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            instance.to_string(),
        );
        // Digests are not valid label values
        if !self.version.contains(':') && self.version.len() <= 63 {
            labels.insert(
                "app.kubernetes.io/version".to_string(),
                self.version.clone(),
            );
        }
        labels
    }

    /// Get selector labels for one component; immutable once deployed
    pub fn get_selector_labels(&self, instance: &str, component: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/name".to_string(),
            format!("{}-{}", instance, component),
        );
        labels
    }
}

// ============================================================================
// NotificationsConfiguration CRD
// ============================================================================

/// NotificationsConfiguration custom resource
///
/// Holds the templates, triggers, services and subscriptions consumed by the
/// Argo CD notifications controller. The operator renders it into the
/// `argocd-notifications-cm` ConfigMap of the same namespace.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "NotificationsConfiguration",
    plural = "notificationsconfigurations",
    namespaced,
    status = "NotificationsConfigurationStatus",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfigurationSpec {
    /// Message templates keyed by template name
    #[serde(default)]
    #[validate(custom(function = "validate_config_keys"))]
    pub templates: BTreeMap<String, String>,

    /// Triggers keyed by trigger name
    #[serde(default)]
    #[validate(custom(function = "validate_config_keys"))]
    pub triggers: BTreeMap<String, String>,

    /// Notification services keyed by service name
    #[serde(default)]
    #[validate(custom(function = "validate_config_keys"))]
    pub services: BTreeMap<String, String>,

    /// Values exposed to templates as `.context`
    #[serde(default)]
    pub context: BTreeMap<String, String>,

    /// Default subscriptions YAML
    #[serde(default)]
    pub subscriptions: Option<String>,
}

/// Status of a NotificationsConfiguration resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfigurationStatus {
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<ArgoCDCondition>,

    /// Last observed generation
    pub observed_generation: i64,

    /// Last time the status was updated
    pub last_updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_default_spec() {
        let spec = ArgoCDSpec::default();

        assert_eq!(spec.version, DEFAULT_ARGOCD_VERSION);
        assert_eq!(spec.get_image(), "quay.io/argoproj/argocd:v2.13.1");
        assert_eq!(spec.get_redis_image(), "docker.io/library/redis:7.0.15-alpine");
        assert!(spec.redis_enabled());
        assert!(!spec.application_set_enabled());
        assert_eq!(spec.controller_replicas(), 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_spec() {
        let spec: ArgoCDSpec = serde_json::from_value(serde_json::json!({})).unwrap();

        assert_eq!(spec.server.replicas, 1);
        assert_eq!(spec.server.service.service_type, "ClusterIP");
        assert_eq!(spec.server.route.termination, "passthrough");
        assert_eq!(spec.controller.processors.operation, 10);
        assert_eq!(spec.controller.processors.status, 20);
        assert_eq!(spec.rbac.scopes.as_deref(), Some("[groups]"));
        assert!(!spec.notifications.enabled);
    }

    #[test]
    fn test_digest_image() {
        let spec = ArgoCDSpec {
            version: "sha256:abcdef".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.get_image(), "quay.io/argoproj/argocd@sha256:abcdef");

        let labels = spec.get_labels("example", "server");
        assert!(!labels.contains_key("app.kubernetes.io/version"));
    }

    #[test]
    fn test_notifications_image_falls_back_to_argocd() {
        let mut spec = ArgoCDSpec {
            image: Some("registry.example.com/argocd".to_string()),
            ..Default::default()
        };
        assert_eq!(
            spec.get_notifications_image(),
            "registry.example.com/argocd:v2.13.1"
        );

        spec.notifications.version = Some("v2.12.0".to_string());
        assert_eq!(
            spec.get_notifications_image(),
            "registry.example.com/argocd:v2.12.0"
        );
    }

    #[test]
    fn test_get_labels() {
        let spec = ArgoCDSpec::default();
        let labels = spec.get_labels("example", "repo-server");

        assert_eq!(
            labels.get("app.kubernetes.io/name"),
            Some(&"example-repo-server".to_string())
        );
        assert_eq!(
            labels.get("app.kubernetes.io/part-of"),
            Some(&"argocd".to_string())
        );
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"argocd-operator".to_string())
        );

        let selector = spec.get_selector_labels("example", "repo-server");
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn test_sharding_replicas() {
        let mut spec = ArgoCDSpec::default();
        spec.controller.sharding.replicas = 3;
        assert_eq!(spec.controller_replicas(), 1);

        spec.controller.sharding.enabled = true;
        assert_eq!(spec.controller_replicas(), 3);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut spec = ArgoCDSpec::default();
        spec.server.log_level = "verbose".to_string();

        let errors = spec.validate().unwrap_err();
        let messages = validation_messages(&errors);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("server.log_level"));
    }

    #[test]
    fn test_invalid_nested_fields_are_all_reported() {
        let mut spec = ArgoCDSpec::default();
        spec.server.service.service_type = "Headless".to_string();
        spec.repo.replicas = 100;
        spec.controller.app_sync = Some("3 minutes".to_string());

        let messages = validation_messages(&spec.validate().unwrap_err());
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.starts_with("server.service")));
        assert!(messages.iter().any(|m| m.starts_with("repo.replicas")));
        assert!(messages.iter().any(|m| m.starts_with("controller.app_sync")));
    }

    #[test]
    fn test_forbidden_env_var() {
        let mut spec = ArgoCDSpec::default();
        spec.repo.env.push(EnvVar {
            name: "LD_PRELOAD".to_string(),
            value: Some("/tmp/evil.so".to_string()),
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_duration_validation() {
        assert!(validate_duration("3m").is_ok());
        assert!(validate_duration("1h30m").is_ok());
        assert!(validate_duration("90").is_err());
    }

    #[test]
    fn test_passthrough_route_requires_tls() {
        let mut spec = ArgoCDSpec::default();
        spec.server.route.enabled = true;
        spec.server.route.termination = "passthrough".to_string();
        assert!(spec.validate().is_ok());

        spec.server.insecure = true;
        let errors = spec.validate().unwrap_err();
        let messages = validation_messages(&errors);
        assert!(messages.iter().any(|m| m.starts_with("spec: ") && m.contains("passthrough")));
    }

    #[test]
    fn test_remote_redis_rejects_image_override() {
        let mut spec = ArgoCDSpec::default();
        spec.redis.remote = Some("redis.example.com:6379".to_string());
        assert!(spec.validate().is_ok());

        spec.redis.version = Some("7.0.15".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_invalid_config_key() {
        let mut spec = ArgoCDSpec::default();
        spec.extra_config
            .insert("bad key".to_string(), "value".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_crd_generation() {
        let crd = ArgoCD::crd();
        assert_eq!(crd.spec.group, "argoproj.io");
        assert_eq!(crd.spec.names.kind, "ArgoCD");
        assert_eq!(crd.spec.versions[0].name, "v1beta1");

        let crd = NotificationsConfiguration::crd();
        assert_eq!(crd.spec.names.plural, "notificationsconfigurations");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }
}
