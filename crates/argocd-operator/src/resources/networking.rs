//! External access to the API server: OpenShift Route and Ingresses

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec as K8sIngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use std::collections::BTreeMap;

use super::{ResourceBuilder, SERVER};
use crate::crd::IngressSpec;

/// TLS secret used when an Ingress does not list its own
pub const DEFAULT_TLS_SECRET: &str = "argocd-tls";

const BACKEND_PROTOCOL: &str = "nginx.ingress.kubernetes.io/backend-protocol";

impl ResourceBuilder<'_> {
    /// Port name of the server Service the edge should forward to
    fn server_backend_port(&self) -> &'static str {
        if self.argocd().spec.server.insecure {
            "http"
        } else {
            "https"
        }
    }

    /// OpenShift Route for the server
    pub fn build_server_route(&self, ar: &ApiResource) -> DynamicObject {
        let route = &self.argocd().spec.server.route;
        let name = self.component_name(SERVER);

        let mut spec = serde_json::json!({
            "to": {
                "kind": "Service",
                "name": name,
                "weight": 100
            },
            "port": {
                "targetPort": self.server_backend_port()
            },
            "tls": {
                "termination": route.termination,
                "insecureEdgeTerminationPolicy": route.insecure_edge_termination_policy
            },
            "wildcardPolicy": "None"
        });
        // Without an explicit host the router assigns one
        if let Some(host) = &self.argocd().spec.server.host {
            spec["host"] = serde_json::Value::String(host.clone());
        }

        let mut metadata = self.metadata(name.clone(), SERVER);
        if !route.annotations.is_empty() {
            metadata.annotations = Some(route.annotations.clone());
        }

        let mut object = DynamicObject::new(&name, ar).data(serde_json::json!({ "spec": spec }));
        object.metadata = metadata;
        object
    }

    fn build_ingress(
        &self,
        name: String,
        host: String,
        config: &IngressSpec,
        mut annotations: BTreeMap<String, String>,
    ) -> Ingress {
        annotations.extend(config.annotations.clone());

        let tls = if config.tls.is_empty() {
            vec![IngressTLS {
                hosts: Some(vec![host.clone()]),
                secret_name: Some(DEFAULT_TLS_SECRET.to_string()),
            }]
        } else {
            config
                .tls
                .iter()
                .map(|t| IngressTLS {
                    hosts: Some(t.hosts.clone()),
                    secret_name: t.secret_name.clone(),
                })
                .collect()
        };

        let mut metadata = self.metadata(name, SERVER);
        metadata.annotations = Some(annotations);

        Ingress {
            metadata,
            spec: Some(K8sIngressSpec {
                ingress_class_name: config.ingress_class_name.clone(),
                rules: Some(vec![IngressRule {
                    host: Some(host),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "ImplementationSpecific".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: self.component_name(SERVER),
                                    port: Some(ServiceBackendPort {
                                        name: Some(self.server_backend_port().to_string()),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                tls: Some(tls),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ingress for the web UI and REST API
    pub fn build_server_ingress(&self) -> Ingress {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "nginx.ingress.kubernetes.io/force-ssl-redirect".to_string(),
            "true".to_string(),
        );
        annotations.insert(
            BACKEND_PROTOCOL.to_string(),
            self.server_backend_port().to_uppercase(),
        );
        self.build_ingress(
            self.component_name(SERVER),
            self.server_host(),
            &self.argocd().spec.server.ingress,
            annotations,
        )
    }

    /// Ingress for the gRPC API used by the CLI
    pub fn build_grpc_ingress(&self) -> Ingress {
        let mut annotations = BTreeMap::new();
        annotations.insert(BACKEND_PROTOCOL.to_string(), "GRPC".to_string());
        self.build_ingress(
            format!("{}-grpc", self.name()),
            self.grpc_host(),
            &self.argocd().spec.server.grpc.ingress,
            annotations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ClusterCapabilities;
    use crate::crd::IngressTlsSpec;
    use crate::resources::test_support::create_test_argocd;

    #[test]
    fn test_server_route() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.server.route.enabled = true;
        argocd.spec.server.route.termination = "reencrypt".to_string();
        let caps = ClusterCapabilities::openshift();
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let route = builder.build_server_route(caps.routes.as_ref().unwrap());

        assert_eq!(route.metadata.name.as_deref(), Some("example-server"));
        assert_eq!(
            route.types.as_ref().map(|t| t.api_version.as_str()),
            Some("route.openshift.io/v1")
        );
        let spec = &route.data["spec"];
        assert_eq!(spec["to"]["name"], "example-server");
        assert_eq!(spec["tls"]["termination"], "reencrypt");
        assert_eq!(spec["port"]["targetPort"], "https");
        assert!(spec.get("host").is_none());
    }

    #[test]
    fn test_route_with_host() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.server.host = Some("argocd.apps.example.com".to_string());
        argocd.spec.server.insecure = true;
        let caps = ClusterCapabilities::openshift();
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let route = builder.build_server_route(caps.routes.as_ref().unwrap());

        assert_eq!(route.data["spec"]["host"], "argocd.apps.example.com");
        assert_eq!(route.data["spec"]["port"]["targetPort"], "http");
    }

    #[test]
    fn test_server_ingress_defaults() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.server.host = Some("argocd.example.com".to_string());
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let ingress = builder.build_server_ingress();

        let annotations = ingress.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[BACKEND_PROTOCOL], "HTTPS");

        let spec = ingress.spec.unwrap();
        let rule = &spec.rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("argocd.example.com"));
        let tls = &spec.tls.unwrap()[0];
        assert_eq!(tls.secret_name.as_deref(), Some("argocd-tls"));
    }

    #[test]
    fn test_ingress_user_settings_win() {
        let mut argocd = create_test_argocd("example");
        let ingress = &mut argocd.spec.server.ingress;
        ingress.ingress_class_name = Some("nginx".to_string());
        ingress
            .annotations
            .insert(BACKEND_PROTOCOL.to_string(), "HTTP".to_string());
        ingress.tls.push(IngressTlsSpec {
            hosts: vec!["argocd.example.com".to_string()],
            secret_name: Some("custom-tls".to_string()),
        });
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let ingress = builder.build_server_ingress();

        assert_eq!(ingress.metadata.annotations.unwrap()[BACKEND_PROTOCOL], "HTTP");
        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        assert_eq!(
            spec.tls.unwrap()[0].secret_name.as_deref(),
            Some("custom-tls")
        );
    }

    #[test]
    fn test_grpc_ingress() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let ingress = builder.build_grpc_ingress();

        assert_eq!(ingress.metadata.name.as_deref(), Some("example-grpc"));
        assert_eq!(ingress.metadata.annotations.unwrap()[BACKEND_PROTOCOL], "GRPC");
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("example-grpc"));
    }
}
