//! Services exposing the Argo CD components

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    ResourceBuilder, APPLICATIONSET_CONTROLLER, APPLICATIONSET_METRICS_PORT,
    APPLICATIONSET_WEBHOOK_PORT, APPLICATION_CONTROLLER, CONTROLLER_METRICS_PORT, REDIS,
    REDIS_PORT, REPO_SERVER, REPO_SERVER_METRICS_PORT, REPO_SERVER_PORT, SERVER,
    SERVER_METRICS_PORT, SERVER_PORT,
};

/// TCP port forwarding `port` to the container's `target`
pub(crate) fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

impl ResourceBuilder<'_> {
    /// Service selecting the pods of `component`
    pub(crate) fn build_service(
        &self,
        name: String,
        component: &str,
        service_type: &str,
        ports: Vec<ServicePort>,
    ) -> Service {
        Service {
            metadata: self.metadata(name, component),
            spec: Some(ServiceSpec {
                type_: Some(service_type.to_string()),
                selector: Some(self.selector_labels(component)),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// API server Service (http and https both terminate on the server port)
    pub fn build_server_service(&self) -> Service {
        let service_type = &self.argocd().spec.server.service.service_type;
        self.build_service(
            self.component_name(SERVER),
            SERVER,
            service_type,
            vec![
                service_port("http", 80, SERVER_PORT),
                service_port("https", 443, SERVER_PORT),
            ],
        )
    }

    pub fn build_server_metrics_service(&self) -> Service {
        self.build_service(
            format!("{}-metrics", self.component_name(SERVER)),
            SERVER,
            "ClusterIP",
            vec![service_port("metrics", SERVER_METRICS_PORT, SERVER_METRICS_PORT)],
        )
    }

    pub fn build_repo_server_service(&self) -> Service {
        self.build_service(
            self.component_name(REPO_SERVER),
            REPO_SERVER,
            "ClusterIP",
            vec![
                service_port("server", REPO_SERVER_PORT, REPO_SERVER_PORT),
                service_port("metrics", REPO_SERVER_METRICS_PORT, REPO_SERVER_METRICS_PORT),
            ],
        )
    }

    pub fn build_controller_metrics_service(&self) -> Service {
        self.build_service(
            format!("{}-metrics", self.component_name(APPLICATION_CONTROLLER)),
            APPLICATION_CONTROLLER,
            "ClusterIP",
            vec![service_port(
                "metrics",
                CONTROLLER_METRICS_PORT,
                CONTROLLER_METRICS_PORT,
            )],
        )
    }

    pub fn build_redis_service(&self) -> Service {
        self.build_service(
            self.component_name(REDIS),
            REDIS,
            "ClusterIP",
            vec![service_port("tcp-redis", REDIS_PORT, REDIS_PORT)],
        )
    }

    pub fn build_applicationset_service(&self) -> Service {
        self.build_service(
            self.component_name(APPLICATIONSET_CONTROLLER),
            APPLICATIONSET_CONTROLLER,
            "ClusterIP",
            vec![
                service_port(
                    "webhook",
                    APPLICATIONSET_WEBHOOK_PORT,
                    APPLICATIONSET_WEBHOOK_PORT,
                ),
                service_port(
                    "metrics",
                    APPLICATIONSET_METRICS_PORT,
                    APPLICATIONSET_METRICS_PORT,
                ),
            ],
        )
    }

    /// Services of the always-on components
    pub fn build_services(&self) -> Vec<Service> {
        vec![
            self.build_server_service(),
            self.build_server_metrics_service(),
            self.build_repo_server_service(),
            self.build_controller_metrics_service(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::create_test_argocd;

    #[test]
    fn test_server_service() {
        let mut argocd = create_test_argocd("example");
        argocd.spec.server.service.service_type = "LoadBalancer".to_string();
        let builder = ResourceBuilder::new(&argocd).unwrap();
        let svc = builder.build_server_service();

        assert_eq!(svc.metadata.name.as_deref(), Some("example-server"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[1].port, 443);
        assert_eq!(ports[1].target_port, Some(IntOrString::Int(8080)));

        let selector = spec.selector.unwrap();
        assert_eq!(selector["app.kubernetes.io/name"], "example-server");
    }

    #[test]
    fn test_metrics_services() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();

        let svc = builder.build_controller_metrics_service();
        assert_eq!(
            svc.metadata.name.as_deref(),
            Some("example-application-controller-metrics")
        );
        assert_eq!(svc.spec.unwrap().ports.unwrap()[0].port, 8082);

        let svc = builder.build_repo_server_service();
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(
            ports.iter().map(|p| p.port).collect::<Vec<_>>(),
            vec![8081, 8084]
        );
    }

    #[test]
    fn test_redis_and_applicationset_services() {
        let argocd = create_test_argocd("example");
        let builder = ResourceBuilder::new(&argocd).unwrap();

        let redis = builder.build_redis_service();
        assert_eq!(redis.spec.unwrap().ports.unwrap()[0].port, 6379);

        let appset = builder.build_applicationset_service();
        let ports = appset.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 7000);
        assert_eq!(ports[1].port, 8080);
    }
}
