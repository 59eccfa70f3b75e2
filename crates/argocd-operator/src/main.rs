//! Argo CD Kubernetes Operator
//!
//! This operator manages ArgoCD custom resources in Kubernetes, deploying
//! and keeping in shape complete Argo CD installations.

use anyhow::{Context, Result};
use argocd_operator::capabilities::ClusterCapabilities;
use argocd_operator::config::OperatorConfig;
use argocd_operator::crd::{ArgoCD, NotificationsConfiguration};
use argocd_operator::{controller, notifications_configuration_controller};
use clap::Parser;
use kube::Client;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Argo CD Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "argocd-operator")]
#[command(about = "Kubernetes operator for Argo CD installations")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Comma separated namespaces whose instances get cluster-scoped RBAC
    /// (`*` for all)
    #[arg(long, env = "ARGOCD_CLUSTER_CONFIG_NAMESPACES", default_value = "")]
    cluster_config_namespaces: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args)?;

    let namespace = if args.namespace.is_empty() {
        None
    } else {
        Some(args.namespace.clone())
    };
    let config = OperatorConfig::new(namespace.clone(), &args.cluster_config_namespaces);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = namespace.as_deref().unwrap_or("all"),
        cluster_config_namespaces = ?config.cluster_config_namespaces,
        "Starting Argo CD Kubernetes Operator"
    );

    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let capabilities = ClusterCapabilities::discover(client.clone())
        .await
        .context("Failed to discover cluster capabilities")?;

    tokio::try_join!(
        async {
            controller::run_controller(client.clone(), config, capabilities)
                .await
                .context("ArgoCD controller failed")
        },
        async {
            notifications_configuration_controller::run_notifications_configuration_controller(
                client.clone(),
                namespace,
            )
            .await
            .context("NotificationsConfiguration controller failed")
        },
    )?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Print both CRDs as a multi-document YAML stream
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let documents = [
        serde_yaml::to_string(&ArgoCD::crd())?,
        serde_yaml::to_string(&NotificationsConfiguration::crd())?,
    ];
    println!("{}", documents.join("---\n"));

    Ok(())
}
