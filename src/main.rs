//! cluster-control entry point.
//!
//! Connects to the control server, logs every node and instance update,
//! and follows the logs of the instance ids given as arguments until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use cluster_control::config::{ControlConfig, LogFormat};
use cluster_control::domain::{InstanceDetails, LogRecord, NodeDetails};
use cluster_control::{Control, Handler, LifecycleEvent, Link, Selector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ControlConfig::from_env()?;

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    let follow: Vec<Selector> = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<Selector>())
        .collect::<Result<_, _>>()
        .context("instance ids must be non-negative integers")?;
    tracing::info!(url = %config.url, follow = follow.len(), "starting cluster-control");

    // Build the session
    let link = Arc::new(Link::new(config.connector()));
    if let Some(token) = &config.token {
        link.set_token(token.clone());
    }
    let control = Control::new(Arc::clone(&link))?;

    control.on_connection_event(Arc::new(|event: &LifecycleEvent| {
        if matches!(event, LifecycleEvent::Resume) {
            tracing::info!("session resumed, updates missed while offline are not replayed");
        }
    }));

    control
        .nodes()
        .register(
            Selector::All,
            Handler::new(|node: &NodeDetails| {
                tracing::info!(id = node.id, name = %node.name, connected = node.connected, "node update");
            }),
        )
        .await?;
    control
        .instances()
        .register(
            Selector::All,
            Handler::new(|instance: &InstanceDetails| {
                tracing::info!(id = instance.id, name = %instance.name, status = ?instance.status, "instance update");
            }),
        )
        .await?;
    for selector in follow {
        control
            .instance_logs()
            .register(
                selector,
                Handler::new(|record: &LogRecord| {
                    tracing::info!(
                        instance = ?record.instance_id,
                        level = %record.level,
                        "{}",
                        record.message
                    );
                }),
            )
            .await?;
    }

    // Connect; the managers resync on the connect event
    link.connect().await.context("connecting to control server")?;
    if let Some(account) = control.account_name() {
        tracing::info!(%account, "logged in");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    control.shutdown().await?;

    Ok(())
}
