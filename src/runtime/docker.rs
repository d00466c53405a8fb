use super::ContainerRuntime;
use crate::error::{HostsdError, Result};
use crate::mapping::ContainerNetworkRecord;
use crate::types::ChangeEvent;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Container/network state sourced from the local Docker daemon.
pub struct DockerRuntime {
    retry_interval: Duration,
}

impl DockerRuntime {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    fn connect() -> Result<Docker> {
        // Connects to the local Docker daemon using default settings.
        // This handles unix socket on Linux.
        Docker::connect_with_local_defaults().map_err(|e| HostsdError::Runtime(e.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn snapshot(&self) -> Result<Vec<ContainerNetworkRecord>> {
        let docker = Self::connect()?;
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| HostsdError::Runtime(e.to_string()))?;

        let mut records = Vec::new();
        for c in containers {
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string());
            let id = c.id.as_ref().map(|s| s.to_string());
            let name = match (name, id) {
                (Some(n), _) => n,
                (_, Some(id)) => id,
                _ => continue,
            };

            match docker.inspect_container(&name, None).await {
                Ok(detail) => records.extend(extract_records(&detail)),
                Err(e) => warn!("failed to inspect container {}: {}", name, e),
            }
        }
        Ok(records)
    }

    async fn subscribe(&self, tx: mpsc::Sender<ChangeEvent>) -> Result<()> {
        loop {
            let docker = match Self::connect() {
                Ok(d) => d,
                Err(e) => {
                    error!(
                        "failed to connect to Docker: {}. Retrying in {:?}...",
                        e, self.retry_interval
                    );
                    sleep(self.retry_interval).await;
                    continue;
                }
            };

            // Events arriving before this connect (or while it was
            // down) are unrecoverable from the stream alone; tell the
            // driver to take a fresh snapshot. A redundant snapshot
            // reconciles to `Unchanged`, so this is sent on every
            // connect, not just reconnects.
            if tx.send(ChangeEvent::Resync).await.is_err() {
                return Ok(());
            }

            let opts = EventsOptions::<String> {
                filters: [
                    ("type", ["container", "network"].as_slice()),
                    (
                        "event",
                        [
                            "start",
                            "stop",
                            "die",
                            "destroy",
                            "kill",
                            "rename",
                            "connect",
                            "disconnect",
                        ]
                        .as_slice(),
                    ),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
                ..Default::default()
            };

            let mut stream = docker.events(Some(opts));
            info!("Listening for Docker events...");

            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(event) => {
                        if let Some(change) = classify(event) {
                            debug!("change notification: {:?}", change);
                            if tx.send(change).await.is_err() {
                                // Receiver dropped: cancelled.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => {
                        error!("error in Docker event stream: {}", e);
                        break;
                    }
                }
            }

            warn!(
                "Docker event stream ended. Reconnecting in {:?}...",
                self.retry_interval
            );
            sleep(self.retry_interval).await;
        }
    }
}

/// Maps a raw daemon event onto a change notification.
fn classify(event: EventMessage) -> Option<ChangeEvent> {
    let action = event.action.unwrap_or_default();
    let attributes = event.actor.and_then(|a| a.attributes).unwrap_or_default();

    match event.typ {
        Some(EventMessageTypeEnum::CONTAINER) => {
            let name = attributes.get("name").cloned()?;
            match action.as_str() {
                "start" => Some(ChangeEvent::ContainerStarted { name }),
                "stop" | "die" | "destroy" | "kill" => {
                    Some(ChangeEvent::ContainerStopped { name })
                }
                "rename" => Some(ChangeEvent::ContainerRenamed { name }),
                _ => None,
            }
        }
        Some(EventMessageTypeEnum::NETWORK) => {
            let network = attributes.get("name").cloned()?;
            match action.as_str() {
                "connect" | "disconnect" => Some(ChangeEvent::NetworkChanged { network }),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Flattens an inspect response into per-network records.
///
/// Each attached network contributes its aliases and addresses; the
/// container's configured hostname (qualified with its domainname when
/// set) rides along as an extra alias, and the legacy default-bridge
/// address is kept as its own record when present.
fn extract_records(detail: &ContainerInspectResponse) -> Vec<ContainerNetworkRecord> {
    let container_name = detail
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    if container_name.is_empty() {
        return Vec::new();
    }

    let hostname_alias = detail.config.as_ref().and_then(|c| {
        let hostname = c.hostname.clone().filter(|h| !h.is_empty())?;
        Some(match c.domainname.as_deref() {
            Some(d) if !d.is_empty() => format!("{}.{}", hostname, d),
            _ => hostname,
        })
    });

    let Some(settings) = &detail.network_settings else {
        return Vec::new();
    };

    let mut records = Vec::new();
    if let Some(networks) = &settings.networks {
        for (network, endpoint) in networks {
            let mut ips = Vec::new();
            push_ip(&mut ips, endpoint.ip_address.as_deref());
            push_ip(&mut ips, endpoint.global_ipv6_address.as_deref());

            let mut aliases = endpoint.aliases.clone().unwrap_or_default();
            aliases.extend(hostname_alias.clone());

            records.push(ContainerNetworkRecord {
                container_name: container_name.clone(),
                aliases,
                network: network.clone(),
                ips,
            });
        }
    }

    // Pre-network-API bridge address, reported at the top level.
    let mut default_ips = Vec::new();
    push_ip(&mut default_ips, settings.ip_address.as_deref());
    if !default_ips.is_empty() {
        records.push(ContainerNetworkRecord {
            container_name: container_name.clone(),
            aliases: hostname_alias.into_iter().collect(),
            network: "bridge".into(),
            ips: default_ips,
        });
    }

    if records.is_empty() {
        // Keep one empty record so the builder logs the skip.
        records.push(ContainerNetworkRecord {
            container_name,
            aliases: Vec::new(),
            network: String::new(),
            ips: Vec::new(),
        });
    }
    records
}

fn push_ip(ips: &mut Vec<IpAddr>, raw: Option<&str>) {
    if let Some(raw) = raw.filter(|s| !s.is_empty()) {
        match raw.parse() {
            Ok(ip) => ips.push(ip),
            Err(e) => warn!("unparseable address {:?} from Docker: {}", raw, e),
        }
    }
}
