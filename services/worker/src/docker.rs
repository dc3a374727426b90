//! Docker implementation of the container runtime interface.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::secret::{HostConfig, PortBinding, PortMap, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use corral_task::TaskSpec;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::runtime::{ContainerRuntime, ContainerSummary};

const NANO_CPUS_PER_CORE: f64 = 1_000_000_000.0;

/// Container runtime backed by the local Docker engine.
///
/// Stateless apart from the engine client handle.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the engine over the default unix socket.
    pub fn connect() -> Result<Self> {
        let client =
            Docker::connect_with_unix_defaults().context("connecting to the docker daemon")?;
        Ok(DockerRuntime { client })
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut progress = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(update) = progress.next().await {
            let info = update.with_context(|| format!("pulling image {image}"))?;
            if let Some(status) = info.status {
                debug!(image, status = %status, "image pull progress");
            }
        }
        Ok(())
    }

    /// Follow the container's log stream onto our stdout until it ends.
    fn attach_logs(&self, container_id: String) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut stream = client.logs(&container_id, Some(options));
            while let Some(entry) = stream.next().await {
                match entry {
                    Ok(output) => print!("{output}"),
                    Err(err) => {
                        warn!(container_id = %container_id, error = %err, "log stream ended");
                        break;
                    }
                }
            }
        });
    }
}

fn port_map(bindings: &HashMap<String, String>) -> PortMap {
    bindings
        .iter()
        .map(|(port, host_port)| {
            (
                port.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(host_port.clone()),
                }]),
            )
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &TaskSpec) -> Result<String> {
        self.pull_image(&spec.image).await?;

        let restart_policy = RestartPolicy {
            name: Some(
                spec.restart_policy
                    .parse()
                    .unwrap_or(RestartPolicyNameEnum::NO),
            ),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            memory: Some(spec.memory),
            nano_cpus: Some((spec.cpu * NANO_CPUS_PER_CORE) as i64),
            restart_policy: Some(restart_policy),
            port_bindings: Some(port_map(&spec.port_bindings)),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(
                spec.exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .with_context(|| format!("creating container for image {}", spec.image))?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("starting container {}", created.id))?;

        // Best effort: the task runs fine even if we cannot tail its logs.
        self.attach_logs(created.id.clone());

        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.client
            .stop_container(container_id, None)
            .await
            .with_context(|| format!("stopping container {container_id}"))?;
        self.client
            .remove_container(container_id, None)
            .await
            .with_context(|| format!("removing container {container_id}"))?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSummary> {
        let response = self
            .client
            .inspect_container(container_id, None)
            .await
            .with_context(|| format!("inspecting container {container_id}"))?;

        let status = response
            .state
            .as_ref()
            .and_then(|state| state.status)
            .map(|status| status.to_string())
            .unwrap_or_default();

        let mut port_bindings = HashMap::new();
        if let Some(ports) = response.network_settings.and_then(|net| net.ports) {
            for (port, binds) in ports {
                let host_ports: Vec<String> = binds
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|bind| bind.host_port)
                    .collect();
                port_bindings.insert(port, host_ports);
            }
        }

        Ok(ContainerSummary {
            status,
            port_bindings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_map_binds_to_loopback() {
        let mut bindings = HashMap::new();
        bindings.insert("80/tcp".to_string(), "8080".to_string());

        let map = port_map(&bindings);
        let bound = map.get("80/tcp").unwrap().as_ref().unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(bound[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_cpu_request_converts_to_nano_cpus() {
        assert_eq!((0.5 * NANO_CPUS_PER_CORE) as i64, 500_000_000);
        assert_eq!((1.0 * NANO_CPUS_PER_CORE) as i64, 1_000_000_000);
    }
}
