//! Descriptor construction.
//!
//! Everything here is pure: the same inputs always produce the same
//! descriptor, and nothing touches the filesystem or the runtime.

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{DescriptorError, DescriptorResult};

/// Descriptor schema version understood by the runtime.
pub const API_VERSION: &str = "v0.1";

/// Container port every workload exposes.
const CONTAINER_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Podman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
}

/// Container launch settings for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub image: String,
    pub command_options: Vec<String>,
}

impl RuntimeConfig {
    /// Options for a container named `container` publishing `port`, with
    /// `env` passed as `--env KEY=VALUE` pairs in order.
    pub fn container(image: &str, container: &str, port: u16, env: &[(String, String)]) -> Self {
        let mut command_options = vec![
            "-p".to_string(),
            format!("{port}:{CONTAINER_PORT}"),
            "--name".to_string(),
            container.to_string(),
        ];
        for (key, value) in env {
            command_options.push("--env".to_string());
            command_options.push(format!("{key}={value}"));
        }
        Self {
            image: image.to_string(),
            command_options,
        }
    }

    /// The multi-line text block the runtime expects.
    pub fn render(&self) -> String {
        let options = serde_json::to_string(&self.command_options)
            .unwrap_or_else(|_| "[]".to_string());
        format!("image: {}\ncommandOptions: {options}\n", self.image)
    }
}

/// One workload entry of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    /// `<workload>-<entity id>`.
    pub name: String,
    pub agent: String,
    pub runtime: RuntimeKind,
    pub restart_policy: RestartPolicy,
    /// Free text, usually several lines.
    pub runtime_config: String,
    /// Host port assigned to this workload.
    pub port: u16,
}

/// A complete descriptor document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
    pub api_version: String,
    pub workloads: Vec<WorkloadDescriptor>,
}

impl RuntimeDescriptor {
    /// Serialize to the runtime's YAML format. Workloads keep their order
    /// and multi-line runtime configs become literal block scalars.
    pub fn to_yaml(&self) -> DescriptorResult<String> {
        let document = Document {
            api_version: &self.api_version,
            workloads: &self.workloads,
        };
        Ok(serde_yaml::to_string(&document)?)
    }

    pub fn workload(&self, name: &str) -> Option<&WorkloadDescriptor> {
        self.workloads.iter().find(|w| w.name == name)
    }
}

/// On-disk layout: `workloads` is a mapping keyed by workload name.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    api_version: &'a str,
    #[serde(serialize_with = "workloads_by_name")]
    workloads: &'a [WorkloadDescriptor],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadEntry<'a> {
    runtime: RuntimeKind,
    agent: &'a str,
    restart_policy: RestartPolicy,
    runtime_config: &'a str,
}

fn workloads_by_name<S: Serializer>(
    workloads: &&[WorkloadDescriptor],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(workloads.iter().map(|w| {
        (
            w.name.as_str(),
            WorkloadEntry {
                runtime: w.runtime,
                agent: &w.agent,
                restart_policy: w.restart_policy,
                runtime_config: &w.runtime_config,
            },
        )
    }))
}

/// Build the descriptor entry for a single workload.
///
/// `env` is appended after the per-workload identity variables
/// (`AGENT_ID`, `ECU_NAME`, `ECU_VERSION`).
pub fn workload_descriptor(
    entity_id: &str,
    agent: &str,
    workload: &str,
    version: &str,
    image: &str,
    env: &[(String, String)],
    port: u16,
) -> WorkloadDescriptor {
    let name = format!("{workload}-{entity_id}");
    let mut vars = vec![
        ("AGENT_ID".to_string(), agent.to_string()),
        ("ECU_NAME".to_string(), workload.to_string()),
        ("ECU_VERSION".to_string(), version.to_string()),
    ];
    vars.extend(env.iter().cloned());

    WorkloadDescriptor {
        runtime_config: RuntimeConfig::container(image, &name, port, &vars).render(),
        name,
        agent: agent.to_string(),
        runtime: RuntimeKind::Podman,
        restart_policy: RestartPolicy::OnFailure,
        port,
    }
}

/// Builder for a whole descriptor document.
///
/// Workload *i* is assigned `base_port + i`.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    entity_id: String,
    agent: String,
    image: String,
    base_port: u16,
    env: Vec<(String, String)>,
    workloads: Vec<(String, String)>,
    runtime_config: Option<String>,
}

impl DescriptorBuilder {
    pub fn new(entity_id: &str, agent: &str, image: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            agent: agent.to_string(),
            image: image.to_string(),
            base_port: 9000,
            env: Vec::new(),
            workloads: Vec::new(),
            runtime_config: None,
        }
    }

    pub fn base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// Add an environment pair shared by every workload.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn workload(mut self, name: &str, version: &str) -> Self {
        self.workloads.push((name.to_string(), version.to_string()));
        self
    }

    /// Use `text` verbatim as every workload's runtime configuration.
    pub fn runtime_config(mut self, text: &str) -> Self {
        self.runtime_config = Some(text.to_string());
        self
    }

    pub fn build(&self) -> DescriptorResult<RuntimeDescriptor> {
        if self.workloads.is_empty() {
            return Err(DescriptorError::EmptyWorkloads(self.entity_id.clone()));
        }

        let mut workloads = Vec::with_capacity(self.workloads.len());
        for (index, (name, version)) in self.workloads.iter().enumerate() {
            let port = u16::try_from(index)
                .ok()
                .and_then(|i| self.base_port.checked_add(i))
                .ok_or(DescriptorError::PortOverflow {
                    base: self.base_port,
                    index,
                })?;
            let mut descriptor = workload_descriptor(
                &self.entity_id,
                &self.agent,
                name,
                version,
                &self.image,
                &self.env,
                port,
            );
            if let Some(text) = &self.runtime_config {
                descriptor.runtime_config = text.clone();
            }
            workloads.push(descriptor);
        }

        Ok(RuntimeDescriptor {
            api_version: API_VERSION.to_string(),
            workloads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "ghcr.io/fleet/update_trigger:latest";

    fn two_workloads() -> DescriptorBuilder {
        DescriptorBuilder::new("car-1", "car-1", IMAGE)
            .base_port(9100)
            .env("CITY", "Munich")
            .env("STATE", "parked")
            .workload("ecu-body", "v1.0")
            .workload("ecu-safety", "v2.0")
    }

    #[test]
    fn workload_identity_and_policy() {
        let d = workload_descriptor("car-7", "agent-7", "ecu-body", "v1.0", IMAGE, &[], 9000);
        assert_eq!(d.name, "ecu-body-car-7");
        assert_eq!(d.agent, "agent-7");
        assert_eq!(d.runtime, RuntimeKind::Podman);
        assert_eq!(d.restart_policy, RestartPolicy::OnFailure);
    }

    #[test]
    fn runtime_config_lists_port_name_and_env() {
        let env = vec![("CITY".to_string(), "Berlin".to_string())];
        let d = workload_descriptor("car-7", "car-7", "ecu-body", "v1.0", IMAGE, &env, 9042);
        assert_eq!(
            d.runtime_config,
            format!(
                "image: {IMAGE}\ncommandOptions: [\"-p\",\"9042:80\",\"--name\",\"ecu-body-car-7\",\
                 \"--env\",\"AGENT_ID=car-7\",\"--env\",\"ECU_NAME=ecu-body\",\
                 \"--env\",\"ECU_VERSION=v1.0\",\"--env\",\"CITY=Berlin\"]\n"
            )
        );
    }

    #[test]
    fn ports_increase_per_workload() {
        let descriptor = two_workloads().build().unwrap();
        let ports: Vec<u16> = descriptor.workloads.iter().map(|w| w.port).collect();
        assert_eq!(ports, vec![9100, 9101]);
        assert!(descriptor.workloads[1].runtime_config.contains("\"9101:80\""));
    }

    #[test]
    fn empty_workloads_rejected() {
        let err = DescriptorBuilder::new("car-1", "car-1", IMAGE)
            .build()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::EmptyWorkloads(_)));
    }

    #[test]
    fn port_overflow_rejected() {
        let err = two_workloads().base_port(u16::MAX).build().unwrap_err();
        assert!(matches!(err, DescriptorError::PortOverflow { index: 1, .. }));
    }

    #[test]
    fn yaml_keeps_workload_order() {
        let yaml = two_workloads().build().unwrap().to_yaml().unwrap();
        assert!(yaml.starts_with("apiVersion: v0.1\nworkloads:\n  ecu-body-car-1:\n"));
        let body = yaml.find("ecu-body-car-1:").unwrap();
        let safety = yaml.find("ecu-safety-car-1:").unwrap();
        assert!(body < safety);
        assert!(yaml.contains("    runtime: podman\n"));
        assert!(yaml.contains("    restartPolicy: ON_FAILURE\n"));
        assert!(yaml.contains("    runtimeConfig: |\n"));
    }

    #[test]
    fn override_replaces_runtime_config() {
        let descriptor = two_workloads()
            .runtime_config("image: custom\n")
            .build()
            .unwrap();
        assert!(descriptor.workloads.iter().all(|w| w.runtime_config == "image: custom\n"));
    }
}
