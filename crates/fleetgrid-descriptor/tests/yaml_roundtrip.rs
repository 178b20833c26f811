//! Descriptor documents parsed back with an independent YAML parser.

use std::collections::BTreeMap;

use fleetgrid_descriptor::{DescriptorBuilder, RuntimeConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    api_version: String,
    workloads: BTreeMap<String, Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    runtime: String,
    agent: String,
    restart_policy: String,
    runtime_config: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerConfig {
    image: String,
    command_options: Vec<String>,
}

#[test]
fn three_line_runtime_config_survives_parsing() {
    let config = "image: ghcr.io/fleet/app:1.2\n  indented: true\ncommandOptions: [\"-p\", \"9000:80\"]";
    let descriptor = DescriptorBuilder::new("car-1", "car-1", "unused")
        .workload("ecu-body", "v1.0")
        .runtime_config(config)
        .build()
        .unwrap();

    let yaml = descriptor.to_yaml().unwrap();
    assert!(yaml.contains("runtimeConfig: |-\n"), "{yaml}");
    let doc: Document = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(doc.api_version, "v0.1");
    assert_eq!(doc.workloads["ecu-body-car-1"].runtime_config, config);
}

#[test]
fn generated_descriptor_parses_and_nested_config_is_yaml() {
    let descriptor = DescriptorBuilder::new("car-42", "car-42", "ghcr.io/fleet/update_trigger:latest")
        .base_port(9500)
        .env("CITY", "Hamburg")
        .env("STATE", "parked")
        .workload("ecu-body", "v1.0")
        .workload("ecu-safety", "2.0.1")
        .build()
        .unwrap();

    let doc: Document = serde_yaml::from_str(&descriptor.to_yaml().unwrap()).unwrap();
    assert_eq!(doc.workloads.len(), 2);

    let safety = &doc.workloads["ecu-safety-car-42"];
    assert_eq!(safety.runtime, "podman");
    assert_eq!(safety.agent, "car-42");
    assert_eq!(safety.restart_policy, "ON_FAILURE");

    let inner: InnerConfig = serde_yaml::from_str(&safety.runtime_config).unwrap();
    assert_eq!(inner.image, "ghcr.io/fleet/update_trigger:latest");
    let expected = RuntimeConfig::container(
        "ghcr.io/fleet/update_trigger:latest",
        "ecu-safety-car-42",
        9501,
        &[
            ("AGENT_ID".to_string(), "car-42".to_string()),
            ("ECU_NAME".to_string(), "ecu-safety".to_string()),
            ("ECU_VERSION".to_string(), "2.0.1".to_string()),
            ("CITY".to_string(), "Hamburg".to_string()),
            ("STATE".to_string(), "parked".to_string()),
        ],
    );
    assert_eq!(inner.command_options, expected.command_options);
}

#[test]
fn awkward_agent_names_are_quoted() {
    let descriptor = DescriptorBuilder::new("7", "yes", "img")
        .workload("ecu", "v1")
        .build()
        .unwrap();
    let doc: Document = serde_yaml::from_str(&descriptor.to_yaml().unwrap()).unwrap();
    assert_eq!(doc.workloads["ecu-7"].agent, "yes");
}
