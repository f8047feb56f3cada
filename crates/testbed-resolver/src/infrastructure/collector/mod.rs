//! Declaration file loader.
//!
//! Reads a TOML document describing capability types, scenarios and setups
//! and registers every entity with a [`GraphBuilder`].
//!
//! ```toml
//! [[capability]]
//! name = "Messaging"
//! [[capability.logical_device]]
//! name = "Peer"
//! requires = "tcp"
//! [[capability.variant]]
//! method = "send"
//! name = "send_over_tcp"
//! when = [{ logical_device = "Peer", connection = "tcp" }]
//!
//! [[scenario]]
//! name = "ScenarioPing"
//! [[scenario.device]]
//! name = "Sender"
//! capabilities = [{ attr = "msg", capability = "Messaging", bind = { logical_device = "Peer", device = "Receiver" } }]
//! connections = [{ to = "Receiver", over = "tcp" }]
//! [[scenario.device]]
//! name = "Receiver"
//! ```
//!
//! # Name resolution
//!
//! - Capability names are global.  Every capability is registered before any
//!   of them is filled in, so a logical device may require a capability
//!   declared further down the file.
//! - `extends` names a previously declared entity of the same kind:
//!   `"Capability.LogicalDevice"` for logical devices, `"Container.Device"`
//!   for devices, a plain name otherwise.
//! - Binding and connection targets are device names in the same container.
//!   All devices of a container are registered before their capabilities and
//!   connections, so forward references inside a container are fine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use testbed_core::{
    CapabilityId, Connection, ConnectionError, ContainerId, DeclarationError, DeclarationGraph,
    DeviceId, EndpointRef, GraphBuilder, InstanceOwner, LogicalDeviceId, DEFAULT_NODE,
};

/// Error type for loading declarations.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading declarations at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse declarations TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{by}: unknown {kind} `{name}`")]
    UnknownReference {
        kind: &'static str,
        name: String,
        by: String,
    },

    #[error("{by}: invalid connection `{text}`: {source}")]
    Connection {
        text: String,
        by: String,
        #[source]
        source: ConnectionError,
    },

    #[error("{by}: {source}")]
    Declaration {
        by: String,
        #[source]
        source: DeclarationError,
    },
}

// ── File schema ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarationFile {
    #[serde(default)]
    capability: Vec<CapabilityEntry>,
    #[serde(default)]
    scenario: Vec<ContainerEntry>,
    #[serde(default)]
    setup: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CapabilityEntry {
    name: String,
    extends: Option<String>,
    #[serde(default)]
    logical_device: Vec<LogicalDeviceEntry>,
    #[serde(default)]
    variant: Vec<VariantEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogicalDeviceEntry {
    name: String,
    extends: Option<String>,
    requires: Option<String>,
    /// Capabilities the bound real device must implement.
    #[serde(default)]
    capabilities: Vec<CapabilityRef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariantEntry {
    method: String,
    name: String,
    when: Vec<ConditionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionEntry {
    logical_device: String,
    connection: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainerEntry {
    name: String,
    extends: Option<String>,
    #[serde(default)]
    device: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceEntry {
    name: String,
    extends: Option<String>,
    #[serde(default)]
    capabilities: Vec<CapabilityRef>,
    #[serde(default)]
    connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CapabilityRef {
    attr: String,
    capability: String,
    bind: Option<BindEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BindEntry {
    logical_device: String,
    device: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionEntry {
    to: String,
    over: String,
    from_node: Option<String>,
    to_node: Option<String>,
    /// `false` for a link that only works from the declaring device.
    #[serde(default = "default_bidirectional")]
    bidirectional: bool,
}

fn default_bidirectional() -> bool {
    true
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Reads and loads the declaration file at `path`.
///
/// # Errors
///
/// [`LoadError::Io`] if the file cannot be read, otherwise as
/// [`parse_declarations`].
pub fn load_declarations(path: &Path) -> Result<DeclarationGraph, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_declarations(&content)
}

/// Loads declarations from TOML text.
///
/// # Errors
///
/// - [`LoadError::Parse`] for malformed TOML or unknown keys.
/// - [`LoadError::UnknownReference`] for names that resolve to nothing.
/// - [`LoadError::Connection`] for malformed connection expressions.
/// - [`LoadError::Declaration`] when the builder rejects a declaration.
pub fn parse_declarations(text: &str) -> Result<DeclarationGraph, LoadError> {
    let file: DeclarationFile = toml::from_str(text)?;
    let mut loader = Loader::default();

    loader.load_capabilities(&file.capability)?;
    for entry in &file.scenario {
        loader.load_container(entry, ContainerRole::Scenario)?;
    }
    for entry in &file.setup {
        loader.load_container(entry, ContainerRole::Setup)?;
    }

    debug!(
        "loaded {} capabilities, {} scenarios, {} setups",
        file.capability.len(),
        file.scenario.len(),
        file.setup.len()
    );
    loader
        .builder
        .build()
        .map_err(|source| LoadError::Declaration {
            by: "declarations".to_string(),
            source,
        })
}

// ── Loader ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum ContainerRole {
    Scenario,
    Setup,
}

/// Builder plus the name tables needed to resolve references.
#[derive(Default)]
struct Loader {
    builder: GraphBuilder,
    capabilities: HashMap<String, CapabilityId>,
    logical_devices: HashMap<(String, String), LogicalDeviceId>,
    containers: HashMap<String, ContainerId>,
    devices: HashMap<(String, String), DeviceId>,
}

fn declared<T>(by: &str, result: Result<T, DeclarationError>) -> Result<T, LoadError> {
    result.map_err(|source| LoadError::Declaration {
        by: by.to_string(),
        source,
    })
}

fn parse_connection(by: &str, text: &str) -> Result<Connection, LoadError> {
    text.parse().map_err(|source| LoadError::Connection {
        text: text.to_string(),
        by: by.to_string(),
        source,
    })
}

/// Splits `"Owner.Member"` at the first dot.
fn split_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('.')
}

impl Loader {
    fn capability(&self, by: &str, name: &str) -> Result<CapabilityId, LoadError> {
        self.capabilities
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::UnknownReference {
                kind: "capability",
                name: name.to_string(),
                by: by.to_string(),
            })
    }

    fn load_capabilities(&mut self, entries: &[CapabilityEntry]) -> Result<(), LoadError> {
        for entry in entries {
            let id = declared(&entry.name, self.builder.add_capability(&entry.name))?;
            self.capabilities.insert(entry.name.clone(), id);
        }

        for entry in entries {
            let by = entry.name.as_str();
            let id = self.capability(by, by)?;
            if let Some(parent) = &entry.extends {
                let parent = self.capability(by, parent)?;
                declared(by, self.builder.extend_capability(id, parent))?;
            }

            for ld in &entry.logical_device {
                let ld_by = format!("{by}.{}", ld.name);
                let ld_id = declared(&ld_by, self.builder.add_logical_device(id, &ld.name))?;
                self.logical_devices
                    .insert((entry.name.clone(), ld.name.clone()), ld_id);

                if let Some(parent) = &ld.extends {
                    let parent_id = split_path(parent)
                        .and_then(|(cap, name)| {
                            self.logical_devices
                                .get(&(cap.to_string(), name.to_string()))
                                .copied()
                        })
                        .ok_or_else(|| LoadError::UnknownReference {
                            kind: "logical device",
                            name: parent.clone(),
                            by: ld_by.clone(),
                        })?;
                    declared(&ld_by, self.builder.extend_logical_device(ld_id, parent_id))?;
                }
                if let Some(text) = &ld.requires {
                    let connection = parse_connection(&ld_by, text)?;
                    declared(&ld_by, self.builder.require_connection(ld_id, connection))?;
                }
                for cap_ref in &ld.capabilities {
                    let cap = self.capability(&ld_by, &cap_ref.capability)?;
                    declared(
                        &ld_by,
                        self.builder
                            .attach_capability(InstanceOwner::LogicalDevice(ld_id), &cap_ref.attr, cap),
                    )?;
                }
            }

            for variant in &entry.variant {
                let variant_by = format!("{by}::{}", variant.method);
                let conditions = variant
                    .when
                    .iter()
                    .map(|c| Ok((c.logical_device.clone(), parse_connection(&variant_by, &c.connection)?)))
                    .collect::<Result<Vec<_>, LoadError>>()?;
                declared(
                    &variant_by,
                    self.builder
                        .add_variant(id, &variant.method, &variant.name, conditions),
                )?;
            }
        }
        Ok(())
    }

    fn load_container(&mut self, entry: &ContainerEntry, role: ContainerRole) -> Result<(), LoadError> {
        let by = entry.name.as_str();
        let id = match role {
            ContainerRole::Scenario => declared(by, self.builder.add_scenario(by))?,
            ContainerRole::Setup => declared(by, self.builder.add_setup(by))?,
        };
        self.containers.insert(entry.name.clone(), id);

        if let Some(parent) = &entry.extends {
            let parent_id = self
                .containers
                .get(parent)
                .copied()
                .ok_or_else(|| LoadError::UnknownReference {
                    kind: "container",
                    name: parent.clone(),
                    by: by.to_string(),
                })?;
            declared(by, self.builder.extend_container(id, parent_id))?;
        }

        // Register every device first so later entries can refer to them.
        let mut ids = Vec::with_capacity(entry.device.len());
        for device in &entry.device {
            let device_by = format!("{by}.{}", device.name);
            let device_id = declared(&device_by, self.builder.add_device(id, &device.name))?;
            self.devices
                .insert((entry.name.clone(), device.name.clone()), device_id);
            ids.push(device_id);
        }

        for (device, device_id) in entry.device.iter().zip(ids) {
            let device_by = format!("{by}.{}", device.name);
            if let Some(parent) = &device.extends {
                let parent_id = self.device_by_path(&device_by, parent)?;
                declared(&device_by, self.builder.extend_device(device_id, parent_id))?;
            }
            for cap_ref in &device.capabilities {
                let cap = self.capability(&device_by, &cap_ref.capability)?;
                let instance = declared(
                    &device_by,
                    self.builder.attach_capability(device_id, &cap_ref.attr, cap),
                )?;
                if let Some(bind) = &cap_ref.bind {
                    let target = self.local_device(&entry.name, &device_by, &bind.device)?;
                    declared(
                        &device_by,
                        self.builder.bind(instance, &bind.logical_device, target),
                    )?;
                }
            }
            for link in &device.connections {
                let peer = self.local_device(&entry.name, &device_by, &link.to)?;
                let connection = parse_connection(&device_by, &link.over)?;
                let from = EndpointRef::new(device_id, link.from_node.as_deref().unwrap_or(DEFAULT_NODE));
                let to = EndpointRef::new(peer, link.to_node.as_deref().unwrap_or(DEFAULT_NODE));
                let result = if link.bidirectional {
                    self.builder.connect_nodes(from, to, connection)
                } else {
                    self.builder.connect_one_way(from, to, connection)
                };
                declared(&device_by, result)?;
            }
        }
        Ok(())
    }

    fn local_device(&self, container: &str, by: &str, name: &str) -> Result<DeviceId, LoadError> {
        self.devices
            .get(&(container.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| LoadError::UnknownReference {
                kind: "device",
                name: name.to_string(),
                by: by.to_string(),
            })
    }

    fn device_by_path(&self, by: &str, path: &str) -> Result<DeviceId, LoadError> {
        split_path(path)
            .and_then(|(container, name)| {
                self.devices
                    .get(&(container.to_string(), name.to_string()))
                    .copied()
            })
            .ok_or_else(|| LoadError::UnknownReference {
                kind: "device",
                name: path.to_string(),
                by: by.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"
[[capability]]
name = "Messaging"
[[capability.logical_device]]
name = "Peer"
requires = "tcp"
[[capability.variant]]
method = "send"
name = "send_over_tcp"
when = [{ logical_device = "Peer", connection = "tcp" }]

[[scenario]]
name = "ScenarioPing"
[[scenario.device]]
name = "Sender"
capabilities = [{ attr = "msg", capability = "Messaging", bind = { logical_device = "Peer", device = "Receiver" } }]
connections = [{ to = "Receiver", over = "tcp" }]
[[scenario.device]]
name = "Receiver"
"#;

    #[test]
    fn test_parse_declarations_registers_every_entity() {
        // Arrange / Act
        let graph = parse_declarations(PING).unwrap();

        // Assert
        let scenario = graph.container_by_name("ScenarioPing").unwrap();
        let sender = graph.device_by_name(scenario, "Sender").unwrap();
        let receiver = graph.device_by_name(scenario, "Receiver").unwrap();
        let decl = graph.device(sender);
        assert_eq!(decl.connections.len(), 1);
        assert_eq!(decl.connections[0].to, receiver);
        assert_eq!(decl.connections[0].from_node, DEFAULT_NODE);
        assert!(decl.connections[0].bidirectional);
        let instance = graph.instance(decl.capabilities[0]);
        assert_eq!(instance.binding.as_ref().unwrap().target, receiver);
        let messaging = graph.capability_by_name("Messaging").unwrap();
        assert_eq!(graph.capability(messaging).method("send").unwrap().variants.len(), 1);
    }

    #[test]
    fn test_parse_declarations_empty_document_is_empty_graph() {
        let graph = parse_declarations("").unwrap();
        assert!(graph.containers().is_empty());
        assert!(graph.capabilities().is_empty());
    }

    #[test]
    fn test_parse_declarations_unknown_capability_names_referrer() {
        let text = r#"
[[setup]]
name = "Lab"
[[setup.device]]
name = "Host"
capabilities = [{ attr = "msg", capability = "Nope" }]
"#;
        let err = parse_declarations(text).unwrap_err();
        match err {
            LoadError::UnknownReference { kind, name, by } => {
                assert_eq!(kind, "capability");
                assert_eq!(name, "Nope");
                assert_eq!(by, "Lab.Host");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_declarations_bad_connection_expression_is_error() {
        let text = r#"
[[setup]]
name = "Lab"
[[setup.device]]
name = "A"
connections = [{ to = "B", over = "tcp &" }]
[[setup.device]]
name = "B"
"#;
        assert!(matches!(parse_declarations(text), Err(LoadError::Connection { .. })));
    }

    #[test]
    fn test_parse_declarations_one_way_connection() {
        let text = r#"
[[setup]]
name = "Lab"
[[setup.device]]
name = "Camera"
connections = [{ to = "Recorder", over = "video", bidirectional = false }]
[[setup.device]]
name = "Recorder"
"#;
        let graph = parse_declarations(text).unwrap();
        let lab = graph.container_by_name("Lab").unwrap();
        let camera = graph.device_by_name(lab, "Camera").unwrap();
        assert!(!graph.device(camera).connections[0].bidirectional);
    }

    #[test]
    fn test_parse_declarations_unknown_key_is_parse_error() {
        let text = "[[setup]]\nname = \"Lab\"\ncolour = \"red\"\n";
        assert!(matches!(parse_declarations(text), Err(LoadError::Parse(_))));
    }

    #[test]
    fn test_parse_declarations_resolves_extends_paths() {
        let text = r#"
[[capability]]
name = "Base"
[[capability.logical_device]]
name = "Peer"
[[capability]]
name = "Child"
extends = "Base"
[[capability.logical_device]]
name = "Peer"
extends = "Base.Peer"

[[setup]]
name = "Lab"
[[setup.device]]
name = "Host"
[[setup]]
name = "BigLab"
extends = "Lab"
[[setup.device]]
name = "Host"
extends = "Lab.Host"
"#;
        let graph = parse_declarations(text).unwrap();
        let base = graph.capability_by_name("Base").unwrap();
        let child = graph.capability_by_name("Child").unwrap();
        assert!(graph.is_capability_subtype(child, base));
        let lab = graph.container_by_name("Lab").unwrap();
        let big = graph.container_by_name("BigLab").unwrap();
        let host = graph.device_by_name(lab, "Host").unwrap();
        let big_host = graph.device_by_name(big, "Host").unwrap();
        assert!(graph.is_device_subtype(big_host, host));
    }

    #[test]
    fn test_load_declarations_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("testbed-resolver-no-such-declarations.toml");
        assert!(matches!(load_declarations(&path), Err(LoadError::Io { .. })));
    }
}
