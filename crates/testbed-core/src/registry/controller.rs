//! Controllers: derived state for one declared entity.
//!
//! A controller is created from the declaration graph the first time its
//! entity is looked up in the [`Registry`](super::Registry).  Creation
//! computes the entity's *visible members* (own members merged over the
//! inherited ones); everything else is filled in by the resolver and cached
//! here.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::connection::table::ConnectionTable;
use crate::connection::Connection;
use crate::domain::graph::{ContainerKind, DeclarationGraph};
use crate::domain::ids::{CapabilityId, ContainerId, DeviceId, InstanceId, LogicalDeviceId};

/// A non-fatal finding recorded while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionWarning {
    /// Declaration the warning is about.
    pub subject: String,
    pub message: String,
}

impl ResolutionWarning {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

/// Output of the reduction pipeline for one container.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConnections {
    /// `device → node → device → node → [single]` after reduction.
    pub singles: ConnectionTable,
    pub warnings: Vec<ResolutionWarning>,
}

// ── Containers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ContainerController {
    id: ContainerId,
    kind: ContainerKind,
    visible_devices: Vec<DeviceId>,
    absolute: Option<ConnectionTable>,
    absolute_warnings: Vec<ResolutionWarning>,
    resolved: Option<ResolvedConnections>,
}

impl ContainerController {
    pub(crate) fn new(graph: &DeclarationGraph, id: ContainerId) -> Self {
        Self {
            id,
            kind: graph.container(id).kind,
            visible_devices: visible_devices(graph, id),
            absolute: None,
            absolute_warnings: Vec::new(),
            resolved: None,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Own devices merged by name over the devices inherited from the parent,
    /// ascending by id.
    pub fn visible_devices(&self) -> &[DeviceId] {
        &self.visible_devices
    }

    /// Absolute connections, once pass 1 of the reduction ran.
    pub fn absolute(&self) -> Option<&ConnectionTable> {
        self.absolute.as_ref()
    }

    /// Warnings raised while computing the absolute connections.
    pub fn absolute_warnings(&self) -> &[ResolutionWarning] {
        &self.absolute_warnings
    }

    pub fn set_absolute(&mut self, table: ConnectionTable, warnings: Vec<ResolutionWarning>) {
        self.absolute = Some(table);
        self.absolute_warnings = warnings;
    }

    /// Reduced single connections, once the whole pipeline ran.
    pub fn resolved(&self) -> Option<&ResolvedConnections> {
        self.resolved.as_ref()
    }

    pub fn set_resolved(&mut self, resolved: ResolvedConnections) {
        self.resolved = Some(resolved);
    }
}

fn visible_devices(graph: &DeclarationGraph, id: ContainerId) -> Vec<DeviceId> {
    let container = graph.container(id);
    let mut by_name: BTreeMap<&str, DeviceId> = BTreeMap::new();
    if let Some(parent) = container.parents.first() {
        for device in visible_devices(graph, *parent) {
            by_name.insert(graph.device(device).name.as_str(), device);
        }
    }
    for device in &container.devices {
        by_name.insert(graph.device(*device).name.as_str(), *device);
    }
    let mut devices: Vec<DeviceId> = by_name.into_values().collect();
    devices.sort();
    devices
}

// ── Devices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeviceController {
    id: DeviceId,
    visible_capabilities: BTreeMap<String, InstanceId>,
}

impl DeviceController {
    pub(crate) fn new(graph: &DeclarationGraph, id: DeviceId) -> Self {
        let visible_capabilities = merged_attributes(graph, graph.device_ancestry(id), |d| {
            graph.device(d).capabilities.as_slice()
        });
        Self {
            id,
            visible_capabilities,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Capability instances by attribute, including inherited ones.
    pub fn visible_capabilities(&self) -> &BTreeMap<String, InstanceId> {
        &self.visible_capabilities
    }

    pub fn capability(&self, attr: &str) -> Option<InstanceId> {
        self.visible_capabilities.get(attr).copied()
    }
}

// ── Logical devices ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogicalDeviceController {
    id: LogicalDeviceId,
    visible_capabilities: BTreeMap<String, InstanceId>,
}

impl LogicalDeviceController {
    pub(crate) fn new(graph: &DeclarationGraph, id: LogicalDeviceId) -> Self {
        let visible_capabilities =
            merged_attributes(graph, graph.logical_device_ancestry(id), |l| {
                graph.logical_device(l).capabilities.as_slice()
            });
        Self {
            id,
            visible_capabilities,
        }
    }

    pub fn id(&self) -> LogicalDeviceId {
        self.id
    }

    /// Capabilities the bound real device must implement, by attribute.
    pub fn visible_capabilities(&self) -> &BTreeMap<String, InstanceId> {
        &self.visible_capabilities
    }
}

/// Merges attribute maps root first, so nearer declarations win.
fn merged_attributes<'g, T, F>(
    graph: &'g DeclarationGraph,
    ancestry: Vec<T>,
    instances: F,
) -> BTreeMap<String, InstanceId>
where
    T: Copy,
    F: Fn(T) -> &'g [InstanceId],
{
    let mut merged = BTreeMap::new();
    for entity in ancestry.into_iter().rev() {
        for instance in instances(entity) {
            merged.insert(graph.instance(*instance).attr.clone(), *instance);
        }
    }
    merged
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Cache key of one variant resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub method: String,
    pub logical_device: String,
    /// Canonical form of the available connection.
    pub available: String,
}

#[derive(Debug, Clone)]
pub struct CapabilityController {
    id: CapabilityId,
    visible_logical_devices: BTreeMap<String, LogicalDeviceId>,
    requirements: Option<BTreeMap<String, Connection>>,
    hints: Vec<ResolutionWarning>,
    variants: HashMap<VariantKey, String>,
}

impl CapabilityController {
    pub(crate) fn new(graph: &DeclarationGraph, id: CapabilityId) -> Self {
        let mut visible_logical_devices = BTreeMap::new();
        for capability in graph.capability_ancestry(id).into_iter().rev() {
            for ld in &graph.capability(capability).logical_devices {
                visible_logical_devices.insert(graph.logical_device(*ld).name.clone(), *ld);
            }
        }
        Self {
            id,
            visible_logical_devices,
            requirements: None,
            hints: Vec::new(),
            variants: HashMap::new(),
        }
    }

    pub fn id(&self) -> CapabilityId {
        self.id
    }

    /// Logical devices by name; a specialization's re-declaration replaces
    /// the inherited one.
    pub fn visible_logical_devices(&self) -> &BTreeMap<String, LogicalDeviceId> {
        &self.visible_logical_devices
    }

    pub fn logical_device(&self, name: &str) -> Option<LogicalDeviceId> {
        self.visible_logical_devices.get(name).copied()
    }

    /// Resolved requirement per logical-device name, once computed.
    pub fn requirements(&self) -> Option<&BTreeMap<String, Connection>> {
        self.requirements.as_ref()
    }

    pub fn requirement(&self, logical_device: &str) -> Option<&Connection> {
        self.requirements.as_ref()?.get(logical_device)
    }

    pub fn set_requirements(
        &mut self,
        requirements: BTreeMap<String, Connection>,
        hints: Vec<ResolutionWarning>,
    ) {
        self.requirements = Some(requirements);
        self.hints = hints;
    }

    /// Requirements that had to be synthesized instead of being declared.
    pub fn hints(&self) -> &[ResolutionWarning] {
        &self.hints
    }

    pub fn cached_variant(&self, key: &VariantKey) -> Option<&str> {
        self.variants.get(key).map(String::as_str)
    }

    pub fn cache_variant(&mut self, key: VariantKey, label: String) {
        self.variants.insert(key, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builder::GraphBuilder;

    #[test]
    fn test_container_without_own_devices_sees_parent_devices() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let a = b.add_device(base, "A").unwrap();
        let c = b.add_device(base, "C").unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let graph = b.build().unwrap();

        let controller = ContainerController::new(&graph, child);
        assert_eq!(controller.visible_devices(), &[a, c]);
    }

    #[test]
    fn test_redeclared_device_replaces_parent_device() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let a = b.add_device(base, "A").unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let a2 = b.add_device(child, "A").unwrap();
        b.extend_device(a2, a).unwrap();
        let graph = b.build().unwrap();

        let controller = ContainerController::new(&graph, child);
        assert_eq!(controller.visible_devices(), &[a2]);
    }

    #[test]
    fn test_device_inherits_capabilities_by_attribute() {
        let mut b = GraphBuilder::new();
        let base_cap = b.add_capability("Base").unwrap();
        let special = b.add_capability("Special").unwrap();
        b.extend_capability(special, base_cap).unwrap();
        let s = b.add_setup("S").unwrap();
        let parent = b.add_device(s, "Parent").unwrap();
        let kept = b.attach_capability(parent, "keep", base_cap).unwrap();
        b.attach_capability(parent, "swap", base_cap).unwrap();
        let child = b.add_device(s, "Child").unwrap();
        b.extend_device(child, parent).unwrap();
        let swapped = b.attach_capability(child, "swap", special).unwrap();
        let graph = b.build().unwrap();

        let controller = DeviceController::new(&graph, child);
        assert_eq!(controller.capability("keep"), Some(kept));
        assert_eq!(controller.capability("swap"), Some(swapped));
    }

    #[test]
    fn test_capability_sees_inherited_logical_devices() {
        let mut b = GraphBuilder::new();
        let base = b.add_capability("Base").unwrap();
        let peer = b.add_logical_device(base, "Peer").unwrap();
        let child = b.add_capability("Child").unwrap();
        b.extend_capability(child, base).unwrap();
        let graph = b.build().unwrap();

        let controller = CapabilityController::new(&graph, child);
        assert_eq!(controller.logical_device("Peer"), Some(peer));
        assert!(controller.requirements().is_none());
    }
}
