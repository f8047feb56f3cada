//! ResolutionSession: the declaration graph plus its entity registry.
//!
//! Every use case in this layer takes `&mut ResolutionSession`.  The graph is
//! shared and read-only; the registry is owned by the session, so two sessions
//! over the same graph never see each other's cached state.

use std::collections::BTreeMap;

use testbed_core::{
    CapabilityId, ContainerId, DeclarationGraph, DeviceId, InstanceId, LogicalDeviceId, Registry,
};

pub struct ResolutionSession<'g> {
    graph: &'g DeclarationGraph,
    registry: Registry,
}

impl<'g> ResolutionSession<'g> {
    pub fn new(graph: &'g DeclarationGraph) -> Self {
        Self {
            graph,
            registry: Registry::new(),
        }
    }

    pub fn graph(&self) -> &'g DeclarationGraph {
        self.graph
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Devices visible on a scenario or setup, ascending by id.
    pub fn visible_devices(&mut self, container: ContainerId) -> Vec<DeviceId> {
        self.registry
            .container(self.graph, container)
            .visible_devices()
            .to_vec()
    }

    /// Capability instances visible on a device, by attribute.
    pub fn device_capabilities(&mut self, device: DeviceId) -> BTreeMap<String, InstanceId> {
        self.registry
            .device(self.graph, device)
            .visible_capabilities()
            .clone()
    }

    /// Capabilities a logical device requires of its bound device, by attribute.
    pub fn logical_device_capabilities(&mut self, logical_device: LogicalDeviceId) -> BTreeMap<String, InstanceId> {
        self.registry
            .logical_device(self.graph, logical_device)
            .visible_capabilities()
            .clone()
    }

    /// Logical devices visible on a capability type, by name.
    pub fn capability_logical_devices(&mut self, capability: CapabilityId) -> BTreeMap<String, LogicalDeviceId> {
        self.registry
            .capability(self.graph, capability)
            .visible_logical_devices()
            .clone()
    }

    /// Visible device of `container` called `name`.
    pub fn visible_device_by_name(&mut self, container: ContainerId, name: &str) -> Option<DeviceId> {
        let graph = self.graph;
        self.visible_devices(container)
            .into_iter()
            .find(|d| graph.device(*d).name == name)
    }
}
