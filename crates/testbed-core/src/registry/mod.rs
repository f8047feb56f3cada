//! Entity registry: exactly one controller per declared entity.
//!
//! Controllers are never constructed directly by callers.  Every lookup goes
//! through a get-or-create accessor, so an entity gets its controller on
//! first access and the same controller on every later access, for the
//! lifetime of the registry.
//!
//! The registry is a plain value owned by a resolution session.  Mutation
//! requires `&mut Registry`, which serializes access without locks; a fresh
//! registry per test gives full isolation.

pub mod controller;

use std::collections::HashMap;

use tracing::trace;

use crate::domain::graph::DeclarationGraph;
use crate::domain::ids::{CapabilityId, ContainerId, DeviceId, LogicalDeviceId};
use controller::{CapabilityController, ContainerController, DeviceController, LogicalDeviceController};

#[derive(Debug, Default)]
pub struct Registry {
    containers: HashMap<ContainerId, ContainerController>,
    devices: HashMap<DeviceId, DeviceController>,
    capabilities: HashMap<CapabilityId, CapabilityController>,
    logical_devices: HashMap<LogicalDeviceId, LogicalDeviceController>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the controller of `id`, creating it on first access.
    pub fn container(&mut self, graph: &DeclarationGraph, id: ContainerId) -> &mut ContainerController {
        self.containers.entry(id).or_insert_with(|| {
            trace!(%id, "creating container controller");
            ContainerController::new(graph, id)
        })
    }

    pub fn device(&mut self, graph: &DeclarationGraph, id: DeviceId) -> &mut DeviceController {
        self.devices.entry(id).or_insert_with(|| {
            trace!(%id, "creating device controller");
            DeviceController::new(graph, id)
        })
    }

    pub fn capability(&mut self, graph: &DeclarationGraph, id: CapabilityId) -> &mut CapabilityController {
        self.capabilities.entry(id).or_insert_with(|| {
            trace!(%id, "creating capability controller");
            CapabilityController::new(graph, id)
        })
    }

    pub fn logical_device(
        &mut self,
        graph: &DeclarationGraph,
        id: LogicalDeviceId,
    ) -> &mut LogicalDeviceController {
        self.logical_devices.entry(id).or_insert_with(|| {
            trace!(%id, "creating logical device controller");
            LogicalDeviceController::new(graph, id)
        })
    }

    /// Total number of controllers created so far.
    pub fn len(&self) -> usize {
        self.containers.len() + self.devices.len() + self.capabilities.len() + self.logical_devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
