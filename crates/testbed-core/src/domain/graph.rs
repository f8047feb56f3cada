//! The declaration graph: every scenario, setup, device, capability type and
//! logical device, as declared.
//!
//! Declarations are passive.  Nothing in this module resolves inheritance or
//! connectivity; that is the job of the controllers in
//! [`crate::registry`] and of the resolver crate.  What the graph does offer
//! is lookup by id and by name, and the "is-a" questions every later stage
//! needs (`is_device_subtype`, `capability_ancestry`, ...).
//!
//! Graphs are created by [`GraphBuilder`](crate::domain::builder::GraphBuilder),
//! which hands out ids in declaration order.  Every id stored inside a graph
//! therefore indexes the graph's own arenas.

use serde::{Deserialize, Serialize};

use super::ids::{CapabilityId, ContainerId, DeviceId, InstanceId, LogicalDeviceId};
use crate::connection::Connection;

// ── Containers ────────────────────────────────────────────────────────────────

/// Whether a container describes an abstract test or a concrete environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Scenario,
    Setup,
}

impl ContainerKind {
    pub fn label(self) -> &'static str {
        match self {
            ContainerKind::Scenario => "scenario",
            ContainerKind::Setup => "setup",
        }
    }
}

/// A scenario or a setup.
#[derive(Debug, Clone)]
pub struct ContainerDecl {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub name: String,
    /// Specialization parents.  More than one is rejected by validation.
    pub parents: Vec<ContainerId>,
    /// Devices declared directly on this container, in declaration order.
    pub devices: Vec<DeviceId>,
}

// ── Devices ───────────────────────────────────────────────────────────────────

/// One raw link declared on a device.
#[derive(Debug, Clone)]
pub struct ConnectionDecl {
    /// Node on the declaring device.
    pub from_node: String,
    /// Peer device in the same container.
    pub to: DeviceId,
    /// Node on the peer device.
    pub to_node: String,
    pub connection: Connection,
    /// `false` for a link that only works from the declaring device.
    pub bidirectional: bool,
}

/// A physical device owned by a scenario or setup.
#[derive(Debug, Clone)]
pub struct DeviceDecl {
    pub id: DeviceId,
    pub name: String,
    pub owner: ContainerId,
    pub parents: Vec<DeviceId>,
    /// Capability instances declared directly on this device.
    pub capabilities: Vec<InstanceId>,
    /// Links declared directly on this device.
    pub connections: Vec<ConnectionDecl>,
}

// ── Capability instances ──────────────────────────────────────────────────────

/// Entity carrying a capability instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceOwner {
    Device(DeviceId),
    LogicalDevice(LogicalDeviceId),
}

impl From<DeviceId> for InstanceOwner {
    fn from(id: DeviceId) -> Self {
        InstanceOwner::Device(id)
    }
}

impl From<LogicalDeviceId> for InstanceOwner {
    fn from(id: LogicalDeviceId) -> Self {
        InstanceOwner::LogicalDevice(id)
    }
}

/// A declared binding `logical device → real device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDecl {
    /// Logical device name, looked up on the instance's capability type.
    pub logical_device: String,
    /// Device in the same container as the instance's owner.
    pub target: DeviceId,
}

/// A capability type attached to a device or logical device under an
/// attribute name.
#[derive(Debug, Clone)]
pub struct CapabilityInstanceDecl {
    pub id: InstanceId,
    /// Attribute name, unique per owner.
    pub attr: String,
    pub owner: InstanceOwner,
    pub capability: CapabilityId,
    pub binding: Option<BindingDecl>,
}

// ── Capability types ──────────────────────────────────────────────────────────

/// One condition of a method variant: applies when `logical_device` is the
/// active one and `connection` is available to it.
#[derive(Debug, Clone)]
pub struct VariantCondition {
    pub logical_device: String,
    pub connection: Connection,
}

#[derive(Debug, Clone)]
pub struct VariantDecl {
    /// Name of the implementation, reported back to the execution layer.
    pub label: String,
    pub conditions: Vec<VariantCondition>,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub variants: Vec<VariantDecl>,
}

/// A reusable capability type.
#[derive(Debug, Clone)]
pub struct CapabilityDecl {
    pub id: CapabilityId,
    pub name: String,
    pub parents: Vec<CapabilityId>,
    /// Logical devices declared directly on this type.
    pub logical_devices: Vec<LogicalDeviceId>,
    /// Methods with variants declared directly on this type.
    pub methods: Vec<MethodDecl>,
}

impl CapabilityDecl {
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A placeholder device declared inside a capability type.
#[derive(Debug, Clone)]
pub struct LogicalDeviceDecl {
    pub id: LogicalDeviceId,
    pub name: String,
    pub owner: CapabilityId,
    pub parents: Vec<LogicalDeviceId>,
    /// Capabilities the bound real device must implement.
    pub capabilities: Vec<InstanceId>,
    /// Explicit capability-level connection requirement.
    pub requirement: Option<Connection>,
}

// ── Graph ─────────────────────────────────────────────────────────────────────

/// Every declaration of one loading session.
#[derive(Debug, Clone, Default)]
pub struct DeclarationGraph {
    pub(crate) containers: Vec<ContainerDecl>,
    pub(crate) devices: Vec<DeviceDecl>,
    pub(crate) instances: Vec<CapabilityInstanceDecl>,
    pub(crate) capabilities: Vec<CapabilityDecl>,
    pub(crate) logical_devices: Vec<LogicalDeviceDecl>,
}

impl DeclarationGraph {
    pub fn containers(&self) -> &[ContainerDecl] {
        &self.containers
    }

    /// Looks up a container.
    ///
    /// # Panics
    ///
    /// If `id` was not handed out by the builder of this graph.
    pub fn container(&self, id: ContainerId) -> &ContainerDecl {
        &self.containers[id.index()]
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &ContainerDecl> {
        self.containers
            .iter()
            .filter(|c| c.kind == ContainerKind::Scenario)
    }

    pub fn setups(&self) -> impl Iterator<Item = &ContainerDecl> {
        self.containers.iter().filter(|c| c.kind == ContainerKind::Setup)
    }

    pub fn devices(&self) -> &[DeviceDecl] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> &DeviceDecl {
        &self.devices[id.index()]
    }

    pub fn instances(&self) -> &[CapabilityInstanceDecl] {
        &self.instances
    }

    pub fn instance(&self, id: InstanceId) -> &CapabilityInstanceDecl {
        &self.instances[id.index()]
    }

    pub fn capabilities(&self) -> &[CapabilityDecl] {
        &self.capabilities
    }

    pub fn capability(&self, id: CapabilityId) -> &CapabilityDecl {
        &self.capabilities[id.index()]
    }

    pub fn logical_devices(&self) -> &[LogicalDeviceDecl] {
        &self.logical_devices
    }

    pub fn logical_device(&self, id: LogicalDeviceId) -> &LogicalDeviceDecl {
        &self.logical_devices[id.index()]
    }

    // ── Name lookup ───────────────────────────────────────────────────────────

    pub fn container_by_name(&self, name: &str) -> Option<ContainerId> {
        self.containers.iter().find(|c| c.name == name).map(|c| c.id)
    }

    pub fn capability_by_name(&self, name: &str) -> Option<CapabilityId> {
        self.capabilities.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Device declared directly on `container` under `name`.
    pub fn device_by_name(&self, container: ContainerId, name: &str) -> Option<DeviceId> {
        self.container(container)
            .devices
            .iter()
            .copied()
            .find(|d| self.device(*d).name == name)
    }

    // ── Ancestry ──────────────────────────────────────────────────────────────

    /// `id` followed by its first-parent chain up to the root.
    pub fn container_ancestry(&self, id: ContainerId) -> Vec<ContainerId> {
        chain(id, |c| self.container(c).parents.first().copied())
    }

    pub fn device_ancestry(&self, id: DeviceId) -> Vec<DeviceId> {
        chain(id, |d| self.device(d).parents.first().copied())
    }

    pub fn capability_ancestry(&self, id: CapabilityId) -> Vec<CapabilityId> {
        chain(id, |c| self.capability(c).parents.first().copied())
    }

    pub fn logical_device_ancestry(&self, id: LogicalDeviceId) -> Vec<LogicalDeviceId> {
        chain(id, |l| self.logical_device(l).parents.first().copied())
    }

    /// Returns `true` if `sub` is `sup` or specializes it through any parent.
    pub fn is_device_subtype(&self, sub: DeviceId, sup: DeviceId) -> bool {
        reaches(sub, sup, |d| self.device(d).parents.as_slice())
    }

    pub fn is_capability_subtype(&self, sub: CapabilityId, sup: CapabilityId) -> bool {
        reaches(sub, sup, |c| self.capability(c).parents.as_slice())
    }

    pub fn is_logical_device_subtype(&self, sub: LogicalDeviceId, sup: LogicalDeviceId) -> bool {
        reaches(sub, sup, |l| self.logical_device(l).parents.as_slice())
    }

    // ── Display paths ─────────────────────────────────────────────────────────

    /// `Container.Device`
    pub fn device_path(&self, id: DeviceId) -> String {
        let device = self.device(id);
        format!("{}.{}", self.container(device.owner).name, device.name)
    }

    /// `Capability.LogicalDevice`
    pub fn logical_device_path(&self, id: LogicalDeviceId) -> String {
        let ld = self.logical_device(id);
        format!("{}.{}", self.capability(ld.owner).name, ld.name)
    }

    /// `Container.Device.attr` or `Capability.LogicalDevice.attr`
    pub fn instance_path(&self, id: InstanceId) -> String {
        let instance = self.instance(id);
        let owner = match instance.owner {
            InstanceOwner::Device(d) => self.device_path(d),
            InstanceOwner::LogicalDevice(l) => self.logical_device_path(l),
        };
        format!("{owner}.{}", instance.attr)
    }
}

/// Walks a first-parent chain.  Parents always have smaller ids, so the chain
/// terminates.
fn chain<T, F>(start: T, parent: F) -> Vec<T>
where
    T: Copy,
    F: Fn(T) -> Option<T>,
{
    let mut out = vec![start];
    let mut current = start;
    while let Some(next) = parent(current) {
        out.push(next);
        current = next;
    }
    out
}

fn reaches<'a, T, F>(sub: T, sup: T, parents: F) -> bool
where
    T: Copy + PartialEq + 'a,
    F: Fn(T) -> &'a [T],
{
    let mut stack = vec![sub];
    while let Some(current) = stack.pop() {
        if current == sup {
            return true;
        }
        stack.extend_from_slice(parents(current));
    }
    false
}
