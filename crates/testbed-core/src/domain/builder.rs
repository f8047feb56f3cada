//! Explicit registration of declarations.
//!
//! One call per declared entity.  Scope rules that can be checked locally are
//! enforced immediately (a connection between devices of different
//! containers is rejected by [`GraphBuilder::connect`] itself); rules that
//! need the complete graph, such as logical-device names used by bindings,
//! are checked by [`GraphBuilder::build`].
//!
//! ```
//! use testbed_core::domain::builder::GraphBuilder;
//!
//! let mut b = GraphBuilder::new();
//! let scenario = b.add_scenario("ScenarioPing").unwrap();
//! let sender = b.add_device(scenario, "Sender").unwrap();
//! let receiver = b.add_device(scenario, "Receiver").unwrap();
//! b.connect(sender, receiver, "tcp".parse().unwrap()).unwrap();
//! let graph = b.build().unwrap();
//! assert_eq!(graph.devices().len(), 2);
//! ```

use tracing::debug;

use super::errors::DeclarationError;
use super::graph::{
    BindingDecl, CapabilityDecl, CapabilityInstanceDecl, ConnectionDecl, ContainerDecl,
    ContainerKind, DeclarationGraph, DeviceDecl, InstanceOwner, LogicalDeviceDecl, MethodDecl,
    VariantCondition, VariantDecl,
};
use super::ids::{CapabilityId, ContainerId, DeviceId, InstanceId, LogicalDeviceId};
use crate::connection::{Connection, EndpointRef};

/// Builds a [`DeclarationGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: DeclarationGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Id checks ─────────────────────────────────────────────────────────────

    fn check_container(&self, id: ContainerId) -> Result<(), DeclarationError> {
        check_index(id.index(), self.graph.containers.len(), "container", id)
    }

    fn check_device(&self, id: DeviceId) -> Result<(), DeclarationError> {
        check_index(id.index(), self.graph.devices.len(), "device", id)
    }

    fn check_capability(&self, id: CapabilityId) -> Result<(), DeclarationError> {
        check_index(id.index(), self.graph.capabilities.len(), "capability", id)
    }

    fn check_logical_device(&self, id: LogicalDeviceId) -> Result<(), DeclarationError> {
        check_index(id.index(), self.graph.logical_devices.len(), "logical device", id)
    }

    fn check_instance(&self, id: InstanceId) -> Result<(), DeclarationError> {
        check_index(id.index(), self.graph.instances.len(), "capability instance", id)
    }

    // ── Scenarios and setups ──────────────────────────────────────────────────

    pub fn add_scenario(&mut self, name: &str) -> Result<ContainerId, DeclarationError> {
        self.add_container(ContainerKind::Scenario, name)
    }

    pub fn add_setup(&mut self, name: &str) -> Result<ContainerId, DeclarationError> {
        self.add_container(ContainerKind::Setup, name)
    }

    fn add_container(&mut self, kind: ContainerKind, name: &str) -> Result<ContainerId, DeclarationError> {
        if self.graph.containers.iter().any(|c| c.name == name) {
            return Err(DeclarationError::DuplicateName {
                kind: kind.label(),
                name: name.to_string(),
                scope: "the declaration graph".to_string(),
            });
        }
        let id = ContainerId::from_index(self.graph.containers.len());
        self.graph.containers.push(ContainerDecl {
            id,
            kind,
            name: name.to_string(),
            parents: Vec::new(),
            devices: Vec::new(),
        });
        Ok(id)
    }

    /// Declares `child` a specialization of `parent`.
    ///
    /// # Errors
    ///
    /// [`DeclarationError::KindMismatch`] when mixing scenarios and setups,
    /// [`DeclarationError::ParentOrder`] when `parent` was declared after
    /// `child`.
    pub fn extend_container(&mut self, child: ContainerId, parent: ContainerId) -> Result<(), DeclarationError> {
        self.check_container(child)?;
        self.check_container(parent)?;
        let child_decl = self.graph.container(child);
        let parent_decl = self.graph.container(parent);
        if parent >= child {
            return Err(DeclarationError::ParentOrder {
                child: child_decl.name.clone(),
                parent: parent_decl.name.clone(),
            });
        }
        if child_decl.kind != parent_decl.kind {
            return Err(DeclarationError::KindMismatch {
                child: format!("{} `{}`", child_decl.kind.label(), child_decl.name),
                parent: format!("{} `{}`", parent_decl.kind.label(), parent_decl.name),
            });
        }
        self.graph.containers[child.index()].parents.push(parent);
        Ok(())
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    pub fn add_device(&mut self, container: ContainerId, name: &str) -> Result<DeviceId, DeclarationError> {
        self.check_container(container)?;
        if self.graph.device_by_name(container, name).is_some() {
            return Err(DeclarationError::DuplicateName {
                kind: "device",
                name: name.to_string(),
                scope: self.graph.container(container).name.clone(),
            });
        }
        let id = DeviceId::from_index(self.graph.devices.len());
        self.graph.devices.push(DeviceDecl {
            id,
            name: name.to_string(),
            owner: container,
            parents: Vec::new(),
            capabilities: Vec::new(),
            connections: Vec::new(),
        });
        self.graph.containers[container.index()].devices.push(id);
        Ok(id)
    }

    pub fn extend_device(&mut self, child: DeviceId, parent: DeviceId) -> Result<(), DeclarationError> {
        self.check_device(child)?;
        self.check_device(parent)?;
        if parent >= child {
            return Err(DeclarationError::ParentOrder {
                child: self.graph.device_path(child),
                parent: self.graph.device_path(parent),
            });
        }
        let child_kind = self.graph.container(self.graph.device(child).owner).kind;
        let parent_kind = self.graph.container(self.graph.device(parent).owner).kind;
        if child_kind != parent_kind {
            return Err(DeclarationError::KindMismatch {
                child: format!("{} device {}", child_kind.label(), self.graph.device_path(child)),
                parent: format!("{} device {}", parent_kind.label(), self.graph.device_path(parent)),
            });
        }
        self.graph.devices[child.index()].parents.push(parent);
        Ok(())
    }

    // ── Capability types ──────────────────────────────────────────────────────

    pub fn add_capability(&mut self, name: &str) -> Result<CapabilityId, DeclarationError> {
        if self.graph.capability_by_name(name).is_some() {
            return Err(DeclarationError::DuplicateName {
                kind: "capability",
                name: name.to_string(),
                scope: "the declaration graph".to_string(),
            });
        }
        let id = CapabilityId::from_index(self.graph.capabilities.len());
        self.graph.capabilities.push(CapabilityDecl {
            id,
            name: name.to_string(),
            parents: Vec::new(),
            logical_devices: Vec::new(),
            methods: Vec::new(),
        });
        Ok(id)
    }

    pub fn extend_capability(&mut self, child: CapabilityId, parent: CapabilityId) -> Result<(), DeclarationError> {
        self.check_capability(child)?;
        self.check_capability(parent)?;
        if parent >= child {
            return Err(DeclarationError::ParentOrder {
                child: self.graph.capability(child).name.clone(),
                parent: self.graph.capability(parent).name.clone(),
            });
        }
        self.graph.capabilities[child.index()].parents.push(parent);
        Ok(())
    }

    pub fn add_logical_device(&mut self, capability: CapabilityId, name: &str) -> Result<LogicalDeviceId, DeclarationError> {
        self.check_capability(capability)?;
        let duplicate = self
            .graph
            .capability(capability)
            .logical_devices
            .iter()
            .any(|l| self.graph.logical_device(*l).name == name);
        if duplicate {
            return Err(DeclarationError::DuplicateName {
                kind: "logical device",
                name: name.to_string(),
                scope: self.graph.capability(capability).name.clone(),
            });
        }
        let id = LogicalDeviceId::from_index(self.graph.logical_devices.len());
        self.graph.logical_devices.push(LogicalDeviceDecl {
            id,
            name: name.to_string(),
            owner: capability,
            parents: Vec::new(),
            capabilities: Vec::new(),
            requirement: None,
        });
        self.graph.capabilities[capability.index()].logical_devices.push(id);
        Ok(id)
    }

    pub fn extend_logical_device(&mut self, child: LogicalDeviceId, parent: LogicalDeviceId) -> Result<(), DeclarationError> {
        self.check_logical_device(child)?;
        self.check_logical_device(parent)?;
        if parent >= child {
            return Err(DeclarationError::ParentOrder {
                child: self.graph.logical_device_path(child),
                parent: self.graph.logical_device_path(parent),
            });
        }
        self.graph.logical_devices[child.index()].parents.push(parent);
        Ok(())
    }

    /// Sets the explicit capability-level requirement of a logical device.
    pub fn require_connection(&mut self, logical_device: LogicalDeviceId, connection: Connection) -> Result<(), DeclarationError> {
        self.check_logical_device(logical_device)?;
        self.graph.logical_devices[logical_device.index()].requirement = Some(connection);
        Ok(())
    }

    /// Adds a variant `label` of `method` on `capability`.
    ///
    /// Each condition is a logical-device name and the connection that must
    /// be available to it.
    pub fn add_variant<I, S>(
        &mut self,
        capability: CapabilityId,
        method: &str,
        label: &str,
        conditions: I,
    ) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = (S, Connection)>,
        S: Into<String>,
    {
        self.check_capability(capability)?;
        let variant = VariantDecl {
            label: label.to_string(),
            conditions: conditions
                .into_iter()
                .map(|(logical_device, connection)| VariantCondition {
                    logical_device: logical_device.into(),
                    connection,
                })
                .collect(),
        };

        let decl = &mut self.graph.capabilities[capability.index()];
        let scope = format!("{}::{method}", decl.name);
        match decl.methods.iter_mut().find(|m| m.name == method) {
            Some(existing) => {
                if existing.variants.iter().any(|v| v.label == label) {
                    return Err(DeclarationError::DuplicateName {
                        kind: "variant",
                        name: label.to_string(),
                        scope,
                    });
                }
                existing.variants.push(variant);
            }
            None => decl.methods.push(MethodDecl {
                name: method.to_string(),
                variants: vec![variant],
            }),
        }
        Ok(())
    }

    // ── Capability instances ──────────────────────────────────────────────────

    /// Attaches `capability` to a device or logical device under `attr`.
    pub fn attach_capability(
        &mut self,
        owner: impl Into<InstanceOwner>,
        attr: &str,
        capability: CapabilityId,
    ) -> Result<InstanceId, DeclarationError> {
        let owner = owner.into();
        self.check_capability(capability)?;
        let (existing, scope) = match owner {
            InstanceOwner::Device(d) => {
                self.check_device(d)?;
                (&self.graph.device(d).capabilities, self.graph.device_path(d))
            }
            InstanceOwner::LogicalDevice(l) => {
                self.check_logical_device(l)?;
                (
                    &self.graph.logical_device(l).capabilities,
                    self.graph.logical_device_path(l),
                )
            }
        };
        if existing.iter().any(|i| self.graph.instance(*i).attr == attr) {
            return Err(DeclarationError::DuplicateName {
                kind: "capability attribute",
                name: attr.to_string(),
                scope,
            });
        }

        let id = InstanceId::from_index(self.graph.instances.len());
        self.graph.instances.push(CapabilityInstanceDecl {
            id,
            attr: attr.to_string(),
            owner,
            capability,
            binding: None,
        });
        match owner {
            InstanceOwner::Device(d) => self.graph.devices[d.index()].capabilities.push(id),
            InstanceOwner::LogicalDevice(l) => {
                self.graph.logical_devices[l.index()].capabilities.push(id)
            }
        }
        Ok(id)
    }

    /// Binds the instance's logical device `logical_device` to `target`.
    ///
    /// The logical-device name is checked by [`GraphBuilder::build`].
    pub fn bind(&mut self, instance: InstanceId, logical_device: &str, target: DeviceId) -> Result<(), DeclarationError> {
        self.check_instance(instance)?;
        self.check_device(target)?;
        let InstanceOwner::Device(owner) = self.graph.instance(instance).owner else {
            return Err(DeclarationError::BindingOnLogicalDevice {
                instance: self.graph.instance_path(instance),
            });
        };
        if owner == target {
            return Err(DeclarationError::SelfBinding {
                instance: self.graph.instance_path(instance),
            });
        }
        if self.graph.device(owner).owner != self.graph.device(target).owner {
            return Err(DeclarationError::CrossContainerBinding {
                instance: self.graph.instance_path(instance),
                target: self.graph.device_path(target),
            });
        }
        self.graph.instances[instance.index()].binding = Some(BindingDecl {
            logical_device: logical_device.to_string(),
            target,
        });
        Ok(())
    }

    // ── Connections ───────────────────────────────────────────────────────────

    /// Connects the default nodes of two devices.
    pub fn connect(&mut self, from: DeviceId, to: DeviceId, connection: Connection) -> Result<(), DeclarationError> {
        self.connect_nodes(EndpointRef::default_node(from), EndpointRef::default_node(to), connection)
    }

    /// Connects two explicit device nodes.  The link is declared on `from`.
    pub fn connect_nodes(&mut self, from: EndpointRef, to: EndpointRef, connection: Connection) -> Result<(), DeclarationError> {
        self.push_connection(from, to, connection, true)
    }

    /// Connects two explicit device nodes with a link that only works
    /// `from` → `to`.
    pub fn connect_one_way(&mut self, from: EndpointRef, to: EndpointRef, connection: Connection) -> Result<(), DeclarationError> {
        self.push_connection(from, to, connection, false)
    }

    fn push_connection(
        &mut self,
        from: EndpointRef,
        to: EndpointRef,
        connection: Connection,
        bidirectional: bool,
    ) -> Result<(), DeclarationError> {
        self.check_device(from.device)?;
        self.check_device(to.device)?;
        if from.device == to.device {
            return Err(DeclarationError::SelfConnection {
                device: self.graph.device_path(from.device),
            });
        }
        if self.graph.device(from.device).owner != self.graph.device(to.device).owner {
            return Err(DeclarationError::CrossContainerConnection {
                from: self.graph.device_path(from.device),
                to: self.graph.device_path(to.device),
            });
        }
        for endpoint in [&from, &to] {
            if endpoint.node.is_empty() {
                return Err(DeclarationError::EmptyNodeName {
                    device: self.graph.device_path(endpoint.device),
                });
            }
        }
        self.graph.devices[from.device.index()]
            .connections
            .push(ConnectionDecl {
                from_node: from.node,
                to: to.device,
                to_node: to.node,
                connection,
                bidirectional,
            });
        Ok(())
    }

    // ── Finish ────────────────────────────────────────────────────────────────

    /// Checks cross references and returns the graph.
    ///
    /// # Errors
    ///
    /// [`DeclarationError::UnknownLogicalDevice`] if a binding or a variant
    /// condition names a logical device its capability type does not have.
    pub fn build(self) -> Result<DeclarationGraph, DeclarationError> {
        let graph = self.graph;

        for instance in &graph.instances {
            if let Some(binding) = &instance.binding {
                check_logical_device_name(&graph, instance.capability, &binding.logical_device)?;
            }
        }
        for capability in &graph.capabilities {
            for method in &capability.methods {
                for variant in &method.variants {
                    for condition in &variant.conditions {
                        check_logical_device_name(&graph, capability.id, &condition.logical_device)?;
                    }
                }
            }
        }

        debug!(
            containers = graph.containers.len(),
            devices = graph.devices.len(),
            capabilities = graph.capabilities.len(),
            "declaration graph built"
        );
        Ok(graph)
    }
}

fn check_index(index: usize, len: usize, kind: &'static str, id: impl ToString) -> Result<(), DeclarationError> {
    if index < len {
        Ok(())
    } else {
        Err(DeclarationError::UnknownId {
            kind,
            id: id.to_string(),
        })
    }
}

/// A logical-device name is valid if declared on the capability type or on
/// any of its ancestors.
fn check_logical_device_name(
    graph: &DeclarationGraph,
    capability: CapabilityId,
    name: &str,
) -> Result<(), DeclarationError> {
    let known = graph.capability_ancestry(capability).into_iter().any(|c| {
        graph
            .capability(c)
            .logical_devices
            .iter()
            .any(|l| graph.logical_device(*l).name == name)
    });
    if known {
        Ok(())
    } else {
        Err(DeclarationError::UnknownLogicalDevice {
            capability: graph.capability(capability).name.clone(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp() -> Connection {
        Connection::single(["tcp"])
    }

    // ── containers ────────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_container_name_rejected() {
        let mut b = GraphBuilder::new();
        b.add_scenario("S").unwrap();
        assert!(matches!(
            b.add_setup("S"),
            Err(DeclarationError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_scenario_cannot_specialize_setup() {
        let mut b = GraphBuilder::new();
        let setup = b.add_setup("SetupA").unwrap();
        let scenario = b.add_scenario("ScenarioB").unwrap();
        assert!(matches!(
            b.extend_container(scenario, setup),
            Err(DeclarationError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_parent_declared_after_child_rejected() {
        let mut b = GraphBuilder::new();
        let first = b.add_setup("First").unwrap();
        let second = b.add_setup("Second").unwrap();
        assert!(matches!(
            b.extend_container(first, second),
            Err(DeclarationError::ParentOrder { .. })
        ));
    }

    // ── devices and connections ───────────────────────────────────────────────

    #[test]
    fn test_duplicate_device_name_in_container_rejected() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("Setup").unwrap();
        b.add_device(s, "D").unwrap();
        assert!(b.add_device(s, "D").is_err());
    }

    #[test]
    fn test_same_device_name_in_different_containers_accepted() {
        let mut b = GraphBuilder::new();
        let s1 = b.add_setup("Setup1").unwrap();
        let s2 = b.add_setup("Setup2").unwrap();
        b.add_device(s1, "D").unwrap();
        assert!(b.add_device(s2, "D").is_ok());
    }

    #[test]
    fn test_connect_across_containers_rejected() {
        let mut b = GraphBuilder::new();
        let s1 = b.add_setup("Setup1").unwrap();
        let s2 = b.add_setup("Setup2").unwrap();
        let a = b.add_device(s1, "A").unwrap();
        let c = b.add_device(s2, "C").unwrap();
        assert!(matches!(
            b.connect(a, c, tcp()),
            Err(DeclarationError::CrossContainerConnection { .. })
        ));
    }

    #[test]
    fn test_connect_device_with_itself_rejected() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("Setup").unwrap();
        let a = b.add_device(s, "A").unwrap();
        assert!(matches!(
            b.connect(a, a, tcp()),
            Err(DeclarationError::SelfConnection { .. })
        ));
    }

    #[test]
    fn test_connect_records_default_nodes() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("Setup").unwrap();
        let a = b.add_device(s, "A").unwrap();
        let c = b.add_device(s, "C").unwrap();
        b.connect(a, c, tcp()).unwrap();
        let graph = b.build().unwrap();
        let decl = &graph.device(a).connections[0];
        assert_eq!(decl.from_node, "n0");
        assert_eq!(decl.to_node, "n0");
        assert_eq!(decl.to, c);
        assert!(decl.bidirectional);
    }

    #[test]
    fn test_connect_one_way_records_direction() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("Setup").unwrap();
        let a = b.add_device(s, "A").unwrap();
        let c = b.add_device(s, "C").unwrap();
        b.connect_one_way(EndpointRef::new(a, "tx"), EndpointRef::new(c, "rx"), tcp())
            .unwrap();
        let graph = b.build().unwrap();
        let decl = &graph.device(a).connections[0];
        assert!(!decl.bidirectional);
        assert_eq!((decl.from_node.as_str(), decl.to_node.as_str()), ("tx", "rx"));
    }

    #[test]
    fn test_device_cannot_extend_device_of_other_kind() {
        let mut b = GraphBuilder::new();
        let scenario = b.add_scenario("Scenario").unwrap();
        let setup = b.add_setup("Setup").unwrap();
        let abstract_dev = b.add_device(scenario, "A").unwrap();
        let real = b.add_device(setup, "R").unwrap();
        assert!(matches!(
            b.extend_device(real, abstract_dev),
            Err(DeclarationError::KindMismatch { .. })
        ));
    }

    // ── capabilities and bindings ─────────────────────────────────────────────

    #[test]
    fn test_bind_across_containers_rejected() {
        let mut b = GraphBuilder::new();
        let cap = b.add_capability("Messaging").unwrap();
        b.add_logical_device(cap, "Peer").unwrap();
        let s1 = b.add_scenario("S1").unwrap();
        let s2 = b.add_scenario("S2").unwrap();
        let a = b.add_device(s1, "A").unwrap();
        let other = b.add_device(s2, "B").unwrap();
        let inst = b.attach_capability(a, "msg", cap).unwrap();
        assert!(matches!(
            b.bind(inst, "Peer", other),
            Err(DeclarationError::CrossContainerBinding { .. })
        ));
    }

    #[test]
    fn test_binding_on_logical_device_instance_rejected() {
        let mut b = GraphBuilder::new();
        let helper = b.add_capability("Helper").unwrap();
        let cap = b.add_capability("Messaging").unwrap();
        let peer = b.add_logical_device(cap, "Peer").unwrap();
        let inst = b.attach_capability(peer, "helper", helper).unwrap();
        let s = b.add_scenario("S").unwrap();
        let d = b.add_device(s, "D").unwrap();
        assert!(matches!(
            b.bind(inst, "Peer", d),
            Err(DeclarationError::BindingOnLogicalDevice { .. })
        ));
    }

    #[test]
    fn test_build_rejects_unknown_logical_device_in_binding() {
        let mut b = GraphBuilder::new();
        let cap = b.add_capability("Messaging").unwrap();
        b.add_logical_device(cap, "Peer").unwrap();
        let s = b.add_scenario("S").unwrap();
        let a = b.add_device(s, "A").unwrap();
        let c = b.add_device(s, "C").unwrap();
        let inst = b.attach_capability(a, "msg", cap).unwrap();
        b.bind(inst, "Nobody", c).unwrap();
        assert!(matches!(
            b.build(),
            Err(DeclarationError::UnknownLogicalDevice { .. })
        ));
    }

    #[test]
    fn test_build_accepts_logical_device_inherited_from_parent_type() {
        let mut b = GraphBuilder::new();
        let base = b.add_capability("Base").unwrap();
        b.add_logical_device(base, "Peer").unwrap();
        let child = b.add_capability("Child").unwrap();
        b.extend_capability(child, base).unwrap();
        b.add_variant(child, "send", "send_any", [("Peer", tcp())]).unwrap();
        assert!(b.build().is_ok());
    }

    #[test]
    fn test_duplicate_variant_label_rejected() {
        let mut b = GraphBuilder::new();
        let cap = b.add_capability("Messaging").unwrap();
        b.add_logical_device(cap, "Peer").unwrap();
        b.add_variant(cap, "send", "v1", [("Peer", tcp())]).unwrap();
        assert!(b.add_variant(cap, "send", "v1", [("Peer", tcp())]).is_err());
    }

    #[test]
    fn test_duplicate_attribute_on_device_rejected() {
        let mut b = GraphBuilder::new();
        let cap = b.add_capability("Messaging").unwrap();
        let s = b.add_setup("S").unwrap();
        let d = b.add_device(s, "D").unwrap();
        b.attach_capability(d, "msg", cap).unwrap();
        assert!(b.attach_capability(d, "msg", cap).is_err());
    }

    #[test]
    fn test_subtype_queries_follow_parent_chain() {
        let mut b = GraphBuilder::new();
        let base = b.add_capability("Base").unwrap();
        let mid = b.add_capability("Mid").unwrap();
        let leaf = b.add_capability("Leaf").unwrap();
        b.extend_capability(mid, base).unwrap();
        b.extend_capability(leaf, mid).unwrap();
        let graph = b.build().unwrap();
        assert!(graph.is_capability_subtype(leaf, base));
        assert!(!graph.is_capability_subtype(base, leaf));
        assert_eq!(graph.capability_ancestry(leaf), vec![leaf, mid, base]);
    }
}
