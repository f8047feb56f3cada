//! Hierarchy validation: override discipline along every specialization
//! chain.
//!
//! # Rules (for beginners)
//!
//! Scenarios, setups, devices, capability types and logical devices can all
//! *specialize* a parent of their own family.  A specialization may add
//! members, but what it inherits is constrained:
//!
//! - **Single parent.**  More than one parent is rejected for every family
//!   before anything else is looked at.
//! - **All or nothing.**  A scenario or setup that declares any devices must
//!   re-declare every device visible on its parent; a capability type that
//!   declares any logical devices must re-declare every inherited logical
//!   device.  Declaring none at all is pure inheritance and always fine.
//! - **Subtypes only.**  A re-declared item must specialize the item of the
//!   same name it replaces.  For devices and logical devices the same holds
//!   for capability attributes: a same-named attribute must carry a subtype
//!   of the inherited capability type.
//!
//! Parents always have smaller ids than their children, so walking each
//! family in id order checks every chain from the top parent down.
//!
//! A violation is a broken declaration, not an unmatchable pairing, so it is
//! fatal for the whole run.

use std::collections::BTreeMap;

use tracing::{debug, error};

use testbed_core::domain::graph::ContainerDecl;
use testbed_core::{CapabilityId, DeclarationGraph, HierarchyError, InstanceId};

use super::session::ResolutionSession;

/// Validates every hierarchy in the session's graph.
///
/// # Errors
///
/// The first [`HierarchyError`] found: multi-parent violations first, then
/// override violations in id order.
pub fn validate_hierarchy(session: &mut ResolutionSession<'_>) -> Result<(), HierarchyError> {
    let graph = session.graph();
    check_single_parents(graph).map_err(log_failure)?;

    for container in graph.containers() {
        check_container(session, container).map_err(log_failure)?;
    }
    for capability in graph.capabilities() {
        check_capability(session, capability.id).map_err(log_failure)?;
    }
    for device in graph.devices() {
        let Some(parent) = device.parents.first() else {
            continue;
        };
        let own = session.device_capabilities(device.id);
        let inherited = session.device_capabilities(*parent);
        check_attributes(
            graph,
            graph.device_path(device.id),
            &device.capabilities,
            &own,
            &inherited,
        )
        .map_err(log_failure)?;
    }
    for ld in graph.logical_devices() {
        let Some(parent) = ld.parents.first() else {
            continue;
        };
        let own = session.logical_device_capabilities(ld.id);
        let inherited = session.logical_device_capabilities(*parent);
        check_attributes(
            graph,
            graph.logical_device_path(ld.id),
            &ld.capabilities,
            &own,
            &inherited,
        )
        .map_err(log_failure)?;
    }

    debug!("hierarchy validation passed");
    Ok(())
}

fn log_failure(err: HierarchyError) -> HierarchyError {
    error!("hierarchy validation failed: {err}");
    err
}

// ── Multi-parent ──────────────────────────────────────────────────────────────

fn check_single_parents(graph: &DeclarationGraph) -> Result<(), HierarchyError> {
    for c in graph.containers() {
        if c.parents.len() > 1 {
            return Err(HierarchyError::MultiParent {
                entity: container_label(c),
                parents: c.parents.iter().map(|p| container_label(graph.container(*p))).collect(),
            });
        }
    }
    for d in graph.devices() {
        if d.parents.len() > 1 {
            return Err(HierarchyError::MultiParent {
                entity: graph.device_path(d.id),
                parents: d.parents.iter().map(|p| graph.device_path(*p)).collect(),
            });
        }
    }
    for c in graph.capabilities() {
        if c.parents.len() > 1 {
            return Err(HierarchyError::MultiParent {
                entity: format!("capability `{}`", c.name),
                parents: c
                    .parents
                    .iter()
                    .map(|p| format!("capability `{}`", graph.capability(*p).name))
                    .collect(),
            });
        }
    }
    for l in graph.logical_devices() {
        if l.parents.len() > 1 {
            return Err(HierarchyError::MultiParent {
                entity: graph.logical_device_path(l.id),
                parents: l.parents.iter().map(|p| graph.logical_device_path(*p)).collect(),
            });
        }
    }
    Ok(())
}

// ── Containers ────────────────────────────────────────────────────────────────

fn container_label(c: &ContainerDecl) -> String {
    format!("{} `{}`", c.kind.label(), c.name)
}

fn check_container(session: &mut ResolutionSession<'_>, container: &ContainerDecl) -> Result<(), HierarchyError> {
    let graph = session.graph();
    let Some(parent) = container.parents.first() else {
        return Ok(());
    };
    if container.devices.is_empty() {
        return Ok(());
    }

    let entity = container_label(container);
    let parent_label = container_label(graph.container(*parent));
    let own: BTreeMap<&str, _> = container
        .devices
        .iter()
        .map(|d| (graph.device(*d).name.as_str(), *d))
        .collect();

    for inherited in session.visible_devices(*parent) {
        let name = graph.device(inherited).name.as_str();
        let Some(redeclared) = own.get(name) else {
            return Err(HierarchyError::MissingRedeclaration {
                entity,
                parent: parent_label,
                missing: name.to_string(),
            });
        };
        if !graph.is_device_subtype(*redeclared, inherited) {
            return Err(HierarchyError::NotSubtype {
                entity,
                item: name.to_string(),
                expected: graph.device_path(inherited),
                found: graph.device_path(*redeclared),
            });
        }
    }
    Ok(())
}

// ── Capability types ──────────────────────────────────────────────────────────

fn check_capability(session: &mut ResolutionSession<'_>, id: CapabilityId) -> Result<(), HierarchyError> {
    let graph = session.graph();
    let capability = graph.capability(id);
    let Some(parent) = capability.parents.first() else {
        return Ok(());
    };
    if capability.logical_devices.is_empty() {
        return Ok(());
    }

    let entity = format!("capability `{}`", capability.name);
    let parent_label = format!("capability `{}`", graph.capability(*parent).name);
    let own: BTreeMap<&str, _> = capability
        .logical_devices
        .iter()
        .map(|l| (graph.logical_device(*l).name.as_str(), *l))
        .collect();

    for (name, inherited) in session.capability_logical_devices(*parent) {
        let Some(redeclared) = own.get(name.as_str()) else {
            return Err(HierarchyError::MissingRedeclaration {
                entity,
                parent: parent_label,
                missing: name,
            });
        };
        if !graph.is_logical_device_subtype(*redeclared, inherited) {
            return Err(HierarchyError::NotSubtype {
                entity,
                item: name,
                expected: graph.logical_device_path(inherited),
                found: graph.logical_device_path(*redeclared),
            });
        }
    }
    Ok(())
}

// ── Capability attributes ─────────────────────────────────────────────────────

/// Own attributes overriding an inherited attribute must carry a subtype of
/// the inherited capability type.
fn check_attributes(
    graph: &DeclarationGraph,
    entity: String,
    declared: &[InstanceId],
    own: &BTreeMap<String, InstanceId>,
    inherited: &BTreeMap<String, InstanceId>,
) -> Result<(), HierarchyError> {
    for instance in declared {
        let attr = &graph.instance(*instance).attr;
        let (Some(mine), Some(theirs)) = (own.get(attr), inherited.get(attr)) else {
            continue;
        };
        let mine = graph.instance(*mine).capability;
        let theirs = graph.instance(*theirs).capability;
        if !graph.is_capability_subtype(mine, theirs) {
            return Err(HierarchyError::NotSubtype {
                entity,
                item: attr.clone(),
                expected: format!("capability `{}`", graph.capability(theirs).name),
                found: format!("capability `{}`", graph.capability(mine).name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::GraphBuilder;

    fn validate(graph: &DeclarationGraph) -> Result<(), HierarchyError> {
        validate_hierarchy(&mut ResolutionSession::new(graph))
    }

    // ── multi-parent ──────────────────────────────────────────────────────────

    #[test]
    fn test_multi_parent_setup_rejected() {
        let mut b = GraphBuilder::new();
        let a = b.add_setup("SetupA").unwrap();
        let bb = b.add_setup("SetupB").unwrap();
        let c = b.add_setup("SetupC").unwrap();
        b.extend_container(c, a).unwrap();
        b.extend_container(c, bb).unwrap();
        let graph = b.build().unwrap();

        assert!(matches!(validate(&graph), Err(HierarchyError::MultiParent { .. })));
    }

    #[test]
    fn test_multi_parent_checked_before_override_rules() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        b.add_device(base, "A").unwrap();
        b.add_device(base, "B").unwrap();
        let partial = b.add_setup("Partial").unwrap();
        b.extend_container(partial, base).unwrap();
        b.add_device(partial, "A").unwrap();
        let cap1 = b.add_capability("C1").unwrap();
        let cap2 = b.add_capability("C2").unwrap();
        let cap3 = b.add_capability("C3").unwrap();
        b.extend_capability(cap3, cap1).unwrap();
        b.extend_capability(cap3, cap2).unwrap();
        let graph = b.build().unwrap();

        assert!(matches!(validate(&graph), Err(HierarchyError::MultiParent { .. })));
    }

    // ── all or nothing ────────────────────────────────────────────────────────

    #[test]
    fn test_pure_inheritance_is_valid() {
        let mut b = GraphBuilder::new();
        let base = b.add_scenario("Base").unwrap();
        b.add_device(base, "A").unwrap();
        let child = b.add_scenario("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let graph = b.build().unwrap();

        assert!(validate(&graph).is_ok());
    }

    #[test]
    fn test_partial_redeclaration_names_missing_device() {
        // Arrange
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let a = b.add_device(base, "A").unwrap();
        b.add_device(base, "B").unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let a2 = b.add_device(child, "A").unwrap();
        b.extend_device(a2, a).unwrap();
        let graph = b.build().unwrap();

        // Act
        let err = validate(&graph).unwrap_err();

        // Assert
        match err {
            HierarchyError::MissingRedeclaration { missing, .. } => assert_eq!(missing, "B"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_redeclaration_with_new_device_is_valid() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let a = b.add_device(base, "A").unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let a2 = b.add_device(child, "A").unwrap();
        b.extend_device(a2, a).unwrap();
        b.add_device(child, "Extra").unwrap();
        let graph = b.build().unwrap();

        assert!(validate(&graph).is_ok());
    }

    #[test]
    fn test_redeclared_device_must_be_subtype() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        b.add_device(base, "A").unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        b.add_device(child, "A").unwrap();
        let graph = b.build().unwrap();

        assert!(matches!(validate(&graph), Err(HierarchyError::NotSubtype { .. })));
    }

    #[test]
    fn test_completeness_holds_on_deep_chain() {
        let mut b = GraphBuilder::new();
        let s1 = b.add_scenario("S1").unwrap();
        let a1 = b.add_device(s1, "A").unwrap();
        b.add_device(s1, "B").unwrap();
        let s2 = b.add_scenario("S2").unwrap();
        b.extend_container(s2, s1).unwrap();
        let s3 = b.add_scenario("S3").unwrap();
        b.extend_container(s3, s2).unwrap();
        let a3 = b.add_device(s3, "A").unwrap();
        b.extend_device(a3, a1).unwrap();
        let graph = b.build().unwrap();

        // S3 re-declares A but not B, which it inherits through S2.
        assert!(matches!(
            validate(&graph),
            Err(HierarchyError::MissingRedeclaration { .. })
        ));
    }

    #[test]
    fn test_capability_partial_logical_device_redeclaration_rejected() {
        let mut b = GraphBuilder::new();
        let base = b.add_capability("Base").unwrap();
        let peer = b.add_logical_device(base, "Peer").unwrap();
        b.add_logical_device(base, "Monitor").unwrap();
        let child = b.add_capability("Child").unwrap();
        b.extend_capability(child, base).unwrap();
        let peer2 = b.add_logical_device(child, "Peer").unwrap();
        b.extend_logical_device(peer2, peer).unwrap();
        let graph = b.build().unwrap();

        assert!(matches!(
            validate(&graph),
            Err(HierarchyError::MissingRedeclaration { .. })
        ));
    }

    // ── attributes ────────────────────────────────────────────────────────────

    #[test]
    fn test_device_attribute_override_must_be_subtype() {
        let mut b = GraphBuilder::new();
        let msg = b.add_capability("Messaging").unwrap();
        let other = b.add_capability("Storage").unwrap();
        let s = b.add_setup("S").unwrap();
        let parent = b.add_device(s, "Parent").unwrap();
        b.attach_capability(parent, "cap", msg).unwrap();
        let child = b.add_device(s, "Child").unwrap();
        b.extend_device(child, parent).unwrap();
        b.attach_capability(child, "cap", other).unwrap();
        let graph = b.build().unwrap();

        assert!(matches!(validate(&graph), Err(HierarchyError::NotSubtype { .. })));
    }

    #[test]
    fn test_device_attribute_override_with_subtype_is_valid() {
        let mut b = GraphBuilder::new();
        let msg = b.add_capability("Messaging").unwrap();
        let tcp_msg = b.add_capability("TcpMessaging").unwrap();
        b.extend_capability(tcp_msg, msg).unwrap();
        let s = b.add_setup("S").unwrap();
        let parent = b.add_device(s, "Parent").unwrap();
        b.attach_capability(parent, "cap", msg).unwrap();
        let child = b.add_device(s, "Child").unwrap();
        b.extend_device(child, parent).unwrap();
        b.attach_capability(child, "cap", tcp_msg).unwrap();
        let graph = b.build().unwrap();

        assert!(validate(&graph).is_ok());
    }
}
