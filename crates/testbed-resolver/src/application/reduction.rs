//! Connection reduction pipeline.
//!
//! Three ordered passes per scenario or setup:
//!
//! 1. **Absolute connections** ([`resolve_absolute`]).  A container without
//!    own devices inherits its parent's table unchanged.  One that re-declares
//!    devices but no connections copies the parent's connections onto the
//!    same-named devices.  Otherwise its own declarations are the table.
//!    Every link is stored under both endpoints; one-way links keep their
//!    declared direction.
//! 2. **Single expansion.**  Each entry is expanded into its single
//!    alternatives; two declarations for one ordered node pair are an error.
//! 3. **Capability-driven reduction.**  For every bound capability, each
//!    alternative between the capability's device and its bound device that
//!    is incompatible with the capability's requirement is dropped.
//!
//! Results are cached on the container controller, so each container is
//! reduced at most once per session.

use tracing::{debug, warn};

use testbed_core::{
    Connection, ConnectionMetadata, ConnectionTable, ContainerId, DeviceId, EndpointRef,
    ResolutionWarning, ResolveError, ResolvedConnections,
};

use super::binding::{active_binding, resolve_requirements};
use super::session::ResolutionSession;

// ── Pass 1: absolute connections ──────────────────────────────────────────────

/// Absolute connections of `container`, parents first.
///
/// # Errors
///
/// Propagates failures of the parent container.
pub fn resolve_absolute(
    session: &mut ResolutionSession<'_>,
    container: ContainerId,
) -> Result<ConnectionTable, ResolveError> {
    let graph = session.graph();
    if let Some(table) = session.registry().container(graph, container).absolute() {
        return Ok(table.clone());
    }

    let decl = graph.container(container);
    let parent_table = match decl.parents.first() {
        Some(parent) => Some(resolve_absolute(session, *parent)?),
        None => None,
    };
    let own_connections = decl
        .devices
        .iter()
        .any(|d| !graph.device(*d).connections.is_empty());

    let mut warnings = Vec::new();
    let table = match parent_table {
        Some(parent) if decl.devices.is_empty() => {
            debug!("{} inherits its parent's connections", decl.name);
            parent
        }
        Some(parent) if !own_connections => {
            if !parent.is_empty() {
                let message = format!(
                    "re-declares devices without connections; copying {} parent connection(s) onto same-named devices",
                    parent.len() / 2
                );
                warn!("{}: {message}", decl.name);
                warnings.push(ResolutionWarning::new(decl.name.clone(), message));
            }
            let visible = session.visible_devices(container);
            parent.remapped(|d| {
                let name = &graph.device(d).name;
                visible.iter().copied().find(|v| graph.device(*v).name == *name)
            })
        }
        _ => own_table(session, container),
    };

    session
        .registry()
        .container(graph, container)
        .set_absolute(table.clone(), warnings);
    Ok(table)
}

fn own_table(session: &mut ResolutionSession<'_>, container: ContainerId) -> ConnectionTable {
    let graph = session.graph();
    let mut table = ConnectionTable::new();
    for device in &graph.container(container).devices {
        for decl in &graph.device(*device).connections {
            let from = EndpointRef::new(*device, decl.from_node.clone());
            let to = EndpointRef::new(decl.to, decl.to_node.clone());
            if decl.bidirectional {
                table.insert_symmetric(from, to, &decl.connection);
            } else {
                let one_way = decl
                    .connection
                    .clone()
                    .with_metadata(ConnectionMetadata::unidirectional(from.clone(), to.clone()));
                table.insert_symmetric(from, to, &one_way);
            }
        }
    }
    table
}

// ── Passes 2 and 3 ────────────────────────────────────────────────────────────

/// Runs the whole pipeline for `container` and caches the result.
///
/// # Errors
///
/// - [`ResolveError::Connection`] for duplicate declarations.
/// - [`ResolveError::UnclearAssignableConnection`] when several parallel
///   connections fit one capability.
/// - [`ResolveError::ConnectionIntersection`] when a capability leaves no
///   alternative between its devices.
pub fn resolve_connections(
    session: &mut ResolutionSession<'_>,
    container: ContainerId,
) -> Result<ResolvedConnections, ResolveError> {
    let graph = session.graph();
    if let Some(resolved) = session.registry().container(graph, container).resolved() {
        return Ok(resolved.clone());
    }

    let absolute = resolve_absolute(session, container)?;
    let mut singles = absolute.expand_singles()?;
    let mut warnings = session
        .registry()
        .container(graph, container)
        .absolute_warnings()
        .to_vec();

    for device in session.visible_devices(container) {
        for (attr, instance) in session.device_capabilities(device) {
            let Some(binding) = active_binding(session, container, device, &attr) else {
                continue;
            };
            let capability = graph.instance(instance).capability;
            let requirements = resolve_requirements(session, capability)?;
            let Some(requirement) = requirements.get(&binding.logical_device) else {
                continue;
            };
            let label = format!("{}.{attr}", graph.device_path(device));
            reduce_pair(
                session,
                &mut singles,
                PairRequirement {
                    capability: &label,
                    from: device,
                    to: binding.target,
                    requirement,
                },
                &mut warnings,
            )?;
        }
    }

    let resolved = ResolvedConnections { singles, warnings };
    session
        .registry()
        .container(graph, container)
        .set_resolved(resolved.clone());
    Ok(resolved)
}

/// One capability requirement between two devices.
struct PairRequirement<'a> {
    capability: &'a str,
    from: DeviceId,
    to: DeviceId,
    requirement: &'a Connection,
}

/// Drops every alternative between the two devices that is incompatible with
/// the requirement.
///
/// An alternative is kept when it is contained in the requirement or the
/// requirement is contained in it (`compatible_with`): a richer declared link
/// still serves a capability that asks for less.
fn reduce_pair(
    session: &ResolutionSession<'_>,
    singles: &mut ConnectionTable,
    pair: PairRequirement<'_>,
    warnings: &mut Vec<ResolutionWarning>,
) -> Result<(), ResolveError> {
    let graph = session.graph();
    let node_pairs = singles.node_pairs(pair.from, pair.to);
    if node_pairs.is_empty() {
        return Ok(());
    }

    let from_label = graph.device_path(pair.from);
    let to_label = graph.device_path(pair.to);

    // Ambiguity is decided on the unreduced table.
    let matching = node_pairs
        .iter()
        .filter(|(a, b)| singles.get(a, b).iter().any(|s| s.compatible_with(pair.requirement)))
        .count();
    if node_pairs.len() > 1 && matching > 1 {
        return Err(ResolveError::UnclearAssignableConnection {
            capability: pair.capability.to_string(),
            from: from_label,
            to: to_label,
            requirement: pair.requirement.to_string(),
            matching,
        });
    }
    if matching == 0 {
        return Err(ResolveError::ConnectionIntersection {
            capability: pair.capability.to_string(),
            from: from_label,
            to: to_label,
            requirement: pair.requirement.to_string(),
        });
    }

    for (a, b) in node_pairs {
        let before = singles.get(&a, &b).len();
        let kept: Vec<Connection> = singles
            .get(&a, &b)
            .iter()
            .filter(|s| s.compatible_with(pair.requirement))
            .cloned()
            .collect();
        if kept.len() == before {
            continue;
        }
        if kept.is_empty() {
            let message = format!(
                "connection {a} <-> {b} removed: incompatible with `{}` required by {}",
                pair.requirement, pair.capability
            );
            warn!("{message}");
            warnings.push(ResolutionWarning::new(format!("{from_label} <-> {to_label}"), message));
        } else {
            debug!("{a} <-> {b}: {} of {before} alternative(s) kept for {}", kept.len(), pair.capability);
        }
        singles.set_symmetric(&a, &b, kept);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::{DeclarationGraph, GraphBuilder};

    fn conn(text: &str) -> Connection {
        text.parse().unwrap()
    }

    struct Pair {
        graph: DeclarationGraph,
        scenario: ContainerId,
        a: DeviceId,
        b: DeviceId,
    }

    /// Scenario with devices A and B, a capability on A bound to B requiring
    /// `requirement`, and the given `(from_node, to_node, connection)` links.
    fn bound_pair(requirement: &str, links: &[(&str, &str, &str)]) -> Pair {
        let mut builder = GraphBuilder::new();
        let cap = builder.add_capability("Messaging").unwrap();
        let peer = builder.add_logical_device(cap, "Peer").unwrap();
        builder.require_connection(peer, conn(requirement)).unwrap();
        let scenario = builder.add_scenario("Scenario").unwrap();
        let a = builder.add_device(scenario, "A").unwrap();
        let b = builder.add_device(scenario, "B").unwrap();
        let inst = builder.attach_capability(a, "msg", cap).unwrap();
        builder.bind(inst, "Peer", b).unwrap();
        for (from_node, to_node, text) in links {
            builder
                .connect_nodes(EndpointRef::new(a, *from_node), EndpointRef::new(b, *to_node), conn(text))
                .unwrap();
        }
        Pair {
            graph: builder.build().unwrap(),
            scenario,
            a,
            b,
        }
    }

    // ── pass 1 ────────────────────────────────────────────────────────────────

    #[test]
    fn test_absolute_connections_are_symmetric() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp")]);
        let mut session = ResolutionSession::new(&p.graph);
        let table = resolve_absolute(&mut session, p.scenario).unwrap();
        assert_eq!(table.get(&EndpointRef::default_node(p.a), &EndpointRef::default_node(p.b)).len(), 1);
        assert_eq!(table.get(&EndpointRef::default_node(p.b), &EndpointRef::default_node(p.a)).len(), 1);
    }

    #[test]
    fn test_one_way_declaration_keeps_direction_in_both_rows() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("S").unwrap();
        let tx = b.add_device(s, "Tx").unwrap();
        let rx = b.add_device(s, "Rx").unwrap();
        b.connect_one_way(EndpointRef::default_node(tx), EndpointRef::default_node(rx), conn("serial"))
            .unwrap();
        let graph = b.build().unwrap();
        let mut session = ResolutionSession::new(&graph);

        let table = resolve_absolute(&mut session, s).unwrap();

        let seen_from_rx = table.get(&EndpointRef::default_node(rx), &EndpointRef::default_node(tx));
        let meta = seen_from_rx[0].metadata().unwrap();
        assert!(!meta.bidirectional);
        assert_eq!(meta.from, EndpointRef::default_node(tx));
        assert_eq!(meta.to, EndpointRef::default_node(rx));
    }

    #[test]
    fn test_child_without_devices_inherits_parent_table() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let d1 = b.add_device(base, "D1").unwrap();
        let d2 = b.add_device(base, "D2").unwrap();
        b.connect(d1, d2, conn("tcp")).unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let graph = b.build().unwrap();
        let mut session = ResolutionSession::new(&graph);

        let table = resolve_absolute(&mut session, child).unwrap();
        assert_eq!(table.between(d1, d2).len(), 1);
        assert!(session.registry().container(&graph, child).absolute_warnings().is_empty());
    }

    #[test]
    fn test_redeclared_devices_without_connections_copy_parent_links_with_warning() {
        // Arrange
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let d1 = b.add_device(base, "D1").unwrap();
        let d2 = b.add_device(base, "D2").unwrap();
        b.connect(d1, d2, conn("tcp")).unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let c1 = b.add_device(child, "D1").unwrap();
        b.extend_device(c1, d1).unwrap();
        let c2 = b.add_device(child, "D2").unwrap();
        b.extend_device(c2, d2).unwrap();
        let graph = b.build().unwrap();
        let mut session = ResolutionSession::new(&graph);

        // Act
        let table = resolve_absolute(&mut session, child).unwrap();

        // Assert
        assert_eq!(table.between(c1, c2).len(), 1);
        assert!(table.between(d1, d2).is_empty());
        assert_eq!(session.registry().container(&graph, child).absolute_warnings().len(), 1);
    }

    #[test]
    fn test_own_connections_replace_parent_links() {
        let mut b = GraphBuilder::new();
        let base = b.add_setup("Base").unwrap();
        let d1 = b.add_device(base, "D1").unwrap();
        let d2 = b.add_device(base, "D2").unwrap();
        b.connect(d1, d2, conn("tcp")).unwrap();
        let child = b.add_setup("Child").unwrap();
        b.extend_container(child, base).unwrap();
        let c1 = b.add_device(child, "D1").unwrap();
        b.extend_device(c1, d1).unwrap();
        let c2 = b.add_device(child, "D2").unwrap();
        b.extend_device(c2, d2).unwrap();
        b.connect(c1, c2, conn("usb")).unwrap();
        let graph = b.build().unwrap();
        let mut session = ResolutionSession::new(&graph);

        let table = resolve_absolute(&mut session, child).unwrap();
        assert_eq!(table.available_between(c1, c2), Some(conn("usb")));
    }

    // ── pass 2 ────────────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_declaration_is_an_error() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("S").unwrap();
        let d1 = b.add_device(s, "D1").unwrap();
        let d2 = b.add_device(s, "D2").unwrap();
        b.connect(d1, d2, conn("tcp")).unwrap();
        b.connect(d2, d1, conn("usb")).unwrap();
        let graph = b.build().unwrap();
        let mut session = ResolutionSession::new(&graph);

        assert!(matches!(
            resolve_connections(&mut session, s),
            Err(ResolveError::Connection(_))
        ));
    }

    // ── pass 3 ────────────────────────────────────────────────────────────────

    #[test]
    fn test_matching_single_link_survives_without_warning() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp")]);
        let mut session = ResolutionSession::new(&p.graph);
        let resolved = resolve_connections(&mut session, p.scenario).unwrap();

        let kept = resolved
            .singles
            .get(&EndpointRef::default_node(p.a), &EndpointRef::default_node(p.b));
        assert_eq!(kept.len(), 1);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_richer_declared_link_survives_weaker_requirement() {
        let p = bound_pair("tcp", &[("n0", "n0", "ipv4+tcp")]);
        let mut session = ResolutionSession::new(&p.graph);
        let resolved = resolve_connections(&mut session, p.scenario).unwrap();

        let kept = resolved
            .singles
            .get(&EndpointRef::default_node(p.a), &EndpointRef::default_node(p.b));
        assert_eq!(kept.len(), 1);
        assert!(kept[0].equal_with(&conn("ipv4+tcp"), true));
    }

    #[test]
    fn test_non_matching_parallel_link_is_removed_with_warning() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp"), ("n1", "n1", "usb")]);
        let mut session = ResolutionSession::new(&p.graph);
        let resolved = resolve_connections(&mut session, p.scenario).unwrap();

        let n1_a = EndpointRef::new(p.a, "n1");
        let n1_b = EndpointRef::new(p.b, "n1");
        assert!(resolved.singles.get(&n1_a, &n1_b).is_empty());
        assert!(resolved.singles.get(&n1_b, &n1_a).is_empty());
        assert_eq!(resolved.singles.between(p.a, p.b).len(), 1);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn test_two_matching_parallel_links_are_ambiguous() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp"), ("n1", "n1", "tcp+ipv4")]);
        let mut session = ResolutionSession::new(&p.graph);
        assert!(matches!(
            resolve_connections(&mut session, p.scenario),
            Err(ResolveError::UnclearAssignableConnection { matching: 2, .. })
        ));
    }

    #[test]
    fn test_requirement_without_viable_alternative_is_intersection_error() {
        let p = bound_pair("tcp", &[("n0", "n0", "usb")]);
        let mut session = ResolutionSession::new(&p.graph);
        assert!(matches!(
            resolve_connections(&mut session, p.scenario),
            Err(ResolveError::ConnectionIntersection { .. })
        ));
    }

    #[test]
    fn test_reduction_only_removes_alternatives() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp | usb | tcp+ipv4")]);
        let mut session = ResolutionSession::new(&p.graph);
        let before = resolve_absolute(&mut session, p.scenario)
            .unwrap()
            .expand_singles()
            .unwrap();
        let after = resolve_connections(&mut session, p.scenario).unwrap().singles;

        for (from, to, kept) in after.entries() {
            let original = before.get(&from, &to);
            for single in kept {
                assert!(original.iter().any(|o| o.equal_with(single, false)));
            }
        }
        assert!(after.len() < before.len());
    }

    #[test]
    fn test_resolved_connections_are_cached() {
        let p = bound_pair("tcp", &[("n0", "n0", "tcp")]);
        let mut session = ResolutionSession::new(&p.graph);
        resolve_connections(&mut session, p.scenario).unwrap();
        assert!(session
            .registry()
            .container(&p.graph, p.scenario)
            .resolved()
            .is_some());
    }
}
