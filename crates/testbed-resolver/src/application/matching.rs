//! Variation matching: which scenario runs on which setup, and how.
//!
//! For a `(scenario, setup)` pair both containers are first reduced.  Then
//! every injective mapping of scenario devices onto setup devices is tried.
//! A mapping survives when, in this order:
//!
//! 1. every scenario capability has exactly one implementation on the mapped
//!    setup device,
//! 2. every scenario binding is honoured by the implementation,
//! 3. every capability a bound logical device needs exists on the bound
//!    setup device,
//! 4. every scenario connection has at least one route through the setup,
//! 5. every bound capability finds a compatible connection towards its
//!    bound device.
//!
//! The first failing check becomes the discard reason of the mapping.
//!
//! # How a test uses the result (for beginners)
//!
//! A [`Variation`] is what the execution layer runs.  Tests talk to scenario
//! devices; the variation translates a scenario device into its setup device
//! ([`Variation::mapping`]), tells which setup implementation serves each
//! capability ([`Variation::binding`]), and picks the method variant for a
//! call ([`Variation::resolve_variant`]).

use std::collections::BTreeMap;

use tracing::{debug, info};

use testbed_core::{
    Connection, ConnectionTable, ContainerId, DeviceId, EndpointRef, HierarchyError, InstanceId,
    ResolveError,
};

use super::binding::{active_binding, resolve_requirements, resolve_variant};
use super::hierarchy::validate_hierarchy;
use super::reduction::resolve_connections;
use super::routing::{route_through, RoutingPath};
use super::session::ResolutionSession;

/// Scenario device → setup device.
pub type DeviceMapping = BTreeMap<DeviceId, DeviceId>;

/// One scenario connection realized in the setup.
#[derive(Debug, Clone)]
pub struct VariationConnection {
    /// Scenario endpoints.
    pub from: EndpointRef,
    pub to: EndpointRef,
    /// What the scenario asks for between the two endpoints.
    pub requirement: Connection,
    /// Union of what the routes deliver, without metadata.
    pub connection: Connection,
    pub routes: Vec<RoutingPath>,
}

/// A scenario capability and the setup implementation serving it.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub scenario_device: DeviceId,
    pub attr: String,
    pub scenario_instance: InstanceId,
    pub implementation: InstanceId,
    /// Setup device carrying the implementation.
    pub device: DeviceId,
    /// Active binding, `None` for unbound capabilities.
    pub logical_device: Option<String>,
    /// Setup device the logical device is bound to.
    pub target: Option<DeviceId>,
    /// Connection available towards `target`.
    pub available: Option<Connection>,
}

/// An applicable `(scenario, setup, mapping)` combination.
#[derive(Debug, Clone)]
pub struct Variation {
    pub scenario: ContainerId,
    pub setup: ContainerId,
    pub mapping: DeviceMapping,
    pub connections: Vec<VariationConnection>,
    pub bindings: Vec<ResolvedBinding>,
}

impl Variation {
    pub fn binding(&self, scenario_device: DeviceId, attr: &str) -> Option<&ResolvedBinding> {
        self.bindings
            .iter()
            .find(|b| b.scenario_device == scenario_device && b.attr == attr)
    }

    /// Variant of `method` to call for the capability at `attr` of
    /// `scenario_device`.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::UnknownAttribute`] if the device has no such
    ///   capability.
    /// - [`ResolveError::Unbound`] if the capability has no active binding.
    /// - [`ResolveError::UnclearVariant`] from variant resolution.
    pub fn resolve_variant(
        &self,
        session: &mut ResolutionSession<'_>,
        scenario_device: DeviceId,
        attr: &str,
        method: &str,
    ) -> Result<String, ResolveError> {
        let graph = session.graph();
        let binding = self
            .binding(scenario_device, attr)
            .ok_or_else(|| ResolveError::UnknownAttribute {
                device: graph.device_path(scenario_device),
                attr: attr.to_string(),
            })?;
        let (Some(logical_device), Some(available)) = (&binding.logical_device, &binding.available) else {
            return Err(ResolveError::Unbound {
                instance: graph.instance_path(binding.implementation),
            });
        };
        let capability = graph.instance(binding.implementation).capability;
        resolve_variant(session, capability, method, logical_device, available)
    }
}

/// A mapping that failed one of the checks.
#[derive(Debug, Clone)]
pub struct DiscardedVariation {
    pub mapping: DeviceMapping,
    pub reason: ResolveError,
}

/// Everything resolved for one `(scenario, setup)` pair.
#[derive(Debug, Clone)]
pub struct PairResolution {
    pub scenario: ContainerId,
    pub setup: ContainerId,
    pub applicable: Vec<Variation>,
    pub discarded: Vec<DiscardedVariation>,
    /// Set when reducing either container failed; no mapping was tried.
    pub pair_error: Option<ResolveError>,
}

impl PairResolution {
    pub fn is_applicable(&self) -> bool {
        !self.applicable.is_empty()
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Validates the hierarchy once, then resolves every scenario against every
/// setup in id order.
///
/// # Errors
///
/// Any [`HierarchyError`]; pairing failures are recorded, not returned.
pub fn resolve_all(session: &mut ResolutionSession<'_>) -> Result<Vec<PairResolution>, HierarchyError> {
    validate_hierarchy(session)?;

    let graph = session.graph();
    let scenarios: Vec<ContainerId> = graph.scenarios().map(|c| c.id).collect();
    let setups: Vec<ContainerId> = graph.setups().map(|c| c.id).collect();

    let mut results = Vec::with_capacity(scenarios.len() * setups.len());
    for scenario in &scenarios {
        for setup in &setups {
            let resolution = resolve_pair(session, *scenario, *setup);
            info!(
                "{} on {}: {} applicable, {} discarded{}",
                graph.container(*scenario).name,
                graph.container(*setup).name,
                resolution.applicable.len(),
                resolution.discarded.len(),
                resolution
                    .pair_error
                    .as_ref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            );
            results.push(resolution);
        }
    }
    Ok(results)
}

/// Resolves one `(scenario, setup)` pair.
pub fn resolve_pair(
    session: &mut ResolutionSession<'_>,
    scenario: ContainerId,
    setup: ContainerId,
) -> PairResolution {
    let mut resolution = PairResolution {
        scenario,
        setup,
        applicable: Vec::new(),
        discarded: Vec::new(),
        pair_error: None,
    };

    let reduced = resolve_connections(session, scenario)
        .and_then(|s| resolve_connections(session, setup).map(|t| (s, t)));
    let (scenario_connections, setup_connections) = match reduced {
        Ok(pair) => pair,
        Err(err) => {
            resolution.pair_error = Some(err);
            return resolution;
        }
    };

    let scenario_devices = session.visible_devices(scenario);
    let setup_devices = session.visible_devices(setup);
    let tables = Tables {
        scenario: &scenario_connections.singles,
        setup: &setup_connections.singles,
    };

    for mapping in injective_mappings(&scenario_devices, &setup_devices) {
        match check_mapping(session, scenario, setup, &mapping, &tables) {
            Ok((connections, bindings)) => resolution.applicable.push(Variation {
                scenario,
                setup,
                mapping,
                connections,
                bindings,
            }),
            Err(reason) => {
                debug!("mapping discarded: {reason}");
                resolution.discarded.push(DiscardedVariation { mapping, reason });
            }
        }
    }
    resolution
}

/// Every injective mapping of `from` into `to`, in ascending order.
pub fn injective_mappings(from: &[DeviceId], to: &[DeviceId]) -> Vec<DeviceMapping> {
    fn extend(
        from: &[DeviceId],
        to: &[DeviceId],
        used: &mut Vec<bool>,
        current: &mut DeviceMapping,
        out: &mut Vec<DeviceMapping>,
    ) {
        let Some((first, rest)) = from.split_first() else {
            out.push(current.clone());
            return;
        };
        for (i, target) in to.iter().enumerate() {
            if used[i] {
                continue;
            }
            used[i] = true;
            current.insert(*first, *target);
            extend(rest, to, used, current, out);
            current.remove(first);
            used[i] = false;
        }
    }

    let mut out = Vec::new();
    if from.len() <= to.len() {
        extend(from, to, &mut vec![false; to.len()], &mut DeviceMapping::new(), &mut out);
    }
    out
}

// ── Checks ────────────────────────────────────────────────────────────────────

struct Tables<'a> {
    scenario: &'a ConnectionTable,
    setup: &'a ConnectionTable,
}

fn check_mapping(
    session: &mut ResolutionSession<'_>,
    scenario: ContainerId,
    setup: ContainerId,
    mapping: &DeviceMapping,
    tables: &Tables<'_>,
) -> Result<(Vec<VariationConnection>, Vec<ResolvedBinding>), ResolveError> {
    let mut bindings = implementations(session, mapping)?;
    for binding in &mut bindings {
        check_binding(session, scenario, setup, mapping, binding)?;
    }
    for binding in &bindings {
        check_logical_device_capabilities(session, binding)?;
    }
    let connections = route_connections(session, mapping, tables)?;
    for binding in &mut bindings {
        check_binding_connectivity(session, mapping, binding, &connections, tables)?;
    }
    Ok((connections, bindings))
}

/// Picks the single implementation of every scenario capability.
fn implementations(
    session: &mut ResolutionSession<'_>,
    mapping: &DeviceMapping,
) -> Result<Vec<ResolvedBinding>, ResolveError> {
    let graph = session.graph();
    let mut resolved = Vec::new();
    for (scenario_device, setup_device) in mapping {
        let offered = session.device_capabilities(*setup_device);
        for (attr, instance) in session.device_capabilities(*scenario_device) {
            let wanted = graph.instance(instance).capability;
            let candidates: Vec<InstanceId> = offered
                .values()
                .copied()
                .filter(|i| graph.is_capability_subtype(graph.instance(*i).capability, wanted))
                .collect();
            let implementation = match candidates.as_slice() {
                [] => {
                    return Err(ResolveError::MissingCapability {
                        device: graph.device_path(*setup_device),
                        capability: graph.capability(wanted).name.clone(),
                    })
                }
                [only] => *only,
                several => {
                    return Err(ResolveError::AmbiguousImplementation {
                        device: graph.device_path(*setup_device),
                        capability: graph.capability(wanted).name.clone(),
                        candidates: several.iter().map(|i| graph.instance_path(*i)).collect(),
                    })
                }
            };
            resolved.push(ResolvedBinding {
                scenario_device: *scenario_device,
                attr,
                scenario_instance: instance,
                implementation,
                device: *setup_device,
                logical_device: None,
                target: None,
                available: None,
            });
        }
    }
    Ok(resolved)
}

/// Fills in the active binding, checking it against the scenario's.
fn check_binding(
    session: &mut ResolutionSession<'_>,
    scenario: ContainerId,
    setup: ContainerId,
    mapping: &DeviceMapping,
    binding: &mut ResolvedBinding,
) -> Result<(), ResolveError> {
    let graph = session.graph();
    let impl_attr = graph.instance(binding.implementation).attr.clone();
    let wanted = active_binding(session, scenario, binding.scenario_device, &binding.attr);
    let declared = active_binding(session, setup, binding.device, &impl_attr);

    let (logical_device, target) = match (wanted, declared) {
        (None, None) => return Ok(()),
        (None, Some(own)) => (own.logical_device, own.target),
        (Some(wanted), declared) => {
            let Some(mapped) = mapping.get(&wanted.target).copied() else {
                return Err(ResolveError::Unbound {
                    instance: graph.instance_path(binding.scenario_instance),
                });
            };
            if let Some(own) = declared {
                if own.logical_device != wanted.logical_device || own.target != mapped {
                    return Err(ResolveError::BindingMismatch {
                        instance: graph.instance_path(binding.implementation),
                        expected: format!("{} -> {}", wanted.logical_device, graph.device_path(mapped)),
                        found: format!("{} -> {}", own.logical_device, graph.device_path(own.target)),
                    });
                }
            }
            (wanted.logical_device, mapped)
        }
    };
    binding.logical_device = Some(logical_device);
    binding.target = Some(target);
    Ok(())
}

/// Every capability the active logical device needs must exist on the bound
/// setup device.
fn check_logical_device_capabilities(
    session: &mut ResolutionSession<'_>,
    binding: &ResolvedBinding,
) -> Result<(), ResolveError> {
    let (Some(name), Some(target)) = (&binding.logical_device, binding.target) else {
        return Ok(());
    };
    let graph = session.graph();
    let capability = graph.instance(binding.implementation).capability;
    let Some(logical_device) = session.capability_logical_devices(capability).get(name).copied() else {
        return Ok(());
    };
    let offered = session.device_capabilities(target);
    for instance in session.logical_device_capabilities(logical_device).into_values() {
        let wanted = graph.instance(instance).capability;
        let implemented = offered
            .values()
            .any(|i| graph.is_capability_subtype(graph.instance(*i).capability, wanted));
        if !implemented {
            return Err(ResolveError::MissingCapability {
                device: graph.device_path(target),
                capability: graph.capability(wanted).name.clone(),
            });
        }
    }
    Ok(())
}

/// Routes every reduced scenario connection through the setup.
fn route_connections(
    session: &ResolutionSession<'_>,
    mapping: &DeviceMapping,
    tables: &Tables<'_>,
) -> Result<Vec<VariationConnection>, ResolveError> {
    let graph = session.graph();
    let endpoint_label = |e: &EndpointRef| format!("{}.{}", graph.device_path(e.device), e.node);

    let mut connections = Vec::new();
    for (from, to, singles) in tables.scenario.entries() {
        // Each link is stored twice; route it once.
        if from.device >= to.device || singles.is_empty() {
            continue;
        }
        // One-way links are routed in their declared direction and may use
        // one-way setup links; the others need a path usable both ways.
        let (from, to, bidirectional) = match singles[0].metadata() {
            Some(meta) if !meta.bidirectional => (meta.from.clone(), meta.to.clone(), false),
            _ => (from, to, true),
        };
        let (Some(start), Some(target)) = (mapping.get(&from.device), mapping.get(&to.device)) else {
            continue;
        };
        let requirement = Connection::based_on(singles.iter().map(|s| s.clone().without_metadata()))?;
        let mut routes = route_through(tables.setup, &requirement, *start, *target);
        if bidirectional {
            routes.retain(RoutingPath::is_bidirectional);
        }
        let delivered: Vec<Connection> = routes
            .iter()
            .filter_map(|r| r.resolved_connection(&requirement))
            .map(Connection::without_metadata)
            .collect();
        if delivered.is_empty() {
            return Err(ResolveError::NoRoute {
                from: endpoint_label(&from),
                to: endpoint_label(&to),
                requirement: requirement.to_string(),
            });
        }
        connections.push(VariationConnection {
            from,
            to,
            connection: Connection::based_on(delivered)?,
            requirement,
            routes,
        });
    }
    Ok(connections)
}

/// The connection towards the bound device must be compatible with the
/// capability's requirement.
fn check_binding_connectivity(
    session: &mut ResolutionSession<'_>,
    mapping: &DeviceMapping,
    binding: &mut ResolvedBinding,
    connections: &[VariationConnection],
    tables: &Tables<'_>,
) -> Result<(), ResolveError> {
    let (Some(name), Some(target)) = (binding.logical_device.clone(), binding.target) else {
        return Ok(());
    };
    let graph = session.graph();
    let capability = graph.instance(binding.implementation).capability;
    let requirements = resolve_requirements(session, capability)?;
    let Some(requirement) = requirements.get(&name) else {
        return Ok(());
    };

    // A routed scenario connection between the two devices takes precedence
    // over a direct setup link.
    let scenario_target = mapping.iter().find(|(_, m)| **m == target).map(|(s, _)| *s);
    let routed: Vec<Connection> = connections
        .iter()
        .filter(|c| {
            let ends = [c.from.device, c.to.device];
            scenario_target.is_some_and(|t| ends.contains(&t)) && ends.contains(&binding.scenario_device)
        })
        .map(|c| c.connection.clone())
        .collect();
    let available = if routed.is_empty() {
        tables.setup.available_between(binding.device, target)
    } else {
        Some(Connection::based_on(routed)?)
    };

    match available {
        Some(available) if available.compatible_with(requirement) => {
            binding.available = Some(available);
            Ok(())
        }
        _ => Err(ResolveError::ConnectionIntersection {
            capability: graph.instance_path(binding.implementation),
            from: graph.device_path(binding.device),
            to: graph.device_path(target),
            requirement: requirement.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::{DeclarationGraph, GraphBuilder};

    fn conn(text: &str) -> Connection {
        text.parse().unwrap()
    }

    // ── injective_mappings ────────────────────────────────────────────────────

    #[test]
    fn test_injective_mappings_enumerates_in_order() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("S").unwrap();
        let d: Vec<DeviceId> = ["A", "B", "C"].iter().map(|n| b.add_device(s, n).unwrap()).collect();

        let mappings = injective_mappings(&d[..2], &d);
        assert_eq!(mappings.len(), 6);
        assert_eq!(mappings[0], DeviceMapping::from([(d[0], d[0]), (d[1], d[1])]));
        assert_eq!(mappings[1], DeviceMapping::from([(d[0], d[0]), (d[1], d[2])]));
        assert_eq!(mappings[5], DeviceMapping::from([(d[0], d[2]), (d[1], d[1])]));
    }

    #[test]
    fn test_injective_mappings_more_sources_than_targets_is_empty() {
        let mut b = GraphBuilder::new();
        let s = b.add_setup("S").unwrap();
        let d: Vec<DeviceId> = ["A", "B"].iter().map(|n| b.add_device(s, n).unwrap()).collect();
        assert!(injective_mappings(&d, &d[..1]).is_empty());
    }

    #[test]
    fn test_injective_mappings_empty_source_has_one_empty_mapping() {
        assert_eq!(injective_mappings(&[], &[]), vec![DeviceMapping::new()]);
    }

    // ── resolve_pair ──────────────────────────────────────────────────────────

    struct Fixture {
        graph: DeclarationGraph,
        scenario: ContainerId,
        setup: ContainerId,
        sender: DeviceId,
    }

    /// Scenario `Sender --tcp--> Receiver` with `Sender.msg` bound to the
    /// receiver; setup `Host`, `Phone` and `Printer` where only `Host`
    /// implements messaging and only `Host - Phone` is wired.
    fn fixture() -> Fixture {
        let mut b = GraphBuilder::new();
        let messaging = b.add_capability("Messaging").unwrap();
        let peer = b.add_logical_device(messaging, "Peer").unwrap();
        b.require_connection(peer, conn("tcp")).unwrap();
        b.add_variant(messaging, "send", "send_tcp", [("Peer", conn("tcp"))]).unwrap();

        let scenario = b.add_scenario("Ping").unwrap();
        let sender = b.add_device(scenario, "Sender").unwrap();
        let receiver = b.add_device(scenario, "Receiver").unwrap();
        let msg = b.attach_capability(sender, "msg", messaging).unwrap();
        b.bind(msg, "Peer", receiver).unwrap();
        b.connect(sender, receiver, conn("tcp")).unwrap();

        let setup = b.add_setup("Lab").unwrap();
        let host = b.add_device(setup, "Host").unwrap();
        let phone = b.add_device(setup, "Phone").unwrap();
        b.add_device(setup, "Printer").unwrap();
        b.attach_capability(host, "messenger", messaging).unwrap();
        b.connect(host, phone, conn("tcp+ipv4 | usb")).unwrap();

        Fixture {
            graph: b.build().unwrap(),
            scenario,
            setup,
            sender,
        }
    }

    #[test]
    fn test_resolve_pair_keeps_only_wired_implementing_mapping() {
        // Arrange
        let f = fixture();
        let mut session = ResolutionSession::new(&f.graph);

        // Act
        let resolution = resolve_pair(&mut session, f.scenario, f.setup);

        // Assert
        assert!(resolution.pair_error.is_none());
        assert_eq!(resolution.applicable.len(), 1);
        assert_eq!(resolution.discarded.len(), 5);
        let variation = &resolution.applicable[0];
        let host = f.graph.device_by_name(f.setup, "Host").unwrap();
        let phone = f.graph.device_by_name(f.setup, "Phone").unwrap();
        assert_eq!(variation.mapping[&f.sender], host);
        let binding = variation.binding(f.sender, "msg").unwrap();
        assert_eq!(binding.target, Some(phone));
        assert_eq!(binding.logical_device.as_deref(), Some("Peer"));
        assert_eq!(variation.connections.len(), 1);
    }

    #[test]
    fn test_resolve_pair_discard_reasons_follow_check_order() {
        let f = fixture();
        let mut session = ResolutionSession::new(&f.graph);
        let resolution = resolve_pair(&mut session, f.scenario, f.setup);
        let host = f.graph.device_by_name(f.setup, "Host").unwrap();

        for discarded in &resolution.discarded {
            if discarded.mapping[&f.sender] == host {
                // Host implements the capability; the receiver lacks a route.
                assert!(matches!(discarded.reason, ResolveError::NoRoute { .. }), "{:?}", discarded.reason);
            } else {
                assert!(matches!(discarded.reason, ResolveError::MissingCapability { .. }));
            }
        }
    }

    #[test]
    fn test_variation_resolves_method_variant() {
        let f = fixture();
        let mut session = ResolutionSession::new(&f.graph);
        let resolution = resolve_pair(&mut session, f.scenario, f.setup);
        let variation = &resolution.applicable[0];

        let label = variation.resolve_variant(&mut session, f.sender, "msg", "send").unwrap();
        assert_eq!(label, "send_tcp");
        assert!(matches!(
            variation.resolve_variant(&mut session, f.sender, "nope", "send"),
            Err(ResolveError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_resolve_all_covers_every_pair() {
        let f = fixture();
        let mut session = ResolutionSession::new(&f.graph);
        let results = resolve_all(&mut session).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_applicable());
    }
}
