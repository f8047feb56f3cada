//! Integration tests for the reduction pipeline and the router.
//!
//! Every test builds its own declaration graph and session, so no state is
//! shared between tests.

use testbed_core::{
    Connection, ContainerId, DeclarationGraph, DeviceId, EndpointRef, GraphBuilder, ResolveError,
};
use testbed_resolver::application::reduction::{resolve_absolute, resolve_connections};
use testbed_resolver::application::routing::{route_through, RouteError, RoutingPath};
use testbed_resolver::application::ResolutionSession;

fn conn(text: &str) -> Connection {
    text.parse().expect("fixture connection must parse")
}

struct TwoDevices {
    graph: DeclarationGraph,
    scenario: ContainerId,
    a: DeviceId,
    b: DeviceId,
}

/// Scenario `A`/`B`, a capability on `A` whose `Peer` is bound to `B` and
/// requires `requirement`, plus one link per `(node, connection)` entry.
fn two_devices(requirement: &str, links: &[(&str, &str)]) -> TwoDevices {
    let mut builder = GraphBuilder::new();
    let cap = builder.add_capability("Messaging").unwrap();
    let peer = builder.add_logical_device(cap, "Peer").unwrap();
    builder.require_connection(peer, conn(requirement)).unwrap();

    let scenario = builder.add_scenario("Scenario").unwrap();
    let a = builder.add_device(scenario, "A").unwrap();
    let b = builder.add_device(scenario, "B").unwrap();
    let instance = builder.attach_capability(a, "msg", cap).unwrap();
    builder.bind(instance, "Peer", b).unwrap();
    for (node, text) in links {
        builder
            .connect_nodes(EndpointRef::new(a, *node), EndpointRef::new(b, *node), conn(text))
            .unwrap();
    }

    TwoDevices {
        graph: builder.build().unwrap(),
        scenario,
        a,
        b,
    }
}

// ── Reduction ─────────────────────────────────────────────────────────────────

#[test]
fn test_single_matching_link_survives_reduction_without_warning() {
    // Arrange
    let f = two_devices("tcp", &[("n0", "tcp")]);
    let mut session = ResolutionSession::new(&f.graph);

    // Act
    let resolved = resolve_connections(&mut session, f.scenario).unwrap();

    // Assert
    let forward = resolved.singles.get(&EndpointRef::new(f.a, "n0"), &EndpointRef::new(f.b, "n0"));
    let backward = resolved.singles.get(&EndpointRef::new(f.b, "n0"), &EndpointRef::new(f.a, "n0"));
    assert_eq!(forward.len(), 1);
    assert_eq!(backward.len(), 1);
    assert_eq!(forward[0], conn("tcp"));
    assert!(resolved.warnings.is_empty());
}

#[test]
fn test_parallel_link_not_matching_requirement_is_removed_with_warning() {
    let f = two_devices("tcp", &[("n0", "tcp"), ("n1", "usb")]);
    let mut session = ResolutionSession::new(&f.graph);

    let resolved = resolve_connections(&mut session, f.scenario).unwrap();

    assert!(resolved
        .singles
        .get(&EndpointRef::new(f.a, "n1"), &EndpointRef::new(f.b, "n1"))
        .is_empty());
    assert_eq!(
        resolved
            .singles
            .get(&EndpointRef::new(f.a, "n0"), &EndpointRef::new(f.b, "n0"))
            .len(),
        1
    );
    assert_eq!(resolved.warnings.len(), 1);
    assert!(resolved.warnings[0].message.contains("removed"));
}

#[test]
fn test_parallel_links_both_matching_requirement_is_ambiguous() {
    let f = two_devices("tcp", &[("n0", "tcp"), ("n1", "tcp+ipv4")]);
    let mut session = ResolutionSession::new(&f.graph);

    let err = resolve_connections(&mut session, f.scenario).unwrap_err();

    assert!(matches!(err, ResolveError::UnclearAssignableConnection { matching: 2, .. }));
    // Nothing was reduced or cached.
    assert!(session
        .registry()
        .container(&f.graph, f.scenario)
        .resolved()
        .is_none());
}

#[test]
fn test_reduction_never_adds_alternatives() {
    let f = two_devices("tcp", &[("n0", "tcp+ipv4 | usb | can & hid")]);
    let mut session = ResolutionSession::new(&f.graph);
    let before = resolve_absolute(&mut session, f.scenario)
        .unwrap()
        .expand_singles()
        .unwrap();

    let after = resolve_connections(&mut session, f.scenario).unwrap().singles;

    for (from, to, kept) in after.entries() {
        let original = before.get(&from, &to);
        assert!(kept.iter().all(|k| original.iter().any(|o| o.equal_with(k, false))));
    }
}

// ── Routing ───────────────────────────────────────────────────────────────────

struct Chain {
    graph: DeclarationGraph,
    setup: ContainerId,
    devices: [DeviceId; 3],
}

/// Setup `Device1 - Device2 - Device3`, bidirectional default-node links.
fn chain(link: &str) -> Chain {
    let mut b = GraphBuilder::new();
    let setup = b.add_setup("ChainSetup").unwrap();
    let d1 = b.add_device(setup, "Device1").unwrap();
    let d2 = b.add_device(setup, "Device2").unwrap();
    let d3 = b.add_device(setup, "Device3").unwrap();
    b.connect(d1, d2, conn(link)).unwrap();
    b.connect(d2, d3, conn(link)).unwrap();
    Chain {
        graph: b.build().unwrap(),
        setup,
        devices: [d1, d2, d3],
    }
}

#[test]
fn test_route_through_chain_returns_exactly_one_path() {
    // Arrange
    let f = chain("tcp");
    let mut session = ResolutionSession::new(&f.graph);
    let table = resolve_connections(&mut session, f.setup).unwrap().singles;
    let requirement = conn("tcp");
    let [d1, d2, d3] = f.devices;

    // Act
    let paths = route_through(&table, &requirement, d1, d3);

    // Assert
    assert_eq!(paths.len(), 1);
    let path = &paths[0];
    let hops: Vec<DeviceId> = path
        .links()
        .iter()
        .map(|l| l.metadata().unwrap().to.device)
        .collect();
    assert_eq!(hops, vec![d2, d3]);
    let resolved = path.resolved_connection(&requirement).unwrap();
    assert!(resolved.equal_with(&requirement, true));
}

#[test]
fn test_route_through_is_direction_agnostic_for_bidirectional_links() {
    let f = chain("tcp");
    let mut session = ResolutionSession::new(&f.graph);
    let table = resolve_connections(&mut session, f.setup).unwrap().singles;
    let [d1, _, d3] = f.devices;

    assert_eq!(route_through(&table, &conn("tcp"), d3, d1).len(), 1);
}

#[test]
fn test_route_through_one_way_link_is_not_direction_agnostic() {
    // Arrange
    let mut b = GraphBuilder::new();
    let setup = b.add_setup("Bench").unwrap();
    let x = b.add_device(setup, "X").unwrap();
    let y = b.add_device(setup, "Y").unwrap();
    b.connect_one_way(EndpointRef::default_node(x), EndpointRef::default_node(y), conn("tcp"))
        .unwrap();
    let graph = b.build().unwrap();
    let mut session = ResolutionSession::new(&graph);
    let table = resolve_connections(&mut session, setup).unwrap().singles;

    // Act
    let forwards = route_through(&table, &conn("tcp"), x, y);
    let backwards = route_through(&table, &conn("tcp"), y, x);

    // Assert
    assert_eq!(forwards.len(), 1);
    assert!(!forwards[0].is_bidirectional());
    assert!(backwards.is_empty());
}

#[test]
fn test_route_through_nested_or_requirement_uses_weaker_alternative() {
    let f = chain("tcp");
    let mut session = ResolutionSession::new(&f.graph);
    let table = resolve_connections(&mut session, f.setup).unwrap().singles;
    let [d1, _, d3] = f.devices;
    let requirement = conn("tcp | tcp+ipv4");

    let paths = route_through(&table, &requirement, d1, d3);

    assert_eq!(paths.len(), 1);
    let resolved = paths[0].resolved_connection(&requirement).unwrap();
    assert_eq!(resolved.canonical_key(), "tcp");
}

#[test]
fn test_appending_mismatched_link_is_chain_break_naming_both_endpoints() {
    let f = chain("tcp");
    let mut session = ResolutionSession::new(&f.graph);
    let table = resolve_connections(&mut session, f.setup).unwrap().singles;
    let [d1, d2, d3] = f.devices;
    let link = table.get(&EndpointRef::default_node(d2), &EndpointRef::default_node(d3))[0].clone();
    let mut path = RoutingPath::new(EndpointRef::default_node(d1));

    let err = path.append(&link).unwrap_err();

    let expected = RouteError::ChainBreak {
        path_end: EndpointRef::default_node(d1).to_string(),
        link_start: EndpointRef::default_node(d2).to_string(),
    };
    assert_eq!(err, expected);
    let message = err.to_string();
    assert!(message.contains(&EndpointRef::default_node(d1).to_string()));
    assert!(message.contains(&EndpointRef::default_node(d2).to_string()));
}
