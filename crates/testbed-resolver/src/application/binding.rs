//! Binding and variant resolution for capability instances.
//!
//! Three questions are answered here:
//!
//! 1. **Which connection does a capability need towards each of its logical
//!    devices?**  [`resolve_requirements`] takes the explicit requirement when
//!    one is declared, otherwise the parent type's resolved value, otherwise
//!    the OR of what the type's own method variants accept.  Synthesized
//!    values are recorded as hints.
//! 2. **Which device is a capability instance bound to?**  [`active_binding`]
//!    looks at the instance and, failing that, at the same attribute on the
//!    device's ancestors, and re-resolves the target by name in the container
//!    being resolved.
//! 3. **Which method variant applies?**  [`resolve_variant`] collects every
//!    variant whose condition for the active logical device is contained in
//!    the available connection and keeps the most specific one, falling back
//!    to the parent type when the type itself has no candidate.

use std::collections::BTreeMap;

use tracing::{debug, info};

use testbed_core::registry::controller::VariantKey;
use testbed_core::{
    CapabilityId, Connection, ContainerId, DeclarationGraph, DeviceId, ResolutionWarning,
    ResolveError,
};

use super::session::ResolutionSession;

// ── Requirements ──────────────────────────────────────────────────────────────

/// Resolved requirement per logical-device name of `capability`.
///
/// Parent types are resolved first; results and hints are cached on the
/// capability controller.
///
/// # Errors
///
/// [`ResolveError::Connection`] if variant conditions cannot be combined.
pub fn resolve_requirements(
    session: &mut ResolutionSession<'_>,
    capability: CapabilityId,
) -> Result<BTreeMap<String, Connection>, ResolveError> {
    let graph = session.graph();
    if let Some(cached) = session.registry().capability(graph, capability).requirements() {
        return Ok(cached.clone());
    }

    let decl = graph.capability(capability);
    let inherited = match decl.parents.first() {
        Some(parent) => resolve_requirements(session, *parent)?,
        None => BTreeMap::new(),
    };

    let mut requirements = BTreeMap::new();
    let mut hints = Vec::new();
    for (name, ld) in session.capability_logical_devices(capability) {
        let requirement = if let Some(explicit) = &graph.logical_device(ld).requirement {
            explicit.clone()
        } else if let Some(parent_value) = inherited.get(&name) {
            parent_value.clone()
        } else {
            let (synthesized, message) = synthesize_requirement(graph, capability, &name)?;
            info!("{}.{name}: {message}", decl.name);
            hints.push(ResolutionWarning::new(format!("{}.{name}", decl.name), message));
            synthesized
        };
        requirements.insert(name, requirement);
    }

    session
        .registry()
        .capability(graph, capability)
        .set_requirements(requirements.clone(), hints);
    Ok(requirements)
}

/// OR of the own variant conditions mentioning `logical_device`, or the bare
/// link when no variant does.
fn synthesize_requirement(
    graph: &DeclarationGraph,
    capability: CapabilityId,
    logical_device: &str,
) -> Result<(Connection, String), ResolveError> {
    let decl = graph.capability(capability);
    let conditions: Vec<Connection> = decl
        .methods
        .iter()
        .flat_map(|m| &m.variants)
        .flat_map(|v| &v.conditions)
        .filter(|c| c.logical_device == logical_device)
        .map(|c| c.connection.clone())
        .collect();

    if conditions.is_empty() {
        return Ok((
            Connection::bare(),
            "no explicit requirement and no variant condition; assuming any connection".to_string(),
        ));
    }
    let count = conditions.len();
    let union = Connection::based_on(conditions)?;
    let message = format!(
        "no explicit requirement; using `{union}` synthesized from {count} variant condition(s)"
    );
    Ok((union, message))
}

// ── Active binding ────────────────────────────────────────────────────────────

/// The binding in effect for a capability attribute of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBinding {
    pub logical_device: String,
    /// Target device, visible in the container the binding was resolved for.
    pub target: DeviceId,
}

/// Active binding of the capability at `attr` on `device`, resolved for
/// `container`.
///
/// The nearest binding along the device's specialization chain wins.  A
/// target declared in an ancestor container is replaced by the device of the
/// same name visible in `container`.
pub fn active_binding(
    session: &mut ResolutionSession<'_>,
    container: ContainerId,
    device: DeviceId,
    attr: &str,
) -> Option<ActiveBinding> {
    let graph = session.graph();
    let declared = graph.device_ancestry(device).into_iter().find_map(|d| {
        graph
            .device(d)
            .capabilities
            .iter()
            .map(|i| graph.instance(*i))
            .find(|i| i.attr == attr)
            .and_then(|i| i.binding.clone())
    })?;

    let target_name = graph.device(declared.target).name.as_str();
    let target = session
        .visible_device_by_name(container, target_name)
        .unwrap_or(declared.target);
    Some(ActiveBinding {
        logical_device: declared.logical_device,
        target,
    })
}

// ── Variant selection ─────────────────────────────────────────────────────────

/// Outcome of picking the outermost candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<T> {
    None,
    One(T, Connection),
    /// Candidates surviving elimination, in input order.
    Ambiguous(Vec<T>),
}

/// Keeps the candidates no other candidate strictly dominates.
///
/// Candidate `a` is dominated by `b` when `a`'s connection is contained in
/// `b`'s but not the other way round: `b` matched a more specific connection.
/// Two distinct candidates with equivalent connections dominate neither
/// each other, so both survive and the result is ambiguous.
pub fn select_outermost<T>(candidates: Vec<(T, Connection)>) -> Selection<T> {
    let dominated: Vec<bool> = candidates
        .iter()
        .enumerate()
        .map(|(i, (_, mine))| {
            candidates.iter().enumerate().any(|(j, (_, other))| {
                i != j && mine.contained_in(other, true) && !other.contained_in(mine, true)
            })
        })
        .collect();

    let mut survivors: Vec<(T, Connection)> = candidates
        .into_iter()
        .zip(dominated)
        .filter(|(_, d)| !d)
        .map(|(c, _)| c)
        .collect();

    match survivors.len() {
        0 => Selection::None,
        1 => {
            let (item, connection) = survivors.remove(0);
            Selection::One(item, connection)
        }
        _ => Selection::Ambiguous(survivors.into_iter().map(|(item, _)| item).collect()),
    }
}

/// Label of the variant of `method` that applies when `logical_device` is
/// active and `available` is the connection towards its bound device.
///
/// # Errors
///
/// [`ResolveError::UnclearVariant`] when no type in the chain has a matching
/// variant, or when more than one outermost candidate remains.
pub fn resolve_variant(
    session: &mut ResolutionSession<'_>,
    capability: CapabilityId,
    method: &str,
    logical_device: &str,
    available: &Connection,
) -> Result<String, ResolveError> {
    let graph = session.graph();
    let key = VariantKey {
        method: method.to_string(),
        logical_device: logical_device.to_string(),
        available: available.canonical_key(),
    };
    if let Some(label) = session.registry().capability(graph, capability).cached_variant(&key) {
        debug!("variant cache hit for {}::{method}", graph.capability(capability).name);
        return Ok(label.to_string());
    }

    let decl = graph.capability(capability);
    let mut candidates: Vec<(String, Connection)> = Vec::new();
    for variant in decl.method(method).into_iter().flat_map(|m| &m.variants) {
        let matched: Vec<Connection> = variant
            .conditions
            .iter()
            .filter(|c| c.logical_device == logical_device && c.connection.contained_in(available, true))
            .map(|c| c.connection.clone())
            .collect();
        if !matched.is_empty() {
            candidates.push((variant.label.clone(), Connection::based_on(matched)?));
        }
    }

    let label = match select_outermost(candidates) {
        Selection::One(label, _) => label,
        Selection::None => match decl.parents.first() {
            Some(parent) => resolve_variant(session, *parent, method, logical_device, available)?,
            None => {
                return Err(ResolveError::UnclearVariant {
                    capability: decl.name.clone(),
                    method: method.to_string(),
                    logical_device: logical_device.to_string(),
                    candidates: Vec::new(),
                })
            }
        },
        Selection::Ambiguous(labels) => {
            return Err(ResolveError::UnclearVariant {
                capability: decl.name.clone(),
                method: method.to_string(),
                logical_device: logical_device.to_string(),
                candidates: labels,
            })
        }
    };

    session
        .registry()
        .capability(graph, capability)
        .cache_variant(key, label.clone());
    Ok(label)
}
