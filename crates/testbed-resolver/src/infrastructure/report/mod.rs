//! Report rendering: applicable and discarded variations as text or JSON.
//!
//! [`build_report`] turns resolution results, which are full of ids, into
//! plain name-based DTOs.  The DTOs derive `Serialize` for JSON output and
//! implement `Display` for the human-readable form.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use testbed_core::{DeclarationGraph, EndpointRef, ResolutionWarning};

use crate::application::matching::{DeviceMapping, PairResolution, Variation};
use crate::application::routing::RoutingPath;
use crate::application::ResolutionSession;
use crate::infrastructure::storage::config::OutputFormat;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub pairs: Vec<PairReport>,
    /// Reduction warnings and requirement hints collected during the run.
    pub warnings: Vec<ResolutionWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub scenario: String,
    pub setup: String,
    pub applicable: Vec<VariationReport>,
    /// Only filled when discarded variations were requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub discarded: Vec<DiscardedReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariationReport {
    /// Scenario device name → setup device path.
    pub mapping: BTreeMap<String, String>,
    pub connections: Vec<ConnectionReport>,
    pub bindings: Vec<BindingReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub from: String,
    pub to: String,
    pub requirement: String,
    pub connection: String,
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingReport {
    pub capability: String,
    pub implementation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscardedReport {
    pub mapping: BTreeMap<String, String>,
    pub reason: String,
}

// ── Building ──────────────────────────────────────────────────────────────────

/// Builds the report for one run.
pub fn build_report(
    session: &mut ResolutionSession<'_>,
    run_id: Uuid,
    resolutions: &[PairResolution],
    show_discarded: bool,
) -> Report {
    let graph = session.graph();
    let pairs = resolutions
        .iter()
        .map(|r| PairReport {
            scenario: graph.container(r.scenario).name.clone(),
            setup: graph.container(r.setup).name.clone(),
            applicable: r.applicable.iter().map(|v| variation_report(graph, v)).collect(),
            discarded: if show_discarded {
                r.discarded
                    .iter()
                    .map(|d| DiscardedReport {
                        mapping: mapping_report(graph, &d.mapping),
                        reason: d.reason.to_string(),
                    })
                    .collect()
            } else {
                Vec::new()
            },
            error: r.pair_error.as_ref().map(ToString::to_string),
        })
        .collect();

    Report {
        run_id,
        pairs,
        warnings: collect_warnings(session),
    }
}

fn collect_warnings(session: &mut ResolutionSession<'_>) -> Vec<ResolutionWarning> {
    let graph = session.graph();
    let mut warnings = Vec::new();
    for container in graph.containers() {
        if let Some(resolved) = session.registry().container(graph, container.id).resolved() {
            warnings.extend(resolved.warnings.iter().cloned());
        }
    }
    for capability in graph.capabilities() {
        warnings.extend(
            session
                .registry()
                .capability(graph, capability.id)
                .hints()
                .iter()
                .cloned(),
        );
    }
    warnings
}

fn mapping_report(graph: &DeclarationGraph, mapping: &DeviceMapping) -> BTreeMap<String, String> {
    mapping
        .iter()
        .map(|(s, t)| (graph.device(*s).name.clone(), graph.device_path(*t)))
        .collect()
}

fn endpoint_label(graph: &DeclarationGraph, endpoint: &EndpointRef) -> String {
    format!("{}.{}", graph.device_path(endpoint.device), endpoint.node)
}

fn route_label(graph: &DeclarationGraph, route: &RoutingPath) -> String {
    std::iter::once(route.start())
        .chain(route.links().iter().filter_map(|l| l.metadata()).map(|m| &m.to))
        .map(|e| endpoint_label(graph, e))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn variation_report(graph: &DeclarationGraph, variation: &Variation) -> VariationReport {
    VariationReport {
        mapping: mapping_report(graph, &variation.mapping),
        connections: variation
            .connections
            .iter()
            .map(|c| ConnectionReport {
                from: endpoint_label(graph, &c.from),
                to: endpoint_label(graph, &c.to),
                requirement: c.requirement.to_string(),
                connection: c.connection.to_string(),
                routes: c.routes.iter().map(|r| route_label(graph, r)).collect(),
            })
            .collect(),
        bindings: variation
            .bindings
            .iter()
            .map(|b| BindingReport {
                capability: graph.instance_path(b.scenario_instance),
                implementation: graph.instance_path(b.implementation),
                logical_device: b.logical_device.clone(),
                target: b.target.map(|t| graph.device_path(t)),
                available: b.available.as_ref().map(ToString::to_string),
            })
            .collect(),
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Renders `report` in the requested format.
///
/// # Errors
///
/// [`ReportError::Json`] if JSON serialization fails.
pub fn render(report: &Report, format: OutputFormat) -> Result<String, ReportError> {
    match format {
        OutputFormat::Text => Ok(report.to_string()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn write_mapping(f: &mut fmt::Formatter<'_>, mapping: &BTreeMap<String, String>) -> fmt::Result {
    let pairs: Vec<String> = mapping.iter().map(|(s, t)| format!("{s} -> {t}")).collect();
    write!(f, "{}", pairs.join(", "))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        for pair in &self.pairs {
            writeln!(f)?;
            let status = if pair.applicable.is_empty() { "not applicable" } else { "applicable" };
            writeln!(f, "{} on {}: {status}", pair.scenario, pair.setup)?;
            if let Some(error) = &pair.error {
                writeln!(f, "  error: {error}")?;
            }
            for (i, variation) in pair.applicable.iter().enumerate() {
                write!(f, "  variation {}: ", i + 1)?;
                write_mapping(f, &variation.mapping)?;
                writeln!(f)?;
                for c in &variation.connections {
                    writeln!(f, "    {} <-> {}: `{}` over `{}`", c.from, c.to, c.requirement, c.connection)?;
                    for route in &c.routes {
                        writeln!(f, "      via {route}")?;
                    }
                }
                for b in &variation.bindings {
                    write!(f, "    {} => {}", b.capability, b.implementation)?;
                    if let (Some(ld), Some(target)) = (&b.logical_device, &b.target) {
                        write!(f, " ({ld} -> {target})")?;
                    }
                    writeln!(f)?;
                }
            }
            for discarded in &pair.discarded {
                write!(f, "  discarded ")?;
                write_mapping(f, &discarded.mapping)?;
                writeln!(f, ": {}", discarded.reason)?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}
