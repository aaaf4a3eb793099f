//! Prints façade outcomes as text or JSON.

use std::collections::BTreeMap;

use facet::Facet;

use crate::cli::OutputFormat;
use crate::error::VbmError;
use crate::facade::{Outcome, VmInfoReport, VmListing};
use crate::parse::{VmDescriptor, VmInfo};
use crate::request::Operation;

// ── JSON output structs ─────────────────────────────────────────────

#[derive(Facet)]
struct ActionJson {
    operation: String,
    name: String,
    uuid: Option<String>,
}

#[derive(Facet)]
struct VmJson {
    name: String,
    uuid: Option<String>,
    state: Option<String>,
    running: Option<bool>,
    os_type: Option<String>,
    memory_mb: Option<u64>,
    cpus: Option<u32>,
}

#[derive(Facet)]
struct InfoJson {
    name: String,
    summary: VmJson,
    fields: BTreeMap<String, String>,
    extra: BTreeMap<String, String>,
}

#[derive(Facet)]
struct VersionJson {
    tool: String,
    version: String,
}

impl From<VmDescriptor> for VmJson {
    fn from(vm: VmDescriptor) -> Self {
        Self {
            name: vm.name,
            running: vm.state.as_ref().map(|s| s.is_running()),
            state: vm.state.map(|s| s.to_string()),
            uuid: vm.uuid,
            os_type: vm.os_type,
            memory_mb: vm.memory_mb,
            cpus: vm.cpu_count,
        }
    }
}

fn to_json<T: Facet<'static>>(value: &T) -> Result<String, VbmError> {
    facet_json::to_string(value).map_err(|e| VbmError::Io {
        context: "serializing JSON output".into(),
        source: std::io::Error::other(e.to_string()),
    })
}

// ── rendering ───────────────────────────────────────────────────────

/// Render an outcome to a string ready for stdout.
pub fn render(outcome: &Outcome, format: OutputFormat, tool: &str) -> Result<String, VbmError> {
    match format {
        OutputFormat::Text => render_text(outcome),
        OutputFormat::Json => render_json(outcome, tool),
    }
}

fn render_text(outcome: &Outcome) -> Result<String, VbmError> {
    Ok(match outcome {
        Outcome::Created { name, uuid } => format!("VM '{name}' created (UUID {uuid}).\n"),
        Outcome::Completed { operation, name } => {
            let verb = match operation {
                Operation::Delete => "deleted",
                Operation::Start => "started",
                Operation::Stop => "stopping",
                Operation::Clone => "cloned",
                Operation::Create => "created",
                Operation::List | Operation::Info | Operation::Probe => "done",
            };
            format!("VM '{name}' {verb}.\n")
        }
        Outcome::Listing(listing) => with_newline(listing.raw()),
        Outcome::Info {
            report: VmInfoReport::Text(text),
            ..
        } => with_newline(text),
        Outcome::Info {
            report: VmInfoReport::Structured(info),
            ..
        } => info_lines(info),
        Outcome::Version(version) => format!("{version}\n"),
    })
}

fn render_json(outcome: &Outcome, tool: &str) -> Result<String, VbmError> {
    let json = match outcome {
        Outcome::Created { name, uuid } => to_json(&ActionJson {
            operation: "create".into(),
            name: name.clone(),
            uuid: Some(uuid.clone()),
        })?,
        Outcome::Completed { operation, name } => to_json(&ActionJson {
            operation: operation.to_string(),
            name: name.clone(),
            uuid: None,
        })?,
        Outcome::Listing(listing) => to_json(&listing_json(listing)?)?,
        Outcome::Info { name, report } => {
            let info = match report {
                VmInfoReport::Structured(info) => info.clone(),
                VmInfoReport::Text(text) => {
                    // Text report under JSON output: keep the raw output as one field.
                    let mut info = VmInfo::default();
                    info.extra.insert("text".into(), text.clone());
                    info
                }
            };
            let mut summary = VmJson::from(info.descriptor());
            if summary.name.is_empty() {
                summary.name = name.clone();
            }
            to_json(&InfoJson {
                name: name.clone(),
                summary,
                fields: info.fields,
                extra: info.extra,
            })?
        }
        Outcome::Version(version) => to_json(&VersionJson {
            tool: tool.to_string(),
            version: version.clone(),
        })?,
    };
    Ok(format!("{json}\n"))
}

fn listing_json(listing: &VmListing) -> Result<Vec<VmJson>, VbmError> {
    listing
        .iter()
        .map(|vm| vm.map(VmJson::from))
        .collect()
}

fn info_lines(info: &VmInfo) -> String {
    let width = info
        .fields
        .keys()
        .chain(info.extra.keys())
        .map(String::len)
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for (key, value) in info.fields.iter().chain(info.extra.iter()) {
        out.push_str(&format!("{key:<width$}  {value}\n"));
    }
    out
}

fn with_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
