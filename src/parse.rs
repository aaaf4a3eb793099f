//! Parsers for `VBoxManage` output.
//!
//! Three formats are understood:
//!
//! * `list vms`: one `"name" {uuid}` per line.
//! * `list --long vms`: one human-readable `Key:   value` block per machine.
//! * `showvminfo --machinereadable`: `key=value` lines, values optionally
//!   double-quoted (quoted values may span lines and escape `\"` / `\\`).
//!
//! Machine-readable keys are renamed through [`FIELD_NAMES`]; keys not in the
//! table are kept verbatim in [`VmInfo::extra`].

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Lines;

use thiserror::Error;

use crate::vm_state::VmState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseFailure {
    /// 1-based line number in the tool output, 0 when not tied to a line.
    pub line: usize,
    pub message: String,
}

impl ParseFailure {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Point-in-time snapshot of one machine as reported by the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmDescriptor {
    pub name: String,
    pub uuid: Option<String>,
    pub state: Option<VmState>,
    pub os_type: Option<String>,
    pub memory_mb: Option<u64>,
    pub cpu_count: Option<u32>,
}

// ── list vms ──────────────────────────────────────────────

/// Parse one `"name" {uuid}` line.
pub fn parse_brief_line(line: &str, line_no: usize) -> Result<VmDescriptor, ParseFailure> {
    let line = line.trim();
    let malformed = || ParseFailure::new(line_no, format!("expected '\"name\" {{uuid}}', got '{line}'"));

    let rest = line.strip_prefix('"').ok_or_else(malformed)?;
    let (name, uuid) = rest.rsplit_once("\" {").ok_or_else(malformed)?;
    let uuid = uuid.strip_suffix('}').ok_or_else(malformed)?.trim();
    if uuid.is_empty() {
        return Err(malformed());
    }

    Ok(VmDescriptor {
        name: name.to_string(),
        uuid: Some(uuid.to_string()),
        ..VmDescriptor::default()
    })
}

/// Lazily parse `list vms` output, skipping blank lines.
pub fn brief_records(text: &str) -> impl Iterator<Item = Result<VmDescriptor, ParseFailure>> + '_ {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_brief_line(line, i + 1))
}

// ── list --long vms ───────────────────────────────────────

/// Iterator over the machine blocks of `list --long vms`.
///
/// A block starts at an unindented `Name:` line. Shared-folder entries also
/// use `Name:` but quote the value (`Name: 'share', Host path: ...`), so
/// they do not start a block. USB device filters print an unquoted `Name:`
/// right after their `Active:` line; those stay inside the current block.
pub struct LongRecords<'a> {
    lines: Peekable<std::iter::Enumerate<Lines<'a>>>,
}

impl<'a> LongRecords<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate().peekable(),
        }
    }
}

fn split_human(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

fn starts_record(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    matches!(split_human(line), Some(("Name", value)) if !value.starts_with('\''))
}

impl Iterator for LongRecords<'_> {
    type Item = Result<VmDescriptor, ParseFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, first) = loop {
            let (idx, line) = self.lines.next()?;
            if !line.trim().is_empty() {
                break (idx, line);
            }
        };
        if !starts_record(first) {
            return Some(Err(ParseFailure::new(
                idx + 1,
                format!("expected a 'Name:' line, got '{}'", first.trim()),
            )));
        }

        let mut vm = VmDescriptor::default();
        if let Some((_, name)) = split_human(first) {
            vm.name = name.to_string();
        }

        let mut prev_key = None;
        while let Some((_, line)) = self
            .lines
            .next_if(|(_, l)| prev_key == Some("Active") || !starts_record(l))
        {
            let Some((key, value)) = split_human(line) else {
                continue;
            };
            prev_key = Some(key);
            if value.is_empty() {
                continue;
            }
            match key {
                "UUID" => vm.uuid = Some(value.to_string()),
                "Guest OS" => vm.os_type = Some(value.to_string()),
                "State" => vm.state = Some(VmState::from_human(value)),
                "Memory size" => vm.memory_mb = parse_megabytes(value),
                "Number of CPUs" => vm.cpu_count = value.parse().ok(),
                _ => {}
            }
        }

        Some(Ok(vm))
    }
}

/// `2048MB`, `2048 MB` or `2048`.
fn parse_megabytes(value: &str) -> Option<u64> {
    let digits = value.trim().trim_end_matches(|c: char| c.is_ascii_alphabetic());
    digits.trim().parse().ok()
}

// ── showvminfo --machinereadable ──────────────────────────

/// Machine-readable key → field name. Matching is case-insensitive and also
/// accepts the field name itself, so already-normalised input round-trips.
pub const FIELD_NAMES: &[(&str, &str)] = &[
    ("name", "Name"),
    ("UUID", "UUID"),
    ("groups", "Groups"),
    ("ostype", "OSType"),
    ("description", "Description"),
    ("CfgFile", "ConfigFile"),
    ("SnapFldr", "SnapshotFolder"),
    ("LogFldr", "LogFolder"),
    ("memory", "Memory"),
    ("vram", "VRAM"),
    ("cpus", "CPUs"),
    ("firmware", "Firmware"),
    ("chipset", "Chipset"),
    ("VMState", "State"),
    ("VMStateChangeTime", "StateChangeTime"),
    ("nic1", "NIC1"),
    ("macaddress1", "MACAddress1"),
    ("bridgeadapter1", "BridgeAdapter1"),
    ("hostonlyadapter1", "HostOnlyAdapter1"),
    ("cableconnected1", "CableConnected1"),
    ("vrde", "VRDE"),
    ("CurrentSnapshotName", "CurrentSnapshot"),
];

fn field_name(key: &str) -> Option<&'static str> {
    FIELD_NAMES
        .iter()
        .find(|(tool, field)| tool.eq_ignore_ascii_case(key) || field.eq_ignore_ascii_case(key))
        .map(|(_, field)| *field)
}

/// Structured `showvminfo` result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmInfo {
    /// Known keys under their field names.
    pub fields: BTreeMap<String, String>,
    /// Keys missing from [`FIELD_NAMES`], verbatim.
    pub extra: BTreeMap<String, String>,
}

impl VmInfo {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn state(&self) -> Option<VmState> {
        self.get("State").map(VmState::from_machine)
    }

    pub fn descriptor(&self) -> VmDescriptor {
        VmDescriptor {
            name: self.get("Name").unwrap_or_default().to_string(),
            uuid: self.get("UUID").map(str::to_string),
            state: self.state(),
            os_type: self.get("OSType").map(str::to_string),
            memory_mb: self.get("Memory").and_then(parse_megabytes),
            cpu_count: self.get("CPUs").and_then(|v| v.trim().parse().ok()),
        }
    }

    fn insert(&mut self, key: &str, value: String) {
        let (map, key) = match field_name(key) {
            Some(field) => (&mut self.fields, field.to_string()),
            None => (&mut self.extra, key.to_string()),
        };
        if let Some(previous) = map.insert(key.clone(), value) {
            tracing::debug!(%key, %previous, "duplicate key, keeping last value");
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse `showvminfo --machinereadable` output.
pub fn parse_machine_readable(text: &str) -> Result<VmInfo, ParseFailure> {
    let mut info = VmInfo::default();
    // (key, accumulated raw value, line the value started on)
    let mut pending: Option<(String, String, usize)> = None;

    for (idx, line) in text.lines().enumerate() {
        if let Some((key, mut raw, start)) = pending.take() {
            raw.push('\n');
            raw.push_str(line);
            if quote_closed(&raw) {
                info.insert(&key, unquote(&raw));
            } else {
                pending = Some((key, raw, start));
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            tracing::debug!(line = idx + 1, "skipping line without '='");
            continue;
        };
        let key = unquote(key.trim());
        if key.is_empty() {
            tracing::debug!(line = idx + 1, "skipping line with empty key");
            continue;
        }
        let value = value.trim();
        if value.starts_with('"') && !quote_closed(value) {
            pending = Some((key, value.to_string(), idx + 1));
        } else {
            info.insert(&key, unquote(value));
        }
    }

    if let Some((key, _, start)) = pending {
        return Err(ParseFailure::new(
            start,
            format!("unterminated quoted value for '{key}'"),
        ));
    }
    if info.is_empty() {
        return Err(ParseFailure::new(0, "no key=value pairs in output"));
    }
    Ok(info)
}

/// A quoted value is closed when it ends in a quote that is not escaped.
fn quote_closed(raw: &str) -> bool {
    if raw.len() < 2 || !raw.ends_with('"') {
        return false;
    }
    let body = &raw[..raw.len() - 1];
    let backslashes = body.chars().rev().take_while(|c| *c == '\\').count();
    backslashes % 2 == 0
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
