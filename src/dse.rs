//! Component C11: the front-end DSE — root DSE, `cn=monitor` and friends —
//! plus the LDIF file that backs the static part of the tree.
//!
//! Grounded in `ldap/servers/slapd/fedse.c` (static entries persisted back
//! to the LDIF file, synthesized entries populated at search time) and
//! `ldap/servers/slapd/rootdse.c` / `monitor.c` (what root DSE and monitor
//! searches actually return). The DSE file itself and its backend/ACL/
//! schema callback registry are out of scope (spec §1); this module treats
//! the file purely as a DN-keyed key/value store it owns the I/O for.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::conntable::ConnectionTable;
use crate::error::{FrontendError, Result};
use crate::time::Counters;

/// One LDIF entry: a DN and its `attr: value` pairs, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LdifEntry {
    pub dn: String,
    pub attrs: Vec<(String, String)>,
}

impl LdifEntry {
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(attr))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, attr: &'a str) -> impl Iterator<Item = &'a str> {
        self.attrs.iter().filter(move |(a, _)| a.eq_ignore_ascii_case(attr)).map(|(_, v)| v.as_str())
    }
}

/// A minimal LDIF reader: blank-line-separated entries, each a `dn:` line
/// followed by `attr: value` lines. Line folding and `;base64` values are
/// not supported — the front-end DSE file doesn't need them, and adding
/// general LDIF support would pull in scope this crate has no use for.
pub fn parse_ldif(input: &str) -> Vec<LdifEntry> {
    let mut entries = Vec::new();
    let mut current: Option<LdifEntry> = None;
    for line in input.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(e) = current.take() {
                entries.push(e);
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let Some((attr, value)) = line.split_once(':') else { continue };
        let value = value.strip_prefix(' ').unwrap_or(value);
        if attr.eq_ignore_ascii_case("dn") {
            if let Some(e) = current.take() {
                entries.push(e);
            }
            current = Some(LdifEntry { dn: value.to_string(), attrs: Vec::new() });
        } else if let Some(e) = current.as_mut() {
            e.attrs.push((attr.to_string(), value.to_string()));
        }
    }
    if let Some(e) = current.take() {
        entries.push(e);
    }
    entries
}

pub fn write_ldif(entries: &[LdifEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str("dn: ");
        out.push_str(&e.dn);
        out.push('\n');
        for (a, v) in &e.attrs {
            out.push_str(a);
            out.push_str(": ");
            out.push_str(v);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// DN-keyed static entry store, backed by an LDIF file on disk.
/// `persist()` writes atomically: `tmp -> fsync -> rename`, then copies the
/// new content over the `.startok` sentinel (spec §6 "Persisted state").
pub struct DseTree {
    path: PathBuf,
    startok_path: PathBuf,
    entries: HashMap<String, LdifEntry>,
    order: Vec<String>,
}

impl DseTree {
    pub fn load(path: impl AsRef<Path>) -> Result<DseTree> {
        let path = path.as_ref().to_path_buf();
        let startok_path = {
            let mut p = path.clone();
            let mut name = p.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(".startok");
            p.set_file_name(name);
            p
        };
        let content = fs::read_to_string(&path).map_err(FrontendError::Io)?;
        let mut tree = DseTree { path, startok_path, entries: HashMap::new(), order: Vec::new() };
        for entry in parse_ldif(&content) {
            tree.order.push(entry.dn.clone());
            tree.entries.insert(normalize_dn(&entry.dn), entry);
        }
        Ok(tree)
    }

    pub fn get(&self, dn: &str) -> Option<&LdifEntry> {
        self.entries.get(&normalize_dn(dn))
    }

    pub fn set_attr(&mut self, dn: &str, attr: &str, value: &str) {
        let key = normalize_dn(dn);
        let entry = self.entries.entry(key).or_insert_with(|| {
            self.order.push(dn.to_string());
            LdifEntry { dn: dn.to_string(), attrs: Vec::new() }
        });
        if let Some(existing) = entry.attrs.iter_mut().find(|(a, _)| a.eq_ignore_ascii_case(attr)) {
            existing.1 = value.to_string();
        } else {
            entry.attrs.push((attr.to_string(), value.to_string()));
        }
    }

    /// Write the tree back to `path`, then copy it over the startok
    /// sentinel recording "last known-good".
    pub fn persist(&self) -> Result<()> {
        let entries: Vec<LdifEntry> = self.order.iter().filter_map(|dn| self.entries.get(&normalize_dn(dn)).cloned()).collect();
        let content = write_ldif(&entries);
        let tmp_path = {
            let mut p = self.path.clone();
            let mut name = p.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(".tmp");
            p.set_file_name(name);
            p
        };
        fs::write(&tmp_path, &content).map_err(FrontendError::Io)?;
        let f = fs::File::open(&tmp_path).map_err(FrontendError::Io)?;
        f.sync_all().map_err(FrontendError::Io)?;
        fs::rename(&tmp_path, &self.path).map_err(FrontendError::Io)?;
        fs::copy(&self.path, &self.startok_path).map_err(FrontendError::Io)?;
        Ok(())
    }
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',').map(|rdn| rdn.trim().to_ascii_lowercase()).collect::<Vec<_>>().join(",")
}

/// Attributes root DSE modify must reject (spec §4.11).
pub const ROOT_DSE_READ_ONLY_ATTRS: &[&str] = &[
    "namingcontexts",
    "supportedcontrol",
    "supportedextension",
    "supportedsaslmechanisms",
    "supportedldapversion",
    "vendorname",
    "vendorversion",
    "subschemasubentry",
];

/// Build the synthesized root DSE entry from live subsystem state.
pub fn build_root_dse(
    naming_contexts: &[String],
    supported_controls: &[&str],
    supported_extensions: &[&str],
    supported_sasl_mechs: &[String],
    referrals: &[String],
    vendor_name: &str,
    vendor_version: &str,
) -> LdifEntry {
    let mut attrs = Vec::new();
    for nc in naming_contexts {
        attrs.push(("namingContexts".to_string(), nc.clone()));
    }
    for c in supported_controls {
        attrs.push(("supportedControl".to_string(), c.to_string()));
    }
    for e in supported_extensions {
        attrs.push(("supportedExtension".to_string(), e.to_string()));
    }
    for m in supported_sasl_mechs {
        attrs.push(("supportedSASLMechanisms".to_string(), m.clone()));
    }
    for v in ["2", "3"] {
        attrs.push(("supportedLDAPVersion".to_string(), v.to_string()));
    }
    for r in referrals {
        attrs.push(("ref".to_string(), r.clone()));
    }
    attrs.push(("vendorName".to_string(), vendor_name.to_string()));
    attrs.push(("vendorVersion".to_string(), vendor_version.to_string()));
    LdifEntry { dn: String::new(), attrs }
}

/// Build the `cn=monitor` entry from the connection table and counters.
pub fn build_monitor_entry(table: &ConnectionTable, counters: &Counters) -> LdifEntry {
    use std::sync::atomic::Ordering;
    let attrs = vec![
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("currentconnections".to_string(), table.active_count().to_string()),
        ("totalconnections".to_string(), counters.num_conns.load(Ordering::Relaxed).to_string()),
        ("opsinitiated".to_string(), counters.ops_initiated.load(Ordering::Relaxed).to_string()),
        ("opscompleted".to_string(), counters.ops_completed.load(Ordering::Relaxed).to_string()),
        ("bytesrecv".to_string(), counters.bytes_read.load(Ordering::Relaxed).to_string()),
        ("bytessent".to_string(), counters.bytes_written.load(Ordering::Relaxed).to_string()),
    ];
    LdifEntry { dn: "cn=monitor".to_string(), attrs }
}
