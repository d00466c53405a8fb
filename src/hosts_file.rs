//! Hosts file parsing, rendering and atomic persistence.
//!
//! The managed region is delimited by exact marker lines. Everything
//! outside the markers is preserved byte-for-byte; the region itself is
//! owned by this tool and rewritten wholesale on every reconcile.

use std::ffi::CString;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use log::{debug, warn};

use crate::error::{HostsdError, Result};
use crate::mapping::HostnameMapping;

/// Opening marker of the managed region. Must match exactly.
pub const START_MARKER: &str = "### Start Docker Domains ###";
/// Closing marker of the managed region. Must match exactly.
pub const END_MARKER: &str = "### End Docker Domains ###";

/// Mode bits for a freshly created hosts file.
const DEFAULT_MODE: u32 = 0o644;

/// A hosts file split around its managed region.
///
/// The region's previous content is discarded at parse time; only the
/// surrounding text survives. `prefix + rendered region + suffix`
/// reassembles a complete file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostsFileDocument {
    /// Everything before the start marker, verbatim.
    pub prefix: String,
    /// Everything after the end marker, verbatim.
    pub suffix: String,
}

/// Splits raw hosts file content around the managed region.
///
/// The first exact-match start marker opens the region; the first
/// end marker after it closes it. A start marker with no closing
/// marker swallows the rest of the file as the replaceable region
/// (logged as a repair). `None` models an absent file.
pub fn parse(content: Option<&str>) -> HostsFileDocument {
    let Some(content) = content else {
        return HostsFileDocument::default();
    };

    let is_marker = |line: &str, marker: &str| line.strip_suffix('\n').unwrap_or(line) == marker;

    let mut lines = content.split_inclusive('\n');
    let mut prefix = String::new();
    while let Some(line) = lines.next() {
        if is_marker(line, START_MARKER) {
            // Region opened; everything up to the closing marker is
            // discarded, the rest is preserved suffix.
            if lines.by_ref().any(|l| is_marker(l, END_MARKER)) {
                return HostsFileDocument {
                    prefix,
                    suffix: lines.collect(),
                };
            }
            warn!("managed region is missing its end marker, replacing through end of file");
            return HostsFileDocument {
                prefix,
                suffix: String::new(),
            };
        }
        prefix.push_str(line);
    }

    // No markers at all; the whole file is preserved content.
    HostsFileDocument {
        prefix,
        suffix: String::new(),
    }
}

/// Renders the canonical managed region for a mapping.
///
/// One `{ip} {hostname}` line per address, hostnames in lexicographic
/// order, addresses ordered within each hostname. An empty mapping
/// renders bare markers, clearing any stale entries.
pub fn render(mapping: &HostnameMapping) -> String {
    let mut block = String::new();
    block.push_str(START_MARKER);
    block.push('\n');
    for (hostname, ips) in mapping {
        for ip in ips {
            block.push_str(&format!("{} {}\n", ip, hostname));
        }
    }
    block.push_str(END_MARKER);
    block.push('\n');
    block
}

/// Reassembles a full hosts file from preserved content and a rendered
/// region. A file that previously had no markers gains the region at
/// its end, separated by a newline if one was missing.
pub fn assemble(doc: &HostsFileDocument, region: &str) -> String {
    let mut out = String::with_capacity(doc.prefix.len() + region.len() + doc.suffix.len() + 1);
    out.push_str(&doc.prefix);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(region);
    out.push_str(&doc.suffix);
    out
}

/// Persists `content` to `path` via write-temp-then-rename.
///
/// The temporary file lives in the target's directory so the rename
/// stays on one filesystem. Mode bits and ownership of a pre-existing
/// target are carried over (ownership best-effort when unprivileged);
/// new files get `0644`. Any failure before the rename leaves the
/// original untouched.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let write_err = |source: std::io::Error| HostsdError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hosts".to_string());
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.sync_all()?;

        match fs::metadata(path) {
            Ok(meta) => {
                fs::set_permissions(&tmp_path, meta.permissions())?;
                if let Err(e) = chown(&tmp_path, meta.uid(), meta.gid()) {
                    warn!("could not preserve ownership of {}: {}", path.display(), e);
                }
            }
            Err(_) => {
                fs::set_permissions(&tmp_path, fs::Permissions::from_mode(DEFAULT_MODE))?;
            }
        }

        fs::rename(&tmp_path, path)?;
        debug!("wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(write_err)
}

fn chown(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated path.
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
