//! The reconciliation engine.
//!
//! Stateless across invocations: the hosts file on disk is the only
//! persistent state. Repeated reconciles with an unchanged mapping
//! compare byte-for-byte equal and perform zero writes.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::Result;
use crate::hosts_file;
use crate::mapping::HostnameMapping;

/// Result of a single reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The file already matches the desired mapping.
    Unchanged,
    /// Dry-run: the content that would have been written.
    WouldWrite(String),
    /// The file was rewritten atomically.
    Written(PathBuf),
}

/// Merges desired hostname mappings into a hosts file, preserving all
/// content outside the managed region.
#[derive(Debug, Clone)]
pub struct Reconciler {
    path: PathBuf,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
        }
    }

    /// Target hosts file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Computes the new file content for `mapping` and writes it if it
    /// differs from what is on disk. An empty mapping is valid and
    /// clears the managed region.
    pub fn reconcile(&self, mapping: &HostnameMapping) -> Result<ReconcileOutcome> {
        let current = match fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let doc = hosts_file::parse(current.as_deref());
        let region = hosts_file::render(mapping);
        let assembled = hosts_file::assemble(&doc, &region);

        if current.as_deref() == Some(assembled.as_str()) {
            debug!("{} already up to date", self.path.display());
            return Ok(ReconcileOutcome::Unchanged);
        }

        if self.dry_run {
            return Ok(ReconcileOutcome::WouldWrite(assembled));
        }

        hosts_file::atomic_write(&self.path, &assembled)?;
        info!(
            "updated {} with {} hostname(s)",
            self.path.display(),
            mapping.len()
        );
        Ok(ReconcileOutcome::Written(self.path.clone()))
    }
}
