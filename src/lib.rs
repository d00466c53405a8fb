//! Keeps a hosts file in sync with running Docker containers.
//!
//! Container names, network aliases and configured hostnames become
//! `{name}.{tld}` entries inside a marker-delimited managed region of
//! the hosts file; everything outside the region is preserved
//! byte-for-byte. Reconciliation is idempotent and writes atomically
//! via write-temp-then-rename.

pub mod config;
pub mod driver;
pub mod error;
pub mod hosts_file;
pub mod mapping;
pub mod reconcile;
pub mod runtime;
pub mod types;
