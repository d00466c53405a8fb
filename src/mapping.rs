//! Hostname mapping construction.
//!
//! Turns a snapshot of container/network records into the desired
//! hostname → IP mapping. Ordering is deterministic (BTree collections)
//! so re-renders of an unchanged snapshot are byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use log::warn;

/// One container's membership in one network, as reported by the
/// runtime. Rebuilt from scratch on every snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNetworkRecord {
    /// Container name without the leading slash.
    pub container_name: String,
    /// Network aliases (Compose service names, explicit aliases) plus
    /// the container hostname, when set.
    pub aliases: Vec<String>,
    /// Network this record belongs to.
    pub network: String,
    /// Addresses assigned on this network.
    pub ips: Vec<IpAddr>,
}

/// Desired hostname → address-set mapping. Hostnames include the TLD
/// and are lowercased; colliding hostnames union their IP sets.
pub type HostnameMapping = BTreeMap<String, BTreeSet<IpAddr>>;

/// Builds the desired mapping from a snapshot.
///
/// Every candidate hostname (container name and each alias, suffixed
/// with `tld`) maps to the union of the container's IPs across all
/// networks it participates in. Records with no resolvable IP are
/// skipped with a diagnostic.
pub fn build_mapping(records: &[ContainerNetworkRecord], tld: &str) -> HostnameMapping {
    // Union of IPs per container, across all of its network records.
    let mut container_ips: BTreeMap<&str, BTreeSet<IpAddr>> = BTreeMap::new();
    for record in records {
        container_ips
            .entry(record.container_name.as_str())
            .or_default()
            .extend(record.ips.iter().copied());
    }

    let mut mapping = HostnameMapping::new();
    for record in records {
        let ips = &container_ips[record.container_name.as_str()];
        if ips.is_empty() {
            warn!(
                "container {} has no resolvable IP on network {}, skipping",
                record.container_name, record.network
            );
            continue;
        }

        let names = std::iter::once(record.container_name.as_str())
            .chain(record.aliases.iter().map(String::as_str));
        for name in names {
            mapping
                .entry(qualify(name, tld))
                .or_default()
                .extend(ips.iter().copied());
        }
    }
    mapping
}

/// Appends the TLD and lowercases. An empty TLD yields the bare name.
fn qualify(name: &str, tld: &str) -> String {
    if tld.is_empty() {
        name.to_lowercase()
    } else {
        format!("{}.{}", name, tld).to_lowercase()
    }
}
