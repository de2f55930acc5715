use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, info_span, warn, Span};

/// Index of the last octet of an IPv4 address.
pub const LAST_OCTET: usize = 3;

/// Upper bound on hosts taken from one IPv6 range (a /112).
pub const MAX_IPV6_HOSTS: usize = 1 << 16;

/// Expands CIDR ranges and single addresses into a flat list of scan targets.
///
/// Malformed entries are dropped with a warning rather than failing the
/// whole expansion. When an exclusion set is configured, any address whose
/// last octet is in the set is filtered out, whichever entry produced it.
#[derive(Debug, Clone)]
pub struct AddressEnumerator {
    exclude: Option<HashSet<String>>,
    span: Span,
}

impl AddressEnumerator {
    pub fn new(exclude: Option<HashSet<String>>) -> Self {
        Self::with_span(exclude, info_span!("address_enumerator"))
    }

    pub fn with_span(exclude: Option<HashSet<String>>, span: Span) -> Self {
        Self { exclude, span }
    }

    pub fn exclude(&self) -> Option<&HashSet<String>> {
        self.exclude.as_ref()
    }

    /// Expand every entry in `ranges`, preserving input order.
    pub fn expand<S: AsRef<str>>(&self, ranges: &[S]) -> Vec<IpAddr> {
        self.span.in_scope(|| {
            let mut out = Vec::new();
            for entry in ranges {
                let entry = entry.as_ref();
                let parsed = self.parse_entry(entry);
                debug!(entry, count = parsed.len(), "added addresses");
                out.extend(parsed);
            }
            out
        })
    }

    /// Parse one entry: network first, then a single address, else nothing.
    pub fn parse_entry(&self, entry: &str) -> Vec<IpAddr> {
        let addresses = if let Ok(net) = entry.parse::<IpNet>() {
            let hosts = expand_cidr_to_ips(net);
            debug!(entry, hosts = hosts.len(), "parsed as network");
            hosts
        } else if let Ok(ip) = entry.parse::<IpAddr>() {
            debug!(entry, "parsed as single address");
            vec![ip]
        } else {
            warn!(entry, "failed to parse as network or address, skipping");
            Vec::new()
        };

        match &self.exclude {
            Some(skips) if !skips.is_empty() => addresses
                .into_iter()
                .filter(|ip| !skips.contains(&last_octet(ip)))
                .collect(),
            _ => addresses,
        }
    }
}

/// Free-function form of [`AddressEnumerator::expand`].
pub fn expand<S: AsRef<str>>(ranges: &[S], exclude: Option<&HashSet<String>>) -> Vec<IpAddr> {
    AddressEnumerator::new(exclude.cloned()).expand(ranges)
}

/// Expand a CIDR into the usable host addresses of that network.
///
/// For IPv4, excludes the network and broadcast addresses, except for /31
/// and /32 where every address is a host. For IPv6, excludes the
/// subnet-router anycast address below /127. IPv6 ranges wider than a /112
/// are truncated to their first [`MAX_IPV6_HOSTS`] hosts.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => n4.hosts().map(IpAddr::V4).collect(),
        IpNet::V6(n6) => {
            if n6.max_prefix_len() - n6.prefix_len() > 16 {
                warn!(
                    network = %n6,
                    cap = MAX_IPV6_HOSTS,
                    "IPv6 range too large, truncating host list"
                );
            }
            n6.hosts().take(MAX_IPV6_HOSTS).map(IpAddr::V6).collect()
        }
    }
}

/// Correlation key of an address at the given octet position.
///
/// IPv4 addresses yield the decimal octet at `position` (clamped to the last
/// octet). IPv6 addresses yield their final 16-bit segment in hex, which is
/// the closest analogue of a host position.
pub fn correlation_key(ip: &IpAddr, position: usize) -> String {
    match ip {
        IpAddr::V4(v4) => v4.octets()[position.min(LAST_OCTET)].to_string(),
        IpAddr::V6(v6) => format!("{:x}", v6.segments()[7]),
    }
}

/// The last octet of an address as a string.
pub fn last_octet(ip: &IpAddr) -> String {
    correlation_key(ip, LAST_OCTET)
}
