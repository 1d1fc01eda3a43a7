use ipnetwork::IpNetwork;

pub fn parse_cidr(cidr: &str) -> Result<IpNetwork, String> {
    cidr.trim()
        .parse::<IpNetwork>()
        .map_err(|e| format!("invalid subnet {:?}: {}", cidr, e))
}

/// `inner` lies entirely within `outer`
pub fn contains(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && inner.prefix() >= outer.prefix()
        && outer.contains(inner.network())
}

pub fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.is_ipv4() == b.is_ipv4() && (a.contains(b.network()) || b.contains(a.network()))
}
