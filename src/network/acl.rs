//! Peer allow-list for the Bishop control channel.
//!
//! Entries are "all", "a.b.c.d", "a.b.c.d/bits", or "a.b.c.d/e.f.g.h".

use std::net::{IpAddr, Ipv4Addr};

/// One IPv4 network; `mask == 0` matches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpMask {
    pub ip: u32,
    pub mask: u32,
}

impl IpMask {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        self.mask == 0 || (ip & self.mask) == (self.ip & self.mask)
    }
}

/// Parses one allow-list entry.
pub fn parse_ipmask(s: &str) -> Option<IpMask> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("all") {
        return Some(IpMask { ip: 0, mask: 0 });
    }
    let Some((addr, mask)) = s.split_once('/') else {
        let ip: Ipv4Addr = s.parse().ok()?;
        return Some(IpMask { ip: ip.into(), mask: u32::MAX });
    };
    let ip: Ipv4Addr = addr.parse().ok()?;
    let mask = if mask.contains('.') {
        u32::from(mask.parse::<Ipv4Addr>().ok()?)
    } else {
        let bits: u32 = mask.parse().ok()?;
        match bits {
            0 => 0,
            1..=32 => u32::MAX << (32 - bits),
            _ => return None,
        }
    };
    Some(IpMask { ip: ip.into(), mask })
}

/// Set of networks allowed to open a control session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<IpMask>,
}

impl AllowList {
    /// Parses every entry, returning the first one that fails.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        entries
            .iter()
            .map(|e| parse_ipmask(e.as_ref()).ok_or_else(|| e.as_ref().to_string()))
            .collect::<Result<Vec<_>, _>>()
            .map(|entries| Self { entries })
    }

    pub fn allow_all() -> Self {
        Self { entries: vec![IpMask { ip: 0, mask: 0 }] }
    }

    /// IPv6 peers only pass an "all" entry.
    pub fn permits(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.entries.iter().any(|m| m.contains(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => self.entries.iter().any(|m| m.contains(v4)),
                None => self.entries.iter().any(|m| m.mask == 0),
            },
        }
    }
}
