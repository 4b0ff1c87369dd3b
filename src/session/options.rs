//! Session options and their compatibility rules.
//!
//! Options are value types compared structurally during join negotiation:
//! the joiner proposes a set, the service offered a set at bind time, and
//! the join succeeds only when the two are compatible.

use serde::{Deserialize, Serialize};

/// Kind of traffic a session carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    /// Framed bus messages (default).
    #[default]
    Messages,
    /// Raw reliable byte stream.
    RawReliable,
    /// Raw unreliable datagrams.
    RawUnreliable,
}

/// Physical proximity constraint bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProximityMask(pub u8);

impl ProximityMask {
    /// No proximity allowed (rejects everything).
    pub const NONE: Self = Self(0x00);
    /// Same physical device.
    pub const PHYSICAL: Self = Self(0x01);
    /// Same local network.
    pub const NETWORK: Self = Self(0x02);
    /// Any proximity.
    pub const ANY: Self = Self(0xFF);

    /// Whether the two masks share at least one proximity class.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for ProximityMask {
    fn default() -> Self {
        Self::ANY
    }
}

/// Allowed-transports bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportMask(pub u16);

impl TransportMask {
    /// No transport (an advertisement over this mask is unreachable).
    pub const NONE: Self = Self(0x0000);
    /// Local loopback transport.
    pub const LOCAL: Self = Self(0x0001);
    /// TCP transport.
    pub const TCP: Self = Self(0x0004);
    /// UDP transport.
    pub const UDP: Self = Self(0x0100);
    /// Any transport.
    pub const ANY: Self = Self(0xFFFF);

    /// Whether the two masks share at least one transport.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the mask selects no transport at all.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for TransportMask {
    fn default() -> Self {
        Self::ANY
    }
}

/// Negotiable parameters of a session.
///
/// Value type; compared structurally during join negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Traffic kind carried by the session.
    #[serde(default)]
    pub traffic: TrafficKind,
    /// Whether more than one peer may join the same session.
    #[serde(default)]
    pub multipoint: bool,
    /// Acceptable physical proximity of peers.
    #[serde(default)]
    pub proximity: ProximityMask,
    /// Transports the session may run over.
    #[serde(default)]
    pub transports: TransportMask,
}

impl SessionOptions {
    /// Whether a proposed option set can form a session with this one.
    ///
    /// Traffic kind and multipoint mode must match exactly; proximity and
    /// transport masks must intersect.
    pub fn is_compatible(&self, proposed: &SessionOptions) -> bool {
        self.traffic == proposed.traffic
            && self.multipoint == proposed.multipoint
            && self.proximity.intersects(proposed.proximity)
            && self.transports.intersects(proposed.transports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_compatible() {
        let offered = SessionOptions::default();
        let proposed = SessionOptions::default();
        assert!(offered.is_compatible(&proposed));
        assert_eq!(offered, proposed);
    }

    #[test]
    fn test_traffic_mismatch_incompatible() {
        let offered = SessionOptions::default();
        let proposed = SessionOptions {
            traffic: TrafficKind::RawReliable,
            ..SessionOptions::default()
        };
        assert!(!offered.is_compatible(&proposed));
    }

    #[test]
    fn test_multipoint_mismatch_incompatible() {
        let offered = SessionOptions::default();
        let proposed = SessionOptions {
            multipoint: true,
            ..SessionOptions::default()
        };
        assert!(!offered.is_compatible(&proposed));
    }

    #[test]
    fn test_disjoint_transports_incompatible() {
        let offered = SessionOptions {
            transports: TransportMask::TCP,
            ..SessionOptions::default()
        };
        let proposed = SessionOptions {
            transports: TransportMask::UDP,
            ..SessionOptions::default()
        };
        assert!(!offered.is_compatible(&proposed));

        let proposed = SessionOptions {
            transports: TransportMask::ANY,
            ..SessionOptions::default()
        };
        assert!(offered.is_compatible(&proposed));
    }

    #[test]
    fn test_mask_helpers() {
        assert!(TransportMask::NONE.is_empty());
        assert!(!TransportMask::LOCAL.is_empty());
        assert!(TransportMask::ANY.intersects(TransportMask::UDP));
        assert!(!ProximityMask::PHYSICAL.intersects(ProximityMask::NETWORK));
        assert!(ProximityMask::ANY.intersects(ProximityMask::PHYSICAL));
    }

    #[test]
    fn test_mask_serde_transparent() {
        let json = serde_json::to_string(&TransportMask::TCP).unwrap();
        assert_eq!(json, "4");
        let parsed: TransportMask = serde_json::from_str("65535").unwrap();
        assert_eq!(parsed, TransportMask::ANY);
    }
}
