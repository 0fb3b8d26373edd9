//! Protocol-polymorphic ICMP error emission
//!
//! Packet-processing code reports problems in protocol-agnostic terms; this
//! module picks the concrete ICMP or ICMPv6 (type, code) pair for whichever
//! family the offending packet belongs to and hands it to the transmitter.
//! Combinations with no counterpart in a family are silently dropped.

use super::fragment::{Fragment, ETH_P_IP, ETH_P_IPV6};

/// ICMP type/code numbers, per RFC792
mod v4 {
    pub const DEST_UNREACH: u8 = 3;
    pub const TIME_EXCEEDED: u8 = 11;

    pub const HOST_UNREACH: u8 = 1;
    pub const PROT_UNREACH: u8 = 2;
    pub const FRAG_NEEDED: u8 = 4;
    pub const SR_FAILED: u8 = 5;
    pub const PKT_FILTERED: u8 = 13;
    pub const EXC_TTL: u8 = 0;
}

/// ICMPv6 type/code numbers, per RFC4443
mod v6 {
    pub const DEST_UNREACH: u8 = 1;
    pub const TIME_EXCEED: u8 = 3;
    pub const PARAM_PROB: u8 = 4;

    pub const ADM_PROHIBITED: u8 = 1;
    pub const ADDR_UNREACH: u8 = 3;
    pub const HDR_FIELD: u8 = 0;
    pub const UNK_NEXTHDR: u8 = 1;
    pub const EXC_HOPLIMIT: u8 = 0;
}

/// The errors packet-processing code can ask to have reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpErrorKind {
    AddrUnreachable,
    ProtoUnreachable,
    HopLimit,
    FragNeeded,
    Filter,
    SrcRoute,
    HdrField,
}

impl IcmpErrorKind {
    /// The ICMP (type, code) pair for this error, when IPv4 has one
    #[must_use]
    pub fn v4_type_code(self) -> Option<(u8, u8)> {
        match self {
            Self::AddrUnreachable => Some((v4::DEST_UNREACH, v4::HOST_UNREACH)),
            Self::ProtoUnreachable => Some((v4::DEST_UNREACH, v4::PROT_UNREACH)),
            Self::HopLimit => Some((v4::TIME_EXCEEDED, v4::EXC_TTL)),
            Self::FragNeeded => Some((v4::DEST_UNREACH, v4::FRAG_NEEDED)),
            Self::Filter => Some((v4::DEST_UNREACH, v4::PKT_FILTERED)),
            Self::SrcRoute => Some((v4::DEST_UNREACH, v4::SR_FAILED)),
            Self::HdrField => None,
        }
    }

    /// The ICMPv6 (type, code) pair for this error, when IPv6 has one
    #[must_use]
    pub fn v6_type_code(self) -> Option<(u8, u8)> {
        match self {
            Self::AddrUnreachable => Some((v6::DEST_UNREACH, v6::ADDR_UNREACH)),
            Self::ProtoUnreachable => Some((v6::PARAM_PROB, v6::UNK_NEXTHDR)),
            Self::HopLimit => Some((v6::TIME_EXCEED, v6::EXC_HOPLIMIT)),
            Self::Filter => Some((v6::DEST_UNREACH, v6::ADM_PROHIBITED)),
            Self::HdrField => Some((v6::PARAM_PROB, v6::HDR_FIELD)),
            Self::FragNeeded | Self::SrcRoute => None,
        }
    }
}

/// The seam to the native ICMP emitters
///
/// The default implementation only leaves a log trail; deployments wire in
/// whatever raw-socket machinery their platform offers.
pub trait IcmpTransmitter {
    fn emit_v4(&self, frag: &Fragment, icmp_type: u8, code: u8, info: u32);
    fn emit_v6(&self, frag: &Fragment, icmp_type: u8, code: u8, info: u32);
}

/// Transmitter that records the emission in the log and nothing else
#[derive(Debug, Default)]
pub struct LogTransmitter;

impl IcmpTransmitter for LogTransmitter {
    fn emit_v4(&self, _frag: &Fragment, icmp_type: u8, code: u8, info: u32) {
        log::debug!("ICMP error: type {} code {} info {}", icmp_type, code, info);
    }

    fn emit_v6(&self, _frag: &Fragment, icmp_type: u8, code: u8, info: u32) {
        log::debug!("ICMPv6 error: type {} code {} info {}", icmp_type, code, info);
    }
}

/// Emit an ICMP error about `frag` towards its sender
///
/// Nothing is emitted for packets with no buffer or no interface (there is
/// nobody to reply to), or for error kinds the packet's family cannot
/// express.
pub fn send(transmitter: &dyn IcmpTransmitter, frag: &Fragment, kind: IcmpErrorKind, info: u32) {
    if frag.original_buffer().is_none() || frag.interface().is_none() {
        return;
    }

    match frag.l3_proto() {
        ETH_P_IP => {
            if let Some((icmp_type, code)) = kind.v4_type_code() {
                transmitter.emit_v4(frag, icmp_type, code, info);
            }
        }
        ETH_P_IPV6 => {
            if let Some((icmp_type, code)) = kind.v6_type_code() {
                transmitter.emit_v6(frag, icmp_type, code, info);
            }
        }
        other => log::trace!("No ICMP error for unknown L3 protocol {:#06x}", other),
    }
}
