//! The opaque packet handle the state plane works against
//!
//! Parsing, reassembly and checksum fix-up happen outside this crate; what
//! crosses the boundary is the original link-layer buffer, the interface it
//! arrived on, and its L3 protocol tag.

/// EtherType for IPv4, in host order
pub const ETH_P_IP: u16 = 0x0800;
/// EtherType for IPv6, in host order
pub const ETH_P_IPV6: u16 = 0x86DD;

/// Handle of the interface a packet arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceId(pub u32);

/// One packet (or fragment of one) as handed to the state plane
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The original link-layer buffer, if it is still around
    buffer: Option<Vec<u8>>,
    /// The interface the packet arrived on, if any
    interface: Option<InterfaceId>,
    /// EtherType of the payload
    l3_proto: u16,
}

impl Fragment {
    #[must_use]
    pub fn new(buffer: Option<Vec<u8>>, interface: Option<InterfaceId>, l3_proto: u16) -> Self {
        Self {
            buffer,
            interface,
            l3_proto,
        }
    }

    /// The original buffer, when one is attached
    #[must_use]
    pub fn original_buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// The arrival interface, when one is attached
    #[must_use]
    pub fn interface(&self) -> Option<InterfaceId> {
        self.interface
    }

    /// The EtherType of the payload
    #[must_use]
    pub fn l3_proto(&self) -> u16 {
        self.l3_proto
    }
}
