// SPDX-License-Identifier: Apache-2.0

// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-2
pub const ARP_HW_TYPE_ETHERNET: u8 = 1;
pub const ARP_HW_TYPE_INFINIBAND: u8 = 32;

pub(crate) const BROADCAST_MAC_ADDRESS: [u8; 6] = [u8::MAX; 6];

/// Identity of a DHCPv4 connection: which interface to speak on and
/// how the client introduces itself on the wire. Validated when the
/// connection is created.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV4Config {
    pub(crate) iface_index: u32,
    pub(crate) htype: u8,
    pub(crate) chaddr: Vec<u8>,
    pub(crate) bhaddr: Vec<u8>,
    pub(crate) client_id: Vec<u8>,
    pub(crate) request_broadcast: bool,
    pub(crate) mtu: u16,
}

impl DhcpV4Config {
    pub fn new(iface_index: u32) -> Self {
        Self {
            iface_index,
            htype: ARP_HW_TYPE_ETHERNET,
            chaddr: vec![0; libc::ETH_ALEN as usize],
            bhaddr: BROADCAST_MAC_ADDRESS.to_vec(),
            client_id: Vec::new(),
            request_broadcast: false,
            mtu: 0,
        }
    }

    /// Hardware type and addresses: the client's own address and the
    /// link-layer broadcast address outgoing frames are sent to.
    pub fn set_hwaddr(
        &mut self,
        htype: u8,
        chaddr: &[u8],
        bhaddr: &[u8],
    ) -> &mut Self {
        self.htype = htype;
        self.chaddr = chaddr.to_vec();
        self.bhaddr = bhaddr.to_vec();
        self
    }

    /// RFC 2132 section 9.14, client identifier with its leading type
    /// byte. Type 0 is for identifiers not derived from a hardware
    /// address.
    pub fn set_client_id(
        &mut self,
        client_id_type: u8,
        client_id: &[u8],
    ) -> &mut Self {
        self.client_id = vec![client_id_type];
        self.client_id.extend_from_slice(client_id);
        self
    }

    pub fn use_mac_as_client_id(&mut self) -> &mut Self {
        let chaddr = self.chaddr.clone();
        self.set_client_id(self.htype, &chaddr)
    }

    /// Ask servers to reply by broadcast even before we hold an
    /// address the interface answers ARP for.
    pub fn set_request_broadcast(&mut self, value: bool) -> &mut Self {
        self.request_broadcast = value;
        self
    }

    /// Path MTU hint advertised as `Maximum DHCP Message Size` while
    /// still on the packet socket; 0 omits the option.
    pub fn set_mtu(&mut self, mtu: u16) -> &mut Self {
        self.mtu = mtu;
        self
    }
}
