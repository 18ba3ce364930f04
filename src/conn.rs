// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;

use crate::{
    config::ARP_HW_TYPE_INFINIBAND,
    event::{DhcpEventPool, DhcpV4Event},
    msg::{
        DhcpV4Incoming, DhcpV4MessageType, DhcpV4Outgoing, BOOTREQUEST,
        MAX_CHADDR_LEN, MESSAGE_FLAG_BROADCAST, OVERLOAD_FILE,
        OVERLOAD_SNAME, UDP_MAX_SIZE,
    },
    socket::{DhcpRawSocket, DhcpUdpSocket},
    DhcpError, DhcpV4Config, DhcpV4OptionCode, ErrorKind,
};

// Largest hardware address any ARP type defines (InfiniBand uses 20
// of these); only the first MAX_CHADDR_LEN fit the BOOTP header.
const MAX_HW_ADDR_LEN: usize = 32;

/// Each state carries exactly the sockets valid in it, so the
/// descriptor bookkeeping cannot drift from the state machine.
#[derive(Debug, Default)]
pub(crate) enum ConnState {
    /// No sockets yet, `listen()` is the only way out.
    #[default]
    Init,
    /// Pre-lease: raw packet socket only.
    Packet { raw: DhcpRawSocket },
    /// `connect()` ran, the packet socket is half-closed and still
    /// being read dry while the UDP socket queues behind it.
    Draining {
        raw: DhcpRawSocket,
        udp: DhcpUdpSocket,
    },
    /// Bound: kernel UDP stack only.
    Udp { udp: DhcpUdpSocket },
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Packet { .. } => write!(f, "packet"),
            Self::Draining { .. } => write!(f, "draining"),
            Self::Udp { .. } => write!(f, "udp"),
        }
    }
}

/// The transport half of a DHCPv4 client: owns the packet/UDP socket
/// pair, validates inbound messages against the client identity and
/// builds/sends the outbound message of every lifecycle phase. The
/// retransmission and lease logic live in the caller; every operation
/// here is non-blocking and nothing is retried internally.
///
/// The connection registers its descriptors on a borrowed
/// [DhcpEventPool] which must outlive it; call `close()` to
/// deregister before dropping the pool.
#[derive(Debug)]
pub struct DhcpV4Connection {
    pub(crate) iface_index: u32,
    pub(crate) htype: u8,
    pub(crate) hlen: u8,
    pub(crate) chaddr: [u8; MAX_HW_ADDR_LEN],
    pub(crate) bhaddr: [u8; MAX_HW_ADDR_LEN],
    pub(crate) client_id: Vec<u8>,
    pub(crate) request_broadcast: bool,
    /// False only for InfiniBand, whose 20 byte address does not fit
    /// `chaddr` and which therefore must be identified by client id
    /// and answered by broadcast.
    pub(crate) send_chaddr: bool,
    pub(crate) mtu: u16,
    pub(crate) ciaddr: Ipv4Addr,
    pub(crate) siaddr: Ipv4Addr,
    pub(crate) state: ConnState,
}

impl DhcpV4Connection {
    pub fn new(config: DhcpV4Config) -> Result<Self, DhcpError> {
        let (request_broadcast, send_chaddr) =
            if config.htype == ARP_HW_TYPE_INFINIBAND {
                (true, false)
            } else {
                (config.request_broadcast, true)
            };
        // A hardware address that goes into the header must fit its
        // chaddr field; InfiniBand never sends one and only has to fit
        // the connection's own buffers.
        let max_len = if send_chaddr {
            MAX_CHADDR_LEN
        } else {
            MAX_HW_ADDR_LEN
        };
        if config.chaddr.len() > max_len {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "Hardware address length {} exceeds the maximum {}",
                    config.chaddr.len(),
                    max_len
                ),
            ));
        }
        if config.client_id.len() == 1 {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                "Client identifier holds a type byte without identifier \
                 bytes"
                    .to_string(),
            ));
        }

        let hlen = config.chaddr.len() as u8;
        let mut chaddr = [0u8; MAX_HW_ADDR_LEN];
        chaddr[..config.chaddr.len()].copy_from_slice(&config.chaddr);
        let mut bhaddr = [0u8; MAX_HW_ADDR_LEN];
        let bhaddr_len = config.bhaddr.len().min(MAX_HW_ADDR_LEN);
        bhaddr[..bhaddr_len].copy_from_slice(&config.bhaddr[..bhaddr_len]);

        Ok(Self {
            iface_index: config.iface_index,
            htype: config.htype,
            hlen,
            chaddr,
            bhaddr,
            client_id: config.client_id,
            request_broadcast,
            send_chaddr,
            mtu: config.mtu,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            state: ConnState::Init,
        })
    }

    /// Open the raw packet socket and register it; the connection is
    /// then ready to broadcast and to receive server replies.
    pub fn listen(&mut self, events: &DhcpEventPool) -> Result<(), DhcpError> {
        assert!(
            matches!(self.state, ConnState::Init),
            "listen() invalid in state {}",
            self.state
        );
        let raw = DhcpRawSocket::new(
            self.iface_index,
            &self.chaddr[..self.hlen as usize],
        )?;
        events.add_fd(raw.as_raw_fd(), DhcpV4Event::Connection)?;
        self.state = ConnState::Packet { raw };
        Ok(())
    }

    /// Switch to the kernel UDP stack on the freshly leased address.
    /// The packet socket is half-closed, not closed: replies already
    /// queued on it are still surfaced, in order, by `dispatch()`
    /// before any UDP traffic.
    pub fn connect(
        &mut self,
        events: &DhcpEventPool,
        client: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<(), DhcpError> {
        assert!(
            matches!(self.state, ConnState::Packet { .. }),
            "connect() invalid in state {}",
            self.state
        );
        let udp = DhcpUdpSocket::new(self.iface_index, client, server)?;
        events.add_fd(udp.as_raw_fd(), DhcpV4Event::Connection)?;

        let ConnState::Packet { raw } = std::mem::take(&mut self.state)
        else {
            unreachable!();
        };
        if let Err(e) = raw.shutdown_recv() {
            events.del_fd(udp.as_raw_fd(), DhcpV4Event::Connection).ok();
            self.state = ConnState::Packet { raw };
            return Err(e);
        }

        self.ciaddr = client;
        self.siaddr = server;
        self.state = ConnState::Draining { raw, udp };
        log::debug!(
            "Connection on interface {} bound {client} -> {server}, \
             draining packet socket",
            self.iface_index
        );
        Ok(())
    }

    /// Read one message from whichever socket the current state
    /// prescribes. `Ok(None)` covers both "nothing queued" and
    /// messages dropped for being malformed or for somebody else;
    /// the caller simply waits for the next readiness event.
    pub fn dispatch(
        &mut self,
        events: &DhcpEventPool,
    ) -> Result<Option<DhcpV4Incoming>, DhcpError> {
        let message = loop {
            let drained = match &self.state {
                ConnState::Init => {
                    panic!("dispatch() invalid before listen()")
                }
                ConnState::Packet { raw } => match raw.recv()? {
                    Some(frame) => break parse_frame(&frame),
                    None => break None,
                },
                ConnState::Draining { raw, .. } => match raw.recv()? {
                    Some(frame) => break parse_frame(&frame),
                    // Nothing left on the half-closed packet socket.
                    None => true,
                },
                ConnState::Udp { udp } => match udp.recv()? {
                    Some(packet) => break parse_packet(&packet),
                    None => break None,
                },
            };
            if drained {
                self.finish_drain(events);
            }
        };
        Ok(message.filter(|m| self.verify_incoming(m)))
    }

    fn finish_drain(&mut self, events: &DhcpEventPool) {
        let ConnState::Draining { raw, udp } = std::mem::take(&mut self.state)
        else {
            unreachable!();
        };
        events.del_fd(raw.as_raw_fd(), DhcpV4Event::Connection).ok();
        log::debug!(
            "Packet socket {} drained and closed, UDP only from here",
            raw.as_raw_fd()
        );
        self.state = ConnState::Udp { udp };
    }

    /// A reply is ours only when its `chaddr` and client identifier
    /// both match; everything else on the wire is for another client
    /// and silently dropped. When we never send a `chaddr` the
    /// server echoes zeros, leaving the client identifier as the only
    /// usable check.
    fn verify_incoming(&self, message: &DhcpV4Incoming) -> bool {
        let hlen = self.hlen as usize;
        if self.send_chaddr
            && message.header().chaddr[..hlen] != self.chaddr[..hlen]
        {
            log::debug!("Dropping DHCP message due to chaddr mismatch");
            return false;
        }
        let client_id = message
            .query(DhcpV4OptionCode::ClientIdentifier)
            .unwrap_or(&[]);
        if client_id != self.client_id.as_slice() {
            log::debug!(
                "Dropping DHCP message due to client identifier mismatch"
            );
            return false;
        }
        true
    }

    /// Deregister and close every descriptor, newest first, and return
    /// to the initial state. Safe to call in any state.
    pub fn close(&mut self, events: &DhcpEventPool) {
        match std::mem::take(&mut self.state) {
            ConnState::Init => (),
            ConnState::Packet { raw } => {
                events.del_fd(raw.as_raw_fd(), DhcpV4Event::Connection).ok();
            }
            ConnState::Draining { raw, udp } => {
                events.del_fd(udp.as_raw_fd(), DhcpV4Event::Connection).ok();
                events.del_fd(raw.as_raw_fd(), DhcpV4Event::Connection).ok();
            }
            ConnState::Udp { udp } => {
                events.del_fd(udp.as_raw_fd(), DhcpV4Event::Connection).ok();
            }
        }
        self.ciaddr = Ipv4Addr::UNSPECIFIED;
        self.siaddr = Ipv4Addr::UNSPECIFIED;
    }

    pub(crate) fn new_message(
        &self,
        msg_type: DhcpV4MessageType,
    ) -> Result<DhcpV4Outgoing, DhcpError> {
        let mut message = DhcpV4Outgoing::new(OVERLOAD_FILE | OVERLOAD_SNAME);
        let header = message.header_mut();
        header.op = BOOTREQUEST;
        header.htype = self.htype;
        header.ciaddr = self.ciaddr;
        if self.request_broadcast {
            header.flags |= MESSAGE_FLAG_BROADCAST;
        }
        if self.send_chaddr {
            header.hlen = self.hlen;
            header.chaddr[..self.hlen as usize]
                .copy_from_slice(&self.chaddr[..self.hlen as usize]);
        }

        message.append(DhcpV4OptionCode::MessageType, &[msg_type as u8])?;
        if !self.client_id.is_empty() {
            message.append(
                DhcpV4OptionCode::ClientIdentifier,
                &self.client_id,
            )?;
        }

        // RFC 2131 allows `Maximum DHCP Message Size` in DISCOVER,
        // REQUEST and INFORM only. Before the switch to UDP the limit
        // is the path MTU if known; afterwards the kernel reassembles
        // and the MUST-accept minimum applies.
        if matches!(
            msg_type,
            DhcpV4MessageType::Discover
                | DhcpV4MessageType::Request
                | DhcpV4MessageType::Inform
        ) {
            let max_size = match self.state {
                ConnState::Init | ConnState::Packet { .. } => {
                    (self.mtu > 0).then_some(self.mtu)
                }
                ConnState::Draining { .. } | ConnState::Udp { .. } => {
                    Some(UDP_MAX_SIZE)
                }
            };
            if let Some(max_size) = max_size {
                message.append(
                    DhcpV4OptionCode::MaximumMessageSize,
                    &max_size.to_be_bytes(),
                )?;
            }
        }
        Ok(message)
    }

    fn set_xid(message: &mut DhcpV4Outgoing, xid: u32, secs: u16) {
        // Some DHCP servers reject DISCOVER or REQUEST messages whose
        // 'secs' is not set.
        assert!(secs != 0, "'secs' must be non-zero");
        let header = message.header_mut();
        header.xid = xid;
        header.secs = secs;
    }

    fn packet_broadcast(
        &self,
        message: &DhcpV4Outgoing,
    ) -> Result<(), DhcpError> {
        let raw = match &self.state {
            ConnState::Packet { raw } => raw,
            state => {
                panic!("link-layer broadcast invalid in state {state}")
            }
        };
        raw.send(&message.to_eth_frame_broadcast(
            &self.chaddr[..self.hlen as usize],
            &self.bhaddr[..self.hlen as usize],
        )?)
    }

    fn udp_send(&self, message: &DhcpV4Outgoing) -> Result<(), DhcpError> {
        match &self.state {
            ConnState::Draining { udp, .. } | ConnState::Udp { udp } => {
                udp.send(&message.to_bytes())
            }
            state => panic!("UDP unicast invalid in state {state}"),
        }
    }

    fn udp_broadcast(
        &self,
        message: &DhcpV4Outgoing,
    ) -> Result<(), DhcpError> {
        match &self.state {
            ConnState::Draining { udp, .. } | ConnState::Udp { udp } => {
                udp.send_broadcast(&message.to_bytes())
            }
            state => panic!("UDP broadcast invalid in state {state}"),
        }
    }

    /// RFC 2131 4.4.1: broadcast a DHCPDISCOVER on the local hardware
    /// broadcast address to the 0xffffffff IP broadcast address.
    pub fn discover(&mut self, xid: u32, secs: u16) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Discover)?;
        Self::set_xid(&mut message, xid, secs);
        self.packet_broadcast(&message)
    }

    /// Accept one DHCPOFFER. RFC 2131 4.3.2: 'server identifier' set
    /// to the selected server, 'requested IP address' to the offered
    /// yiaddr, 'ciaddr' MUST be zero.
    pub fn select(
        &mut self,
        client: Ipv4Addr,
        server: Ipv4Addr,
        xid: u32,
        secs: u16,
    ) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Request)?;
        Self::set_xid(&mut message, xid, secs);
        message.append(
            DhcpV4OptionCode::RequestedIpAddress,
            &client.octets(),
        )?;
        message.append(DhcpV4OptionCode::ServerIdentifier, &server.octets())?;
        self.packet_broadcast(&message)
    }

    /// Verify a cached lease after restart. RFC 2131 4.3.2:
    /// 'requested IP address' carries the remembered address, 'server
    /// identifier' MUST NOT be filled in, 'ciaddr' MUST be zero.
    pub fn reboot(
        &mut self,
        client: Ipv4Addr,
        xid: u32,
        secs: u16,
    ) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Request)?;
        Self::set_xid(&mut message, xid, secs);
        message.append(
            DhcpV4OptionCode::RequestedIpAddress,
            &client.octets(),
        )?;
        self.packet_broadcast(&message)
    }

    /// Extend the lease at T1, unicast to the leasing server. RFC 2131
    /// 4.4.5: 'ciaddr' filled in, no 'server identifier', no
    /// 'requested IP address'.
    pub fn renew(&mut self, xid: u32, secs: u16) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Request)?;
        Self::set_xid(&mut message, xid, secs);
        self.udp_send(&message)
    }

    /// Extend the lease at T2 from any server willing. Same message as
    /// renew, broadcast instead of unicast.
    pub fn rebind(&mut self, xid: u32, secs: u16) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Request)?;
        Self::set_xid(&mut message, xid, secs);
        self.udp_broadcast(&message)
    }

    /// RFC 2131 4.4.3: request configuration parameters for an
    /// address obtained by other means.
    pub fn inform(&mut self, xid: u32, secs: u16) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Inform)?;
        Self::set_xid(&mut message, xid, secs);
        self.udp_broadcast(&message)
    }

    /// RFC 2131 4.4.4: the offered address turned out to be in use
    /// already; tell the server by broadcast.
    pub fn decline(
        &mut self,
        error: Option<&str>,
        client: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Decline)?;
        message.append(
            DhcpV4OptionCode::RequestedIpAddress,
            &client.octets(),
        )?;
        message.append(DhcpV4OptionCode::ServerIdentifier, &server.octets())?;
        if let Some(error) = error {
            append_error_message(&mut message, error)?;
        }
        self.packet_broadcast(&message)
    }

    /// RFC 2131 4.4.6: relinquish the lease, unicast to the server
    /// that granted it.
    pub fn release(&mut self, error: Option<&str>) -> Result<(), DhcpError> {
        let mut message = self.new_message(DhcpV4MessageType::Release)?;
        message.append(
            DhcpV4OptionCode::ServerIdentifier,
            &self.siaddr.octets(),
        )?;
        if let Some(error) = error {
            append_error_message(&mut message, error)?;
        }
        self.udp_send(&message)
    }
}

fn parse_frame(frame: &[u8]) -> Option<DhcpV4Incoming> {
    if frame.is_empty() {
        return None;
    }
    match DhcpV4Incoming::parse_eth_frame(frame) {
        Ok(message) => Some(message),
        Err(e) => {
            log::debug!("Dropping malformed packet: {e}");
            None
        }
    }
}

fn parse_packet(packet: &[u8]) -> Option<DhcpV4Incoming> {
    if packet.is_empty() {
        return None;
    }
    match DhcpV4Incoming::parse(packet) {
        Ok(message) => Some(message),
        Err(e) => {
            log::debug!("Dropping malformed packet: {e}");
            None
        }
    }
}

// The human readable reason travels NUL terminated, RFC 2132
// section 9.9.
fn append_error_message(
    message: &mut DhcpV4Outgoing,
    error: &str,
) -> Result<(), DhcpError> {
    let mut data = error.as_bytes().to_vec();
    data.push(0);
    message.append(DhcpV4OptionCode::ErrorMessage, &data)
}
