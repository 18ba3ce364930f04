// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use nix::sys::socket::{
    recv, send, socketpair, AddressFamily, MsgFlags, SockFlag, SockType,
};

use crate::{
    config::BROADCAST_MAC_ADDRESS,
    conn::ConnState,
    msg::{gen_eth_frame, DhcpV4Outgoing, BOOTREPLY},
    socket::{DhcpRawSocket, DhcpUdpSocket, CLIENT_PORT, SERVER_PORT},
    DhcpEventPool, DhcpV4Config, DhcpV4Connection, DhcpV4Event,
    DhcpV4MessageType, DhcpV4OptionCode, ARP_HW_TYPE_ETHERNET,
};

pub(crate) const TEST_IFACE_INDEX: u32 = 3;
pub(crate) const TEST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub(crate) const TEST_SRV_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0xfe];
pub(crate) const TEST_CLIENT_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
pub(crate) const TEST_SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// The far end of a socketpair standing in for the network. Closed on
/// drop so tests do not leak descriptors.
pub(crate) struct TestPeer(pub(crate) RawFd);

impl Drop for TestPeer {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0 as libc::c_int);
        }
    }
}

impl TestPeer {
    pub(crate) fn inject(&self, data: &[u8]) {
        send(self.0, data, MsgFlags::empty()).unwrap();
    }

    pub(crate) fn read_sent(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; 1 << 16];
        let len = recv(self.0, &mut buffer, MsgFlags::empty()).unwrap();
        buffer.truncate(len);
        buffer
    }
}

pub(crate) fn test_config() -> DhcpV4Config {
    let mut config = DhcpV4Config::new(TEST_IFACE_INDEX);
    config.set_hwaddr(
        ARP_HW_TYPE_ETHERNET,
        &TEST_MAC,
        &BROADCAST_MAC_ADDRESS,
    );
    config
}

fn new_dgram_pair() -> (RawFd, TestPeer) {
    let (local, peer) = socketpair(
        AddressFamily::Unix,
        SockType::Datagram,
        None,
        SockFlag::SOCK_NONBLOCK,
    )
    .unwrap();
    (local, TestPeer(peer))
}

/// A connection as if `listen()` succeeded, its packet socket replaced
/// by one end of a socketpair.
pub(crate) fn conn_in_packet_state(
    config: DhcpV4Config,
    events: &DhcpEventPool,
) -> (DhcpV4Connection, TestPeer) {
    let mut conn = DhcpV4Connection::new(config).unwrap();
    let (fd, peer) = new_dgram_pair();
    events.add_fd(fd, DhcpV4Event::Connection).unwrap();
    conn.state = ConnState::Packet {
        raw: DhcpRawSocket::new_from_fd(fd),
    };
    (conn, peer)
}

/// A connection as if `listen()` then `connect()` succeeded, both
/// sockets replaced by socketpair ends.
pub(crate) fn conn_in_draining_state(
    config: DhcpV4Config,
    events: &DhcpEventPool,
) -> (DhcpV4Connection, TestPeer, TestPeer) {
    let mut conn = DhcpV4Connection::new(config).unwrap();
    let (raw_fd, raw_peer) = new_dgram_pair();
    let (udp_fd, udp_peer) = new_dgram_pair();
    events.add_fd(raw_fd, DhcpV4Event::Connection).unwrap();
    events.add_fd(udp_fd, DhcpV4Event::Connection).unwrap();
    conn.ciaddr = TEST_CLIENT_IP;
    conn.siaddr = TEST_SERVER_IP;
    conn.state = ConnState::Draining {
        raw: DhcpRawSocket::new_from_fd(raw_fd),
        udp: DhcpUdpSocket::new_from_fd(udp_fd),
    };
    (conn, raw_peer, udp_peer)
}

/// A fully drained connection on its UDP socket.
pub(crate) fn conn_in_udp_state(
    config: DhcpV4Config,
    events: &DhcpEventPool,
) -> (DhcpV4Connection, TestPeer) {
    let mut conn = DhcpV4Connection::new(config).unwrap();
    let (udp_fd, udp_peer) = new_dgram_pair();
    events.add_fd(udp_fd, DhcpV4Event::Connection).unwrap();
    conn.ciaddr = TEST_CLIENT_IP;
    conn.siaddr = TEST_SERVER_IP;
    conn.state = ConnState::Udp {
        udp: DhcpUdpSocket::new_from_fd(udp_fd),
    };
    (conn, udp_peer)
}

/// A BOOTREPLY as a server would emit it on the wire.
pub(crate) fn server_reply(
    chaddr: &[u8; 6],
    xid: u32,
    msg_type: DhcpV4MessageType,
    client_id: Option<&[u8]>,
) -> Vec<u8> {
    let mut message = DhcpV4Outgoing::new(0);
    let header = message.header_mut();
    header.op = BOOTREPLY;
    header.hlen = chaddr.len() as u8;
    header.chaddr[..chaddr.len()].copy_from_slice(chaddr);
    header.xid = xid;
    header.yiaddr = TEST_CLIENT_IP;
    header.siaddr = TEST_SERVER_IP;
    message
        .append(DhcpV4OptionCode::MessageType, &[msg_type as u8])
        .unwrap();
    if let Some(client_id) = client_id {
        message
            .append(DhcpV4OptionCode::ClientIdentifier, client_id)
            .unwrap();
    }
    message.to_bytes()
}

/// The same reply wrapped in Ethernet/IPv4/UDP for the packet path.
pub(crate) fn server_reply_frame(
    chaddr: &[u8; 6],
    xid: u32,
    msg_type: DhcpV4MessageType,
    client_id: Option<&[u8]>,
) -> Vec<u8> {
    gen_eth_frame(
        &TEST_SRV_MAC,
        chaddr,
        TEST_SERVER_IP,
        Ipv4Addr::BROADCAST,
        SERVER_PORT,
        CLIENT_PORT,
        &server_reply(chaddr, xid, msg_type, client_id),
    )
    .unwrap()
}
