// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    bind, connect, recv, send, sendto, setsockopt, socket, sockopt,
    AddressFamily, MsgFlags, SockFlag, SockType, SockaddrIn,
};

use crate::{DhcpError, ErrorKind};

pub(crate) const SERVER_PORT: u16 = 67;
pub(crate) const CLIENT_PORT: u16 = 68;

// Receive up to a full 64 KiB datagram; a server honoring our
// `Maximum DHCP Message Size` will stay far below this.
const RECV_BUFFER_SIZE: usize = 1 << 16;

const PACKET_HOST: u8 = 0; // a packet addressed to the local host

// Using the output of `tcpdump -dd 'ip and udp dst port 68'`
const DHCP_BPF_FILTER: [(u16, u8, u8, u32); 11] = [
    (0x28, 0, 0, 0x0000000c),
    (0x15, 0, 8, 0x00000800),
    (0x30, 0, 0, 0x00000017),
    (0x15, 0, 6, 0x00000011),
    (0x28, 0, 0, 0x00000014),
    (0x45, 4, 0, 0x00001fff),
    (0xb1, 0, 0, 0x0000000e),
    (0x48, 0, 0, 0x00000010),
    (0x15, 0, 1, 0x00000044),
    (0x6, 0, 0, 0x00040000),
    (0x6, 0, 0, 0x00000000),
];

// A single `BPF_RET 0`: reject every frame from now on. Packet sockets
// have no working shutdown(2); attaching this filter stops the inflow
// while frames already queued stay readable for draining.
const DROP_ALL_BPF_FILTER: [(u16, u8, u8, u32); 1] = [(0x6, 0, 0, 0)];

fn attach_bpf_filter(
    fd: libc::c_int,
    filter: &[(u16, u8, u8, u32)],
) -> Result<(), DhcpError> {
    let mut raw_filters = vec![
        libc::sock_filter {
            code: 0,
            jt: 0,
            jf: 0,
            k: 0,
        };
        filter.len()
    ];
    for (i, (code, jt, jf, k)) in filter.iter().enumerate() {
        raw_filters[i].code = *code;
        raw_filters[i].jt = *jt;
        raw_filters[i].jf = *jf;
        raw_filters[i].k = *k;
    }
    let bpf_filter = libc::sock_fprog {
        len: filter.len() as u16,
        filter: raw_filters.as_mut_ptr(),
    };

    unsafe {
        let rc = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            (&bpf_filter as *const libc::sock_fprog) as *const libc::c_void,
            std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        );
        if rc != 0 {
            return Err(DhcpError::new(
                ErrorKind::IoError,
                format!(
                    "Failed to apply socket BPF filter: {}",
                    Errno::last()
                ),
            ));
        }
    }
    Ok(())
}

/// The pre-lease transport: an AF_PACKET socket delivering and
/// injecting full Ethernet frames on one interface, filtered down to
/// DHCP client traffic.
#[derive(Debug)]
pub(crate) struct DhcpRawSocket {
    raw_fd: libc::c_int,
}

impl AsRawFd for DhcpRawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.raw_fd as RawFd
    }
}

impl Drop for DhcpRawSocket {
    fn drop(&mut self) {
        if self.raw_fd >= 0 {
            log::debug!("Closing raw socket {}", self.raw_fd);
            unsafe {
                libc::close(self.raw_fd);
            }
        }
    }
}

impl DhcpRawSocket {
    pub(crate) fn new(
        iface_index: u32,
        hwaddr: &[u8],
    ) -> Result<Self, DhcpError> {
        let ret = Self {
            raw_fd: create_raw_eth_socket()?,
        };
        attach_bpf_filter(ret.raw_fd, &DHCP_BPF_FILTER)?;
        bind_raw_socket(ret.raw_fd, iface_index as libc::c_int, hwaddr)?;
        log::debug!(
            "Raw socket {} created on interface {}",
            ret.raw_fd,
            iface_index
        );
        Ok(ret)
    }

    #[cfg(test)]
    pub(crate) fn new_from_fd(fd: RawFd) -> Self {
        Self {
            raw_fd: fd as libc::c_int,
        }
    }

    /// `Ok(None)` means the socket has nothing queued right now.
    pub(crate) fn recv(&self) -> Result<Option<Vec<u8>>, DhcpError> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        match recv(self.raw_fd, &mut buffer, MsgFlags::empty()) {
            Ok(len) => {
                buffer.truncate(len);
                log::trace!("Raw socket {} received {buffer:?}", self.raw_fd);
                Ok(Some(buffer))
            }
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(DhcpError::new(
                ErrorKind::IoError,
                format!(
                    "Failed to receive from raw socket {}: {e}",
                    self.raw_fd
                ),
            )),
        }
    }

    pub(crate) fn send(&self, eth_frame: &[u8]) -> Result<(), DhcpError> {
        log::trace!("Raw socket {} sending {eth_frame:?}", self.raw_fd);
        let mut sent = 0;
        while sent < eth_frame.len() {
            sent += send(self.raw_fd, &eth_frame[sent..], MsgFlags::empty())
                .map_err(|e| {
                    DhcpError::new(
                        ErrorKind::IoError,
                        format!(
                            "Failed to send to raw socket {}: {e}",
                            self.raw_fd
                        ),
                    )
                })?;
        }
        Ok(())
    }

    /// Half-close for draining: no further frames are queued, frames
    /// already queued remain readable until recv() reports EAGAIN.
    pub(crate) fn shutdown_recv(&self) -> Result<(), DhcpError> {
        attach_bpf_filter(self.raw_fd, &DROP_ALL_BPF_FILTER)
    }
}

fn create_raw_eth_socket() -> Result<libc::c_int, DhcpError> {
    let protocol = (libc::ETH_P_ALL as libc::c_ushort).to_be();
    unsafe {
        match libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            protocol as libc::c_int,
        ) {
            -1 => Err(DhcpError::new(
                ErrorKind::IoError,
                format!("Failed to create raw socket: {}", Errno::last()),
            )),
            fd => Ok(fd),
        }
    }
}

fn bind_raw_socket(
    fd: libc::c_int,
    iface_index: libc::c_int,
    hwaddr: &[u8],
) -> Result<(), DhcpError> {
    let halen = hwaddr.len().min(libc::ETH_ALEN as usize);
    let mut sll_addr: [libc::c_uchar; 8] = [0; 8];
    sll_addr[..halen].copy_from_slice(&hwaddr[..halen]);

    let mut socket_addr = libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as libc::c_ushort,
        sll_protocol: (libc::ETH_P_ALL as libc::c_ushort).to_be(),
        sll_ifindex: iface_index,
        sll_hatype: libc::ARPHRD_ETHER as libc::c_ushort,
        sll_pkttype: PACKET_HOST as libc::c_uchar,
        sll_halen: halen as libc::c_uchar,
        sll_addr,
    };
    unsafe {
        let addr_ptr = &mut socket_addr as *mut libc::sockaddr_ll
            as *mut libc::sockaddr;
        match libc::bind(
            fd,
            addr_ptr,
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        ) {
            0 => Ok(()),
            _ => Err(DhcpError::new(
                ErrorKind::IoError,
                format!("Failed to bind raw socket: {}", Errno::last()),
            )),
        }
    }
}

/// The post-lease transport: a non-blocking UDP socket bound to the
/// leased address and connected to the leasing server.
#[derive(Debug)]
pub(crate) struct DhcpUdpSocket {
    fd: libc::c_int,
}

impl AsRawFd for DhcpUdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd as RawFd
    }
}

impl Drop for DhcpUdpSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            log::debug!("Closing UDP socket {}", self.fd);
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

impl DhcpUdpSocket {
    pub(crate) fn new(
        iface_index: u32,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
    ) -> Result<Self, DhcpError> {
        let ret = Self {
            fd: socket(
                AddressFamily::Inet,
                SockType::Datagram,
                SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
                None,
            )
            .map_err(|e| {
                DhcpError::new(
                    ErrorKind::IoError,
                    format!("Failed to create UDP socket: {e}"),
                )
            })?,
        };
        setsockopt(ret.fd, sockopt::ReuseAddr, &true)?;
        setsockopt(ret.fd, sockopt::Broadcast, &true)?;
        bind_to_iface_index(ret.fd, iface_index)?;
        let src = src_ip.octets();
        bind(ret.fd, &SockaddrIn::new(src[0], src[1], src[2], src[3], CLIENT_PORT))
            .map_err(|e| {
                DhcpError::new(
                    ErrorKind::IoError,
                    format!(
                        "Failed to bind UDP socket to {src_ip}:{CLIENT_PORT}: \
                         {e}"
                    ),
                )
            })?;
        let dst = dst_ip.octets();
        connect(
            ret.fd,
            &SockaddrIn::new(dst[0], dst[1], dst[2], dst[3], SERVER_PORT),
        )
        .map_err(|e| {
            DhcpError::new(
                ErrorKind::IoError,
                format!(
                    "Failed to connect UDP socket to {dst_ip}:{SERVER_PORT}: \
                     {e}"
                ),
            )
        })?;
        log::debug!(
            "UDP socket {} created, {src_ip}:{CLIENT_PORT} -> \
             {dst_ip}:{SERVER_PORT}",
            ret.fd
        );
        Ok(ret)
    }

    #[cfg(test)]
    pub(crate) fn new_from_fd(fd: RawFd) -> Self {
        Self {
            fd: fd as libc::c_int,
        }
    }

    /// `Ok(None)` means the socket has nothing queued right now.
    pub(crate) fn recv(&self) -> Result<Option<Vec<u8>>, DhcpError> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        match recv(self.fd, &mut buffer, MsgFlags::empty()) {
            Ok(len) => {
                buffer.truncate(len);
                log::trace!("UDP socket {} received {buffer:?}", self.fd);
                Ok(Some(buffer))
            }
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(DhcpError::new(
                ErrorKind::IoError,
                format!("Failed to receive from UDP socket {}: {e}", self.fd),
            )),
        }
    }

    /// Unicast to the connected server.
    pub(crate) fn send(&self, packet: &[u8]) -> Result<(), DhcpError> {
        log::trace!("UDP socket {} sending {packet:?}", self.fd);
        let mut sent = 0;
        while sent < packet.len() {
            sent += send(self.fd, &packet[sent..], MsgFlags::empty())
                .map_err(|e| {
                    DhcpError::new(
                        ErrorKind::IoError,
                        format!(
                            "Failed to send to UDP socket {}: {e}",
                            self.fd
                        ),
                    )
                })?;
        }
        Ok(())
    }

    /// Broadcast, overriding the connected destination.
    pub(crate) fn send_broadcast(&self, packet: &[u8]) -> Result<(), DhcpError> {
        log::trace!("UDP socket {} broadcasting {packet:?}", self.fd);
        let dst = SockaddrIn::new(255, 255, 255, 255, SERVER_PORT);
        let mut sent = 0;
        while sent < packet.len() {
            sent += sendto(self.fd, &packet[sent..], &dst, MsgFlags::empty())
                .map_err(|e| {
                    DhcpError::new(
                        ErrorKind::IoError,
                        format!(
                            "Failed to broadcast to UDP socket {}: {e}",
                            self.fd
                        ),
                    )
                })?;
        }
        Ok(())
    }
}

fn bind_to_iface_index(
    fd: libc::c_int,
    iface_index: u32,
) -> Result<(), DhcpError> {
    let index = iface_index as libc::c_int;
    unsafe {
        let rc = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTOIFINDEX,
            (&index as *const libc::c_int) as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if rc != 0 {
            return Err(DhcpError::new(
                ErrorKind::IoError,
                format!(
                    "Failed to bind UDP socket to interface {iface_index}: {}",
                    Errno::last()
                ),
            ));
        }
    }
    Ok(())
}
