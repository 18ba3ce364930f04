// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::{
    socket::{CLIENT_PORT, SERVER_PORT},
    Buffer, BufferMut, DhcpError, DhcpV4OptionCode, ErrorContext, ErrorKind,
    ARP_HW_TYPE_ETHERNET,
};

const DEFAULT_TTL: u8 = 128;

pub(crate) const BOOTREQUEST: u8 = 1;
#[cfg(test)]
pub(crate) const BOOTREPLY: u8 = 2;

/// BOOTP `flags` bit requesting the server to reply by broadcast.
pub(crate) const MESSAGE_FLAG_BROADCAST: u16 = 0x8000;

/// RFC 2131: the minimum message size every DHCP participant must
/// accept. Once the kernel UDP stack carries our traffic this is the
/// size advertised via `Maximum DHCP Message Size`.
pub(crate) const UDP_MAX_SIZE: u16 = 576;

// RFC 2131 option overload bits: options may continue into the legacy
// `file` and/or `sname` header regions.
pub(crate) const OVERLOAD_FILE: u8 = 1;
pub(crate) const OVERLOAD_SNAME: u8 = 2;

pub(crate) const MAX_CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;
// op(1) htype(1) hlen(1) hops(1) xid(4) secs(2) flags(2) + 4 addresses
// + chaddr(16), i.e. the fixed header up to the sname region.
const FIXED_HEADER_LEN: usize = 44;
const HEADER_LEN: usize = FIXED_HEADER_LEN + SNAME_LEN + FILE_LEN;

const DHCPV4_MAGIC_COOKIE: [u8; 4] = [99u8, 130, 83, 99];

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum DhcpV4MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl std::fmt::Display for DhcpV4MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

impl std::convert::TryFrom<u8> for DhcpV4MessageType {
    type Error = DhcpError;

    fn try_from(d: u8) -> Result<Self, DhcpError> {
        match d {
            d if d == Self::Discover as u8 => Ok(Self::Discover),
            d if d == Self::Offer as u8 => Ok(Self::Offer),
            d if d == Self::Request as u8 => Ok(Self::Request),
            d if d == Self::Decline as u8 => Ok(Self::Decline),
            d if d == Self::Ack as u8 => Ok(Self::Ack),
            d if d == Self::Nak as u8 => Ok(Self::Nak),
            d if d == Self::Release as u8 => Ok(Self::Release),
            d if d == Self::Inform as u8 => Ok(Self::Inform),
            _ => Err(DhcpError::new(
                ErrorKind::NotSupported,
                format!("DHCPv4 message type {d} is not supported"),
            )),
        }
    }
}

/// The fixed BOOTP header, RFC 2131 section 2.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV4Header {
    /// 1 = BOOTREQUEST, 2 = BOOTREPLY.
    pub op: u8,
    /// ARP hardware address type.
    pub htype: u8,
    /// Hardware address length.
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID linking a request to its replies.
    pub xid: u32,
    /// Seconds elapsed since the client began acquisition.
    pub secs: u16,
    pub flags: u16,
    /// Client IP address, only once bound.
    pub ciaddr: Ipv4Addr,
    /// 'your' (client) address assigned by the server.
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; MAX_CHADDR_LEN],
}

impl Default for DhcpV4Header {
    fn default() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: ARP_HW_TYPE_ETHERNET,
            hlen: 0,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; MAX_CHADDR_LEN],
        }
    }
}

impl DhcpV4Header {
    fn parse(buf: &mut Buffer) -> Result<Self, DhcpError> {
        Ok(Self {
            op: buf.get_u8().context("Invalid DHCPv4 header field 'op'")?,
            htype: buf
                .get_u8()
                .context("Invalid DHCPv4 header field 'htype'")?,
            hlen: buf.get_u8().context("Invalid DHCPv4 header field 'hlen'")?,
            hops: buf.get_u8().context("Invalid DHCPv4 header field 'hops'")?,
            xid: buf
                .get_u32_be()
                .context("Invalid DHCPv4 header field 'xid'")?,
            secs: buf
                .get_u16_be()
                .context("Invalid DHCPv4 header field 'secs'")?,
            flags: buf
                .get_u16_be()
                .context("Invalid DHCPv4 header field 'flags'")?,
            ciaddr: buf
                .get_ipv4()
                .context("Invalid DHCPv4 header field 'ciaddr'")?,
            yiaddr: buf
                .get_ipv4()
                .context("Invalid DHCPv4 header field 'yiaddr'")?,
            siaddr: buf
                .get_ipv4()
                .context("Invalid DHCPv4 header field 'siaddr'")?,
            giaddr: buf
                .get_ipv4()
                .context("Invalid DHCPv4 header field 'giaddr'")?,
            chaddr: {
                let mut chaddr = [0u8; MAX_CHADDR_LEN];
                chaddr.copy_from_slice(
                    buf.get_bytes(MAX_CHADDR_LEN)
                        .context("Invalid DHCPv4 header field 'chaddr'")?,
                );
                chaddr
            },
        })
    }

    fn emit(&self, buf: &mut BufferMut) {
        buf.write_u8(self.op);
        buf.write_u8(self.htype);
        buf.write_u8(self.hlen);
        buf.write_u8(self.hops);
        buf.write_u32_be(self.xid);
        buf.write_u16_be(self.secs);
        buf.write_u16_be(self.flags);
        buf.write_ipv4(self.ciaddr);
        buf.write_ipv4(self.yiaddr);
        buf.write_ipv4(self.siaddr);
        buf.write_ipv4(self.giaddr);
        buf.write_bytes(&self.chaddr);
    }
}

/// A validated inbound DHCPv4 message. Options are exposed as raw
/// bytes; repeated options are concatenated per RFC 3396 and options
/// carried in overloaded `file`/`sname` regions are folded in.
#[derive(Debug, Clone)]
pub struct DhcpV4Incoming {
    header: DhcpV4Header,
    options: HashMap<u8, Vec<u8>>,
}

impl DhcpV4Incoming {
    // Header, magic cookie, plus the 3 bytes of the mandatory
    // `DHCP Message Type(53)` option.
    const MIN_LEN: usize = HEADER_LEN + 4 + 3;

    /// Parse a raw DHCP message with UDP and lower layers removed.
    pub(crate) fn parse(raw: &[u8]) -> Result<Self, DhcpError> {
        if raw.len() < Self::MIN_LEN {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "Message length {} is less than minimum DHCP message \
                     size {}",
                    raw.len(),
                    Self::MIN_LEN
                ),
            ));
        }
        let mut buf = Buffer::new(raw);
        let header = DhcpV4Header::parse(&mut buf)?;
        let sname = buf
            .get_bytes(SNAME_LEN)
            .context("Invalid DHCPv4 header field 'sname'")?;
        let file = buf
            .get_bytes(FILE_LEN)
            .context("Invalid DHCPv4 header field 'file'")?;

        let magic_cookie =
            buf.get_bytes(4).context("Invalid DHCP magic cookie")?;
        if magic_cookie != DHCPV4_MAGIC_COOKIE {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "DHCPv4 magic cookie not match, expected {:?}, got {:?}",
                    DHCPV4_MAGIC_COOKIE, magic_cookie
                ),
            ));
        }

        let mut options = HashMap::new();
        parse_options(&mut options, buf.get_remains())?;

        // RFC 2131 section 4.1: with option 52 present the file and
        // sname regions hold options too, interpreted in that order.
        if let Some(overload) = options
            .get(&u8::from(DhcpV4OptionCode::OptionOverload))
            .and_then(|v| v.first())
            .copied()
        {
            if overload & OVERLOAD_FILE > 0 {
                parse_options(&mut options, file)
                    .context("Invalid options overloaded into 'file'")?;
            }
            if overload & OVERLOAD_SNAME > 0 {
                parse_options(&mut options, sname)
                    .context("Invalid options overloaded into 'sname'")?;
            }
        }

        Ok(Self { header, options })
    }

    /// Parse a full Ethernet frame as delivered by the packet socket,
    /// digging the DHCP message out of its UDP payload.
    pub(crate) fn parse_eth_frame(frame: &[u8]) -> Result<Self, DhcpError> {
        let packet = etherparse::SlicedPacket::from_ethernet(frame).map_err(
            |e| {
                DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    format!("Failed to parse ethernet frame: {e}"),
                )
            },
        )?;
        if let Some(etherparse::TransportSlice::Udp(udp)) = packet.transport {
            Self::parse(udp.payload())
        } else {
            Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                "Ethernet frame does not carry a UDP payload".to_string(),
            ))
        }
    }

    pub fn header(&self) -> &DhcpV4Header {
        &self.header
    }

    pub fn query(&self, code: DhcpV4OptionCode) -> Option<&[u8]> {
        self.options.get(&u8::from(code)).map(Vec::as_slice)
    }

    pub fn message_type(&self) -> Option<DhcpV4MessageType> {
        self.query(DhcpV4OptionCode::MessageType)
            .and_then(|v| v.first())
            .and_then(|t| DhcpV4MessageType::try_from(*t).ok())
    }
}

fn parse_options(
    options: &mut HashMap<u8, Vec<u8>>,
    raw: &[u8],
) -> Result<(), DhcpError> {
    let mut buf = Buffer::new(raw);
    while !buf.is_empty() {
        let code = buf.get_u8()?;
        if code == u8::from(DhcpV4OptionCode::Pad) {
            continue;
        }
        if code == u8::from(DhcpV4OptionCode::End) {
            break;
        }
        let len = buf
            .get_u8()
            .context("Truncated DHCPv4 option, missing length")?;
        let data = buf
            .get_bytes(len as usize)
            .context("Truncated DHCPv4 option payload")?;
        // RFC 3396: repeated options hold one concatenated payload.
        options.entry(code).or_default().extend_from_slice(data);
    }
    Ok(())
}

/// An outbound DHCPv4 message under construction. The overload flags
/// chosen at creation decide whether options may spill into the legacy
/// `file` and `sname` header regions once the main area is full.
#[derive(Debug, Clone)]
pub struct DhcpV4Outgoing {
    header: DhcpV4Header,
    overload: u8,
    options: Vec<u8>,
    file: Vec<u8>,
    sname: Vec<u8>,
}

impl DhcpV4Outgoing {
    pub(crate) fn new(overload: u8) -> Self {
        Self {
            header: DhcpV4Header::default(),
            overload,
            options: Vec::new(),
            file: Vec::new(),
            sname: Vec::new(),
        }
    }

    pub(crate) fn header_mut(&mut self) -> &mut DhcpV4Header {
        &mut self.header
    }

    fn main_capacity(&self) -> usize {
        // Keep the whole message within the MUST-accept size, leaving
        // room for the END terminator and, when overload is allowed,
        // for the OPTION_OVERLOAD option itself.
        let mut capacity = UDP_MAX_SIZE as usize - HEADER_LEN - 4 - 1;
        if self.overload > 0 {
            capacity -= 3;
        }
        capacity
    }

    /// Append one option, spilling into the overload regions when the
    /// main area is exhausted.
    pub(crate) fn append(
        &mut self,
        code: DhcpV4OptionCode,
        data: &[u8],
    ) -> Result<(), DhcpError> {
        if data.len() > u8::MAX as usize {
            return Err(DhcpError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "DHCPv4 option {code} payload length {} exceeds 255",
                    data.len()
                ),
            ));
        }
        let tlv_len = 2 + data.len();
        let region = if self.options.len() + tlv_len <= self.main_capacity() {
            &mut self.options
        } else if self.overload & OVERLOAD_FILE > 0
            && self.file.len() + tlv_len <= FILE_LEN - 1
        {
            &mut self.file
        } else if self.overload & OVERLOAD_SNAME > 0
            && self.sname.len() + tlv_len <= SNAME_LEN - 1
        {
            &mut self.sname
        } else {
            return Err(DhcpError::new(
                ErrorKind::MessageOverflow,
                format!("No space left for DHCPv4 option {code}"),
            ));
        };
        region.push(code.into());
        region.push(data.len() as u8);
        region.extend_from_slice(data);
        Ok(())
    }

    /// Serialize header, magic cookie and options, ready for a
    /// transport.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            BufferMut::new(HEADER_LEN + 4 + self.options.len() + 16);
        self.header.emit(&mut buf);
        emit_region(&mut buf, &self.sname, SNAME_LEN);
        emit_region(&mut buf, &self.file, FILE_LEN);
        buf.write_bytes(&DHCPV4_MAGIC_COOKIE);
        buf.write_bytes(&self.options);
        let overload_used = u8::from(!self.file.is_empty()) * OVERLOAD_FILE
            | u8::from(!self.sname.is_empty()) * OVERLOAD_SNAME;
        if overload_used > 0 {
            buf.write_u8(DhcpV4OptionCode::OptionOverload.into());
            buf.write_u8(1);
            buf.write_u8(overload_used);
        }
        buf.write_u8(DhcpV4OptionCode::End.into());
        buf.data
    }

    /// Wrap the serialized message into UDP, IPv4 and Ethernet headers
    /// for the pre-lease broadcast path.
    pub(crate) fn to_eth_frame_broadcast(
        &self,
        src_mac: &[u8],
        dst_mac: &[u8],
    ) -> Result<Vec<u8>, DhcpError> {
        gen_eth_frame(
            src_mac,
            dst_mac,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            CLIENT_PORT,
            SERVER_PORT,
            &self.to_bytes(),
        )
    }
}

fn emit_region(buf: &mut BufferMut, options: &[u8], region_len: usize) {
    if options.is_empty() {
        buf.write_zeros(region_len);
    } else {
        buf.write_bytes(options);
        buf.write_u8(DhcpV4OptionCode::End.into());
        buf.write_zeros(region_len - options.len() - 1);
    }
}

pub(crate) fn gen_eth_frame(
    src_mac: &[u8],
    dst_mac: &[u8],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, DhcpError> {
    let builder = etherparse::PacketBuilder::ethernet2(
        eth_mac_bytes(src_mac),
        eth_mac_bytes(dst_mac),
    )
    .ipv4(src_ip.octets(), dst_ip.octets(), DEFAULT_TTL)
    .udp(src_port, dst_port);

    let mut frame = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).map_err(|e| {
        DhcpError::new(
            ErrorKind::Bug,
            format!("Failed to generate ethernet frame: {e}"),
        )
    })?;
    Ok(frame)
}

// Hardware addresses longer than an ethernet MAC (e.g. InfiniBand) are
// truncated; the BOOTP payload is what identifies the client there.
fn eth_mac_bytes(addr: &[u8]) -> [u8; 6] {
    let mut ret = [0u8; 6];
    let len = addr.len().min(ret.len());
    ret[..len].copy_from_slice(&addr[..len]);
    ret
}
