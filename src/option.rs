// SPDX-License-Identifier: Apache-2.0

/// DHCPv4 option codes spoken by this crate, RFC 2132 numbers.
/// Full option parsing belongs to the lease layer above; the transport
/// only needs the identity and sizing options it appends itself.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum DhcpV4OptionCode {
    Pad = 0,
    RequestedIpAddress = 50,
    OptionOverload = 52,
    MessageType = 53,
    ServerIdentifier = 54,
    ErrorMessage = 56,
    MaximumMessageSize = 57,
    ClientIdentifier = 61,
    End = 255,
}

impl From<DhcpV4OptionCode> for u8 {
    fn from(code: DhcpV4OptionCode) -> u8 {
        code as u8
    }
}

impl std::fmt::Display for DhcpV4OptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Pad => "pad",
                Self::RequestedIpAddress => "requested_ip_address",
                Self::OptionOverload => "option_overload",
                Self::MessageType => "message_type",
                Self::ServerIdentifier => "server_identifier",
                Self::ErrorMessage => "error_message",
                Self::MaximumMessageSize => "maximum_message_size",
                Self::ClientIdentifier => "client_identifier",
                Self::End => "end",
            }
        )
    }
}
