// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Caller supplied an argument violating the connection contract,
    /// e.g. a hardware address longer than the BOOTP `chaddr` field.
    InvalidArgument,
    /// Inbound bytes could not be parsed as a DHCPv4 message.
    InvalidDhcpMessage,
    /// Outgoing message ran out of option space, including the
    /// overloaded `file`/`sname` regions.
    MessageOverflow,
    /// Operating system level failure, carrying the errno text.
    IoError,
    NotSupported,
    Bug,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidArgument => "invalid_argument",
                Self::InvalidDhcpMessage => "invalid_dhcp_message",
                Self::MessageOverflow => "message_overflow",
                Self::IoError => "io_error",
                Self::NotSupported => "not_supported",
                Self::Bug => "bug",
            }
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Display for DhcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

impl From<std::io::Error> for DhcpError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, format!("IO error: {e}"))
    }
}

impl From<nix::Error> for DhcpError {
    fn from(e: nix::Error) -> Self {
        Self::new(ErrorKind::IoError, format!("System error: {e}"))
    }
}

pub(crate) trait ErrorContext<T> {
    fn context(self, message: &str) -> Result<T, DhcpError>;
}

impl<T> ErrorContext<T> for Result<T, DhcpError> {
    fn context(self, message: &str) -> Result<T, DhcpError> {
        self.map_err(|e| {
            DhcpError::new(e.kind, format!("{message}: {}", e.msg))
        })
    }
}
