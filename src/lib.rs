// SPDX-License-Identifier: Apache-2.0

mod buffer;
mod config;
mod conn;
mod error;
mod event;
mod msg;
mod option;
mod socket;


pub use crate::config::{
    DhcpV4Config, ARP_HW_TYPE_ETHERNET, ARP_HW_TYPE_INFINIBAND,
};
pub use crate::conn::DhcpV4Connection;
pub use crate::error::{DhcpError, ErrorKind};
pub use crate::event::{DhcpEventPool, DhcpV4Event};
pub use crate::msg::{DhcpV4Header, DhcpV4Incoming, DhcpV4MessageType};
pub use crate::option::DhcpV4OptionCode;

pub(crate) use crate::buffer::{Buffer, BufferMut};
pub(crate) use crate::error::ErrorContext;
