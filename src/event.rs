// SPDX-License-Identifier: Apache-2.0

use std::convert::TryFrom;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::sys::epoll::{
    epoll_create, epoll_ctl, epoll_wait, EpollEvent, EpollFlags, EpollOp,
};

use crate::{DhcpError, ErrorKind};

const EVENT_BUFFER_COUNT: usize = 64;

/// Tags attached to descriptors registered on the [DhcpEventPool].
/// The connection registers everything under a single tag; which of
/// its descriptors fired is resolved by the connection's own state
/// inside `dispatch()`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum DhcpV4Event {
    Connection = 1,
}

impl TryFrom<u64> for DhcpV4Event {
    type Error = DhcpError;
    fn try_from(v: u64) -> Result<Self, DhcpError> {
        match v {
            x if x == Self::Connection as u64 => Ok(Self::Connection),
            _ => {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!("Got unexpected event ID {v}"),
                );
                log::error!("{}", e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Display for DhcpV4Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Connection => "Connection",
            }
        )
    }
}

/// The readiness notifier shared between the connection and whatever
/// else the surrounding client waits on. The pool owns the epoll
/// descriptor and must outlive every connection registered on it.
#[derive(Debug)]
pub struct DhcpEventPool {
    fd: RawFd,
}

impl AsRawFd for DhcpEventPool {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for DhcpEventPool {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd as libc::c_int);
            }
        }
    }
}

impl DhcpEventPool {
    pub fn new() -> Result<Self, DhcpError> {
        Ok(Self {
            fd: epoll_create().map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!("Failed to epoll_create(): {e}"),
                );
                log::error!("{}", e);
                e
            })?,
        })
    }

    pub fn add_fd(
        &self,
        fd: RawFd,
        event: DhcpV4Event,
    ) -> Result<(), DhcpError> {
        log::debug!("Adding fd {} to event pool {}, event {}", fd, self.fd, event);
        let event = EpollEvent::new(EpollFlags::EPOLLIN, event as u64);
        epoll_ctl(self.fd, EpollOp::EpollCtlAdd, fd, &mut Some(event))
            .map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "Failed to add fd {} to event pool {}: {e}",
                        fd, self.fd
                    ),
                );
                log::error!("{}", e);
                e
            })
    }

    pub fn del_fd(
        &self,
        fd: RawFd,
        event: DhcpV4Event,
    ) -> Result<(), DhcpError> {
        log::debug!(
            "Removing fd {} from event pool {}, event {}",
            fd,
            self.fd,
            event
        );
        let event = EpollEvent::new(EpollFlags::EPOLLIN, event as u64);
        epoll_ctl(self.fd, EpollOp::EpollCtlDel, fd, &mut Some(event))
            .map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "Failed to remove fd {} from event pool {}: {e}",
                        fd, self.fd
                    ),
                );
                log::error!("{}", e);
                e
            })
    }

    /// Wait up to `wait_time` seconds for readable events.
    pub fn poll(&self, wait_time: u32) -> Result<Vec<DhcpV4Event>, DhcpError> {
        let mut events: [EpollEvent; EVENT_BUFFER_COUNT] =
            [EpollEvent::empty(); EVENT_BUFFER_COUNT];

        let changed_count =
            epoll_wait(self.fd, &mut events, 1000 * wait_time as isize)
                .map_err(|e| {
                    let e = DhcpError::new(
                        ErrorKind::Bug,
                        format!("Failed on epoll_wait(): {e}"),
                    );
                    log::error!("{}", e);
                    e
                })?;
        let mut ret = Vec::new();
        for i in &events[..changed_count] {
            ret.push(DhcpV4Event::try_from(i.data())?);
        }
        Ok(ret)
    }
}
