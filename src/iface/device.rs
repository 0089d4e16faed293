//! Raw frame capture and injection
//!
//! A [`LinkDevice`] moves whole Ethernet frames between the stack and a link.
//! [`TapDevice`] does this through a Linux tap interface.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, SystemTime};

use tun_tap::{Iface, Mode};

/// Metadata recorded for every captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMeta {
    /// When the frame was pulled off the device
    pub timestamp: SystemTime,
    /// Bytes actually captured
    pub caplen: usize,
    /// Length of the frame on the wire
    pub len: usize,
}

impl CaptureMeta {
    /// Metadata for a frame of `len` bytes of which `caplen` were captured, stamped now.
    pub fn new(caplen: usize, len: usize) -> Self {
        CaptureMeta {
            timestamp: SystemTime::now(),
            caplen: caplen.min(len),
            len,
        }
    }
}

/// Errors after which the next receive may well succeed.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// A link the stack can capture frames from and inject frames into.
///
/// Both methods take `&self`: the capture loop receives while any number of
/// frame-processing threads transmit.
pub trait LinkDevice: Send + Sync {
    /// Wait up to `timeout` for the next frame and copy it into `buf`.
    ///
    /// Returns the frame's length on the wire, which exceeds `buf.len()` when
    /// the frame was truncated, or `Ok(None)` when no frame arrived in time.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Inject one complete frame.
    fn send(&self, frame: &[u8]) -> io::Result<()>;
}

/// A Linux tap interface carrying Ethernet frames without packet info.
///
/// The tap end sees every frame the kernel forwards onto the link, so there
/// is no separate promiscuous switch.
pub struct TapDevice {
    iface: Iface,
}

impl TapDevice {
    /// Attach to (or create) the tap interface `name`. Needs CAP_NET_ADMIN.
    pub fn open(name: &str) -> io::Result<Self> {
        let iface = Iface::without_packet_info(name, Mode::Tap)?;
        Ok(TapDevice { iface })
    }

    pub fn name(&self) -> &str {
        self.iface.name()
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.iface.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let res = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if is_transient(&err) {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(res > 0)
    }
}

impl LinkDevice for TapDevice {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        match self.iface.recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let written = self.iface.send(frame)?;
        if written != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, frame.len()),
            ));
        }
        Ok(())
    }
}
