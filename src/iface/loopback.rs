//! An in-memory link device.
//!
//! Frames handed to [`Loopback::inject`] are delivered to the capture loop as
//! if they had arrived on a wire. Frames the stack transmits are recorded and
//! can optionally be observed by a hook, which lets a test play the peer.
//! Receive errors and failed transmissions can be scripted as well.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::device::LinkDevice;

type SendHook = Box<dyn Fn(&[u8]) + Send + Sync>;

const NO_FAILURE: usize = usize::MAX;

pub struct Loopback {
    inbound_tx: Mutex<Sender<io::Result<Vec<u8>>>>,
    inbound_rx: Mutex<Receiver<io::Result<Vec<u8>>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_cv: Condvar,
    hook: RwLock<Option<SendHook>>,
    fail_sends: AtomicBool,
    fail_send_at: AtomicUsize,
    send_attempts: AtomicUsize,
}

impl Loopback {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        Loopback {
            inbound_tx: Mutex::new(inbound_tx),
            inbound_rx: Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            sent_cv: Condvar::new(),
            hook: RwLock::new(None),
            fail_sends: AtomicBool::new(false),
            fail_send_at: AtomicUsize::new(NO_FAILURE),
            send_attempts: AtomicUsize::new(0),
        }
    }

    /// Queue a frame for the capture side.
    pub fn inject(&self, frame: Vec<u8>) {
        self.queue(Ok(frame));
    }

    /// Make the receive after all queued frames fail with `kind`.
    pub fn inject_error(&self, kind: io::ErrorKind) {
        self.queue(Err(io::Error::new(kind, "scripted loopback receive error")));
    }

    fn queue(&self, item: io::Result<Vec<u8>>) {
        // The receiver lives as long as `self`, sending cannot fail.
        let _ = self
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(item);
    }

    /// Call `hook` with every frame the stack transmits.
    pub fn set_send_hook<F>(&self, hook: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *self.hook.write().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Make every following `send` fail with an I/O error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Fail only the send attempt with zero-based index `attempt`.
    pub fn fail_send_at(&self, attempt: usize) {
        self.fail_send_at.store(attempt, Ordering::SeqCst);
    }

    /// Number of `send` calls so far, failed ones included.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Every frame transmitted so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the transmitted frames.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Block until at least `count` frames were transmitted or `timeout` passed.
    ///
    /// Returns the transmitted frames either way.
    pub fn wait_sent(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        while sent.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sent = self
                .sent_cv
                .wait_timeout(sent, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        sent.clone()
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDevice for Loopback {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let rx = self.inbound_rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => {
                let caplen = frame.len().min(buf.len());
                buf[..caplen].copy_from_slice(&frame[..caplen]);
                Ok(Some(frame.len()))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback inbound queue closed",
            )),
        }
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst)
            || attempt == self.fail_send_at.load(Ordering::SeqCst)
        {
            return Err(io::Error::new(io::ErrorKind::Other, "loopback send disabled"));
        }

        {
            let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
            sent.push(frame.to_vec());
        }
        self.sent_cv.notify_all();

        if let Some(hook) = self.hook.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            hook(frame);
        }
        Ok(())
    }
}
