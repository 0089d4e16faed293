//! Ethernet level
//!
//! Owns the link device and the interface's own hardware address, filters
//! inbound frames by destination address and demultiplexes them by Ethertype.
//!
//! Every captured frame is processed on a freshly spawned thread. An upper layer
//! may block inside its handler (address resolution waits for a reply that comes
//! in through this very capture loop), so frames must never be processed on the
//! capture thread itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::dispatch::Registry;
use crate::error::{Result, StackError};
use crate::iface::device::is_transient;
use crate::iface::{CaptureMeta, InterfaceInfo, LinkDevice, TapDevice};
use crate::network::ethernet::{EthernetHeader, MacAddr, ETH_FRAME_MAX, ETH_HEADER_LEN};

/// How long the capture loop waits for a frame before it checks for a stop request
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Capture buffer size, large enough that oversized frames are seen whole
const CAPTURE_SNAPLEN: usize = 65535;

/// Upper-layer receiver for one Ethertype.
///
/// Called with the capture metadata, the frame payload (header stripped) and the
/// sender's hardware address. Returning is all it takes to discard a frame.
pub trait EthernetHandler: Send + Sync {
    fn handle(&self, meta: &CaptureMeta, payload: &[u8], src: MacAddr);
}

impl<F> EthernetHandler for F
where
    F: Fn(&CaptureMeta, &[u8], MacAddr) + Send + Sync,
{
    fn handle(&self, meta: &CaptureMeta, payload: &[u8], src: MacAddr) {
        self(meta, payload, src)
    }
}

struct Running {
    device: Arc<dyn LinkDevice>,
    own_addr: MacAddr,
    stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
}

pub struct EthernetLayer {
    running: RwLock<Option<Running>>,
    handlers: Registry<u16, dyn EthernetHandler>,
    poll_timeout: Duration,
}

impl EthernetLayer {
    pub fn new() -> Arc<Self> {
        Self::with_poll_timeout(DEFAULT_POLL_TIMEOUT)
    }

    pub fn with_poll_timeout(poll_timeout: Duration) -> Arc<Self> {
        Arc::new(EthernetLayer {
            running: RwLock::new(None),
            handlers: Registry::new(),
            poll_timeout,
        })
    }

    /// Open the tap interface `name` and start on it.
    pub fn start_interface(self: &Arc<Self>, name: &str, info: &dyn InterfaceInfo) -> Result<()> {
        if self.is_running() {
            return Err(StackError::AlreadyInitialized);
        }
        let own_addr = info.hw_addr(name)?;
        let device = TapDevice::open(name)?;
        debug!("attached to tap interface {}", device.name());
        self.start(Arc::new(device), own_addr)
    }

    /// Start capturing on `device`, answering to `own_addr` and broadcast.
    pub fn start(self: &Arc<Self>, device: Arc<dyn LinkDevice>, own_addr: MacAddr) -> Result<()> {
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(StackError::AlreadyInitialized);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let capture = {
            let layer = Arc::downgrade(self);
            let device = Arc::clone(&device);
            let stop = Arc::clone(&stop);
            let timeout = self.poll_timeout;
            thread::Builder::new()
                .name("eth-capture".into())
                .spawn(move || capture_loop(layer, device, stop, timeout))?
        };

        *running = Some(Running {
            device,
            own_addr,
            stop,
            capture: Some(capture),
        });
        info!("Ethernet level started as {}", own_addr);
        Ok(())
    }

    /// Stop the capture loop and release the device.
    ///
    /// Frames already handed to their processing threads run to completion.
    pub fn stop(&self) -> Result<()> {
        let running = self
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut running = running.ok_or(StackError::NotInitialized)?;

        running.stop.store(true, Ordering::Release);
        if let Some(capture) = running.capture.take() {
            if capture.join().is_err() {
                warn!("capture thread panicked");
            }
        }
        info!("Ethernet level stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The hardware address the layer answers to, while running
    pub fn own_addr(&self) -> Option<MacAddr> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| running.own_addr)
    }

    /// Drop the running state owned by the capture loop behind `stop`.
    ///
    /// A layer that was stopped, or restarted on another device, is left alone.
    fn capture_failed(&self, stop: &Arc<AtomicBool>) {
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        if running
            .as_ref()
            .is_some_and(|running| Arc::ptr_eq(&running.stop, stop))
        {
            // Dropping the join handle detaches the capture thread, which is the caller.
            *running = None;
            warn!("Ethernet level stopped after a capture failure");
        }
    }

    /// Install `handler` for `ethertype`, replacing any earlier one.
    pub fn register_callback(&self, ethertype: u16, handler: Arc<dyn EthernetHandler>) {
        if self.handlers.register(ethertype, handler).is_some() {
            debug!("replaced handler for ethertype {:#06x}", ethertype);
        }
    }

    /// Frame `payload` and inject it towards `dst`.
    ///
    /// Frames shorter than the Ethernet minimum are zero padded. Oversized
    /// frames are rejected without touching the device.
    pub fn send_frame(&self, payload: &[u8], ethertype: u16, dst: MacAddr) -> Result<()> {
        let (device, own_addr) = {
            let running = self.running.read().unwrap_or_else(PoisonError::into_inner);
            let running = running.as_ref().ok_or(StackError::NotInitialized)?;
            (Arc::clone(&running.device), running.own_addr)
        };

        let header = EthernetHeader {
            dst_addr: dst,
            src_addr: own_addr,
            ethertype,
        };
        let frame = header.build_frame(payload).ok_or(StackError::FrameTooLarge {
            len: ETH_HEADER_LEN + payload.len(),
            max: ETH_FRAME_MAX,
        })?;

        trace!("sending {} byte frame to {} ({:#06x})", frame.len(), dst, ethertype);
        device.send(&frame).map_err(|e| {
            warn!("frame injection failed: {}", e);
            StackError::from(e)
        })
    }

    /// Demultiplex one captured frame.
    ///
    /// Frames for other stations, truncated frames and frames with no handler
    /// for their Ethertype are dropped.
    pub fn process_frame(&self, meta: &CaptureMeta, frame: &[u8]) {
        let Some(own_addr) = self.own_addr() else {
            return;
        };
        let Some(header) = EthernetHeader::from_bytes(frame) else {
            trace!("dropping truncated frame of {} bytes", frame.len());
            return;
        };

        if header.dst_addr != own_addr && !header.dst_addr.is_broadcast() {
            trace!("dropping frame for {}", header.dst_addr);
            return;
        }

        let Some(handler) = self.handlers.lookup(header.ethertype) else {
            trace!("no handler for ethertype {:#06x}", header.ethertype);
            return;
        };

        handler.handle(meta, &frame[ETH_HEADER_LEN..], header.src_addr);
    }
}

fn capture_loop(
    layer: Weak<EthernetLayer>,
    device: Arc<dyn LinkDevice>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
) {
    let mut buf = vec![0u8; CAPTURE_SNAPLEN];

    while !stop.load(Ordering::Acquire) {
        let len = match device.recv(&mut buf, timeout) {
            Ok(Some(len)) => len,
            Ok(None) => continue,
            Err(e) if is_transient(&e) => {
                trace!("capture interrupted: {}", e);
                continue;
            }
            Err(e) => {
                warn!("capture failed: {}", e);
                if let Some(layer) = layer.upgrade() {
                    layer.capture_failed(&stop);
                }
                break;
            }
        };
        if len > ETH_FRAME_MAX {
            trace!("dropping oversized frame of {} bytes", len);
            continue;
        }
        let Some(layer) = layer.upgrade() else {
            break;
        };

        let meta = CaptureMeta::new(len, len);
        let frame = buf[..len].to_vec();
        let spawned = thread::Builder::new()
            .name("eth-frame".into())
            .spawn(move || layer.process_frame(&meta, &frame));
        if let Err(e) = spawned {
            warn!("could not spawn frame thread: {}", e);
        }
    }

    debug!("capture loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Loopback;
    use crate::network::ethernet::{ETHERTYPE_ARP, ETHERTYPE_IPV4, ETH_FRAME_MIN};
    use std::sync::mpsc;

    const OWN: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const PEER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
    const OTHER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x03]);

    fn frame(dst: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let header = EthernetHeader {
            dst_addr: dst,
            src_addr: PEER,
            ethertype,
        };
        header.build_frame(payload).unwrap()
    }

    fn started() -> (Arc<EthernetLayer>, Arc<Loopback>) {
        let layer = EthernetLayer::new();
        let device = Arc::new(Loopback::new());
        layer.start(device.clone(), OWN).unwrap();
        (layer, device)
    }

    #[test]
    fn test_lifecycle() {
        let (layer, device) = started();
        assert!(layer.is_running());
        assert_eq!(layer.own_addr(), Some(OWN));
        assert!(matches!(
            layer.start(device, OWN),
            Err(StackError::AlreadyInitialized)
        ));

        layer.stop().unwrap();
        assert!(!layer.is_running());
        assert!(matches!(layer.stop(), Err(StackError::NotInitialized)));
        assert!(matches!(
            layer.send_frame(b"x", ETHERTYPE_IPV4, PEER),
            Err(StackError::NotInitialized)
        ));
    }

    #[test]
    fn test_send_pads_and_limits() {
        let (layer, device) = started();

        layer.send_frame(b"tiny", ETHERTYPE_ARP, MacAddr::BROADCAST).unwrap();
        let sent = device.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), ETH_FRAME_MIN);
        assert_eq!(&sent[0][0..6], &MacAddr::BROADCAST.0);
        assert_eq!(&sent[0][6..12], &OWN.0);
        assert_eq!(&sent[0][12..14], &[0x08, 0x06]);

        assert!(matches!(
            layer.send_frame(&[0u8; 1501], ETHERTYPE_IPV4, PEER),
            Err(StackError::FrameTooLarge { len: 1515, .. })
        ));
        assert!(device.sent().is_empty());

        layer.send_frame(&[0u8; 1500], ETHERTYPE_IPV4, PEER).unwrap();
        assert_eq!(device.take_sent()[0].len(), ETH_FRAME_MAX);
        layer.stop().unwrap();
    }

    #[test]
    fn test_injection_failure_is_reported() {
        let (layer, device) = started();
        device.set_fail_sends(true);
        assert!(matches!(
            layer.send_frame(b"x", ETHERTYPE_IPV4, PEER),
            Err(StackError::Io(_))
        ));
        layer.stop().unwrap();
    }

    #[test]
    fn test_dispatch_filters_destination() {
        let (layer, _device) = started();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        layer.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |_: &CaptureMeta, payload: &[u8], src: MacAddr| {
                let _ = tx.lock().unwrap().send((payload[..3].to_vec(), src));
            }),
        );

        let meta = CaptureMeta::new(60, 60);
        layer.process_frame(&meta, &frame(OTHER, ETHERTYPE_IPV4, b"bad"));
        layer.process_frame(&meta, &frame(OWN, ETHERTYPE_ARP, b"arp"));
        layer.process_frame(&meta, &frame(OWN, ETHERTYPE_IPV4, b"own"));
        layer.process_frame(&meta, &frame(MacAddr::BROADCAST, ETHERTYPE_IPV4, b"all"));
        layer.process_frame(&meta, &[0u8; 10]);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![(b"own".to_vec(), PEER), (b"all".to_vec(), PEER)]
        );
        layer.stop().unwrap();
    }

    #[test]
    fn test_later_registration_replaces_handler() {
        let (layer, _device) = started();
        let (tx, rx) = mpsc::channel();
        let first = std::sync::Mutex::new(tx.clone());
        let second = std::sync::Mutex::new(tx);
        layer.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |_: &CaptureMeta, _: &[u8], _: MacAddr| {
                let _ = first.lock().unwrap().send("first");
            }),
        );
        layer.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |_: &CaptureMeta, _: &[u8], _: MacAddr| {
                let _ = second.lock().unwrap().send("second");
            }),
        );

        layer.process_frame(&CaptureMeta::new(60, 60), &frame(OWN, ETHERTYPE_IPV4, b"x"));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["second"]);
        layer.stop().unwrap();
    }

    #[test]
    fn test_capture_loop_dispatches_on_frame_threads() {
        let (layer, device) = started();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        layer.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |meta: &CaptureMeta, _: &[u8], _: MacAddr| {
                let name = thread::current().name().map(str::to_owned);
                let _ = tx.lock().unwrap().send((meta.caplen, name));
            }),
        );

        device.inject(frame(OWN, ETHERTYPE_IPV4, b"hello"));
        let (caplen, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(caplen, ETH_FRAME_MIN);
        assert_eq!(name.as_deref(), Some("eth-frame"));
        layer.stop().unwrap();
    }

    fn forward_payloads(layer: &EthernetLayer) -> mpsc::Receiver<(Vec<u8>, CaptureMeta)> {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        layer.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |meta: &CaptureMeta, payload: &[u8], _: MacAddr| {
                let _ = tx.lock().unwrap().send((payload[..4].to_vec(), *meta));
            }),
        );
        rx
    }

    #[test]
    fn test_interrupted_capture_keeps_running() {
        let (layer, device) = started();
        let rx = forward_payloads(&layer);

        device.inject_error(std::io::ErrorKind::Interrupted);
        device.inject(frame(OWN, ETHERTYPE_IPV4, b"next"));

        let (payload, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(payload, b"next");
        assert!(layer.is_running());
        layer.stop().unwrap();
    }

    #[test]
    fn test_fatal_capture_error_stops_layer() {
        let (layer, device) = started();
        device.inject_error(std::io::ErrorKind::BrokenPipe);

        for _ in 0..500 {
            if !layer.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!layer.is_running());
        assert!(matches!(
            layer.send_frame(b"x", ETHERTYPE_IPV4, PEER),
            Err(StackError::NotInitialized)
        ));
        assert!(matches!(layer.stop(), Err(StackError::NotInitialized)));

        // The layer can be brought up again on a fresh device.
        layer.start(Arc::new(Loopback::new()), OWN).unwrap();
        layer.stop().unwrap();
    }

    #[test]
    fn test_oversized_capture_is_dropped() {
        let (layer, device) = started();
        let rx = forward_payloads(&layer);

        let mut oversized = frame(OWN, ETHERTYPE_IPV4, b"big!");
        oversized.resize(ETH_FRAME_MAX + 1, 0);
        device.inject(oversized);
        device.inject(frame(OWN, ETHERTYPE_IPV4, b"fits"));

        let (payload, meta) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(payload, b"fits");
        assert_eq!((meta.caplen, meta.len), (ETH_FRAME_MIN, ETH_FRAME_MIN));
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
        layer.stop().unwrap();
    }
}
