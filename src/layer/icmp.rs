//! ICMP level
//!
//! Answers Echo Requests and measures round-trip times for the Echo Requests
//! it sends. Every outstanding request leaves its send time in a lock-guarded
//! table keyed by peer, identifier and sequence number; the matching reply
//! consumes the entry. Requests that are never answered stay in the table.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use log::{debug, info, trace};

use crate::error::{Result, StackError};
use crate::iface::CaptureMeta;
use crate::layer::ip::IpLayer;
use crate::network::icmp::{
    IcmpHeader, ICMP_HEADER_LEN, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST,
};
use crate::network::ipv4::protocol;

/// Identifies one outstanding Echo Request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EchoKey {
    pub peer: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
}

/// A measured round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRtt {
    pub peer: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub rtt: Duration,
}

pub struct IcmpLayer {
    ip: Arc<IpLayer>,
    pending: Mutex<HashMap<EchoKey, SystemTime>>,
    subscribers: Mutex<Vec<Sender<EchoRtt>>>,
    initialized: AtomicBool,
}

impl IcmpLayer {
    pub fn new(ip: Arc<IpLayer>) -> Arc<Self> {
        Arc::new(IcmpLayer {
            ip,
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Register with the IP layer for protocol 1.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(StackError::AlreadyInitialized);
        }

        let layer = Arc::downgrade(self);
        self.ip.register_protocol(
            protocol::ICMP,
            Arc::new(move |meta: &CaptureMeta, data: &[u8], src: Ipv4Addr| {
                if let Some(layer) = layer.upgrade() {
                    layer.process_message(meta, data, src);
                }
            }),
        );
        Ok(())
    }

    /// Receive every round-trip time measured from now on.
    pub fn subscribe(&self) -> Receiver<EchoRtt> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Number of Echo Requests still waiting for their reply
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn send_echo_request(
        &self,
        dst: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        data: &[u8],
    ) -> Result<()> {
        self.send_message(data, ICMP_TYPE_ECHO_REQUEST, 0, identifier, sequence, dst)
    }

    /// Build and send an Echo Request or Echo Reply.
    ///
    /// Any other type fails before anything is recorded or sent. An Echo Request
    /// is entered into the pending table before it goes out, and removed again
    /// if sending fails.
    pub fn send_message(
        &self,
        data: &[u8],
        msg_type: u8,
        code: u8,
        identifier: u16,
        sequence: u16,
        dst: Ipv4Addr,
    ) -> Result<()> {
        if msg_type != ICMP_TYPE_ECHO_REQUEST && msg_type != ICMP_TYPE_ECHO_REPLY {
            return Err(StackError::UnsupportedIcmpType(msg_type));
        }

        let message = IcmpHeader::echo(msg_type, code, identifier, sequence).build_message(data);
        let key = EchoKey {
            peer: dst,
            identifier,
            sequence,
        };

        let is_request = msg_type == ICMP_TYPE_ECHO_REQUEST;
        if is_request {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, SystemTime::now());
        }

        let result = self.ip.send_datagram(dst, &message, protocol::ICMP);
        if result.is_err() && is_request {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
        result
    }

    /// Handle one ICMP message received from `src`.
    pub fn process_message(&self, meta: &CaptureMeta, data: &[u8], src: Ipv4Addr) {
        let Some(header) = IcmpHeader::from_bytes(data) else {
            trace!("dropping truncated ICMP message from {}", src);
            return;
        };
        if !header.has_valid_checksum(data) {
            trace!("dropping ICMP message from {}: bad checksum", src);
            return;
        }

        debug!("ICMP from {}: type {} code {}", src, header.msg_type, header.msg_code);

        match header.msg_type {
            ICMP_TYPE_ECHO_REQUEST => {
                let payload = &data[ICMP_HEADER_LEN..];
                if let Err(e) = self.send_message(
                    payload,
                    ICMP_TYPE_ECHO_REPLY,
                    0,
                    header.identifier(),
                    header.sequence(),
                    src,
                ) {
                    debug!("could not answer echo request from {}: {}", src, e);
                }
            }
            ICMP_TYPE_ECHO_REPLY => {
                let key = EchoKey {
                    peer: src,
                    identifier: header.identifier(),
                    sequence: header.sequence(),
                };
                self.complete_echo(key, meta.timestamp);
            }
            other => trace!("ignoring ICMP type {}", other),
        }
    }

    fn complete_echo(&self, key: EchoKey, received: SystemTime) {
        let sent = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        let Some(sent) = sent else {
            debug!(
                "unmatched echo reply from {} id {} seq {}",
                key.peer, key.identifier, key.sequence
            );
            return;
        };

        let rtt = received.duration_since(sent).unwrap_or(Duration::ZERO);
        info!(
            "RTT estimate for {} id {} seq {}: {:?}",
            key.peer, key.identifier, key.sequence, rtt
        );

        let report = EchoRtt {
            peer: key.peer,
            identifier: key.identifier,
            sequence: key.sequence,
            rtt,
        };
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(report).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{Loopback, StaticInterfaceInfo, StaticResolver};
    use crate::layer::ethernet::EthernetLayer;
    use crate::network::checksum;
    use crate::network::ethernet::MacAddr;
    use crate::network::ipv4::Ipv4Header;

    const OWN_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
    const OWN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    struct Fixture {
        icmp: Arc<IcmpLayer>,
        ethernet: Arc<EthernetLayer>,
        device: Arc<Loopback>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.ethernet.stop();
        }
    }

    fn fixture() -> Fixture {
        let ethernet = EthernetLayer::new();
        let device = Arc::new(Loopback::new());
        ethernet.start(device.clone(), OWN_MAC).unwrap();
        let info = Arc::new(StaticInterfaceInfo {
            hw_addr: OWN_MAC,
            ip_addr: OWN_IP,
            mtu: 1500,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 254),
        });
        let resolver = Arc::new(StaticResolver::with_entries([(PEER_IP, PEER_MAC)]));
        let ip = IpLayer::new(ethernet.clone(), resolver, info);
        ip.init("tap0", None).unwrap();
        let icmp = IcmpLayer::new(ip);
        icmp.init().unwrap();
        Fixture {
            icmp,
            ethernet,
            device,
        }
    }

    fn icmp_part(frame: &[u8]) -> Vec<u8> {
        let header = Ipv4Header::from_bytes(&frame[14..]).unwrap();
        frame[14 + header.header_len()..14 + header.total_len as usize].to_vec()
    }

    #[test]
    fn test_double_init_rejected() {
        let fx = fixture();
        assert!(matches!(fx.icmp.init(), Err(StackError::AlreadyInitialized)));
    }

    #[test]
    fn test_unsupported_type_has_no_side_effects() {
        let fx = fixture();
        assert!(matches!(
            fx.icmp.send_message(b"x", 13, 0, 1, 1, PEER_IP),
            Err(StackError::UnsupportedIcmpType(13))
        ));
        assert_eq!(fx.icmp.pending_len(), 0);
        assert!(fx.device.sent().is_empty());
    }

    #[test]
    fn test_echo_request_is_recorded_and_sent() {
        let fx = fixture();
        fx.icmp.send_echo_request(PEER_IP, 7, 3, b"PING").unwrap();
        assert_eq!(fx.icmp.pending_len(), 1);

        let sent = fx.device.take_sent();
        let message = icmp_part(&sent[0]);
        assert_eq!(checksum(&message), 0);
        let header = IcmpHeader::from_bytes(&message).unwrap();
        assert!(header.is_echo_request());
        assert_eq!((header.identifier(), header.sequence()), (7, 3));
        assert_eq!(&message[8..], b"PING");
    }

    #[test]
    fn test_echo_reply_reports_rtt() {
        let fx = fixture();
        let rtts = fx.icmp.subscribe();
        fx.icmp.send_echo_request(PEER_IP, 7, 3, b"PING").unwrap();

        let reply = IcmpHeader::echo(ICMP_TYPE_ECHO_REPLY, 0, 7, 3).build_message(b"PING");
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &reply, PEER_IP);

        let report = rtts.try_recv().unwrap();
        assert_eq!(report.peer, PEER_IP);
        assert_eq!((report.identifier, report.sequence), (7, 3));
        assert_eq!(fx.icmp.pending_len(), 0);

        // The entry is consumed, a duplicate reply reports nothing.
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &reply, PEER_IP);
        assert!(rtts.try_recv().is_err());
    }

    #[test]
    fn test_unmatched_reply_is_ignored() {
        let fx = fixture();
        let rtts = fx.icmp.subscribe();
        fx.icmp.send_echo_request(PEER_IP, 7, 3, b"PING").unwrap();

        let reply = IcmpHeader::echo(ICMP_TYPE_ECHO_REPLY, 0, 7, 4).build_message(b"PING");
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &reply, PEER_IP);
        assert!(rtts.try_recv().is_err());
        assert_eq!(fx.icmp.pending_len(), 1);
    }

    #[test]
    fn test_echo_request_is_answered() {
        let fx = fixture();
        let request = IcmpHeader::echo(ICMP_TYPE_ECHO_REQUEST, 0, 1, 1).build_message(b"abc");
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &request, PEER_IP);

        let sent = fx.device.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][0..6], &PEER_MAC.0);

        let message = icmp_part(&sent[0]);
        let header = IcmpHeader::from_bytes(&message).unwrap();
        assert_eq!((header.msg_type, header.msg_code), (0, 0));
        assert_eq!((header.identifier(), header.sequence()), (1, 1));
        assert_eq!(&message[8..], b"abc");
        assert!(header.has_valid_checksum(&message));
        assert_eq!(fx.icmp.pending_len(), 0);
    }

    #[test]
    fn test_bad_checksum_is_dropped() {
        let fx = fixture();
        let mut request = IcmpHeader::echo(ICMP_TYPE_ECHO_REQUEST, 0, 1, 1).build_message(b"abc");
        request[8] ^= 0xff;
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &request, PEER_IP);
        fx.icmp.process_message(&CaptureMeta::new(60, 60), &request[..6], PEER_IP);
        assert!(fx.device.sent().is_empty());
    }

    #[test]
    fn test_failed_request_leaves_no_entry() {
        let fx = fixture();
        assert!(fx
            .icmp
            .send_echo_request(Ipv4Addr::new(10, 0, 0, 77), 1, 1, b"x")
            .is_err());
        assert_eq!(fx.icmp.pending_len(), 0);
    }
}
