//! IP level
//!
//! Validates inbound datagrams and hands their payload to the handler for the
//! carried protocol. Outbound, it picks the next hop (the destination itself on
//! the local subnet, the default gateway otherwise), resolves its hardware
//! address and sends the payload in as many fragments as the MTU requires.
//!
//! Received fragments are not reassembled: any datagram with a non-zero fragment
//! offset is dropped.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, trace, warn};

use crate::dispatch::Registry;
use crate::error::{Result, StackError};
use crate::iface::{AddressResolver, CaptureMeta, InterfaceInfo};
use crate::layer::ethernet::EthernetLayer;
use crate::network::ethernet::{MacAddr, ETHERTYPE_IPV4};
use crate::network::ipv4::{
    pad_options, plan_fragments, Ipv4Header, IPV4_HEADER_LEN, IPV4_MAX_HEADER_LEN,
};

pub const DEFAULT_TOS: u8 = 0x16;
pub const DEFAULT_TTL: u8 = 128;

/// Upper-layer receiver for one IP protocol number.
///
/// Called with the capture metadata, the datagram payload and the source address.
pub trait IpHandler: Send + Sync {
    fn handle(&self, meta: &CaptureMeta, payload: &[u8], src: Ipv4Addr);
}

impl<F> IpHandler for F
where
    F: Fn(&CaptureMeta, &[u8], Ipv4Addr) + Send + Sync,
{
    fn handle(&self, meta: &CaptureMeta, payload: &[u8], src: Ipv4Addr) {
        self(meta, payload, src)
    }
}

/// What the IP layer learned about its interface at init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub addr: Ipv4Addr,
    pub mtu: usize,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Appended to every outbound header, padded to a 4-byte multiple
    pub options: Vec<u8>,
}

impl IpConfig {
    pub fn header_len(&self) -> usize {
        IPV4_HEADER_LEN + self.options.len()
    }

    pub fn is_local(&self, dst: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(dst) & mask == u32::from(self.addr) & mask
    }

    /// The address whose hardware address a datagram to `dst` is sent to
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.is_local(dst) {
            dst
        } else {
            self.gateway
        }
    }
}

pub struct IpLayer {
    ethernet: Arc<EthernetLayer>,
    resolver: Arc<dyn AddressResolver>,
    info: Arc<dyn InterfaceInfo>,
    config: RwLock<Option<IpConfig>>,
    handlers: Registry<u8, dyn IpHandler>,
    ipid: AtomicU16,
    tos: u8,
    ttl: u8,
}

impl IpLayer {
    pub fn new(
        ethernet: Arc<EthernetLayer>,
        resolver: Arc<dyn AddressResolver>,
        info: Arc<dyn InterfaceInfo>,
    ) -> Arc<Self> {
        Self::with_header_fields(ethernet, resolver, info, DEFAULT_TOS, DEFAULT_TTL)
    }

    /// Like [`IpLayer::new`] with explicit type-of-service and TTL for outbound headers
    pub fn with_header_fields(
        ethernet: Arc<EthernetLayer>,
        resolver: Arc<dyn AddressResolver>,
        info: Arc<dyn InterfaceInfo>,
        tos: u8,
        ttl: u8,
    ) -> Arc<Self> {
        Arc::new(IpLayer {
            ethernet,
            resolver,
            info,
            config: RwLock::new(None),
            handlers: Registry::new(),
            ipid: AtomicU16::new(0),
            tos,
            ttl,
        })
    }

    /// Bring the layer up on `interface`.
    ///
    /// Initializes address resolution first, then learns the interface
    /// configuration, registers for IPv4 frames and resets the IPID counter.
    pub fn init(self: &Arc<Self>, interface: &str, options: Option<&[u8]>) -> Result<()> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if config.is_some() {
            return Err(StackError::AlreadyInitialized);
        }

        self.resolver.initialize(interface)?;

        let options = options.map(pad_options).unwrap_or_default();
        if IPV4_HEADER_LEN + options.len() > IPV4_MAX_HEADER_LEN {
            return Err(StackError::OptionsTooLong { len: options.len() });
        }

        let learned = IpConfig {
            addr: self.info.ip_addr(interface)?,
            mtu: self.info.mtu(interface)?.min(u16::MAX as usize),
            netmask: self.info.netmask(interface)?,
            gateway: self.info.default_gateway(interface)?,
            options,
        };
        info!(
            "IP level up on {}: {} mask {} gw {} mtu {}",
            interface, learned.addr, learned.netmask, learned.gateway, learned.mtu
        );
        *config = Some(learned);
        drop(config);

        let layer = Arc::downgrade(self);
        self.ethernet.register_callback(
            ETHERTYPE_IPV4,
            Arc::new(move |meta: &CaptureMeta, data: &[u8], src: MacAddr| {
                if let Some(layer) = layer.upgrade() {
                    layer.process_datagram(meta, data, src);
                }
            }),
        );
        self.ipid.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn config(&self) -> Result<IpConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StackError::NotInitialized)
    }

    /// The identification the next originated datagram will carry
    pub fn ipid(&self) -> u16 {
        self.ipid.load(Ordering::SeqCst)
    }

    /// Install `handler` for IP protocol `protocol`, replacing any earlier one.
    pub fn register_protocol(&self, protocol: u8, handler: Arc<dyn IpHandler>) {
        if self.handlers.register(protocol, handler).is_some() {
            debug!("replaced handler for IP protocol {}", protocol);
        }
    }

    /// Validate one datagram and pass its payload to the protocol handler.
    pub fn process_datagram(&self, meta: &CaptureMeta, data: &[u8], _src: MacAddr) {
        let Some(header) = Ipv4Header::from_bytes(data) else {
            trace!("dropping malformed IPv4 header");
            return;
        };
        let header_len = header.header_len();

        if !header.has_valid_checksum(&data[..header_len]) {
            trace!("dropping datagram from {}: bad header checksum", header.src_addr);
            return;
        }

        let total_len = header.total_len as usize;
        if total_len < header_len || total_len > data.len() {
            trace!("dropping datagram from {}: bad total length {}", header.src_addr, total_len);
            return;
        }

        if header.fragment_offset() != 0 {
            trace!(
                "dropping fragment {} of datagram {} from {}",
                header.fragment_offset(),
                header.id,
                header.src_addr
            );
            return;
        }

        debug!(
            "IP {} -> {}: hlen {} id {} ttl {} df {} mf {} offset {} proto {}",
            header.src_addr,
            header.dst_addr,
            header_len,
            header.id,
            header.ttl,
            header.dont_fragment(),
            header.more_fragments(),
            header.fragment_offset(),
            header.protocol
        );

        let Some(handler) = self.handlers.lookup(header.protocol) else {
            trace!("no handler for IP protocol {}", header.protocol);
            return;
        };

        // Ethernet padding past `total_len` is not part of the payload.
        handler.handle(meta, &data[header_len..total_len], header.src_addr);
    }

    /// Send `data` to `dst` as protocol `protocol`, fragmenting as needed.
    ///
    /// All fragments share one identification, and the counter advances by one
    /// per call once the next hop has been resolved. A fragment that fails to go
    /// out does not stop the remaining ones; the first error is returned.
    pub fn send_datagram(&self, dst: Ipv4Addr, data: &[u8], protocol: u8) -> Result<()> {
        let config = self.config()?;
        let header_len = config.header_len();
        if header_len + data.len() > u16::MAX as usize {
            return Err(StackError::PayloadTooLarge { len: data.len() });
        }

        let next_hop = config.next_hop(dst);
        let dst_mac = self
            .resolver
            .resolve(next_hop)
            .ok_or(StackError::Unresolved(next_hop))?;

        let fragments = plan_fragments(data.len(), config.mtu, header_len).ok_or(
            StackError::MtuTooSmall {
                mtu: config.mtu,
                header_len,
            },
        )?;

        let id = self.ipid.fetch_add(1, Ordering::SeqCst);
        let mut result = Ok(());

        for fragment in &fragments {
            let chunk = &data[fragment.offset..fragment.offset + fragment.len];
            let mut header = Ipv4Header::new(
                self.tos,
                chunk.len(),
                id,
                fragment.flags_frag_offset(),
                self.ttl,
                protocol,
                config.addr,
                dst,
                &config.options,
            );
            header.update_checksum();

            let mut datagram = header.to_bytes();
            datagram.extend_from_slice(chunk);

            if let Err(e) = self.ethernet.send_frame(&datagram, ETHERTYPE_IPV4, dst_mac) {
                warn!("fragment at offset {} of datagram {} failed: {}", fragment.offset, id, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        debug!(
            "sent datagram {} to {} via {} in {} fragment(s)",
            id,
            dst,
            next_hop,
            fragments.len()
        );
        result
    }
}
