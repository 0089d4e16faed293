//! Bring-up of the whole stack in dependency order.

use std::sync::Arc;

use log::info;

use crate::config::StackConfig;
use crate::error::Result;
use crate::iface::{AddressResolver, InterfaceInfo, LinkDevice};
use crate::layer::{EthernetLayer, IcmpLayer, IpLayer};
use crate::network::MacAddr;

/// The three levels, started and wired together
pub struct Stack {
    pub ethernet: Arc<EthernetLayer>,
    pub ip: Arc<IpLayer>,
    pub icmp: Arc<IcmpLayer>,
}

impl Stack {
    /// Start Ethernet on `device`, then initialize IP and ICMP on top of it.
    ///
    /// If a later level fails, the Ethernet level is stopped again.
    pub fn bring_up(
        config: &StackConfig,
        device: Arc<dyn LinkDevice>,
        own_addr: MacAddr,
        info: Arc<dyn InterfaceInfo>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        let ethernet = EthernetLayer::with_poll_timeout(config.poll_timeout);
        ethernet.start(device, own_addr)?;
        Self::layer_up(config, ethernet, info, resolver)
    }

    /// Like [`Stack::bring_up`] on the tap interface named in `config`.
    pub fn bring_up_interface(
        config: &StackConfig,
        info: Arc<dyn InterfaceInfo>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        let ethernet = EthernetLayer::with_poll_timeout(config.poll_timeout);
        ethernet.start_interface(&config.interface, info.as_ref())?;
        Self::layer_up(config, ethernet, info, resolver)
    }

    fn layer_up(
        config: &StackConfig,
        ethernet: Arc<EthernetLayer>,
        info: Arc<dyn InterfaceInfo>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self> {
        let ip = IpLayer::with_header_fields(
            Arc::clone(&ethernet),
            resolver,
            info,
            config.type_of_service,
            config.ttl,
        );
        let icmp = IcmpLayer::new(Arc::clone(&ip));

        let upper = ip
            .init(&config.interface, config.ip_options.as_deref())
            .and_then(|_| icmp.init());
        if let Err(e) = upper {
            let _ = ethernet.stop();
            return Err(e);
        }

        info!("stack up on {}", config.interface);
        Ok(Stack { ethernet, ip, icmp })
    }

    /// Stop capturing. Frames already being processed finish on their own.
    pub fn shutdown(&self) -> Result<()> {
        self.ethernet.stop()
    }
}
