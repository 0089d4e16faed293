//! Interface introspection
//!
//! The IP layer needs the interface's own addresses, its MTU, netmask and the
//! default gateway. [`SystemInterfaceInfo`] asks the host; [`StaticInterfaceInfo`]
//! hands out fixed values.

use std::fs;
use std::net::Ipv4Addr;
use std::process::Command;

use crate::error::{Result, StackError};
use crate::network::MacAddr;

pub trait InterfaceInfo: Send + Sync {
    fn hw_addr(&self, interface: &str) -> Result<MacAddr>;
    fn ip_addr(&self, interface: &str) -> Result<Ipv4Addr>;
    fn mtu(&self, interface: &str) -> Result<usize>;
    fn netmask(&self, interface: &str) -> Result<Ipv4Addr>;
    fn default_gateway(&self, interface: &str) -> Result<Ipv4Addr>;
}

/// Queries a Linux host through sysfs and the `ip` tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaceInfo;

impl SystemInterfaceInfo {
    fn sysfs(interface: &str, attribute: &str) -> Result<String> {
        let path = format!("/sys/class/net/{}/{}", interface, attribute);
        Ok(fs::read_to_string(path)?)
    }

    fn ip_command(args: &[&str]) -> Result<String> {
        let output = Command::new("ip").args(args).output()?;
        if !output.status.success() {
            return Err(StackError::Interface(format!(
                "`ip {}` exited with {}",
                args.join(" "),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn address(interface: &str) -> Result<(Ipv4Addr, u8)> {
        let output = Self::ip_command(&["-o", "-4", "addr", "show", "dev", interface])?;
        parse_inet_addr(&output)
            .ok_or_else(|| StackError::Interface(format!("no IPv4 address on {}", interface)))
    }
}

impl InterfaceInfo for SystemInterfaceInfo {
    fn hw_addr(&self, interface: &str) -> Result<MacAddr> {
        let text = Self::sysfs(interface, "address")?;
        text.parse()
            .map_err(|_| StackError::Interface(format!("bad hardware address {:?}", text.trim())))
    }

    fn ip_addr(&self, interface: &str) -> Result<Ipv4Addr> {
        Self::address(interface).map(|(addr, _)| addr)
    }

    fn mtu(&self, interface: &str) -> Result<usize> {
        let text = Self::sysfs(interface, "mtu")?;
        text.trim()
            .parse()
            .map_err(|_| StackError::Interface(format!("bad MTU {:?}", text.trim())))
    }

    fn netmask(&self, interface: &str) -> Result<Ipv4Addr> {
        Self::address(interface).map(|(_, prefix)| prefix_to_netmask(prefix))
    }

    fn default_gateway(&self, interface: &str) -> Result<Ipv4Addr> {
        let output = Self::ip_command(&["-4", "route", "show", "default"])?;
        parse_default_route(&output, interface)
            .ok_or_else(|| StackError::Interface(format!("no default route via {}", interface)))
    }
}

/// Fixed answers, regardless of the interface name asked for.
#[derive(Debug, Clone)]
pub struct StaticInterfaceInfo {
    pub hw_addr: MacAddr,
    pub ip_addr: Ipv4Addr,
    pub mtu: usize,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl InterfaceInfo for StaticInterfaceInfo {
    fn hw_addr(&self, _interface: &str) -> Result<MacAddr> {
        Ok(self.hw_addr)
    }

    fn ip_addr(&self, _interface: &str) -> Result<Ipv4Addr> {
        Ok(self.ip_addr)
    }

    fn mtu(&self, _interface: &str) -> Result<usize> {
        Ok(self.mtu)
    }

    fn netmask(&self, _interface: &str) -> Result<Ipv4Addr> {
        Ok(self.netmask)
    }

    fn default_gateway(&self, _interface: &str) -> Result<Ipv4Addr> {
        Ok(self.gateway)
    }
}

/// Convert a CIDR prefix length into a dotted netmask
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    let prefix = prefix.min(32) as u32;
    let bits = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Ipv4Addr::from(bits)
}

/// Find the first `inet a.b.c.d/len` pair in `ip -o -4 addr` output
pub fn parse_inet_addr(output: &str) -> Option<(Ipv4Addr, u8)> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token != "inet" {
            continue;
        }
        let cidr = tokens.next()?;
        let (addr, prefix) = cidr.split_once('/')?;
        let prefix: u8 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        return Some((addr.parse().ok()?, prefix));
    }
    None
}

/// Pick the gateway from `ip -4 route show default` output
///
/// A default route bound to `interface` wins over one on another device.
pub fn parse_default_route(output: &str, interface: &str) -> Option<Ipv4Addr> {
    let mut fallback = None;
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"default") {
            continue;
        }
        let gateway = tokens
            .windows(2)
            .find(|pair| pair[0] == "via")
            .and_then(|pair| pair[1].parse::<Ipv4Addr>().ok());
        let on_interface = tokens.windows(2).any(|pair| pair[0] == "dev" && pair[1] == interface);

        match gateway {
            Some(gateway) if on_interface => return Some(gateway),
            Some(gateway) if fallback.is_none() => fallback = Some(gateway),
            _ => {}
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_to_netmask() {
        assert_eq!(prefix_to_netmask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(20), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(prefix_to_netmask(32), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(prefix_to_netmask(0), Ipv4Addr::new(0, 0, 0, 0));
    }

    #[test]
    fn test_parse_inet_addr() {
        let output = concat!(
            "3: tap0    inet 10.0.0.1/24 brd 10.0.0.255 scope global tap0\\",
            "       valid_lft forever preferred_lft forever\n"
        );
        assert_eq!(parse_inet_addr(output), Some((Ipv4Addr::new(10, 0, 0, 1), 24)));
        assert_eq!(parse_inet_addr(""), None);
        assert_eq!(parse_inet_addr("inet 10.0.0.1/40"), None);
    }

    #[test]
    fn test_parse_default_route() {
        let output = "default via 192.168.1.1 dev wlan0 proto dhcp metric 600\n\
                      default via 10.0.0.254 dev tap0 metric 700\n";
        assert_eq!(parse_default_route(output, "tap0"), Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(parse_default_route(output, "eth0"), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(parse_default_route("", "eth0"), None);
    }
}
