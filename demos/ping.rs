//! Ping the host kernel through the user-space stack
//!
//! Creates a tap interface, gives the host side 10.0.0.254/24 and runs the
//! stack as 10.0.0.1 with its own hardware address on the other end of the
//! link. The stack pings the host, and answers `ping 10.0.0.1` from the host
//! while it runs.
//!
//! ```sh
//! cargo run --example ping -- [tap name] [count]
//! ```
//!
//! Note: Root/sudo privileges are required to create and configure the tap device.

use std::io;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use rawnet::iface::{InterfaceInfo, StaticInterfaceInfo, StaticResolver, SystemInterfaceInfo};
use rawnet::{MacAddr, Stack, StackConfig};

const STACK_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const STACK_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

fn ip(args: &[&str]) -> io::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("`ip {}` failed", args.join(" ")),
        ));
    }
    Ok(())
}

/// Address the host end and teach it our hardware address, since the stack
/// does not answer address resolution itself.
fn configure_host_side(tap: &str) -> io::Result<()> {
    ip(&["addr", "replace", "10.0.0.254/24", "dev", tap])?;
    ip(&["link", "set", "up", "dev", tap])?;
    ip(&[
        "neigh",
        "replace",
        &STACK_IP.to_string(),
        "lladdr",
        &STACK_MAC.to_string(),
        "dev",
        tap,
    ])
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let tap = args.next().unwrap_or_else(|| "tap0".to_string());
    let count: u16 = match args.next() {
        Some(count) => count.parse()?,
        None => 4,
    };

    let info = Arc::new(StaticInterfaceInfo {
        hw_addr: STACK_MAC,
        ip_addr: STACK_IP,
        mtu: 1500,
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: HOST_IP,
    });
    let resolver = Arc::new(StaticResolver::new());

    let config = StackConfig::new(tap.as_str());
    let stack = Stack::bring_up_interface(&config, info, resolver.clone())?;

    configure_host_side(&tap)?;
    let host_mac = SystemInterfaceInfo.hw_addr(&tap)?;
    resolver.insert(HOST_IP, host_mac);
    println!("Stack {} ({}) on {}, host {} ({})", STACK_IP, STACK_MAC, tap, HOST_IP, host_mac);

    let rtts = stack.icmp.subscribe();
    let identifier = std::process::id() as u16;

    for sequence in 1..=count {
        stack
            .icmp
            .send_echo_request(HOST_IP, identifier, sequence, b"rawnet ping payload")?;
        match rtts.recv_timeout(Duration::from_secs(1)) {
            Ok(report) => println!(
                "reply from {}: seq={} time={:.3} ms",
                report.peer,
                report.sequence,
                report.rtt.as_secs_f64() * 1000.0
            ),
            Err(_) => println!("no reply for seq={}", sequence),
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    println!("{} request(s) left unanswered", stack.icmp.pending_len());
    stack.shutdown()?;
    Ok(())
}
