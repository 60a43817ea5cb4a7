use std::io;
use std::net::Ipv6Addr;

use crate::socket::dhcpv6::{AddressConfig, LinkInfo};

/// The host services a [Dispatcher](struct.Dispatcher.html) relies on.
///
/// Interfaces are identified by index, the same index the device reports
/// for received datagrams.
pub trait Platform {
    /// Current state of the link, including the identity of the attached
    /// network (such as the Wi-Fi SSID) when there is one.
    fn link_status(&mut self, ifindex: u32) -> LinkInfo;

    /// Add `config.address`, or update its lifetimes if it is already present.
    fn set_address(&mut self, ifindex: u32, config: &AddressConfig) -> io::Result<()>;

    fn remove_address(&mut self, ifindex: u32, address: Ipv6Addr) -> io::Result<()>;
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn link_status(&mut self, ifindex: u32) -> LinkInfo {
        (**self).link_status(ifindex)
    }

    fn set_address(&mut self, ifindex: u32, config: &AddressConfig) -> io::Result<()> {
        (**self).set_address(ifindex, config)
    }

    fn remove_address(&mut self, ifindex: u32, address: Ipv6Addr) -> io::Result<()> {
        (**self).remove_address(ifindex, address)
    }
}
