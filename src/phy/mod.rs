/*! Access to the datagram transport.

The `phy` module defines the [Device] trait the multiplexer talks to: a
datagram endpoint bound to the DHCPv6 client port that reports, for every
datagram it receives, the index of the interface it arrived on, and that
sends every datagram to the `All_DHCP_Relay_Agents_and_Servers` group on a
chosen interface.

Two implementations are provided:

 * [UdpSocket], the OS socket (feature `phy-udp_socket`, Unix only);
 * [Queue], an in-memory device for tests and simulations.

Devices are non-blocking: [Device::recv] returns `Ok(None)` when no
datagram is pending. An event loop that wants to sleep until the socket
becomes readable can use [wait].
*/

use std::io;
use std::net::Ipv6Addr;

use crate::time::Duration;

mod queue;

pub use self::queue::Queue;

cfg_if::cfg_if! {
    if #[cfg(all(feature = "phy-udp_socket", unix))] {
        mod udp_socket;

        pub use self::udp_socket::UdpSocket;
    }
}

/// Metadata of a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMeta {
    /// Number of bytes written into the receive buffer.
    pub len: usize,
    /// Interface the datagram arrived on, when the OS reported it.
    pub ifindex: Option<u32>,
    pub source: Ipv6Addr,
}

/// A datagram endpoint bound to the DHCPv6 client port.
pub trait Device {
    /// Create and bind the underlying endpoint. Opening an open device is a no-op.
    fn open(&mut self) -> io::Result<()>;

    /// Release the underlying endpoint.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Receive one datagram into `buffer`.
    ///
    /// Returns `Ok(None)` if nothing is pending. Datagrams longer than
    /// `buffer` are truncated.
    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<RxMeta>>;

    /// Send `data` to the DHCPv6 servers reachable through interface `ifindex`.
    fn send(&mut self, ifindex: u32, data: &[u8]) -> io::Result<()>;
}

/// Wait until `fd` becomes readable or `duration` elapses.
///
/// Without a descriptor this just sleeps. With no duration it waits forever.
#[cfg(all(feature = "phy-udp_socket", unix))]
pub fn wait(fd: Option<std::os::unix::io::RawFd>, duration: Option<Duration>) -> io::Result<()> {
    udp_socket::wait(fd, duration)
}

/// Wait until `duration` elapses.
#[cfg(not(all(feature = "phy-udp_socket", unix)))]
pub fn wait(_fd: Option<i32>, duration: Option<Duration>) -> io::Result<()> {
    if let Some(duration) = duration {
        std::thread::sleep(duration.into());
    }
    Ok(())
}
