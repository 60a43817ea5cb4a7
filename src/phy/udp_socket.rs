#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use super::{Device, RxMeta};
use crate::time::Duration;
use crate::wire::{ALL_DHCP_RELAY_AGENTS_AND_SERVERS, DHCPV6_CLIENT_PORT, DHCPV6_SERVER_PORT};

/// A UDP socket bound to `[::]:546` that reports the arrival interface of
/// every datagram through `IPV6_PKTINFO`.
#[derive(Debug)]
pub struct UdpSocket {
    socket: Option<Socket>,
    port: u16,
}

impl UdpSocket {
    /// Create a closed socket for the DHCPv6 client port.
    pub fn new() -> UdpSocket {
        Self::with_port(DHCPV6_CLIENT_PORT)
    }

    /// Create a closed socket for a non-standard client port.
    pub fn with_port(port: u16) -> UdpSocket {
        UdpSocket { socket: None, port }
    }

    /// The descriptor to wait on, while open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|socket| socket.as_raw_fd())
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for UdpSocket {
    fn open(&mut self) -> io::Result<()> {
        if self.socket.is_none() {
            self.socket = Some(bind(self.port)?);
            net_debug!("DHCPv6 socket bound to [::]:{}", self.port);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            net_debug!("DHCPv6 socket closed");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<RxMeta>> {
        let fd = self.socket()?.as_raw_fd();

        let mut source: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        // u64 keeps the control buffer aligned for cmsghdr.
        let mut control = [0u64; 16];
        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut source as *mut libc::sockaddr_in6 as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let len = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if len < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(err),
            };
        }
        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            net_debug!("DHCPv6 datagram truncated to {} bytes", buffer.len());
        }

        Ok(Some(RxMeta {
            len: (len as usize).min(buffer.len()),
            ifindex: unsafe { pktinfo_ifindex(&msg) },
            source: Ipv6Addr::from(source.sin6_addr.s6_addr),
        }))
    }

    fn send(&mut self, ifindex: u32, data: &[u8]) -> io::Result<()> {
        let socket = self.socket()?;
        socket.set_multicast_if_v6(ifindex)?;
        let destination = SocketAddrV6::new(
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DHCPV6_SERVER_PORT,
            0,
            ifindex,
        );
        let sent = socket.send_to(data, &destination.into())?;
        if sent != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram was not sent in full",
            ));
        }
        Ok(())
    }
}

fn bind(port: u16) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_hops_v6(1)?;
    socket.set_multicast_loop_v6(false)?;
    set_recv_pktinfo(socket.as_raw_fd())?;
    let address = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&address.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn set_recv_pktinfo(fd: RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of_val(&on) as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Find the arrival interface in the ancillary data of a received message.
///
/// # Safety
/// `msg` must describe a control buffer filled in by `recvmsg`.
unsafe fn pktinfo_ifindex(msg: &libc::msghdr) -> Option<u32> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let header = &*cmsg;
        if header.cmsg_level == libc::IPPROTO_IPV6 && header.cmsg_type == libc::IPV6_PKTINFO {
            let info = (libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo).read_unaligned();
            return Some(info.ipi6_ifindex as u32);
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

pub(super) fn wait(fd: Option<RawFd>, duration: Option<Duration>) -> io::Result<()> {
    let fd = match fd {
        Some(fd) => fd,
        None => {
            if let Some(duration) = duration {
                std::thread::sleep(duration.into());
            }
            return Ok(());
        }
    };

    let timeout = match duration {
        Some(duration) => duration.total_millis().min(libc::c_int::MAX as u64) as libc::c_int,
        None => -1,
    };
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}
