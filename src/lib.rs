#![deny(unsafe_code)]

//! The _dhcpv6-client_ library is the core of a DHCPv6 (RFC 8415) client:
//! it acquires and maintains an IPv6 address, a delegated prefix, or just
//! stateless configuration for any number of network interfaces from a
//! single process.
//!
//! # Table of contents
//! The crate is layered the same way a network stack is, bottom-up:
//!
//!  * the [wire module](wire/index.html) parses and builds DHCPv6 messages. It is
//!    purely functional over byte buffers and never reads past the end of its input;
//!  * the [phy module](phy/index.html) defines the datagram [Device](phy/trait.Device.html)
//!    the rest of the crate talks to, and the OS implementation bound to UDP port 546;
//!  * the [socket module](socket/index.html) contains the client state machine.
//!    It is a pure transition function: every input is an [Event], every effect it wants
//!    is returned as an [Action] for somebody else to perform;
//!  * the [iface module](iface/index.html) shares one device between all clients,
//!    demultiplexes replies by transaction ID and interface, keeps per-client timers
//!    and executes the actions against a [Platform](iface/trait.Platform.html).
//!
//! # Driving the client
//! Nothing in this crate blocks or spawns threads. The caller owns the event loop:
//! call [Dispatcher::poll](iface/struct.Dispatcher.html#method.poll) whenever the
//! socket is readable or [poll_delay](iface/struct.Dispatcher.html#method.poll_delay)
//! has elapsed.
//!
//! # Feature flags
//! * `log` (default): route diagnostics through the `log` facade.
//! * `verbose`: additionally emit per-packet trace messages.
//! * `phy-udp_socket` (default): the OS datagram socket in
//!   [phy::UdpSocket](phy/struct.UdpSocket.html).
//!
//! [Event]: socket/dhcpv6/enum.Event.html
//! [Action]: socket/dhcpv6/enum.Action.html

#[macro_use]
mod macros;
mod rand;

pub mod iface;
pub mod phy;
pub mod socket;
pub mod time;
pub mod wire;
