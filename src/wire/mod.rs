/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens through the
   [Packet](dhcpv6/struct.Packet.html) wrapper and the
   [OptionList](dhcpv6/struct.OptionList.html) /
   [OptionWriter](dhcpv6/struct.OptionWriter.html) pair.
 * Second, it provides a compact, high-level representation of a whole
   client message, [Repr](dhcpv6/struct.Repr.html), which can be parsed
   from and emitted into a sequence of octets.

Parsing never reads past the end of the input: every length read from the
network is checked before it is used, and a failed check yields
[Error::Truncated] naming where the bad record starts and how many bytes it
asked for. Building never writes past the end of the output area; running
out of space yields [Error::NoRoom].
*/

use core::fmt;

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

pub mod dhcpv6;

pub use self::dhcpv6::{
    Binding as Dhcpv6Binding, Dhcpv6Option, Duid, DuidType, Ia as Dhcpv6Ia, IaAddr as Dhcpv6IaAddr,
    IaKind, IaPrefix as Dhcpv6IaPrefix, IaRepr as Dhcpv6IaRepr, MessageType as Dhcpv6MessageType,
    OptionIndex as Dhcpv6OptionIndex, OptionList as Dhcpv6OptionList,
    OptionWriter as Dhcpv6OptionWriter, Packet as Dhcpv6Packet, Repr as Dhcpv6Repr,
    Resource as Dhcpv6Resource, Status as Dhcpv6Status, StatusCode as Dhcpv6StatusCode,
    ALL_DHCP_RELAY_AGENTS_AND_SERVERS, CLIENT_PORT as DHCPV6_CLIENT_PORT,
    SERVER_PORT as DHCPV6_SERVER_PORT,
};

/// Parsing or emission of a packet failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A record starting at `offset` needs `expected` bytes but only `actual` remain.
    Truncated {
        offset: usize,
        expected: usize,
        actual: usize,
    },
    /// The output area cannot hold the record being built.
    NoRoom { needed: usize, available: usize },
    /// A field holds a value outside of its allowed range.
    Malformed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Truncated {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "truncated record at offset {offset}: expected {expected} bytes, found {actual}"
            ),
            Error::NoRoom { needed, available } => {
                write!(f, "no room: needed {needed} bytes, {available} available")
            }
            Error::Malformed => write!(f, "malformed field"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Truncated {
            offset: 12,
            expected: 20,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "truncated record at offset 12: expected 20 bytes, found 3"
        );
        let err = Error::NoRoom {
            needed: 8,
            available: 2,
        };
        assert_eq!(err.to_string(), "no room: needed 8 bytes, 2 available");
    }
}
