// DHCPv6 message and option formats, RFC 8415 sections 8 and 21.

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;
use std::borrow::Cow;
use std::net::Ipv6Addr;

use super::{Error, Result};

pub const SERVER_PORT: u16 = 547;
pub const CLIENT_PORT: u16 = 546;

/// The link-scoped `All_DHCP_Relay_Agents_and_Servers` group.
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Timer or lifetime value meaning "forever" (RFC 8415, section 7.7).
pub const INFINITY: u32 = 0xffff_ffff;

/// A DUID is at most 128 octets plus its 2-octet type.
pub const MAX_DUID_LEN: usize = 130;
pub const MAX_REQUEST_OPTIONS: usize = 16;
pub const MAX_IA_RESOURCES: usize = 4;

/// Hardware type of Ethernet in DUID-LL and DUID-LLT.
pub const HARDWARE_TYPE_ETHERNET: u16 = 1;

enum_with_unknown! {
    /// The possible message types of a DHCPv6 packet.
    pub enum MessageType(u8) {
        Solicit = 1,
        Advertise = 2,
        Request = 3,
        Confirm = 4,
        Renew = 5,
        Rebind = 6,
        Reply = 7,
        Release = 8,
        Decline = 9,
        Reconfigure = 10,
        InformationRequest = 11,
        RelayForw = 12,
        RelayRepl = 13,
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Solicit => write!(f, "solicit"),
            Self::Advertise => write!(f, "advertise"),
            Self::Request => write!(f, "request"),
            Self::Confirm => write!(f, "confirm"),
            Self::Renew => write!(f, "renew"),
            Self::Rebind => write!(f, "rebind"),
            Self::Reply => write!(f, "reply"),
            Self::Release => write!(f, "release"),
            Self::Decline => write!(f, "decline"),
            Self::Reconfigure => write!(f, "reconfigure"),
            Self::InformationRequest => write!(f, "information-request"),
            Self::RelayForw => write!(f, "relay-forw"),
            Self::RelayRepl => write!(f, "relay-repl"),
            Self::Unknown(a) => write!(f, "unknown({a})"),
        }
    }
}

enum_with_unknown! {
    /// Status codes carried in the STATUS_CODE option.
    pub enum StatusCode(u16) {
        Success = 0,
        UnspecFail = 1,
        NoAddrsAvail = 2,
        NoBinding = 3,
        NotOnLink = 4,
        UseMulticast = 5,
        NoPrefixAvail = 6,
    }
}

impl StatusCode {
    /// "No addresses" for IA_NA, "no prefixes" for IA_PD.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NoAddrsAvail | Self::NoPrefixAvail)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Success => write!(f, "success"),
            Self::UnspecFail => write!(f, "unspec-fail"),
            Self::NoAddrsAvail => write!(f, "no-addrs-avail"),
            Self::NoBinding => write!(f, "no-binding"),
            Self::NotOnLink => write!(f, "not-on-link"),
            Self::UseMulticast => write!(f, "use-multicast"),
            Self::NoPrefixAvail => write!(f, "no-prefix-avail"),
            Self::Unknown(a) => write!(f, "unknown({a})"),
        }
    }
}

enum_with_unknown! {
    /// DUID types (RFC 8415, section 11).
    pub enum DuidType(u16) {
        LinkLayerTime = 1,
        Enterprise = 2,
        LinkLayer = 3,
        Uuid = 4,
    }
}

pub(crate) mod field {
    #![allow(non_snake_case)]
    #![allow(unused)]

    use crate::wire::field::*;

    //  0                   1                   2                   3
    //  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |    msg-type   |               transaction-id                  |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // .                 options (variable number and length)          .
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const MTYPE: usize = 0;
    pub const XID: Field = 1..4;
    pub const OPTIONS: Rest = 4..;

    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |          option-code          |           option-len          |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // .                  option-data (option-len octets)              .
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const OPT_CODE: Field = 0..2;
    pub const OPT_LEN: Field = 2..4;
    pub const OPT_HEADER_LEN: usize = 4;

    // IA_NA and IA_PD share one layout.
    //
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                        IAID (4 octets)                        |
    // |                              T1                               |
    // |                              T2                               |
    // .                         IA_NA-options                         .
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const IA_IAID: Field = 0..4;
    pub const IA_T1: Field = 4..8;
    pub const IA_T2: Field = 8..12;
    pub const IA_OPTIONS: Rest = 12..;

    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                 IPv6-address (16 octets)                      |
    // |                      preferred-lifetime                       |
    // |                        valid-lifetime                         |
    // .                        IAaddr-options                         .
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const IAADDR_ADDRESS: Field = 0..16;
    pub const IAADDR_PREFERRED: Field = 16..20;
    pub const IAADDR_VALID: Field = 20..24;
    pub const IAADDR_OPTIONS: Rest = 24..;

    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                      preferred-lifetime                       |
    // |                        valid-lifetime                         |
    // | prefix-length |  IPv6-prefix (16 octets)                      |
    // .                       IAprefix-options                        .
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    pub const IAPREFIX_PREFERRED: Field = 0..4;
    pub const IAPREFIX_VALID: Field = 4..8;
    pub const IAPREFIX_LENGTH: usize = 8;
    pub const IAPREFIX_PREFIX: Field = 9..25;
    pub const IAPREFIX_OPTIONS: Rest = 25..;

    // status-code (2 octets) followed by a UTF-8 status-message.
    pub const STATUS_CODE: Field = 0..2;
    pub const STATUS_MESSAGE: Rest = 2..;

    pub const OPT_CLIENTID: u16 = 1;
    pub const OPT_SERVERID: u16 = 2;
    pub const OPT_IA_NA: u16 = 3;
    pub const OPT_IA_TA: u16 = 4;
    pub const OPT_IAADDR: u16 = 5;
    pub const OPT_ORO: u16 = 6;
    pub const OPT_PREFERENCE: u16 = 7;
    pub const OPT_ELAPSED_TIME: u16 = 8;
    pub const OPT_RELAY_MSG: u16 = 9;
    pub const OPT_AUTH: u16 = 11;
    pub const OPT_UNICAST: u16 = 12;
    pub const OPT_STATUS_CODE: u16 = 13;
    pub const OPT_RAPID_COMMIT: u16 = 14;
    pub const OPT_USER_CLASS: u16 = 15;
    pub const OPT_VENDOR_CLASS: u16 = 16;
    pub const OPT_VENDOR_OPTS: u16 = 17;
    pub const OPT_INTERFACE_ID: u16 = 18;
    pub const OPT_RECONF_MSG: u16 = 19;
    pub const OPT_RECONF_ACCEPT: u16 = 20;
    pub const OPT_DNS_SERVERS: u16 = 23;
    pub const OPT_DOMAIN_LIST: u16 = 24;
    pub const OPT_IA_PD: u16 = 25;
    pub const OPT_IAPREFIX: u16 = 26;
    pub const OPT_INFORMATION_REFRESH_TIME: u16 = 32;
    pub const OPT_NTP_SERVER: u16 = 56;
    pub const OPT_SOL_MAX_RT: u16 = 82;
    pub const OPT_INF_MAX_RT: u16 = 83;
    // RFC 8910
    pub const OPT_CAPTIVE_PORTAL: u16 = 103;
}

pub use self::field::{
    OPT_CAPTIVE_PORTAL, OPT_CLIENTID, OPT_DNS_SERVERS, OPT_DOMAIN_LIST, OPT_ELAPSED_TIME,
    OPT_IAADDR, OPT_IAPREFIX, OPT_IA_NA, OPT_IA_PD, OPT_INFORMATION_REFRESH_TIME,
    OPT_INF_MAX_RT, OPT_ORO, OPT_PREFERENCE, OPT_RAPID_COMMIT, OPT_SERVERID, OPT_SOL_MAX_RT,
    OPT_STATUS_CODE,
};

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        Err(Error::Truncated {
            offset: 0,
            expected,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}

fn read_address(data: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[..16]);
    Ipv6Addr::from(octets)
}

/// A representation of a single DHCPv6 option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Dhcpv6Option<'a> {
    pub code: u16,
    pub data: &'a [u8],
}

impl<'a> Dhcpv6Option<'a> {
    pub const fn new(code: u16, data: &'a [u8]) -> Dhcpv6Option<'a> {
        Dhcpv6Option { code, data }
    }

    /// Return the length of the option including its header.
    pub fn buffer_len(&self) -> usize {
        field::OPT_HEADER_LEN + self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    code: u16,
    start: usize,
    end: usize,
}

/// A parsed sequence of options over one contiguous buffer.
///
/// The list is built by a single bounds-checked pass in [parse](#method.parse);
/// every option it hands out borrows the original buffer, nothing is copied.
/// Nested containers (the payload of IA_NA, IA_PD, IAADDR, IAPREFIX) are
/// themselves option lists and are parsed with the same function on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionList<'a> {
    buffer: &'a [u8],
    records: Vec<Record>,
}

impl<'a> OptionList<'a> {
    /// Parse `buffer` into its options.
    ///
    /// Fails if the last option is cut short, in which case the error names
    /// the offset of the broken option header within `buffer`.
    pub fn parse(buffer: &'a [u8]) -> Result<OptionList<'a>> {
        let mut records = Vec::new();
        let mut offset = 0;
        while offset < buffer.len() {
            let remaining = buffer.len() - offset;
            if remaining < field::OPT_HEADER_LEN {
                return Err(Error::Truncated {
                    offset,
                    expected: field::OPT_HEADER_LEN,
                    actual: remaining,
                });
            }
            let header = &buffer[offset..offset + field::OPT_HEADER_LEN];
            let code = NetworkEndian::read_u16(&header[field::OPT_CODE]);
            let len = NetworkEndian::read_u16(&header[field::OPT_LEN]) as usize;
            if remaining < field::OPT_HEADER_LEN + len {
                return Err(Error::Truncated {
                    offset,
                    expected: field::OPT_HEADER_LEN + len,
                    actual: remaining,
                });
            }
            let start = offset + field::OPT_HEADER_LEN;
            records.push(Record {
                code,
                start,
                end: start + len,
            });
            offset = start + len;
        }
        Ok(OptionList { buffer, records })
    }

    pub const fn empty() -> OptionList<'static> {
        OptionList {
            buffer: &[],
            records: Vec::new(),
        }
    }

    /// Return the number of options.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return the buffer the list was parsed from.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn get(&self, index: usize) -> Option<Dhcpv6Option<'a>> {
        let buffer = self.buffer;
        self.records
            .get(index)
            .map(|record| Dhcpv6Option::new(record.code, &buffer[record.start..record.end]))
    }

    pub fn iter(&self) -> impl Iterator<Item = Dhcpv6Option<'a>> + '_ {
        let buffer = self.buffer;
        self.records
            .iter()
            .map(move |record| Dhcpv6Option::new(record.code, &buffer[record.start..record.end]))
    }

    /// Find the first option with `code` at or after position `start`.
    ///
    /// Returns its position, so that repeated options can be walked by
    /// calling again with `position + 1`.
    pub fn find(&self, code: u16, start: usize) -> Option<(usize, Dhcpv6Option<'a>)> {
        let index = self
            .records
            .iter()
            .skip(start)
            .position(|record| record.code == code)?
            + start;
        self.get(index).map(|option| (index, option))
    }

    /// Return the data of the first option with `code`.
    pub fn first(&self, code: u16) -> Option<&'a [u8]> {
        self.find(code, 0).map(|(_, option)| option.data)
    }

    /// Iterate the data of every option with `code`, in order.
    pub fn all(&self, code: u16) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.iter()
            .filter(move |option| option.code == code)
            .map(|option| option.data)
    }

    /// Detach the parsed layout from the buffer.
    pub fn index(&self) -> OptionIndex {
        OptionIndex {
            records: self.records.clone(),
            len: self.buffer.len(),
        }
    }

    /// A DUID-carrying option. Empty DUIDs are treated as absent.
    pub fn duid(&self, code: u16) -> Option<&'a [u8]> {
        self.first(code).filter(|data| !data.is_empty())
    }

    pub fn client_id(&self) -> Option<&'a [u8]> {
        self.duid(field::OPT_CLIENTID)
    }

    pub fn server_id(&self) -> Option<&'a [u8]> {
        self.duid(field::OPT_SERVERID)
    }

    /// A one-octet option. Wrong-sized options are treated as absent.
    pub fn u8(&self, code: u16) -> Option<u8> {
        match self.first(code)? {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn u16(&self, code: u16) -> Option<u16> {
        self.first(code)
            .filter(|data| data.len() == 2)
            .map(NetworkEndian::read_u16)
    }

    pub fn u32(&self, code: u16) -> Option<u32> {
        self.first(code)
            .filter(|data| data.len() == 4)
            .map(NetworkEndian::read_u32)
    }

    pub fn preference(&self) -> Option<u8> {
        self.u8(field::OPT_PREFERENCE)
    }

    pub fn elapsed_time(&self) -> Option<u16> {
        self.u16(field::OPT_ELAPSED_TIME)
    }

    pub fn has(&self, code: u16) -> bool {
        self.find(code, 0).is_some()
    }

    /// A list of 16-bit values, such as the ORO.
    pub fn u16_list(&self, code: u16) -> Option<U16List<'a>> {
        self.first(code)
            .filter(|data| data.len() % 2 == 0)
            .map(|data| U16List { data })
    }

    pub fn request_options(&self) -> Option<U16List<'a>> {
        self.u16_list(field::OPT_ORO)
    }

    /// A list of IPv6 addresses, such as DNS_SERVERS.
    pub fn address_list(&self, code: u16) -> Option<AddressList<'a>> {
        self.first(code)
            .filter(|data| data.len() % 16 == 0)
            .map(|data| AddressList { data })
    }

    pub fn dns_servers(&self) -> Option<AddressList<'a>> {
        self.address_list(field::OPT_DNS_SERVERS)
    }

    /// A list of uncompressed DNS names, such as DOMAIN_LIST.
    pub fn domain_names(&self, code: u16) -> Option<Vec<String>> {
        parse_domain_names(self.first(code)?).ok()
    }

    pub fn domain_list(&self) -> Option<Vec<String>> {
        self.domain_names(field::OPT_DOMAIN_LIST)
    }

    /// A UTF-8 string option. Invalid sequences are replaced.
    pub fn string(&self, code: u16) -> Option<Cow<'a, str>> {
        self.first(code).map(String::from_utf8_lossy)
    }

    pub fn captive_portal_url(&self) -> Option<Cow<'a, str>> {
        self.string(field::OPT_CAPTIVE_PORTAL)
    }

    /// The STATUS_CODE option, if present and well-formed.
    pub fn status(&self) -> Result<Option<Status<'a>>> {
        match self.first(field::OPT_STATUS_CODE) {
            Some(data) => Status::parse(data).map(Some),
            None => Ok(None),
        }
    }

    /// The status conveyed by this list.
    ///
    /// Absence means success; a STATUS_CODE too short to hold a code is
    /// reported as `UnspecFail`.
    pub fn status_code(&self) -> StatusCode {
        match self.status() {
            Ok(Some(status)) => status.code,
            Ok(None) => StatusCode::Success,
            Err(_) => StatusCode::UnspecFail,
        }
    }

    /// The first well-formed IA of the given kind, usable or not.
    pub fn ia(&self, kind: IaKind) -> Option<Ia<'a>> {
        self.all(kind.option_code())
            .find_map(|data| Ia::parse(kind, data).ok())
    }

    /// The first IA of the given kind that carries a usable resource.
    ///
    /// IAs with T1 greater than T2, or without any resource whose lifetimes
    /// are nonzero and ordered, are skipped as if absent.
    pub fn binding(&self, kind: IaKind) -> Option<Binding<'a>> {
        let mut start = 0;
        while let Some((index, option)) = self.find(kind.option_code(), start) {
            start = index + 1;
            let ia = match Ia::parse(kind, option.data) {
                Ok(ia) => ia,
                Err(err) => {
                    net_debug!("DHCPv6 {}: ignoring malformed option ({})", kind, err);
                    continue;
                }
            };
            if !ia.has_valid_timers() {
                net_debug!(
                    "DHCPv6 {} iaid={}: ignoring t1={} > t2={}",
                    kind,
                    ia.iaid,
                    ia.t1,
                    ia.t2
                );
                continue;
            }
            if let Some(resource) = ia.select() {
                return Some(Binding { ia, resource });
            }
        }
        None
    }
}

/// The layout of an [OptionList], detached from its buffer.
///
/// Lets a parsed list survive a copy of the bytes it was parsed from
/// without parsing them a second time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionIndex {
    records: Vec<Record>,
    len: usize,
}

impl OptionIndex {
    /// Reattach the layout to a buffer.
    ///
    /// Records that do not fit `buffer` are dropped, so binding to a buffer
    /// other than a byte-for-byte copy of the original never panics.
    pub fn bind<'a>(&self, buffer: &'a [u8]) -> OptionList<'a> {
        if buffer.len() != self.len {
            net_debug!(
                "DHCPv6 option index built for {} bytes bound to {}",
                self.len,
                buffer.len()
            );
        }
        let records = self
            .records
            .iter()
            .filter(|record| record.end <= buffer.len())
            .copied()
            .collect();
        OptionList { buffer, records }
    }
}

/// A list of 16-bit values in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U16List<'a> {
    data: &'a [u8],
}

impl<'a> U16List<'a> {
    pub fn len(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + 'a {
        let data = self.data;
        data.chunks_exact(2).map(NetworkEndian::read_u16)
    }

    pub fn contains(&self, value: u16) -> bool {
        self.iter().any(|x| x == value)
    }
}

/// A list of IPv6 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressList<'a> {
    data: &'a [u8],
}

impl<'a> AddressList<'a> {
    pub fn len(&self) -> usize {
        self.data.len() / 16
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv6Addr> + 'a {
        let data = self.data;
        data.chunks_exact(16).map(read_address)
    }
}

/// Decode a sequence of uncompressed DNS names (RFC 1035, section 3.1).
///
/// A final name missing its root label is accepted as if terminated.
pub fn parse_domain_names(data: &[u8]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut name = String::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = data[offset] as usize;
        if len == 0 {
            names.push(core::mem::take(&mut name));
            offset += 1;
            continue;
        }
        if len > 63 {
            return Err(Error::Malformed);
        }
        if data.len() - offset < 1 + len {
            return Err(Error::Truncated {
                offset,
                expected: 1 + len,
                actual: data.len() - offset,
            });
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&data[offset + 1..offset + 1 + len]));
        offset += 1 + len;
    }
    if !name.is_empty() {
        names.push(name);
    }
    Ok(names)
}

/// Encode DNS names the way DOMAIN_LIST carries them.
pub fn encode_domain_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for name in names {
        for label in name.as_ref().split('.').filter(|label| !label.is_empty()) {
            if label.len() > 63 {
                return Err(Error::Malformed);
            }
            data.push(label.len() as u8);
            data.extend_from_slice(label.as_bytes());
        }
        data.push(0);
    }
    Ok(data)
}

/// Writes options into a fixed-capacity output area.
#[derive(Debug)]
pub struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    len: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, len: 0 }
    }

    /// Return the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.len
    }

    fn reserve(&mut self, needed: usize) -> Result<usize> {
        let available = self.remaining();
        if available < needed {
            return Err(Error::NoRoom { needed, available });
        }
        let start = self.len;
        self.len += needed;
        Ok(start)
    }

    fn write_header(&mut self, at: usize, code: u16, len: usize) {
        let header = &mut self.buffer[at..at + field::OPT_HEADER_LEN];
        NetworkEndian::write_u16(&mut header[field::OPT_CODE], code);
        NetworkEndian::write_u16(&mut header[field::OPT_LEN], len as u16);
    }

    /// Emit a [`Dhcpv6Option`].
    pub fn emit(&mut self, option: Dhcpv6Option<'_>) -> Result<()> {
        if option.data.len() > u16::MAX as usize {
            return Err(Error::Malformed);
        }
        let start = self.reserve(option.buffer_len())?;
        self.write_header(start, option.code, option.data.len());
        let data_start = start + field::OPT_HEADER_LEN;
        self.buffer[data_start..data_start + option.data.len()].copy_from_slice(option.data);
        Ok(())
    }

    /// Emit a container option: a fixed `header` followed by whatever
    /// options `emit_inner` writes.
    ///
    /// Nothing is left behind if `emit_inner` fails.
    pub fn emit_nested<F>(&mut self, code: u16, header: &[u8], emit_inner: F) -> Result<()>
    where
        F: FnOnce(&mut OptionWriter<'_>) -> Result<()>,
    {
        let start = self.reserve(field::OPT_HEADER_LEN + header.len())?;
        let inner_start = self.len;
        let inner_len = {
            let mut inner = OptionWriter::new(&mut self.buffer[inner_start..]);
            match emit_inner(&mut inner) {
                Ok(()) => inner.len(),
                Err(err) => {
                    self.len = start;
                    return Err(err);
                }
            }
        };
        let data_len = header.len() + inner_len;
        if data_len > u16::MAX as usize {
            self.len = start;
            return Err(Error::Malformed);
        }
        self.write_header(start, code, data_len);
        let header_start = start + field::OPT_HEADER_LEN;
        self.buffer[header_start..header_start + header.len()].copy_from_slice(header);
        self.len += inner_len;
        Ok(())
    }
}

/// Which kind of identity association a client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IaKind {
    /// IA_NA carrying IAADDR.
    NonTemporary,
    /// IA_PD carrying IAPREFIX.
    PrefixDelegation,
}

impl IaKind {
    pub const fn option_code(self) -> u16 {
        match self {
            IaKind::NonTemporary => field::OPT_IA_NA,
            IaKind::PrefixDelegation => field::OPT_IA_PD,
        }
    }

    pub const fn resource_code(self) -> u16 {
        match self {
            IaKind::NonTemporary => field::OPT_IAADDR,
            IaKind::PrefixDelegation => field::OPT_IAPREFIX,
        }
    }
}

impl fmt::Display for IaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IaKind::NonTemporary => write!(f, "ia-na"),
            IaKind::PrefixDelegation => write!(f, "ia-pd"),
        }
    }
}

/// An IA_NA or IA_PD option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ia<'a> {
    pub kind: IaKind,
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    /// The encapsulated options, unparsed.
    pub options: &'a [u8],
}

impl<'a> Ia<'a> {
    pub const HEADER_LEN: usize = field::IA_OPTIONS.start;

    pub fn parse(kind: IaKind, data: &'a [u8]) -> Result<Ia<'a>> {
        check_len(data, Self::HEADER_LEN)?;
        Ok(Ia {
            kind,
            iaid: NetworkEndian::read_u32(&data[field::IA_IAID]),
            t1: NetworkEndian::read_u32(&data[field::IA_T1]),
            t2: NetworkEndian::read_u32(&data[field::IA_T2]),
            options: &data[field::IA_OPTIONS],
        })
    }

    pub fn suboptions(&self) -> Result<OptionList<'a>> {
        OptionList::parse(self.options)
    }

    /// T1 must not exceed T2 when the server sets both.
    pub fn has_valid_timers(&self) -> bool {
        self.t1 == 0 || self.t2 == 0 || self.t1 <= self.t2
    }

    /// The status attached to this IA; unparseable payloads count as `UnspecFail`.
    pub fn status_code(&self) -> StatusCode {
        match self.suboptions() {
            Ok(options) => options.status_code(),
            Err(_) => StatusCode::UnspecFail,
        }
    }

    /// Select the first usable resource of this IA.
    pub fn select(&self) -> Option<Resource<'a>> {
        let options = match self.suboptions() {
            Ok(options) => options,
            Err(err) => {
                net_debug!("DHCPv6 {} iaid={}: malformed options ({})", self.kind, self.iaid, err);
                return None;
            }
        };
        let code = self.kind.resource_code();
        let mut start = 0;
        while let Some((index, option)) = options.find(code, start) {
            start = index + 1;
            match Resource::parse(self.kind, option.data) {
                Ok(resource) if resource.is_usable() => return Some(resource),
                Ok(resource) => net_trace!("DHCPv6 {}: skipping unusable {}", self.kind, resource),
                Err(err) => net_debug!("DHCPv6 {}: skipping malformed resource ({})", self.kind, err),
            }
        }
        None
    }

    fn header(&self) -> [u8; field::IA_OPTIONS.start] {
        let mut header = [0u8; field::IA_OPTIONS.start];
        NetworkEndian::write_u32(&mut header[field::IA_IAID], self.iaid);
        NetworkEndian::write_u32(&mut header[field::IA_T1], self.t1);
        NetworkEndian::write_u32(&mut header[field::IA_T2], self.t2);
        header
    }
}

impl<'a> fmt::Display for Ia<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} iaid={} t1={} t2={}", self.kind, self.iaid, self.t1, self.t2)
    }
}

/// An IAADDR option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddr<'a> {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: &'a [u8],
}

impl<'a> IaAddr<'a> {
    pub const HEADER_LEN: usize = field::IAADDR_OPTIONS.start;

    pub fn parse(data: &'a [u8]) -> Result<IaAddr<'a>> {
        check_len(data, Self::HEADER_LEN)?;
        Ok(IaAddr {
            address: read_address(&data[field::IAADDR_ADDRESS]),
            preferred_lifetime: NetworkEndian::read_u32(&data[field::IAADDR_PREFERRED]),
            valid_lifetime: NetworkEndian::read_u32(&data[field::IAADDR_VALID]),
            options: &data[field::IAADDR_OPTIONS],
        })
    }

    fn header(&self) -> [u8; field::IAADDR_OPTIONS.start] {
        let mut header = [0u8; field::IAADDR_OPTIONS.start];
        header[field::IAADDR_ADDRESS].copy_from_slice(&self.address.octets());
        NetworkEndian::write_u32(&mut header[field::IAADDR_PREFERRED], self.preferred_lifetime);
        NetworkEndian::write_u32(&mut header[field::IAADDR_VALID], self.valid_lifetime);
        header
    }
}

/// An IAPREFIX option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaPrefix<'a> {
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub prefix_len: u8,
    pub prefix: Ipv6Addr,
    pub options: &'a [u8],
}

impl<'a> IaPrefix<'a> {
    pub const HEADER_LEN: usize = field::IAPREFIX_OPTIONS.start;

    pub fn parse(data: &'a [u8]) -> Result<IaPrefix<'a>> {
        check_len(data, Self::HEADER_LEN)?;
        let prefix_len = data[field::IAPREFIX_LENGTH];
        if prefix_len > 128 {
            return Err(Error::Malformed);
        }
        Ok(IaPrefix {
            preferred_lifetime: NetworkEndian::read_u32(&data[field::IAPREFIX_PREFERRED]),
            valid_lifetime: NetworkEndian::read_u32(&data[field::IAPREFIX_VALID]),
            prefix_len,
            prefix: read_address(&data[field::IAPREFIX_PREFIX]),
            options: &data[field::IAPREFIX_OPTIONS],
        })
    }

    fn header(&self) -> [u8; field::IAPREFIX_OPTIONS.start] {
        let mut header = [0u8; field::IAPREFIX_OPTIONS.start];
        NetworkEndian::write_u32(&mut header[field::IAPREFIX_PREFERRED], self.preferred_lifetime);
        NetworkEndian::write_u32(&mut header[field::IAPREFIX_VALID], self.valid_lifetime);
        header[field::IAPREFIX_LENGTH] = self.prefix_len;
        header[field::IAPREFIX_PREFIX].copy_from_slice(&self.prefix.octets());
        header
    }
}

/// A leased resource: an address out of IA_NA or a prefix out of IA_PD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Address(IaAddr<'a>),
    Prefix(IaPrefix<'a>),
}

impl<'a> Resource<'a> {
    pub fn parse(kind: IaKind, data: &'a [u8]) -> Result<Resource<'a>> {
        match kind {
            IaKind::NonTemporary => IaAddr::parse(data).map(Resource::Address),
            IaKind::PrefixDelegation => IaPrefix::parse(data).map(Resource::Prefix),
        }
    }

    pub fn kind(&self) -> IaKind {
        match self {
            Resource::Address(_) => IaKind::NonTemporary,
            Resource::Prefix(_) => IaKind::PrefixDelegation,
        }
    }

    /// The leased address, or the first address of the delegated prefix.
    pub fn address(&self) -> Ipv6Addr {
        match self {
            Resource::Address(addr) => addr.address,
            Resource::Prefix(prefix) => prefix.prefix,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            Resource::Address(_) => 128,
            Resource::Prefix(prefix) => prefix.prefix_len,
        }
    }

    pub fn preferred_lifetime(&self) -> u32 {
        match self {
            Resource::Address(addr) => addr.preferred_lifetime,
            Resource::Prefix(prefix) => prefix.preferred_lifetime,
        }
    }

    pub fn valid_lifetime(&self) -> u32 {
        match self {
            Resource::Address(addr) => addr.valid_lifetime,
            Resource::Prefix(prefix) => prefix.valid_lifetime,
        }
    }

    pub fn options(&self) -> &'a [u8] {
        match self {
            Resource::Address(addr) => addr.options,
            Resource::Prefix(prefix) => prefix.options,
        }
    }

    /// Both lifetimes are nonzero and preferred does not exceed valid.
    pub fn is_usable(&self) -> bool {
        let preferred = self.preferred_lifetime();
        let valid = self.valid_lifetime();
        preferred != 0 && valid != 0 && preferred <= valid
    }

    /// Copy of this resource with new lifetimes and no encapsulated options.
    pub fn with_lifetimes(&self, preferred_lifetime: u32, valid_lifetime: u32) -> Resource<'static> {
        match *self {
            Resource::Address(addr) => Resource::Address(IaAddr {
                address: addr.address,
                preferred_lifetime,
                valid_lifetime,
                options: &[],
            }),
            Resource::Prefix(prefix) => Resource::Prefix(IaPrefix {
                preferred_lifetime,
                valid_lifetime,
                prefix_len: prefix.prefix_len,
                prefix: prefix.prefix,
                options: &[],
            }),
        }
    }

    pub fn data_len(&self) -> usize {
        let header = match self {
            Resource::Address(_) => IaAddr::HEADER_LEN,
            Resource::Prefix(_) => IaPrefix::HEADER_LEN,
        };
        header + self.options().len()
    }

    pub fn emit(&self, writer: &mut OptionWriter<'_>) -> Result<()> {
        let options = self.options();
        let code = self.kind().resource_code();
        match self {
            Resource::Address(addr) => writer.emit_nested(code, &addr.header(), |inner| {
                emit_raw(inner, options)
            }),
            Resource::Prefix(prefix) => writer.emit_nested(code, &prefix.header(), |inner| {
                emit_raw(inner, options)
            }),
        }
    }
}

impl<'a> fmt::Display for Resource<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::Address(addr) => write!(
                f,
                "iaaddr {} pref={} valid={}",
                addr.address, addr.preferred_lifetime, addr.valid_lifetime
            ),
            Resource::Prefix(prefix) => write!(
                f,
                "iaprefix {}/{} pref={} valid={}",
                prefix.prefix, prefix.prefix_len, prefix.preferred_lifetime, prefix.valid_lifetime
            ),
        }
    }
}

// Already-encoded options are copied verbatim, one option at a time, so that
// a corrupt blob is rejected instead of being forwarded.
fn emit_raw(writer: &mut OptionWriter<'_>, options: &[u8]) -> Result<()> {
    for option in OptionList::parse(options)?.iter() {
        writer.emit(option)?;
    }
    Ok(())
}

/// An IA together with the resource selected from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding<'a> {
    pub ia: Ia<'a>,
    pub resource: Resource<'a>,
}

/// A STATUS_CODE option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status<'a> {
    pub code: StatusCode,
    pub message: Cow<'a, str>,
}

impl<'a> Status<'a> {
    pub const HEADER_LEN: usize = field::STATUS_MESSAGE.start;

    pub fn new(code: StatusCode, message: &'a str) -> Status<'a> {
        Status {
            code,
            message: Cow::Borrowed(message),
        }
    }

    pub fn parse(data: &'a [u8]) -> Result<Status<'a>> {
        check_len(data, Self::HEADER_LEN)?;
        Ok(Status {
            code: NetworkEndian::read_u16(&data[field::STATUS_CODE]).into(),
            message: String::from_utf8_lossy(&data[field::STATUS_MESSAGE]),
        })
    }

    pub fn data_len(&self) -> usize {
        Self::HEADER_LEN + self.message.len()
    }

    pub fn emit(&self, writer: &mut OptionWriter<'_>) -> Result<()> {
        let mut header = [0u8; field::STATUS_MESSAGE.start];
        NetworkEndian::write_u16(&mut header[field::STATUS_CODE], self.code.into());
        let message = self.message.as_bytes();
        writer.emit_nested(field::OPT_STATUS_CODE, &header, |inner| {
            let start = inner.reserve(message.len())?;
            inner.buffer[start..start + message.len()].copy_from_slice(message);
            Ok(())
        })
    }
}

impl<'a> fmt::Display for Status<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.message)
        }
    }
}

/// A DHCP Unique Identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Duid(heapless::Vec<u8, MAX_DUID_LEN>);

impl Duid {
    /// Wrap raw DUID bytes, as found in CLIENTID or read back from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Duid> {
        if bytes.len() < 3 {
            return Err(Error::Malformed);
        }
        heapless::Vec::from_slice(bytes)
            .map(Duid)
            .map_err(|()| Error::Malformed)
    }

    fn with_type(kind: DuidType, body: &[&[u8]]) -> Result<Duid> {
        let mut bytes = heapless::Vec::new();
        let extend = |bytes: &mut heapless::Vec<u8, MAX_DUID_LEN>, data: &[u8]| {
            bytes.extend_from_slice(data).map_err(|()| Error::Malformed)
        };
        extend(&mut bytes, &u16::from(kind).to_be_bytes())?;
        for part in body {
            extend(&mut bytes, part)?;
        }
        Ok(Duid(bytes))
    }

    /// DUID-LLT: hardware type, seconds since 2000-01-01 UTC and link-layer address.
    pub fn link_layer_time(hardware_type: u16, time: u32, address: &[u8]) -> Result<Duid> {
        Self::with_type(
            DuidType::LinkLayerTime,
            &[&hardware_type.to_be_bytes(), &time.to_be_bytes(), address],
        )
    }

    /// DUID-LL: hardware type and link-layer address.
    pub fn link_layer(hardware_type: u16, address: &[u8]) -> Result<Duid> {
        Self::with_type(DuidType::LinkLayer, &[&hardware_type.to_be_bytes(), address])
    }

    /// DUID-UUID (RFC 6355).
    pub fn uuid(uuid: [u8; 16]) -> Duid {
        let mut bytes = heapless::Vec::new();
        // 18 bytes always fit
        let _ = bytes.extend_from_slice(&u16::from(DuidType::Uuid).to_be_bytes());
        let _ = bytes.extend_from_slice(&uuid);
        Duid(bytes)
    }

    pub fn kind(&self) -> DuidType {
        NetworkEndian::read_u16(&self.0[..2]).into()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Duid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Duid({self})")
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A read/write wrapper around a DHCPv6 packet buffer.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = field::OPTIONS.start;

    /// Imbue a raw octet buffer with DHCPv6 packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        check_len(self.buffer.as_ref(), Self::HEADER_LEN)
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.buffer.as_ref()[field::MTYPE])
    }

    /// Returns the 24-bit transaction ID.
    pub fn transaction_id(&self) -> u32 {
        NetworkEndian::read_u24(&self.buffer.as_ref()[field::XID])
    }

    /// Return the raw options area.
    pub fn options_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[field::OPTIONS]
    }

    /// Parse the options area.
    pub fn options(&self) -> Result<OptionList<'_>> {
        OptionList::parse(self.options_bytes())
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return the raw options area, borrowing the underlying buffer.
    pub fn options_slice(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::OPTIONS]
    }

    /// Parse the options area, borrowing the underlying buffer.
    pub fn option_list(&self) -> Result<OptionList<'a>> {
        OptionList::parse(self.options_slice())
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_message_type(&mut self, value: MessageType) {
        self.buffer.as_mut()[field::MTYPE] = value.into();
    }

    /// Sets the transaction ID; only the low 24 bits are kept.
    pub fn set_transaction_id(&mut self, value: u32) {
        NetworkEndian::write_u24(&mut self.buffer.as_mut()[field::XID], value & 0xff_ffff)
    }

    /// Return a writer over the options area.
    pub fn options_mut(&mut self) -> OptionWriter<'_> {
        OptionWriter::new(&mut self.buffer.as_mut()[field::OPTIONS])
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> fmt::Display for Packet<&'a T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match Repr::parse(self) {
            Ok(repr) => write!(f, "{repr}"),
            Err(err) => write!(f, "DHCPv6 ({err})"),
        }
    }
}

/// An IA_NA or IA_PD to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaRepr<'a> {
    pub kind: IaKind,
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub resources: heapless::Vec<Resource<'a>, MAX_IA_RESOURCES>,
    pub status: Option<Status<'a>>,
}

impl<'a> IaRepr<'a> {
    pub fn new(kind: IaKind, iaid: u32) -> IaRepr<'a> {
        IaRepr {
            kind,
            iaid,
            t1: 0,
            t2: 0,
            resources: heapless::Vec::new(),
            status: None,
        }
    }

    /// Build from a parsed IA, keeping every well-formed resource.
    pub fn parse(ia: &Ia<'a>) -> Result<IaRepr<'a>> {
        let options = ia.suboptions()?;
        let mut resources = heapless::Vec::new();
        for data in options.all(ia.kind.resource_code()) {
            if let Ok(resource) = Resource::parse(ia.kind, data) {
                if resources.push(resource).is_err() {
                    break;
                }
            }
        }
        Ok(IaRepr {
            kind: ia.kind,
            iaid: ia.iaid,
            t1: ia.t1,
            t2: ia.t2,
            resources,
            status: options.status().ok().flatten(),
        })
    }

    pub fn data_len(&self) -> usize {
        let mut len = Ia::HEADER_LEN;
        for resource in self.resources.iter() {
            len += field::OPT_HEADER_LEN + resource.data_len();
        }
        if let Some(status) = self.status.as_ref() {
            len += field::OPT_HEADER_LEN + status.data_len();
        }
        len
    }

    pub fn emit(&self, writer: &mut OptionWriter<'_>) -> Result<()> {
        let header = Ia {
            kind: self.kind,
            iaid: self.iaid,
            t1: self.t1,
            t2: self.t2,
            options: &[],
        }
        .header();
        writer.emit_nested(self.kind.option_code(), &header, |inner| {
            for resource in self.resources.iter() {
                resource.emit(inner)?;
            }
            if let Some(status) = self.status.as_ref() {
                status.emit(inner)?;
            }
            Ok(())
        })
    }
}

impl<'a> fmt::Display for IaRepr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} iaid={} t1={} t2={}", self.kind, self.iaid, self.t1, self.t2)?;
        for resource in self.resources.iter() {
            write!(f, " {resource}")?;
        }
        if let Some(status) = self.status.as_ref() {
            write!(f, " status={status}")?;
        }
        Ok(())
    }
}

/// A high-level representation of a DHCPv6 message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Repr<'a> {
    pub message_type: MessageType,
    /// Only the low 24 bits are used.
    pub transaction_id: u32,
    pub client_id: Option<&'a [u8]>,
    pub server_id: Option<&'a [u8]>,
    /// Hundredths of a second since the exchange started.
    pub elapsed_time: Option<u16>,
    pub request_options: Option<heapless::Vec<u16, MAX_REQUEST_OPTIONS>>,
    pub ia: Option<IaRepr<'a>>,
    pub status: Option<Status<'a>>,
    /// When returned from [`Repr::parse`], this field will be empty.
    /// When calling [`Repr::emit`], it holds options emitted verbatim after the others.
    pub additional_options: &'a [Dhcpv6Option<'a>],
}

impl<'a> Repr<'a> {
    pub fn new(message_type: MessageType, transaction_id: u32) -> Repr<'a> {
        Repr {
            message_type,
            transaction_id,
            client_id: None,
            server_id: None,
            elapsed_time: None,
            request_options: None,
            ia: None,
            status: None,
            additional_options: &[],
        }
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        let mut len = field::OPTIONS.start;
        if let Some(id) = self.client_id {
            len += field::OPT_HEADER_LEN + id.len();
        }
        if let Some(id) = self.server_id {
            len += field::OPT_HEADER_LEN + id.len();
        }
        if self.elapsed_time.is_some() {
            len += field::OPT_HEADER_LEN + 2;
        }
        if let Some(options) = self.request_options.as_ref() {
            len += field::OPT_HEADER_LEN + options.len() * 2;
        }
        if let Some(ia) = self.ia.as_ref() {
            len += field::OPT_HEADER_LEN + ia.data_len();
        }
        if let Some(status) = self.status.as_ref() {
            len += field::OPT_HEADER_LEN + status.data_len();
        }
        for option in self.additional_options {
            len += option.buffer_len();
        }
        len
    }

    /// Parse a packet into its high-level representation.
    ///
    /// Takes the first well-formed IA_NA, or failing that IA_PD.
    pub fn parse<T>(packet: &Packet<&'a T>) -> Result<Self>
    where
        T: AsRef<[u8]> + ?Sized,
    {
        packet.check_len()?;
        let options = packet.option_list()?;

        let request_options = options.request_options().map(|list| {
            let mut values = heapless::Vec::new();
            for value in list.iter() {
                if values.push(value).is_err() {
                    break;
                }
            }
            values
        });
        let ia = options
            .ia(IaKind::NonTemporary)
            .or_else(|| options.ia(IaKind::PrefixDelegation))
            .map(|ia| IaRepr::parse(&ia))
            .transpose()?;

        Ok(Repr {
            message_type: packet.message_type(),
            transaction_id: packet.transaction_id(),
            client_id: options.client_id(),
            server_id: options.server_id(),
            elapsed_time: options.elapsed_time(),
            request_options,
            ia,
            status: options.status().ok().flatten(),
            additional_options: &[],
        })
    }

    /// Emit a high-level representation into a packet, returning the number of bytes used.
    pub fn emit<T>(&self, packet: &mut Packet<&mut T>) -> Result<usize>
    where
        T: AsRef<[u8]> + AsMut<[u8]> + ?Sized,
    {
        packet.check_len()?;
        packet.set_message_type(self.message_type);
        packet.set_transaction_id(self.transaction_id);

        let mut options = packet.options_mut();
        if let Some(id) = self.client_id {
            options.emit(Dhcpv6Option::new(field::OPT_CLIENTID, id))?;
        }
        if let Some(id) = self.server_id {
            options.emit(Dhcpv6Option::new(field::OPT_SERVERID, id))?;
        }
        if let Some(elapsed_time) = self.elapsed_time {
            options.emit(Dhcpv6Option::new(
                field::OPT_ELAPSED_TIME,
                &elapsed_time.to_be_bytes(),
            ))?;
        }
        if let Some(request_options) = self.request_options.as_ref() {
            let mut data = [0u8; MAX_REQUEST_OPTIONS * 2];
            for (chunk, code) in data.chunks_exact_mut(2).zip(request_options.iter()) {
                NetworkEndian::write_u16(chunk, *code);
            }
            options.emit(Dhcpv6Option::new(
                field::OPT_ORO,
                &data[..request_options.len() * 2],
            ))?;
        }
        if let Some(ia) = self.ia.as_ref() {
            ia.emit(&mut options)?;
        }
        if let Some(status) = self.status.as_ref() {
            status.emit(&mut options)?;
        }
        for option in self.additional_options {
            options.emit(*option)?;
        }

        Ok(field::OPTIONS.start + options.len())
    }

    /// Emit into a freshly allocated buffer of exactly [buffer_len](#method.buffer_len) bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.buffer_len()];
        let len = self.emit(&mut Packet::new_unchecked(&mut buffer[..]))?;
        buffer.truncate(len);
        Ok(buffer)
    }

    /// Ask for `option` in the ORO; duplicates and overflow are ignored.
    pub fn add_request_option(&mut self, option: u16) {
        let list = self.request_options.get_or_insert_with(heapless::Vec::new);
        if !list.contains(&option) {
            let _ = list.push(option);
        }
    }
}

impl<'a> fmt::Display for Repr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DHCPv6 msg-type={} trans-id={:#08x}",
            self.message_type, self.transaction_id
        )?;
        if let Some(server_id) = self.server_id {
            write!(f, " server-id={server_id:02x?}")?;
        }
        if let Some(client_id) = self.client_id {
            write!(f, " client-id={client_id:02x?}")?;
        }
        if let Some(elapsed_time) = self.elapsed_time {
            write!(f, " elapsed-time={elapsed_time}/100s")?;
        }
        if let Some(request_options) = self.request_options.as_ref() {
            write!(f, " oro={:?}", request_options.as_slice())?;
        }
        if let Some(ia) = self.ia.as_ref() {
            write!(f, " {ia}")?;
        }
        if let Some(status) = self.status.as_ref() {
            write!(f, " status={status}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use rand::{Rng, SeedableRng};

    pub(crate) const CLIENT_DUID: &[u8] = &[0x00, 0x03, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    pub(crate) const SERVER_DUID: &[u8] = &[0x00, 0x01, 0x00, 0x01, 0x2a, 0x1b, 0x0c, 0x0d, 0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc];

    fn address(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)
    }

    fn ia_na(resources: &[Resource<'static>]) -> IaRepr<'static> {
        let mut ia = IaRepr::new(IaKind::NonTemporary, 7);
        ia.t1 = 3600;
        ia.t2 = 5400;
        for resource in resources {
            ia.resources.push(*resource).unwrap();
        }
        ia
    }

    fn iaaddr(last: u16, preferred: u32, valid: u32) -> Resource<'static> {
        Resource::Address(IaAddr {
            address: address(last),
            preferred_lifetime: preferred,
            valid_lifetime: valid,
            options: &[],
        })
    }

    fn reply_bytes() -> Vec<u8> {
        let dns = [address(53).octets(), address(54).octets()].concat();
        let extra = [
            Dhcpv6Option::new(OPT_DNS_SERVERS, &dns),
            Dhcpv6Option::new(OPT_PREFERENCE, &[10]),
        ];
        let mut repr = Repr::new(MessageType::Reply, 0x123456);
        repr.client_id = Some(CLIENT_DUID);
        repr.server_id = Some(SERVER_DUID);
        repr.ia = Some(ia_na(&[iaaddr(1, 1800, 3600)]));
        repr.additional_options = &extra;
        repr.to_bytes().unwrap()
    }

    #[test]
    fn test_parse_header() {
        let bytes = reply_bytes();
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(packet.message_type(), MessageType::Reply);
        assert_eq!(packet.transaction_id(), 0x123456);
    }

    #[test]
    fn test_packet_too_short() {
        assert_eq!(
            Packet::new_checked(&[7u8, 0, 0][..]),
            Err(Error::Truncated {
                offset: 0,
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_transaction_id_is_24_bits() {
        let mut bytes = [0u8; 4];
        let mut packet = Packet::new_unchecked(&mut bytes[..]);
        packet.set_transaction_id(0xaabbccdd);
        assert_eq!(packet.transaction_id(), 0xbbccdd);
        assert_eq!(bytes, [0x00, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_option_list_roundtrip() {
        let options = [
            Dhcpv6Option::new(1, &[1, 2, 3]),
            Dhcpv6Option::new(8, &[0, 0]),
            Dhcpv6Option::new(14, &[]),
            Dhcpv6Option::new(8, &[0xff, 0xff]),
        ];
        let mut buffer = [0u8; 64];
        let mut writer = OptionWriter::new(&mut buffer);
        for option in options.iter() {
            writer.emit(*option).unwrap();
        }
        let len = writer.len();
        assert_eq!(len, 4 * 4 + 3 + 2 + 2);

        let list = OptionList::parse(&buffer[..len]).unwrap();
        assert_eq!(list.len(), options.len());
        assert_eq!(list.iter().collect::<Vec<_>>(), options.to_vec());
        assert_eq!(list.find(8, 0).map(|(i, _)| i), Some(1));
        assert_eq!(list.find(8, 2).map(|(i, o)| (i, o.data)), Some((3, &[0xff, 0xff][..])));
        assert_eq!(list.find(8, 4), None);
        assert_eq!(list.all(8).count(), 2);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0xaa, 0x00, 0x02];
        assert_eq!(
            OptionList::parse(&bytes),
            Err(Error::Truncated {
                offset: 5,
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_truncated_body() {
        let bytes = [0x00, 0x01, 0x00, 0x08, 0xaa, 0xbb];
        assert_eq!(
            OptionList::parse(&bytes),
            Err(Error::Truncated {
                offset: 0,
                expected: 12,
                actual: 6
            })
        );
    }

    #[test]
    fn test_every_truncation_is_clean() {
        let bytes = reply_bytes();
        let full = OptionList::parse(&bytes[4..]).unwrap();
        for n in 0..bytes.len() {
            let prefix = &bytes[..n];
            let packet = match Packet::new_checked(prefix) {
                Ok(packet) => packet,
                Err(_) => {
                    assert!(n < 4);
                    continue;
                }
            };
            match packet.options() {
                Ok(list) => {
                    // Only cuts on an option boundary parse; what parses is a prefix.
                    for (i, option) in list.iter().enumerate() {
                        assert_eq!(Some(option), full.get(i));
                    }
                }
                Err(Error::Truncated { offset, expected, actual }) => {
                    assert!(offset + actual == n - 4);
                    assert!(expected > actual);
                }
                Err(err) => panic!("unexpected {err}"),
            }
        }
    }

    #[test]
    fn test_random_corruption_never_panics() {
        let bytes = reply_bytes();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for _ in 0..2000 {
            let mut corrupt = bytes.clone();
            let flips = rng.gen_range(1..8);
            for _ in 0..flips {
                let at = rng.gen_range(0..corrupt.len());
                corrupt[at] = rng.gen();
            }
            let cut = rng.gen_range(0..=corrupt.len());
            corrupt.truncate(cut);
            if let Ok(packet) = Packet::new_checked(&corrupt[..]) {
                let _ = packet.to_string();
                if let Ok(options) = packet.options() {
                    let _ = options.status_code();
                    let _ = options.binding(IaKind::NonTemporary);
                    let _ = options.binding(IaKind::PrefixDelegation);
                    let _ = options.dns_servers().map(|list| list.iter().count());
                    let _ = options.domain_list();
                }
            }
        }
    }

    #[test]
    fn test_writer_no_room() {
        let mut buffer = [0u8; 6];
        let mut writer = OptionWriter::new(&mut buffer);
        assert_eq!(
            writer.emit(Dhcpv6Option::new(1, &[0; 3])),
            Err(Error::NoRoom {
                needed: 7,
                available: 6
            })
        );
        assert!(writer.is_empty());
        writer.emit(Dhcpv6Option::new(1, &[0; 2])).unwrap();
        assert_eq!(writer.remaining(), 0);
    }

    #[test]
    fn test_nested_rollback() {
        let mut buffer = [0u8; 24];
        let mut writer = OptionWriter::new(&mut buffer);
        writer.emit(Dhcpv6Option::new(14, &[])).unwrap();
        let result = writer.emit_nested(OPT_IA_NA, &[0; 12], |inner| {
            inner.emit(Dhcpv6Option::new(OPT_IAADDR, &[0; 24]))
        });
        assert!(matches!(result, Err(Error::NoRoom { .. })));
        assert_eq!(writer.len(), 4);
    }

    #[test]
    fn test_ia_selection_skips_zero_valid() {
        let ia = ia_na(&[iaaddr(1, 0, 0), iaaddr(2, 1800, 3600)]);
        let mut repr = Repr::new(MessageType::Reply, 1);
        repr.ia = Some(ia);
        let bytes = repr.to_bytes().unwrap();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();

        let binding = options.binding(IaKind::NonTemporary).unwrap();
        assert_eq!(binding.ia.iaid, 7);
        assert_eq!(binding.resource.address(), address(2));
        assert_eq!(binding.resource.valid_lifetime(), 3600);
        assert_eq!(binding.resource.preferred_lifetime(), 1800);
    }

    #[test]
    fn test_ia_selection_rejects_preferred_above_valid() {
        let mut repr = Repr::new(MessageType::Reply, 1);
        repr.ia = Some(ia_na(&[iaaddr(1, 7200, 3600)]));
        let bytes = repr.to_bytes().unwrap();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        assert!(options.ia(IaKind::NonTemporary).is_some());
        assert!(options.binding(IaKind::NonTemporary).is_none());
    }

    #[test]
    fn test_ia_selection_rejects_t1_above_t2() {
        let mut ia = ia_na(&[iaaddr(1, 1800, 3600)]);
        ia.t1 = 2000;
        ia.t2 = 1000;
        let mut repr = Repr::new(MessageType::Reply, 1);
        repr.ia = Some(ia);
        let bytes = repr.to_bytes().unwrap();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        assert!(options.binding(IaKind::NonTemporary).is_none());
    }

    #[test]
    fn test_ia_too_short() {
        assert_eq!(
            Ia::parse(IaKind::NonTemporary, &[0; 11]),
            Err(Error::Truncated {
                offset: 0,
                expected: 12,
                actual: 11
            })
        );
        let options = [Dhcpv6Option::new(OPT_IA_NA, &[0; 5])];
        let mut buffer = [0u8; 16];
        let mut writer = OptionWriter::new(&mut buffer);
        writer.emit(options[0]).unwrap();
        let len = writer.len();
        let list = OptionList::parse(&buffer[..len]).unwrap();
        assert_eq!(list.ia(IaKind::NonTemporary), None);
        assert_eq!(list.binding(IaKind::NonTemporary), None);
    }

    #[test]
    fn test_ia_pd_prefix() {
        let mut ia = IaRepr::new(IaKind::PrefixDelegation, 0);
        ia.resources
            .push(Resource::Prefix(IaPrefix {
                preferred_lifetime: 600,
                valid_lifetime: 900,
                prefix_len: 56,
                prefix: Ipv6Addr::new(0x2001, 0xdb8, 0xab, 0xcd00, 0, 0, 0, 0),
                options: &[],
            }))
            .unwrap();
        let mut repr = Repr::new(MessageType::Reply, 1);
        repr.ia = Some(ia);
        let bytes = repr.to_bytes().unwrap();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        assert!(options.binding(IaKind::NonTemporary).is_none());
        let binding = options.binding(IaKind::PrefixDelegation).unwrap();
        assert_eq!(binding.resource.prefix_len(), 56);
        assert_eq!(
            binding.resource.address(),
            Ipv6Addr::new(0x2001, 0xdb8, 0xab, 0xcd00, 0, 0, 0, 0)
        );
    }

    #[test]
    fn test_iaprefix_length_out_of_range() {
        let mut data = [0u8; 25];
        data[8] = 129;
        assert_eq!(IaPrefix::parse(&data), Err(Error::Malformed));
    }

    #[test]
    fn test_status_code() {
        assert_eq!(OptionList::empty().status_code(), StatusCode::Success);

        let mut buffer = [0u8; 32];
        let mut writer = OptionWriter::new(&mut buffer);
        Status::new(StatusCode::NoBinding, "gone").emit(&mut writer).unwrap();
        let len = writer.len();
        let list = OptionList::parse(&buffer[..len]).unwrap();
        let status = list.status().unwrap().unwrap();
        assert_eq!(status.code, StatusCode::NoBinding);
        assert_eq!(status.message, "gone");
        assert_eq!(status.to_string(), "no-binding (gone)");
    }

    #[test]
    fn test_short_status_code_is_failure() {
        let bytes = [0x00, 0x0d, 0x00, 0x01, 0x00];
        let list = OptionList::parse(&bytes).unwrap();
        assert!(list.status().is_err());
        assert_eq!(list.status_code(), StatusCode::UnspecFail);
    }

    #[test]
    fn test_ia_level_status() {
        let mut ia = IaRepr::new(IaKind::NonTemporary, 3);
        ia.status = Some(Status::new(StatusCode::NoAddrsAvail, ""));
        let mut repr = Repr::new(MessageType::Advertise, 1);
        repr.ia = Some(ia);
        let bytes = repr.to_bytes().unwrap();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        assert_eq!(options.status_code(), StatusCode::Success);
        let ia = options.ia(IaKind::NonTemporary).unwrap();
        assert_eq!(ia.status_code(), StatusCode::NoAddrsAvail);
        assert!(ia.status_code().is_unavailable());
    }

    #[test]
    fn test_generic_option_types() {
        let bytes = reply_bytes();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        assert_eq!(options.client_id(), Some(CLIENT_DUID));
        assert_eq!(options.server_id(), Some(SERVER_DUID));
        assert_eq!(options.preference(), Some(10));
        let dns: Vec<_> = options.dns_servers().unwrap().iter().collect();
        assert_eq!(dns, vec![address(53), address(54)]);
        assert_eq!(options.u32(OPT_PREFERENCE), None);
        assert_eq!(options.captive_portal_url(), None);
    }

    #[test]
    fn test_misaligned_lists_are_absent() {
        let bytes = [0x00, 0x17, 0x00, 0x03, 1, 2, 3, 0x00, 0x06, 0x00, 0x03, 0, 23, 0];
        let list = OptionList::parse(&bytes).unwrap();
        assert!(list.dns_servers().is_none());
        assert!(list.request_options().is_none());
    }

    #[test]
    fn test_domain_names() {
        let data = encode_domain_names(&["example.com", "lab.example.org."]).unwrap();
        assert_eq!(
            &data[..13],
            &[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0]
        );
        assert_eq!(
            parse_domain_names(&data).unwrap(),
            vec!["example.com".to_string(), "lab.example.org".to_string()]
        );
        assert!(matches!(
            parse_domain_names(&[5, b'a', b'b']),
            Err(Error::Truncated { offset: 0, expected: 6, actual: 3 })
        ));
        assert_eq!(parse_domain_names(&[0xc0, 0x0c]), Err(Error::Malformed));
    }

    #[test]
    fn test_repr_solicit() {
        let mut repr = Repr::new(MessageType::Solicit, 0xabcdef);
        repr.client_id = Some(CLIENT_DUID);
        repr.elapsed_time = Some(0);
        repr.add_request_option(OPT_DNS_SERVERS);
        repr.add_request_option(OPT_DOMAIN_LIST);
        repr.add_request_option(OPT_DNS_SERVERS);
        repr.ia = Some(IaRepr::new(IaKind::NonTemporary, 9));
        let bytes = repr.to_bytes().unwrap();
        assert_eq!(bytes.len(), repr.buffer_len());

        let packet = Packet::new_checked(&bytes[..]).unwrap();
        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed, repr);
        assert_eq!(
            parsed.request_options.as_ref().map(|list| list.as_slice()),
            Some(&[OPT_DNS_SERVERS, OPT_DOMAIN_LIST][..])
        );
        assert_eq!(
            packet.to_string(),
            "DHCPv6 msg-type=solicit trans-id=0xabcdef client-id=[00, 03, 00, 01, 02, 00, 00, 00, 00, 01] \
             elapsed-time=0/100s oro=[23, 24] ia-na iaid=9 t1=0 t2=0"
        );
    }

    #[test]
    fn test_ia_header_layout() {
        let mut repr = Repr::new(MessageType::Request, 3);
        repr.ia = Some(ia_na(&[iaaddr(5, 1800, 3600)]));
        repr.status = Some(Status::new(StatusCode::NoAddrsAvail, "no"));
        let bytes = repr.to_bytes().unwrap();
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        let options = packet.option_list().unwrap();
        let ia = options.iter().find(|option| option.code == OPT_IA_NA).unwrap();

        assert_eq!(&ia.data[..12], &[0, 0, 0, 7, 0, 0, 0x0e, 0x10, 0, 0, 0x15, 0x18]);
        assert_eq!(&ia.data[12..16], &[0, 5, 0, 24]);
        assert_eq!(&ia.data[16..32], &address(5).octets());
        assert_eq!(&ia.data[32..40], &[0, 0, 0x07, 0x08, 0, 0, 0x0e, 0x10]);
        assert_eq!(ia.data.len(), 40);
        let status = options.iter().find(|option| option.code == OPT_STATUS_CODE).unwrap();
        assert_eq!(status.data, &[0, 2, b'n', b'o']);
    }

    #[test]
    fn test_repr_emit_into_short_buffer() {
        let mut repr = Repr::new(MessageType::Solicit, 1);
        repr.client_id = Some(CLIENT_DUID);
        let mut buffer = [0u8; 10];
        assert!(matches!(
            repr.emit(&mut Packet::new_unchecked(&mut buffer[..])),
            Err(Error::NoRoom { .. })
        ));
    }

    #[test]
    fn test_option_index_bind() {
        let bytes = reply_bytes();
        let options = Packet::new_checked(&bytes[..]).unwrap().option_list().unwrap();
        let index = options.index();
        let copy = bytes.clone();
        let rebound = index.bind(&copy[4..]);
        assert_eq!(rebound.iter().collect::<Vec<_>>(), options.iter().collect::<Vec<_>>());

        let short = index.bind(&copy[4..10]);
        assert!(short.len() < options.len());
    }

    #[test]
    fn test_duid_builders() {
        let mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let ll = Duid::link_layer(HARDWARE_TYPE_ETHERNET, &mac).unwrap();
        assert_eq!(ll.kind(), DuidType::LinkLayer);
        assert_eq!(ll.as_bytes(), &[0, 3, 0, 1, 0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(ll.to_string(), "00:03:00:01:52:54:00:12:34:56");

        let llt = Duid::link_layer_time(HARDWARE_TYPE_ETHERNET, 0x01020304, &mac).unwrap();
        assert_eq!(llt.kind(), DuidType::LinkLayerTime);
        assert_eq!(&llt.as_bytes()[..8], &[0, 1, 0, 1, 1, 2, 3, 4]);

        assert_eq!(Duid::uuid([7; 16]).as_bytes().len(), 18);
        assert!(Duid::from_bytes(&[0, 1]).is_err());
        assert!(Duid::link_layer(HARDWARE_TYPE_ETHERNET, &[0; 200]).is_err());
    }
}
