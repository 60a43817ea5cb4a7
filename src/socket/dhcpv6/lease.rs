use crate::time::{Duration, Instant};
use crate::wire::dhcpv6::INFINITY;
use crate::wire::{Dhcpv6Binding, Dhcpv6MessageType, Dhcpv6OptionIndex, Dhcpv6OptionList, Dhcpv6Packet, IaKind};

fn seconds_after(start: Instant, seconds: u32) -> Option<Instant> {
    if seconds == INFINITY {
        None
    } else {
        Some(start + Duration::from_secs(seconds.into()))
    }
}

/// The lifetimes of the resource currently held, anchored at the time the
/// Reply granting them was accepted.
///
/// Timers and lifetimes are in seconds; [INFINITY] means "never".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub start: Instant,
    pub t1: u32,
    pub t2: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    /// Cleared on Decline, Release, Stop, or a change of network.
    pub valid: bool,
    /// Identity of the network the lease was obtained on, such as an SSID.
    pub network_id: Option<String>,
}

impl Lease {
    pub fn new(
        start: Instant,
        t1: u32,
        t2: u32,
        preferred_lifetime: u32,
        valid_lifetime: u32,
        network_id: Option<String>,
    ) -> Lease {
        Lease {
            start,
            t1,
            t2,
            preferred_lifetime,
            valid_lifetime,
            valid: true,
            network_id,
        }
    }

    /// Whether the lease may still be used at `now`.
    pub fn is_valid(&self, now: Instant) -> bool {
        if !self.valid {
            return false;
        }
        match self.expires_at() {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn t1_at(&self) -> Option<Instant> {
        seconds_after(self.start, self.t1)
    }

    pub fn t2_at(&self) -> Option<Instant> {
        seconds_after(self.start, self.t2)
    }

    pub fn preferred_until(&self) -> Option<Instant> {
        seconds_after(self.start, self.preferred_lifetime)
    }

    pub fn expires_at(&self) -> Option<Instant> {
        seconds_after(self.start, self.valid_lifetime)
    }

    /// The earliest of T1, T2 and expiry, or `None` if all are infinite.
    pub fn next_event(&self) -> Option<Instant> {
        [self.t1_at(), self.t2_at(), self.expires_at()]
            .into_iter()
            .flatten()
            .min()
    }

    fn remaining(&self, lifetime: u32, now: Instant) -> u32 {
        match seconds_after(self.start, lifetime) {
            Some(at) => (at - now).secs().min(u64::from(u32::MAX - 1)) as u32,
            None => INFINITY,
        }
    }

    /// Seconds of preferred lifetime left at `now`.
    pub fn preferred_remaining(&self, now: Instant) -> u32 {
        self.remaining(self.preferred_lifetime, now)
    }

    /// Seconds of valid lifetime left at `now`.
    pub fn valid_remaining(&self, now: Instant) -> u32 {
        self.remaining(self.valid_lifetime, now)
    }

    /// Whether the network identified by `network_id` is the one the lease was obtained on.
    pub fn same_network(&self, network_id: Option<&str>) -> bool {
        self.network_id.as_deref() == network_id
    }
}

/// A copy of the last accepted Advertise or Reply, along with its parsed
/// option layout.
///
/// All views into the packet (server identifier, IA, address or prefix) are
/// borrowed from this object and cannot outlive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPacket {
    buffer: Vec<u8>,
    index: Dhcpv6OptionIndex,
    generation: u64,
}

impl SavedPacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Generation of the slot at the time this packet was saved.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn message_type(&self) -> Dhcpv6MessageType {
        Dhcpv6MessageType::from(self.buffer.first().copied().unwrap_or(0))
    }

    pub fn options(&self) -> Dhcpv6OptionList<'_> {
        let options = self
            .buffer
            .get(Dhcpv6Packet::<&[u8]>::HEADER_LEN..)
            .unwrap_or(&[]);
        self.index.bind(options)
    }

    pub fn server_id(&self) -> Option<&[u8]> {
        self.options().server_id()
    }

    pub fn binding(&self, kind: IaKind) -> Option<Dhcpv6Binding<'_>> {
        self.options().binding(kind)
    }

    /// The server preference; absent means 0.
    pub fn preference(&self) -> u8 {
        self.options().preference().unwrap_or(0)
    }
}

/// Holds at most one [SavedPacket].
///
/// Every save or clear bumps the generation, so a generation remembered
/// by a consumer identifies exactly one saved packet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketSlot {
    saved: Option<SavedPacket>,
    generation: u64,
}

impl PacketSlot {
    pub fn new() -> PacketSlot {
        PacketSlot::default()
    }

    /// Replace the saved packet with a copy of `packet`.
    ///
    /// `options` must be the option list parsed from `packet`.
    pub fn save(&mut self, packet: &[u8], options: &Dhcpv6OptionList<'_>) -> u64 {
        self.clear();
        self.saved = Some(SavedPacket {
            buffer: packet.to_vec(),
            index: options.index(),
            generation: self.generation,
        });
        self.generation
    }

    pub fn clear(&mut self) {
        self.saved = None;
        self.generation += 1;
    }

    pub fn get(&self) -> Option<&SavedPacket> {
        self.saved.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_none()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
