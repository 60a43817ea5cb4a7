use core::fmt;
use std::borrow::Cow;
use std::net::Ipv6Addr;

use bitflags::bitflags;

use crate::rand::Rand;
use crate::time::{Duration, Instant};
use crate::wire::dhcpv6::{
    INFINITY, OPT_INFORMATION_REFRESH_TIME, OPT_INF_MAX_RT, OPT_SOL_MAX_RT,
};
use crate::wire::{
    self, Dhcpv6IaRepr, Dhcpv6MessageType, Dhcpv6OptionList, Dhcpv6Packet, Dhcpv6Repr,
    Dhcpv6Resource, Dhcpv6StatusCode, IaKind,
};

pub mod config;
pub mod lease;
pub mod retransmit;

pub use self::config::{
    ClientConfig, DuidPolicy, DuidStore, IaidAllocator, Identity, Mode, RenewalPolicy,
    RetryConfig, DEFAULT_REQUEST_OPTIONS,
};
pub use self::lease::{Lease, PacketSlot, SavedPacket};
pub use self::retransmit::{Parameters, Retransmit};

use self::retransmit::{
    random_delay, CNF_MAX_DELAY, INF_MAX_DELAY, IRT_DEFAULT, IRT_MINIMUM, MAX_RT_OPTION_RANGE,
    SOL_MAX_DELAY,
};

/// The state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not running, or the link is down.
    Inactive,
    /// Looking for servers.
    Solicit,
    /// Asking the selected server for the advertised resource.
    Request,
    /// Holding a lease; waiting for T1.
    Bound,
    /// Extending the lease with the server that granted it.
    Renew,
    /// Extending the lease with any server.
    Rebind,
    /// Checking that a lease is still appropriate after a link change.
    Confirm,
    /// Giving the lease back.
    Release,
    /// The lease was lost.
    Unbound,
    /// Reporting that the leased address is in use by another node.
    Decline,
    /// Asking for configuration without a lease.
    Inform,
    /// Holding stateless configuration; waiting for the refresh time.
    InformComplete,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Inactive => write!(f, "inactive"),
            State::Solicit => write!(f, "solicit"),
            State::Request => write!(f, "request"),
            State::Bound => write!(f, "bound"),
            State::Renew => write!(f, "renew"),
            State::Rebind => write!(f, "rebind"),
            State::Confirm => write!(f, "confirm"),
            State::Release => write!(f, "release"),
            State::Unbound => write!(f, "unbound"),
            State::Decline => write!(f, "decline"),
            State::Inform => write!(f, "inform"),
            State::InformComplete => write!(f, "inform-complete"),
        }
    }
}

bitflags! {
    /// Link status flags.
    #[derive(Default)]
    pub struct LinkFlags: u8 {
        /// The link is up and usable.
        const ACTIVE = 0b0000_0001;
        /// The system woke from sleep and the link layer reports the same network.
        const WAKE_ON_SAME_NETWORK = 0b0000_0010;
    }
}

/// What a platform reports about a link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub flags: LinkFlags,
    /// Identity of the attached network, such as a Wi-Fi SSID.
    pub network_id: Option<String>,
}

impl LinkInfo {
    pub fn up(network_id: Option<&str>) -> LinkInfo {
        LinkInfo {
            flags: LinkFlags::ACTIVE,
            network_id: network_id.map(str::to_string),
        }
    }

    pub fn down() -> LinkInfo {
        LinkInfo::default()
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(LinkFlags::ACTIVE)
    }
}

/// An address to configure on the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressConfig {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    /// Seconds left; [INFINITY] means forever.
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// An input to [Client::handle].
#[derive(Debug)]
pub enum Event<'p> {
    /// Start the client on a link in the given state.
    Start(LinkInfo),
    /// Stop the client, releasing any lease.
    Stop,
    /// The timer armed with the given token fired.
    Timeout(u32),
    /// A datagram was received for this client.
    ///
    /// `options` must be the option list parsed from `packet`.
    Receive {
        packet: &'p [u8],
        options: Dhcpv6OptionList<'p>,
    },
    LinkChanged(LinkInfo),
    /// The system woke from sleep.
    Wake(LinkInfo),
    /// Duplicate address detection failed for an address.
    AddressInUse(Ipv6Addr),
    /// The last [Action::Transmit] could not be sent.
    TransmitFailed,
}

/// An effect requested by [Client::handle], to be carried out in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a message to all DHCPv6 servers on the client's interface.
    Transmit(Vec<u8>),
    /// Deliver [Event::Timeout] with `token` at `at`, replacing any armed timer.
    ArmTimer { at: Instant, token: u32 },
    CancelTimer,
    /// Deliver replies carrying `transaction_id`.
    EnableReceive { transaction_id: u32 },
    DisableReceive,
    SetAddress(AddressConfig),
    RemoveAddress(Ipv6Addr),
    /// The information published by [Client::info] changed.
    Notify,
}

/// A snapshot of what a client has learned.
#[derive(Debug, Clone)]
pub struct Info<'a> {
    pub ifname: &'a str,
    pub state: State,
    pub mode: Mode,
    /// Changes every time the saved packet is replaced.
    pub generation: u64,
    pub lease: Option<&'a Lease>,
    /// The leased address or prefix.
    pub resource: Option<Dhcpv6Resource<'a>>,
    /// Options of the last accepted Reply.
    pub options: Option<Dhcpv6OptionList<'a>>,
}

impl<'a> Info<'a> {
    /// Whether the client holds usable configuration at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.mode {
            Mode::Stateless => self.state == State::InformComplete,
            _ => {
                matches!(self.state, State::Bound | State::Renew | State::Rebind)
                    && self.lease.map_or(false, |lease| lease.is_valid(now))
                    && self.resource.is_some()
            }
        }
    }

    pub fn dns_servers(&self) -> Vec<Ipv6Addr> {
        self.options
            .as_ref()
            .and_then(|options| options.dns_servers())
            .map(|list| list.iter().collect())
            .unwrap_or_default()
    }

    pub fn domain_list(&self) -> Vec<String> {
        self.options
            .as_ref()
            .and_then(|options| options.domain_list())
            .unwrap_or_default()
    }

    pub fn captive_portal_url(&self) -> Option<Cow<'a, str>> {
        self.options
            .as_ref()
            .and_then(|options| options.captive_portal_url())
    }
}

/// A DHCPv6 client for one interface.
///
/// The client performs no I/O. Every input is fed through
/// [handle](#method.handle), which returns the actions the caller must
/// carry out: sending messages, arming the single timer the client owns,
/// filtering replies by transaction ID, and configuring addresses.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    identity: Identity,
    state: State,
    /// Set by Start, cleared by Stop.
    running: bool,
    link: LinkInfo,
    rand: Rand,
    transaction_id: u32,
    retransmit: Retransmit,
    /// Token of the armed timer; timeouts carrying any other token are stale.
    timer_token: u32,
    timer_armed: bool,
    /// The best Advertise while soliciting, the accepted Reply afterwards.
    saved: PacketSlot,
    lease: Option<Lease>,
    /// Address currently configured through [Action::SetAddress].
    bound_address: Option<Ipv6Addr>,
    sol_max_rt: Duration,
    inf_max_rt: Duration,
    transmit_failures: u32,
}

impl Client {
    pub fn new(config: ClientConfig, identity: Identity, seed: u64) -> Client {
        let retry = config.retry;
        Client {
            config,
            identity,
            state: State::Inactive,
            running: false,
            link: LinkInfo::down(),
            rand: Rand::new(seed),
            transaction_id: 0,
            retransmit: Retransmit::new(Parameters::SOLICIT),
            timer_token: 0,
            timer_armed: false,
            saved: PacketSlot::new(),
            lease: None,
            bound_address: None,
            sol_max_rt: retry.sol_max_rt,
            inf_max_rt: retry.inf_max_rt,
            transmit_failures: 0,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn saved(&self) -> Option<&SavedPacket> {
        self.saved.get()
    }

    /// Transaction ID of the exchange in progress.
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    /// Current cap on the Solicit retransmission time.
    pub fn sol_max_rt(&self) -> Duration {
        self.sol_max_rt
    }

    /// Current cap on the Information-Request retransmission time.
    pub fn inf_max_rt(&self) -> Duration {
        self.inf_max_rt
    }

    pub fn info(&self) -> Info<'_> {
        let saved = self.saved.get();
        let resource = match (self.lease.as_ref(), self.config.mode.ia_kind(), saved) {
            (Some(_), Some(kind), Some(saved)) => saved.binding(kind).map(|b| b.resource),
            _ => None,
        };
        let options = match self.state {
            State::Solicit | State::Request => None,
            _ => saved.map(|saved| saved.options()),
        };
        Info {
            ifname: &self.config.ifname,
            state: self.state,
            mode: self.config.mode,
            generation: self.saved.generation(),
            lease: self.lease.as_ref(),
            resource,
            options,
        }
    }

    /// Process one event, returning the actions to carry out in order.
    pub fn handle(&mut self, now: Instant, event: Event<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::Start(link) => self.start(now, link, &mut actions),
            Event::Stop => self.stop(now, &mut actions),
            Event::Timeout(token) => {
                if !self.timer_armed || token != self.timer_token {
                    net_trace!(
                        "DHCPv6 {}: ignoring stale timer {}",
                        self.config.ifname,
                        token
                    );
                } else {
                    self.timer_armed = false;
                    self.timeout(now, &mut actions)
                }
            }
            Event::Receive { packet, options } => {
                self.receive(now, packet, &options, &mut actions)
            }
            Event::LinkChanged(link) => self.link_changed(now, link, &mut actions),
            Event::Wake(link) => self.wake(now, link, &mut actions),
            Event::AddressInUse(address) => self.address_in_use(now, address, &mut actions),
            Event::TransmitFailed => self.transmit_failed(&mut actions),
        }
        actions
    }

    fn start(&mut self, now: Instant, link: LinkInfo, actions: &mut Vec<Action>) {
        self.running = true;
        self.link = link;
        self.transmit_failures = 0;
        if !self.link.is_active() {
            net_debug!("DHCPv6 {}: started with link down", self.config.ifname);
            if self.state != State::Inactive {
                self.enter_inactive(actions);
            }
            return;
        }
        self.restart(now, actions);
    }

    fn stop(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.running = false;
        let releasable = match (self.config.mode.ia_kind(), self.lease.as_ref()) {
            (Some(kind), Some(lease)) => {
                lease.is_valid(now)
                    && self.link.is_active()
                    && self.saved.get().and_then(|s| s.binding(kind)).is_some()
            }
            _ => false,
        };
        if releasable {
            self.set_state(State::Release);
            self.transaction_id = self.rand.rand_u32() & 0x00ff_ffff;
            self.retransmit = Retransmit::new(Parameters::RELEASE);
            self.send(now, actions);
        }
        self.enter_inactive(actions);
        if let Some(lease) = self.lease.as_mut() {
            lease.invalidate();
        }
        self.discard_lease(actions);
    }

    /// Begin acquiring configuration on an active link.
    fn restart(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let kind = match self.config.mode.ia_kind() {
            Some(kind) => kind,
            None => return self.enter_inform(now, true, actions),
        };
        let network_id = self.link.network_id.as_deref();
        let confirmable = self
            .lease
            .as_ref()
            .map_or(false, |lease| lease.is_valid(now) && lease.same_network(network_id))
            && self.saved.get().and_then(|s| s.binding(kind)).is_some();
        if confirmable {
            self.enter_confirm(now, actions)
        } else {
            self.enter_solicit(now, true, actions)
        }
    }

    fn timeout(&mut self, now: Instant, actions: &mut Vec<Action>) {
        match self.state {
            State::Solicit => {
                if self.retransmit.count() > 0 && !self.saved.is_empty() {
                    self.enter_request(now, actions)
                } else {
                    self.transmit(now, actions)
                }
            }
            State::Request | State::Decline => {
                if self.retransmit.exhausted(now) {
                    net_debug!(
                        "DHCPv6 {}: {} retries exceeded, restarting discovery",
                        self.config.ifname,
                        self.state
                    );
                    self.enter_solicit(now, false, actions)
                } else {
                    self.transmit(now, actions)
                }
            }
            State::Confirm => {
                if self.retransmit.exhausted(now) {
                    self.confirm_failed(now, actions)
                } else {
                    self.transmit(now, actions)
                }
            }
            State::Bound => self.lease_timer(now, actions),
            State::Renew => {
                let (valid, past_t2) = match self.lease.as_ref() {
                    Some(lease) => (
                        lease.is_valid(now),
                        lease.t2_at().map_or(false, |t2| now >= t2),
                    ),
                    None => (false, false),
                };
                if !valid {
                    self.enter_unbound(now, actions)
                } else if past_t2 {
                    self.enter_rebind(now, actions)
                } else {
                    self.transmit(now, actions)
                }
            }
            State::Rebind => {
                if self.lease.as_ref().map_or(false, |lease| lease.is_valid(now)) {
                    self.transmit(now, actions)
                } else {
                    net_info!("DHCPv6 {}: lease expired", self.config.ifname);
                    self.enter_unbound(now, actions)
                }
            }
            State::Inform => self.transmit(now, actions),
            State::InformComplete => self.enter_inform(now, false, actions),
            State::Inactive | State::Release | State::Unbound => {
                net_trace!(
                    "DHCPv6 {}: ignoring timer in {}",
                    self.config.ifname,
                    self.state
                );
            }
        }
    }

    /// The Bound timer fired: renew, rebind, or give up, whichever is due.
    fn lease_timer(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let (valid, past_t1, past_t2) = match self.lease.as_ref() {
            Some(lease) => (
                lease.is_valid(now),
                lease.t1_at().map_or(false, |t1| now >= t1),
                lease.t2_at().map_or(false, |t2| now >= t2),
            ),
            None => (false, false, false),
        };
        if !valid {
            net_info!("DHCPv6 {}: lease expired", self.config.ifname);
            self.enter_unbound(now, actions)
        } else if past_t2 {
            self.enter_rebind(now, actions)
        } else if past_t1 {
            self.enter_renew(now, actions)
        } else {
            self.arm_lease_timer(now, actions)
        }
    }

    fn expects_reply(&self) -> bool {
        matches!(
            self.state,
            State::Solicit
                | State::Request
                | State::Confirm
                | State::Renew
                | State::Rebind
                | State::Decline
                | State::Inform
        )
    }

    fn receive(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        let packet = match Dhcpv6Packet::new_checked(data) {
            Ok(packet) => packet,
            Err(err) => {
                net_debug!("DHCPv6 {}: invalid packet: {}", self.config.ifname, err);
                return;
            }
        };
        let message_type = packet.message_type();
        if !self.expects_reply() {
            net_debug!(
                "DHCPv6 {}: ignoring {} because state is {}",
                self.config.ifname,
                message_type,
                self.state
            );
            return;
        }
        if packet.transaction_id() != self.transaction_id {
            net_trace!(
                "DHCPv6 {}: ignoring {} because transaction id {:#08x} is not ours",
                self.config.ifname,
                message_type,
                packet.transaction_id()
            );
            return;
        }
        if options.client_id() != Some(self.identity.duid.as_bytes()) {
            net_debug!(
                "DHCPv6 {}: ignoring {} because the client identifier does not match",
                self.config.ifname,
                message_type
            );
            return;
        }
        if options.server_id().is_none() {
            net_debug!(
                "DHCPv6 {}: ignoring {} because it is missing a server identifier",
                self.config.ifname,
                message_type
            );
            return;
        }

        net_debug!(
            "DHCPv6 {}: recv {} in {}",
            self.config.ifname,
            message_type,
            self.state
        );
        self.transmit_failures = 0;
        self.update_max_rt(options);

        match (self.state, message_type) {
            (State::Solicit, Dhcpv6MessageType::Advertise) => {
                self.advertise(now, data, options, actions)
            }
            (State::Request, Dhcpv6MessageType::Reply) => {
                self.request_reply(now, data, options, actions)
            }
            (State::Renew | State::Rebind, Dhcpv6MessageType::Reply) => {
                self.renew_reply(now, data, options, actions)
            }
            (State::Confirm, Dhcpv6MessageType::Reply) => {
                self.confirm_reply(now, data, options, actions)
            }
            (State::Decline, Dhcpv6MessageType::Reply) => {
                net_debug!("DHCPv6 {}: decline acknowledged", self.config.ifname);
                self.enter_solicit(now, false, actions)
            }
            (State::Inform, Dhcpv6MessageType::Reply) => {
                self.inform_reply(now, data, options, actions)
            }
            (state, message_type) => {
                net_debug!(
                    "DHCPv6 {}: ignoring {} because state is {}",
                    self.config.ifname,
                    message_type,
                    state
                );
            }
        }
    }

    /// Honour SOL_MAX_RT and INF_MAX_RT carried by any Advertise or Reply.
    fn update_max_rt(&mut self, options: &Dhcpv6OptionList<'_>) {
        if let Some(value) = options.u32(OPT_SOL_MAX_RT) {
            if MAX_RT_OPTION_RANGE.contains(&value) {
                self.sol_max_rt = Duration::from_secs(value.into());
                if self.state == State::Solicit {
                    self.retransmit.set_max_rt(self.sol_max_rt);
                }
            } else {
                net_debug!("DHCPv6 {}: ignoring sol-max-rt={}", self.config.ifname, value);
            }
        }
        if let Some(value) = options.u32(OPT_INF_MAX_RT) {
            if MAX_RT_OPTION_RANGE.contains(&value) {
                self.inf_max_rt = Duration::from_secs(value.into());
                if self.state == State::Inform {
                    self.retransmit.set_max_rt(self.inf_max_rt);
                }
            } else {
                net_debug!("DHCPv6 {}: ignoring inf-max-rt={}", self.config.ifname, value);
            }
        }
    }

    /// The status of a reply: top-level first, then that of our IA.
    fn status(&self, options: &Dhcpv6OptionList<'_>) -> Dhcpv6StatusCode {
        let status = options.status_code();
        if status != Dhcpv6StatusCode::Success {
            return status;
        }
        match self.config.mode.ia_kind().and_then(|kind| options.ia(kind)) {
            Some(ia) => ia.status_code(),
            None => Dhcpv6StatusCode::Success,
        }
    }

    fn advertise(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        let kind = match self.config.mode.ia_kind() {
            Some(kind) => kind,
            None => return,
        };
        let status = options.status_code();
        if status != Dhcpv6StatusCode::Success {
            net_debug!(
                "DHCPv6 {}: ignoring advertise with status {}",
                self.config.ifname,
                status
            );
            return;
        }
        if options.binding(kind).is_none() {
            net_debug!(
                "DHCPv6 {}: ignoring advertise because it has no usable {}",
                self.config.ifname,
                kind
            );
            return;
        }

        let preference = options.preference().unwrap_or(0);
        let better = match self.saved.get() {
            Some(saved) => preference > saved.preference(),
            None => true,
        };
        if better {
            net_debug!(
                "DHCPv6 {}: selected advertise with preference {}",
                self.config.ifname,
                preference
            );
            self.saved.save(data, options);
        }
        if preference == u8::MAX || self.retransmit.count() > 1 {
            self.enter_request(now, actions)
        }
    }

    fn request_reply(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        match self.status(options) {
            Dhcpv6StatusCode::Success => {
                if !self.accept(now, data, options, actions) {
                    net_debug!(
                        "DHCPv6 {}: ignoring reply without a usable binding",
                        self.config.ifname
                    );
                }
            }
            Dhcpv6StatusCode::NotOnLink => {
                net_info!("DHCPv6 {}: not on link, restarting discovery", self.config.ifname);
                self.enter_solicit(now, false, actions)
            }
            status @ (Dhcpv6StatusCode::NoAddrsAvail
            | Dhcpv6StatusCode::NoPrefixAvail
            | Dhcpv6StatusCode::UseMulticast) => {
                net_debug!("DHCPv6 {}: ignoring reply with status {}", self.config.ifname, status);
            }
            status => {
                net_warn!("DHCPv6 {}: request failed: {}", self.config.ifname, status);
                self.enter_unbound(now, actions)
            }
        }
    }

    fn renew_reply(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        match self.status(options) {
            Dhcpv6StatusCode::Success => {
                if !self.accept(now, data, options, actions) {
                    net_debug!(
                        "DHCPv6 {}: ignoring reply without a usable binding",
                        self.config.ifname
                    );
                }
            }
            status @ (Dhcpv6StatusCode::NoAddrsAvail
            | Dhcpv6StatusCode::NoPrefixAvail
            | Dhcpv6StatusCode::UseMulticast) => {
                net_debug!("DHCPv6 {}: ignoring reply with status {}", self.config.ifname, status);
            }
            status => {
                net_warn!("DHCPv6 {}: {} failed: {}", self.config.ifname, self.state, status);
                self.enter_unbound(now, actions)
            }
        }
    }

    fn confirm_reply(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        match self.status(options) {
            Dhcpv6StatusCode::Success => match self.config.mode {
                Mode::StatefulPrefix => {
                    if !self.accept(now, data, options, actions) {
                        self.confirm_failed(now, actions)
                    }
                }
                _ => {
                    net_debug!("DHCPv6 {}: lease confirmed", self.config.ifname);
                    self.enter_bound(now, actions)
                }
            },
            Dhcpv6StatusCode::NotOnLink => {
                net_info!("DHCPv6 {}: not on link, restarting discovery", self.config.ifname);
                self.enter_solicit(now, false, actions)
            }
            status => {
                net_debug!("DHCPv6 {}: confirm failed: {}", self.config.ifname, status);
                self.confirm_failed(now, actions)
            }
        }
    }

    /// Confirm gave no answer: keep the lease if it is still valid.
    fn confirm_failed(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if self.lease.as_ref().map_or(false, |lease| lease.is_valid(now)) {
            self.enter_bound(now, actions)
        } else {
            self.enter_solicit(now, false, actions)
        }
    }

    fn inform_reply(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) {
        let status = options.status_code();
        if status != Dhcpv6StatusCode::Success {
            net_debug!("DHCPv6 {}: ignoring reply with status {}", self.config.ifname, status);
            return;
        }
        let refresh = match options.u32(OPT_INFORMATION_REFRESH_TIME) {
            Some(INFINITY) => None,
            Some(value) => Some(value.max(IRT_MINIMUM)),
            None => Some(IRT_DEFAULT),
        };
        self.saved.save(data, options);
        self.set_state(State::InformComplete);
        actions.push(Action::DisableReceive);
        match refresh {
            Some(seconds) => {
                self.arm_timer(now + Duration::from_secs(seconds.into()), actions)
            }
            None => self.cancel_timer(actions),
        }
        actions.push(Action::Notify);
    }

    /// Take the binding offered by a Reply. Returns false if it has none.
    fn accept(
        &mut self,
        now: Instant,
        data: &[u8],
        options: &Dhcpv6OptionList<'_>,
        actions: &mut Vec<Action>,
    ) -> bool {
        let kind = match self.config.mode.ia_kind() {
            Some(kind) => kind,
            None => return false,
        };
        let binding = match options.binding(kind) {
            Some(binding) => binding,
            None => return false,
        };
        let resource = binding.resource;
        let (t1, t2) = if binding.ia.t1 != 0 && binding.ia.t2 != 0 {
            (binding.ia.t1, binding.ia.t2)
        } else {
            self.config.renewal.derive(resource.preferred_lifetime())
        };
        net_info!(
            "DHCPv6 {}: bound {} t1={} t2={}",
            self.config.ifname,
            resource,
            t1,
            t2
        );
        self.lease = Some(Lease::new(
            now,
            t1,
            t2,
            resource.preferred_lifetime(),
            resource.valid_lifetime(),
            self.link.network_id.clone(),
        ));
        self.saved.save(data, options);
        self.enter_bound(now, actions);
        true
    }

    fn set_state(&mut self, state: State) {
        if state != self.state {
            net_debug!("DHCPv6 {}: {} -> {}", self.config.ifname, self.state, state);
            self.state = state;
        }
    }

    fn arm_timer(&mut self, at: Instant, actions: &mut Vec<Action>) {
        self.timer_token = self.timer_token.wrapping_add(1);
        self.timer_armed = true;
        actions.push(Action::ArmTimer {
            at,
            token: self.timer_token,
        });
    }

    fn cancel_timer(&mut self, actions: &mut Vec<Action>) {
        self.timer_token = self.timer_token.wrapping_add(1);
        self.timer_armed = false;
        actions.push(Action::CancelTimer);
    }

    /// Start a new message exchange with a fresh transaction ID.
    fn begin_exchange(&mut self, params: Parameters, actions: &mut Vec<Action>) {
        self.transaction_id = self.rand.rand_u32() & 0x00ff_ffff;
        self.retransmit = Retransmit::new(params);
        actions.push(Action::EnableReceive {
            transaction_id: self.transaction_id,
        });
    }

    /// Wait a random time up to `max` before the first transmission.
    fn delay_first(&mut self, now: Instant, max: Duration, actions: &mut Vec<Action>) {
        let delay = random_delay(&mut self.rand, max);
        self.arm_timer(now + delay, actions)
    }

    fn remove_address(&mut self, actions: &mut Vec<Action>) {
        if let Some(address) = self.bound_address.take() {
            actions.push(Action::RemoveAddress(address));
        }
    }

    /// Forget the lease and everything learned with it.
    fn discard_lease(&mut self, actions: &mut Vec<Action>) {
        self.remove_address(actions);
        let had_packet = !self.saved.is_empty();
        self.saved.clear();
        if self.lease.take().is_some() || had_packet {
            actions.push(Action::Notify);
        }
    }

    /// Invalidate a lease obtained on a network other than the current one.
    fn forget_other_network(&mut self) {
        let network_id = self.link.network_id.as_deref();
        if let Some(lease) = self.lease.as_mut() {
            if lease.valid && !lease.same_network(network_id) {
                net_debug!("DHCPv6 {}: network changed, lease invalid", self.config.ifname);
                lease.invalidate();
            }
        }
    }

    fn enter_solicit(&mut self, now: Instant, delay: bool, actions: &mut Vec<Action>) {
        self.discard_lease(actions);
        self.set_state(State::Solicit);
        self.begin_exchange(Parameters::SOLICIT.with_max_rt(self.sol_max_rt), actions);
        if delay {
            self.delay_first(now, SOL_MAX_DELAY, actions)
        } else {
            self.transmit(now, actions)
        }
    }

    fn enter_request(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Request);
        let params = Parameters::REQUEST.with_max_rc(self.config.retry.req_max_rc);
        self.begin_exchange(params, actions);
        self.transmit(now, actions)
    }

    fn enter_confirm(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Confirm);
        let params = Parameters::CONFIRM.with_max_rd(self.config.retry.cnf_max_rd);
        self.begin_exchange(params, actions);
        self.delay_first(now, CNF_MAX_DELAY, actions)
    }

    fn enter_renew(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Renew);
        self.begin_exchange(Parameters::RENEW, actions);
        self.transmit(now, actions)
    }

    fn enter_rebind(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Rebind);
        self.begin_exchange(Parameters::REBIND, actions);
        self.transmit(now, actions)
    }

    fn enter_decline(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if let Some(lease) = self.lease.as_mut() {
            lease.invalidate();
        }
        self.remove_address(actions);
        actions.push(Action::Notify);
        self.set_state(State::Decline);
        let params = Parameters::DECLINE.with_max_rc(self.config.retry.dec_max_rc);
        self.begin_exchange(params, actions);
        self.transmit(now, actions)
    }

    fn enter_inform(&mut self, now: Instant, delay: bool, actions: &mut Vec<Action>) {
        self.set_state(State::Inform);
        let params = Parameters::INFORMATION_REQUEST.with_max_rt(self.inf_max_rt);
        self.begin_exchange(params, actions);
        if delay {
            self.delay_first(now, INF_MAX_DELAY, actions)
        } else {
            self.transmit(now, actions)
        }
    }

    fn enter_bound(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Bound);
        actions.push(Action::DisableReceive);
        self.configure_address(now, actions);
        self.arm_lease_timer(now, actions);
        actions.push(Action::Notify);
    }

    /// Arm the timer for the next lease event: T1, T2, or expiry.
    fn arm_lease_timer(&mut self, now: Instant, actions: &mut Vec<Action>) {
        match self.lease.as_ref().and_then(Lease::next_event) {
            Some(at) => self.arm_timer(at.max(now), actions),
            None => self.cancel_timer(actions),
        }
    }

    fn configure_address(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if self.config.mode != Mode::StatefulAddress {
            return;
        }
        let resource = match self.saved.get().and_then(|s| s.binding(IaKind::NonTemporary)) {
            Some(binding) => binding.resource,
            None => return,
        };
        let lease = match self.lease.as_ref() {
            Some(lease) => lease,
            None => return,
        };
        let config = AddressConfig {
            address: resource.address(),
            prefix_len: resource.prefix_len(),
            preferred_lifetime: lease.preferred_remaining(now),
            valid_lifetime: lease.valid_remaining(now),
        };
        if let Some(old) = self.bound_address {
            if old != config.address {
                actions.push(Action::RemoveAddress(old));
            }
        }
        self.bound_address = Some(config.address);
        actions.push(Action::SetAddress(config));
    }

    fn enter_unbound(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.set_state(State::Unbound);
        self.discard_lease(actions);
        self.enter_solicit(now, false, actions)
    }

    /// Stop all activity but keep the lease for a later Confirm.
    fn enter_inactive(&mut self, actions: &mut Vec<Action>) {
        self.set_state(State::Inactive);
        self.cancel_timer(actions);
        actions.push(Action::DisableReceive);
        self.remove_address(actions);
        actions.push(Action::Notify);
    }

    fn link_changed(&mut self, now: Instant, link: LinkInfo, actions: &mut Vec<Action>) {
        let previous = core::mem::replace(&mut self.link, link);
        if !self.running {
            return;
        }
        if !self.link.is_active() {
            if self.state != State::Inactive {
                net_info!("DHCPv6 {}: link down", self.config.ifname);
                self.enter_inactive(actions);
            }
            return;
        }
        self.transmit_failures = 0;
        let network_changed = previous.network_id != self.link.network_id;
        if network_changed {
            self.forget_other_network();
        }
        if self.state == State::Inactive || network_changed || !previous.is_active() {
            self.restart(now, actions)
        }
    }

    fn wake(&mut self, now: Instant, link: LinkInfo, actions: &mut Vec<Action>) {
        self.link = link;
        if !self.running {
            return;
        }
        if !self.link.is_active() {
            if self.state != State::Inactive {
                self.enter_inactive(actions);
            }
            return;
        }
        self.transmit_failures = 0;
        self.forget_other_network();
        let same_network = self.link.flags.contains(LinkFlags::WAKE_ON_SAME_NETWORK);
        let valid = self.lease.as_ref().map_or(false, |lease| lease.is_valid(now));
        if !(same_network && valid) {
            return self.restart(now, actions);
        }
        match self.state {
            State::Bound => {
                net_debug!("DHCPv6 {}: woke on the same network", self.config.ifname);
                self.lease_timer(now, actions)
            }
            State::Renew | State::Rebind => {
                net_debug!(
                    "DHCPv6 {}: woke on the same network, continuing {}",
                    self.config.ifname,
                    self.state
                );
            }
            _ => self.restart(now, actions),
        }
    }

    fn address_in_use(&mut self, now: Instant, address: Ipv6Addr, actions: &mut Vec<Action>) {
        let bound = matches!(self.state, State::Bound | State::Renew | State::Rebind);
        if !bound || self.bound_address != Some(address) {
            net_debug!(
                "DHCPv6 {}: ignoring conflict on {} in {}",
                self.config.ifname,
                address,
                self.state
            );
            return;
        }
        net_warn!("DHCPv6 {}: {} is in use, declining", self.config.ifname, address);
        self.enter_decline(now, actions)
    }

    fn transmit_failed(&mut self, actions: &mut Vec<Action>) {
        if self.state == State::Inactive {
            return;
        }
        self.transmit_failures += 1;
        net_debug!(
            "DHCPv6 {}: transmit failed ({} in a row)",
            self.config.ifname,
            self.transmit_failures
        );
        if self.transmit_failures >= self.config.retry.max_transmit_failures.max(1) {
            net_warn!(
                "DHCPv6 {}: {} transmit failures, treating link as down",
                self.config.ifname,
                self.transmit_failures
            );
            self.transmit_failures = 0;
            self.enter_inactive(actions);
        }
    }

    /// Send the message of the current state and arm the retransmission timer.
    fn transmit(&mut self, now: Instant, actions: &mut Vec<Action>) {
        self.send(now, actions);
        let timeout = self.retransmit.next_timeout(now, &mut self.rand);
        let mut at = now + timeout;
        if let Some(deadline) = self.exchange_deadline() {
            at = at.min(deadline.max(now));
        }
        self.arm_timer(at, actions)
    }

    /// Instant at which the current exchange must stop, regardless of retransmissions.
    fn exchange_deadline(&self) -> Option<Instant> {
        match self.state {
            State::Renew => self.lease.as_ref().and_then(|lease| {
                match (lease.t2_at(), lease.expires_at()) {
                    (Some(t2), Some(expiry)) => Some(t2.min(expiry)),
                    (t2, expiry) => t2.or(expiry),
                }
            }),
            State::Rebind => self.lease.as_ref().and_then(Lease::expires_at),
            State::Confirm => self.retransmit.deadline(),
            _ => None,
        }
    }

    fn send(&mut self, now: Instant, actions: &mut Vec<Action>) {
        match self.build(now) {
            Ok(bytes) => {
                net_debug!(
                    "DHCPv6 {}: send {} xid={:#08x} ({} bytes)",
                    self.config.ifname,
                    self.message_type(),
                    self.transaction_id,
                    bytes.len()
                );
                actions.push(Action::Transmit(bytes))
            }
            Err(err) => net_warn!(
                "DHCPv6 {}: cannot build {}: {}",
                self.config.ifname,
                self.message_type(),
                err
            ),
        }
    }

    fn message_type(&self) -> Dhcpv6MessageType {
        match self.state {
            State::Solicit => Dhcpv6MessageType::Solicit,
            State::Request => Dhcpv6MessageType::Request,
            State::Confirm if self.config.mode == Mode::StatefulPrefix => {
                Dhcpv6MessageType::Rebind
            }
            State::Confirm => Dhcpv6MessageType::Confirm,
            State::Renew => Dhcpv6MessageType::Renew,
            State::Rebind => Dhcpv6MessageType::Rebind,
            State::Release => Dhcpv6MessageType::Release,
            State::Decline => Dhcpv6MessageType::Decline,
            State::Inform
            | State::InformComplete
            | State::Bound
            | State::Inactive
            | State::Unbound => Dhcpv6MessageType::InformationRequest,
        }
    }

    fn build(&self, now: Instant) -> wire::Result<Vec<u8>> {
        let message_type = self.message_type();
        let mut repr = Dhcpv6Repr::new(message_type, self.transaction_id);
        repr.client_id = Some(self.identity.duid.as_bytes());
        repr.elapsed_time = Some(self.retransmit.elapsed_time(now));

        if !matches!(
            message_type,
            Dhcpv6MessageType::Release | Dhcpv6MessageType::Decline
        ) {
            for code in DEFAULT_REQUEST_OPTIONS
                .iter()
                .chain(self.config.request_options.iter())
            {
                repr.add_request_option(*code);
            }
        }
        match message_type {
            Dhcpv6MessageType::Solicit => repr.add_request_option(OPT_SOL_MAX_RT),
            Dhcpv6MessageType::InformationRequest => {
                repr.add_request_option(OPT_INF_MAX_RT);
                repr.add_request_option(OPT_INFORMATION_REFRESH_TIME);
            }
            _ => {}
        }

        let saved = self.saved.get();
        if matches!(
            message_type,
            Dhcpv6MessageType::Request
                | Dhcpv6MessageType::Renew
                | Dhcpv6MessageType::Release
                | Dhcpv6MessageType::Decline
        ) {
            repr.server_id = saved.and_then(|saved| saved.server_id());
        }

        if let Some(kind) = self.config.mode.ia_kind() {
            let mut ia = Dhcpv6IaRepr::new(kind, self.identity.iaid);
            if message_type != Dhcpv6MessageType::Solicit {
                if let Some(binding) = saved.and_then(|saved| saved.binding(kind)) {
                    // Lifetimes in client messages are hints; zero asks for the server's defaults.
                    let _ = ia.resources.push(binding.resource.with_lifetimes(0, 0));
                }
            }
            repr.ia = Some(ia);
        }
        repr.to_bytes()
    }
}
