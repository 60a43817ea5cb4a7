use std::collections::VecDeque;
use std::net::Ipv6Addr;

use super::client_set::{ClientSet, Timer};
use super::multiplexer::Multiplexer;
use super::{ClientHandle, Platform};
use crate::phy::Device;
use crate::rand::Rand;
use crate::socket::dhcpv6::{Action, Client, ClientConfig, Event, Identity, Info};
use crate::time::{Duration, Instant};

type NotifyFn = Box<dyn FnMut(ClientHandle, &Info<'_>)>;

/// Drives a set of clients over one shared device.
///
/// The dispatcher feeds the clients their inputs (datagrams, timer expiries
/// and the link events reported to it) and carries out the actions they
/// return against the [Multiplexer] and the [Platform].
pub struct Dispatcher<D: Device, P: Platform> {
    multiplexer: Multiplexer<D>,
    platform: P,
    clients: ClientSet<D>,
    notify: Option<NotifyFn>,
    rand: Rand,
}

impl<D: Device, P: Platform> Dispatcher<D, P> {
    /// Create a dispatcher. `seed` seeds the transaction IDs and jitter of every client.
    pub fn new(device: D, platform: P, seed: u64) -> Dispatcher<D, P> {
        Dispatcher {
            multiplexer: Multiplexer::new(device),
            platform,
            clients: ClientSet::new(),
            notify: None,
            rand: Rand::new(seed),
        }
    }

    /// Call `f` with a client's current information whenever it changes.
    pub fn set_notify<F>(&mut self, f: F)
    where
        F: FnMut(ClientHandle, &Info<'_>) + 'static,
    {
        self.notify = Some(Box::new(f));
    }

    /// Create a client and start it on the current state of its link.
    pub fn start(&mut self, now: Instant, config: ClientConfig, identity: Identity) -> ClientHandle {
        let link = self.platform.link_status(config.ifindex);
        net_info!(
            "DHCPv6 {}: starting {} client on ifindex {}",
            config.ifname,
            config.mode,
            config.ifindex
        );
        let seed = self.rand.rand_u64();
        let handle = self.clients.add(Client::new(config, identity, seed));
        self.dispatch(now, handle, Event::Start(link));
        handle
    }

    /// Stop a client, releasing its lease, and remove it.
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a running client.
    pub fn stop(&mut self, now: Instant, handle: ClientHandle) -> Client {
        self.dispatch(now, handle, Event::Stop);
        self.clients.remove(handle)
    }

    fn handles_on(&self, ifindex: u32) -> Vec<ClientHandle> {
        self.clients
            .iter()
            .filter(|(_, client)| client.config().ifindex == ifindex)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// The link of interface `ifindex` changed state or network.
    pub fn link_changed(&mut self, now: Instant, ifindex: u32) {
        for handle in self.handles_on(ifindex) {
            let link = self.platform.link_status(ifindex);
            self.dispatch(now, handle, Event::LinkChanged(link));
        }
    }

    /// The system woke from sleep.
    pub fn wake(&mut self, now: Instant) {
        let handles: Vec<_> = self.clients.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            let ifindex = self.clients.get(handle).config().ifindex;
            let link = self.platform.link_status(ifindex);
            self.dispatch(now, handle, Event::Wake(link));
        }
    }

    /// Duplicate address detection found `address` in use on interface `ifindex`.
    pub fn address_in_use(&mut self, now: Instant, ifindex: u32, address: Ipv6Addr) {
        for handle in self.handles_on(ifindex) {
            self.dispatch(now, handle, Event::AddressInUse(address));
        }
    }

    /// Get a client by its handle.
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a running client.
    pub fn client(&self, handle: ClientHandle) -> &Client {
        self.clients.get(handle)
    }

    pub fn clients(&self) -> &ClientSet<D> {
        &self.clients
    }

    /// # Panics
    /// This function panics if the handle does not refer to a running client.
    pub fn info(&self, handle: ClientHandle) -> Info<'_> {
        self.clients.get(handle).info()
    }

    pub fn multiplexer(&self) -> &Multiplexer<D> {
        &self.multiplexer
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Process everything that is due at `now`: socket maintenance, received
    /// datagrams and expired timers.
    ///
    /// Returns whether any client was run.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut processed = false;
        self.multiplexer.poll(now);

        while let Some(datagram) = self.multiplexer.recv() {
            if !self.clients.contains(datagram.owner) {
                continue;
            }
            processed = true;
            self.dispatch(
                now,
                datagram.owner,
                Event::Receive {
                    packet: datagram.data(),
                    options: datagram.options(),
                },
            );
        }

        let due: Vec<(ClientHandle, u32)> = self
            .clients
            .items_and_handles()
            .filter_map(|(handle, item)| {
                item.timer
                    .filter(|timer| timer.at <= now)
                    .map(|timer| (handle, timer.token))
            })
            .collect();
        for (handle, token) in due {
            match self.clients.item_mut(handle) {
                Some(item) if item.timer.map(|timer| timer.token) == Some(token) => {
                    item.timer = None;
                }
                _ => continue,
            }
            processed = true;
            self.dispatch(now, handle, Event::Timeout(token));
        }

        self.multiplexer.poll(now);
        processed
    }

    /// The earliest time [poll](#method.poll) has work to do, if any.
    pub fn poll_at(&self) -> Option<Instant> {
        self.clients
            .items_and_handles()
            .filter_map(|(_, item)| item.timer.map(|timer| timer.at))
            .chain(self.multiplexer.poll_at())
            .min()
    }

    /// How long to wait before calling [poll](#method.poll), if anything is scheduled.
    pub fn poll_delay(&self, now: Instant) -> Option<Duration> {
        self.poll_at().map(|at| if at > now { at - now } else { Duration::ZERO })
    }

    /// Feed `event` to a client and carry out the actions it returns.
    fn dispatch(&mut self, now: Instant, handle: ClientHandle, event: Event<'_>) {
        let Dispatcher {
            multiplexer,
            platform,
            clients,
            notify,
            ..
        } = self;
        let item = match clients.item_mut(handle) {
            Some(item) => item,
            None => return,
        };
        let ifindex = item.client.config().ifindex;
        let mut queue: VecDeque<Action> = item.client.handle(now, event).into();
        let mut notified = false;

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Transmit(bytes) => {
                    if let Err(err) = multiplexer.transmit(ifindex, &bytes) {
                        net_warn!(
                            "DHCPv6 {}: transmit failed: {}",
                            item.client.config().ifname,
                            err
                        );
                        queue.extend(item.client.handle(now, Event::TransmitFailed));
                    }
                }
                Action::ArmTimer { at, token } => item.timer = Some(Timer { at, token }),
                Action::CancelTimer => item.timer = None,
                Action::EnableReceive { transaction_id } => {
                    if let Some(registration) = item.registration.as_mut() {
                        registration.set_transaction_id(transaction_id);
                    } else {
                        item.registration =
                            Some(multiplexer.enable_receive(handle, ifindex, transaction_id));
                    }
                }
                Action::DisableReceive => item.registration = None,
                Action::SetAddress(config) => {
                    if let Err(err) = platform.set_address(ifindex, &config) {
                        net_warn!(
                            "DHCPv6 {}: cannot set {}/{}: {}",
                            item.client.config().ifname,
                            config.address,
                            config.prefix_len,
                            err
                        );
                    }
                }
                Action::RemoveAddress(address) => {
                    if let Err(err) = platform.remove_address(ifindex, address) {
                        net_warn!(
                            "DHCPv6 {}: cannot remove {}: {}",
                            item.client.config().ifname,
                            address,
                            err
                        );
                    }
                }
                Action::Notify => notified = true,
            }
        }

        if notified {
            if let Some(notify) = notify.as_mut() {
                notify(handle, &item.client.info());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::iface::CLOSE_DELAY;
    use crate::phy::Queue;
    use crate::socket::dhcpv6::{AddressConfig, LinkInfo, Mode, State};
    use crate::wire::dhcpv6::OPT_PREFERENCE;
    use crate::wire::{
        Dhcpv6IaAddr, Dhcpv6IaRepr, Dhcpv6MessageType, Dhcpv6Option, Dhcpv6Packet, Dhcpv6Repr,
        Dhcpv6Resource, Duid, IaKind,
    };

    const SERVER_DUID: &[u8] = &[0, 3, 0, 1, 0x52, 0x54, 0, 0, 0, 0xfe];
    const ADDRESS: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x100);

    #[derive(Debug, Default)]
    struct Recorder {
        links: HashMap<u32, LinkInfo>,
        set: Vec<(u32, AddressConfig)>,
        removed: Vec<(u32, Ipv6Addr)>,
    }

    impl Platform for Recorder {
        fn link_status(&mut self, ifindex: u32) -> LinkInfo {
            self.links
                .get(&ifindex)
                .cloned()
                .unwrap_or_else(|| LinkInfo::up(None))
        }

        fn set_address(&mut self, ifindex: u32, config: &AddressConfig) -> io::Result<()> {
            self.set.push((ifindex, *config));
            Ok(())
        }

        fn remove_address(&mut self, ifindex: u32, address: Ipv6Addr) -> io::Result<()> {
            self.removed.push((ifindex, address));
            Ok(())
        }
    }

    type TestDispatcher = Dispatcher<Queue, Recorder>;

    fn dispatcher(seed: u64) -> TestDispatcher {
        let _ = env_logger::builder().is_test(true).try_init();
        Dispatcher::new(Queue::new(), Recorder::default(), seed)
    }

    fn identity(iaid: u32) -> Identity {
        Identity::new(Duid::uuid([0x11; 16]), iaid)
    }

    fn ia_na(iaid: u32) -> Dhcpv6IaRepr<'static> {
        let mut ia = Dhcpv6IaRepr::new(IaKind::NonTemporary, iaid);
        ia.t1 = 3600;
        ia.t2 = 5400;
        ia.resources
            .push(Dhcpv6Resource::Address(Dhcpv6IaAddr {
                address: ADDRESS,
                preferred_lifetime: 4000,
                valid_lifetime: 7200,
                options: &[],
            }))
            .unwrap();
        ia
    }

    /// A server message answering the client message `request`.
    fn answer(
        request: &[u8],
        message_type: Dhcpv6MessageType,
        ia: Option<Dhcpv6IaRepr<'static>>,
        extra: &[Dhcpv6Option<'_>],
    ) -> Vec<u8> {
        let packet = Dhcpv6Packet::new_checked(request).unwrap();
        let options = packet.option_list().unwrap();
        let mut repr = Dhcpv6Repr::new(message_type, packet.transaction_id());
        repr.client_id = options.client_id();
        repr.server_id = Some(SERVER_DUID);
        repr.ia = ia;
        repr.additional_options = extra;
        repr.to_bytes().unwrap()
    }

    fn pop_sent(dispatcher: &TestDispatcher) -> (u32, Vec<u8>) {
        dispatcher
            .multiplexer()
            .with_device(|queue| queue.pop_sent())
            .expect("nothing was sent")
    }

    fn inject(dispatcher: &TestDispatcher, ifindex: u32, data: &[u8]) {
        dispatcher
            .multiplexer()
            .with_device(|queue| queue.inject(Some(ifindex), data));
    }

    /// Poll at the next scheduled time, returning that time.
    fn step(dispatcher: &mut TestDispatcher, now: Instant) -> Instant {
        let at = dispatcher.poll_at().expect("nothing scheduled").max(now);
        dispatcher.poll(at);
        at
    }

    fn bind(dispatcher: &mut TestDispatcher, now: Instant) -> (ClientHandle, Instant) {
        let handle = dispatcher.start(
            now,
            ClientConfig::new("en0", 2, Mode::StatefulAddress),
            identity(7),
        );
        let now = step(dispatcher, now);
        let (ifindex, solicit) = pop_sent(dispatcher);
        assert_eq!(ifindex, 2);
        assert_eq!(solicit[0], u8::from(Dhcpv6MessageType::Solicit));

        let preference = [255];
        let extra = [Dhcpv6Option::new(OPT_PREFERENCE, &preference)];
        let advertise = answer(&solicit, Dhcpv6MessageType::Advertise, Some(ia_na(7)), &extra);
        inject(dispatcher, 2, &advertise);
        dispatcher.poll(now);
        let (_, request) = pop_sent(dispatcher);
        assert_eq!(request[0], u8::from(Dhcpv6MessageType::Request));

        let reply = answer(&request, Dhcpv6MessageType::Reply, Some(ia_na(7)), &[]);
        inject(dispatcher, 2, &reply);
        dispatcher.poll(now);
        assert_eq!(dispatcher.client(handle).state(), State::Bound);
        (handle, now)
    }

    #[test]
    fn test_acquire_address() {
        let mut dispatcher = dispatcher(42);
        let notes = Rc::new(RefCell::new(Vec::new()));
        let sink = notes.clone();
        dispatcher.set_notify(move |handle, info| sink.borrow_mut().push((handle, info.state)));

        let t0 = Instant::from_secs(100);
        let (handle, now) = bind(&mut dispatcher, t0);
        assert!(now - t0 <= Duration::from_secs(1));

        let (ifindex, config) = dispatcher.platform().set[0];
        assert_eq!(ifindex, 2);
        assert_eq!(config.address, ADDRESS);
        assert_eq!(config.valid_lifetime, 7200);
        assert_eq!(notes.borrow().last(), Some(&(handle, State::Bound)));
        assert!(dispatcher.info(handle).is_ready(now));

        assert_eq!(dispatcher.multiplexer().refs(), 0);
        assert_eq!(dispatcher.poll_at(), Some(now + CLOSE_DELAY));
        dispatcher.poll(now + CLOSE_DELAY);
        assert!(!dispatcher.multiplexer().is_open());
        assert_eq!(dispatcher.poll_at(), Some(now + Duration::from_secs(3600)));
        assert_eq!(
            dispatcher.poll_delay(now + Duration::from_secs(600)),
            Some(Duration::from_secs(3000))
        );
    }

    #[test]
    fn test_renew_reopens_socket() {
        let mut dispatcher = dispatcher(42);
        let (handle, bound_at) = bind(&mut dispatcher, Instant::from_secs(100));
        let now = step(&mut dispatcher, bound_at);
        assert!(!dispatcher.multiplexer().is_open());

        let renew_at = step(&mut dispatcher, now);
        assert_eq!(renew_at, bound_at + Duration::from_secs(3600));
        assert_eq!(dispatcher.client(handle).state(), State::Renew);
        assert!(dispatcher.multiplexer().is_open());
        let (_, renew) = pop_sent(&dispatcher);
        assert_eq!(renew[0], u8::from(Dhcpv6MessageType::Renew));
        assert_eq!(dispatcher.multiplexer().with_device(|queue| queue.open_count()), 2);
    }

    #[test]
    fn test_replies_demultiplexed_per_interface() {
        let mut dispatcher = dispatcher(7);
        let t0 = Instant::from_secs(100);
        let en0 = dispatcher.start(t0, ClientConfig::new("en0", 2, Mode::Stateless), identity(0));
        let en1 = dispatcher.start(t0, ClientConfig::new("en1", 3, Mode::Stateless), identity(1));
        assert_eq!(dispatcher.multiplexer().refs(), 2);

        let mut now = t0;
        let mut sent = HashMap::new();
        while sent.len() < 2 {
            now = step(&mut dispatcher, now);
            while let Some((ifindex, data)) =
                dispatcher.multiplexer().with_device(|queue| queue.pop_sent())
            {
                sent.insert(ifindex, data);
            }
        }

        let reply = answer(&sent[&3], Dhcpv6MessageType::Reply, None, &[]);
        inject(&dispatcher, 2, &reply);
        dispatcher.poll(now);
        assert_eq!(dispatcher.client(en0).state(), State::Inform);
        assert_eq!(dispatcher.client(en1).state(), State::Inform);

        inject(&dispatcher, 3, &reply);
        dispatcher.poll(now);
        assert_eq!(dispatcher.client(en0).state(), State::Inform);
        assert_eq!(dispatcher.client(en1).state(), State::InformComplete);
        assert_eq!(dispatcher.multiplexer().refs(), 1);
    }

    #[test]
    fn test_transmit_failures_deactivate_client() {
        let mut dispatcher = dispatcher(42);
        let mut now = Instant::from_secs(100);
        let handle = dispatcher.start(
            now,
            ClientConfig::new("en0", 2, Mode::StatefulAddress),
            identity(7),
        );
        dispatcher
            .multiplexer()
            .with_device(|queue| queue.fail_sends(3));
        for _ in 0..20 {
            if dispatcher.client(handle).state() == State::Inactive {
                break;
            }
            now = step(&mut dispatcher, now);
        }
        assert_eq!(dispatcher.client(handle).state(), State::Inactive);
        assert_eq!(dispatcher.multiplexer().refs(), 0);

        dispatcher.link_changed(now, 2);
        assert_eq!(dispatcher.client(handle).state(), State::Solicit);
    }

    #[test]
    fn test_link_down_removes_address() {
        let mut dispatcher = dispatcher(42);
        let (handle, now) = bind(&mut dispatcher, Instant::from_secs(100));
        dispatcher.platform_mut().links.insert(2, LinkInfo::down());
        dispatcher.link_changed(now, 3);
        assert_eq!(dispatcher.client(handle).state(), State::Bound);
        dispatcher.link_changed(now, 2);
        assert_eq!(dispatcher.client(handle).state(), State::Inactive);
        assert_eq!(dispatcher.platform().removed, vec![(2, ADDRESS)]);
    }

    #[test]
    fn test_address_conflict_declines() {
        let mut dispatcher = dispatcher(42);
        let (handle, now) = bind(&mut dispatcher, Instant::from_secs(100));
        dispatcher.address_in_use(now, 2, ADDRESS);
        assert_eq!(dispatcher.client(handle).state(), State::Decline);
        let (_, decline) = pop_sent(&dispatcher);
        assert_eq!(decline[0], u8::from(Dhcpv6MessageType::Decline));
        assert_eq!(dispatcher.multiplexer().refs(), 1);
    }

    #[test]
    fn test_stop_releases_and_removes() {
        let mut dispatcher = dispatcher(42);
        let (handle, now) = bind(&mut dispatcher, Instant::from_secs(100));
        let client = dispatcher.stop(now, handle);
        assert_eq!(client.state(), State::Inactive);
        assert!(dispatcher.clients().is_empty());
        let (_, release) = pop_sent(&dispatcher);
        assert_eq!(release[0], u8::from(Dhcpv6MessageType::Release));
        assert_eq!(dispatcher.platform().removed, vec![(2, ADDRESS)]);
    }

    #[test]
    fn test_wake_on_new_network() {
        let mut dispatcher = dispatcher(42);
        let (handle, now) = bind(&mut dispatcher, Instant::from_secs(100));
        dispatcher
            .platform_mut()
            .links
            .insert(2, LinkInfo::up(Some("elsewhere")));
        dispatcher.wake(now + Duration::from_secs(30));
        assert_eq!(dispatcher.client(handle).state(), State::Solicit);
        assert!(dispatcher.client(handle).lease().is_none());
    }
}
