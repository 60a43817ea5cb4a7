use std::cell::RefCell;
use std::io;
use std::net::Ipv6Addr;
use std::rc::{Rc, Weak};

use super::ClientHandle;
use crate::phy::Device;
use crate::time::{Duration, Instant};
use crate::wire::{Dhcpv6OptionIndex, Dhcpv6OptionList, Dhcpv6Packet};

/// How long an unused device stays open before it is closed.
pub const CLOSE_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before retrying a device that failed to open.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Size of the receive buffer; longer datagrams are truncated.
pub const MAX_DATAGRAM_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    owner: ClientHandle,
    ifindex: u32,
    transaction_id: u32,
}

#[derive(Debug)]
struct Shared<D: Device> {
    device: D,
    entries: Vec<Option<Entry>>,
    refs: usize,
    /// The device became unused and should be closed after [CLOSE_DELAY].
    close_pending: bool,
    close_at: Option<Instant>,
    /// The device failed and must be closed and, if still in use, reopened.
    reopen_pending: bool,
    retry_at: Option<Instant>,
    buffer: Vec<u8>,
}

impl<D: Device> Shared<D> {
    fn open(&mut self) {
        if self.device.is_open() {
            return;
        }
        if let Err(err) = self.device.open() {
            net_warn!("DHCPv6 cannot open socket: {}", err);
            self.reopen_pending = true;
        }
    }

    fn release(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot).and_then(Option::take) {
            net_trace!(
                "DHCPv6 {}: unregistered xid={:#08x} on ifindex {}",
                entry.owner,
                entry.transaction_id,
                entry.ifindex
            );
            self.refs -= 1;
            if self.refs == 0 {
                self.close_pending = true;
            }
        }
    }

    fn fail(&mut self, err: &io::Error) {
        net_warn!("DHCPv6 socket error, reopening: {}", err);
        self.reopen_pending = true;
    }
}

/// One datagram matched to the client that is waiting for it.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub owner: ClientHandle,
    pub ifindex: u32,
    pub source: Ipv6Addr,
    data: Vec<u8>,
    index: Dhcpv6OptionIndex,
}

impl Datagram {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The options of the datagram, parsed once on arrival.
    pub fn options(&self) -> Dhcpv6OptionList<'_> {
        let options = self
            .data
            .get(Dhcpv6Packet::<&[u8]>::HEADER_LEN..)
            .unwrap_or(&[]);
        self.index.bind(options)
    }
}

/// Shares one datagram device between every client in the process.
///
/// The device is open while at least one [Registration] exists, and for
/// [CLOSE_DELAY] afterwards, so that back-to-back exchanges reuse it.
/// Transmitting on a closed device opens it for the same grace period.
///
/// Errors from the device never reach the clients that registered: the
/// device is closed and reopened on the next [poll](#method.poll).
#[derive(Debug)]
pub struct Multiplexer<D: Device> {
    shared: Rc<RefCell<Shared<D>>>,
}

impl<D: Device> Multiplexer<D> {
    pub fn new(device: D) -> Multiplexer<D> {
        Multiplexer {
            shared: Rc::new(RefCell::new(Shared {
                device,
                entries: Vec::new(),
                refs: 0,
                close_pending: false,
                close_at: None,
                reopen_pending: false,
                retry_at: None,
                buffer: vec![0; MAX_DATAGRAM_LEN],
            })),
        }
    }

    /// Deliver datagrams carrying `transaction_id` that arrive on `ifindex` to `owner`.
    ///
    /// Opens the device if needed. Receiving stops when the returned
    /// registration is dropped.
    pub fn enable_receive(
        &self,
        owner: ClientHandle,
        ifindex: u32,
        transaction_id: u32,
    ) -> Registration<D> {
        let mut shared = self.shared.borrow_mut();
        let entry = Entry {
            owner,
            ifindex,
            transaction_id,
        };
        let slot = match shared.entries.iter().position(Option::is_none) {
            Some(slot) => {
                shared.entries[slot] = Some(entry);
                slot
            }
            None => {
                shared.entries.push(Some(entry));
                shared.entries.len() - 1
            }
        };
        shared.refs += 1;
        shared.close_pending = false;
        shared.close_at = None;
        shared.open();
        net_trace!(
            "DHCPv6 {}: registered xid={:#08x} on ifindex {}",
            owner,
            transaction_id,
            ifindex
        );
        Registration {
            shared: Rc::downgrade(&self.shared),
            slot,
        }
    }

    /// Send `data` to the servers on interface `ifindex`.
    pub fn transmit(&self, ifindex: u32, data: &[u8]) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        if !shared.device.is_open() {
            if let Err(err) = shared.device.open() {
                shared.fail(&err);
                return Err(err);
            }
            if shared.refs == 0 {
                shared.close_pending = true;
            }
        }
        match shared.device.send(ifindex, data) {
            Ok(()) => Ok(()),
            Err(err) => {
                shared.fail(&err);
                Err(err)
            }
        }
    }

    /// Receive the next datagram some registered client is waiting for.
    ///
    /// Datagrams without an arrival interface, too short for a header, with
    /// malformed options, or that nobody is waiting for are dropped.
    pub fn recv(&self) -> Option<Datagram> {
        let mut shared = self.shared.borrow_mut();
        let Shared {
            device,
            entries,
            buffer,
            reopen_pending,
            ..
        } = &mut *shared;
        if !device.is_open() {
            return None;
        }
        loop {
            let meta = match device.recv(buffer) {
                Ok(Some(meta)) => meta,
                Ok(None) => return None,
                Err(err) => {
                    net_warn!("DHCPv6 socket error, reopening: {}", err);
                    *reopen_pending = true;
                    return None;
                }
            };
            let data = &buffer[..meta.len];
            let ifindex = match meta.ifindex {
                Some(ifindex) => ifindex,
                None => {
                    net_debug!(
                        "DHCPv6 dropping datagram from {} without an arrival interface",
                        meta.source
                    );
                    continue;
                }
            };
            let packet = match Dhcpv6Packet::new_checked(data) {
                Ok(packet) => packet,
                Err(err) => {
                    net_trace!("DHCPv6 dropping datagram from {}: {}", meta.source, err);
                    continue;
                }
            };
            let transaction_id = packet.transaction_id();
            let owner = entries
                .iter()
                .flatten()
                .find(|entry| entry.ifindex == ifindex && entry.transaction_id == transaction_id)
                .map(|entry| entry.owner);
            let owner = match owner {
                Some(owner) => owner,
                None => {
                    net_trace!(
                        "DHCPv6 dropping {} xid={:#08x} on ifindex {}: nobody is waiting",
                        packet.message_type(),
                        transaction_id,
                        ifindex
                    );
                    continue;
                }
            };
            let index = match packet.options() {
                Ok(options) => options.index(),
                Err(err) => {
                    net_debug!(
                        "DHCPv6 {}: dropping {} with bad options: {}",
                        owner,
                        packet.message_type(),
                        err
                    );
                    continue;
                }
            };
            return Some(Datagram {
                owner,
                ifindex,
                source: meta.source,
                data: data.to_vec(),
                index,
            });
        }
    }

    /// Close an unused device once its grace period is over, and reopen a
    /// failed one.
    pub fn poll(&self, now: Instant) {
        let mut shared = self.shared.borrow_mut();

        if shared.reopen_pending {
            shared.reopen_pending = false;
            shared.device.close();
            if shared.refs > 0 {
                shared.retry_at = Some(now);
            } else {
                shared.close_pending = false;
                shared.close_at = None;
            }
        }
        if let Some(retry_at) = shared.retry_at {
            if shared.refs == 0 {
                shared.retry_at = None;
            } else if now >= retry_at {
                shared.retry_at = None;
                shared.open();
                if shared.reopen_pending {
                    shared.reopen_pending = false;
                    shared.retry_at = Some(now + REOPEN_DELAY);
                } else {
                    net_debug!("DHCPv6 socket reopened");
                }
            }
        }

        if shared.refs > 0 {
            shared.close_pending = false;
            shared.close_at = None;
            return;
        }
        if shared.close_pending {
            shared.close_pending = false;
            shared.close_at = Some(now + CLOSE_DELAY);
        }
        if let Some(close_at) = shared.close_at {
            if now >= close_at {
                shared.close_at = None;
                shared.device.close();
            }
        }
    }

    /// The next time [poll](#method.poll) has work to do.
    pub fn poll_at(&self) -> Option<Instant> {
        let shared = self.shared.borrow();
        if shared.close_pending || shared.reopen_pending {
            return Some(Instant::ZERO);
        }
        match (shared.close_at, shared.retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.borrow().device.is_open()
    }

    /// Number of live registrations.
    pub fn refs(&self) -> usize {
        self.shared.borrow().refs
    }

    /// Run `f` on the device.
    pub fn with_device<R, F: FnOnce(&mut D) -> R>(&self, f: F) -> R {
        f(&mut self.shared.borrow_mut().device)
    }
}

/// Keeps a client registered with a [Multiplexer]. Dropping it unregisters.
#[derive(Debug)]
pub struct Registration<D: Device> {
    shared: Weak<RefCell<Shared<D>>>,
    slot: usize,
}

impl<D: Device> Registration<D> {
    pub fn transaction_id(&self) -> Option<u32> {
        let shared = self.shared.upgrade()?;
        let shared = shared.borrow();
        shared
            .entries
            .get(self.slot)
            .and_then(|entry| entry.map(|entry| entry.transaction_id))
    }

    /// Wait for a different transaction on the same interface.
    pub fn set_transaction_id(&mut self, transaction_id: u32) {
        if let Some(shared) = self.shared.upgrade() {
            if let Some(Some(entry)) = shared.borrow_mut().entries.get_mut(self.slot) {
                entry.transaction_id = transaction_id;
            }
        }
    }
}

impl<D: Device> Drop for Registration<D> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            match shared.try_borrow_mut() {
                Ok(mut shared) => shared.release(self.slot),
                Err(_) => net_warn!("DHCPv6 registration dropped while the socket is in use"),
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::Queue;
    use crate::wire::{Dhcpv6MessageType, Dhcpv6Repr};

    fn reply(transaction_id: u32) -> Vec<u8> {
        let mut repr = Dhcpv6Repr::new(Dhcpv6MessageType::Reply, transaction_id);
        repr.server_id = Some(&[0, 3, 0, 1, 0x52, 0x54, 0, 0, 0, 1]);
        repr.to_bytes().unwrap()
    }

    fn handle(index: usize) -> ClientHandle {
        ClientHandle::new(index)
    }

    #[test]
    fn test_deferred_close() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        let first = mux.enable_receive(handle(0), 2, 0x10);
        let second = mux.enable_receive(handle(1), 3, 0x20);
        assert!(mux.is_open());
        assert_eq!(mux.refs(), 2);
        assert_eq!(mux.with_device(|queue| queue.open_count()), 1);

        drop(first);
        mux.poll(t0);
        assert_eq!(mux.poll_at(), None);
        drop(second);
        assert_eq!(mux.refs(), 0);
        assert_eq!(mux.poll_at(), Some(Instant::ZERO));

        mux.poll(t0);
        assert!(mux.is_open());
        assert_eq!(mux.poll_at(), Some(t0 + CLOSE_DELAY));
        mux.poll(t0 + Duration::from_millis(500));
        assert!(mux.is_open());
        mux.poll(t0 + CLOSE_DELAY);
        assert!(!mux.is_open());
        assert_eq!(mux.poll_at(), None);
    }

    #[test]
    fn test_open_cancels_pending_close() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        drop(mux.enable_receive(handle(0), 2, 0x10));
        mux.poll(t0);

        let registration = mux.enable_receive(handle(0), 2, 0x11);
        mux.poll(t0 + Duration::from_secs(5));
        assert!(mux.is_open());
        assert_eq!(mux.with_device(|queue| queue.open_count()), 1);
        assert_eq!(registration.transaction_id(), Some(0x11));
    }

    #[test]
    fn test_demultiplex() {
        let mux = Multiplexer::new(Queue::new());
        let _first = mux.enable_receive(handle(0), 2, 0x10);
        let mut second = mux.enable_receive(handle(1), 3, 0x20);
        second.set_transaction_id(0x21);

        mux.with_device(|queue| {
            queue.inject(Some(3), &reply(0x10));
            queue.inject(None, &reply(0x10));
            queue.inject(Some(2), &[7, 0, 0]);
            queue.inject(Some(3), &reply(0x20));
            queue.inject(Some(2), &[7, 0, 0, 0x10, 0, 2, 0, 9]);
            queue.inject(Some(2), &reply(0x10));
            queue.inject(Some(3), &reply(0x21));
        });

        let datagram = mux.recv().unwrap();
        assert_eq!(datagram.owner, handle(0));
        assert_eq!(datagram.ifindex, 2);
        assert_eq!(datagram.options().server_id().map(|id| id.len()), Some(10));

        let datagram = mux.recv().unwrap();
        assert_eq!(datagram.owner, handle(1));
        assert_eq!(datagram.ifindex, 3);

        assert!(mux.recv().is_none());
        assert_eq!(mux.with_device(|queue| queue.pending_len()), 0);
    }

    #[test]
    fn test_transmit_opens_transiently() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        mux.transmit(4, &[1, 0, 0, 1]).unwrap();
        assert!(mux.is_open());
        assert_eq!(mux.with_device(|queue| queue.pop_sent()), Some((4, vec![1, 0, 0, 1])));

        mux.poll(t0);
        assert!(mux.is_open());
        mux.poll(t0 + CLOSE_DELAY);
        assert!(!mux.is_open());
    }

    #[test]
    fn test_send_error_reopens() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        let _registration = mux.enable_receive(handle(0), 2, 0x10);
        mux.with_device(|queue| queue.fail_sends(1));
        assert!(mux.transmit(2, &[1, 0, 0, 1]).is_err());
        assert_eq!(mux.poll_at(), Some(Instant::ZERO));

        mux.poll(t0);
        assert!(mux.is_open());
        assert_eq!(mux.with_device(|queue| queue.open_count()), 2);
        mux.transmit(2, &[1, 0, 0, 1]).unwrap();
    }

    #[test]
    fn test_failed_open_retries() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        mux.with_device(|queue| queue.fail_opens(2));
        let _registration = mux.enable_receive(handle(0), 2, 0x10);
        assert!(!mux.is_open());

        mux.poll(t0);
        assert!(!mux.is_open());
        assert_eq!(mux.poll_at(), Some(t0 + REOPEN_DELAY));
        mux.poll(t0 + REOPEN_DELAY);
        assert!(mux.is_open());
    }

    #[test]
    fn test_failed_transmit_open_retries() {
        let mux = Multiplexer::new(Queue::new());
        let t0 = Instant::from_secs(10);
        let _registration = mux.enable_receive(handle(0), 2, 0x10);
        mux.with_device(|queue| {
            queue.close();
            queue.fail_opens(1);
        });
        assert!(mux.transmit(2, &[1, 0, 0, 1]).is_err());
        assert_eq!(mux.poll_at(), Some(Instant::ZERO));

        mux.poll(t0);
        assert!(mux.is_open());
        mux.transmit(2, &[1, 0, 0, 1]).unwrap();
        assert_eq!(mux.with_device(|queue| queue.sent_len()), 1);
    }

    #[test]
    fn test_registration_outlives_multiplexer() {
        let mux = Multiplexer::new(Queue::new());
        let registration = mux.enable_receive(handle(0), 2, 0x10);
        drop(mux);
        assert_eq!(registration.transaction_id(), None);
    }
}
