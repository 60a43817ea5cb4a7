use core::fmt;

use super::multiplexer::Registration;
use crate::phy::Device;
use crate::socket::dhcpv6::Client;
use crate::time::Instant;

/// A handle, identifying a client in a [ClientSet].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ClientHandle(usize);

impl ClientHandle {
    pub(crate) const fn new(index: usize) -> ClientHandle {
        ClientHandle(index)
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The timer a client armed, with the token it expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timer {
    pub(crate) at: Instant,
    pub(crate) token: u32,
}

/// A client together with the resources the driver holds on its behalf.
#[derive(Debug)]
pub(crate) struct Item<D: Device> {
    pub(crate) client: Client,
    pub(crate) timer: Option<Timer>,
    pub(crate) registration: Option<Registration<D>>,
}

/// An extensible set of clients.
///
/// Handles of removed clients are reused by later additions.
#[derive(Debug)]
pub struct ClientSet<D: Device> {
    items: Vec<Option<Item<D>>>,
}

impl<D: Device> Default for ClientSet<D> {
    fn default() -> Self {
        ClientSet { items: Vec::new() }
    }
}

impl<D: Device> ClientSet<D> {
    pub fn new() -> ClientSet<D> {
        ClientSet::default()
    }

    /// Add a client to the set, and return its handle.
    pub fn add(&mut self, client: Client) -> ClientHandle {
        let item = Item {
            client,
            timer: None,
            registration: None,
        };
        for (index, slot) in self.items.iter_mut().enumerate() {
            if slot.is_none() {
                net_trace!("[{}]: adding", index);
                *slot = Some(item);
                return ClientHandle(index);
            }
        }
        self.items.push(Some(item));
        net_trace!("[{}]: adding", self.items.len() - 1);
        ClientHandle(self.items.len() - 1)
    }

    /// Get a client from the set by its handle.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this set.
    pub fn get(&self, handle: ClientHandle) -> &Client {
        match self.item(handle) {
            Some(item) => &item.client,
            None => panic!("handle does not refer to a valid client"),
        }
    }

    /// Get a mutable client from the set by its handle.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this set.
    pub fn get_mut(&mut self, handle: ClientHandle) -> &mut Client {
        match self.item_mut(handle) {
            Some(item) => &mut item.client,
            None => panic!("handle does not refer to a valid client"),
        }
    }

    pub fn contains(&self, handle: ClientHandle) -> bool {
        self.item(handle).is_some()
    }

    /// Remove a client from the set, releasing its timer and registration.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this set.
    pub fn remove(&mut self, handle: ClientHandle) -> Client {
        net_trace!("[{}]: removing", handle.0);
        match self.items.get_mut(handle.0).and_then(Option::take) {
            Some(item) => item.client,
            None => panic!("handle does not refer to a valid client"),
        }
    }

    pub fn len(&self) -> usize {
        self.items.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get an iterator to the clients.
    pub fn iter(&self) -> impl Iterator<Item = (ClientHandle, &Client)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(n, x)| x.as_ref().map(|x| (ClientHandle(n), &x.client)))
    }

    pub(crate) fn item(&self, handle: ClientHandle) -> Option<&Item<D>> {
        self.items.get(handle.0).and_then(Option::as_ref)
    }

    pub(crate) fn item_mut(&mut self, handle: ClientHandle) -> Option<&mut Item<D>> {
        self.items.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Iterate every client in this set with its handle.
    pub(crate) fn items_and_handles(&self) -> impl Iterator<Item = (ClientHandle, &Item<D>)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(n, x)| x.as_ref().map(|x| (ClientHandle(n), x)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::Queue;
    use crate::socket::dhcpv6::{ClientConfig, Identity, Mode};
    use crate::wire::Duid;

    fn client(ifname: &str) -> Client {
        let config = ClientConfig::new(ifname, 1, Mode::Stateless);
        Client::new(config, Identity::new(Duid::uuid([7; 16]), 0), 1)
    }

    #[test]
    fn test_add_remove_reuses_handles() {
        let mut set = ClientSet::<Queue>::new();
        let en0 = set.add(client("en0"));
        let en1 = set.add(client("en1"));
        assert_ne!(en0, en1);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(en1).config().ifname, "en1");

        assert_eq!(set.remove(en0).config().ifname, "en0");
        assert!(!set.contains(en0));
        assert_eq!(set.len(), 1);

        let en2 = set.add(client("en2"));
        assert_eq!(en2, en0);
        let names: Vec<_> = set.iter().map(|(_, c)| c.config().ifname.clone()).collect();
        assert_eq!(names, vec!["en2".to_string(), "en1".to_string()]);
        assert_eq!(en2.to_string(), "#0");
    }

    #[test]
    #[should_panic(expected = "handle does not refer to a valid client")]
    fn test_stale_handle() {
        let mut set = ClientSet::<Queue>::new();
        let handle = set.add(client("en0"));
        set.remove(handle);
        set.get(handle);
    }
}
