use std::collections::VecDeque;
use std::io;
use std::net::Ipv6Addr;

use super::{Device, RxMeta};

#[derive(Debug, Clone)]
struct Datagram {
    ifindex: Option<u32>,
    source: Ipv6Addr,
    data: Vec<u8>,
}

/// An in-memory device.
///
/// Datagrams injected with [inject](#method.inject) are handed out by
/// `recv` in order; datagrams passed to `send` are collected and can be
/// taken back with [pop_sent](#method.pop_sent).
#[derive(Debug, Default)]
pub struct Queue {
    rx: VecDeque<Datagram>,
    tx: VecDeque<(u32, Vec<u8>)>,
    open: bool,
    opens: usize,
    failing_sends: usize,
    failing_opens: usize,
}

impl Queue {
    pub fn new() -> Queue {
        Queue::default()
    }

    /// Queue a datagram as if it had arrived on interface `ifindex`.
    pub fn inject(&mut self, ifindex: Option<u32>, data: &[u8]) {
        self.inject_from(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1), ifindex, data)
    }

    pub fn inject_from(&mut self, source: Ipv6Addr, ifindex: Option<u32>, data: &[u8]) {
        self.rx.push_back(Datagram {
            ifindex,
            source,
            data: data.to_vec(),
        });
    }

    /// Take the oldest sent datagram along with its outgoing interface.
    pub fn pop_sent(&mut self) -> Option<(u32, Vec<u8>)> {
        self.tx.pop_front()
    }

    pub fn sent_len(&self) -> usize {
        self.tx.len()
    }

    pub fn pending_len(&self) -> usize {
        self.rx.len()
    }

    /// How many times the device went from closed to open.
    pub fn open_count(&self) -> usize {
        self.opens
    }

    /// Make the next `count` sends fail.
    pub fn fail_sends(&mut self, count: usize) {
        self.failing_sends = count;
    }

    /// Make the next `count` opens fail.
    pub fn fail_opens(&mut self, count: usize) {
        self.failing_opens = count;
    }
}

impl Device for Queue {
    fn open(&mut self) -> io::Result<()> {
        if self.open {
            return Ok(());
        }
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "injected open failure"));
        }
        self.open = true;
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<RxMeta>> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "queue is closed"));
        }
        let datagram = match self.rx.pop_front() {
            Some(datagram) => datagram,
            None => return Ok(None),
        };
        let len = datagram.data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&datagram.data[..len]);
        Ok(Some(RxMeta {
            len,
            ifindex: datagram.ifindex,
            source: datagram.source,
        }))
    }

    fn send(&mut self, ifindex: u32, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "queue is closed"));
        }
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "injected send failure"));
        }
        self.tx.push_back((ifindex, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_recv_in_order() {
        let mut queue = Queue::new();
        queue.inject(Some(2), &[1, 2, 3]);
        queue.inject(None, &[4]);
        queue.open().unwrap();

        let mut buffer = [0u8; 2];
        let meta = queue.recv(&mut buffer).unwrap().unwrap();
        assert_eq!(meta.len, 2);
        assert_eq!(meta.ifindex, Some(2));
        assert_eq!(buffer, [1, 2]);

        let meta = queue.recv(&mut buffer).unwrap().unwrap();
        assert_eq!(meta.ifindex, None);
        assert_eq!(queue.recv(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_closed_queue() {
        let mut queue = Queue::new();
        assert!(queue.send(1, &[0]).is_err());
        queue.open().unwrap();
        queue.open().unwrap();
        assert_eq!(queue.open_count(), 1);
        queue.send(3, &[9]).unwrap();
        assert_eq!(queue.pop_sent(), Some((3, vec![9])));
    }

    #[test]
    fn test_injected_failures() {
        let mut queue = Queue::new();
        queue.fail_opens(1);
        assert!(queue.open().is_err());
        queue.open().unwrap();
        queue.fail_sends(1);
        assert!(queue.send(1, &[0]).is_err());
        assert!(queue.send(1, &[0]).is_ok());
    }
}
