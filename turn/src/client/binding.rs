use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::proto::channum::{MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BindingState {
    Idle,
    Request,
    Ready,
    Refresh,
    Failed,
}

/// A peer address with a channel number bound (or being bound) to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) number: u16,
    pub(crate) st: BindingState,
    pub(crate) addr: SocketAddr,
    pub(crate) refreshed_at: Instant,
}

impl Binding {
    pub(crate) fn set_state(&mut self, state: BindingState) {
        self.st = state;
    }

    pub(crate) fn state(&self) -> BindingState {
        self.st
    }

    pub(crate) fn set_refreshed_at(&mut self, at: Instant) {
        self.refreshed_at = at;
    }

    pub(crate) fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }
}

/// Channel binding table: allocates numbers from the allowed range and
/// maps both ways (peer address ↔ channel number).
#[derive(Default)]
pub(crate) struct BindingManager {
    chan_map: HashMap<u16, SocketAddr>,
    addr_map: HashMap<SocketAddr, Binding>,
    next: u16,
}

impl BindingManager {
    pub(crate) fn new() -> Self {
        BindingManager {
            chan_map: HashMap::new(),
            addr_map: HashMap::new(),
            next: MIN_CHANNEL_NUMBER,
        }
    }

    pub(crate) fn assign_channel_number(&mut self) -> u16 {
        let n = self.next;
        if self.next == MAX_CHANNEL_NUMBER {
            self.next = MIN_CHANNEL_NUMBER;
        } else {
            self.next += 1;
        }
        n
    }

    pub(crate) fn create(&mut self, addr: SocketAddr) -> Option<&Binding> {
        let b = Binding {
            number: self.assign_channel_number(),
            st: BindingState::Idle,
            addr,
            refreshed_at: Instant::now(),
        };

        self.chan_map.insert(b.number, b.addr);
        self.addr_map.insert(b.addr, b);
        self.addr_map.get(&addr)
    }

    pub(crate) fn find_by_addr(&self, addr: &SocketAddr) -> Option<&Binding> {
        self.addr_map.get(addr)
    }

    pub(crate) fn get_by_addr(&mut self, addr: &SocketAddr) -> Option<&mut Binding> {
        self.addr_map.get_mut(addr)
    }

    pub(crate) fn find_by_number(&self, number: u16) -> Option<&Binding> {
        let addr = self.chan_map.get(&number)?;
        self.addr_map.get(addr)
    }

    pub(crate) fn delete_by_addr(&mut self, addr: &SocketAddr) -> bool {
        if let Some(b) = self.addr_map.remove(addr) {
            self.chan_map.remove(&b.number);
            true
        } else {
            false
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.addr_map.len()
    }
}

#[cfg(test)]
mod binding_test {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn test_channel_numbers_stay_in_range() {
        let mut m = BindingManager::new();
        m.next = MAX_CHANNEL_NUMBER;
        assert_eq!(m.assign_channel_number(), MAX_CHANNEL_NUMBER);
        assert_eq!(m.assign_channel_number(), MIN_CHANNEL_NUMBER);
    }

    #[test]
    fn test_binding_lookup_both_ways() {
        let mut m = BindingManager::new();
        let number = m.create(addr(5000)).unwrap().number;

        assert_eq!(m.find_by_addr(&addr(5000)).unwrap().number, number);
        assert_eq!(m.find_by_number(number).unwrap().addr, addr(5000));

        assert!(m.delete_by_addr(&addr(5000)));
        assert!(m.find_by_number(number).is_none());
        assert_eq!(m.size(), 0);
    }
}
