//! Per-endpoint peer registry.
//!
//! Maps each peer's canonical host/port to the ordered connections that
//! reach it. The insertion order is load-bearing: outbound connections are
//! prepended and inbound connections appended, and lookup returns the first
//! entry, so deliberately-opened outbound connections take precedence and
//! inbound ones are used only when they are all that is available (NAT
//! traversal and similar setups).

use std::collections::HashMap;
use std::rc::Rc;

use switchboard_core::HostPort;

use crate::connection::ConnectionDirection;

/// Ordered host/port → connection registry.
///
/// Generic over the entry type so the ordering rules can be exercised
/// without spinning up sockets; the channel instantiates it with its
/// connection type.
pub(crate) struct PeerTable<C> {
    peers: HashMap<HostPort, Vec<Rc<C>>>,
}

impl<C> PeerTable<C> {
    pub(crate) fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Insert a connection under the peer's host/port.
    ///
    /// Outbound connections are prepended, inbound appended.
    pub(crate) fn set_peer(&mut self, host_port: HostPort, conn: Rc<C>, direction: ConnectionDirection) {
        let list = self.peers.entry(host_port).or_default();
        match direction {
            ConnectionDirection::Outbound => list.insert(0, conn),
            ConnectionDirection::Inbound => list.push(conn),
        }
    }

    /// The preferred connection for a peer: the first in its list.
    pub(crate) fn get_peer(&self, host_port: &HostPort) -> Option<Rc<C>> {
        self.peers.get(host_port).and_then(|list| list.first().cloned())
    }

    /// Remove one connection by identity. No-op when absent.
    ///
    /// The key stays in the map even when its list empties; key cleanup is
    /// deferred until peers carry enough state to warrant it.
    pub(crate) fn remove_peer(&mut self, host_port: &HostPort, conn: &Rc<C>) {
        if let Some(list) = self.peers.get_mut(host_port) {
            list.retain(|c| !Rc::ptr_eq(c, conn));
        }
    }

    /// Whether any connection exists under this host/port.
    pub(crate) fn has_peer(&self, host_port: &HostPort) -> bool {
        self.peers
            .get(host_port)
            .is_some_and(|list| !list.is_empty())
    }

    /// Every connection, flattened in insertion order.
    pub(crate) fn all(&self) -> Vec<Rc<C>> {
        self.peers.values().flatten().cloned().collect()
    }

    /// All connections under one host/port, in preference order.
    pub(crate) fn peer_list(&self, host_port: &HostPort) -> Vec<Rc<C>> {
        self.peers.get(host_port).cloned().unwrap_or_default()
    }

    /// Number of live connections across all peers.
    pub(crate) fn connection_count(&self) -> usize {
        self.peers.values().map(|list| list.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Entry(&'static str);

    fn hp(s: &str) -> HostPort {
        HostPort::parse(s).expect("parse")
    }

    #[test]
    fn test_get_peer_empty() {
        let table: PeerTable<Entry> = PeerTable::new();
        assert!(table.get_peer(&hp("10.0.0.1:1")).is_none());
    }

    #[test]
    fn test_outbound_prepends_inbound_appends() {
        let mut table = PeerTable::new();
        let key = hp("10.0.0.1:4040");

        let inbound_a = Rc::new(Entry("inbound-a"));
        let outbound = Rc::new(Entry("outbound"));
        let inbound_b = Rc::new(Entry("inbound-b"));

        table.set_peer(key.clone(), inbound_a.clone(), ConnectionDirection::Inbound);
        table.set_peer(key.clone(), outbound.clone(), ConnectionDirection::Outbound);
        table.set_peer(key.clone(), inbound_b.clone(), ConnectionDirection::Inbound);

        // Outbound wins even though an inbound connection arrived first.
        let preferred = table.get_peer(&key).expect("peer");
        assert!(Rc::ptr_eq(&preferred, &outbound));

        let list = table.peer_list(&key);
        assert_eq!(list.len(), 3);
        assert!(Rc::ptr_eq(&list[0], &outbound));
        assert!(Rc::ptr_eq(&list[1], &inbound_a));
        assert!(Rc::ptr_eq(&list[2], &inbound_b));
    }

    #[test]
    fn test_most_recent_outbound_wins() {
        let mut table = PeerTable::new();
        let key = hp("10.0.0.1:4040");

        let first = Rc::new(Entry("first"));
        let second = Rc::new(Entry("second"));
        table.set_peer(key.clone(), first, ConnectionDirection::Outbound);
        table.set_peer(key.clone(), second.clone(), ConnectionDirection::Outbound);

        let preferred = table.get_peer(&key).expect("peer");
        assert!(Rc::ptr_eq(&preferred, &second));
    }

    #[test]
    fn test_remove_peer_by_identity() {
        let mut table = PeerTable::new();
        let key = hp("10.0.0.1:4040");

        let a = Rc::new(Entry("a"));
        let b = Rc::new(Entry("b"));
        table.set_peer(key.clone(), a.clone(), ConnectionDirection::Outbound);
        table.set_peer(key.clone(), b.clone(), ConnectionDirection::Inbound);

        table.remove_peer(&key, &a);
        let preferred = table.get_peer(&key).expect("peer");
        assert!(Rc::ptr_eq(&preferred, &b));
        assert_eq!(table.connection_count(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut table = PeerTable::new();
        let key = hp("10.0.0.1:4040");
        let present = Rc::new(Entry("present"));
        let absent = Rc::new(Entry("absent"));

        table.set_peer(key.clone(), present.clone(), ConnectionDirection::Outbound);
        table.remove_peer(&key, &absent);
        table.remove_peer(&hp("10.9.9.9:1"), &absent);

        assert!(table.get_peer(&key).is_some());
    }

    #[test]
    fn test_key_survives_emptied_list() {
        let mut table = PeerTable::new();
        let key = hp("10.0.0.1:4040");
        let conn = Rc::new(Entry("only"));

        table.set_peer(key.clone(), conn.clone(), ConnectionDirection::Outbound);
        table.remove_peer(&key, &conn);

        assert!(table.get_peer(&key).is_none());
        assert!(!table.has_peer(&key));
        assert!(table.peers.contains_key(&key));
    }

    #[test]
    fn test_all_flattens_every_list() {
        let mut table = PeerTable::new();
        table.set_peer(
            hp("10.0.0.1:1"),
            Rc::new(Entry("one")),
            ConnectionDirection::Outbound,
        );
        table.set_peer(
            hp("10.0.0.2:2"),
            Rc::new(Entry("two")),
            ConnectionDirection::Inbound,
        );
        table.set_peer(
            hp("10.0.0.2:2"),
            Rc::new(Entry("three")),
            ConnectionDirection::Inbound,
        );

        assert_eq!(table.all().len(), 3);
        assert_eq!(table.connection_count(), 3);
    }
}
