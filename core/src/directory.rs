// hashnet - Replicated in-memory hash-to-address directory over UDP
// Copyright (C) 2021  hashnet contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use indexmap::IndexMap;

/// Fixed entry time-to-live, in seconds.
pub const TTL_SECONDS: u64 = 30;

/// Seconds since the UNIX epoch, clamped to the server's own clock.
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Opaque content identifier. Equality is byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash(pub Bytes);

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Opaque "where to fetch" token. Equality is byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(pub Bytes);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// One (address, last-refreshed-time) record inside a hash's entry list.
#[derive(Debug, Clone)]
pub struct Entry {
    pub address: Address,
    pub last_refreshed: u64,
}

/// In-memory hash -> addresses directory.
///
/// Every invariant from the surrounding design is maintained by
/// construction: a hash is removed the instant its entry list empties,
/// and within a hash's entry list, addresses are kept unique by `put`.
#[derive(Default)]
pub struct Directory {
    table: IndexMap<Hash, Vec<Entry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            table: IndexMap::new(),
        }
    }

    /// Inserts a fresh entry, or refreshes the existing one for
    /// (hash, address). Idempotent modulo the refresh timestamp.
    pub fn put(&mut self, hash: Hash, address: Address, now: u64) {
        let entries = self.table.entry(hash).or_insert_with(Vec::new);

        match entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => entry.last_refreshed = now,
            None => entries.push(Entry {
                address,
                last_refreshed: now,
            }),
        }
    }

    /// Addresses known to hold `hash`, in insertion order. Empty (not an
    /// error) if the hash is unknown.
    pub fn get(&self, hash: &Hash) -> impl Iterator<Item = &Address> {
        self.table
            .get(hash)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|e| &e.address))
    }

    /// Removes every entry older than [`TTL_SECONDS`], then removes any
    /// hash left with no entries. Returns the number of seconds until
    /// the next entry would expire (plus one), or `TTL_SECONDS` if the
    /// directory ended up empty.
    pub fn sweep(&mut self, now: u64) -> u64 {
        let mut next_deadline = None;

        self.table.retain(|_, entries| {
            entries.retain(|e| {
                let age = now.saturating_sub(e.last_refreshed);

                if age > TTL_SECONDS {
                    false
                } else {
                    let remaining = TTL_SECONDS - age;
                    next_deadline = Some(next_deadline.map_or(remaining, |d: u64| d.min(remaining)));
                    true
                }
            });

            !entries.is_empty()
        });

        next_deadline.map(|d| d + 1).unwrap_or(TTL_SECONDS)
    }

    /// All (hash, address) pairs, ordered as (hash insertion order) x
    /// (entry insertion order), for bootstrap transfer.
    pub fn iterate_all(&self) -> impl Iterator<Item = (&Hash, &Address)> {
        self.table
            .iter()
            .flat_map(|(hash, entries)| entries.iter().map(move |e| (hash, &e.address)))
    }
}

/// The transport-level address of another server. Raw endpoint bytes are
/// retained verbatim (they are forwarded as-is in peer announcements);
/// the parsed `SocketAddr` backs equality and logging.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub addr: SocketAddr,
    pub raw: Bytes,
}

impl PeerEndpoint {
    pub fn new(addr: SocketAddr, raw: Bytes) -> Self {
        Self { addr, raw }
    }

    /// Builds an endpoint from an observed `SocketAddr`, deriving its raw
    /// wire form via [`encode_peer_endpoint`].
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let raw = encode_peer_endpoint(addr);
        Self { addr, raw }
    }
}

/// Serialises a socket address into the portable blob format carried in
/// `s` blocks: a family tag, the raw IP octets, then a u16-LE port.
///
/// The source this design is ported from hands the OS's own
/// platform-dependent `sockaddr` bytes around verbatim in these blocks
/// (see the peer-endpoint open question). A byte-for-byte port of that
/// layout would require unsafe struct casts with no portability
/// guarantee, so this uses a stable, self-describing encoding instead;
/// the *treatment* of the bytes as an opaque blob, forwarded unchanged
/// between servers, matches the source.
pub fn encode_peer_endpoint(addr: SocketAddr) -> Bytes {
    let mut buf = Vec::with_capacity(19);

    match addr {
        SocketAddr::V4(v4) => {
            buf.push(4u8);
            buf.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            buf.push(6u8);
            buf.extend_from_slice(&v6.ip().octets());
        }
    }

    buf.extend_from_slice(&addr.port().to_le_bytes());

    Bytes::from(buf)
}

/// Inverse of [`encode_peer_endpoint`].
pub fn decode_peer_endpoint(bytes: &[u8]) -> Option<SocketAddr> {
    let (family, rest) = bytes.split_first()?;

    let (ip_len, port_offset): (usize, usize) = match family {
        4 => (4, 4),
        6 => (16, 16),
        _ => return None,
    };

    if rest.len() != ip_len + 2 {
        return None;
    }

    let port = u16::from_le_bytes([rest[port_offset], rest[port_offset + 1]]);

    let addr = match family {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&rest[..4]);
            SocketAddr::from((std::net::Ipv4Addr::from(octets), port))
        }
        6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            SocketAddr::from((std::net::Ipv6Addr::from(octets), port))
        }
        _ => unreachable!(),
    };

    Some(addr)
}

/// Equality is by canonical (family, address, port), exactly the
/// comparison `SocketAddr` already implements -- no separate textual
/// round-trip is needed once the address is parsed.
impl PartialEq for PeerEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for PeerEndpoint {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    ExpectedAlive,
    AwaitingResponse,
}

struct Peer {
    endpoint: PeerEndpoint,
    liveness: Liveness,
}

/// The list of other servers this server knows about, each with a
/// liveness flag. Insertion order is preserved.
#[derive(Default)]
pub struct PeerSet {
    peers: Vec<Peer>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, endpoint: &PeerEndpoint) -> bool {
        self.peers.iter().any(|p| &p.endpoint == endpoint)
    }

    /// Appends `endpoint` if not already present; sets liveness to
    /// expected-alive either way.
    pub fn add_peer(&mut self, endpoint: PeerEndpoint) {
        match self.peers.iter_mut().find(|p| p.endpoint == endpoint) {
            Some(peer) => peer.liveness = Liveness::ExpectedAlive,
            None => self.peers.push(Peer {
                endpoint,
                liveness: Liveness::ExpectedAlive,
            }),
        }
    }

    pub fn remove_peer(&mut self, endpoint: &PeerEndpoint) {
        self.peers.retain(|p| &p.endpoint != endpoint);
    }

    pub fn mark_alive(&mut self, endpoint: &PeerEndpoint) {
        if let Some(peer) = self.peers.iter_mut().find(|p| &p.endpoint == endpoint) {
            peer.liveness = Liveness::ExpectedAlive;
        }
    }

    /// Drops every peer still awaiting a response to the previous probe,
    /// flips the survivors back to awaiting-response, and returns them
    /// as the list to send the next probe to.
    pub fn sweep_peers(&mut self) -> Vec<PeerEndpoint> {
        self.peers.retain(|p| p.liveness != Liveness::AwaitingResponse);

        for peer in &mut self.peers {
            peer.liveness = Liveness::AwaitingResponse;
        }

        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEndpoint> {
        self.peers.iter().map(|p| &p.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> Hash {
        Hash(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn addr(s: &str) -> Address {
        Address(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn endpoint(port: u16) -> PeerEndpoint {
        let sa: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        PeerEndpoint::new(sa, Bytes::from_static(b"raw"))
    }

    #[test]
    fn put_then_get_is_idempotent_and_refreshes_timestamp() {
        let mut dir = Directory::new();

        dir.put(hash("h"), addr("a"), 100);
        dir.put(hash("h"), addr("a"), 150);

        let entries: Vec<&Address> = dir.get(&hash("h")).collect();
        assert_eq!(entries, vec![&addr("a")]);
        assert_eq!(dir.table[&hash("h")].len(), 1);
        assert_eq!(dir.table[&hash("h")][0].last_refreshed, 150);
    }

    #[test]
    fn get_on_missing_hash_is_empty_not_error() {
        let dir = Directory::new();
        assert_eq!(dir.get(&hash("zz")).count(), 0);
    }

    #[test]
    fn sweep_removes_expired_entry_and_empty_hash() {
        let mut dir = Directory::new();
        dir.put(hash("h"), addr("a"), 0);

        let deadline = dir.sweep(TTL_SECONDS + 1);

        assert_eq!(dir.get(&hash("h")).count(), 0);
        assert_eq!(deadline, TTL_SECONDS);
    }

    #[test]
    fn sweep_keeps_fresh_entries_and_returns_time_to_next_expiry() {
        let mut dir = Directory::new();
        dir.put(hash("h"), addr("a"), 10);

        let deadline = dir.sweep(20);

        assert_eq!(dir.get(&hash("h")).count(), 1);
        // Entry expires at 10 + 30 = 40; now is 20, so 20s remain, +1.
        assert_eq!(deadline, 21);
    }

    #[test]
    fn iterate_all_orders_by_hash_then_entry_insertion() {
        let mut dir = Directory::new();
        dir.put(hash("h1"), addr("a1"), 0);
        dir.put(hash("h1"), addr("a2"), 0);
        dir.put(hash("h2"), addr("a3"), 0);

        let pairs: Vec<(String, String)> = dir
            .iterate_all()
            .map(|(h, a)| (h.to_string(), a.to_string()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("h1".into(), "a1".into()),
                ("h1".into(), "a2".into()),
                ("h2".into(), "a3".into()),
            ]
        );
    }

    #[test]
    fn peer_equality_distinguishes_same_port_different_host() {
        let a: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:9000".parse().unwrap();

        let pa = PeerEndpoint::new(a, Bytes::new());
        let pb = PeerEndpoint::new(b, Bytes::new());

        assert_ne!(pa, pb);
    }

    #[test]
    fn two_sweeps_without_mark_alive_remove_every_peer() {
        let mut peers = PeerSet::new();
        peers.add_peer(endpoint(1));
        peers.add_peer(endpoint(2));

        let first = peers.sweep_peers();
        assert_eq!(first.len(), 2);

        let second = peers.sweep_peers();
        assert_eq!(second.len(), 0);
        assert!(peers.is_empty());
    }

    #[test]
    fn mark_alive_survives_the_next_sweep() {
        let mut peers = PeerSet::new();
        let e = endpoint(1);
        peers.add_peer(e.clone());

        peers.sweep_peers();
        peers.mark_alive(&e);
        let second = peers.sweep_peers();

        assert_eq!(second, vec![e]);
    }

    #[test]
    fn add_peer_is_idempotent_by_endpoint() {
        let mut peers = PeerSet::new();
        peers.add_peer(endpoint(1));
        peers.add_peer(endpoint(1));

        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn peer_endpoint_wire_encoding_round_trips_v4_and_v6() {
        let v4: SocketAddr = "203.0.113.7:4242".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:4242".parse().unwrap();

        assert_eq!(decode_peer_endpoint(&encode_peer_endpoint(v4)), Some(v4));
        assert_eq!(decode_peer_endpoint(&encode_peer_endpoint(v6)), Some(v6));
    }

    #[test]
    fn remove_peer_drops_matching_endpoint() {
        let mut peers = PeerSet::new();
        peers.add_peer(endpoint(1));
        peers.add_peer(endpoint(2));

        peers.remove_peer(&endpoint(1));

        let remaining: Vec<&PeerEndpoint> = peers.iter().collect();
        assert_eq!(remaining, vec![&endpoint(2)]);
    }
}
