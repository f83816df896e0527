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

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};

use hashnet_core::directory::{now_seconds, TTL_SECONDS};
use hashnet_core::{
    decode_peer_endpoint, encode_peer_endpoint, Address, BlockTag, Directory, Hash, HashnetError,
    MessageBuilder, MessageType, ParsedMessage, PeerEndpoint, PeerSet, UdpTransport,
};

/// Interval between keep-alive ticks.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// The cluster member this process runs: owns the socket, the directory
/// and the peer set outright. There is exactly one task, driven by
/// [`Hashnet::serve`]'s `select!` loop; no locks are needed because
/// nothing else ever touches this state.
pub struct Hashnet {
    transport: UdpTransport,
    directory: Directory,
    peers: PeerSet,
    last_sweep_time: u64,
    next_sweep_deadline: u64,
}

impl Hashnet {
    /// Solo startup: bind and start with an empty directory and peer set.
    pub async fn bind(addr: SocketAddr) -> Result<Self, HashnetError> {
        let transport = UdpTransport::bind(addr).await?;

        Ok(Self {
            transport,
            directory: Directory::new(),
            peers: PeerSet::new(),
            last_sweep_time: now_seconds(),
            next_sweep_deadline: TTL_SECONDS,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HashnetError> {
        self.transport.local_addr()
    }

    /// Join startup: bind locally, announce to `peer_addr`, then run the
    /// bootstrap-receive phase until `EndOfTransfer` arrives. Every `t`
    /// received in between is applied as if it had reached the main
    /// loop's `Transfer` handler; anything else is dropped.
    pub async fn join(local_addr: SocketAddr, peer_addr: SocketAddr) -> Result<Self, HashnetError> {
        let mut server = Self::bind(local_addr).await?;

        let announce = MessageBuilder::build(MessageType::NewServer).finalize();
        server.transport.send_to(&announce, peer_addr).await?;

        info!("Joining cluster via {}", peer_addr);

        loop {
            let (buf, _sender) = server.transport.recv().await?;

            let parsed = match ParsedMessage::parse(&buf) {
                Ok(p) => p,
                Err(_) => continue,
            };

            match parsed.message_type {
                MessageType::EndOfTransfer => break,
                MessageType::Transfer => server.apply_transfer(&parsed),
                _ => continue,
            }
        }

        server.peers.add_peer(PeerEndpoint::from_socket_addr(peer_addr));

        info!("Bootstrap complete, now serving");

        Ok(server)
    }

    /// Runs the main receive loop until a shutdown signal is observed.
    pub async fn serve(mut self) -> Result<(), HashnetError> {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

        info!("Serving");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    return self.shutdown().await;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = self.tick_keepalive().await {
                        let _ = self.best_effort_disconnect().await;
                        return Err(e);
                    }
                }
                received = self.transport.recv() => {
                    let outcome = match received {
                        Ok((buf, sender)) => {
                            self.maybe_sweep();
                            self.dispatch(&buf, sender).await
                        }
                        Err(e) => Err(e),
                    };

                    if let Err(e) = outcome {
                        let _ = self.best_effort_disconnect().await;
                        return Err(e);
                    }
                }
            }
        }
    }

    fn maybe_sweep(&mut self) {
        let now = now_seconds();

        if now.saturating_sub(self.last_sweep_time) >= self.next_sweep_deadline {
            self.next_sweep_deadline = self.directory.sweep(now);
            self.last_sweep_time = now;
        }
    }

    async fn tick_keepalive(&mut self) -> Result<(), HashnetError> {
        let before: Vec<PeerEndpoint> = self.peers.iter().cloned().collect();
        let probes = self.peers.sweep_peers();

        for removed in before.iter().filter(|p| !probes.contains(p)) {
            warn!(
                "Serveur d\u{e9}connect\u{e9}: pas de r\u{e9}ponse au keep-alive ({})",
                removed.addr
            );
        }

        let ping = MessageBuilder::build(MessageType::KeepAlive).finalize();

        for peer in &probes {
            self.transport.send_to(&ping, peer.addr).await?;
        }

        Ok(())
    }

    async fn dispatch(&mut self, buf: &[u8], sender: SocketAddr) -> Result<(), HashnetError> {
        let parsed = match ParsedMessage::parse(buf) {
            Ok(p) => p,
            Err(_) => {
                debug!("Dropping malformed message from {}", sender);
                return Ok(());
            }
        };

        match parsed.message_type {
            MessageType::Put => self.handle_put(&parsed, buf, sender).await,
            MessageType::Get => self.handle_get(&parsed, sender).await,
            MessageType::NewServer => self.handle_new_server(sender).await,
            MessageType::Transfer => {
                self.apply_transfer(&parsed);
                Ok(())
            }
            MessageType::KeepAlive => self.handle_keepalive(sender).await,
            MessageType::Alive => {
                self.peers.mark_alive(&PeerEndpoint::from_socket_addr(sender));
                Ok(())
            }
            MessageType::Disconnect => {
                info!("Deconnexion d'un serveur ({})", sender);
                self.peers.remove_peer(&PeerEndpoint::from_socket_addr(sender));
                Ok(())
            }
            MessageType::EndOfTransfer => {
                debug!("Dropping unexpected end-of-transfer from {}", sender);
                Ok(())
            }
            MessageType::Reply => {
                debug!("Dropping unexpected reply from {}", sender);
                Ok(())
            }
        }
    }

    async fn handle_put(
        &mut self,
        parsed: &ParsedMessage<'_>,
        original: &[u8],
        sender: SocketAddr,
    ) -> Result<(), HashnetError> {
        let (hash, address) = match extract_hash_and_address(parsed) {
            Some(pair) => pair,
            None => return Ok(()),
        };

        info!("PUT {} -> {} (from {})", hash, address, sender);

        self.directory.put(hash, address, now_seconds());

        self.gossip(original).await
    }

    /// Rebuilds the received message as a `Transfer` and forwards it to
    /// every known peer. Fresh construction is used instead of rewriting
    /// the receive buffer's type byte in place (both are wire-compatible
    /// per design; see DESIGN.md).
    async fn gossip(&self, original: &[u8]) -> Result<(), HashnetError> {
        let parsed = match ParsedMessage::parse(original) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };

        let mut builder = MessageBuilder::build(MessageType::Transfer);
        for (tag, payload) in parsed.blocks() {
            builder.append(tag, payload)?;
        }
        let wire = builder.finalize();

        for peer in self.peers.iter() {
            self.transport.send_to(&wire, peer.addr).await?;
        }

        Ok(())
    }

    async fn handle_get(
        &self,
        parsed: &ParsedMessage<'_>,
        sender: SocketAddr,
    ) -> Result<(), HashnetError> {
        let hash = match parsed.first(BlockTag::Hash) {
            Some(h) => Hash(Bytes::copy_from_slice(h)),
            None => return Ok(()),
        };

        let mut builder = MessageBuilder::build(MessageType::Reply);
        for address in self.directory.get(&hash) {
            builder.append(BlockTag::Address, &address.0)?;
        }
        let wire = builder.finalize();

        self.transport.send_to(&wire, sender).await
    }

    async fn handle_new_server(&mut self, sender: SocketAddr) -> Result<(), HashnetError> {
        info!("Peer joining ({})", sender);

        self.send_bootstrap_dump(sender).await?;

        let announce_peer = encode_peer_endpoint(sender);
        let mut builder = MessageBuilder::build(MessageType::Transfer);
        builder.append(BlockTag::Peer, &announce_peer)?;
        let wire = builder.finalize();

        for peer in self.peers.iter() {
            self.transport.send_to(&wire, peer.addr).await?;
        }

        self.peers.add_peer(PeerEndpoint::from_socket_addr(sender));

        Ok(())
    }

    async fn send_bootstrap_dump(&self, sender: SocketAddr) -> Result<(), HashnetError> {
        for (hash, address) in self.directory.iterate_all() {
            let mut builder = MessageBuilder::build(MessageType::Transfer);
            builder.append(BlockTag::Hash, &hash.0)?;
            builder.append(BlockTag::Address, &address.0)?;
            self.transport.send_to(&builder.finalize(), sender).await?;
        }

        for peer in self.peers.iter() {
            let mut builder = MessageBuilder::build(MessageType::Transfer);
            builder.append(BlockTag::Peer, &peer.raw)?;
            self.transport.send_to(&builder.finalize(), sender).await?;
        }

        let finish = MessageBuilder::build(MessageType::EndOfTransfer).finalize();
        self.transport.send_to(&finish, sender).await
    }

    fn apply_transfer(&mut self, parsed: &ParsedMessage<'_>) {
        if let Some(raw) = parsed.first(BlockTag::Peer) {
            if let Some(addr) = decode_peer_endpoint(raw) {
                self.peers
                    .add_peer(PeerEndpoint::new(addr, Bytes::copy_from_slice(raw)));
            }
            return;
        }

        if let Some((hash, address)) = extract_hash_and_address(parsed) {
            self.directory.put(hash, address, now_seconds());
        }
    }

    async fn handle_keepalive(&self, sender: SocketAddr) -> Result<(), HashnetError> {
        let wire = MessageBuilder::build(MessageType::Alive).finalize();
        self.transport.send_to(&wire, sender).await
    }

    /// Notifies every peer of departure. The first send failure aborts
    /// the remaining notifications and is returned as the shutdown's
    /// own error, per the operator-signalled shutdown path.
    async fn shutdown(self) -> Result<(), HashnetError> {
        let wire = MessageBuilder::build(MessageType::Disconnect).finalize();

        for peer in self.peers.iter() {
            self.transport.send_to(&wire, peer.addr).await?;
        }

        info!("Fermeture du serveur");

        Ok(())
    }

    /// Same notification, but used when the loop is already aborting on
    /// a prior transport error: every peer is tried regardless of
    /// earlier failures, since there is no more-important error left to
    /// preserve.
    async fn best_effort_disconnect(&self) -> Result<(), HashnetError> {
        let wire = MessageBuilder::build(MessageType::Disconnect).finalize();

        for peer in self.peers.iter() {
            if let Err(e) = self.transport.send_to(&wire, peer.addr).await {
                warn!("Unable to notify {} of shutdown: {}", peer.addr, e);
            }
        }

        info!("Fermeture du serveur");

        Ok(())
    }
}

fn extract_hash_and_address(parsed: &ParsedMessage<'_>) -> Option<(Hash, Address)> {
    let hash = parsed.first(BlockTag::Hash)?;
    let address = parsed.first(BlockTag::Address)?;

    Some((
        Hash(Bytes::copy_from_slice(hash)),
        Address(Bytes::copy_from_slice(address)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hashnet_core::UdpTransport;

    async fn local_client() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    async fn send_put(client: &UdpTransport, server: SocketAddr, hash: &str, address: &str) {
        let mut builder = MessageBuilder::build(MessageType::Put);
        builder.append(BlockTag::Hash, hash.as_bytes()).unwrap();
        builder.append(BlockTag::Address, address.as_bytes()).unwrap();
        client.send_to(&builder.finalize(), server).await.unwrap();
    }

    async fn send_get(client: &UdpTransport, server: SocketAddr, hash: &str) -> Vec<String> {
        let mut builder = MessageBuilder::build(MessageType::Get);
        builder.append(BlockTag::Hash, hash.as_bytes()).unwrap();
        client.send_to(&builder.finalize(), server).await.unwrap();

        let (buf, _) = client
            .recv_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        let parsed = ParsedMessage::parse(&buf).unwrap();

        parsed
            .iterate(BlockTag::Address)
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn solo_put_then_get_round_trips() {
        let server = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let client = local_client().await;
        send_put(&client, server_addr, "deadbeef", "10.0.0.1:9000").await;

        // PUT has no reply; give the server a moment to apply it before GET.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let addresses = send_get(&client, server_addr, "deadbeef").await;
        assert_eq!(addresses, vec!["10.0.0.1:9000".to_string()]);
    }

    #[tokio::test]
    async fn get_on_unknown_hash_returns_empty_reply() {
        let server = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let client = local_client().await;
        let addresses = send_get(&client, server_addr, "nonexistent").await;
        assert!(addresses.is_empty());
    }

    #[tokio::test]
    async fn put_on_one_peer_replicates_to_joined_peer() {
        let seed = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let seed_addr = seed.local_addr().unwrap();
        tokio::spawn(seed.serve());

        let joiner = Hashnet::join("127.0.0.1:0".parse().unwrap(), seed_addr)
            .await
            .unwrap();
        let joiner_addr = joiner.local_addr().unwrap();
        tokio::spawn(joiner.serve());

        // Let the bootstrap exchange settle so the seed knows about the joiner.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = local_client().await;
        send_put(&client, seed_addr, "cafebabe", "192.168.1.1:1234").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let addresses = send_get(&client, joiner_addr, "cafebabe").await;
        assert_eq!(addresses, vec!["192.168.1.1:1234".to_string()]);
    }

    #[tokio::test]
    async fn join_bootstraps_existing_directory_contents() {
        let seed = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let seed_addr = seed.local_addr().unwrap();
        tokio::spawn(seed.serve());

        let client = local_client().await;
        send_put(&client, seed_addr, "feedface", "10.1.1.1:80").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let joiner = Hashnet::join("127.0.0.1:0".parse().unwrap(), seed_addr)
            .await
            .unwrap();
        let joiner_addr = joiner.local_addr().unwrap();
        tokio::spawn(joiner.serve());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let addresses = send_get(&client, joiner_addr, "feedface").await;
        assert_eq!(addresses, vec!["10.1.1.1:80".to_string()]);
    }

    #[tokio::test]
    async fn keepalive_probe_is_answered_with_alive() {
        let server = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let client = local_client().await;
        let ping = MessageBuilder::build(MessageType::KeepAlive).finalize();
        client.send_to(&ping, server_addr).await.unwrap();

        let (buf, _) = client
            .recv_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        let parsed = ParsedMessage::parse(&buf).unwrap();
        assert_eq!(parsed.message_type, MessageType::Alive);
    }

    #[tokio::test]
    async fn malformed_datagram_is_dropped_without_crashing_the_loop() {
        let server = Hashnet::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let client = local_client().await;
        client.send_to(&[0xffu8, 0x01, 0x00], server_addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        // The loop must still be alive and answering requests.
        let addresses = send_get(&client, server_addr, "anything").await;
        assert!(addresses.is_empty());
    }
}
