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

use bytes::BytesMut;
use tokio::net::UdpSocket;

use crate::error::HashnetError;
use crate::protocol::MAX_MESSAGE_SIZE;

/// A datagram socket that can send to an explicit address and receive
/// one message at a time, exposing the remote address.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, HashnetError> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HashnetError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), HashnetError> {
        self.socket.send_to(bytes, addr).await?;

        Ok(())
    }

    /// Receives one datagram, blocking until one arrives.
    pub async fn recv(&self) -> Result<(BytesMut, SocketAddr), HashnetError> {
        let mut buf = BytesMut::zeroed(MAX_MESSAGE_SIZE);

        let (len, sender) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);

        Ok((buf, sender))
    }

    /// Receives one datagram, or fails with [`HashnetError::Timeout`] if
    /// none arrives within `dur`.
    pub async fn recv_timeout(
        &self,
        dur: Duration,
    ) -> Result<(BytesMut, SocketAddr), HashnetError> {
        tokio::time::timeout(dur, self.recv())
            .await
            .map_err(|_| HashnetError::Timeout)?
    }
}
