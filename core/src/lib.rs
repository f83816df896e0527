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

//! Wire codec, in-memory directory and UDP transport shared by the
//! `hashnet-server` and `hashnet-client` binaries.

pub mod directory;
pub mod error;
pub mod protocol;
pub mod transport;

pub use directory::{
    decode_peer_endpoint, encode_peer_endpoint, Address, Directory, Entry, Hash, Liveness,
    PeerEndpoint, PeerSet,
};
pub use error::{HashnetError, HashnetResult};
pub use protocol::{BlockTag, MessageBuilder, MessageType, ParsedMessage};
pub use transport::UdpTransport;
