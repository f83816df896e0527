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

use std::convert::TryFrom;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::HashnetError;

/// Maximum size of a wire message, header included.
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// Size of the fixed message header: type byte + u16-LE length.
const HEADER_LEN: usize = 3;

/// Size of a block header: tag byte + u16-LE payload length.
const BLOCK_HEADER_LEN: usize = 3;

/// Message type, the header's first byte.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MessageType {
    /// `g` - client asking for addresses of a hash.
    Get,

    /// `p` - client storing (hash, address).
    Put,

    /// `r` - server reply to a `Get`.
    Reply,

    /// `n` - peer announcing it is joining.
    NewServer,

    /// `f` - end of a bootstrap dump.
    EndOfTransfer,

    /// `k` - periodic liveness probe.
    KeepAlive,

    /// `a` - response to a liveness probe.
    Alive,

    /// `d` - peer shutting down.
    Disconnect,

    /// `t` - replicated mapping or peer announcement.
    Transfer,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        match t {
            MessageType::Get => b'g',
            MessageType::Put => b'p',
            MessageType::Reply => b'r',
            MessageType::NewServer => b'n',
            MessageType::EndOfTransfer => b'f',
            MessageType::KeepAlive => b'k',
            MessageType::Alive => b'a',
            MessageType::Disconnect => b'd',
            MessageType::Transfer => b't',
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = HashnetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'g' => Ok(MessageType::Get),
            b'p' => Ok(MessageType::Put),
            b'r' => Ok(MessageType::Reply),
            b'n' => Ok(MessageType::NewServer),
            b'f' => Ok(MessageType::EndOfTransfer),
            b'k' => Ok(MessageType::KeepAlive),
            b'a' => Ok(MessageType::Alive),
            b'd' => Ok(MessageType::Disconnect),
            b't' => Ok(MessageType::Transfer),
            _ => Err(HashnetError::MalformedMessage),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Block tag, a single byte preceding every block's length/payload.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockTag {
    /// `h` - a content hash.
    Hash,

    /// `a` - a source address.
    Address,

    /// `s` - raw peer endpoint bytes.
    Peer,
}

impl From<BlockTag> for u8 {
    fn from(t: BlockTag) -> u8 {
        match t {
            BlockTag::Hash => b'h',
            BlockTag::Address => b'a',
            BlockTag::Peer => b's',
        }
    }
}

impl TryFrom<u8> for BlockTag {
    type Error = HashnetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'h' => Ok(BlockTag::Hash),
            b'a' => Ok(BlockTag::Address),
            b's' => Ok(BlockTag::Peer),
            _ => Err(HashnetError::MalformedMessage),
        }
    }
}

/// Incrementally assembles a wire message.
///
/// `build` reserves the header; `append` pushes tagged blocks;
/// `finalize` backpatches the length and freezes the buffer.
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    pub fn build(message_type: MessageType) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);

        buf.put_u8(message_type.into());
        buf.put_u16_le(0); // backpatched in finalize()

        Self { buf }
    }

    /// Appends a tagged block. Fails without mutating the builder if the
    /// resulting message would exceed [`MAX_MESSAGE_SIZE`].
    pub fn append(&mut self, tag: BlockTag, payload: &[u8]) -> Result<(), HashnetError> {
        let added = BLOCK_HEADER_LEN + payload.len();

        if self.buf.len() + added > MAX_MESSAGE_SIZE {
            return Err(HashnetError::MessageTooLarge {
                max: MAX_MESSAGE_SIZE as u16,
            });
        }

        self.buf.put_u8(tag.into());
        self.buf.put_u16_le(payload.len() as u16);
        self.buf.put_slice(payload);

        Ok(())
    }

    /// Writes the total length into the header and returns the wire bytes.
    pub fn finalize(mut self) -> Bytes {
        let len = self.buf.len() as u16;
        self.buf[1..3].copy_from_slice(&len.to_le_bytes());

        self.buf.freeze()
    }
}

/// A parsed message: its type plus the raw, still-unread block region.
pub struct ParsedMessage<'a> {
    pub message_type: MessageType,
    blocks: &'a [u8],
}

impl<'a> ParsedMessage<'a> {
    /// Parses a datagram's header. Never reads past `bytes`'s declared
    /// length; a declared length longer than the buffer is clamped to
    /// what actually arrived rather than treated as an error, since the
    /// wire is unreliable and truncation is an expected failure mode.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, HashnetError> {
        if bytes.len() < HEADER_LEN {
            return Err(HashnetError::MalformedMessage);
        }

        let message_type = MessageType::try_from(bytes[0])?;
        let declared_len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        let end = declared_len.min(bytes.len()).max(HEADER_LEN);

        Ok(Self {
            message_type,
            blocks: &bytes[HEADER_LEN..end],
        })
    }

    /// A single-pass iterator over every block, in wire order, stopping
    /// silently at the first block whose header is truncated or whose
    /// declared length would run past the end of the message.
    pub fn blocks(&self) -> BlockIter<'a> {
        BlockIter {
            remaining: self.blocks,
        }
    }

    /// A single-pass iterator over blocks matching `tag`, in insertion
    /// order.
    pub fn iterate(&self, tag: BlockTag) -> impl Iterator<Item = &'a [u8]> {
        self.blocks()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, payload)| payload)
    }

    /// Convenience accessor for the first block of a given tag.
    pub fn first(&self, tag: BlockTag) -> Option<&'a [u8]> {
        self.iterate(tag).next()
    }
}

/// Lazy, single-pass iterator over `(tag, payload)` pairs in a message.
pub struct BlockIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = (BlockTag, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < BLOCK_HEADER_LEN {
            self.remaining = &[];
            return None;
        }

        let tag = match BlockTag::try_from(self.remaining[0]) {
            Ok(tag) => tag,
            Err(_) => {
                self.remaining = &[];
                return None;
            }
        };

        let len = u16::from_le_bytes([self.remaining[1], self.remaining[2]]) as usize;
        let payload_start = BLOCK_HEADER_LEN;
        let payload_end = payload_start + len;

        if payload_end > self.remaining.len() {
            self.remaining = &[];
            return None;
        }

        let payload = &self.remaining[payload_start..payload_end];
        self.remaining = &self.remaining[payload_end..];

        Some((tag, payload))
    }
}
