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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashnetError {
    #[error("transport error: {0}")]
    TransportFailure(#[from] std::io::Error),

    #[error("interrupted by termination signal")]
    Interrupted,

    #[error("receive timed out")]
    Timeout,

    #[error("message too large (max {max} bytes)")]
    MessageTooLarge { max: u16 },

    #[error("malformed message")]
    MalformedMessage,

    #[error("invalid invocation: {0}")]
    BadInvocation(String),
}

pub type HashnetResult<T> = std::result::Result<T, HashnetError>;
