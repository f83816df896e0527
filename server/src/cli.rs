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

use clap::Parser;
use hashnet_core::HashnetError;

/// `hashnet-server IP PORT` starts solo; `hashnet-server IP PORT PEER_IP
/// PEER_PORT` starts by joining an existing cluster member.
#[derive(Parser, Debug)]
#[command(name = "hashnet-server", version, about)]
pub struct Cli {
    pub ip: String,

    pub port: u16,

    pub peer_ip: Option<String>,

    pub peer_port: Option<u16>,
}

pub enum StartupMode {
    Solo,
    Join { peer_ip: String, peer_port: u16 },
}

impl Cli {
    pub fn startup_mode(&self) -> Result<StartupMode, HashnetError> {
        match (&self.peer_ip, self.peer_port) {
            (None, None) => Ok(StartupMode::Solo),
            (Some(peer_ip), Some(peer_port)) => Ok(StartupMode::Join {
                peer_ip: peer_ip.clone(),
                peer_port,
            }),
            _ => Err(HashnetError::BadInvocation(
                "PEER_IP and PEER_PORT must both be given, or neither".into(),
            )),
        }
    }
}
