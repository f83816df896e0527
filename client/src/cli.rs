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

use clap::{Parser, Subcommand};

/// `hashnet-client IP PORT GET HASH` or `hashnet-client IP PORT PUT HASH
/// ADDRESS`.
#[derive(Parser, Debug)]
#[command(name = "hashnet-client", version, about)]
pub struct Cli {
    pub ip: String,

    pub port: u16,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "GET")]
    Get { hash: String },

    #[command(name = "PUT")]
    Put { hash: String, address: String },
}
