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

#[macro_use]
extern crate log;

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

mod cli;
mod hashnet;

use cli::{Cli, StartupMode};
use hashnet::Hashnet;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<(), hashnet_core::HashnetError> {
    let local_addr: SocketAddr = format!("{}:{}", cli.ip, cli.port)
        .parse()
        .map_err(|_| hashnet_core::HashnetError::BadInvocation("invalid IP:PORT".into()))?;

    let server = match cli.startup_mode()? {
        StartupMode::Solo => {
            info!("Starting solo on {}", local_addr);
            Hashnet::bind(local_addr).await?
        }
        StartupMode::Join { peer_ip, peer_port } => {
            let peer_addr: SocketAddr = format!("{}:{}", peer_ip, peer_port)
                .parse()
                .map_err(|_| hashnet_core::HashnetError::BadInvocation("invalid peer IP:PORT".into()))?;

            info!("Starting on {}, joining {}", local_addr, peer_addr);
            Hashnet::join(local_addr, peer_addr).await?
        }
    };

    server.serve().await
}
