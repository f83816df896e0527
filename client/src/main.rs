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
use std::time::Duration;

use clap::Parser;

use hashnet_core::{BlockTag, HashnetError, MessageBuilder, MessageType, ParsedMessage, UdpTransport};

mod cli;

use cli::{Cli, Command};

/// Bound to the client's own request/reply round trip; see spec §6.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(HashnetError::Timeout) => {
            eprintln!("Le serveur ne r\u{e9}pond pas.");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), HashnetError> {
    let server_addr: SocketAddr = format!("{}:{}", cli.ip, cli.port)
        .parse()
        .map_err(|_| HashnetError::BadInvocation("invalid IP:PORT".into()))?;

    // Bind an ephemeral local socket; the server replies to whatever
    // source address the datagram carries.
    let transport = UdpTransport::bind("0.0.0.0:0".parse().unwrap()).await?;

    match cli.command {
        Command::Put { hash, address } => put(&transport, server_addr, &hash, &address).await,
        Command::Get { hash } => get(&transport, server_addr, &hash).await,
    }
}

async fn put(
    transport: &UdpTransport,
    server: SocketAddr,
    hash: &str,
    address: &str,
) -> Result<(), HashnetError> {
    let mut builder = MessageBuilder::build(MessageType::Put);
    builder.append(BlockTag::Hash, hash.as_bytes())?;
    builder.append(BlockTag::Address, address.as_bytes())?;

    transport.send_to(&builder.finalize(), server).await
}

async fn get(transport: &UdpTransport, server: SocketAddr, hash: &str) -> Result<(), HashnetError> {
    let mut builder = MessageBuilder::build(MessageType::Get);
    builder.append(BlockTag::Hash, hash.as_bytes())?;

    transport.send_to(&builder.finalize(), server).await?;

    let (buf, _sender) = transport.recv_timeout(CLIENT_TIMEOUT).await?;
    let parsed = ParsedMessage::parse(&buf).map_err(|_| HashnetError::MalformedMessage)?;

    println!("IP disponibles pour le t\u{e9}l\u{e9}chargement:");
    for address in parsed.iterate(BlockTag::Address) {
        print!("{} ", String::from_utf8_lossy(address));
    }
    println!();

    Ok(())
}
