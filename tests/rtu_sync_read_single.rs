// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end RTU round trip: a Client reads a single holding register from
//! a Server over an in-memory half-duplex pipe.

use std::{sync::atomic::AtomicU16, sync::Arc, time::Duration};

use modbus_core::{frame::FC_READ_HOLDING_REGISTERS, prelude::*};

#[tokio::test]
async fn rtu_read_single_holding_register() -> anyhow::Result<()> {
    let (client_io, server_io) = tokio::io::duplex(4096);

    let server = Arc::new(Server::new(ServerConfig::new(1), 4));
    server.add_word(Word::direct(
        RegisterType::HoldingRegister,
        100,
        Arc::new(AtomicU16::new(1000)),
    ))?;
    server.begin_words()?;

    let server_iface = Arc::new(RtuInterface::new(
        server_io,
        Role::Server,
        RtuConfig::new(19_200, 1),
    ));
    server.attach(server_iface.clone())?;
    server_iface.begin().await?;

    let client_iface = Arc::new(RtuInterface::new(
        client_io,
        Role::Client,
        RtuConfig::new(19_200, 1),
    ));
    let client = Client::new(client_iface, ClientConfig::default());
    client.begin().await?;

    let request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 100, 1);
    let response = tokio::time::timeout(Duration::from_secs(2), client.send_request(request))
        .await
        .expect("request timed out")?;

    assert!(!response.is_exception());
    assert_eq!(response.data.as_slice(), &[1000]);
    Ok(())
}
