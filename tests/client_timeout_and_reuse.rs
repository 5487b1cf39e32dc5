// SPDX-License-Identifier: MIT OR Apache-2.0

//! A Client whose request times out must still accept a fresh request
//! immediately afterwards, and a response that arrives after the timeout
//! already finalised the transaction must be a no-op (the epoch guard).

use std::{sync::atomic::AtomicU16, sync::Arc, time::Duration, time::Instant};

use modbus_core::{frame::FC_READ_HOLDING_REGISTERS, prelude::*};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_then_immediate_reuse() -> anyhow::Result<()> {
    let (client_io, server_io) = tokio::io::duplex(4096);

    let server = Arc::new(Server::new(ServerConfig::new(1), 4));
    // the device behind this register is unreasonably slow: its response
    // only arrives long after the client will have timed out
    server.add_word(Word::handler(
        RegisterType::HoldingRegister,
        700,
        1,
        Some(Arc::new(|_addr, count, _ctx| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(vec![0; count as usize])
        })),
        None,
        None,
    ))?;
    server.add_word(Word::direct(
        RegisterType::HoldingRegister,
        701,
        Arc::new(AtomicU16::new(7)),
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
    let client = Client::new(
        client_iface,
        ClientConfig {
            request_timeout_ms: 150,
        },
    );
    client.begin().await?;

    let start = Instant::now();
    let slow_request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 700, 1);
    let result = tokio::time::timeout(Duration::from_secs(1), client.send_request(slow_request))
        .await
        .expect("test watchdog fired");
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(ClientError::Timeout)));
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(450));

    // the client must accept a new request right after finalisation, with
    // no lingering busy state from the timed-out transaction
    let next_request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 701, 1);
    let next_response = tokio::time::timeout(Duration::from_secs(1), client.send_request(next_request))
        .await
        .expect("test watchdog fired")?;
    assert_eq!(next_response.data.as_slice(), &[7]);

    Ok(())
}
