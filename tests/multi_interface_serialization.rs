// SPDX-License-Identifier: MIT OR Apache-2.0

//! A Server attached to two Interfaces serialises requests through its
//! request mutex: a concurrent arrival while another request is being
//! handled is answered `SLAVE_DEVICE_BUSY` rather than queued.

use std::{sync::atomic::AtomicU16, sync::Arc, time::Duration};

use modbus_core::{frame::FC_READ_HOLDING_REGISTERS, prelude::*};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_request_is_busy_then_next_succeeds() -> anyhow::Result<()> {
    let (rtu_client_io, rtu_server_io) = tokio::io::duplex(4096);
    let tcp_bind_addr: std::net::SocketAddr = "127.0.0.1:18581".parse()?;

    let server = Arc::new(Server::new(
        ServerConfig {
            req_mutex_timeout_ms: Some(0),
            ..ServerConfig::new(1)
        },
        4,
    ));
    server.add_word(Word::handler(
        RegisterType::HoldingRegister,
        500,
        1,
        Some(Arc::new(|_addr, count, _ctx| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(vec![0; count as usize])
        })),
        None,
        None,
    ))?;
    server.add_word(Word::direct(
        RegisterType::HoldingRegister,
        600,
        Arc::new(AtomicU16::new(4242)),
    ))?;
    server.begin_words()?;

    let rtu_iface = Arc::new(RtuInterface::new(
        rtu_server_io,
        Role::Server,
        RtuConfig::new(19_200, 1),
    ));
    server.attach(rtu_iface.clone())?;
    rtu_iface.begin().await?;

    let tcp_iface = Arc::new(TcpServerInterface::new(TcpServerConfig {
        bind_addr: tcp_bind_addr,
    }));
    server.attach(tcp_iface.clone())?;
    tcp_iface.begin().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rtu_client_iface = Arc::new(RtuInterface::new(
        rtu_client_io,
        Role::Client,
        RtuConfig::new(19_200, 1),
    ));
    let rtu_client = Client::new(rtu_client_iface, ClientConfig::default());
    rtu_client.begin().await?;

    let slow_request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 500, 1);
    let slow_handle = tokio::spawn({
        let rtu_client = rtu_client.clone();
        async move { rtu_client.send_request(slow_request).await }
    });

    // give the RTU request time to arrive and claim the request mutex
    tokio::time::sleep(Duration::from_millis(30)).await;

    let tcp_client_iface = Arc::new(TcpClientInterface::new(TcpClientConfig::new(
        tcp_bind_addr,
        1,
    )));
    let tcp_client = Client::new(tcp_client_iface, ClientConfig::default());
    tcp_client.begin().await?;

    let busy_request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 600, 1);
    let busy_response = tokio::time::timeout(
        Duration::from_secs(2),
        tcp_client.send_request(busy_request),
    )
    .await
    .expect("request timed out")?;
    assert!(busy_response.is_exception());
    assert_eq!(busy_response.exception(), Some(Exception::SlaveDeviceBusy));

    let slow_response = tokio::time::timeout(Duration::from_secs(2), slow_handle)
        .await
        .expect("rtu request timed out")??;
    assert!(!slow_response.is_exception());

    let next_request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 600, 1);
    let next_response = tokio::time::timeout(
        Duration::from_secs(2),
        tcp_client.send_request(next_request),
    )
    .await
    .expect("request timed out")?;
    assert!(!next_response.is_exception());
    assert_eq!(next_response.data.as_slice(), &[4242]);

    Ok(())
}
