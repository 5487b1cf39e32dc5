// SPDX-License-Identifier: MIT OR Apache-2.0

//! A Bridge forwards a request arriving over TCP out over RTU to the target
//! slave, and routes its response back to the original TCP caller.

use std::{sync::atomic::AtomicU16, sync::Arc, time::Duration};

use modbus_core::{frame::FC_READ_HOLDING_REGISTERS, prelude::*};

#[tokio::test]
async fn bridge_forwards_tcp_request_over_rtu() -> anyhow::Result<()> {
    let (bridge_rtu_io, slave_rtu_io) = tokio::io::duplex(4096);
    let tcp_bind_addr: std::net::SocketAddr = "127.0.0.1:18591".parse()?;

    // the downstream RTU device behind the bridge, addressed as slave 7
    let slave_server = Arc::new(Server::new(ServerConfig::new(7), 4));
    slave_server.add_word(Word::direct(
        RegisterType::HoldingRegister,
        100,
        Arc::new(AtomicU16::new(0x1234)),
    ))?;
    slave_server.begin_words()?;
    let slave_iface = Arc::new(RtuInterface::new(
        slave_rtu_io,
        Role::Server,
        RtuConfig::new(19_200, 7),
    ));
    slave_server.attach(slave_iface.clone())?;
    slave_iface.begin().await?;

    let bridge_client_iface = Arc::new(RtuInterface::new(
        bridge_rtu_io,
        Role::Client,
        RtuConfig::new(19_200, 7),
    ));
    let bridge_server_iface = Arc::new(TcpServerInterface::new(TcpServerConfig {
        bind_addr: tcp_bind_addr,
    }));
    let bridge = Bridge::new(
        bridge_client_iface,
        bridge_server_iface,
        Duration::from_secs(1),
    );
    bridge.begin().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let external_client_iface = Arc::new(TcpClientInterface::new(TcpClientConfig::new(
        tcp_bind_addr,
        7,
    )));
    let external_client = Client::new(external_client_iface, ClientConfig::default());
    external_client.begin().await?;

    let request = Frame::request(7, FC_READ_HOLDING_REGISTERS, 100, 1);
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        external_client.send_request(request),
    )
    .await
    .expect("request timed out")?;

    assert!(!response.is_exception());
    assert_eq!(response.slave_id, 7);
    assert_eq!(response.data.as_slice(), &[0x1234]);
    Ok(())
}
