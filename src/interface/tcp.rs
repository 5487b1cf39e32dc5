//! The TCP Interface: a Client that lazily dials and redials its peer, and
//! a Server that accepts any number of sockets but forwards to whichever
//! one most recently delivered a request (serialisation across sockets is
//! the Server application layer's job via its request mutex, not the
//! Interface's).

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU16, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
};

use crate::{
    codec::tcp as tcp_codec,
    error::{InterfaceError, InterfaceResult},
    frame::Frame,
    interface::{Interface, ReceiveCallback, Role, TxCallback, TxResult, MAX_RCV_CALLBACKS},
};

pub const DEFAULT_SAFETY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy)]
pub struct TcpClientConfig {
    pub addr: SocketAddr,
    pub unit_id: u8,
    pub safety_timeout_ms: u64,
}

impl TcpClientConfig {
    #[must_use]
    pub fn new(addr: SocketAddr, unit_id: u8) -> Self {
        Self {
            addr,
            unit_id,
            safety_timeout_ms: DEFAULT_SAFETY_TIMEOUT_MS,
        }
    }
}

struct ClientState {
    addr: SocketAddr,
    unit_id: u8,
    safety_timeout: Duration,
    next_tid: AtomicU16,
    expected_tid: Mutex<Option<u16>>,
    stream: Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    callbacks: StdMutex<Vec<ReceiveCallback>>,
    ready: AtomicBool,
}

/// A Modbus TCP Client Interface. Connects on first use and transparently
/// redials on the next request after a connection is lost.
pub struct TcpClientInterface {
    state: Arc<ClientState>,
}

impl std::fmt::Debug for TcpClientInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientInterface")
            .field("addr", &self.state.addr)
            .field("unit_id", &self.state.unit_id)
            .finish_non_exhaustive()
    }
}

impl TcpClientInterface {
    #[must_use]
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            state: Arc::new(ClientState {
                addr: config.addr,
                unit_id: config.unit_id,
                safety_timeout: Duration::from_millis(config.safety_timeout_ms),
                next_tid: AtomicU16::new(1),
                expected_tid: Mutex::new(None),
                stream: Mutex::new(None),
                reader_task: Mutex::new(None),
                callbacks: StdMutex::new(Vec::new()),
                ready: AtomicBool::new(false),
            }),
        }
    }

    async fn ensure_connected(&self) -> InterfaceResult<()> {
        if self.state.stream.lock().await.is_some() {
            return Ok(());
        }
        let socket = TcpStream::connect(self.state.addr).await?;
        let (read_half, write_half) = socket.into_split();
        *self.state.stream.lock().await = Some(write_half);

        let read_state = self.state.clone();
        let handle = tokio::spawn(async move { client_read_loop(read_half, read_state).await });
        if let Some(old) = self.state.reader_task.lock().await.replace(handle) {
            old.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl Interface for TcpClientInterface {
    async fn begin(&self) -> InterfaceResult<()> {
        self.state.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, frame: Frame, on_tx: TxCallback) -> InterfaceResult<()> {
        if !self.is_ready() {
            return Err(InterfaceError::NotReady);
        }

        if self.ensure_connected().await.is_err() {
            on_tx(TxResult::Failed);
            return Ok(());
        }

        let tid = self.state.next_tid.fetch_add(1, Ordering::SeqCst);
        *self.state.expected_tid.lock().await = Some(tid);

        let bytes = tcp_codec::encode_tcp(tid, self.state.unit_id, &frame)?;
        let mut guard = self.state.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            drop(guard);
            on_tx(TxResult::Failed);
            return Ok(());
        };

        match stream.write_all(&bytes).await {
            Ok(()) if frame.is_broadcast() => on_tx(TxResult::Broadcast),
            Ok(()) => on_tx(TxResult::Success),
            Err(err) => {
                log::warn!("tcp client write failed: {err}");
                *guard = None;
                on_tx(TxResult::Failed);
            }
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) -> InterfaceResult<()> {
        let mut callbacks = self.state.callbacks.lock().unwrap();
        if callbacks.len() >= MAX_RCV_CALLBACKS {
            return Err(InterfaceError::TooManyCallbacks);
        }
        callbacks.push(callback);
        Ok(())
    }

    async fn abort_current_transaction(&self) {
        *self.state.expected_tid.lock().await = None;
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn accepts_any_slave_id(&self) -> bool {
        false
    }
}

async fn client_read_loop(mut read_half: OwnedReadHalf, state: Arc<ClientState>) {
    let mut buf = BytesMut::with_capacity(512);
    let mut scratch = [0u8; 512];

    loop {
        // Only a request awaiting its response is bounded by the safety
        // timeout; an otherwise-idle connection is left open indefinitely.
        let awaiting_response = state.expected_tid.lock().await.is_some();
        let read_fut = read_half.read(&mut scratch);
        let outcome = if awaiting_response {
            match tokio::time::timeout(state.safety_timeout, read_fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    log::warn!("tcp client connection silent past its safety timeout, dropping");
                    break;
                }
            }
        } else {
            read_fut.await
        };

        match outcome {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(err) => {
                log::warn!("tcp client read error: {err}");
                break;
            }
        }

        loop {
            match tcp_codec::decode_tcp(&buf, Role::Client) {
                Ok(Some((adu, consumed))) => {
                    let _ = buf.split_to(consumed);
                    handle_response(&state, adu).await;
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("dropping undecodable tcp response: {err}");
                    buf.clear();
                    break;
                }
            }
        }
    }

    *state.stream.lock().await = None;
}

async fn handle_response(state: &Arc<ClientState>, adu: tcp_codec::TcpAdu) {
    let mut expected = state.expected_tid.lock().await;
    if *expected != Some(adu.transaction_id) {
        log::trace!("dropping tcp response with stale transaction id");
        return;
    }
    *expected = None;
    drop(expected);

    let callbacks = state.callbacks.lock().unwrap().clone();
    for callback in callbacks {
        callback(adu.frame);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TcpServerConfig {
    pub bind_addr: SocketAddr,
}

struct CurrentConn {
    write: Arc<Mutex<OwnedWriteHalf>>,
    transaction_id: u16,
    unit_id: u8,
}

struct ServerState {
    current: Mutex<Option<CurrentConn>>,
    callbacks: StdMutex<Vec<ReceiveCallback>>,
    ready: AtomicBool,
}

/// A Modbus TCP Server Interface: accepts any number of client sockets and
/// replies on whichever one most recently delivered a request.
pub struct TcpServerInterface {
    bind_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl std::fmt::Debug for TcpServerInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerInterface")
            .field("bind_addr", &self.bind_addr)
            .finish_non_exhaustive()
    }
}

impl TcpServerInterface {
    #[must_use]
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr,
            state: Arc::new(ServerState {
                current: Mutex::new(None),
                callbacks: StdMutex::new(Vec::new()),
                ready: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Interface for TcpServerInterface {
    async fn begin(&self) -> InterfaceResult<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.state.ready.store(true, Ordering::SeqCst);
        let state = self.state.clone();
        tokio::spawn(async move { accept_loop(listener, state).await });
        Ok(())
    }

    async fn send_frame(&self, frame: Frame, on_tx: TxCallback) -> InterfaceResult<()> {
        if !self.is_ready() {
            return Err(InterfaceError::NotReady);
        }
        let Some(conn) = self.state.current.lock().await.take() else {
            on_tx(TxResult::Failed);
            return Ok(());
        };

        let bytes = tcp_codec::encode_tcp(conn.transaction_id, conn.unit_id, &frame)?;
        let mut write = conn.write.lock().await;
        match write.write_all(&bytes).await {
            Ok(()) => on_tx(TxResult::Success),
            Err(err) => {
                log::warn!("tcp server write failed: {err}");
                on_tx(TxResult::Failed);
            }
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) -> InterfaceResult<()> {
        let mut callbacks = self.state.callbacks.lock().unwrap();
        if callbacks.len() >= MAX_RCV_CALLBACKS {
            return Err(InterfaceError::TooManyCallbacks);
        }
        callbacks.push(callback);
        Ok(())
    }

    async fn abort_current_transaction(&self) {
        *self.state.current.lock().await = None;
    }

    fn role(&self) -> Role {
        Role::Server
    }

    fn accepts_any_slave_id(&self) -> bool {
        true
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        let (socket, _peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("tcp server accept failed: {err}");
                continue;
            }
        };
        let (read_half, write_half) = socket.into_split();
        let conn_state = state.clone();
        tokio::spawn(async move { connection_loop(read_half, write_half, conn_state).await });
    }
}

async fn connection_loop(mut read_half: OwnedReadHalf, write_half: OwnedWriteHalf, state: Arc<ServerState>) {
    let write = Arc::new(Mutex::new(write_half));
    let mut buf = BytesMut::with_capacity(512);
    let mut scratch = [0u8; 512];

    loop {
        match read_half.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(err) => {
                log::warn!("tcp server connection read error: {err}");
                break;
            }
        }

        loop {
            match tcp_codec::decode_tcp(&buf, Role::Server) {
                Ok(Some((adu, consumed))) => {
                    let _ = buf.split_to(consumed);
                    *state.current.lock().await = Some(CurrentConn {
                        write: write.clone(),
                        transaction_id: adu.transaction_id,
                        unit_id: adu.unit_id,
                    });
                    let callbacks = state.callbacks.lock().unwrap().clone();
                    for callback in callbacks {
                        callback(adu.frame);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("dropping undecodable tcp request: {err}");
                    buf.clear();
                    break;
                }
            }
        }
    }
}
