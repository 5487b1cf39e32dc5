//! The RTU Interface: half-duplex framing over a byte-oriented serial
//! transport, with inter-frame silence used as the frame boundary (RTU has
//! no length prefix of its own).

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, Mutex},
    time::Instant,
};

use crate::{
    codec::rtu as rtu_codec,
    error::{InterfaceError, InterfaceResult},
    frame::Frame,
    interface::{Interface, ReceiveCallback, Role, TxCallback, TxResult, MAX_RCV_CALLBACKS},
    slave::SlaveId,
};

/// Serial line parameters that determine the inter-frame silence interval.
#[derive(Debug, Clone, Copy)]
pub struct RtuConfig {
    pub baud_rate: u32,
    pub slave_id: SlaveId,
    /// If true, a Server accepts requests for any slave id, not just
    /// `slave_id` (and broadcasts). Has no effect on a Client.
    pub catch_all: bool,
}

impl RtuConfig {
    #[must_use]
    pub fn new(baud_rate: u32, slave_id: SlaveId) -> Self {
        Self {
            baud_rate,
            slave_id,
            catch_all: false,
        }
    }

    /// `3.5` character times at `baud_rate`, or the fixed `1750us` floor
    /// mandated above 19200 baud where the character-time formula would
    /// otherwise yield an impractically short gap.
    #[must_use]
    pub fn silence_time(&self) -> Duration {
        if self.baud_rate <= 19_200 {
            let char_time_us = 11.0 * 1_000_000.0 / f64::from(self.baud_rate);
            Duration::from_micros((char_time_us * 3.5) as u64)
        } else {
            Duration::from_micros(1750)
        }
    }
}

struct TxRequest {
    bytes: Vec<u8>,
    is_broadcast: bool,
    callback: TxCallback,
}

struct State {
    role: Role,
    slave_id: SlaveId,
    catch_all: bool,
    silence: Duration,
    last_tx: Mutex<Option<Instant>>,
    callbacks: StdMutex<Vec<ReceiveCallback>>,
    tx_tx: mpsc::Sender<TxRequest>,
    tx_rx: Mutex<Option<mpsc::Receiver<TxRequest>>>,
    ready: AtomicBool,
    started: AtomicBool,
}

/// An RTU Interface bound to a single half-duplex byte transport `T`
/// (typically a `tokio_serial::SerialStream`, or any `AsyncRead +
/// AsyncWrite` pair in tests).
pub struct RtuInterface<T> {
    transport: Mutex<Option<T>>,
    state: Arc<State>,
}

impl<T> std::fmt::Debug for RtuInterface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuInterface")
            .field("role", &self.state.role)
            .field("slave_id", &self.state.slave_id)
            .finish_non_exhaustive()
    }
}

impl<T> RtuInterface<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    #[must_use]
    pub fn new(transport: T, role: Role, config: RtuConfig) -> Self {
        let (tx_tx, tx_rx) = mpsc::channel(1);
        Self {
            transport: Mutex::new(Some(transport)),
            state: Arc::new(State {
                role,
                slave_id: config.slave_id,
                catch_all: config.catch_all,
                silence: config.silence_time(),
                last_tx: Mutex::new(None),
                callbacks: StdMutex::new(Vec::new()),
                tx_tx,
                tx_rx: Mutex::new(Some(tx_rx)),
                ready: AtomicBool::new(false),
                started: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl<T> Interface for RtuInterface<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn begin(&self) -> InterfaceResult<()> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(transport) = self.transport.lock().await.take() else {
            return Err(InterfaceError::NotReady);
        };
        let Some(rx) = self.state.tx_rx.lock().await.take() else {
            return Err(InterfaceError::NotReady);
        };

        let (read_half, write_half) = tokio::io::split(transport);
        self.state.ready.store(true, Ordering::SeqCst);

        let read_state = self.state.clone();
        tokio::spawn(async move { read_loop(read_half, read_state).await });

        let write_state = self.state.clone();
        tokio::spawn(async move { write_loop(write_half, rx, write_state).await });

        Ok(())
    }

    async fn send_frame(&self, frame: Frame, on_tx: TxCallback) -> InterfaceResult<()> {
        if !self.is_ready() {
            return Err(InterfaceError::NotReady);
        }
        let bytes = rtu_codec::encode_rtu(&frame)?;
        let request = TxRequest {
            bytes,
            is_broadcast: frame.is_broadcast(),
            callback: on_tx,
        };
        self.state
            .tx_tx
            .try_send(request)
            .map_err(|_| InterfaceError::Busy)
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
        if let Some(rx) = self.state.tx_rx.lock().await.as_mut() {
            while rx.try_recv().is_ok() {}
        }
    }

    fn role(&self) -> Role {
        self.state.role
    }

    fn accepts_any_slave_id(&self) -> bool {
        self.state.catch_all
    }
}

async fn read_loop<R>(mut read_half: ReadHalf<R>, state: Arc<State>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut buf = BytesMut::with_capacity(256);
    let mut scratch = [0u8; 256];

    loop {
        let read_fut = read_half.read(&mut scratch);
        let outcome = if buf.is_empty() {
            read_fut.await.map(Some)
        } else {
            match tokio::time::timeout(state.silence, read_fut).await {
                Ok(result) => result.map(Some),
                Err(_elapsed) => Ok(None),
            }
        };

        match outcome {
            Ok(Some(0)) => break,
            Ok(Some(n)) => buf.extend_from_slice(&scratch[..n]),
            Ok(None) => {
                let frame_bytes = buf.split();
                dispatch_received(&state, &frame_bytes).await;
            }
            Err(err) => {
                log::warn!("rtu interface read error: {err}");
                break;
            }
        }
    }
    state.ready.store(false, Ordering::SeqCst);
}

async fn dispatch_received(state: &Arc<State>, bytes: &[u8]) {
    let frame = match rtu_codec::decode_rtu(bytes, state.role) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("dropping undecodable rtu frame: {err}");
            return;
        }
    };

    if state.role == Role::Server
        && !state.catch_all
        && !frame.is_broadcast()
        && frame.slave_id != state.slave_id
    {
        log::trace!("dropping rtu request for slave {}", frame.slave_id);
        return;
    }

    let callbacks = state.callbacks.lock().unwrap().clone();
    for callback in callbacks {
        callback(frame);
    }
}

async fn write_loop<W>(mut write_half: WriteHalf<W>, mut rx: mpsc::Receiver<TxRequest>, state: Arc<State>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(request) = rx.recv().await {
        let wait = {
            let last_tx = state.last_tx.lock().await;
            last_tx.map_or(Duration::ZERO, |last| {
                state.silence.saturating_sub(last.elapsed())
            })
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let result = write_half.write_all(&request.bytes).await;
        *state.last_tx.lock().await = Some(Instant::now());

        match result {
            Ok(()) if request.is_broadcast => (request.callback)(TxResult::Broadcast),
            Ok(()) => (request.callback)(TxResult::Success),
            Err(err) => {
                log::warn!("rtu interface write error: {err}");
                (request.callback)(TxResult::Failed);
            }
        }
    }
}
