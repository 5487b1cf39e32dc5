//! The Client (master) role: owns exactly one in-flight transaction at a
//! time, arbitrated by an epoch counter so that a late-firing timer or a
//! stray response can never disturb a transaction that has already been
//! finalized by something else.

pub mod sync;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    error::{ClientError, ClientResult, InterfaceError},
    frame::{self, Frame, FrameType},
    interface::{Interface, TxCallback, TxResult},
};

/// Default request timeout, per the configuration surface.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// The outcome of a tracked, non-blocking request, observed by polling a
/// shared tracker rather than awaiting a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    NoData,
    Success,
    InvalidFrame,
    Busy,
    TxFailed,
    Timeout,
    InvalidResponse,
    NotInitialized,
    InitFailed,
}

fn status_of(outcome: &ClientResult<Frame>) -> RequestStatus {
    match outcome {
        Ok(_) => RequestStatus::Success,
        Err(ClientError::NoData) => RequestStatus::NoData,
        Err(ClientError::InvalidFrame) => RequestStatus::InvalidFrame,
        Err(ClientError::Busy) => RequestStatus::Busy,
        Err(ClientError::TxFailed) => RequestStatus::TxFailed,
        Err(ClientError::Timeout) => RequestStatus::Timeout,
        Err(ClientError::InvalidResponse) => RequestStatus::InvalidResponse,
        Err(ClientError::NotInitialized) => RequestStatus::NotInitialized,
        Err(ClientError::InitFailed) => RequestStatus::InitFailed,
        Err(ClientError::Interface(_)) => RequestStatus::TxFailed,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RequestMeta {
    slave_id: u8,
    fc: u8,
    reg_address: u16,
    reg_count: u16,
}

impl RequestMeta {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            slave_id: frame.slave_id,
            fc: frame.fc,
            reg_address: frame.reg_address,
            reg_count: frame.reg_count,
        }
    }
}

enum ResponseSink {
    Buffer {
        buf: Arc<Mutex<Frame>>,
        tracker: Arc<Mutex<RequestStatus>>,
    },
    Callback {
        callback: Arc<dyn Fn(ClientResult<Frame>) + Send + Sync>,
    },
}

fn deliver(sink: &ResponseSink, outcome: ClientResult<Frame>) {
    match sink {
        ResponseSink::Buffer { buf, tracker } => {
            let status = status_of(&outcome);
            if let Ok(frame) = &outcome {
                *buf.lock().unwrap() = *frame;
            }
            *tracker.lock().unwrap() = status;
        }
        ResponseSink::Callback { callback } => callback(outcome),
    }
}

struct PendingState {
    active: bool,
    epoch: u64,
    meta: RequestMeta,
    sink: Option<ResponseSink>,
}

impl Default for PendingState {
    fn default() -> Self {
        Self {
            active: false,
            epoch: 0,
            meta: RequestMeta::default(),
            sink: None,
        }
    }
}

struct Inner {
    interface: Arc<dyn Interface>,
    config: ClientConfig,
    pending: Mutex<PendingState>,
    epoch: AtomicU64,
}

impl Inner {
    /// Disarms the pending request if, and only if, `epoch` still matches
    /// its current arming. A timer or callback racing a newer transaction
    /// observes a mismatch and produces no state change.
    fn finalize(&self, epoch: u64, outcome: ClientResult<Frame>) {
        let sink = {
            let mut guard = self.pending.lock().unwrap();
            if !guard.active || guard.epoch != epoch {
                return;
            }
            guard.active = false;
            guard.sink.take()
        };
        if let Some(sink) = sink {
            deliver(&sink, outcome);
        }
    }

    fn on_response(&self, frame: Frame) {
        let snapshot = {
            let guard = self.pending.lock().unwrap();
            guard.active.then_some((guard.epoch, guard.meta))
        };
        let Some((epoch, meta)) = snapshot else {
            return;
        };

        if frame.frame_type != FrameType::Response {
            return;
        }
        if frame.is_broadcast() {
            return;
        }
        if !self.interface.accepts_any_slave_id() && frame.slave_id != meta.slave_id {
            return;
        }
        if frame.fc != meta.fc {
            return;
        }

        let mut response = frame;
        response.reg_address = meta.reg_address;
        response.reg_count = meta.reg_count;
        self.finalize(epoch, Ok(response));
    }
}

/// A Modbus Client bound to one [`Interface`]. Cheap to clone: clones share
/// the same pending-transaction slot and epoch counter.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    #[must_use]
    pub fn new(interface: Arc<dyn Interface>, config: ClientConfig) -> Self {
        let inner = Arc::new(Inner {
            interface: interface.clone(),
            config,
            pending: Mutex::new(PendingState::default()),
            epoch: AtomicU64::new(0),
        });

        let callback_inner = inner.clone();
        // Registration failure here only happens if MAX_RCV_CALLBACKS was
        // already exhausted on a fresh interface, which never occurs: a
        // Client is the interface's sole subscriber.
        let _ = interface.set_receive_callback(Arc::new(move |frame| {
            callback_inner.on_response(frame);
        }));

        Self { inner }
    }

    /// Starts the underlying interface. Must succeed before any
    /// `send_request*` call; otherwise they return
    /// [`ClientError::NotInitialized`].
    pub async fn begin(&self) -> ClientResult<()> {
        self.inner
            .interface
            .begin()
            .await
            .map_err(|_| ClientError::InitFailed)
    }

    fn arm(&self, meta: RequestMeta, sink: ResponseSink) -> ClientResult<u64> {
        let mut guard = self.inner.pending.lock().unwrap();
        if guard.active {
            return Err(ClientError::Busy);
        }
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        guard.active = true;
        guard.epoch = epoch;
        guard.meta = meta;
        guard.sink = Some(sink);
        Ok(epoch)
    }

    /// Validates and arms `request`, returning the epoch it was armed
    /// under. The caller still owes a call to [`Self::spawn_transmit`] (or
    /// an equivalent finalize) to actually put bytes on the wire.
    fn start(&self, request: &Frame, sink: ResponseSink) -> ClientResult<u64> {
        if !self.inner.interface.is_ready() {
            return Err(ClientError::NotInitialized);
        }
        if !frame::is_valid_frame(request) {
            return Err(ClientError::InvalidFrame);
        }
        self.arm(RequestMeta::from_frame(request), sink)
    }

    /// Hands `request` to the interface in the background and arms the
    /// request timeout. Transmission failure, a successful broadcast, or
    /// the timeout all finalize the transaction via [`Inner::finalize`];
    /// a matching response finalizes it first if it arrives sooner.
    fn spawn_transmit(&self, request: Frame, epoch: u64) {
        let inner = self.inner.clone();
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        let meta = RequestMeta::from_frame(&request);

        tokio::spawn(async move {
            let tx_inner = inner.clone();
            let on_tx: TxCallback = Arc::new(move |result| match result {
                TxResult::Failed => tx_inner.finalize(epoch, Err(ClientError::TxFailed)),
                TxResult::Broadcast => {
                    let response =
                        Frame::response(meta.slave_id, meta.fc, meta.reg_address, meta.reg_count);
                    tx_inner.finalize(epoch, Ok(response));
                }
                TxResult::Success => {}
            });

            match inner.interface.send_frame(request, on_tx).await {
                Ok(()) => {
                    let timer_inner = inner.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        timer_inner.finalize(epoch, Err(ClientError::Timeout));
                    });
                }
                Err(InterfaceError::Busy) => inner.finalize(epoch, Err(ClientError::Busy)),
                Err(other) => inner.finalize(epoch, Err(ClientError::Interface(other))),
            }
        });
    }

    /// Sends `request` and asynchronously awaits its response. At most one
    /// such request may be in flight per `Client`; a concurrent call
    /// returns [`ClientError::Busy`] without disturbing the in-flight one.
    pub async fn send_request(&self, request: Frame) -> ClientResult<Frame> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let callback: Arc<dyn Fn(ClientResult<Frame>) + Send + Sync> = Arc::new(move |outcome| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(outcome);
            }
        });

        let epoch = self.start(&request, ResponseSink::Callback { callback })?;
        self.spawn_transmit(request, epoch);
        rx.await.unwrap_or(Err(ClientError::InvalidResponse))
    }

    /// Sends `request` without waiting: the outcome is written into `buf`
    /// and `tracker` is updated from [`RequestStatus::NoData`] to its final
    /// value once the transaction completes.
    pub fn send_request_tracked(
        &self,
        request: Frame,
        buf: Arc<Mutex<Frame>>,
        tracker: Arc<Mutex<RequestStatus>>,
    ) -> ClientResult<()> {
        *tracker.lock().unwrap() = RequestStatus::NoData;
        let epoch = self.start(&request, ResponseSink::Buffer { buf, tracker })?;
        self.spawn_transmit(request, epoch);
        Ok(())
    }

    /// Sends `request` without waiting: `callback` is invoked exactly once
    /// with the final outcome.
    pub fn send_request_with_callback(
        &self,
        request: Frame,
        callback: Arc<dyn Fn(ClientResult<Frame>) + Send + Sync>,
    ) -> ClientResult<()> {
        let epoch = self.start(&request, ResponseSink::Callback { callback })?;
        self.spawn_transmit(request, epoch);
        Ok(())
    }

    /// Cancels whatever request is currently in flight. Implemented by
    /// forwarding to the interface; the next timer or response for the
    /// cancelled epoch still finds a mismatched epoch and is a no-op.
    pub async fn abort(&self) {
        self.inner.interface.abort_current_transaction().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FC_READ_HOLDING_REGISTERS, interface::Role};
    use std::sync::atomic::AtomicBool;

    struct FakeInterface {
        ready: AtomicBool,
        callback: Mutex<Option<crate::interface::ReceiveCallback>>,
    }

    #[async_trait::async_trait]
    impl Interface for FakeInterface {
        async fn begin(&self) -> crate::error::InterfaceResult<()> {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_frame(
            &self,
            frame: Frame,
            on_tx: TxCallback,
        ) -> crate::error::InterfaceResult<()> {
            on_tx(TxResult::Success);
            let response = Frame::response(frame.slave_id, frame.fc, 0, 1);
            let mut response = response;
            response.data.push(1000);
            if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                cb(response);
            }
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn set_receive_callback(
            &self,
            callback: crate::interface::ReceiveCallback,
        ) -> crate::error::InterfaceResult<()> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        async fn abort_current_transaction(&self) {}

        fn role(&self) -> Role {
            Role::Client
        }

        fn accepts_any_slave_id(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn round_trip_success() {
        let iface = Arc::new(FakeInterface {
            ready: AtomicBool::new(false),
            callback: Mutex::new(None),
        });
        let client = Client::new(iface.clone(), ClientConfig::default());
        client.begin().await.unwrap();

        let request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 100, 1);
        let response = client.send_request(request).await.unwrap();
        assert_eq!(response.data.as_slice(), &[1000]);
    }

    #[tokio::test]
    async fn concurrent_request_is_busy() {
        struct StallingInterface {
            ready: AtomicBool,
        }

        #[async_trait::async_trait]
        impl Interface for StallingInterface {
            async fn begin(&self) -> crate::error::InterfaceResult<()> {
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
            async fn send_frame(
                &self,
                _frame: Frame,
                _on_tx: TxCallback,
            ) -> crate::error::InterfaceResult<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
            fn is_ready(&self) -> bool {
                self.ready.load(Ordering::SeqCst)
            }
            fn set_receive_callback(
                &self,
                _callback: crate::interface::ReceiveCallback,
            ) -> crate::error::InterfaceResult<()> {
                Ok(())
            }
            async fn abort_current_transaction(&self) {}
            fn role(&self) -> Role {
                Role::Client
            }
            fn accepts_any_slave_id(&self) -> bool {
                false
            }
        }

        let iface = Arc::new(StallingInterface {
            ready: AtomicBool::new(false),
        });
        let client = Client::new(iface, ClientConfig::default());
        client.begin().await.unwrap();

        let request = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 1);
        let buf = Arc::new(Mutex::new(Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 1)));
        let tracker = Arc::new(Mutex::new(RequestStatus::NoData));
        client
            .send_request_tracked(request, buf, tracker)
            .unwrap();

        let second = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 1);
        let err = client.send_request(second).await.unwrap_err();
        assert!(matches!(err, ClientError::Busy));
    }
}
