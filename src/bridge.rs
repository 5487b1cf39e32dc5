//! The Bridge (gateway) role: forwards requests arriving on one Server
//! Interface out through one Client Interface, and routes the eventual
//! response back to whichever Server Interface originated the request.
//!
//! Transaction-id/unit-id bookkeeping for a TCP side is entirely internal
//! to that side's `Interface` implementation; the Bridge only ever sees
//! [`Frame`]s and never needs to know which wire format either side speaks.

use std::{sync::Arc, time::Duration};

use tokio::sync::{oneshot, Mutex};

use crate::{
    error::InterfaceResult,
    frame::{Exception, Frame},
    interface::{Interface, TxCallback, TxResult},
};

pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

fn noop_tx_callback() -> TxCallback {
    Arc::new(|_| {})
}

struct State {
    client_interface: Arc<dyn Interface>,
    server_interface: Arc<dyn Interface>,
    pending_reply: std::sync::Mutex<Option<oneshot::Sender<Frame>>>,
    busy: Arc<Mutex<()>>,
    timeout: Duration,
}

/// A gateway pairing exactly one Client Interface (upstream, toward the
/// target devices) with exactly one Server Interface (downstream, toward
/// the external master). One transaction may be in flight across the
/// bridge at a time; a concurrent arrival is answered `SLAVE_DEVICE_BUSY`
/// directly, without ever reaching the upstream side.
pub struct Bridge {
    state: Arc<State>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").finish_non_exhaustive()
    }
}

impl Bridge {
    #[must_use]
    pub fn new(client_interface: Arc<dyn Interface>, server_interface: Arc<dyn Interface>, timeout: Duration) -> Self {
        Self {
            state: Arc::new(State {
                client_interface,
                server_interface,
                pending_reply: std::sync::Mutex::new(None),
                busy: Arc::new(Mutex::new(())),
                timeout,
            }),
        }
    }

    /// Starts both Interfaces and wires the forwarding callbacks.
    pub async fn begin(&self) -> InterfaceResult<()> {
        self.state.server_interface.begin().await?;
        self.state.client_interface.begin().await?;

        let forward_state = self.state.clone();
        self.state
            .server_interface
            .set_receive_callback(Arc::new(move |frame| {
                let state = forward_state.clone();
                tokio::spawn(async move { forward(state, frame).await });
            }))?;

        let response_state = self.state.clone();
        self.state
            .client_interface
            .set_receive_callback(Arc::new(move |frame| {
                if let Some(tx) = response_state.pending_reply.lock().unwrap().take() {
                    let _ = tx.send(frame);
                }
            }))?;

        Ok(())
    }
}

async fn forward(state: Arc<State>, frame: Frame) {
    let Ok(_permit) = state.busy.clone().try_lock_owned() else {
        if !frame.is_broadcast() {
            let exception = Frame::exception_response(frame.slave_id, frame.fc, Exception::SlaveDeviceBusy);
            let _ = state
                .server_interface
                .send_frame(exception, noop_tx_callback())
                .await;
        }
        return;
    };

    let (tx, rx) = oneshot::channel();
    *state.pending_reply.lock().unwrap() = Some(tx);

    let tx_state = state.clone();
    let origin_slave = frame.slave_id;
    let origin_fc = frame.fc;
    let on_tx: TxCallback = Arc::new(move |result| {
        if let TxResult::Failed = result {
            if let Some(tx) = tx_state.pending_reply.lock().unwrap().take() {
                let exception =
                    Frame::exception_response(origin_slave, origin_fc, Exception::SlaveDeviceFailure);
                let _ = tx.send(exception);
            }
        }
    });

    if state
        .client_interface
        .send_frame(frame, on_tx)
        .await
        .is_err()
    {
        if let Some(tx) = state.pending_reply.lock().unwrap().take() {
            let exception = Frame::exception_response(origin_slave, origin_fc, Exception::SlaveDeviceBusy);
            let _ = tx.send(exception);
        }
    }

    if frame.is_broadcast() {
        return;
    }

    match tokio::time::timeout(state.timeout, rx).await {
        Ok(Ok(response)) => {
            let _ = state
                .server_interface
                .send_frame(response, noop_tx_callback())
                .await;
        }
        Ok(Err(_canceled)) => {}
        Err(_elapsed) => {
            state.pending_reply.lock().unwrap().take();
            let exception = Frame::exception_response(
                origin_slave,
                origin_fc,
                Exception::GatewayTargetFailedToRespond,
            );
            let _ = state
                .server_interface
                .send_frame(exception, noop_tx_callback())
                .await;
        }
    }
}
