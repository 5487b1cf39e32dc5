//! The per-transport Interface abstraction: a cooperative worker over a
//! byte transport that frames, decodes and dispatches Modbus traffic for
//! exactly one [`crate::codec::Role`].

pub mod rtu;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::InterfaceResult, frame::Frame};

/// Maximum number of receive callbacks an Interface accepts.
pub const MAX_RCV_CALLBACKS: usize = 5;

pub use crate::codec::Role;

/// The outcome of handing a frame off to the transport for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxResult {
    Success,
    /// The write to the underlying transport failed.
    Failed,
    /// The frame was a broadcast request: no response will ever arrive.
    Broadcast,
}

/// Invoked exactly once per transmission attempt, after the bytes have been
/// handed to (or rejected by) the transport.
pub type TxCallback = Arc<dyn Fn(TxResult) + Send + Sync>;

/// Invoked for every frame the worker successfully decodes.
pub type ReceiveCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// A transport-specific worker that frames, decodes and dispatches Modbus
/// traffic. Implementations run a single cooperative task: at most one
/// frame is in flight for transmission, and received frames are delivered
/// to registered callbacks one at a time, in decode order.
#[async_trait]
pub trait Interface: Send + Sync {
    /// Starts the worker task(s). Idempotent-on-failure: a failed `begin()`
    /// leaves `is_ready()` false and every later call returns
    /// [`crate::error::InterfaceError::NotReady`].
    async fn begin(&self) -> InterfaceResult<()>;

    /// Queues `frame` for transmission. Non-blocking: returns
    /// [`crate::error::InterfaceError::Busy`] immediately if a
    /// transmission is already in flight, rather than waiting for the slot
    /// to free.
    async fn send_frame(&self, frame: Frame, on_tx: TxCallback) -> InterfaceResult<()>;

    fn is_ready(&self) -> bool;

    /// Registers a callback invoked for every received frame. At most
    /// [`MAX_RCV_CALLBACKS`] callbacks may be registered.
    fn set_receive_callback(&self, callback: ReceiveCallback) -> InterfaceResult<()>;

    /// Cancels whatever transmission is currently in flight, if any.
    async fn abort_current_transaction(&self);

    fn role(&self) -> Role;

    /// Whether this Interface accepts frames addressed to any slave id
    /// (true for a TCP Server, false for an RTU Interface bound to one
    /// slave id).
    fn accepts_any_slave_id(&self) -> bool;
}
