//! The Server (slave) role: a [`WordStore`](word::WordStore) dispatched to
//! from one or more [`Interface`]s, serialized by a single request mutex
//! when more than one Interface is attached.

pub mod word;

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use crate::{
    error::ServerResult,
    frame::{self, Exception, Frame, WordBuffer},
    interface::{Interface, TxCallback, TxResult},
    slave::SlaveId,
};

use word::{RegisterType, Word, WordMode, WordStore};

pub const DEFAULT_MAX_INTERFACES: usize = 2;

/// How long a Server waits to acquire its request mutex before responding
/// with `SLAVE_DEVICE_BUSY`, when more than one Interface is attached.
#[derive(Debug, Clone, Copy)]
pub enum ReqMutexPolicy {
    /// Wait indefinitely (the default: fine for a single attached
    /// Interface, where there is never contention).
    Block,
    /// Fail immediately if the mutex is held.
    TryLock,
    /// Wait up to the given duration, then fail.
    WaitFor(Duration),
}

impl ReqMutexPolicy {
    #[must_use]
    pub fn from_timeout_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            None => Self::Block,
            Some(0) => Self::TryLock,
            Some(ms) => Self::WaitFor(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub slave_id: SlaveId,
    pub reject_undefined: bool,
    pub req_mutex_timeout_ms: Option<u64>,
    pub max_interfaces: usize,
}

impl ServerConfig {
    #[must_use]
    pub fn new(slave_id: SlaveId) -> Self {
        Self {
            slave_id,
            reject_undefined: true,
            req_mutex_timeout_ms: None,
            max_interfaces: DEFAULT_MAX_INTERFACES,
        }
    }
}

/// A Modbus Server. Owns a [`WordStore`] and dispatches decoded requests
/// from every attached [`Interface`] against it.
pub struct Server {
    store: std::sync::Mutex<WordStore>,
    config: ServerConfig,
    req_mutex: Arc<tokio::sync::Mutex<()>>,
    interface_count: std::sync::atomic::AtomicUsize,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig, store_capacity: usize) -> Self {
        Self {
            store: std::sync::Mutex::new(WordStore::new(store_capacity)),
            config,
            req_mutex: Arc::new(tokio::sync::Mutex::new(())),
            interface_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn add_word(&self, word: Word) -> ServerResult<()> {
        self.store.lock().unwrap().add_word(word)
    }

    pub fn add_words(&self, words: Vec<Word>) -> ServerResult<()> {
        self.store.lock().unwrap().add_words(words)
    }

    pub fn begin_words(&self) -> ServerResult<()> {
        self.store.lock().unwrap().begin()
    }

    /// Attaches an `Interface` to this Server: registers a receive
    /// callback that dispatches every decoded request and sends the
    /// response back out the same Interface.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::InterfaceError::TooManyCallbacks`] if
    /// `config.max_interfaces` is already attached.
    pub fn attach(self: &Arc<Self>, interface: Arc<dyn Interface>) -> ServerResult<()> {
        if self.interface_count.load(Ordering::SeqCst) >= self.config.max_interfaces {
            return Err(crate::error::InterfaceError::TooManyCallbacks.into());
        }
        self.interface_count.fetch_add(1, Ordering::SeqCst);

        let server = self.clone();
        let iface_for_callback = interface.clone();
        interface.set_receive_callback(Arc::new(move |frame| {
            let server = server.clone();
            let iface = iface_for_callback.clone();
            tokio::spawn(async move { server.handle_request(frame, iface).await });
        }))?;
        Ok(())
    }

    async fn acquire_req_mutex(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        let policy = ReqMutexPolicy::from_timeout_ms(self.config.req_mutex_timeout_ms);
        match policy {
            ReqMutexPolicy::Block => Some(self.req_mutex.clone().lock_owned().await),
            ReqMutexPolicy::TryLock => self.req_mutex.clone().try_lock_owned().ok(),
            ReqMutexPolicy::WaitFor(duration) => {
                tokio::time::timeout(duration, self.req_mutex.clone().lock_owned())
                    .await
                    .ok()
            }
        }
    }

    async fn handle_request(&self, frame: Frame, interface: Arc<dyn Interface>) {
        if !interface.accepts_any_slave_id()
            && !frame.is_broadcast()
            && frame.slave_id != self.config.slave_id
        {
            return;
        }
        if frame.is_broadcast() && !frame::is_write_fc(frame.fc) {
            return;
        }

        let guard = self.acquire_req_mutex().await;
        let response = if guard.is_some() {
            self.dispatch(&frame)
        } else {
            Frame::exception_response(frame.slave_id, frame.fc, Exception::SlaveDeviceBusy)
        };

        if frame.is_broadcast() {
            return;
        }

        let on_tx: TxCallback = Arc::new(|result| {
            if let TxResult::Failed = result {
                log::warn!("server failed to transmit response");
            }
        });
        if let Err(err) = interface.send_frame(response, on_tx).await {
            log::warn!("server could not hand response to interface: {err}");
        }
    }

    fn dispatch(&self, frame: &Frame) -> Frame {
        let store = self.store.lock().unwrap();
        let reject_undefined = self.config.reject_undefined;

        match frame.fc {
            frame::FC_READ_COILS => respond_read(frame, &store, RegisterType::Coil, reject_undefined),
            frame::FC_READ_DISCRETE_INPUTS => {
                respond_read(frame, &store, RegisterType::DiscreteInput, reject_undefined)
            }
            frame::FC_READ_HOLDING_REGISTERS => {
                respond_read(frame, &store, RegisterType::HoldingRegister, reject_undefined)
            }
            frame::FC_READ_INPUT_REGISTERS => {
                respond_read(frame, &store, RegisterType::InputRegister, reject_undefined)
            }
            frame::FC_WRITE_SINGLE_COIL | frame::FC_WRITE_MULTIPLE_COILS => {
                respond_write(frame, &store, RegisterType::Coil, reject_undefined)
            }
            frame::FC_WRITE_SINGLE_REGISTER | frame::FC_WRITE_MULTIPLE_REGISTERS => {
                respond_write(frame, &store, RegisterType::HoldingRegister, reject_undefined)
            }
            fc => Frame::exception_response(frame.slave_id, fc, Exception::IllegalFunction),
        }
    }
}

fn respond_read(frame: &Frame, store: &WordStore, reg_type: RegisterType, reject_undefined: bool) -> Frame {
    match execute_read(store, reg_type, frame.reg_address, frame.reg_count, reject_undefined) {
        Ok(data) => {
            let mut response = Frame::response(frame.slave_id, frame.fc, frame.reg_address, frame.reg_count);
            response.data = data;
            response
        }
        Err(exception) => Frame::exception_response(frame.slave_id, frame.fc, exception),
    }
}

fn respond_write(frame: &Frame, store: &WordStore, reg_type: RegisterType, reject_undefined: bool) -> Frame {
    match execute_write(store, reg_type, frame.reg_address, frame.data.as_slice(), reject_undefined) {
        Ok(()) => Frame::response(frame.slave_id, frame.fc, frame.reg_address, frame.reg_count),
        Err(exception) => Frame::exception_response(frame.slave_id, frame.fc, exception),
    }
}

fn execute_read(
    store: &WordStore,
    reg_type: RegisterType,
    start: u16,
    count: u16,
    reject_undefined: bool,
) -> Result<WordBuffer, Exception> {
    let mut out = WordBuffer::new();
    let mut addr = start;
    let end = u32::from(start) + u32::from(count);

    while u32::from(addr) < end {
        match store.lookup(reg_type, addr) {
            None => {
                if reject_undefined {
                    return Err(Exception::IllegalDataAddress);
                }
                out.push(0);
                addr += 1;
            }
            Some(word) => {
                if addr != word.start_addr
                    || u32::from(addr) + u32::from(word.nb_regs) > end
                {
                    return Err(Exception::IllegalDataAddress);
                }
                match &word.mode {
                    WordMode::Direct(storage) => out.push(storage.load(Ordering::SeqCst)),
                    WordMode::Handler { read, .. } => {
                        let read = read.as_ref().ok_or(Exception::IllegalFunction)?;
                        let values = read(word.start_addr, word.nb_regs, word.user_ctx.as_ref())?;
                        for value in values {
                            out.push(value);
                        }
                    }
                }
                addr += word.nb_regs;
            }
        }
    }

    Ok(out)
}

fn execute_write(
    store: &WordStore,
    reg_type: RegisterType,
    start: u16,
    values: &[u16],
    reject_undefined: bool,
) -> Result<(), Exception> {
    let mut addr = start;
    let mut i = 0usize;
    let end = u32::from(start) + values.len() as u32;

    while u32::from(addr) < end {
        match store.lookup(reg_type, addr) {
            None => {
                if reject_undefined {
                    return Err(Exception::IllegalDataAddress);
                }
                addr += 1;
                i += 1;
            }
            Some(word) => {
                if addr != word.start_addr
                    || u32::from(addr) + u32::from(word.nb_regs) > end
                {
                    return Err(Exception::IllegalDataAddress);
                }
                let slice = &values[i..i + word.nb_regs as usize];
                match &word.mode {
                    WordMode::Direct(storage) => storage.store(slice[0], Ordering::SeqCst),
                    WordMode::Handler { write, .. } => {
                        let write = write.as_ref().ok_or(Exception::IllegalFunction)?;
                        write(word.start_addr, slice, word.user_ctx.as_ref())?;
                    }
                }
                addr += word.nb_regs;
                i += word.nb_regs as usize;
            }
        }
    }
    Ok(())
}
