//! Convenience re-exports for the common case of building a Client,
//! Server, or Bridge against one or two Interfaces.

pub use crate::{
    bridge::Bridge,
    client::{sync::SyncClient, Client, ClientConfig, RequestStatus},
    error::{ClientError, ClientResult, CodecError, InterfaceError, InterfaceResult, ServerError, ServerResult},
    frame::{Exception, Frame, FrameType, WordBuffer},
    interface::{
        rtu::{RtuConfig, RtuInterface},
        tcp::{TcpClientConfig, TcpClientInterface, TcpServerConfig, TcpServerInterface},
        Interface, Role, TxResult,
    },
    server::{
        word::{RegisterType, Word, WordStore},
        Server, ServerConfig,
    },
    slave::{Slave, SlaveId},
};
