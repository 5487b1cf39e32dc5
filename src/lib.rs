// SPDX-License-Identifier: MIT OR Apache-2.0

//! An embedded-grade Modbus RTU/TCP library: a shared wire codec, a
//! per-transport worker ([`interface::Interface`]), and three application
//! roles built on top of it — [`client::Client`] (master),
//! [`server::Server`] (slave) and [`bridge::Bridge`] (gateway).
//!
//! Supported function codes: read coils, read discrete inputs, read
//! holding registers, read input registers, write single coil, write
//! single register, write multiple coils, write multiple registers.
//! Modbus ASCII, file-record and diagnostic function codes, and device
//! discovery are out of scope.

#![warn(clippy::all)]
#![warn(missing_debug_implementations)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod interface;
pub mod prelude;
pub mod server;
pub mod slave;
