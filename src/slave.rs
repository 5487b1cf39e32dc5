//! A validated Modbus slave/unit identifier, shared by RTU and TCP.

use std::{fmt, str::FromStr};

pub type SlaveId = u8;

/// A Modbus slave (RTU) / unit (TCP) identifier.
///
/// `0` is reserved for broadcast, `248..=255` are reserved by the protocol,
/// `1..=247` address individual devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slave(pub SlaveId);

impl Slave {
    #[must_use]
    pub const fn broadcast() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn min_device() -> Self {
        Self(1)
    }

    #[must_use]
    pub const fn max_device() -> Self {
        Self(247)
    }

    /// The conventional placeholder unit id for a Modbus TCP device that
    /// does not itself route by slave id.
    #[must_use]
    pub const fn tcp_device() -> Self {
        Self(255)
    }

    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_single_device(self) -> bool {
        self.0 >= 1 && self.0 <= 247
    }

    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 >= 248
    }
}

impl From<SlaveId> for Slave {
    fn from(id: SlaveId) -> Self {
        Self(id)
    }
}

impl From<Slave> for SlaveId {
    fn from(slave: Slave) -> Self {
        slave.0
    }
}

impl fmt::Display for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:0>2X})", self.0, self.0)
    }
}

impl FromStr for Slave {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            SlaveId::from_str_radix(hex, 16)?
        } else {
            s.parse()?
        };
        Ok(Self(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dec() {
        assert_eq!("42".parse::<Slave>().unwrap(), Slave(42));
    }

    #[test]
    fn parse_hex() {
        assert_eq!("0x2A".parse::<Slave>().unwrap(), Slave(42));
    }

    #[test]
    fn format() {
        assert_eq!(Slave(42).to_string(), "42 (0x2A)");
    }

    #[test]
    fn broadcast_and_ranges() {
        assert!(Slave::broadcast().is_broadcast());
        assert!(Slave::min_device().is_single_device());
        assert!(Slave::max_device().is_single_device());
        assert!(Slave::tcp_device().is_reserved());
    }
}
