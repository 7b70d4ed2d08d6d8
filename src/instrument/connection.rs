//! Connection strings of the MAKE directive.
//!
//! | Prefix  | Example                         | Result                |
//! |---------|---------------------------------|-----------------------|
//! | `none`  | `none`                          | no wire I/O           |
//! | `GPIB`  | `GPIB12`, `GPIB 12`             | bus address 0..=31    |
//! | `COM`   | `COM1, 9600, 8, 1, none`        | serial parameters     |
//! | `URL`   | `URL = 192.168.1.20:5025`       | network address       |
//! | `TMCTL` | `TMCTL: USBTMC(DL9000) = 27E8`  | vendor wire id        |

use crate::error::{AppResult, DispatchError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static SERIAL_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(\w+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d)\s*,\s*([a-zA-Z]+)\s*$").ok()
});

static URL_PREFIX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\s*URL\s*=\s*").ok());

static VENDOR_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*TMCTL\s*:\s*(.+?)\s*=\s*([0-9a-fA-F]*)\s*$").ok());

/// The only vendor wire kind accepted today.
pub const SUPPORTED_VENDOR_WIRE: &str = "USBTMC(DL9000)";

/// Highest primary GPIB address.
pub const MAX_GPIB_ADDRESS: u8 = 31;

/// Transport families an instrument can declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransportKind {
    /// No wire I/O at all
    None,
    /// IEEE-488 bus
    Gpib,
    /// RS-232 serial line
    Serial,
    /// TCP socket
    Network,
    /// Vendor-specific USB link
    Vendor,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gpib => "GPIB",
            Self::Serial => "RS232",
            Self::Network => "LAN",
            Self::Vendor => "TMCTL",
        };
        f.write_str(name)
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialParams {
    /// Port name as written in the script, e.g. `COM3`
    pub port: String,
    /// Baud rate
    pub baud: u32,
    /// Data bits (5..=8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
}

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionSpec {
    /// No connection; messages are only logged
    None,
    /// GPIB primary address
    Gpib(u8),
    /// Serial line
    Serial(SerialParams),
    /// `host[:port]`
    Network(String),
    /// Vendor wire kind and device id
    Vendor {
        /// Wire kind, e.g. `USBTMC(DL9000)`
        wire: String,
        /// Hexadecimal device id
        address: String,
    },
}

impl ConnectionSpec {
    /// Parse a MAKE connection string.
    pub fn parse(text: &str) -> AppResult<Self> {
        let trimmed = text.trim();
        let invalid = |reason: &str| {
            DispatchError::InvalidConnection(format!("{trimmed}: {reason}"))
        };

        if starts_with_ignore_case(trimmed, "GPIB") {
            let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
            let address: u8 = digits
                .parse()
                .map_err(|_| invalid("expected a GPIB address such as GPIB12"))?;
            if address > MAX_GPIB_ADDRESS {
                return Err(invalid("GPIB addresses range from 0 to 31"));
            }
            return Ok(Self::Gpib(address));
        }

        if starts_with_ignore_case(trimmed, "none") {
            return Ok(Self::None);
        }

        if starts_with_ignore_case(trimmed, "COM") {
            return parse_serial(trimmed).ok_or_else(|| {
                invalid("expected 'COMx, baud, data bits, stop bits, parity' e.g. 'COM1, 9600, 8, 1, none'")
            });
        }

        if starts_with_ignore_case(trimmed, "URL") {
            let host = URL_PREFIX
                .as_ref()
                .map(|re| re.replace(trimmed, "").trim().to_string())
                .unwrap_or_default();
            if host.is_empty() || host.chars().any(char::is_whitespace) {
                return Err(invalid("expected 'URL = host[:port]'"));
            }
            return Ok(Self::Network(host));
        }

        if starts_with_ignore_case(trimmed, "TMCTL") {
            let caps = VENDOR_PATTERN
                .as_ref()
                .and_then(|re| re.captures(trimmed))
                .ok_or_else(|| invalid("expected 'TMCTL: wire = id'"))?;
            let wire = caps[1].trim().to_string();
            if !wire.eq_ignore_ascii_case(SUPPORTED_VENDOR_WIRE) {
                return Err(invalid("only USBTMC(DL9000) is supported"));
            }
            return Ok(Self::Vendor {
                wire,
                address: caps[2].to_string(),
            });
        }

        Err(invalid("unsupported protocol"))
    }

    /// Transport family of this connection.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::None => TransportKind::None,
            Self::Gpib(_) => TransportKind::Gpib,
            Self::Serial(_) => TransportKind::Serial,
            Self::Network(_) => TransportKind::Network,
            Self::Vendor { .. } => TransportKind::Vendor,
        }
    }
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Gpib(address) => write!(f, "GPIB#{address}"),
            Self::Serial(p) => write!(
                f,
                "{} {},{},{},{:?}",
                p.port, p.baud, p.data_bits, p.stop_bits, p.parity
            ),
            Self::Network(host) => write!(f, "{host}"),
            Self::Vendor { wire, address } => write!(f, "{wire}={address}"),
        }
    }
}

fn parse_serial(text: &str) -> Option<ConnectionSpec> {
    let caps = SERIAL_PATTERN.as_ref()?.captures(text)?;
    let data_bits: u8 = caps[3].parse().ok()?;
    let stop_bits: u8 = caps[4].parse().ok()?;
    if !(5..=8).contains(&data_bits) || !(1..=2).contains(&stop_bits) {
        return None;
    }
    let parity = match caps[5].to_ascii_lowercase().as_str() {
        "none" | "n" => Parity::None,
        "even" | "e" => Parity::Even,
        "odd" | "o" => Parity::Odd,
        _ => return None,
    };
    Some(ConnectionSpec::Serial(SerialParams {
        port: caps[1].to_string(),
        baud: caps[2].parse().ok()?,
        data_bits,
        stop_bits,
        parity,
    }))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
