// src/io/serial/mod.rs
//
// Serial side of the bridge: port discovery, link acquisition and newline
// framing.
//
// Features:
// - Explicit path or glob-based discovery
// - Bounded retry acquisition with "busy" fast-fail
// - Line reads with a bounded timeout, serialised line writes

pub mod framer;
pub mod link;
pub mod ports;
pub mod resolver;
pub(crate) mod utils;

pub use framer::{frame_outgoing, Line, LineFramer, DEFAULT_MAX_LINE_LENGTH, LINE_TERMINATOR};
pub use link::{acquire, LinkDevice, LinkManager, Lines, OpenError, PortOpener, SerialLink, SystemPortOpener};
pub use ports::{list_serial_ports, SerialPortInfo};
pub use resolver::{PortPattern, PortResolver, DEFAULT_PORT_PATTERNS};
pub use utils::{LinkSettings, Parity};
