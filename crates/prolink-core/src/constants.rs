//! Protocol constants shared by every layer of the stack.

/// Magic header present at the start of every Pro DJ Link UDP packet.
pub const PROLINK_HEADER: [u8; 10] = *b"Qspt1WmJOL";

/// UDP port devices broadcast their keep-alive announcements on.
pub const ANNOUNCE_PORT: u16 = 50000;

/// TCP port answering which port the remote database server listens on.
pub const REMOTEDB_SERVER_QUERY_PORT: u16 = 12523;

/// ONC-RPC portmapper port.
pub const PORTMAP_PORT: u16 = 111;

/// Name announced by this process when it joins the network as a virtual CDJ.
///
/// Announcements carrying this name are never tracked as remote devices.
pub const VIRTUAL_CDJ_NAME: &str = "prolink-rs";

/// Device id used for the virtual CDJ unless configured otherwise.
pub const DEFAULT_VCDJ_ID: u8 = 0x07;
