pub(crate) mod client;
pub(crate) mod frame;
pub(crate) mod parse;
pub(crate) mod server;

/// Protocol revision spoken by this server (Java Edition 1.18.2).
pub(crate) const PROTOCOL_VERSION: i32 = 758;
pub(crate) const VERSION_NAME: &str = "1.18.2";
