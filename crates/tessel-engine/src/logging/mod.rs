//! Logger bootstrap for hosts embedding the engine.
//!
//! The engine itself only talks to the `log` facade; this is a convenience for
//! binaries and tests that want output.

mod init;

pub use init::{init_logging, LoggingConfig};
