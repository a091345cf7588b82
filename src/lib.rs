//! Connection Manager: a long-lived server that accepts many persistent
//! client connections over a framed binary protocol (TCP or WebSocket) and
//! exposes unicast/multicast/broadcast push. See `SPEC_FULL.md`.

pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod listener;
pub mod pool;
pub mod push;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::CmConfig;
pub use error::{CmError, Result};
pub use frame::{Cmd, Message};
pub use handler::{AuthReply, Handler};
pub use push::Filter;
pub use registry::Registry;
pub use server::{Options, Server};
pub use session::Session;
