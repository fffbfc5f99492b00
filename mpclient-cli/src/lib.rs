//! Management point client: transport, key store, policy resolution, local
//! secret recovery and the membership waiter behind the `mpclient` binary.

pub mod commands;
pub mod config;
pub mod error;
pub mod local;
pub mod output;
pub mod recovered;
pub mod remote_query;
pub mod resolver;
pub mod shutdown;
pub mod store;
pub mod tls;
pub mod transport;
pub mod waiter;

pub use error::{ClientError, ErrorKind};
