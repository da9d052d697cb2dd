//! # dirsync server
//!
//! Serves journaled directories over TCP. Clients append with `PUT` and
//! `REM`, and subscribe with `SUB` to receive every later patch as a
//! `PATCH` message on the same connection.
//!
//! ```text
//!  accept loop ──► Connection (one task per peer)
//!                    │  decode ─► ServerContext ─► DirectoryRegistry ─► Directory
//!                    │                                                   │ append
//!                    └─ Subscription push task ◄──── ChangeListener ─────┘
//! ```
//!
//! Replies and patches share one write lock per connection, so a reply is
//! never split by a patch.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod connection;
mod error;
mod handler;
mod server;
pub mod subscription;

pub use auth::{AllowList, Authenticator};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{ServerError, ServerResult};
pub use handler::ServerContext;
pub use server::SyncServer;
pub use subscription::{SharedWriter, Subscription, SubscriptionState};
