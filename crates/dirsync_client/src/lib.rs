//! # dirsync client
//!
//! Keeps local replicas of server directories and lets an application write
//! to them optimistically.
//!
//! A replica only ever advances through patches pushed by the server, in
//! order, so its versions are the server's versions. Local writes are held
//! as speculative records by a [`Reconciler`] until the server confirms
//! them; when the confirming patch arrives the [`PatchApplier`] stores the
//! authoritative record with a `localid` field naming the placeholder it
//! replaced.
//!
//! ```text
//!  put/remove ──► Reconciler (pending) ──► PUT/REM ──► server
//!                      │ confirm(seq, central)            │
//!                      ▼                                  ▼ PATCH
//!                 mapping central -> local ◄── PatchApplier ──► replica Directory
//! ```
//!
//! Remote patches are not applied while any local write awaits its reply.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod client;
mod config;
mod error;
mod reconcile;

pub use applier::PatchApplier;
pub use client::SyncClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use reconcile::{LocalVersion, Reconciler};
