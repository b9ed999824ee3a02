//! dlstate Core - Download Lifecycle Delegate
//!
//! This crate sits between a download engine and the rest of an application.
//! It turns engine events into durable status updates, policy-driven cleanup
//! and ordered listener notifications.

mod cleanup;
mod delegate;
mod dispatcher;
mod error;
mod files;
mod store;

pub use cleanup::*;
pub use delegate::*;
pub use dispatcher::*;
pub use error::*;
pub use files::*;
pub use store::*;

pub use dlstate_types as types;
