//! The Chainfix Library
//!
//! This crate contains all the moving parts of chainfix. The application
//! itself, via `main.rs`, is only a very tiny frontend.
//!
//! The heart of the crate is the [`Fixer`][fixer::Fixer]: a pool of
//! worker threads that take a leaf certificate with a possibly incomplete
//! chain, fetch missing issuers via the Authority Information Access
//! URLs, and emit every chain that verifies up to a trusted root.

pub use self::config::Config;
pub use self::error::ExitError;
pub use self::operation::Operation;

pub mod cache;
pub mod cert;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fix;
pub mod fixer;
pub mod ledger;
pub mod log;
pub mod metrics;
pub mod operation;
pub mod output;
pub mod utils;
pub mod verify;
