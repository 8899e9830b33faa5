#![forbid(unsafe_code)]

//! Async client and chatbot for the CSend machine-mode protocol.
//!
//! [`machine`] is the request/response multiplexer over the child process;
//! [`commands`] and [`bot`] are built on top of it. [`search`] holds the
//! stateless documentation and log helpers used by `csend-ctl`.

pub mod bot;
pub mod commands;
pub mod config;
pub mod errors;
pub mod machine;
pub mod models;
pub mod search;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
