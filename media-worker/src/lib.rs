//! Media-acquisition worker library.
//!
//! A long-running subprocess that accepts line-delimited JSON commands on
//! stdin, drives the extractor as a child process per job, streams typed
//! progress frames on stdout, and persists artifacts into a
//! content-addressed storage pool shared across users.

pub mod cache;
pub mod config;
pub mod context;
pub mod cookies;
pub mod database;
pub mod error;
pub mod handlers;
pub mod ipc;
pub mod logging;
pub mod storage;
pub mod upload;
pub mod utils;

pub use error::{Error, Result};
