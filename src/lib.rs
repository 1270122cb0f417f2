//! Core of the nvs Neovim version manager: release resolution and caching,
//! the download/verify/extract install pipeline, source builds, and the
//! on-disk version store with its "current" pointer, all serialized per
//! version by advisory file locks.

pub mod builder;
pub mod cli;
pub mod config;
pub mod consts;
pub mod downloader;
pub mod errors;
pub mod github_requests;
pub mod helpers;
pub mod installer;
pub mod progress;
pub mod releases;
pub mod services;
pub mod store;
pub mod unarchive;
pub mod version;

pub use errors::{Error, Result};
