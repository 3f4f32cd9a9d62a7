#![forbid(unsafe_code)]

//! Subscription-driven media downloads: presets composed from YAML, a small
//! formatter language, a plugin chain and an archive that keeps runs
//! idempotent.

pub mod archive;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod entries;
pub mod error;
pub mod ffmpeg;
pub mod file_handler;
pub mod logging;
pub mod plugins;
pub mod preset;
pub mod script;
pub mod subscription;
pub mod system;
pub mod transaction_log;
pub mod validators;
