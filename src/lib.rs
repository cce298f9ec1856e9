#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod email;
pub mod error;
pub mod tracing;
pub mod worker;
