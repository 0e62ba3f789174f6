//! Composable second-level query cache for data-mapper runtimes.
//!
//! The [`cache`] module holds the library proper; [`config`], [`infra`] and
//! [`application`] back the `mapcache` binary.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
