#![forbid(unsafe_code)]

//! Finds new short-form uploads on a channel, downloads the best video and
//! audio streams, muxes them, and remembers what it already fetched.

pub mod acquire;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod process;
pub mod streams;
