#![forbid(unsafe_code)]

//! Search Bilibili for popular videos and save their Chinese subtitles as
//! time-indexed Markdown transcripts.
//!
//! The pipeline is layered: [`batch`] fans ids out over worker threads,
//! [`fetch`] runs the per-video stages, [`client`] talks to the platform
//! through a shared [`rate_limit::RateLimiter`], and [`transcode`] renders the
//! downloaded payload.

pub mod batch;
pub mod client;
pub mod config;
pub mod fetch;
pub mod metadata;
pub mod rate_limit;
pub mod search;
pub mod transcode;

#[cfg(test)]
mod testing;
