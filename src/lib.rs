//! Bulk downloader for the photo album of a Weibo account.
//!
//! [`engine`] holds the run machinery (discovery, the worker pool, pause and
//! stop control); [`weibo`] talks to weibo.com and its image mirrors.

pub mod engine;
pub mod weibo;
