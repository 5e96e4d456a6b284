//! siterip - configuration-driven site scraper and downloader.
//!
//! All site knowledge lives in YAML config: URL patterns, CSS selectors,
//! pagination rules and the download command. The crate is a generic
//! interpreter that walks listing pages, extracts detail records,
//! filters them and hands content URLs to external download tools.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod scrape;
pub mod transfer;
pub mod vpn;
