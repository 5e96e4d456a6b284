//! Generic extraction-and-pagination engine.
//!
//! Selector-driven field extraction, URL construction, ignore filtering
//! and the listing-page walker. Everything here interprets site
//! configuration; nothing is site-specific.

pub mod extract;
pub mod filter;
pub mod http_client;
pub mod pagination;
pub mod url_builder;

pub use extract::{extract, FieldValue, ItemRecord};
pub use filter::should_ignore;
pub use http_client::HttpClient;
pub use pagination::{ItemSink, PageFetcher, PageWalker, ResolvedItem, WalkStats};
pub use url_builder::{absolutize, build_url, format_pattern};
