//! Archive transport: metadata tables and data files.

mod client;
mod error;
mod table;

pub use client::{FileSource, Fetcher, TableSource, build_http_client, default_user_agent};
pub use error::FetchError;
pub use table::parse_table;
