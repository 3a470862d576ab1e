//! Archive metadata: partitions, records, remote queries and the local store.
//!
//! # Overview
//!
//! - [`Partition`] - the four archive data classes and their cursor fields
//! - [`MetadataRecord`] - one row of a metadata table with a canonical [`RecordId`]
//! - [`MetaQuery`] - a request against the archive's search endpoint
//! - [`MetadataStore`] - SQLite-backed per-partition collections
//!
//! # Example
//!
//! ```no_run
//! use irsa_sync_core::Database;
//! use irsa_sync_core::metadata::{MetadataStore, Partition, StoreQuery};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetadataStore::new(Database::new_in_memory().await?);
//! let rows = store
//!     .query(Partition::Science, &StoreQuery::new().eq("field", 612).limit(10))
//!     .await?;
//! println!("{} records", rows.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod partition;
mod query;
mod record;
mod store;

pub use error::StoreError;
pub use partition::{CursorField, Partition, UnknownPartition};
pub use query::{Literal, MetaQuery, Predicate, TimeWindow};
pub use record::{ARCHIVE_ID_FIELD, FieldValue, MetadataRecord, RecordId, normalize_field_name};
pub use store::{Comparison, Condition, InsertReport, MetadataStore, StoreQuery};
