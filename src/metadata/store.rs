//! SQLite-backed metadata collections, one per partition.
//!
//! Rows are keyed by `(partition, record_id)`. Re-ingesting a known id is a
//! per-row conflict: it is counted and skipped while the rest of the batch is
//! still written. Every row also carries its cursor as a Julian date so the
//! newest record can be found with an index scan.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};

use super::error::StoreError;
use super::{FieldValue, MetadataRecord, Partition, RecordId};
use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Field names usable inside a JSON path without escaping.
#[allow(clippy::expect_used)]
static FIELD_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("field name regex is valid")
});

/// Outcome of one batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Rows written.
    pub inserted: u64,
    /// Rows skipped because their id was already present.
    pub conflicts: u64,
}

impl InsertReport {
    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.conflicts += other.conflicts;
    }
}

/// Comparison applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Equal to the value.
    Eq(FieldValue),
    /// Not equal to the value.
    Ne(FieldValue),
    /// Strictly greater than the value.
    Gt(FieldValue),
    /// Greater than or equal to the value.
    Ge(FieldValue),
    /// Strictly less than the value.
    Lt(FieldValue),
    /// Less than or equal to the value.
    Le(FieldValue),
    /// Within `[low, high]`.
    Between(FieldValue, FieldValue),
}

impl Comparison {
    /// SQL operator for the single-value comparisons.
    fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "=",
            Self::Ne(_) => "!=",
            Self::Gt(_) => ">",
            Self::Ge(_) => ">=",
            Self::Lt(_) => "<",
            Self::Le(_) => "<=",
            Self::Between(..) => "BETWEEN",
        }
    }
}

/// One `field <comparison>` term of a [`StoreQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Normalized field name.
    pub field: String,
    /// Comparison against the field's value.
    pub comparison: Comparison,
}

impl FromStr for Condition {
    type Err = StoreError;

    /// Parses `name=value`, `name!=value`, `name>value`, `name>=value`,
    /// `name<value`, `name<=value` or `name=low..high`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidCondition(s.to_string());
        let position = s.find(['=', '>', '<', '!']).ok_or_else(invalid)?;
        let field = s[..position].trim();
        let rest = &s[position..];
        let operator = ["!=", ">=", "<=", "=", ">", "<"]
            .into_iter()
            .find(|op| rest.starts_with(op))
            .ok_or_else(invalid)?;
        let value = rest[operator.len()..].trim();
        if field.is_empty() || value.is_empty() || value.starts_with(['=', '>', '<', '!']) {
            return Err(invalid());
        }

        let cell = FieldValue::from_cell(value);
        let comparison = match operator {
            "!=" => Comparison::Ne(cell),
            ">" => Comparison::Gt(cell),
            ">=" => Comparison::Ge(cell),
            "<" => Comparison::Lt(cell),
            "<=" => Comparison::Le(cell),
            _ => match value.split_once("..") {
                Some((low, high)) if !low.is_empty() && !high.is_empty() => {
                    Comparison::Between(FieldValue::from_cell(low), FieldValue::from_cell(high))
                }
                Some(_) => return Err(invalid()),
                None => Comparison::Eq(cell),
            },
        };
        Ok(Self {
            field: super::record::normalize_field_name(field),
            comparison,
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            Comparison::Eq(v) => write!(f, "{}={v}", self.field),
            Comparison::Ne(v) => write!(f, "{}!={v}", self.field),
            Comparison::Gt(v) => write!(f, "{}>{v}", self.field),
            Comparison::Ge(v) => write!(f, "{}>={v}", self.field),
            Comparison::Lt(v) => write!(f, "{}<{v}", self.field),
            Comparison::Le(v) => write!(f, "{}<={v}", self.field),
            Comparison::Between(lo, hi) => write!(f, "{}={lo}..{hi}", self.field),
        }
    }
}

/// Conjunctive filter over stored records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    conditions: Vec<Condition>,
    limit: Option<u32>,
}

impl StoreQuery {
    /// A query matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parsed condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// `field = value`.
    #[must_use]
    pub fn eq(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, Comparison::Eq(value.into()))
    }

    /// `field > value`.
    #[must_use]
    pub fn gt(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, Comparison::Gt(value.into()))
    }

    /// `field < value`.
    #[must_use]
    pub fn lt(self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.push(field, Comparison::Lt(value.into()))
    }

    /// `low <= field <= high`.
    #[must_use]
    pub fn between(
        self,
        field: &str,
        low: impl Into<FieldValue>,
        high: impl Into<FieldValue>,
    ) -> Self {
        self.push(field, Comparison::Between(low.into(), high.into()))
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Conditions in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn push(mut self, field: &str, comparison: Comparison) -> Self {
        self.conditions.push(Condition {
            field: super::record::normalize_field_name(field),
            comparison,
        });
        self
    }
}

/// Persistent per-partition metadata collections.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts every record whose id is not yet stored in `partition`.
    ///
    /// Known ids (including duplicates inside `records`) are counted as
    /// conflicts and skipped; the remaining rows are written in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if a record cannot be serialized and
    /// [`StoreError::Database`] if the transaction fails. Nothing from the
    /// batch is written in either case.
    #[instrument(skip(self, records), fields(partition = %partition, rows = records.len()))]
    pub async fn insert_many(
        &self,
        partition: Partition,
        records: &[MetadataRecord],
    ) -> Result<InsertReport> {
        let mut report = InsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let mut tx = self.db.pool().begin().await?;
        for record in records {
            let record_id = record.id();
            let fields = serde_json::to_string(record).map_err(|e| StoreError::Encode {
                record_id: record_id.to_string(),
                message: e.to_string(),
            })?;

            let result = sqlx::query(
                r"INSERT INTO metadata_records (partition, record_id, cursor, fields)
                  VALUES (?, ?, ?, ?)
                  ON CONFLICT (partition, record_id) DO NOTHING",
            )
            .bind(partition.as_path())
            .bind(record_id.as_str())
            .bind(partition.cursor_jd(record))
            .bind(fields)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                report.conflicts += 1;
            } else {
                report.inserted += 1;
            }
        }
        tx.commit().await?;

        if report.conflicts > 0 {
            debug!(
                inserted = report.inserted,
                conflicts = report.conflicts,
                "skipped records already present"
            );
        }
        Ok(report)
    }

    /// Number of records stored in `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self, partition: Partition) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM metadata_records WHERE partition = ?")
            .bind(partition.as_path())
            .fetch_one(self.db.pool())
            .await?;
        let count: i64 = row.get("n");
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Looks up one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails or
    /// [`StoreError::Corrupt`] if the stored row does not decode.
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn get(
        &self,
        partition: Partition,
        record_id: &RecordId,
    ) -> Result<Option<MetadataRecord>> {
        let row = sqlx::query(
            "SELECT record_id, fields FROM metadata_records WHERE partition = ? AND record_id = ?",
        )
        .bind(partition.as_path())
        .bind(record_id.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| decode_row(&row)).transpose()
    }

    /// Record with the greatest cursor in `partition`.
    ///
    /// Records without a cursor value are never returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails or
    /// [`StoreError::Corrupt`] if the stored row does not decode.
    #[instrument(skip(self))]
    pub async fn latest(&self, partition: Partition) -> Result<Option<MetadataRecord>> {
        let row = sqlx::query(
            r"SELECT record_id, fields FROM metadata_records
              WHERE partition = ? AND cursor IS NOT NULL
              ORDER BY cursor DESC
              LIMIT 1",
        )
        .bind(partition.as_path())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| decode_row(&row)).transpose()
    }

    /// Greatest cursor in `partition`, as a Julian date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn latest_cursor(&self, partition: Partition) -> Result<Option<f64>> {
        let row = sqlx::query("SELECT MAX(cursor) AS latest FROM metadata_records WHERE partition = ?")
            .bind(partition.as_path())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get::<Option<f64>, _>("latest"))
    }

    /// Records in `partition` matching every condition of `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidField`] for an unaddressable field name,
    /// [`StoreError::Database`] if the query fails, or
    /// [`StoreError::Corrupt`] if a stored row does not decode.
    #[instrument(skip(self, query), fields(partition = %partition, conditions = query.conditions.len()))]
    pub async fn query(
        &self,
        partition: Partition,
        query: &StoreQuery,
    ) -> Result<Vec<MetadataRecord>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT record_id, fields FROM metadata_records WHERE partition = ");
        builder.push_bind(partition.as_path());

        for condition in &query.conditions {
            if !FIELD_NAME_PATTERN.is_match(&condition.field) {
                return Err(StoreError::InvalidField(condition.field.clone()));
            }
            let path = format!("$.\"{}\"", condition.field);

            builder.push(" AND json_extract(fields, ");
            builder.push_bind(path);
            match &condition.comparison {
                Comparison::Eq(FieldValue::Null) => {
                    builder.push(") IS NULL");
                }
                Comparison::Ne(FieldValue::Null) => {
                    builder.push(") IS NOT NULL");
                }
                Comparison::Eq(value)
                | Comparison::Ne(value)
                | Comparison::Gt(value)
                | Comparison::Ge(value)
                | Comparison::Lt(value)
                | Comparison::Le(value) => {
                    builder.push(") ");
                    builder.push(condition.comparison.operator());
                    builder.push(" ");
                    push_value(&mut builder, value);
                }
                Comparison::Between(low, high) => {
                    builder.push(") BETWEEN ");
                    push_value(&mut builder, low);
                    builder.push(" AND ");
                    push_value(&mut builder, high);
                }
            }
        }

        builder.push(" ORDER BY cursor ASC, record_id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let rows = builder.build().fetch_all(self.db.pool()).await?;
        rows.iter().map(decode_row).collect()
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &FieldValue) {
    match value {
        FieldValue::Null => {
            builder.push("NULL");
        }
        FieldValue::Int(v) => {
            builder.push_bind(*v);
        }
        FieldValue::Float(v) => {
            builder.push_bind(*v);
        }
        FieldValue::Text(s) => {
            builder.push_bind(s.clone());
        }
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<MetadataRecord> {
    let record_id: String = row.get("record_id");
    let fields: String = row.get("fields");
    serde_json::from_str(&fields).map_err(|e| StoreError::Corrupt {
        record_id,
        message: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store() -> MetadataStore {
        MetadataStore::new(Database::new_in_memory().await.unwrap())
    }

    fn exposure(field: i64, obsjd: f64) -> MetadataRecord {
        MetadataRecord::new()
            .with("field", field)
            .with("ccdid", 9)
            .with("qid", 2)
            .with("filtercode", "zr")
            .with("obsjd", obsjd)
    }

    #[test]
    fn test_condition_parse_forms() {
        let eq: Condition = "field=612".parse().unwrap();
        assert_eq!(eq.comparison, Comparison::Eq(FieldValue::Int(612)));

        let gt: Condition = "obsjd>2458000.5".parse().unwrap();
        assert_eq!(gt.comparison, Comparison::Gt(FieldValue::Float(2_458_000.5)));

        let between: Condition = "ccdid=1..4".parse().unwrap();
        assert_eq!(
            between.comparison,
            Comparison::Between(FieldValue::Int(1), FieldValue::Int(4))
        );

        let dotted: Condition = "ra.deg<10".parse().unwrap();
        assert_eq!(dotted.field, "ra-deg");
    }

    #[test]
    fn test_condition_parse_two_character_operators() {
        let cases = [
            ("obsjd>=2458000", Comparison::Ge(FieldValue::Int(2_458_000))),
            ("obsjd<=2458000", Comparison::Le(FieldValue::Int(2_458_000))),
            ("filtercode!=zg", Comparison::Ne(FieldValue::Text("zg".into()))),
            ("obsjd>2458000", Comparison::Gt(FieldValue::Int(2_458_000))),
            ("obsjd<2458000", Comparison::Lt(FieldValue::Int(2_458_000))),
            ("field = 612", Comparison::Eq(FieldValue::Int(612))),
        ];
        for (raw, expected) in cases {
            let condition: Condition = raw.parse().unwrap();
            assert_eq!(condition.comparison, expected, "{raw}");
            assert_eq!(condition.to_string().replace(' ', ""), raw.replace(' ', ""));
        }
    }

    #[test]
    fn test_condition_parse_rejects_stray_operators() {
        for raw in ["obsjd=>5", "obsjd>>5", "obsjd<>5", "obsjd!5", "obsjd==5"] {
            assert!(raw.parse::<Condition>().is_err(), "{raw}");
        }
    }

    #[test]
    fn test_condition_parse_rejects_malformed() {
        assert!("field".parse::<Condition>().is_err());
        assert!("=3".parse::<Condition>().is_err());
        assert!("ccdid=1..".parse::<Condition>().is_err());
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trip() {
        let store = store().await;
        let record = exposure(612, 2_458_063.5);
        let report = store
            .insert_many(Partition::Science, std::slice::from_ref(&record))
            .await
            .unwrap();
        assert_eq!(report, InsertReport { inserted: 1, conflicts: 0 });

        let back = store
            .get(Partition::Science, &record.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back, record);
        assert!(store.get(Partition::Raw, &record.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinsert_counts_conflicts_and_keeps_new_rows() {
        let store = store().await;
        let first = exposure(1, 2_458_000.5);
        let second = exposure(2, 2_458_001.5);
        store
            .insert_many(Partition::Science, std::slice::from_ref(&first))
            .await
            .unwrap();

        let report = store
            .insert_many(Partition::Science, &[first.clone(), second, first])
            .await
            .unwrap();

        assert_eq!(report, InsertReport { inserted: 1, conflicts: 2 });
        assert_eq!(store.count(Partition::Science).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let store = store().await;
        let record = exposure(1, 2_458_000.5);
        store
            .insert_many(Partition::Science, std::slice::from_ref(&record))
            .await
            .unwrap();
        let report = store
            .insert_many(Partition::Raw, std::slice::from_ref(&record))
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_latest_orders_by_cursor() {
        let store = store().await;
        store
            .insert_many(
                Partition::Science,
                &[
                    exposure(1, 2_458_010.5),
                    exposure(2, 2_458_030.5),
                    exposure(3, 2_458_020.5),
                ],
            )
            .await
            .unwrap();

        let latest = store.latest(Partition::Science).await.unwrap().unwrap();
        assert_eq!(latest.get_i64("field"), Some(2));
        let cursor = store.latest_cursor(Partition::Science).await.unwrap().unwrap();
        assert!((cursor - 2_458_030.5).abs() < 1e-9);
        assert!(store.latest(Partition::Raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_uses_startobsdate_for_calibration() {
        let store = store().await;
        let older = MetadataRecord::new()
            .with("filestartdate", 20_180_101)
            .with("startobsdate", "2018-01-01 01:00:00+00");
        let newer = MetadataRecord::new()
            .with("filestartdate", 20_180_301)
            .with("startobsdate", "2018-03-01 01:00:00+00");
        store
            .insert_many(Partition::Calibration, &[newer.clone(), older])
            .await
            .unwrap();

        let latest = store.latest(Partition::Calibration).await.unwrap().unwrap();
        assert_eq!(latest, newer);
    }

    #[tokio::test]
    async fn test_query_filters_and_limits() {
        let store = store().await;
        store
            .insert_many(
                Partition::Science,
                &[
                    exposure(612, 2_458_010.5),
                    exposure(612, 2_458_020.5),
                    exposure(700, 2_458_030.5),
                ],
            )
            .await
            .unwrap();

        let by_field = store
            .query(Partition::Science, &StoreQuery::new().eq("field", 612))
            .await
            .unwrap();
        assert_eq!(by_field.len(), 2);

        let ranged = store
            .query(
                Partition::Science,
                &StoreQuery::new().between("obsjd", 2_458_015.0, 2_458_035.0),
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let text = store
            .query(Partition::Science, &StoreQuery::new().eq("filtercode", "zr").limit(1))
            .await
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].get_f64("obsjd"), Some(2_458_010.5));

        let newer = store
            .query(Partition::Science, &StoreQuery::new().gt("obsjd", 2_458_025.0))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
    }

    #[tokio::test]
    async fn test_query_inclusive_bounds_and_not_equal() {
        let store = store().await;
        store
            .insert_many(
                Partition::Science,
                &[
                    exposure(612, 2_458_010.5),
                    exposure(612, 2_458_020.5),
                    exposure(700, 2_458_030.5),
                ],
            )
            .await
            .unwrap();
        let run = |raw: &str| {
            let query = StoreQuery::new().with_condition(raw.parse().unwrap());
            let store = store.clone();
            async move { store.query(Partition::Science, &query).await.unwrap().len() }
        };

        assert_eq!(run("obsjd>=2458020.5").await, 2);
        assert_eq!(run("obsjd<=2458020.5").await, 2);
        assert_eq!(run("obsjd>2458020.5").await, 1);
        assert_eq!(run("field!=612").await, 1);
    }

    #[tokio::test]
    async fn test_query_rejects_unsafe_field_names() {
        let store = store().await;
        let query = StoreQuery::new().eq("field\") OR 1=1 --", 1);
        let err = store.query(Partition::Science, &query).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = store().await;
        let report = store.insert_many(Partition::Science, &[]).await.unwrap();
        assert_eq!(report, InsertReport::default());
    }
}
