//! Archive metadata queries.
//!
//! A [`MetaQuery`] renders to the archive's search URL:
//! `{meta_url}/{partition}/?WHERE=<predicate>&ct=csv`, or with a leading
//! `POS=ra,dec` for cone searches. Spaces inside predicates are sent as `+`.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use super::Partition;
use crate::time::{NightCursor, format_obsdate};

/// A literal on the right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer literal.
    Int(i64),
    /// Float literal, rendered with full precision.
    Float(f64),
    /// Quoted string literal.
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// Predicate grammar understood by the archive's `WHERE` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field=value`
    Eq(String, Literal),
    /// `field>value`
    Gt(String, Literal),
    /// `field>=value`
    Ge(String, Literal),
    /// `field<value`
    Lt(String, Literal),
    /// `field<=value`
    Le(String, Literal),
    /// `field BETWEEN low AND high`, inclusive.
    Between(String, Literal, Literal),
    /// Conjunction of the inner predicates.
    And(Vec<Predicate>),
}

impl Predicate {
    /// Renders the predicate with spaces, as the archive documents it.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Eq(field, v) => format!("{field}={v}"),
            Self::Gt(field, v) => format!("{field}>{v}"),
            Self::Ge(field, v) => format!("{field}>={v}"),
            Self::Lt(field, v) => format!("{field}<{v}"),
            Self::Le(field, v) => format!("{field}<={v}"),
            Self::Between(field, lo, hi) => format!("{field} BETWEEN {lo} AND {hi}"),
            Self::And(parts) => parts
                .iter()
                .map(Self::render)
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// Time restriction for positional searches.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeWindow {
    /// No restriction.
    All,
    /// Observations newer than `now - days`.
    LastDays(f64),
    /// Every observation taken on one calendar date (matched on `filefracday`).
    Night(NaiveDate),
    /// `obsjd BETWEEN start AND end`.
    Between {
        /// Start Julian date.
        start_jd: f64,
        /// End Julian date.
        end_jd: f64,
    },
}

/// One request against the archive's metadata search endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaQuery {
    partition: Partition,
    position: Option<(f64, f64)>,
    predicate: Option<Predicate>,
}

impl MetaQuery {
    /// A `WHERE` query against one partition.
    #[must_use]
    pub fn new(partition: Partition, predicate: Predicate) -> Self {
        Self {
            partition,
            position: None,
            predicate: Some(predicate),
        }
    }

    /// Every record from a single night.
    #[must_use]
    pub fn night(partition: Partition, night: NightCursor) -> Self {
        Self::new(partition, Predicate::Eq("nid".into(), Literal::Int(night.value())))
    }

    /// Records with `start <= nid < end`.
    #[must_use]
    pub fn night_range(partition: Partition, start: NightCursor, end: NightCursor) -> Self {
        Self::new(
            partition,
            Predicate::And(vec![
                Predicate::Ge("nid".into(), Literal::Int(start.value())),
                Predicate::Lt("nid".into(), Literal::Int(end.value())),
            ]),
        )
    }

    /// Records whose cursor field falls in `[start, end]`.
    ///
    /// Science and raw partitions are filtered on `obsjd`; calibration and
    /// reference partitions on `startobsdate`.
    #[must_use]
    pub fn time_range(partition: Partition, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let predicate = match partition {
            Partition::Science | Partition::Raw => Predicate::Between(
                "obsjd".into(),
                Literal::Float(crate::time::datetime_to_jd(start)),
                Literal::Float(crate::time::datetime_to_jd(end)),
            ),
            Partition::Calibration | Partition::Reference => Predicate::Between(
                "startobsdate".into(),
                Literal::Text(format_obsdate(start)),
                Literal::Text(format_obsdate(end)),
            ),
        };
        Self::new(partition, predicate)
    }

    /// Cone search around a sky position (degrees), optionally time limited.
    #[must_use]
    pub fn position(
        partition: Partition,
        ra: f64,
        dec: f64,
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Self {
        let predicate = match window {
            TimeWindow::All => None,
            TimeWindow::LastDays(days) => {
                let reference = crate::time::datetime_to_jd(now) - days;
                Some(Predicate::Gt("obsjd".into(), Literal::Float(reference)))
            }
            TimeWindow::Night(date) => {
                let day_start = (i64::from(date.year()) * 10_000
                    + i64::from(date.month()) * 100
                    + i64::from(date.day()))
                    * 1_000_000;
                Some(Predicate::And(vec![
                    Predicate::Ge("filefracday".into(), Literal::Int(day_start)),
                    Predicate::Le("filefracday".into(), Literal::Int(day_start + 999_999)),
                ]))
            }
            TimeWindow::Between { start_jd, end_jd } => Some(Predicate::Between(
                "obsjd".into(),
                Literal::Float(*start_jd),
                Literal::Float(*end_jd),
            )),
        };
        Self {
            partition,
            position: Some((ra, dec)),
            predicate,
        }
    }

    /// Partition this query targets.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Predicate, if any.
    #[must_use]
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Full search URL under `meta_url`.
    #[must_use]
    pub fn to_url(&self, meta_url: &str) -> String {
        let mut params = Vec::with_capacity(3);
        if let Some((ra, dec)) = self.position {
            params.push(format!("POS={ra:.5},{dec:.5}"));
        }
        if let Some(predicate) = &self.predicate {
            params.push(format!("WHERE={}", predicate.render().replace(' ', "+")));
        }
        params.push("ct=csv".to_string());
        format!(
            "{}/{}/?{}",
            meta_url.trim_end_matches('/'),
            self.partition.as_path(),
            params.join("&")
        )
    }
}

impl fmt::Display for MetaQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.partition)?;
        if let Some((ra, dec)) = self.position {
            write!(f, " POS={ra:.5},{dec:.5}")?;
        }
        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {}", predicate.render())?;
        }
        Ok(())
    }
}
