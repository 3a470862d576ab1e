//! Archive data partitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::MetadataRecord;
use crate::time::{datetime_to_jd, parse_obsdate};

/// One of the four archive data classes, each with its own metadata schema
/// and URL layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Single-exposure science products.
    Science,
    /// Raw camera images.
    Raw,
    /// Calibration products (bias, high-frequency flats).
    Calibration,
    /// Reference (coadded) images, not time indexed.
    Reference,
}

/// How a partition's records are ordered in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorField {
    /// Numeric Julian date in `obsjd`.
    ObsJd,
    /// ISO timestamp string in `startobsdate`.
    StartObsDate,
}

impl CursorField {
    /// Metadata column holding the cursor.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::ObsJd => "obsjd",
            Self::StartObsDate => "startobsdate",
        }
    }
}

impl Partition {
    /// All partitions, in archive order.
    pub const ALL: [Self; 4] = [Self::Science, Self::Raw, Self::Calibration, Self::Reference];

    /// Path segment used by both the metadata and data endpoints.
    #[must_use]
    pub fn as_path(self) -> &'static str {
        match self {
            Self::Science => "sci",
            Self::Raw => "raw",
            Self::Calibration => "cal",
            Self::Reference => "ref",
        }
    }

    /// Field whose maximum marks the most recent ingested record.
    #[must_use]
    pub fn cursor_field(self) -> CursorField {
        match self {
            Self::Science | Self::Raw => CursorField::ObsJd,
            Self::Calibration | Self::Reference => CursorField::StartObsDate,
        }
    }

    /// Cursor value of `record` as a Julian date.
    #[must_use]
    pub fn cursor_jd(self, record: &MetadataRecord) -> Option<f64> {
        match self.cursor_field() {
            CursorField::ObsJd => record.get_f64("obsjd"),
            CursorField::StartObsDate => record
                .get_text("startobsdate")
                .as_deref()
                .and_then(parse_obsdate)
                .map(datetime_to_jd),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Error returned for unrecognized partition names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown partition '{0}': expected one of sci, raw, cal, ref")]
pub struct UnknownPartition(pub String);

impl FromStr for Partition {
    type Err = UnknownPartition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sci" | "science" => Ok(Self::Science),
            "raw" => Ok(Self::Raw),
            "cal" | "calibration" => Ok(Self::Calibration),
            "ref" | "reference" => Ok(Self::Reference),
            other => Err(UnknownPartition(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metadata::FieldValue;

    #[test]
    fn test_partition_parse_accepts_short_and_long_names() {
        assert_eq!("sci".parse::<Partition>().unwrap(), Partition::Science);
        assert_eq!("Calibration".parse::<Partition>().unwrap(), Partition::Calibration);
        assert!("dark".parse::<Partition>().is_err());
    }

    #[test]
    fn test_partition_cursor_fields() {
        assert_eq!(Partition::Raw.cursor_field().column(), "obsjd");
        assert_eq!(Partition::Reference.cursor_field().column(), "startobsdate");
    }

    #[test]
    fn test_cursor_jd_from_startobsdate() {
        let mut record = MetadataRecord::new();
        record.insert("startobsdate", FieldValue::Text("2017-01-01 00:00:00+00".into()));
        let jd = Partition::Calibration.cursor_jd(&record).unwrap();
        assert!((jd - crate::time::NIGHT_EPOCH_JD).abs() < 1e-9);
        assert!(Partition::Science.cursor_jd(&record).is_none());
    }
}
