//! Post-download integrity checks.
//!
//! Files whose name contains `.fits` must open as FITS: a primary header of
//! 80-byte printable cards beginning with `SIMPLE  =` set to `T`, an `END`
//! card, and a total size that is a whole number of 2880-byte blocks. Other
//! files are accepted as-is.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// FITS logical record size.
pub const FITS_BLOCK: usize = 2880;

const CARD: usize = 80;
const CARDS_PER_BLOCK: usize = FITS_BLOCK / CARD;

/// Why a file failed its integrity check.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The file could not be opened or read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file size is not a positive multiple of the FITS block size.
    #[error("{path} is truncated: {size} bytes is not a whole number of 2880-byte blocks")]
    Truncated {
        /// File path.
        path: PathBuf,
        /// Size on disk.
        size: u64,
    },

    /// The primary header is malformed.
    #[error("{path} is not a valid FITS file: {reason}")]
    NotFits {
        /// File path.
        path: PathBuf,
        /// What was wrong.
        reason: &'static str,
    },
}

/// Result of checking a set of files.
#[derive(Debug, Default)]
pub struct IntegrityReport {
    /// Files that passed (or needed no check).
    pub confirmed: BTreeSet<PathBuf>,
    /// Files that failed, with the reason.
    pub failures: Vec<(PathBuf, IntegrityError)>,
}

impl IntegrityReport {
    /// Returns true when `path` passed.
    #[must_use]
    pub fn is_confirmed(&self, path: &Path) -> bool {
        self.confirmed.contains(path)
    }
}

/// Returns true for names the FITS probe applies to.
#[must_use]
pub fn is_fits_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(".fits"))
}

/// Checks every path, logging failures instead of raising them.
pub fn verify<I, P>(paths: I) -> IntegrityReport
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut report = IntegrityReport::default();
    for path in paths {
        let path = path.as_ref();
        match check_file(path) {
            Ok(()) => {
                report.confirmed.insert(path.to_path_buf());
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "integrity check failed");
                report.failures.push((path.to_path_buf(), error));
            }
        }
    }
    debug!(
        confirmed = report.confirmed.len(),
        failed = report.failures.len(),
        "integrity check complete"
    );
    report
}

/// Checks one file.
///
/// # Errors
///
/// Returns an [`IntegrityError`] describing the first problem found.
pub fn check_file(path: &Path) -> Result<(), IntegrityError> {
    if !is_fits_name(path) {
        return Ok(());
    }
    probe_fits(path)
}

fn probe_fits(path: &Path) -> Result<(), IntegrityError> {
    let io_err = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let not_fits = |reason| IntegrityError::NotFits {
        path: path.to_path_buf(),
        reason,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    if size == 0 || size % FITS_BLOCK as u64 != 0 {
        return Err(IntegrityError::Truncated {
            path: path.to_path_buf(),
            size,
        });
    }

    let mut block = [0_u8; FITS_BLOCK];
    let mut first_block = true;
    loop {
        match file.read_exact(&mut block) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(not_fits("no END card in primary header"));
            }
            Err(e) => return Err(io_err(e)),
        }

        if first_block {
            check_simple_card(&block[..CARD]).map_err(not_fits)?;
            first_block = false;
        }

        for index in 0..CARDS_PER_BLOCK {
            let card = &block[index * CARD..(index + 1) * CARD];
            if !card.iter().all(|b| (0x20..=0x7e).contains(b)) {
                return Err(not_fits("header contains non-ASCII bytes"));
            }
            if card.starts_with(b"END") && card[3..8].iter().all(|b| *b == b' ') {
                return Ok(());
            }
        }
    }
}

fn check_simple_card(card: &[u8]) -> Result<(), &'static str> {
    if !card.starts_with(b"SIMPLE  =") {
        return Err("first card is not SIMPLE");
    }
    let value = std::str::from_utf8(&card[10..30]).map_err(|_| "SIMPLE value is not ASCII")?;
    if value.trim() != "T" {
        return Err("SIMPLE is not T");
    }
    Ok(())
}
