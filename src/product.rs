//! Product types available per archive file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::metadata::Partition;

/// A file type within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProductKind {
    /// Calibrated science image.
    SciImg,
    /// Bad-pixel mask.
    MskImg,
    /// PSF-fit catalog.
    PsfCat,
    /// Aperture (SExtractor) catalog.
    SexCat,
    /// DAOPhot PSF model.
    SciImgDao,
    /// DAOPhot PSF centroids.
    SciImgDaoPsfCent,
    /// Difference-image PSF.
    DiffImgPsf,
    /// Reference-subtracted difference image.
    SciMRefDiffImg,
    /// Science pipeline log.
    SciImLog,
    /// Difference pipeline log.
    DiffImLog,
    /// Generic log.
    Log,
    /// Bias frame.
    Bias,
    /// Bias uncertainty.
    BiasUnc,
    /// Bias mask.
    BiasCMask,
    /// Bias pipeline log.
    BiasLog,
    /// High-frequency flat.
    HiFreqFlat,
    /// High-frequency flat uncertainty.
    HiFreqFlatUnc,
    /// High-frequency flat pipeline log.
    HiFreqFlatLog,
    /// Raw on-sky exposure (`o`).
    RawObject,
    /// Raw bias exposure (`b`).
    RawBias,
    /// Raw dark exposure (`d`).
    RawDark,
    /// Raw dome flat (`f`).
    RawFlat,
    /// Raw focus exposure (`c`).
    RawFocus,
    /// Raw guider exposure (`g`).
    RawGuider,
    /// Reference image.
    RefImg,
}

impl ProductKind {
    /// Every product, in tag order.
    pub const ALL: [Self; 25] = [
        Self::SciImg,
        Self::MskImg,
        Self::PsfCat,
        Self::SexCat,
        Self::SciImgDao,
        Self::SciImgDaoPsfCent,
        Self::DiffImgPsf,
        Self::SciMRefDiffImg,
        Self::SciImLog,
        Self::DiffImLog,
        Self::Log,
        Self::Bias,
        Self::BiasUnc,
        Self::BiasCMask,
        Self::BiasLog,
        Self::HiFreqFlat,
        Self::HiFreqFlatUnc,
        Self::HiFreqFlatLog,
        Self::RawObject,
        Self::RawBias,
        Self::RawDark,
        Self::RawFlat,
        Self::RawFocus,
        Self::RawGuider,
        Self::RefImg,
    ];

    /// Tag used in file names and on the command line.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::SciImg => "sciimg",
            Self::MskImg => "mskimg",
            Self::PsfCat => "psfcat",
            Self::SexCat => "sexcat",
            Self::SciImgDao => "sciimgdao",
            Self::SciImgDaoPsfCent => "sciimgdaopsfcent",
            Self::DiffImgPsf => "diffimgpsf",
            Self::SciMRefDiffImg => "scimrefdiffimg",
            Self::SciImLog => "sciimlog",
            Self::DiffImLog => "diffimlog",
            Self::Log => "log",
            Self::Bias => "bias",
            Self::BiasUnc => "biasunc",
            Self::BiasCMask => "biascmask",
            Self::BiasLog => "biaslog",
            Self::HiFreqFlat => "hifreqflat",
            Self::HiFreqFlatUnc => "hifreqflatunc",
            Self::HiFreqFlatLog => "hifreqflatlog",
            Self::RawObject => "o",
            Self::RawBias => "b",
            Self::RawDark => "d",
            Self::RawFlat => "f",
            Self::RawFocus => "c",
            Self::RawGuider => "g",
            Self::RefImg => "refimg",
        }
    }

    /// Partition whose URL layout this product follows.
    #[must_use]
    pub fn partition(self) -> Partition {
        match self {
            Self::RefImg => Partition::Reference,
            Self::Bias
            | Self::BiasUnc
            | Self::BiasCMask
            | Self::BiasLog
            | Self::HiFreqFlat
            | Self::HiFreqFlatUnc
            | Self::HiFreqFlatLog => Partition::Calibration,
            Self::RawObject
            | Self::RawBias
            | Self::RawDark
            | Self::RawFlat
            | Self::RawFocus
            | Self::RawGuider => Partition::Raw,
            _ => Partition::Science,
        }
    }

    /// Bias-family calibration product.
    #[must_use]
    pub fn is_bias(self) -> bool {
        matches!(
            self,
            Self::Bias | Self::BiasUnc | Self::BiasCMask | Self::BiasLog
        )
    }

    /// Plain-text pipeline log.
    #[must_use]
    pub fn is_log(self) -> bool {
        matches!(
            self,
            Self::SciImLog | Self::DiffImLog | Self::Log | Self::BiasLog | Self::HiFreqFlatLog
        )
    }

    /// File extension the archive serves this product with.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            _ if self.is_log() => ".txt",
            Self::SciImgDao => ".psf",
            Self::SciMRefDiffImg => ".fits.fz",
            _ if self.partition() == Partition::Raw => ".fits.fz",
            _ => ".fits",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned for unrecognized product tags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown product '{0}'")]
pub struct UnknownProduct(pub String);

impl FromStr for ProductKind {
    type Err = UnknownProduct;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| UnknownProduct(tag.to_string()))
    }
}

impl TryFrom<String> for ProductKind {
    type Error = UnknownProduct;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProductKind> for String {
    fn from(value: ProductKind) -> Self {
        value.tag().to_string()
    }
}
