//! Metadata record to data-file URL resolution.
//!
//! Every product lives at
//! `{data_url}/{partition}/{yyyy}/{mmdd}/{path}` except reference images,
//! which are laid out by field and have no date component. Resolution is a
//! pure function of the record, the product and the data endpoint.

use thiserror::Error;
use tracing::trace;

use crate::config::ArchiveConfig;
use crate::metadata::{MetadataRecord, Partition};
use crate::product::{ProductKind, UnknownProduct};
use crate::time::{DateParts, parse_filefracday, parse_filestartdate};

/// Errors that can occur while building a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The product tag is not one the archive serves.
    #[error(transparent)]
    UnknownProduct(#[from] UnknownProduct),

    /// A field the URL template needs is absent or null.
    #[error("record is missing field '{field}' required for {product}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// Product being resolved.
        product: ProductKind,
    },

    /// A field is present but its value cannot be used in the URL.
    #[error("record field '{field}' has unusable value '{value}'")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Value as found in the record.
        value: String,
    },
}

impl ResolveError {
    fn missing(field: &'static str, product: ProductKind) -> Self {
        Self::MissingField { field, product }
    }

    fn invalid(field: &'static str, record: &MetadataRecord) -> Self {
        Self::InvalidField {
            field,
            value: record
                .get(field)
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }
}

/// Builds data-file URLs under one archive's data endpoint.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    data_url: String,
}

impl UrlResolver {
    /// Resolver for the configured data endpoint.
    #[must_use]
    pub fn new(config: &ArchiveConfig) -> Self {
        Self::with_data_url(config.data_url())
    }

    /// Resolver for an explicit data endpoint.
    #[must_use]
    pub fn with_data_url(data_url: &str) -> Self {
        Self {
            data_url: data_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of `product` for the file described by `record`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MissingField`] when a field the template needs
    /// is absent and [`ResolveError::InvalidField`] when it cannot be used.
    pub fn resolve(
        &self,
        record: &MetadataRecord,
        product: ProductKind,
    ) -> Result<String, ResolveError> {
        let url = match product.partition() {
            Partition::Reference => self.reference_url(record, product)?,
            partition => {
                let date = extract_date(record, product)?;
                let path = match partition {
                    Partition::Calibration => calibration_path(record, product, &date)?,
                    Partition::Raw => raw_path(record, product, &date)?,
                    _ => science_path(record, product, &date)?,
                };
                format!(
                    "{}/{}/{}/{}/{}",
                    self.data_url,
                    partition.as_path(),
                    date.year,
                    date.month_day(),
                    path
                )
            }
        };
        trace!(product = %product, url = %url, "resolved data url");
        Ok(url)
    }

    /// Like [`resolve`](Self::resolve), parsing the product tag first.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownProduct`] for an unrecognized tag, and
    /// otherwise the same errors as [`resolve`](Self::resolve).
    pub fn resolve_tag(&self, record: &MetadataRecord, tag: &str) -> Result<String, ResolveError> {
        self.resolve(record, tag.parse()?)
    }

    fn reference_url(
        &self,
        record: &MetadataRecord,
        product: ProductKind,
    ) -> Result<String, ResolveError> {
        let field = format!("{:06}", int_field(record, "field", product)?);
        let filter = text_field(record, "filtercode", product)?;
        let ccd = int_field(record, "ccdid", product)?;
        let qid = int_field(record, "qid", product)?;
        Ok(format!(
            "{}/ref/{}/field{field}/{filter}/ccd{ccd:02}/q{qid}/ztf_{field}_{filter}_c{ccd:02}_q{qid}_{}{}",
            self.data_url,
            &field[..3],
            product.tag(),
            product.extension()
        ))
    }
}

/// Resolves against the default archive endpoint.
///
/// # Errors
///
/// See [`UrlResolver::resolve`].
pub fn resolve(record: &MetadataRecord, product: ProductKind) -> Result<String, ResolveError> {
    UrlResolver::new(&ArchiveConfig::default()).resolve(record, product)
}

/// Date of the file, from `filestartdate`, `filefracday` or `nightdate` in
/// that order of preference.
fn extract_date(record: &MetadataRecord, product: ProductKind) -> Result<DateParts, ResolveError> {
    if let Some(value) = record.get_text("filestartdate") {
        return parse_filestartdate(&value).ok_or_else(|| ResolveError::invalid("filestartdate", record));
    }
    if let Some(value) = record.get_text("filefracday") {
        return parse_filefracday(&value).ok_or_else(|| ResolveError::invalid("filefracday", record));
    }
    if let Some(value) = record.get_text("nightdate") {
        return parse_filestartdate(&value).ok_or_else(|| ResolveError::invalid("nightdate", record));
    }
    let field = match product.partition() {
        Partition::Calibration => "filestartdate",
        _ => "filefracday",
    };
    Err(ResolveError::missing(field, product))
}

fn calibration_path(
    record: &MetadataRecord,
    product: ProductKind,
    date: &DateParts,
) -> Result<String, ResolveError> {
    let ccd = int_field(record, "ccdid", product)?;
    let qid = int_field(record, "qid", product)?;
    let ymd = date.ymd();
    let (tag, ext) = (product.tag(), product.extension());
    if product.is_bias() {
        Ok(format!(
            "bias/00/ccd{ccd:02}/q{qid}/ztf_{ymd}_00_c{ccd:02}_q{qid}_{tag}{ext}"
        ))
    } else {
        let filter = text_field(record, "filtercode", product)?;
        Ok(format!(
            "hifreqflat/{filter}/ccd{ccd:02}/q{qid}/ztf_{ymd}_{filter}_c{ccd:02}_q{qid}_{tag}{ext}"
        ))
    }
}

fn raw_path(
    record: &MetadataRecord,
    product: ProductKind,
    date: &DateParts,
) -> Result<String, ResolveError> {
    let fraction = date
        .fraction
        .as_deref()
        .ok_or_else(|| ResolveError::missing("filefracday", product))?;
    let ccd = int_field(record, "ccdid", product)?;
    let filter = match product {
        ProductKind::RawDark => "dk".to_string(),
        ProductKind::RawBias => "bi".to_string(),
        _ => text_field(record, "filtercode", product)?,
    };
    let field = match product {
        ProductKind::RawFlat => 0,
        _ => int_field(record, "field", product)?,
    };
    Ok(format!(
        "{fraction}/ztf_{}{fraction}_{field:06}_{filter}_c{ccd:02}_{}{}",
        date.ymd(),
        product.tag(),
        product.extension()
    ))
}

fn science_path(
    record: &MetadataRecord,
    product: ProductKind,
    date: &DateParts,
) -> Result<String, ResolveError> {
    let fraction = date
        .fraction
        .as_deref()
        .ok_or_else(|| ResolveError::missing("filefracday", product))?;
    let field = int_field(record, "field", product)?;
    let filter = text_field(record, "filtercode", product)?;
    let ccd = int_field(record, "ccdid", product)?;
    let imgtype = text_field(record, "imgtypecode", product)?;
    let qid = int_field(record, "qid", product)?;
    Ok(format!(
        "{fraction}/ztf_{}{fraction}_{field:06}_{filter}_c{ccd:02}_{imgtype}_q{qid}_{}{}",
        date.ymd(),
        product.tag(),
        product.extension()
    ))
}

fn int_field(
    record: &MetadataRecord,
    field: &'static str,
    product: ProductKind,
) -> Result<i64, ResolveError> {
    let value = record
        .get(field)
        .ok_or_else(|| ResolveError::missing(field, product))?;
    match value.as_i64() {
        Some(v) if v >= 0 => Ok(v),
        _ => Err(ResolveError::invalid(field, record)),
    }
}

fn text_field(
    record: &MetadataRecord,
    field: &'static str,
    product: ProductKind,
) -> Result<String, ResolveError> {
    let value = record
        .get_text(field)
        .ok_or_else(|| ResolveError::missing(field, product))?;
    if value.is_empty() || value.contains(['/', ' ']) {
        return Err(ResolveError::invalid(field, record));
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metadata::FieldValue;

    const DATA: &str = "https://irsa.ipac.caltech.edu/ibe/data/ztf/products";

    fn resolver() -> UrlResolver {
        UrlResolver::with_data_url(DATA)
    }

    fn science_row() -> MetadataRecord {
        MetadataRecord::new()
            .with("filefracday", 20_171_105_123_456_i64)
            .with("field", 612)
            .with("filtercode", "zr")
            .with("ccdid", 9)
            .with("imgtypecode", "o")
            .with("qid", 2)
            .with("obsjd", 2_458_063.014_3)
    }

    #[test]
    fn test_science_image_url() {
        let url = resolver().resolve(&science_row(), ProductKind::SciImg).unwrap();
        assert_eq!(
            url,
            "https://irsa.ipac.caltech.edu/ibe/data/ztf/products/sci/2017/1105/123456/ztf_20171105123456_000612_zr_c09_o_q2_sciimg.fits"
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let r = resolver();
        let record = science_row();
        assert_eq!(
            r.resolve(&record, ProductKind::PsfCat).unwrap(),
            r.resolve(&record, ProductKind::PsfCat).unwrap()
        );
    }

    #[test]
    fn test_science_extension_overrides() {
        let r = resolver();
        let record = science_row();
        assert!(r.resolve(&record, ProductKind::SciImLog).unwrap().ends_with("_q2_sciimlog.txt"));
        assert!(r.resolve(&record, ProductKind::SciImgDao).unwrap().ends_with("_q2_sciimgdao.psf"));
        assert!(
            r.resolve(&record, ProductKind::SciMRefDiffImg)
                .unwrap()
                .ends_with("_q2_scimrefdiffimg.fits.fz")
        );
    }

    #[test]
    fn test_bias_url_uses_filestartdate() {
        let record = MetadataRecord::new()
            .with("filestartdate", 20_180_214)
            .with("ccdid", 3)
            .with("qid", 1);
        let url = resolver().resolve(&record, ProductKind::Bias).unwrap();
        assert_eq!(
            url,
            format!("{DATA}/cal/2018/0214/bias/00/ccd03/q1/ztf_20180214_00_c03_q1_bias.fits")
        );
    }

    #[test]
    fn test_flat_url_includes_filter() {
        let record = MetadataRecord::new()
            .with("filestartdate", 20_180_214.0)
            .with("ccdid", 12)
            .with("qid", 4)
            .with("filtercode", "zg");
        let url = resolver().resolve(&record, ProductKind::HiFreqFlatLog).unwrap();
        assert_eq!(
            url,
            format!(
                "{DATA}/cal/2018/0214/hifreqflat/zg/ccd12/q4/ztf_20180214_zg_c12_q4_hifreqflatlog.txt"
            )
        );
    }

    #[test]
    fn test_raw_dark_remaps_filter() {
        let url = resolver().resolve(&science_row(), ProductKind::RawDark).unwrap();
        assert_eq!(
            url,
            format!("{DATA}/raw/2017/1105/123456/ztf_20171105123456_000612_dk_c09_d.fits.fz")
        );
    }

    #[test]
    fn test_raw_flat_forces_field_zero() {
        let url = resolver().resolve(&science_row(), ProductKind::RawFlat).unwrap();
        assert!(url.ends_with("/ztf_20171105123456_000000_zr_c09_f.fits.fz"));
    }

    #[test]
    fn test_reference_url_has_no_date() {
        let record = MetadataRecord::new()
            .with("field", 612)
            .with("filtercode", "zr")
            .with("ccdid", 9)
            .with("qid", 2);
        let url = resolver().resolve(&record, ProductKind::RefImg).unwrap();
        assert_eq!(
            url,
            format!("{DATA}/ref/000/field000612/zr/ccd09/q2/ztf_000612_zr_c09_q2_refimg.fits")
        );
    }

    #[test]
    fn test_missing_date_is_reported() {
        let record = science_row().with("filefracday", FieldValue::Null);
        let err = resolver().resolve(&record, ProductKind::SciImg).unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingField {
                field: "filefracday",
                product: ProductKind::SciImg
            }
        );
    }

    #[test]
    fn test_nightdate_fallback_has_no_fraction_for_science() {
        let record = science_row()
            .with("filefracday", FieldValue::Null)
            .with("nightdate", 20_171_105);
        let err = resolver().resolve(&record, ProductKind::SciImg).unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { field: "filefracday", .. }));

        let cal = MetadataRecord::new()
            .with("nightdate", 20_171_105)
            .with("ccdid", 1)
            .with("qid", 1);
        assert!(resolver().resolve(&cal, ProductKind::BiasUnc).is_ok());
    }

    #[test]
    fn test_calibration_record_cannot_produce_raw_product() {
        let record = MetadataRecord::new()
            .with("filestartdate", 20_180_214)
            .with("ccdid", 3)
            .with("qid", 1)
            .with("field", 0)
            .with("filtercode", "zg");
        let err = resolver().resolve(&record, ProductKind::RawObject).unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { field: "filefracday", .. }));
    }

    #[test]
    fn test_missing_template_field() {
        let mut record = MetadataRecord::new();
        for (name, value) in science_row().iter() {
            if name != "qid" {
                record.insert(name, value.clone());
            }
        }
        let err = resolver().resolve(&record, ProductKind::PsfCat).unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { field: "qid", .. }));
    }

    #[test]
    fn test_invalid_date_is_reported() {
        let record = science_row().with("filefracday", "2017-11-05");
        let err = resolver().resolve(&record, ProductKind::SciImg).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidField { field: "filefracday", .. }));
    }

    #[test]
    fn test_unknown_tag() {
        let err = resolver().resolve_tag(&science_row(), "bogus").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownProduct(_)));
    }
}
