//! Local file names for data URLs.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Last path segment of `url`, sanitized for use as a file name.
///
/// Returns `None` for unparseable URLs and URLs ending in `/`.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |s| s.into_owned());
    Some(sanitize_filename(&decoded))
}

/// Destination of `url` inside `dest_dir`.
#[must_use]
pub fn destination_for(url: &str, dest_dir: &Path) -> Option<PathBuf> {
    filename_from_url(url).map(|name| dest_dir.join(name))
}

pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}
