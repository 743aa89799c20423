//! Sites list: a `SiteName,SiteURL` CSV file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::provider::SiteSpec;

/// Name of the sample written next to a missing sites file.
pub const SAMPLE_SITES_FILE: &str = "sharepoint_sites.csv.sample";

/// Sample sites list.
pub const SAMPLE_SITES: &str = "SiteName,SiteURL
Marketing Team,https://yourcompany.sharepoint.com/sites/marketing
Sales Department,https://yourcompany.sharepoint.com/sites/sales
Engineering,https://yourcompany.sharepoint.com/sites/engineering
";

const UTF8_BOM: &str = "\u{feff}";

/// Errors from reading the sites list.
#[derive(Debug, Error)]
pub enum SitesError {
    /// The file does not exist; a sample was written.
    #[error("sites file not found: {path}\n  Suggestion: copy {sample} to {path} and list your sites")]
    MissingFile {
        /// Expected path.
        path: PathBuf,
        /// Sample written for the operator.
        sample: PathBuf,
    },

    /// Reading the file failed.
    #[error("failed to read sites file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A row could not be parsed.
    #[error("invalid sites file {path}: {source}")]
    Csv {
        /// File path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    #[serde(rename = "SiteName", default)]
    name: String,
    #[serde(rename = "SiteURL", default)]
    url: String,
}

/// Parses sites CSV text. Rows with a blank name are skipped.
///
/// # Errors
///
/// Returns [`SitesError::Csv`] if a row is malformed; `path` is used in the error.
pub fn parse_sites(path: &Path, content: &str) -> Result<Vec<SiteSpec>, SitesError> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut sites = Vec::new();
    for (index, row) in reader.deserialize::<SiteRow>().enumerate() {
        let row = row.map_err(|source| SitesError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        if row.name.is_empty() {
            warn!(row = index + 2, "skipping site row without a name");
            continue;
        }
        if row.url.is_empty() {
            warn!(site = %row.name, "site row has no URL");
        }
        sites.push(SiteSpec::new(row.name, row.url));
    }
    Ok(sites)
}

/// Reads the sites file at `path`.
///
/// A missing file gets [`SAMPLE_SITES_FILE`] written next to it.
///
/// # Errors
///
/// Returns [`SitesError`] when the file is missing, unreadable or malformed.
pub fn read_sites(path: &Path) -> Result<Vec<SiteSpec>, SitesError> {
    if !path.exists() {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let sample = write_sample_sites(dir).map_err(|source| SitesError::Io {
            path: dir.join(SAMPLE_SITES_FILE),
            source,
        })?;
        return Err(SitesError::MissingFile {
            path: path.to_path_buf(),
            sample,
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| SitesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sites = parse_sites(path, &content)?;
    info!(count = sites.len(), path = %path.display(), "read sites list");
    Ok(sites)
}

/// Writes [`SAMPLE_SITES`] into `dir`.
///
/// # Errors
///
/// Returns the IO error if the file cannot be written.
pub fn write_sample_sites(dir: &Path) -> std::io::Result<PathBuf> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let path = dir.join(SAMPLE_SITES_FILE);
    std::fs::write(&path, SAMPLE_SITES)?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sites_with_bom_and_blank_names() {
        let content = "\u{feff}SiteName,SiteURL\nEngineering , https://contoso.sharepoint.com/sites/eng\n,https://x\nSales,https://contoso.sharepoint.com/sites/sales\n";

        let sites = parse_sites(Path::new("sites.csv"), content).unwrap();

        assert_eq!(
            sites,
            vec![
                SiteSpec::new("Engineering", "https://contoso.sharepoint.com/sites/eng"),
                SiteSpec::new("Sales", "https://contoso.sharepoint.com/sites/sales"),
            ]
        );
    }

    #[test]
    fn test_sample_sites_parse() {
        let sites = parse_sites(Path::new("sample"), SAMPLE_SITES).unwrap();
        assert_eq!(sites.len(), 3);
    }

    #[test]
    fn test_read_sites_missing_writes_sample() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sharepoint_sites.csv");

        let err = read_sites(&path).unwrap_err();

        assert!(matches!(err, SitesError::MissingFile { .. }));
        assert!(dir.path().join(SAMPLE_SITES_FILE).exists());
    }
}
