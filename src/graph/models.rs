//! Wire types for the Microsoft Graph and identity endpoints.

use serde::Deserialize;

use crate::provider::{ItemKind, RemoteItem};

/// `GET /sites/{id}` response.
#[derive(Debug, Deserialize)]
pub(crate) struct SiteResponse {
    pub id: String,
}

/// A drive (document library) entry.
#[derive(Debug, Deserialize)]
pub(crate) struct Drive {
    pub id: String,
    pub name: String,
    #[serde(rename = "driveType")]
    pub drive_type: Option<String>,
}

impl Drive {
    /// Drives without a type are treated as document libraries.
    pub fn is_document_library(&self) -> bool {
        self.drive_type
            .as_deref()
            .is_none_or(|t| t == "documentLibrary")
    }
}

/// A `value` collection with an optional continuation link.
#[derive(Debug, Deserialize)]
pub(crate) struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A file or folder under a drive.
#[derive(Debug, Deserialize)]
pub(crate) struct DriveItem {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    pub fn into_remote(self, library_id: &str) -> RemoteItem {
        let kind = if self.folder.is_some() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        RemoteItem {
            id: self.id,
            library_id: library_id.to_string(),
            name: self.name,
            size_bytes: self.size,
            kind,
        }
    }
}

/// Graph error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// Failed token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_children_page_parses_folders_and_next_link() {
        let body = r#"{
            "value": [
                {"id": "1", "name": "Specs", "folder": {"childCount": 2}},
                {"id": "2", "name": "a.txt", "size": 42, "file": {"mimeType": "text/plain"}}
            ],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next"
        }"#;

        let page: Collection<DriveItem> = serde_json::from_str(body).unwrap();
        let items: Vec<RemoteItem> = page
            .value
            .into_iter()
            .map(|i| i.into_remote("drive-1"))
            .collect();

        assert_eq!(items[0].kind, ItemKind::Folder);
        assert_eq!(items[1].kind, ItemKind::File);
        assert_eq!(items[1].size_bytes, Some(42));
        assert_eq!(
            page.next_link.as_deref(),
            Some("https://graph.microsoft.com/v1.0/next")
        );
    }

    #[test]
    fn test_drive_type_filter() {
        let body = r#"{"value": [
            {"id": "d1", "name": "Documents", "driveType": "documentLibrary"},
            {"id": "d2", "name": "Personal", "driveType": "personal"},
            {"id": "d3", "name": "Untyped"}
        ]}"#;
        let drives: Collection<Drive> = serde_json::from_str(body).unwrap();
        let kept: Vec<&str> = drives
            .value
            .iter()
            .filter(|d| d.is_document_library())
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(kept, vec!["Documents", "Untyped"]);
    }
}
