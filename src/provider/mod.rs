//! Remote content capability consumed by the backup engine.
//!
//! The engine never talks HTTP itself. It asks a [`ContentProvider`] to list a
//! site's libraries, to page through a folder, and to write one file into a
//! local directory. [`crate::graph`] is the production implementation; tests
//! use scripted in-memory providers.

mod error;

pub use error::{KeywordClass, ProviderError};

use std::path::Path;

use async_trait::async_trait;

use crate::credential::Credential;

/// Folder id that addresses a library's root folder.
pub const ROOT_FOLDER_ID: &str = "root";

/// A configured site: display name plus source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    /// Display name, also the progress store key.
    pub name: String,
    /// Source URL, e.g. `https://contoso.sharepoint.com/sites/Engineering`.
    pub url: String,
}

impl SiteSpec {
    /// Creates a site spec.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A document library exposed by a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    /// Provider id of the library.
    pub id: String,
    /// Display name; also the local folder name.
    pub name: String,
}

impl Library {
    /// Returns a handle to the library's root folder.
    #[must_use]
    pub fn root_folder(&self) -> FolderRef {
        FolderRef {
            library_id: self.id.clone(),
            id: ROOT_FOLDER_ID.to_string(),
        }
    }
}

/// Handle to a folder inside a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    /// Owning library id.
    pub library_id: String,
    /// Provider id of the folder.
    pub id: String,
}

/// Whether an item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
}

/// A file or folder returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Provider id of the item.
    pub id: String,
    /// Owning library id.
    pub library_id: String,
    /// Item name.
    pub name: String,
    /// Size in bytes, when reported.
    pub size_bytes: Option<u64>,
    /// File or folder.
    pub kind: ItemKind,
}

impl RemoteItem {
    /// Returns true for folders.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Returns a folder handle when this item is a folder.
    #[must_use]
    pub fn as_folder(&self) -> Option<FolderRef> {
        self.is_folder().then(|| FolderRef {
            library_id: self.library_id.clone(),
            id: self.id.clone(),
        })
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    /// Items on this page.
    pub items: Vec<RemoteItem>,
    /// Opaque continuation token; `None` on the last page.
    pub next: Option<String>,
}

/// Remote content capability.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Lists the document libraries of a site.
    async fn list_libraries(
        &self,
        credential: &Credential,
        site: &SiteSpec,
    ) -> Result<Vec<Library>, ProviderError>;

    /// Lists one page of a folder's children.
    ///
    /// Pass `None` for the first page and the previous page's `next` after that.
    async fn list_items(
        &self,
        credential: &Credential,
        folder: &FolderRef,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage, ProviderError>;

    /// Writes a file item to `dir/file_name`.
    ///
    /// On success the full file exists at that path.
    async fn download(
        &self,
        credential: &Credential,
        item: &RemoteItem,
        dir: &Path,
        file_name: &str,
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_root_folder() {
        let library = Library {
            id: "drive-1".to_string(),
            name: "Documents".to_string(),
        };
        let root = library.root_folder();
        assert_eq!(root.library_id, "drive-1");
        assert_eq!(root.id, ROOT_FOLDER_ID);
    }

    #[test]
    fn test_remote_item_as_folder() {
        let folder = RemoteItem {
            id: "f1".to_string(),
            library_id: "drive-1".to_string(),
            name: "Specs".to_string(),
            size_bytes: None,
            kind: ItemKind::Folder,
        };
        let file = RemoteItem {
            kind: ItemKind::File,
            ..folder.clone()
        };

        assert_eq!(folder.as_folder().map(|f| f.id), Some("f1".to_string()));
        assert!(file.as_folder().is_none());
    }
}
