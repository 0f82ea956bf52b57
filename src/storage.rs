//! Textbook files on disk.
//!
//! Rows store either an absolute path or a path relative to the storage root.
//! Imported files are copied under the root with a timestamp prefix.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::{NewTextbook, Textbook};
use crate::db::Store;

/// Longest file name produced by [`sanitize_filename`]
pub const MAX_FILENAME_LEN: usize = 200;

/// Metadata supplied when importing a textbook file
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub title: String,
    pub author: String,
    pub grade: crate::catalog::Grade,
    pub subject: crate::catalog::Subject,
}

/// Root directory holding textbook files
#[derive(Debug, Clone)]
pub struct TextbookStorage {
    root: PathBuf,
}

impl TextbookStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths are used as-is, relative ones are joined onto the root
    pub fn resolve(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Whether the backing file for `file_path` is present
    pub async fn exists(&self, file_path: &str) -> bool {
        let path = self.resolve(file_path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to inspect textbook file");
                }
                false
            }
        }
    }

    /// Copy `source` under the root and insert the textbook row
    pub async fn import<S: Store>(
        &self,
        store: &S,
        source: &Path,
        request: ImportRequest,
    ) -> Result<Textbook> {
        let meta = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        if !meta.is_file() {
            bail!("{} is not a file", source.display());
        }

        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "textbook.pdf".to_string());
        let stored_name = format!(
            "{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            sanitize_filename(&original_name)
        );

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        let destination = self.root.join(&stored_name);
        tokio::fs::copy(source, &destination)
            .await
            .with_context(|| format!("Failed to copy file to {}", destination.display()))?;

        let new_textbook = NewTextbook {
            title: request.title,
            author: request.author,
            grade: request.grade,
            subject: request.subject,
            file_name: original_name,
            file_path: stored_name,
            file_size: i64::try_from(meta.len()).ok(),
        };

        match store.add_textbook(&new_textbook).await {
            Ok(textbook) => {
                info!(textbook_id = textbook.id, path = %destination.display(), "Textbook imported");
                Ok(textbook)
            }
            Err(e) => {
                // Do not leave an orphaned copy behind
                if let Err(remove_err) = tokio::fs::remove_file(&destination).await {
                    warn!(error = %remove_err, "Failed to clean up copied file");
                }
                Err(e)
            }
        }
    }

    /// Delete the row, then its file. A file that is already gone is not an error.
    pub async fn remove<S: Store>(&self, store: &S, textbook_id: i64) -> Result<Option<Textbook>> {
        let Some(textbook) = store.remove_textbook(textbook_id).await? else {
            return Ok(None);
        };

        let path = self.resolve(&textbook.file_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(textbook_id, path = %path.display(), "Textbook file deleted"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(textbook_id, path = %path.display(), "Textbook file was already missing")
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to delete {}", path.display()));
            }
        }

        Ok(Some(textbook))
    }
}

/// Replace characters that are invalid in file names and collapse whitespace
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let truncated: String = joined.chars().take(MAX_FILENAME_LEN).collect();

    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Grade, Subject};
    use crate::db::MemoryStore;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Алгебра 7 класс.pdf"), "Алгебра_7_класс.pdf");
        assert_eq!(sanitize_filename("a<b>:c\"d/e\\f|g?h*.pdf"), "a_b__c_d_e_f_g_h_.pdf");
        assert_eq!(sanitize_filename("   "), "file");
        assert_eq!(sanitize_filename(&"x".repeat(300)).chars().count(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let storage = TextbookStorage::new("/srv/books");
        assert_eq!(storage.resolve("a.pdf"), PathBuf::from("/srv/books/a.pdf"));
        assert_eq!(storage.resolve("/tmp/b.pdf"), PathBuf::from("/tmp/b.pdf"));
    }

    #[tokio::test]
    async fn test_import_then_remove() -> Result<()> {
        let source_dir = tempfile::tempdir()?;
        let root = tempfile::tempdir()?;
        let source = source_dir.path().join("Физика 9.pdf");
        tokio::fs::write(&source, b"%PDF-1.4 test").await?;

        let store = MemoryStore::new();
        let storage = TextbookStorage::new(root.path());
        let textbook = storage
            .import(
                &store,
                &source,
                ImportRequest {
                    title: "Физика".to_string(),
                    author: "Перышкин".to_string(),
                    grade: Grade::try_from(9)?,
                    subject: Subject::Physics,
                },
            )
            .await?;

        assert_eq!(textbook.file_name, "Физика 9.pdf");
        assert_eq!(textbook.file_size, Some(13));
        assert!(textbook.file_path.ends_with("Физика_9.pdf"));
        assert!(storage.exists(&textbook.file_path).await);

        let removed = storage.remove(&store, textbook.id).await?;
        assert_eq!(removed.map(|t| t.id), Some(textbook.id));
        assert!(!storage.exists(&textbook.file_path).await);
        assert!(store.get_textbook(textbook.id).await?.is_none());

        // Removing again is a no-op
        assert!(storage.remove(&store, textbook.id).await?.is_none());
        Ok(())
    }
}
