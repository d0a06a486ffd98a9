//! This module provides [check_path], which validates directories named by clients before anything is read from
//! or written to them, and [list_directories], which backs the directory browser.

use {
    crate::error::{Access, ArchiveError},
    anyhow::Result,
    archivist_shared::DirectoryEntry,
    std::path::Path,
    tokio::{fs, task},
};

/// Validate that `path` is a directory granting `access`, returning it with a trailing separator.
///
/// A missing or empty `path` means the filesystem root.
pub async fn check_path(path: Option<&str>, access: Access) -> Result<String, ArchiveError> {
    let path = match path {
        Some(path) if !path.is_empty() => path,
        _ => "/",
    };

    let metadata = fs::metadata(path)
        .await
        .map_err(|_| ArchiveError::InvalidPath(path.to_owned()))?;

    if !metadata.is_dir() {
        return Err(ArchiveError::InvalidPath(format!(
            "{} is not a directory",
            path
        )));
    }

    let denied = || ArchiveError::AccessDenied {
        path: path.to_owned(),
        access,
    };

    let _ = fs::read_dir(path).await.map_err(|_| denied())?;

    if access == Access::ReadWrite {
        let dir = path.to_owned();

        task::spawn_blocking(move || tempfile::tempfile_in(dir))
            .await
            .map_err(|_| denied())?
            .map_err(|_| denied())?;
    }

    Ok(if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{}/", path)
    })
}

fn hidden(name: &str) -> bool {
    name.starts_with('.')
}

async fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            let is_dir = fs::metadata(entry.path())
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);

            if is_dir && !hidden(name) {
                names.push(name.to_owned());
            }
        }
    }

    names.sort();

    Ok(names)
}

/// List the visible subdirectories of `path`, noting which of them have subdirectories of their own.
pub async fn list_directories(path: Option<&str>) -> Result<Vec<DirectoryEntry>> {
    let path = check_path(path, Access::Read).await?;

    let mut result = Vec::new();

    for name in subdirectories(Path::new(&path)).await? {
        let id = format!("{}{}/", path, name);

        let has_children = subdirectories(Path::new(&id))
            .await
            .map(|names| !names.is_empty())
            .unwrap_or(false);

        result.push(DirectoryEntry {
            id,
            name,
            has_children,
        });
    }

    Ok(result)
}
