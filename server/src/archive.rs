//! This module implements the two ways a reviewed item leaves the incoming directory: [save], which files it
//! under a dated folder of the archive and records it in the catalog, and [trash], which moves it aside.

use {
    crate::{
        catalog::{Catalog, MediaRow, ScoredTag},
        error::{Access, ArchiveError},
        path_guard,
    },
    archivist_shared::Media,
    chrono::{TimeZone, Utc},
    chrono_tz::Tz,
    std::{
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    tokio::{
        fs::{self, File, OpenOptions},
        io::{self, AsyncWriteExt},
    },
    tracing::{info, warn},
};

/// Name of the folder within an archive directory which receives trashed files
pub const TRASH_FOLDER: &str = "trash";

/// Outcome of a successful [save]
#[derive(Debug)]
pub struct Saved {
    /// Destination relative to the archive directory, as recorded in the catalog
    pub file: String,

    /// Absolute destination path
    pub path: PathBuf,

    /// Catalog id of the new media row
    pub id: i64,

    /// Non-fatal problem encountered after the item was cataloged
    pub warning: Option<ArchiveError>,
}

fn parent(file: &str) -> String {
    Path::new(file)
        .parent()
        .and_then(Path::to_str)
        .map(|dir| format!("{}/", dir.trim_end_matches('/')))
        .unwrap_or_default()
}

fn extension(file: &str) -> String {
    Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Calculate the `<year>/<month name>` folder for `timestamp` as observed in `timezone`.
pub fn dated_folder(timestamp: i64, timezone: &str) -> Result<String, ArchiveError> {
    let zone = timezone
        .parse::<Tz>()
        .map_err(|_| ArchiveError::MissingRequiredField("timezone"))?;

    let time = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or(ArchiveError::MissingRequiredField("timestamp"))?;

    Ok(time.with_timezone(&zone).format("%Y/%B").to_string())
}

/// Create a file named `<timestamp><ext>` or `<timestamp>_<n><ext>` in `dir`, using the first such name which is
/// not already taken.
///
/// The name is claimed by creating the file, so concurrent callers never receive the same one.
async fn claim_name(dir: &Path, timestamp: i64, ext: &str) -> Result<(String, File), ArchiveError> {
    let mut name = format!("{}{}", timestamp, ext);
    let mut suffix = 0_u64;

    loop {
        let candidate = dir.join(&name);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((name, file)),

            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                name = format!("{}_{}{}", timestamp, suffix, ext);
                suffix += 1;
            }

            Err(source) => {
                return Err(ArchiveError::NameCollisionUnresolvable {
                    path: candidate.to_string_lossy().into_owned(),
                    source,
                })
            }
        }
    }
}

/// Copy the contents of `source` into the freshly claimed `destination`.
async fn copy_into(source: &mut File, destination: &mut File) -> io::Result<()> {
    io::copy(source, destination).await?;

    destination.flush().await
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Build the catalog row for `item`, to be recorded under `file`, naming the first mandatory field which is
/// missing, if any.
///
/// A zero offset or coordinate is a legitimate value, so only absent values are rejected for those fields.
pub fn media_row(item: &Media, file: String) -> Result<MediaRow, ArchiveError> {
    use ArchiveError::MissingRequiredField as Missing;

    if item.width == 0 {
        return Err(Missing("width"));
    }

    if item.height == 0 {
        return Err(Missing("height"));
    }

    let timestamp = item.timestamp.ok_or(Missing("timestamp"))?;
    let timezone = present(item.timezone.as_deref()).ok_or(Missing("timezone"))?;
    let lat = item.lat.ok_or(Missing("lat"))?;
    let lng = item.lng.ok_or(Missing("lng"))?;
    let camera = present(item.camera.as_deref()).ok_or(Missing("camera"))?;

    Ok(MediaRow {
        file,
        media_type: item.media_type,
        size: item.size,
        length: item.length,
        width: item.width,
        height: item.height,
        timestamp,
        timezone: timezone.to_owned(),
        tz_offset: item.tz_offset,
        lat,
        lng,
        camera: camera.to_owned(),
    })
}

/// Tags the user confirmed for `item`, scored by scanner confidence (as a percentage) where the scanner suggested
/// them.
///
/// Tags the scanner did not suggest score 1, meaning "added by hand" rather than low confidence.
pub fn scored_tags(item: &Media) -> Vec<ScoredTag> {
    item.tags
        .iter()
        .map(|tag| ScoredTag {
            name: tag.clone(),
            score: item
                .scanned_tags
                .as_ref()
                .and_then(|scanned| scanned.get(tag))
                .map(|confidence| (confidence * 100.0).round() as i64)
                .unwrap_or(1),
        })
        .collect()
}

async fn remove_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("unable to remove {}: {:?}", path.to_string_lossy(), e);
    }
}

/// Copy `item` into a dated folder beneath the archive directory `root`, record it in that directory's catalog,
/// and remove the original.
///
/// Nothing is left behind in the archive unless the catalog transaction commits.  Failure to remove the original
/// after that point is reported via [Saved::warning].
pub async fn save(root: Option<&str>, item: &Media) -> Result<Saved, ArchiveError> {
    let root = path_guard::check_path(root, Access::ReadWrite).await?;

    if parent(&item.file) == root {
        return Err(ArchiveError::InvalidPath(format!(
            "{} is already in {}",
            item.file, root
        )));
    }

    let timestamp = item
        .timestamp
        .ok_or(ArchiveError::MissingRequiredField("timestamp"))?;

    let timezone = present(item.timezone.as_deref())
        .ok_or(ArchiveError::MissingRequiredField("timezone"))?;

    let folder = dated_folder(timestamp, timezone)?;

    let mut row = media_row(item, String::new())?;

    let mut source = File::open(&item.file)
        .await
        .map_err(|source| ArchiveError::CopyFailed {
            from: item.file.clone(),
            to: root.clone(),
            source,
        })?;

    let dir = Path::new(&root).join(&folder);

    fs::create_dir_all(&dir)
        .await
        .map_err(|source| ArchiveError::CopyFailed {
            from: item.file.clone(),
            to: dir.to_string_lossy().into_owned(),
            source,
        })?;

    let (name, mut claimed) = claim_name(&dir, timestamp, &extension(&item.file)).await?;

    let destination = dir.join(&name);

    let file = format!("{}/{}", folder, name);

    row.file = file.clone();

    if let Err(source) = copy_into(&mut source, &mut claimed).await {
        remove_copy(&destination).await;

        return Err(ArchiveError::CopyFailed {
            from: item.file.clone(),
            to: destination.to_string_lossy().into_owned(),
            source,
        });
    }

    drop(claimed);

    let people = item.people.iter().cloned().collect::<Vec<_>>();

    let id = match Catalog::open(&root).await {
        Ok(mut catalog) => catalog.insert_media(&row, &scored_tags(item), &people).await,
        Err(e) => Err(e),
    };

    let id = match id {
        Ok(id) => id,

        Err(source) => {
            // The name was claimed by this call, so nothing else refers to the copy.
            remove_copy(&destination).await;

            return Err(ArchiveError::CatalogTransactionFailed { file, source });
        }
    };

    info!("saved {} as {}{} (id {})", item.file, root, file, id);

    let warning = fs::remove_file(&item.file)
        .await
        .err()
        .map(|source| ArchiveError::CleanupFailed {
            path: item.file.clone(),
            source,
        });

    if let Some(warning) = &warning {
        warn!("{}", warning);
    }

    Ok(Saved {
        file,
        path: destination,
        id,
        warning,
    })
}

/// Move `file` into the trash folder of the archive directory `root`, returning its new path.
///
/// The catalog is not consulted or modified.
pub async fn trash(root: Option<&str>, file: &str) -> Result<PathBuf, ArchiveError> {
    let root = path_guard::check_path(root, Access::ReadWrite).await?;

    let trash = format!("{}{}", root, TRASH_FOLDER);

    if parent(file) == format!("{}/", trash) {
        return Err(ArchiveError::InvalidPath(format!(
            "{} is already in {}",
            file, trash
        )));
    }

    let name = Path::new(file)
        .file_name()
        .ok_or_else(|| ArchiveError::InvalidPath(file.to_owned()))?;

    fs::create_dir_all(&trash)
        .await
        .map_err(|source| ArchiveError::CopyFailed {
            from: file.to_owned(),
            to: trash.clone(),
            source,
        })?;

    let destination = Path::new(&trash).join(name);

    fs::copy(file, &destination)
        .await
        .map_err(|source| ArchiveError::CopyFailed {
            from: file.to_owned(),
            to: destination.to_string_lossy().into_owned(),
            source,
        })?;

    fs::remove_file(file)
        .await
        .map_err(|source| ArchiveError::CleanupFailed {
            path: file.to_owned(),
            source,
        })?;

    info!("trashed {}", file);

    Ok(destination)
}
