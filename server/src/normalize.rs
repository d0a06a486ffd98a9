//! This module provides [scan], which converts the image and video files in a directory into [Media] records.
//!
//! Images are described by their embedded EXIF data and videos by container metadata obtained through a
//! [VideoProbe].  Any file which cannot be described is logged and left out of the result rather than failing the
//! whole scan.

use {
    crate::{
        error::ArchiveError,
        probe::{ProbeData, VideoProbe},
    },
    anyhow::{anyhow, Error, Result},
    archivist_shared::{Media, MediaType},
    chrono::{DateTime, Utc},
    futures::{future, stream, StreamExt},
    lazy_static::lazy_static,
    regex::Regex,
    rexiv2::Metadata as ExifMetadata,
    std::{
        collections::BTreeSet,
        fs::File,
        io::Read,
        path::{Path, PathBuf},
        time::UNIX_EPOCH,
    },
    tokio::{fs, task},
    tracing::{info, warn},
};

/// Number of leading bytes of a JPEG file handed to the EXIF parser
pub const EXIF_WINDOW: usize = 64 * 1024;

/// Maximum number of files described concurrently
const SCAN_CONCURRENCY: usize = 8;

/// Compose a camera name from EXIF make and model strings.
///
/// Many cameras repeat the make at the start of the model (e.g. "Canon" and "Canon EOS 750D"), in which case the
/// model alone is used.
pub fn camera_name(make: Option<&str>, model: Option<&str>) -> Option<String> {
    let make = make.map(str::trim).filter(|s| !s.is_empty());
    let model = model.map(str::trim).filter(|s| !s.is_empty());

    match (make, model) {
        (None, None) => None,
        (Some(make), None) => Some(make.to_owned()),
        (None, Some(model)) => Some(model.to_owned()),
        (Some(make), Some(model)) => {
            if model.to_lowercase().starts_with(&make.to_lowercase()) {
                Some(model.to_owned())
            } else {
                Some(format!("{} {}", make, model))
            }
        }
    }
}

/// Parse latitude and longitude from a combined location string such as "-29.6687+153.1090/".
pub fn parse_location(location: &str) -> Option<(f64, f64)> {
    lazy_static! {
        static ref LOCATION_PATTERN: Regex =
            Regex::new(r"^\s*([+-]?[0-9.]+)([+-][0-9.]+)").unwrap();
    }

    let captures = LOCATION_PATTERN.captures(location)?;

    Some((captures[1].parse().ok()?, captures[2].parse().ok()?))
}

/// Parse an EXIF date/time (e.g. "2019:02:14 14:02:17"), which carries no zone, as UTC.
fn exif_timestamp(datetime: &str) -> Result<i64> {
    lazy_static! {
        static ref DATE_TIME_PATTERN: Regex =
            Regex::new(r"(\d{4}):(\d{2}):(\d{2}) (\d{2}):(\d{2}):(\d{2})").unwrap();
    }

    Ok(DATE_TIME_PATTERN
        .captures(datetime)
        .map(|c| {
            format!(
                "{}-{}-{}T{}:{}:{}Z",
                &c[1], &c[2], &c[3], &c[4], &c[5], &c[6]
            )
        })
        .ok_or_else(|| anyhow!("unrecognized DateTime format: {}", datetime))?
        .parse::<DateTime<Utc>>()?
        .timestamp())
}

fn exif_string(metadata: &ExifMetadata, tag: &str) -> Option<String> {
    metadata.get_tag_string(tag).ok()
}

fn path_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow!("bad utf8"))
}

fn blank(kind: MediaType, file: String, size: u64, width: u32, height: u32) -> Media {
    Media {
        file,
        media_type: kind,
        size,
        length: None,
        width,
        height,
        timestamp: None,
        timezone: None,
        tz_offset: 0,
        lat: None,
        lng: None,
        camera: None,
        tags: BTreeSet::new(),
        people: BTreeSet::new(),
        scanned_tags: None,
        processing_scanned_tags: false,
    }
}

/// Describe a JPEG file using the EXIF data found in its first [EXIF_WINDOW] bytes.
pub fn image_media(path: &Path) -> Result<Media> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut buffer = Vec::with_capacity(EXIF_WINDOW);

    (&mut file)
        .take(u64::try_from(EXIF_WINDOW)?)
        .read_to_end(&mut buffer)?;

    let metadata = ExifMetadata::new_from_buffer(&buffer)?;

    let width = u32::try_from(metadata.get_pixel_width())?;
    let height = u32::try_from(metadata.get_pixel_height())?;

    if width == 0 || height == 0 {
        return Err(anyhow!("missing image dimensions"));
    }

    let mut media = blank(MediaType::Image, path_string(path)?, size, width, height);

    media.timestamp = [
        "Exif.Photo.DateTimeOriginal",
        "Exif.Image.DateTimeOriginal",
        "Exif.Image.DateTime",
    ]
    .iter()
    .find_map(|tag| exif_string(&metadata, tag))
    .and_then(|datetime| match exif_timestamp(&datetime) {
        Ok(timestamp) => Some(timestamp),

        // Cameras with an unset clock record e.g. "0000:00:00 00:00:00".
        Err(e) => {
            warn!("ignoring timestamp of {}: {:?}", path.to_string_lossy(), e);

            None
        }
    });

    if let Some(gps) = metadata.get_gps_info() {
        media.lat = Some(gps.latitude);
        media.lng = Some(gps.longitude);
    }

    media.camera = camera_name(
        exif_string(&metadata, "Exif.Image.Make").as_deref(),
        exif_string(&metadata, "Exif.Image.Model").as_deref(),
    );

    Ok(media)
}

/// Describe a video file using the metadata reported by a [VideoProbe].
pub async fn video_media(data: ProbeData) -> Result<Media> {
    let format = data.format.ok_or_else(|| anyhow!("missing format"))?;

    let (filename, size, duration) = match (format.filename, format.size, format.duration) {
        (Some(filename), Some(size), Some(duration)) => (filename, size, duration),
        _ => return Err(anyhow!("incomplete format metadata")),
    };

    let (width, height) = data
        .streams
        .iter()
        .find_map(|stream| match (stream.width, stream.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some((width, height)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("no stream with dimensions"))?;

    // Sizes reported as floating point are whole numbers of bytes.
    let mut media = blank(MediaType::Video, filename, size as u64, width, height);

    media.length = Some(duration);

    let tags = format.tags.unwrap_or_default();

    if let Some((lat, lng)) = tags.location.as_deref().and_then(parse_location) {
        media.lat = Some(lat);
        media.lng = Some(lng);
    }

    media.timestamp = Some(
        if let Some(timestamp) = tags
            .creation_time
            .as_deref()
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
        {
            timestamp.timestamp()
        } else {
            let modified = fs::metadata(&media.file).await?.modified()?;

            i64::try_from(modified.duration_since(UNIX_EPOCH)?.as_secs())?
        },
    );

    Ok(media)
}

enum Kind {
    Image,
    Video,
}

fn classify(path: &Path) -> Option<Kind> {
    let mime = mime_guess::from_path(path).first()?;

    if mime.essence_str() == "image/jpeg" {
        Some(Kind::Image)
    } else if mime.type_() == mime_guess::mime::VIDEO {
        Some(Kind::Video)
    } else {
        None
    }
}

/// List the visible, readable regular files in `dir`.
async fn visible_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        let visible = entry
            .file_name()
            .to_str()
            .map(|name| !name.starts_with('.'))
            .unwrap_or(false);

        if visible && fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            files.push(path);
        }
    }

    Ok(files)
}

async fn describe(probe: &dyn VideoProbe, kind: Kind, path: PathBuf) -> Result<Media> {
    match kind {
        Kind::Image => task::spawn_blocking(move || image_media(&path))
            .await
            .map_err(Error::from)
            .and_then(|result| result),

        Kind::Video => video_media(probe.probe(&path).await?).await,
    }
}

/// Describe every JPEG and video file directly inside `dir`, sorted by file path.
///
/// The sort order is part of the protocol: clients line the result up with independently computed aggregates.
pub async fn scan(dir: &str, probe: &dyn VideoProbe) -> Result<Vec<Media>> {
    let files = visible_files(Path::new(dir)).await?;

    let mut media = stream::iter(
        files
            .into_iter()
            .filter_map(|path| classify(&path).map(|kind| (kind, path))),
    )
    .map(|(kind, path)| async move {
        match describe(probe, kind, path.clone()).await {
            Ok(media) => Some(media),
            Err(e) => {
                let error = ArchiveError::UnreadableSourceFile {
                    path: path.to_string_lossy().into_owned(),
                    reason: format!("{:?}", e),
                };

                warn!("skipping file: {}", error);

                None
            }
        }
    })
    .buffer_unordered(SCAN_CONCURRENCY)
    .filter_map(future::ready)
    .collect::<Vec<_>>()
    .await;

    media.sort_by(|a, b| a.file.cmp(&b.file));

    info!("found {} media items in {}", media.len(), dir);

    Ok(media)
}
