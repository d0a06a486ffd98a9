//! This module renders the previews shown while reviewing an incoming directory: downscaled JPEGs of images,
//! poster frames of videos, and the videos themselves.

use {
    crate::error::ArchiveError,
    anyhow::{anyhow, Error, Result},
    bytes::{Bytes, BytesMut},
    futures::{Stream, TryStreamExt},
    http::{header, Response},
    hyper::Body,
    image::{imageops::FilterType, GenericImageView, ImageOutputFormat},
    std::{
        io::{Cursor, ErrorKind},
        path::{Path, PathBuf},
    },
    tokio::{
        fs::{self, File as AsyncFile},
        io::AsyncRead,
        process::Command,
        task,
    },
    tokio_util::codec::{BytesCodec, FramedRead},
    tracing::warn,
};

/// Default longest side, in pixels, of image and poster previews
pub const PREVIEW_SIZE: u32 = 1000;

const JPEG_QUALITY: u8 = 90;

/// Scale `(width, height)` down so that neither exceeds `size`, preserving the aspect ratio.
///
/// Dimensions already within bounds are returned unchanged.
pub fn bound((width, height): (u32, u32), size: u32) -> (u32, u32) {
    if width <= size && height <= size {
        (width, height)
    } else if width > height {
        (size, ((u64::from(height) * u64::from(size)) / u64::from(width)).max(1) as u32)
    } else {
        (((u64::from(width) * u64::from(size)) / u64::from(height)).max(1) as u32, size)
    }
}

/// Load the image at `path`, scale it to fit within `size` pixels, and encode it as a JPEG.
pub async fn resized_jpeg(path: &Path, size: u32) -> Result<Vec<u8>> {
    let path = path.to_owned();

    task::spawn_blocking(move || {
        let original = image::open(&path)?;

        let (width, height) = bound(original.dimensions(), size);

        let resized = if (width, height) == original.dimensions() {
            original
        } else {
            original.resize_exact(width, height, FilterType::Lanczos3)
        };

        let mut buffer = Vec::new();

        resized.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Jpeg(JPEG_QUALITY))?;

        Ok::<_, Error>(buffer)
    })
    .await?
}

/// Path at which the poster frame for `file` is stored
pub fn poster_path(poster_dir: &Path, file: &str) -> Result<PathBuf> {
    let name = Path::new(file)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid video path: {}", file))?;

    Ok(poster_dir.join(format!("{}.jpg", name)))
}

/// Extract the first frame of the video `file` into `poster_dir`, returning the path of the resulting JPEG.
pub async fn extract_poster(poster_dir: &Path, file: &str) -> Result<PathBuf> {
    fs::create_dir_all(poster_dir).await?;

    let poster = poster_path(poster_dir, file)?;

    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(file)
        .arg("-vframes")
        .arg("1")
        .arg("-q:v")
        .arg("2")
        .arg(&poster)
        .output()
        .await?;

    if output.status.success() {
        Ok(poster)
    } else {
        Err(anyhow!(
            "error running ffmpeg: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

/// Remove any poster frames left over from a previous scan.
pub async fn clear_posters(poster_dir: &Path) -> Result<()> {
    let mut entries = match fs::read_dir(poster_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if let Err(e) = fs::remove_file(entry.path()).await {
            warn!("unable to remove {}: {:?}", entry.path().to_string_lossy(), e);
        }
    }

    Ok(())
}

fn unreadable(file: &str, error: Error) -> Error {
    ArchiveError::UnreadableSourceFile {
        path: file.to_owned(),
        reason: format!("{:#}", error),
    }
    .into()
}

fn jpeg(data: Vec<u8>) -> Result<Response<Body>> {
    Ok(crate::response()
        .header(header::CONTENT_LENGTH, data.len())
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(data))?)
}

/// Respond with a downscaled JPEG rendering of the image `file`.
pub async fn image(file: &str, size: Option<u32>) -> Result<Response<Body>> {
    let data = resized_jpeg(Path::new(file), size.unwrap_or(PREVIEW_SIZE))
        .await
        .map_err(|e| unreadable(file, e))?;

    jpeg(data)
}

/// Respond with a downscaled JPEG of the first frame of the video `file`.
pub async fn poster(poster_dir: &Path, file: &str, size: Option<u32>) -> Result<Response<Body>> {
    let data = async {
        let poster = extract_poster(poster_dir, file).await?;

        resized_jpeg(&poster, size.unwrap_or(PREVIEW_SIZE)).await
    }
    .await
    .map_err(|e| unreadable(file, e))?;

    jpeg(data)
}

fn as_stream(input: impl AsyncRead + Send) -> impl Stream<Item = Result<Bytes>> + Send {
    FramedRead::new(input, BytesCodec::new())
        .map_ok(BytesMut::freeze)
        .map_err(Error::from)
}

/// Respond with the contents of the video `file`.
pub async fn video(file: &str) -> Result<Response<Body>> {
    let video = AsyncFile::open(file)
        .await
        .map_err(|e| unreadable(file, e.into()))?;

    let length = video.metadata().await?.len();

    Ok(crate::response()
        .header(header::CONTENT_LENGTH, length)
        .header(
            header::CONTENT_TYPE,
            mime_guess::from_path(file)
                .first_or_octet_stream()
                .essence_str(),
        )
        .body(Body::wrap_stream(as_stream(video)))?)
}
