//! Fixtures and test doubles shared by the unit tests in this crate.

use {
    crate::{
        labels::LabelDetector,
        probe::{ProbeData, VideoProbe},
        timezone::{TimezoneLookup, Zone},
    },
    anyhow::{anyhow, Result},
    archivist_shared::{Media, MediaType},
    futures::future::{BoxFuture, FutureExt},
    image::{ImageBuffer, Rgb},
    rexiv2::{GpsInfo, Metadata as ExifMetadata},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap},
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex, Once,
        },
        time::UNIX_EPOCH,
    },
};

pub const IMAGE_WIDTH: u32 = 480;
pub const IMAGE_HEIGHT: u32 = 320;

pub fn init_logging() {
    static ONCE: Once = Once::new();

    ONCE.call_once(pretty_env_logger::init_timed);
}

/// Write a solid-color JPEG to `path`, tagged with the specified EXIF values.
pub fn write_jpeg(
    path: &Path,
    datetime: Option<&str>,
    gps: Option<(f64, f64)>,
    make: Option<&str>,
    model: Option<&str>,
) -> Result<()> {
    ImageBuffer::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, Rgb([200u8, 120, 40])).save(path)?;

    let metadata = ExifMetadata::new_from_path(path)?;

    if let Some(datetime) = datetime {
        metadata.set_tag_string("Exif.Photo.DateTimeOriginal", datetime)?;
    }

    if let Some((latitude, longitude)) = gps {
        metadata.set_gps_info(&GpsInfo {
            latitude,
            longitude,
            altitude: 0.0,
        })?;
    }

    if let Some(make) = make {
        metadata.set_tag_string("Exif.Image.Make", make)?;
    }

    if let Some(model) = model {
        metadata.set_tag_string("Exif.Image.Model", model)?;
    }

    metadata.save_to_file(path)?;

    Ok(())
}

pub fn modification_time(path: impl AsRef<Path>) -> Result<i64> {
    Ok(i64::try_from(
        std::fs::metadata(path)?
            .modified()?
            .duration_since(UNIX_EPOCH)?
            .as_secs(),
    )?)
}

/// An image [Media] for `file` with every field the catalog requires
pub fn complete_media(file: &str) -> Media {
    Media {
        file: file.to_owned(),
        media_type: MediaType::Image,
        size: 1234,
        length: None,
        width: IMAGE_WIDTH,
        height: IMAGE_HEIGHT,
        timestamp: Some(1_550_152_937),
        timezone: Some("Australia/Sydney".to_owned()),
        tz_offset: 39_600,
        lat: Some(-29.6687),
        lng: Some(153.109),
        camera: Some("Google Pixel".to_owned()),
        tags: ["beach", "ocean"].iter().map(|&s| s.to_owned()).collect(),
        people: ["Ivy Barnes"].iter().map(|&s| s.to_owned()).collect(),
        scanned_tags: Some(
            [("ocean".to_owned(), 0.93), ("sky".to_owned(), 0.88)]
                .into_iter()
                .collect(),
        ),
        processing_scanned_tags: false,
    }
}

/// An otherwise empty [Media] for `file`
pub fn bare_media(file: &str) -> Media {
    Media {
        timezone: None,
        tz_offset: 0,
        lat: None,
        lng: None,
        camera: None,
        tags: BTreeSet::new(),
        people: BTreeSet::new(),
        scanned_tags: None,
        ..complete_media(file)
    }
}

/// [VideoProbe] which answers from a fixed table keyed by path
pub struct MockProbe(HashMap<String, ProbeData>);

impl MockProbe {
    pub fn new(data: HashMap<String, ProbeData>) -> Self {
        Self(data)
    }
}

impl VideoProbe for MockProbe {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<ProbeData>> {
        let result = path
            .to_str()
            .and_then(|path| self.0.get(path))
            .cloned()
            .ok_or_else(|| anyhow!("no probe data for {:?}", path));

        async move { result }.boxed()
    }
}

/// [TimezoneLookup] which returns a fixed answer (or failure) and counts invocations
pub struct MockTimezone {
    pub zone: Option<Zone>,
    pub calls: AtomicUsize,
}

impl MockTimezone {
    pub fn new(zone: Option<Zone>) -> Self {
        Self {
            zone,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TimezoneLookup for MockTimezone {
    fn lookup(&self, _lat: f64, _lng: f64, _timestamp: i64) -> BoxFuture<'_, Result<Zone>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let result = self
            .zone
            .clone()
            .ok_or_else(|| anyhow!("ZERO_RESULTS"));

        async move { result }.boxed()
    }
}

/// [LabelDetector] which returns fixed labels (or failure) and remembers the size of each image it was given
pub struct MockLabels {
    pub labels: Option<BTreeMap<String, f64>>,
    pub requests: Mutex<Vec<usize>>,
}

impl MockLabels {
    pub fn new(labels: Option<BTreeMap<String, f64>>) -> Self {
        Self {
            labels,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl LabelDetector for MockLabels {
    fn detect(&self, image: Vec<u8>) -> BoxFuture<'_, Result<BTreeMap<String, f64>>> {
        self.requests.lock().unwrap().push(image.len());

        let result = self
            .labels
            .clone()
            .ok_or_else(|| anyhow!("invalid annotations response"));

        async move { result }.boxed()
    }
}
