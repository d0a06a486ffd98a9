//! Archivist shared (e.g. protocol) code
//!
//! This crate contains code shared between the Archivist server and its front end.  It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs and enums which define the client/server protocol, plus
//! the pure tag and people suggestion ranking logic in the `suggest` submodule.

#![deny(warnings)]

use {
    serde_derive::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{self, Display},
        sync::Arc,
    },
};

pub use suggest::{suggest_people, suggest_tags, Frequency};

pub mod suggest;

/// The kind of media item a file contains
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Copy, Clone)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// The value stored in the `type` column of the catalog
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified description of one photo or video discovered while scanning a directory
///
/// A `Media` is not persisted until it is saved into an archive, at which point it is copied into a dated folder
/// and recorded in that archive's catalog.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    /// Absolute path of the source file, unique within a scan
    pub file: String,

    #[serde(rename = "type")]
    pub media_type: MediaType,

    /// File size in bytes
    pub size: u64,

    /// Duration in seconds (videos only)
    pub length: Option<f64>,

    pub width: u32,

    pub height: u32,

    /// Capture time in seconds since the Unix epoch
    ///
    /// Videos always have one (falling back to the file modification time), but images whose EXIF data lacks a
    /// capture time will have `None` here until the user supplies one.
    pub timestamp: Option<i64>,

    /// IANA time zone name (e.g. "Australia/Sydney") in which the item was captured
    pub timezone: Option<String>,

    /// Total UTC offset in seconds, including any daylight saving adjustment
    #[serde(default)]
    pub tz_offset: i64,

    pub lat: Option<f64>,

    pub lng: Option<f64>,

    pub camera: Option<String>,

    /// Tags confirmed by the user
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// People confirmed by the user
    #[serde(default)]
    pub people: BTreeSet<String>,

    /// Candidate labels and confidence scores returned by the label detection service
    ///
    /// `None` means no scan has completed or been attempted.  A failed scan yields an empty map.
    pub scanned_tags: Option<BTreeMap<String, f64>>,

    /// Whether a label scan is currently in flight for this item
    #[serde(default)]
    pub processing_scanned_tags: bool,
}

/// Where an item stands with respect to label detection
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum ScanState<'a> {
    NotScanned,
    Scanning,
    Scanned(&'a BTreeMap<String, f64>),
}

impl Media {
    pub fn scan_state(&self) -> ScanState<'_> {
        if self.processing_scanned_tags {
            ScanState::Scanning
        } else if let Some(tags) = &self.scanned_tags {
            ScanState::Scanned(tags)
        } else {
            ScanState::NotScanned
        }
    }
}

/// Represents the query string of a GET /api/ls or GET /api/load request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct LoadQuery {
    /// Directory to list or scan; defaults to the filesystem root
    pub path: Option<String>,

    /// Archive directory whose catalog supplies tag and people popularity
    pub output: Option<String>,
}

/// Represents a response to a GET /api/load request
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct LoadResponse {
    /// Media items sorted by file path
    pub media: Vec<Media>,

    /// Number of archived items carrying each tag, most popular first
    pub tags: Frequency,

    /// Number of archived items featuring each person, most popular first
    pub people: Frequency,
}

/// One subdirectory in a GET /api/ls response
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Full path, terminated with a separator
    pub id: String,

    pub name: String,

    pub has_children: bool,
}

/// Represents the query string of a request which operates on a single file (e.g. GET /api/img)
#[derive(Serialize, Deserialize, Debug)]
pub struct FileQuery {
    pub file: String,

    /// Maximum length of the longest side of the returned image
    pub size: Option<u32>,

    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,
}

/// Represents a response to a GET /api/annotate request
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ScanResponse {
    pub file: String,

    pub tags: BTreeMap<String, f64>,
}

/// Represents the body of a POST /api/save request
#[derive(Serialize, Deserialize, Debug)]
pub struct SaveRequest {
    /// Archive directory
    pub path: Option<String>,

    pub item: Media,
}

/// Represents a response to a POST /api/save request
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SaveResponse {
    /// Path of the archived copy relative to the archive directory (e.g. "2019/February/1550152937.jpg")
    pub file: String,

    /// Non-fatal problem encountered after the item was cataloged (e.g. the source could not be removed)
    pub warning: Option<String>,
}

/// Represents the query string of a GET /api/trash request
#[derive(Serialize, Deserialize, Debug)]
pub struct TrashRequest {
    /// Archive directory, under which the "trash" folder lives
    pub path: Option<String>,

    pub file: String,
}

/// A modification to the currently selected item
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Field {
    Timestamp(i64),
    Location { lat: f64, lng: f64 },
    Camera(String),
    Tags(Vec<String>),
    People(Vec<String>),
}

/// A request to the stateful session service (POST /api/session)
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Scan `path` and use `output` as the archive for subsequent saves
    Load {
        path: Option<String>,
        output: Option<String>,
    },

    /// Move the cursor to the specified item
    Select { index: usize },

    /// Modify the selected item
    Update { field: Field },

    /// Request label detection for the selected item
    Scan,

    /// Archive and catalog the selected item
    Save,

    /// Move the selected item to the archive's trash folder
    Trash,

    /// Report the current state without changing it
    View,
}

/// The state of the session service as seen by the client
#[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Position of the cursor, if any item is selected
    pub index: Option<usize>,

    /// Number of items remaining in the session
    pub total: usize,

    /// The selected item
    pub item: Option<Media>,

    /// Suggested tags for the selected item, or `None` if label detection has not completed
    pub tag_suggestions: Option<Vec<Arc<str>>>,

    pub people_suggestions: Vec<Arc<str>>,

    /// Transient, non-fatal notification (e.g. a failed timezone lookup)
    pub notice: Option<String>,
}

#[cfg(test)]
mod test {
    use {super::*, maplit::btreemap};

    fn item() -> Media {
        Media {
            file: "/photos/a.jpg".into(),
            media_type: MediaType::Image,
            size: 1024,
            length: None,
            width: 640,
            height: 480,
            timestamp: Some(1_550_152_937),
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

    #[test]
    fn scan_state() {
        let mut media = item();

        assert_eq!(media.scan_state(), ScanState::NotScanned);

        media.processing_scanned_tags = true;

        assert_eq!(media.scan_state(), ScanState::Scanning);

        media.processing_scanned_tags = false;
        media.scanned_tags = Some(btreemap!["dog".to_owned() => 0.9]);

        assert_eq!(
            media.scan_state(),
            ScanState::Scanned(&btreemap!["dog".to_owned() => 0.9])
        );
    }

    #[test]
    fn media_wire_format() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(item())?;

        assert_eq!(json["type"], "image");
        assert_eq!(json["tzOffset"], 0);
        assert!(json["scannedTags"].is_null());
        assert_eq!(json["processingScannedTags"], false);

        let parsed = serde_json::from_str::<Media>(
            r#"{
                "file": "/videos/b.mp4",
                "type": "video",
                "size": 10,
                "length": 12.5,
                "width": 1920,
                "height": 1080,
                "timestamp": 1,
                "timezone": "UTC",
                "lat": null,
                "lng": null,
                "camera": null,
                "scannedTags": null
            }"#,
        )?;

        assert_eq!(parsed.media_type, MediaType::Video);
        assert_eq!(parsed.tz_offset, 0);
        assert!(parsed.tags.is_empty());

        Ok(())
    }

    #[test]
    fn command_wire_format() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type": "select", "index": 3}"#)?,
            Command::Select { index: 3 }
        );

        assert_eq!(
            serde_json::from_str::<Command>(
                r#"{"type": "update", "field": {"field": "location", "value": {"lat": 1.5, "lng": -2.0}}}"#
            )?,
            Command::Update {
                field: Field::Location { lat: 1.5, lng: -2.0 }
            }
        );

        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type": "save"}"#)?,
            Command::Save
        );

        Ok(())
    }
}
