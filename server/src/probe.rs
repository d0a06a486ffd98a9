//! This module provides the [VideoProbe] trait, through which the normalizer obtains container and stream
//! metadata for video files, along with [Ffprobe], its production implementation.

use {
    anyhow::{anyhow, Result},
    futures::future::{BoxFuture, FutureExt},
    serde::Deserializer,
    serde_derive::Deserialize,
    std::path::Path,
    tokio::process::Command,
};

/// Container and stream metadata as reported by `ffprobe -show_format -show_streams`
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,

    pub format: Option<ProbeFormat>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ProbeStream {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ProbeFormat {
    pub filename: Option<String>,

    #[serde(default, deserialize_with = "number")]
    pub size: Option<f64>,

    /// Duration in seconds
    #[serde(default, deserialize_with = "number")]
    pub duration: Option<f64>,

    pub tags: Option<ProbeTags>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ProbeTags {
    /// ISO 6709 location, e.g. "-29.6687+153.1090/"
    pub location: Option<String>,

    /// RFC 3339 creation time, e.g. "2019-02-14T14:02:17.000000Z"
    pub creation_time: Option<String>,
}

/// ffprobe reports most numbers as strings, so accept either representation.
fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Number(f64),
        Text(String),
    }

    Ok(
        match <Option<Numeric> as serde::Deserialize>::deserialize(deserializer)? {
            Some(Numeric::Number(number)) => Some(number),
            Some(Numeric::Text(text)) => text.trim().parse().ok(),
            None => None,
        },
    )
}

/// Source of video container metadata
pub trait VideoProbe: Send + Sync {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<ProbeData>>;
}

/// [VideoProbe] which runs the `ffprobe` executable
pub struct Ffprobe;

impl VideoProbe for Ffprobe {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<ProbeData>> {
        async move {
            let output = Command::new("ffprobe")
                .arg("-v")
                .arg("quiet")
                .arg("-print_format")
                .arg("json")
                .arg("-show_format")
                .arg("-show_streams")
                .arg(path)
                .output()
                .await?;

            if output.status.success() {
                Ok(serde_json::from_slice(&output.stdout)?)
            } else {
                Err(anyhow!(
                    "error running ffprobe: {}",
                    String::from_utf8_lossy(&output.stderr)
                ))
            }
        }
        .boxed()
    }
}
