//! This module provides label scanning: [LabelDetector] abstracts an external image labeling service, with
//! [GoogleVision] as the production implementation, and [scan] prepares an image or video for it.

use {
    crate::{error::ArchiveError, preview},
    anyhow::{anyhow, Result},
    archivist_shared::MediaType,
    futures::future::{BoxFuture, FutureExt},
    serde_derive::Deserialize,
    serde_json::json,
    std::{collections::BTreeMap, path::Path},
    tracing::warn,
};

const GOOGLE_VISION_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Default longest side, in pixels, of images sent for labeling
pub const SCAN_SIZE: u32 = 1600;

const MAX_RESULTS: u32 = 100;

/// External source of descriptive labels for images
pub trait LabelDetector: Send + Sync {
    /// Return labels describing the JPEG `image`, mapped to confidence scores between 0 and 1.
    fn detect(&self, image: Vec<u8>) -> BoxFuture<'_, Result<BTreeMap<String, f64>>>;
}

#[derive(Deserialize, Debug)]
struct LabelAnnotation {
    description: String,
    score: f64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    label_annotations: Option<Vec<LabelAnnotation>>,
}

#[derive(Deserialize, Debug)]
struct BatchAnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

impl BatchAnnotateResponse {
    fn labels(self) -> Result<BTreeMap<String, f64>> {
        self.responses
            .into_iter()
            .next()
            .and_then(|response| response.label_annotations)
            .map(|annotations| {
                annotations
                    .into_iter()
                    .map(|annotation| (annotation.description.to_lowercase(), annotation.score))
                    .collect()
            })
            .ok_or_else(|| anyhow!("invalid annotations response"))
    }
}

/// [LabelDetector] backed by the Google Cloud Vision API
pub struct GoogleVision {
    client: reqwest::Client,
    key: Option<String>,
}

impl GoogleVision {
    /// Create a new instance which uses the specified client, which should be configured with a request timeout.
    pub fn new(client: reqwest::Client, key: Option<String>) -> Self {
        Self { client, key }
    }
}

impl LabelDetector for GoogleVision {
    fn detect(&self, image: Vec<u8>) -> BoxFuture<'_, Result<BTreeMap<String, f64>>> {
        async move {
            let key = self
                .key
                .as_deref()
                .ok_or_else(|| anyhow!("no vision API key configured"))?;

            self.client
                .post(GOOGLE_VISION_URL)
                .query(&[("key", key)])
                .json(&json!({
                    "requests": [{
                        "image": { "content": base64::encode(&image) },
                        "features": [{ "type": "LABEL_DETECTION", "maxResults": MAX_RESULTS }]
                    }]
                }))
                .send()
                .await?
                .error_for_status()?
                .json::<BatchAnnotateResponse>()
                .await?
                .labels()
        }
        .boxed()
    }
}

/// Request labels for `file`, using the first frame if it is a video.
///
/// The image is scaled to fit within `size` pixels (default [SCAN_SIZE]) before it is sent.  Any failure is
/// reported as [ArchiveError::ExternalServiceFailure].
pub async fn scan(
    detector: &dyn LabelDetector,
    poster_dir: &Path,
    file: &str,
    media_type: MediaType,
    size: Option<u32>,
) -> Result<BTreeMap<String, f64>, ArchiveError> {
    let result = async {
        let image = match media_type {
            MediaType::Image => Path::new(file).to_owned(),
            MediaType::Video => preview::extract_poster(poster_dir, file).await?,
        };

        let data = preview::resized_jpeg(&image, size.unwrap_or(SCAN_SIZE)).await?;

        detector.detect(data).await
    }
    .await;

    result.map_err(|e| {
        warn!("unable to scan {}: {:?}", file, e);

        ArchiveError::ExternalServiceFailure(format!("unable to process file '{}': {}", file, e))
    })
}
