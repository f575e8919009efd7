//! Image attachments for a valuation record.
//!
//! Uploads for the four categories run concurrently; a failure in one file
//! is reported without affecting the others.

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCategory {
    Property,
    Location,
    Document,
    Area,
}

impl ImageCategory {
    pub const ALL: [ImageCategory; 4] = [
        ImageCategory::Property,
        ImageCategory::Location,
        ImageCategory::Document,
        ImageCategory::Area,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageCategory::Property => "property",
            ImageCategory::Location => "location",
            ImageCategory::Document => "document",
            ImageCategory::Area => "area",
        }
    }

    /// Accepts both `property` and the `propertyImages` form-field spelling.
    pub fn from_field(name: &str) -> Option<Self> {
        let name = name.strip_suffix("Images").unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug)]
pub struct PendingImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub category: ImageCategory,
    pub file_name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedUpload {
    pub category: ImageCategory,
    pub file_name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<UploadedImage>,
    pub failed: Vec<FailedUpload>,
}

/// Storage backend for record images. Returns the public URL of the file.
pub trait ImageSink: Send + Sync + 'static {
    fn store(
        &self,
        record_id: String,
        category: ImageCategory,
        image: PendingImage,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Upload every pending image concurrently and collect the outcome per file.
pub async fn upload_all<S: ImageSink>(
    sink: Arc<S>,
    record_id: &str,
    batches: Vec<(ImageCategory, Vec<PendingImage>)>,
) -> UploadReport {
    let handles: Vec<_> = batches
        .into_iter()
        .flat_map(|(category, images)| images.into_iter().map(move |image| (category, image)))
        .map(|(category, image)| {
            let sink = Arc::clone(&sink);
            let record_id = record_id.to_string();
            let file_name = image.file_name.clone();
            let handle = tokio::spawn(async move { sink.store(record_id, category, image).await });
            (category, file_name, handle)
        })
        .collect();

    let mut report = UploadReport::default();
    for (category, file_name, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(err) => Err(Error::Validation(format!("upload task aborted: {}", err))),
        };
        match outcome {
            Ok(url) => report.uploaded.push(UploadedImage {
                category,
                file_name,
                url,
            }),
            Err(err) => {
                warn!("upload of {} for {} failed: {}", file_name, record_id, err);
                report.failed.push(FailedUpload {
                    category,
                    file_name,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        "record {}: {} images uploaded, {} failed",
        record_id,
        report.uploaded.len(),
        report.failed.len()
    );
    report
}

/// Writes images to `<root>/<record>/<category>/<timestamp>_<name>`, served
/// under `/uploads`.
pub struct DiskImageSink {
    root: PathBuf,
}

impl DiskImageSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskImageSink { root: root.into() }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

impl ImageSink for DiskImageSink {
    fn store(
        &self,
        record_id: String,
        category: ImageCategory,
        image: PendingImage,
    ) -> impl Future<Output = Result<String>> + Send {
        async move {
            if image.bytes.is_empty() {
                return Err(Error::Validation(format!("{} is empty", image.file_name)));
            }
            let record_dir = sanitize(&record_id);
            let base = sanitize(&image.file_name);
            if record_dir.is_empty() || base.is_empty() {
                return Err(Error::Validation("invalid upload name".to_string()));
            }

            let file_name = format!("{}_{}", Utc::now().timestamp_millis(), base);
            let dir = self.root.join(&record_dir).join(category.as_str());
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(&file_name), &image.bytes).await?;

            Ok(format!("/uploads/{}/{}/{}", record_dir, category.as_str(), file_name))
        }
    }
}
