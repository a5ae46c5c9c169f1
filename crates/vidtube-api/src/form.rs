use std::collections::HashMap;

use axum::extract::Multipart;
use tracing::warn;

use vidtube_media::MediaFile;

use crate::error::ApiError;

/// A multipart body split into text fields and non-empty file parts.
#[derive(Debug, Default)]
pub struct FormParts {
    fields: HashMap<String, String>,
    files: HashMap<String, MediaFile>,
}

impl FormParts {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut parts = FormParts::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            warn!("Failed to read multipart field: {}", e);
            ApiError::invalid("Malformed form data")
        })? {
            let name = field.name().unwrap_or("").to_string();

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| {
                        warn!("Failed to read file part {}: {}", name, e);
                        ApiError::invalid("Malformed form data")
                    })?;
                    // Browsers send an empty part when no file was picked
                    if bytes.is_empty() {
                        continue;
                    }
                    parts.files.insert(
                        name,
                        MediaFile {
                            file_name,
                            content_type,
                            bytes,
                        },
                    );
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        warn!("Failed to read text part {}: {}", name, e);
                        ApiError::invalid("Malformed form data")
                    })?;
                    parts.fields.insert(name, text);
                }
            }
        }

        Ok(parts)
    }

    pub fn take_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn take_file(&mut self, name: &str) -> Option<MediaFile> {
        self.files.remove(name)
    }
}
