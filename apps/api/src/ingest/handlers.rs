use std::collections::HashMap;

use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::ingest::{parse_file, ParsedTable, UploadedFile};

/// A multipart upload split into its file part and any plain text fields.
pub struct MultipartUpload {
    pub file: UploadedFile,
    pub fields: HashMap<String, String>,
}

/// Drains a multipart body. The file is taken from the `file` part; every other
/// named part is collected as text.
pub async fn read_multipart_upload(mut multipart: Multipart) -> Result<MultipartUpload, AppError> {
    let mut file = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Malformed multipart body"))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| multipart_error(e, "Failed to read upload"))?;
            file = Some(UploadedFile::new(file_name, bytes));
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| multipart_error(e, &format!("Failed to read field '{name}'")))?;
            fields.insert(name, text);
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("Missing 'file' part".to_string()))?;
    Ok(MultipartUpload { file, fields })
}

/// Hitting the body limit surfaces as a 413 from the extractor; anything else is a
/// malformed request.
fn multipart_error(e: MultipartError, context: &str) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::Validation(format!("{context}: {}", e.body_text()))
    }
}

/// POST /api/v1/files/parse
pub async fn handle_parse_file(multipart: Multipart) -> Result<Json<ParsedTable>, AppError> {
    let upload = read_multipart_upload(multipart).await?;
    let table = parse_file(upload.file).await?;
    Ok(Json(table))
}
