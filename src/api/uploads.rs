// =============================================================================
// Image uploads — operator-attached charts and screenshots
// =============================================================================
//
// Accepted extensions: png, jpg, jpeg, gif, webp; size capped by the
// router's body limit (16 MB). Stored filenames are timestamped and
// sanitized so a hostile filename cannot escape the uploads directory.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::api::ApiState;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

type ApiError = (StatusCode, Json<Value>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Strip anything path-like from a client-supplied filename.
fn sanitize_stem(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);

    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

pub async fn upload_image(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let Some(original_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        let Some(extension) = extension_of(&original_name) else {
            return Err(error(
                StatusCode::BAD_REQUEST,
                format!(
                    "file type not allowed: use one of {}",
                    ALLOWED_EXTENSIONS.join(", ")
                ),
            ));
        };

        let bytes = field
            .bytes()
            .await
            .map_err(|e| error(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()))?;
        if bytes.is_empty() {
            return Err(error(StatusCode::BAD_REQUEST, "uploaded file is empty"));
        }

        let uploads_dir = state.settings.uploads_dir();
        std::fs::create_dir_all(&uploads_dir)
            .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let filename = format!(
            "{}_{}.{extension}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            sanitize_stem(&original_name)
        );
        let path = uploads_dir.join(&filename);
        std::fs::write(&path, &bytes)
            .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        info!(path = %path.display(), bytes = bytes.len(), "image uploaded");
        return Ok(Json(json!({
            "success": true,
            "path": path.display().to_string(),
            "filename": filename,
            "size_bytes": bytes.len(),
        })));
    }

    Err(error(StatusCode::BAD_REQUEST, "no file field in request"))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_whitelist() {
        assert_eq!(extension_of("chart.png").as_deref(), Some("png"));
        assert_eq!(extension_of("CHART.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("pic.webp").as_deref(), Some("webp"));
        assert!(extension_of("script.sh").is_none());
        assert!(extension_of("noextension").is_none());
    }

    #[test]
    fn sanitization_strips_paths_and_specials() {
        assert_eq!(sanitize_stem("../../etc/passwd.png"), "passwd");
        assert_eq!(sanitize_stem("my chart (1).png"), "my_chart__1_");
        assert_eq!(sanitize_stem(".png"), "upload");
        assert!(sanitize_stem(&"x".repeat(200)).len() <= 64);
    }
}
