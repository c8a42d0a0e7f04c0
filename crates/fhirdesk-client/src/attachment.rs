//! 附件读取与编码
//!
//! 本地文件读取为base64文本，直接内嵌在资源JSON中上传。

use base64::{engine::general_purpose, Engine as _};
use fhirdesk_core::{Attachment, DeskError, Result};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

fn content_type_from_extension(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(content_type)
}

/// 判断内容类型：先识别文件头，再看扩展名，最后回退为octet-stream
pub fn detect_content_type(path: &Path, bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .or_else(|| content_type_from_extension(path))
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

/// 由原始字节构造附件，附带新生成的附件ID
pub fn attachment_from_bytes(content_type: &str, bytes: &[u8]) -> Attachment {
    Attachment {
        content_type: Some(content_type.to_string()),
        data: Some(general_purpose::STANDARD.encode(bytes)),
        id: Some(Uuid::new_v4().to_string()),
    }
}

/// 异步读取本地文件为附件
pub async fn read_attachment(path: impl AsRef<Path>) -> Result<Attachment> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        DeskError::Attachment(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let content_type = detect_content_type(path, &bytes);
    debug!(
        "Read attachment {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        content_type
    );
    Ok(attachment_from_bytes(&content_type, &bytes))
}

/// 解析 `data:<type>;base64,<payload>`
pub fn parse_data_url(data_url: &str) -> Result<Attachment> {
    let invalid = || DeskError::Attachment(format!("Not a base64 data URL: {:.40}", data_url));

    let rest = data_url.strip_prefix("data:").ok_or_else(invalid)?;
    let (meta, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let content_type = meta.strip_suffix(";base64").ok_or_else(invalid)?;

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| DeskError::Attachment(format!("Invalid base64 payload: {}", e)))?;

    Ok(Attachment {
        content_type: (!content_type.is_empty()).then(|| content_type.to_string()),
        data: Some(payload.to_string()),
        id: Some(Uuid::new_v4().to_string()),
    })
}

/// 附件转换为可直接显示的data URL
pub fn to_data_url(attachment: &Attachment) -> Option<String> {
    if !attachment.has_data() {
        return None;
    }
    Some(format!(
        "data:{};base64,{}",
        attachment.content_type.as_deref().unwrap_or(FALLBACK_CONTENT_TYPE),
        attachment.data.as_deref().unwrap_or_default()
    ))
}

/// 解码附件数据
pub fn decode_attachment(attachment: &Attachment) -> Result<Vec<u8>> {
    let data = attachment
        .data
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DeskError::Attachment("attachment has no data".to_string()))?;

    general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DeskError::Attachment(format!("Invalid base64 payload: {}", e)))
}
