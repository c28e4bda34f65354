use serde::Serialize;

use crate::error::{AppError, Result};

/// Maximum accepted upload size.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Extensions accepted for upload.
const ALLOWED_EXTENSIONS: [&str; 5] = ["txt", "pdf", "png", "jpg", "jpeg"];

/// Broad category of an accepted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Image,
    Pdf,
}

/// A validated upload, ready for the chat pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub filename: String,
    pub size: usize,
    pub kind: FileKind,
    pub mime_type: &'static str,
    /// Decoded content for text files.
    pub text: Option<String>,
    /// Raw bytes for images, kept for the description call.
    pub bytes: Option<Vec<u8>>,
}

impl ProcessedFile {
    /// Attachment metadata stored with the message and echoed to the client.
    /// Raw bytes never leave the request.
    pub fn meta(&self) -> serde_json::Value {
        let mut meta = serde_json::json!({
            "filename": self.filename,
            "size": self.size,
            "type": match self.kind {
                FileKind::Text => "text",
                FileKind::Image => "image",
                FileKind::Pdf => "pdf",
            },
            "mime_type": self.mime_type,
        });
        if let Some(text) = &self.text {
            meta["line_count"] = serde_json::json!(text.lines().count());
            meta["character_count"] = serde_json::json!(text.chars().count());
        }
        meta
    }
}

/// Validates and classifies an upload.
///
/// The declared extension must agree with the sniffed content type; a PNG
/// renamed to `.txt` is rejected rather than fed to the model.
pub fn process_upload(filename: &str, bytes: Vec<u8>) -> Result<ProcessedFile> {
    if bytes.is_empty() {
        return Err(AppError::Validation("File is empty".to_string()));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(AppError::Validation(format!(
            "File too large. Maximum size: {}MB",
            MAX_FILE_SIZE / (1024 * 1024)
        )));
    }

    let filename = sanitize_filename(filename);
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .ok_or_else(|| AppError::Validation("File has no extension".to_string()))?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Validation(format!(
            "File type not supported. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let size = bytes.len();
    let sniffed = infer::get(&bytes);

    match extension.as_str() {
        "png" | "jpg" | "jpeg" => {
            let mime_type = match sniffed.map(|t| t.mime_type()) {
                Some("image/png") if extension == "png" => "image/png",
                Some("image/jpeg") if extension != "png" => "image/jpeg",
                _ => {
                    return Err(AppError::Validation(
                        "File content does not match its image extension".to_string(),
                    ));
                }
            };
            Ok(ProcessedFile {
                filename,
                size,
                kind: FileKind::Image,
                mime_type,
                text: None,
                bytes: Some(bytes),
            })
        }
        "pdf" => {
            if sniffed.map(|t| t.mime_type()) != Some("application/pdf") {
                return Err(AppError::Validation(
                    "File content does not match its PDF extension".to_string(),
                ));
            }
            Ok(ProcessedFile {
                filename,
                size,
                kind: FileKind::Pdf,
                mime_type: "application/pdf",
                text: None,
                bytes: None,
            })
        }
        _ => {
            // txt: refuse binary payloads masquerading as text
            if sniffed.is_some() {
                return Err(AppError::Validation(
                    "File content does not match its text extension".to_string(),
                ));
            }
            let text = String::from_utf8(bytes)
                .map_err(|_| AppError::Validation("Unable to decode text file".to_string()))?;
            Ok(ProcessedFile {
                filename,
                size,
                kind: FileKind::Text,
                mime_type: "text/plain",
                text: Some(text),
                bytes: None,
            })
        }
    }
}

/// Strips path components and replaces unsafe characters.
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut sanitized: String = basename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.len() > 255 {
        // cut on a char boundary so multibyte names cannot panic here
        let mut cut = 255;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    #[test]
    fn accepts_text_file_with_counts() {
        let processed = process_upload("notes.txt", b"line one\nline two".to_vec()).unwrap();
        assert_eq!(processed.kind, FileKind::Text);
        assert_eq!(processed.text.as_deref(), Some("line one\nline two"));
        let meta = processed.meta();
        assert_eq!(meta["line_count"], 2);
        assert_eq!(meta["filename"], "notes.txt");
    }

    #[test]
    fn accepts_png_by_magic_bytes() {
        let processed = process_upload("shot.png", png_bytes()).unwrap();
        assert_eq!(processed.kind, FileKind::Image);
        assert_eq!(processed.mime_type, "image/png");
        assert!(processed.bytes.is_some());
    }

    #[test]
    fn rejects_png_masquerading_as_text() {
        let err = process_upload("shot.txt", png_bytes()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_disallowed_extension() {
        let err = process_upload("tool.exe", b"MZ....".to_vec()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_empty_and_oversized_files() {
        assert!(process_upload("empty.txt", Vec::new()).is_err());
        assert!(process_upload("big.txt", vec![b'a'; MAX_FILE_SIZE + 1]).is_err());
    }

    #[test]
    fn sanitizes_path_traversal_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir\\evil name?.txt"), "evil_name_.txt");
    }

    #[test]
    fn truncates_long_multibyte_names_without_panicking() {
        let name = format!("{}.txt", "é".repeat(200));
        let sanitized = sanitize_filename(&name);
        assert!(sanitized.len() <= 255);
        assert!(sanitized.chars().all(|c| c == 'é'));

        let cjk = format!("{}.png", "文".repeat(120));
        let sanitized = sanitize_filename(&cjk);
        assert!(sanitized.len() <= 255);
    }
}
