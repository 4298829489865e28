//! Text extraction for knowledge items.
//!
//! Emails carry their body inline; documents are read from the blob store
//! and decoded by extension (`txt`, `docx`, `pdf`). Every result goes
//! through [`normalize`](teamkb_core::normalize::normalize) before it is
//! returned.

use std::io::Read;
use std::sync::Arc;

use quick_xml::events::Event;
use thiserror::Error;

use teamkb_core::models::{ItemKind, KnowledgeItem};
use teamkb_core::normalize::normalize;
use teamkb_core::store::BlobStore;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Document has no stored file path.")]
    MissingPath,
    #[error("Stored file is not readable.")]
    Unreadable,
    #[error("Unsupported document extension: {0}.")]
    UnsupportedExtension(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("Extraction task aborted: {0}")]
    Aborted(String),
}

/// Map an accepted upload MIME type to the extension used for its blob key.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        MIME_PDF => Some("pdf"),
        MIME_DOCX => Some("docx"),
        MIME_TEXT => Some("txt"),
        _ => None,
    }
}

/// Lowercase extension of a blob key, or an empty string.
fn extension_of(key: &str) -> String {
    std::path::Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Reads items' content and turns it into normalized plain text.
pub struct TextExtractor {
    blobs: Arc<dyn BlobStore>,
}

impl TextExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Normalized text for `item`. An empty string means the item had no
    /// usable text; the caller decides what that means.
    pub async fn extract(&self, item: &KnowledgeItem) -> Result<String, ExtractError> {
        match item.kind {
            ItemKind::Email => Ok(normalize(item.raw_text.as_deref().unwrap_or(""))),
            ItemKind::Document => {
                let key = item
                    .original_content_path
                    .as_deref()
                    .filter(|k| !k.is_empty())
                    .ok_or(ExtractError::MissingPath)?;
                let bytes = self.blobs.read(key).await.map_err(|e| {
                    tracing::warn!(item_id = item.id, error = %e, "blob read failed");
                    ExtractError::Unreadable
                })?;
                let ext = extension_of(key);
                let raw = tokio::task::spawn_blocking(move || extract_bytes(&bytes, &ext))
                    .await
                    .map_err(|e| ExtractError::Aborted(e.to_string()))??;
                Ok(normalize(&raw))
            }
        }
    }
}

/// Decode raw document bytes by extension. The result is not normalized.
pub fn extract_bytes(bytes: &[u8], ext: &str) -> Result<String, ExtractError> {
    match ext {
        "txt" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "docx" => extract_docx(bytes),
        "pdf" => extract_pdf(bytes),
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    walk_document_xml(&xml)
}

/// Walk `word/document.xml`: text runs are concatenated, `w:tab` becomes a
/// tab, `w:br`/`w:cr` a newline, and every paragraph ends with a newline.
fn walk_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    // Tab stops inside <w:tabs> are layout, not content.
    let mut in_tab_stops = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tabs" => in_tab_stops = true,
                b"tab" if !in_tab_stops => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" if !in_tab_stops => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"tabs" => in_tab_stops = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamkb_core::models::ItemStatus;
    use teamkb_core::store::memory::InMemoryBlobStore;

    fn item(kind: ItemKind, path: Option<&str>, raw: Option<&str>) -> KnowledgeItem {
        KnowledgeItem {
            id: 1,
            project_id: 1,
            kind,
            title: "t".into(),
            source_meta: serde_json::json!({}),
            original_content_path: path.map(str::to_string),
            raw_text: raw.map(str::to_string),
            status: ItemStatus::Pending,
            error_message: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn unsupported_extension_returns_error() {
        let err = extract_bytes(b"foo", "rtf").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported document extension: rtf.");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", "pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_bytes(b"not a zip", "docx").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn document_xml_structure_preserved() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:t>Name</w:t><w:tab/><w:t xml:space="preserve">Value &amp; more</w:t></w:r></w:p>
<w:p><w:r><w:t>line one</w:t><w:br/><w:t>line two</w:t></w:r></w:p>
</w:body></w:document>"#;
        let text = walk_document_xml(xml).unwrap();
        assert_eq!(text, "Name\tValue & more\nline one\nline two\n");
    }

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(extension_for_mime(MIME_PDF), Some("pdf"));
        assert_eq!(extension_for_mime(MIME_DOCX), Some("docx"));
        assert_eq!(extension_for_mime(MIME_TEXT), Some("txt"));
        assert_eq!(extension_for_mime("image/png"), None);
    }

    #[tokio::test]
    async fn email_body_is_normalized() {
        let extractor = TextExtractor::new(Arc::new(InMemoryBlobStore::new()));
        let text = extractor
            .extract(&item(ItemKind::Email, None, Some("  Hi\t\tteam\n\n\n\nBye ")))
            .await
            .unwrap();
        assert_eq!(text, "Hi team\n\nBye");
    }

    #[tokio::test]
    async fn document_without_path_fails() {
        let extractor = TextExtractor::new(Arc::new(InMemoryBlobStore::new()));
        let err = extractor
            .extract(&item(ItemKind::Document, None, None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Document has no stored file path.");
    }

    #[tokio::test]
    async fn missing_blob_is_unreadable() {
        let extractor = TextExtractor::new(Arc::new(InMemoryBlobStore::new()));
        let err = extractor
            .extract(&item(ItemKind::Document, Some("knowledge/1/x.txt"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable));
    }

    #[tokio::test]
    async fn text_document_read_from_blob() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs
            .store("knowledge/1/a.TXT", b"Plain   text\n\n\n\nbody")
            .await
            .unwrap();
        let extractor = TextExtractor::new(blobs);
        let text = extractor
            .extract(&item(ItemKind::Document, Some("knowledge/1/a.TXT"), None))
            .await
            .unwrap();
        assert_eq!(text, "Plain text\n\nbody");
    }
}
