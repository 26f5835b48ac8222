//! Document data model and file formats.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of the `documents` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_name: String,
    /// Storage key inside the documents bucket.
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn format(&self) -> DocumentFormat {
        DocumentFormat::from_file_name(&self.file_name)
    }
}

/// Insert payload for a new document row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub created_by: Uuid,
}

impl NewDocument {
    pub fn into_document(self, id: Uuid, now: DateTime<Utc>) -> Document {
        Document {
            id,
            name: self.name,
            description: self.description,
            file_name: self.file_name,
            file_path: self.file_path,
            file_size: self.file_size,
            mime_type: self.mime_type,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a document row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentPatch {
    pub fn apply(&self, doc: &mut Document) {
        if let Some(name) = &self.name {
            doc.name = name.clone();
        }
        if let Some(description) = &self.description {
            doc.description = description.clone();
        }
        if let Some(updated_at) = self.updated_at {
            doc.updated_at = updated_at;
        }
    }
}

/// Known document formats, best preview candidate first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Doc,
    Markdown,
    Html,
    Text,
    Unknown,
}

/// Recognized extensions. Matched as lowercase suffixes.
const KNOWN_EXTENSIONS: &[(&str, DocumentFormat)] = &[
    (".pdf", DocumentFormat::Pdf),
    (".docx", DocumentFormat::Docx),
    (".doc", DocumentFormat::Doc),
    (".markdown", DocumentFormat::Markdown),
    (".md", DocumentFormat::Markdown),
    (".html", DocumentFormat::Html),
    (".htm", DocumentFormat::Html),
    (".txt", DocumentFormat::Text),
];

impl DocumentFormat {
    pub fn from_file_name(file_name: &str) -> Self {
        split_extension(file_name).1
    }

    /// Preview preference; lower is better. `Unknown` ranks after all others.
    pub fn rank(&self) -> u8 {
        match self {
            DocumentFormat::Pdf => 0,
            DocumentFormat::Docx => 1,
            DocumentFormat::Doc => 2,
            DocumentFormat::Markdown => 3,
            DocumentFormat::Html => 4,
            DocumentFormat::Text => 5,
            DocumentFormat::Unknown => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Docx => "Word",
            DocumentFormat::Doc => "Word 97",
            DocumentFormat::Markdown => "Markdown",
            DocumentFormat::Html => "HTML",
            DocumentFormat::Text => "Text",
            DocumentFormat::Unknown => "File",
        }
    }

    /// Short extension tag, as shown in the format picker.
    pub fn tag(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Doc => "doc",
            DocumentFormat::Markdown => "md",
            DocumentFormat::Html => "html",
            DocumentFormat::Text => "txt",
            DocumentFormat::Unknown => "other",
        }
    }

    /// Content type used when uploading.
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Doc => "application/msword",
            DocumentFormat::Markdown => "text/markdown",
            DocumentFormat::Html => "text/html",
            DocumentFormat::Text => "text/plain",
            DocumentFormat::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Split a file name into (stem, format). Unknown extensions are not stripped.
pub fn split_extension(file_name: &str) -> (&str, DocumentFormat) {
    let lowered = file_name.to_ascii_lowercase();
    for (ext, format) in KNOWN_EXTENSIONS {
        if lowered.ends_with(ext) && lowered.len() > ext.len() {
            return (&file_name[..file_name.len() - ext.len()], *format);
        }
    }
    (file_name, DocumentFormat::Unknown)
}

/// Human-readable size: `512 B`, `1.5 KB`, `3.2 MB`, `1.0 GB`.
pub fn format_file_size(bytes: i64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes.max(0));
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert_eq!(DocumentFormat::from_file_name("Report.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_file_name("notes.md"), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_file_name("page.htm"), DocumentFormat::Html);
        assert_eq!(DocumentFormat::from_file_name("brief.doc"), DocumentFormat::Doc);
        assert_eq!(DocumentFormat::from_file_name("brief.docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_file_name("data.csv"), DocumentFormat::Unknown);
    }

    #[test]
    fn split_keeps_unknown_extensions() {
        assert_eq!(split_extension("Report.pdf"), ("Report", DocumentFormat::Pdf));
        assert_eq!(split_extension("v1.2.txt"), ("v1.2", DocumentFormat::Text));
        assert_eq!(split_extension("data.csv"), ("data.csv", DocumentFormat::Unknown));
        assert_eq!(split_extension(".pdf"), (".pdf", DocumentFormat::Unknown));
    }

    #[test]
    fn rank_is_total_and_unknown_last() {
        let ordered = [
            DocumentFormat::Pdf,
            DocumentFormat::Docx,
            DocumentFormat::Doc,
            DocumentFormat::Markdown,
            DocumentFormat::Html,
            DocumentFormat::Text,
            DocumentFormat::Unknown,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn file_size_formatting() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn document_row_parses() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000007",
            "name": "Report",
            "description": null,
            "file_name": "Report.pdf",
            "file_path": "abc/Report.pdf",
            "file_size": 2048,
            "mime_type": "application/pdf",
            "created_by": "00000000-0000-0000-0000-000000000001",
            "created_at": "2026-10-01T00:00:00Z",
            "updated_at": "2026-10-01T00:00:00Z"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.format(), DocumentFormat::Pdf);
        assert_eq!(doc.file_size, 2048);
    }
}
