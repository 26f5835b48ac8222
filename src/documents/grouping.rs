//! Document groups — rows sharing a file stem shown as one logical document
//! with several format variants.

use std::collections::HashMap;

use super::model::{Document, DocumentFormat, split_extension};

/// One logical document and its format variants, best format first.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGroup {
    /// Display stem, taken from the best-ranked member.
    pub stem: String,
    pub documents: Vec<Document>,
}

impl DocumentGroup {
    /// Default preview: the highest-ranked format.
    pub fn best(&self) -> Option<&Document> {
        self.documents.first()
    }

    /// Formats in picker order.
    pub fn formats(&self) -> Vec<DocumentFormat> {
        self.documents.iter().map(Document::format).collect()
    }

    pub fn total_size(&self) -> i64 {
        self.documents.iter().map(|d| d.file_size).sum()
    }
}

/// Grouping key: trimmed, lowercased stem.
pub fn group_key(file_name: &str) -> String {
    split_extension(file_name).0.trim().to_lowercase()
}

/// Group documents by stem. Groups keep first-appearance order; members are
/// sorted by format rank, ties keep input order.
pub fn group_documents(documents: Vec<Document>) -> Vec<DocumentGroup> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<DocumentGroup> = Vec::new();

    for doc in documents {
        let key = group_key(&doc.file_name);
        match slots.get(&key) {
            Some(&i) => groups[i].documents.push(doc),
            None => {
                slots.insert(key, groups.len());
                groups.push(DocumentGroup {
                    stem: String::new(),
                    documents: vec![doc],
                });
            }
        }
    }

    for group in &mut groups {
        group.documents.sort_by_key(|d| d.format().rank());
        if let Some(best) = group.documents.first() {
            group.stem = split_extension(&best.file_name).0.trim().to_string();
        }
    }
    groups
}

/// Back to flat rows, group by group.
pub fn flatten_groups(groups: &[DocumentGroup]) -> Vec<Document> {
    groups
        .iter()
        .flat_map(|g| g.documents.iter().cloned())
        .collect()
}

/// Find a group by stem, case-insensitively.
pub fn find_group<'a>(groups: &'a [DocumentGroup], stem: &str) -> Option<&'a DocumentGroup> {
    let key = stem.trim().to_lowercase();
    groups.iter().find(|g| g.stem.to_lowercase() == key)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::documents::model::NewDocument;

    fn doc(n: u128, file_name: &str) -> Document {
        NewDocument {
            name: file_name.to_string(),
            description: None,
            file_name: file_name.to_string(),
            file_path: format!("{n}/{file_name}"),
            file_size: 100,
            mime_type: DocumentFormat::from_file_name(file_name).mime_type().to_string(),
            created_by: Uuid::from_u128(1),
        }
        .into_document(Uuid::from_u128(n), Utc::now())
    }

    #[test]
    fn report_variants_rank_pdf_first() {
        let groups = group_documents(vec![
            doc(1, "Report.html"),
            doc(2, "Report.docx"),
            doc(3, "Report.pdf"),
        ]);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.stem, "Report");
        assert_eq!(group.best().unwrap().file_name, "Report.pdf");
        assert_eq!(
            group.formats(),
            vec![DocumentFormat::Pdf, DocumentFormat::Docx, DocumentFormat::Html]
        );
    }

    #[test]
    fn stems_group_case_insensitively_in_first_seen_order() {
        let groups = group_documents(vec![
            doc(1, "notes.md"),
            doc(2, "Plan.pdf"),
            doc(3, "NOTES.txt"),
            doc(4, "data.csv"),
        ]);
        let stems: Vec<&str> = groups.iter().map(|g| g.stem.as_str()).collect();
        assert_eq!(stems, vec!["notes", "Plan", "data.csv"]);
        assert_eq!(groups[0].documents.len(), 2);
    }

    #[test]
    fn unknown_format_sorts_last() {
        let groups = group_documents(vec![
            doc(1, "Report"),
            doc(2, "report.txt"),
            doc(3, "Report.pdf"),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].formats(),
            vec![DocumentFormat::Pdf, DocumentFormat::Text, DocumentFormat::Unknown]
        );
        assert_eq!(groups[0].stem, "Report");
    }

    #[test]
    fn only_trailing_extension_is_stripped() {
        let groups = group_documents(vec![doc(1, "x.txt"), doc(2, "X.TXT.bak"), doc(3, "x.doc")]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].formats(), vec![DocumentFormat::Doc, DocumentFormat::Text]);
        assert_eq!(groups[1].stem, "X.TXT.bak");
    }

    #[test]
    fn grouping_is_idempotent() {
        let first = group_documents(vec![
            doc(1, "b.txt"),
            doc(2, "a.pdf"),
            doc(3, "b.pdf"),
            doc(4, "a.md"),
            doc(5, "c"),
            doc(6, "NOTES.md"),
            doc(7, "notes.pdf"),
        ]);
        let second = group_documents(flatten_groups(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn lookup_helpers() {
        let groups = group_documents(vec![doc(1, "Report.pdf"), doc(2, "Report.md")]);
        let group = find_group(&groups, "report").unwrap();
        assert_eq!(group.total_size(), 200);
        assert_eq!(group.best().unwrap().id, Uuid::from_u128(1));
        assert!(find_group(&groups, "missing").is_none());
    }
}
