//! Data loading for IOB-tagged training data.
//!
//! Two formats are understood:
//! - BIO TSV: one `token<TAB>tag` per line, a blank line between documents,
//!   `#` starts a comment line.
//! - JSON Lines: one `{"tokens": [...], "ner_tags": [...]}` object per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use seqtag_core::tagging::{BioTag, LabelSpace};
use seqtag_core::{Document, Result, SeqTagError};
use tracing::info;

/// Load a dataset, picking the format from the file extension
/// (`.jsonl`/`.json` for JSON Lines, anything else for BIO TSV).
pub fn load_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let documents = match path.extension().and_then(|ext| ext.to_str()) {
        Some("jsonl") | Some("json") => load_jsonl_dataset(path)?,
        _ => load_bio_dataset(path)?,
    };
    info!(
        path = %path.display(),
        documents = documents.len(),
        "Loaded dataset"
    );
    Ok(documents)
}

/// Load documents from a BIO TSV file.
pub fn load_bio_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(path)?);
    read_bio(reader)
}

fn read_bio<R: BufRead>(reader: R) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut tokens = Vec::new();
    let mut tags = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            if !tokens.is_empty() {
                documents.push(Document::labeled(
                    std::mem::take(&mut tokens),
                    std::mem::take(&mut tags),
                )?);
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let Some((token, tag)) = line.split_once('\t') else {
            return Err(SeqTagError::Configuration(format!(
                "line {line_no}: expected token<TAB>tag"
            )));
        };
        let tag = tag.trim();
        if BioTag::parse(tag).is_none() {
            return Err(SeqTagError::UnknownLabel {
                label: tag.to_string(),
                document: documents.len(),
                position: line_no,
            });
        }

        tokens.push(token.to_string());
        tags.push(tag.to_string());
    }

    // Don't forget the last document
    if !tokens.is_empty() {
        documents.push(Document::labeled(tokens, tags)?);
    }

    Ok(documents)
}

/// Load documents from a JSON Lines file.
pub fn load_jsonl_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(path)?);
    read_jsonl(reader)
}

fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let document: Document = serde_json::from_str(&line)
            .map_err(|e| SeqTagError::Configuration(format!("line {line_no}: {e}")))?;
        document
            .check()
            .map_err(|e| SeqTagError::Configuration(format!("line {line_no}: {e}")))?;
        if let Some(tag) = document
            .tags
            .iter()
            .flatten()
            .find(|tag| BioTag::parse(tag).is_none())
        {
            return Err(SeqTagError::UnknownLabel {
                label: tag.clone(),
                document: documents.len(),
                position: line_no,
            });
        }
        documents.push(document);
    }

    Ok(documents)
}

/// Check every gold tag against a fixed label space.
pub fn validate_documents(documents: &[Document], labels: &LabelSpace) -> Result<()> {
    for (idx, document) in documents.iter().enumerate() {
        labels.encode_document(document, idx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_bio() {
        let input = "# header\nTom\tB-Name\nhas\tO\nibuprofen\tB-Drug\n\n\nTom\tB-Name\n";
        let documents = read_bio(Cursor::new(input)).unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].tokens, vec!["Tom", "has", "ibuprofen"]);
        assert_eq!(
            documents[0].tags.as_deref(),
            Some(&["B-Name".to_string(), "O".to_string(), "B-Drug".to_string()][..])
        );
        assert_eq!(documents[1].len(), 1);
    }

    #[test]
    fn test_read_bio_rejects_bad_tag() {
        let err = read_bio(Cursor::new("Tom\tB-Name\n\nhas\tX-Drug\n")).unwrap_err();
        match err {
            SeqTagError::UnknownLabel {
                label,
                document,
                position,
            } => {
                assert_eq!(label, "X-Drug");
                assert_eq!(document, 1);
                assert_eq!(position, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_bio_rejects_missing_column() {
        let err = read_bio(Cursor::new("Tom B-Name\n")).unwrap_err();
        assert!(matches!(err, SeqTagError::Configuration(_)));
    }

    #[test]
    fn test_read_jsonl() {
        let input = concat!(
            r#"{"tokens": ["Tom", "has", "ibuprofen"], "ner_tags": ["B-Name", "O", "B-Drug"]}"#,
            "\n\n",
            r#"{"tokens": ["aspirin"]}"#,
            "\n"
        );
        let documents = read_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents[1].tags.is_none());
    }

    #[test]
    fn test_read_jsonl_length_mismatch() {
        let input = r#"{"tokens": ["Tom", "has"], "ner_tags": ["B-Name"]}"#;
        let err = read_jsonl(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, SeqTagError::Configuration(msg) if msg.starts_with("line 1")));
    }

    #[test]
    fn test_validate_documents() {
        let labels = LabelSpace::from_entities(&["Drug"]).unwrap();
        let good = vec![Document::labeled(["aspirin"], ["B-Drug"]).unwrap()];
        assert!(validate_documents(&good, &labels).is_ok());

        let bad = vec![
            Document::labeled(["aspirin"], ["B-Drug"]).unwrap(),
            Document::labeled(["Tom"], ["B-Name"]).unwrap(),
        ];
        let err = validate_documents(&bad, &labels).unwrap_err();
        assert!(matches!(err, SeqTagError::UnknownLabel { document: 1, .. }));
    }
}
