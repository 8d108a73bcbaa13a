//! Entity assembly from word-level IOB tags.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::tagging::bio_tags::BioTag;
use crate::text::tokenizer::Token;

/// A contiguous entity mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub label: String,
    /// First token index (inclusive)
    pub start_token: usize,
    /// Last token index (exclusive)
    pub end_token: usize,
    /// Byte offsets into the source text
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Group word tags into labelled token ranges.
///
/// An `I-X` that does not continue an open `X` entity opens a new one, so a
/// model that skips the `B-` still yields the mention. Unparsable tags count
/// as outside.
pub fn entity_spans<S: AsRef<str>>(tags: &[S]) -> Vec<(String, Range<usize>)> {
    let mut spans: Vec<(String, Range<usize>)> = Vec::new();
    let mut open: Option<(String, usize)> = None;

    for (i, tag) in tags.iter().enumerate() {
        let tag = BioTag::parse(tag.as_ref()).unwrap_or_else(BioTag::outside);
        let continues = match (&open, tag.entity_type()) {
            (Some((label, _)), Some(entity)) => tag.is_inside() && label == entity,
            _ => false,
        };
        if continues {
            continue;
        }
        if let Some((label, start)) = open.take() {
            spans.push((label, start..i));
        }
        if let Some(entity) = tag.entity_type() {
            open = Some((entity.to_string(), i));
        }
    }
    if let Some((label, start)) = open {
        spans.push((label, start..tags.len()));
    }
    spans
}

/// Build entities with source offsets from tokens and their predicted tags.
///
/// Tags beyond the token list are ignored.
pub fn assemble_entities<S: AsRef<str>>(input: &str, tokens: &[Token], tags: &[S]) -> Vec<Entity> {
    let tags = &tags[..tags.len().min(tokens.len())];
    entity_spans(tags)
        .into_iter()
        .filter_map(|(label, range)| {
            let start = tokens[range.start].start;
            let end = tokens[range.end - 1].end;
            let text = input.get(start..end)?.to_string();
            Some(Entity {
                label,
                start_token: range.start,
                end_token: range.end,
                start,
                end,
                text,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokenizer::{DocumentTokenizer, WordTokenizer};

    #[test]
    fn spans_follow_iob() {
        let spans = entity_spans(&["B-Drug", "I-Drug", "O", "B-Dose", "B-Dose"]);
        assert_eq!(
            spans,
            vec![
                ("Drug".to_string(), 0..2),
                ("Dose".to_string(), 3..4),
                ("Dose".to_string(), 4..5),
            ]
        );
    }

    #[test]
    fn orphan_inside_opens_entity() {
        let spans = entity_spans(&["O", "I-Drug", "I-Drug", "I-Dose"]);
        assert_eq!(
            spans,
            vec![("Drug".to_string(), 1..3), ("Dose".to_string(), 3..4)]
        );
    }

    #[test]
    fn unparsable_tags_are_outside() {
        let spans = entity_spans(&["B-Drug", "???", "I-Drug"]);
        assert_eq!(
            spans,
            vec![("Drug".to_string(), 0..1), ("Drug".to_string(), 2..3)]
        );
    }

    #[test]
    fn assemble_with_offsets() {
        let input = "Tom takes aspirin 81 mg daily";
        let tokens = WordTokenizer::new().tokenize(input);
        let tags = ["O", "O", "B-Drug", "B-Strength", "I-Strength", "B-Frequency"];
        let entities = assemble_entities(input, &tokens, &tags);

        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].text, "aspirin");
        assert_eq!(entities[1].label, "Strength");
        assert_eq!(entities[1].text, "81 mg");
        assert_eq!((entities[1].start_token, entities[1].end_token), (3, 5));
        assert_eq!(&input[entities[2].start..entities[2].end], "daily");
    }

    #[test]
    fn offsets_are_bytes_into_non_ascii_text() {
        let input = "Zoë reçoit naproxène";
        let tokens = WordTokenizer::new().tokenize(input);
        let entities = assemble_entities(input, &tokens, &["B-Name", "O", "B-Drug"]);

        assert_eq!(entities.len(), 2);
        assert_eq!((entities[0].start, entities[0].end), (0, 4));
        assert_eq!(entities[1].start, 13);
        assert_eq!(entities[1].end, input.len());
        assert_eq!(&input[entities[1].start..entities[1].end], "naproxène");
    }

    #[test]
    fn assemble_ignores_extra_tags() {
        let input = "aspirin";
        let tokens = WordTokenizer::new().tokenize(input);
        let entities = assemble_entities(input, &tokens, &["B-Drug", "I-Drug"]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].end_token, 1);
    }
}
