//! # IOB Label Space
//!
//! Maps entity tag strings to dense ids and back. Tags follow the IOB scheme:
//! `O` for tokens outside any entity, `B-<TYPE>` for the first token of an
//! entity and `I-<TYPE>` for its continuation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{Result, SeqTagError};

/// The tag used for tokens outside any entity.
pub const OUTSIDE: &str = "O";

/// Score added to illegal IOB transitions when transitions are constrained.
pub const TRANSITION_PENALTY: f32 = -10000.0;

/// Entity boundary marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    Begin,
    Inside,
    Outside,
}

/// A parsed IOB tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BioTag {
    boundary: Boundary,
    entity: Option<String>,
}

impl BioTag {
    pub fn outside() -> Self {
        Self {
            boundary: Boundary::Outside,
            entity: None,
        }
    }

    pub fn begin(entity: impl Into<String>) -> Self {
        Self {
            boundary: Boundary::Begin,
            entity: Some(entity.into()),
        }
    }

    pub fn inside(entity: impl Into<String>) -> Self {
        Self {
            boundary: Boundary::Inside,
            entity: Some(entity.into()),
        }
    }

    /// Parse `O`, `B-<TYPE>` or `I-<TYPE>`.
    pub fn parse(tag: &str) -> Option<Self> {
        if tag == OUTSIDE {
            return Some(Self::outside());
        }
        let (prefix, entity) = tag.split_once('-')?;
        if entity.is_empty() {
            return None;
        }
        match prefix {
            "B" => Some(Self::begin(entity)),
            "I" => Some(Self::inside(entity)),
            _ => None,
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Check if this is a "Begin" tag.
    pub fn is_begin(&self) -> bool {
        self.boundary == Boundary::Begin
    }

    /// Check if this is an "Inside" tag.
    pub fn is_inside(&self) -> bool {
        self.boundary == Boundary::Inside
    }

    /// Get the entity type for this tag.
    pub fn entity_type(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// Check if transitioning from `from` tag to `to` tag is valid.
    ///
    /// `I-X` may only follow `B-X` or `I-X`; everything else is allowed.
    pub fn is_valid_transition(from: &BioTag, to: &BioTag) -> bool {
        if !to.is_inside() {
            return true;
        }
        from.boundary != Boundary::Outside && from.entity == to.entity
    }

    /// Whether a sequence may begin with this tag.
    pub fn can_start(&self) -> bool {
        !self.is_inside()
    }
}

impl fmt::Display for BioTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.boundary, &self.entity) {
            (Boundary::Begin, Some(entity)) => write!(f, "B-{entity}"),
            (Boundary::Inside, Some(entity)) => write!(f, "I-{entity}"),
            _ => write!(f, "{OUTSIDE}"),
        }
    }
}

/// A closed, ordered set of IOB tags agreed at construction time.
///
/// Serializes as its list of tag strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSpace {
    tags: Vec<BioTag>,
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelSpace {
    /// Build the full IOB tag set for the given entity types.
    ///
    /// `O` always receives id 0, followed by `B-X`, `I-X` for each entity in
    /// the given order. Duplicate entity names are ignored.
    pub fn from_entities<S: AsRef<str>>(entities: &[S]) -> Result<Self> {
        let mut tags = vec![BioTag::outside()];
        for entity in entities {
            let entity = entity.as_ref().trim();
            if entity.is_empty() {
                return Err(SeqTagError::Configuration(
                    "entity names must not be empty".into(),
                ));
            }
            let begin = BioTag::begin(entity);
            if tags.contains(&begin) {
                continue;
            }
            tags.push(begin);
            tags.push(BioTag::inside(entity));
        }
        Self::from_bio_tags(tags)
    }

    /// Build a label space from an explicit tag list. `O` must be present.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        let parsed = tags
            .iter()
            .map(|tag| {
                BioTag::parse(tag.as_ref()).ok_or_else(|| {
                    SeqTagError::Configuration(format!("{:?} is not an IOB tag", tag.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_bio_tags(parsed)
    }

    /// Infer the entity types present in labeled documents.
    ///
    /// Entity types are sorted alphabetically so the id assignment does not
    /// depend on document order.
    pub fn from_documents(documents: &[Document]) -> Result<Self> {
        let mut entities = BTreeSet::new();
        for (doc_idx, doc) in documents.iter().enumerate() {
            let Some(tags) = &doc.tags else { continue };
            for (pos, tag) in tags.iter().enumerate() {
                let parsed = BioTag::parse(tag).ok_or_else(|| SeqTagError::UnknownLabel {
                    label: tag.clone(),
                    document: doc_idx,
                    position: pos,
                })?;
                if let Some(entity) = parsed.entity_type() {
                    entities.insert(entity.to_string());
                }
            }
        }
        let entities: Vec<String> = entities.into_iter().collect();
        Self::from_entities(&entities)
    }

    fn from_bio_tags(tags: Vec<BioTag>) -> Result<Self> {
        if !tags.contains(&BioTag::outside()) {
            return Err(SeqTagError::Configuration(format!(
                "label set must contain {OUTSIDE:?}"
            )));
        }
        let names: Vec<String> = tags.iter().map(ToString::to_string).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            if index.insert(name.clone(), id).is_some() {
                return Err(SeqTagError::Configuration(format!(
                    "duplicate tag {name:?} in label set"
                )));
            }
        }
        Ok(Self { tags, names, index })
    }

    /// Total number of distinct tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always `false`: a label space holds at least `O`.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Id of the `O` tag.
    pub fn outside_id(&self) -> usize {
        self.index[OUTSIDE]
    }

    /// Get the tag id, if the tag belongs to this space.
    pub fn encode(&self, tag: &str) -> Option<usize> {
        self.index.get(tag).copied()
    }

    /// Encode a tag found in training data, reporting where it came from.
    pub fn encode_at(&self, tag: &str, document: usize, position: usize) -> Result<usize> {
        self.encode(tag).ok_or_else(|| SeqTagError::UnknownLabel {
            label: tag.to_string(),
            document,
            position,
        })
    }

    /// Encode every gold tag of a document.
    pub fn encode_document(&self, doc: &Document, document: usize) -> Result<Vec<usize>> {
        doc.check()?;
        let tags = doc.tags.as_deref().unwrap_or_default();
        tags.iter()
            .enumerate()
            .map(|(pos, tag)| self.encode_at(tag, document, pos))
            .collect()
    }

    /// Get the tag string for an id.
    pub fn decode(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn bio_tag(&self, id: usize) -> Option<&BioTag> {
        self.tags.get(id)
    }

    /// Get all tags in id order.
    pub fn tags(&self) -> &[String] {
        &self.names
    }

    /// Entity types in first-appearance order.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for tag in &self.tags {
            if let Some(entity) = tag.entity_type() {
                if !seen.contains(&entity) {
                    seen.push(entity);
                }
            }
        }
        seen
    }

    /// `[from][to]` matrix: 0 for legal transitions, [`TRANSITION_PENALTY`] otherwise.
    pub fn transition_penalties(&self) -> Vec<Vec<f32>> {
        self.tags
            .iter()
            .map(|from| {
                self.tags
                    .iter()
                    .map(|to| {
                        if BioTag::is_valid_transition(from, to) {
                            0.0
                        } else {
                            TRANSITION_PENALTY
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Per-tag penalty for starting a sequence.
    pub fn start_penalties(&self) -> Vec<f32> {
        self.tags
            .iter()
            .map(|tag| if tag.can_start() { 0.0 } else { TRANSITION_PENALTY })
            .collect()
    }
}

impl TryFrom<Vec<String>> for LabelSpace {
    type Error = SeqTagError;

    fn try_from(tags: Vec<String>) -> Result<Self> {
        Self::from_tags(&tags)
    }
}

impl From<LabelSpace> for Vec<String> {
    fn from(space: LabelSpace) -> Self {
        space.names
    }
}
