//! Shared typed models used across the store, cache and hierarchy layers.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CodebookError, CodebookResult};

pub type CodeId = i64;
pub type LanguageId = i64;
pub type CodebookId = i64;
pub type ProjectId = i64;
pub type RelationId = i64;
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Store rows
// ---------------------------------------------------------------------------

/// A row of the `codes` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub id: CodeId,
    pub uuid: Uuid,
}

/// A row of the `labels` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub code_id: CodeId,
    pub language_id: LanguageId,
    pub label: String,
}

/// A row of the `codebooks` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookRecord {
    pub id: CodebookId,
    pub project_id: ProjectId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Code
// ---------------------------------------------------------------------------

/// Cached outcome of a label lookup. A language missing from the cache has
/// not been checked yet; `Absent` means it was checked and has no label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelState {
    Present(String),
    Absent,
}

impl LabelState {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            LabelState::Present(label) => Some(label),
            LabelState::Absent => None,
        }
    }
}

impl From<Option<String>> for LabelState {
    fn from(label: Option<String>) -> Self {
        match label {
            Some(label) => LabelState::Present(label),
            None => LabelState::Absent,
        }
    }
}

/// A taxonomy node. Codes carry no label of their own; labels are looked
/// up per language and cached on the instance.
///
/// Equality and hashing use the identity only.
#[derive(Clone, Debug)]
pub struct Code {
    id: CodeId,
    uuid: Uuid,
    labels: BTreeMap<LanguageId, LabelState>,
}

impl Code {
    pub fn new(record: CodeRecord) -> Self {
        Self {
            id: record.id,
            uuid: record.uuid,
            labels: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> CodeId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cached_label(&self, language_id: LanguageId) -> Option<&LabelState> {
        self.labels.get(&language_id)
    }

    pub fn label_is_cached(&self, language_id: LanguageId) -> bool {
        self.labels.contains_key(&language_id)
    }

    pub fn has_cached_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn cache_label(&mut self, language_id: LanguageId, label: Option<String>) {
        self.labels.insert(language_id, LabelState::from(label));
    }

    /// Label in the lowest cached language that has one.
    pub fn first_cached_label(&self) -> Option<&str> {
        self.labels.values().find_map(LabelState::as_deref)
    }

    /// Best label available from the cache, or a `<Code: id>` placeholder.
    pub fn display_label(&self) -> String {
        match self.first_cached_label() {
            Some(label) => label.to_string(),
            None => self.placeholder_label(),
        }
    }

    pub fn placeholder_label(&self) -> String {
        format!("<Code: {}>", self.id)
    }
}

impl PartialEq for Code {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Code {}

impl Hash for Code {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// CodebookCode
// ---------------------------------------------------------------------------

/// True if the half-open windows `[from_a, to_a)` and `[from_b, to_b)`
/// share an instant. `None` bounds stand for -inf / +inf.
pub fn windows_overlap(
    from_a: Option<Timestamp>,
    to_a: Option<Timestamp>,
    from_b: Option<Timestamp>,
    to_b: Option<Timestamp>,
) -> bool {
    if let (Some(to_a), Some(from_b)) = (to_a, from_b) {
        if to_a <= from_b {
            return false;
        }
    }
    if let (Some(to_b), Some(from_a)) = (to_b, from_a) {
        if to_b <= from_a {
            return false;
        }
    }
    true
}

/// A persisted relation edge: `code` is a child of `parent` within one
/// codebook during `[validfrom, validto)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookCode {
    pub id: RelationId,
    pub codebook_id: CodebookId,
    pub code_id: CodeId,
    pub parent_id: Option<CodeId>,
    pub hide: bool,
    pub validfrom: Option<Timestamp>,
    pub validto: Option<Timestamp>,
    pub ordernr: i64,
}

impl CodebookCode {
    pub fn is_valid_at(&self, date: Timestamp) -> bool {
        if let Some(from) = self.validfrom {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.validto {
            if date >= to {
                return false;
            }
        }
        true
    }

    /// Sibling order: `ordernr` first, code identity breaks ties.
    pub fn sort_key(&self) -> (i64, CodeId) {
        (self.ordernr, self.code_id)
    }
}

/// Sort relations by `(ordernr, code_id)`. The sort is stable, so relations
/// of the same code keep their fetch order.
pub fn sort_codebookcodes(relations: &mut [CodebookCode]) {
    relations.sort_by_key(CodebookCode::sort_key);
}

/// A relation that has not been persisted yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewCodebookCode {
    pub code_id: CodeId,
    pub parent_id: Option<CodeId>,
    pub hide: bool,
    pub validfrom: Option<Timestamp>,
    pub validto: Option<Timestamp>,
    pub ordernr: i64,
}

impl NewCodebookCode {
    pub fn new(code_id: CodeId) -> Self {
        Self {
            code_id,
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent_id: Option<CodeId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn hide(mut self, hide: bool) -> Self {
        self.hide = hide;
        self
    }

    pub fn valid_from(mut self, date: Timestamp) -> Self {
        self.validfrom = Some(date);
        self
    }

    pub fn valid_to(mut self, date: Timestamp) -> Self {
        self.validto = Some(date);
        self
    }

    pub fn ordernr(mut self, ordernr: i64) -> Self {
        self.ordernr = ordernr;
        self
    }

    /// Checks that do not depend on other relations: the window must not
    /// end before it starts, and a code cannot be its own parent.
    pub fn validate_self(&self) -> CodebookResult<()> {
        if let (Some(from), Some(to)) = (self.validfrom, self.validto) {
            if to < from {
                return Err(CodebookError::Validation(format!(
                    "relation for code {} has validfrom ({from}) later than validto ({to})",
                    self.code_id
                )));
            }
        }
        if self.parent_id == Some(self.code_id) {
            return Err(CodebookError::Validation(format!(
                "code {} cannot be its own parent",
                self.code_id
            )));
        }
        Ok(())
    }

    /// Fails if `existing` holds a relation for the same code whose window
    /// overlaps this one.
    pub fn validate_against<'a, I>(&self, existing: I) -> CodebookResult<()>
    where
        I: IntoIterator<Item = &'a CodebookCode>,
    {
        for other in existing {
            if other.code_id != self.code_id {
                continue;
            }
            if windows_overlap(self.validfrom, self.validto, other.validfrom, other.validto) {
                return Err(CodebookError::Validation(format!(
                    "relation for code {} overlaps with relation {} ({:?} - {:?})",
                    self.code_id, other.id, other.validfrom, other.validto
                )));
            }
        }
        Ok(())
    }

    pub fn into_persisted(self, id: RelationId, codebook_id: CodebookId) -> CodebookCode {
        CodebookCode {
            id,
            codebook_id,
            code_id: self.code_id,
            parent_id: self.parent_id,
            hide: self.hide,
            validfrom: self.validfrom,
            validto: self.validto,
            ordernr: self.ordernr,
        }
    }
}
