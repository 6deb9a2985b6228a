//! Backing-store contract for codebooks, plus the in-memory and SQLite
//! implementations.
//!
//! The codebook layer never talks to a database directly: it asks a
//! [`CodebookStore`] for flat rows and builds its indexes from those.

pub mod database;
pub mod memory;
pub mod schema;

use uuid::Uuid;

use crate::errors::CodebookResult;
use crate::models::{
    CodeId, CodeRecord, CodebookCode, CodebookId, CodebookRecord, LabelRecord, LanguageId,
    NewCodebookCode, ProjectId, RelationId,
};

/// Row-level access to codebooks, codes, labels and relations.
///
/// Implementations do not validate relations; that is the job of
/// [`crate::codebook::Codebook`].
pub trait CodebookStore: Send + Sync {
    fn fetch_codebook(&self, codebook_id: CodebookId) -> CodebookResult<CodebookRecord>;

    fn create_codebook(&self, project_id: ProjectId, name: &str) -> CodebookResult<CodebookRecord>;

    fn set_codebook_project(&self, codebook_id: CodebookId, project_id: ProjectId)
        -> CodebookResult<()>;

    /// Create a code. A v4 uuid is generated when none is given.
    fn create_code(&self, uuid: Option<Uuid>) -> CodebookResult<CodeRecord>;

    /// All relations of a codebook, ordered by `(ordernr, code_id, id)`.
    fn fetch_relations(&self, codebook_id: CodebookId) -> CodebookResult<Vec<CodebookCode>>;

    fn fetch_codes(&self, code_ids: &[CodeId]) -> CodebookResult<Vec<CodeRecord>>;

    /// Labels of the given codes, ordered by `(code_id, language_id)`.
    /// `None` for `language_ids` means every language.
    fn fetch_labels(
        &self,
        code_ids: &[CodeId],
        language_ids: Option<&[LanguageId]>,
    ) -> CodebookResult<Vec<LabelRecord>>;

    fn persist_relation(
        &self,
        codebook_id: CodebookId,
        relation: &NewCodebookCode,
    ) -> CodebookResult<RelationId>;

    fn delete_relation(&self, relation_id: RelationId) -> CodebookResult<()>;

    /// Clear the parent of every relation in the codebook that points at
    /// `parent_id`. Returns the number of relations changed.
    fn detach_children(&self, codebook_id: CodebookId, parent_id: CodeId) -> CodebookResult<usize>;

    /// Create or replace the label of a code in one language. Fails with
    /// `DuplicateLabel` if a label exists and `replace` is false.
    fn persist_label(
        &self,
        code_id: CodeId,
        language_id: LanguageId,
        label: &str,
        replace: bool,
    ) -> CodebookResult<()>;
}
