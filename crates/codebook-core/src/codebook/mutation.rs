//! Adding and removing relations while keeping the cache in step.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexSet;
use tracing::{debug, info, warn};

use crate::codebook::Codebook;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{CodeId, CodebookCode, LanguageId, NewCodebookCode, RelationId};

/// One entry of a bulk [`Codebook::add_codes`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeEntry {
    pub code_id: CodeId,
    pub parent_id: Option<CodeId>,
}

impl From<CodeId> for CodeEntry {
    fn from(code_id: CodeId) -> Self {
        Self {
            code_id,
            parent_id: None,
        }
    }
}

impl From<(CodeId, Option<CodeId>)> for CodeEntry {
    fn from((code_id, parent_id): (CodeId, Option<CodeId>)) -> Self {
        Self { code_id, parent_id }
    }
}

impl From<(CodeId, CodeId)> for CodeEntry {
    fn from((code_id, parent_id): (CodeId, CodeId)) -> Self {
        Self {
            code_id,
            parent_id: Some(parent_id),
        }
    }
}

impl Codebook {
    /// Add `code_id` under `parent_id` (or as a root).
    pub fn add_code(
        &mut self,
        code_id: CodeId,
        parent_id: Option<CodeId>,
    ) -> CodebookResult<CodebookCode> {
        self.add_codebookcode(NewCodebookCode::new(code_id).parent(parent_id))
    }

    /// Validate and persist one relation.
    ///
    /// A parent that has no relation in this codebook gets a bare root
    /// relation first. A cached codebook is patched in place rather than
    /// reloaded; if a write or the patch fails, the cache is dropped.
    pub fn add_codebookcode(&mut self, new: NewCodebookCode) -> CodebookResult<CodebookCode> {
        new.validate_self()?;
        let needs_parent = {
            let relations = self.relations()?;
            new.validate_against(relations.iter())?;
            new.parent_id
                .filter(|parent| !relations.iter().any(|r| r.code_id == *parent))
        };

        let result = self
            .persist_with_parent(needs_parent, new)
            .and_then(|(relation, persisted)| {
                self.patch_cache(persisted)?;
                Ok(relation)
            });
        if result.is_err() {
            self.invalidate_cache();
        }
        result
    }

    fn persist_with_parent(
        &self,
        needs_parent: Option<CodeId>,
        new: NewCodebookCode,
    ) -> CodebookResult<(CodebookCode, Vec<CodebookCode>)> {
        let mut persisted = Vec::with_capacity(2);
        if let Some(parent) = needs_parent {
            let bare = NewCodebookCode::new(parent);
            let id = self.store().persist_relation(self.id(), &bare)?;
            debug!(codebook_id = self.id(), code_id = parent, "added bare parent relation");
            persisted.push(bare.into_persisted(id, self.id()));
        }
        let id = self.store().persist_relation(self.id(), &new)?;
        let relation = new.into_persisted(id, self.id());
        persisted.push(relation.clone());
        Ok((relation, persisted))
    }

    /// Add many codes at once. The whole batch is checked before anything
    /// is written: a code may not already be in the codebook or appear
    /// twice, and every parent must be in the codebook or in the batch.
    /// The cache is dropped once writing starts, whether or not every
    /// write succeeds. Rows written before a failing one stay.
    pub fn add_codes<I, E>(&mut self, entries: I) -> CodebookResult<Vec<CodebookCode>>
    where
        I: IntoIterator<Item = E>,
        E: Into<CodeEntry>,
    {
        let entries: Vec<CodeEntry> = entries.into_iter().map(Into::into).collect();
        let batch: Vec<NewCodebookCode> = entries
            .iter()
            .map(|e| NewCodebookCode::new(e.code_id).parent(e.parent_id))
            .collect();
        {
            let relations = self.relations()?;
            let present: HashSet<CodeId> = relations.iter().map(|r| r.code_id).collect();
            let mut in_batch = HashSet::new();
            for new in &batch {
                new.validate_self()?;
                if present.contains(&new.code_id) {
                    return Err(CodebookError::InvalidInput(format!(
                        "code {} is already in codebook {}",
                        new.code_id,
                        self.id()
                    )));
                }
                if !in_batch.insert(new.code_id) {
                    return Err(CodebookError::InvalidInput(format!(
                        "code {} appears twice in the batch",
                        new.code_id
                    )));
                }
            }
            for new in &batch {
                if let Some(parent) = new.parent_id {
                    if !present.contains(&parent) && !in_batch.contains(&parent) {
                        return Err(CodebookError::InvalidInput(format!(
                            "parent {parent} of code {} is neither in codebook {} nor in the batch",
                            new.code_id,
                            self.id()
                        )));
                    }
                }
            }
        }

        let mut added = Vec::with_capacity(batch.len());
        let mut failure = None;
        for new in batch {
            match self.store().persist_relation(self.id(), &new) {
                Ok(id) => added.push(new.into_persisted(id, self.id())),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.invalidate_cache();
        if let Some(e) = failure {
            warn!(
                codebook_id = self.id(),
                written = added.len(),
                error = %e,
                "bulk add stopped early"
            );
            return Err(e);
        }
        info!(codebook_id = self.id(), count = added.len(), "added codes");
        Ok(added)
    }

    /// Delete one relation. When it was the code's last relation in this
    /// codebook, the code's children lose their parent.
    pub fn delete_codebookcode(&mut self, relation_id: RelationId) -> CodebookResult<()> {
        let (relation, last) = {
            let relations = self.relations()?;
            let relation = relations
                .iter()
                .find(|r| r.id == relation_id)
                .cloned()
                .ok_or_else(|| {
                    CodebookError::InvalidInput(format!(
                        "relation {relation_id} is not part of codebook {}",
                        self.id()
                    ))
                })?;
            let last = !relations
                .iter()
                .any(|r| r.id != relation_id && r.code_id == relation.code_id);
            (relation, last)
        };

        self.store().delete_relation(relation_id)?;
        let detached = if last {
            self.store().detach_children(self.id(), relation.code_id)?
        } else {
            0
        };
        info!(
            codebook_id = self.id(),
            relation_id,
            code_id = relation.code_id,
            detached,
            "deleted codebook relation"
        );

        if let Some(cache) = self.cache_mut() {
            cache.remove_relation(relation_id);
            if last {
                cache.detach_children(relation.code_id);
            }
            cache.prune_codes();
        }
        Ok(())
    }

    /// Delete every relation of a code. Returns how many were removed.
    pub fn delete_code(&mut self, code_id: CodeId) -> CodebookResult<usize> {
        let relation_ids: Vec<RelationId> = self
            .relations()?
            .iter()
            .filter(|r| r.code_id == code_id)
            .map(|r| r.id)
            .collect();
        if relation_ids.is_empty() {
            return Err(CodebookError::CodeNotFound(code_id));
        }
        for relation_id in &relation_ids {
            self.delete_codebookcode(*relation_id)?;
        }
        Ok(relation_ids.len())
    }

    /// Bring a cached codebook up to date with relations that were just
    /// persisted: load unknown codes, and their labels in every language
    /// the cache holds completely.
    fn patch_cache(&mut self, persisted: Vec<CodebookCode>) -> CodebookResult<()> {
        let Some(cache) = self.cached() else {
            return Ok(());
        };
        let mut referenced: IndexSet<CodeId> = IndexSet::new();
        for relation in &persisted {
            referenced.insert(relation.code_id);
            referenced.extend(relation.parent_id);
        }
        let referenced: Vec<CodeId> = referenced.into_iter().collect();
        let missing = cache.missing_code_ids(&referenced);
        let all_languages = cache.all_languages_loaded();
        let mut languages: BTreeSet<LanguageId> = cache.complete_languages().clone();

        let records = if missing.is_empty() {
            Vec::new()
        } else {
            self.store().fetch_codes(&missing)?
        };
        let labels = if missing.is_empty() || (languages.is_empty() && !all_languages) {
            Vec::new()
        } else if all_languages {
            let labels = self.store().fetch_labels(&missing, None)?;
            languages.extend(labels.iter().map(|l| l.language_id));
            labels
        } else {
            let requested: Vec<LanguageId> = languages.iter().copied().collect();
            self.store().fetch_labels(&missing, Some(&requested))?
        };

        if let Some(cache) = self.cache_mut() {
            let languages: Vec<LanguageId> = languages.into_iter().collect();
            cache.insert_relations(persisted, records);
            cache.apply_labels(&missing, &languages, labels);
            for language_id in &languages {
                cache.mark_language_complete(*language_id);
            }
            debug!(new_codes = missing.len(), "patched codebook cache");
        }
        Ok(())
    }
}
