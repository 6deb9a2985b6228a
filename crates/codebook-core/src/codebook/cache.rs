//! In-memory snapshot of one codebook's relations and codes.
//!
//! `codes` is the arena: one `Code` per identity, shared by every relation
//! that mentions it (as child or as parent). Relations refer to codes by
//! id, so two lookups of the same id always land on the same instance.

use std::collections::{BTreeSet, HashMap};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::errors::CodebookResult;
use crate::models::{
    sort_codebookcodes, Code, CodeId, CodeRecord, CodebookCode, CodebookId, LabelRecord,
    LanguageId, RelationId,
};
use crate::store::CodebookStore;

#[derive(Debug, Default)]
pub struct CodebookCache {
    relations: Vec<CodebookCode>,
    codes: IndexMap<CodeId, Code>,
    codebookcodes: IndexMap<CodeId, Vec<CodebookCode>>,
    complete_languages: BTreeSet<LanguageId>,
    all_languages: bool,
}

/// Code ids referenced by the relations, children before parents, in
/// relation order.
fn referenced_code_ids(relations: &[CodebookCode]) -> IndexSet<CodeId> {
    let mut ids = IndexSet::new();
    for relation in relations {
        ids.insert(relation.code_id);
        if let Some(parent) = relation.parent_id {
            ids.insert(parent);
        }
    }
    ids
}

impl CodebookCache {
    /// Fetch all relations of the codebook and the codes they reference.
    /// Two store round trips.
    pub fn load(store: &dyn CodebookStore, codebook_id: CodebookId) -> CodebookResult<Self> {
        let relations = store.fetch_relations(codebook_id)?;
        let ids: Vec<CodeId> = referenced_code_ids(&relations).into_iter().collect();
        let records = store.fetch_codes(&ids)?;

        let mut cache = Self {
            relations,
            ..Self::default()
        };
        cache.add_code_records(&ids, records);
        cache.reindex();
        debug!(
            codebook_id,
            relations = cache.relations.len(),
            codes = cache.codes.len(),
            "cached codebook"
        );
        Ok(cache)
    }

    /// Insert records into the arena, following the order of `ids`. Codes
    /// already present are kept as they are.
    fn add_code_records(&mut self, ids: &[CodeId], records: Vec<CodeRecord>) {
        let mut by_id: HashMap<CodeId, CodeRecord> =
            records.into_iter().map(|r| (r.id, r)).collect();
        for id in ids {
            if self.codes.contains_key(id) {
                continue;
            }
            match by_id.remove(id) {
                Some(record) => {
                    self.codes.insert(*id, Code::new(record));
                }
                None => warn!(code_id = id, "relation references a code the store does not know"),
            }
        }
    }

    fn reindex(&mut self) {
        sort_codebookcodes(&mut self.relations);
        self.codebookcodes.clear();
        for relation in &self.relations {
            self.codebookcodes
                .entry(relation.code_id)
                .or_default()
                .push(relation.clone());
        }
    }

    /// All relations in `(ordernr, code_id)` order.
    pub fn relations(&self) -> &[CodebookCode] {
        &self.relations
    }

    /// Relations of one code, in the same order as [`Self::relations`].
    pub fn codebookcodes(&self, code_id: CodeId) -> &[CodebookCode] {
        self.codebookcodes
            .get(&code_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn code(&self, code_id: CodeId) -> Option<&Code> {
        self.codes.get(&code_id)
    }

    pub(crate) fn code_mut(&mut self, code_id: CodeId) -> Option<&mut Code> {
        self.codes.get_mut(&code_id)
    }

    pub fn codes(&self) -> impl Iterator<Item = &Code> {
        self.codes.values()
    }

    pub fn code_ids(&self) -> Vec<CodeId> {
        self.codes.keys().copied().collect()
    }

    /// True if at least one relation is about this code.
    pub fn contains_code(&self, code_id: CodeId) -> bool {
        self.codebookcodes.contains_key(&code_id)
    }

    /// Ids among `ids` that have no entry in the arena yet.
    pub fn missing_code_ids(&self, ids: &[CodeId]) -> Vec<CodeId> {
        ids.iter()
            .filter(|id| !self.codes.contains_key(*id))
            .copied()
            .collect()
    }

    // -- patching ------------------------------------------------------------

    /// Add freshly persisted relations together with the records of codes
    /// the arena did not hold yet.
    pub(crate) fn insert_relations(
        &mut self,
        relations: Vec<CodebookCode>,
        records: Vec<CodeRecord>,
    ) {
        let ids: Vec<CodeId> = referenced_code_ids(&relations).into_iter().collect();
        self.relations.extend(relations);
        self.add_code_records(&ids, records);
        self.reindex();
    }

    pub(crate) fn remove_relation(&mut self, relation_id: RelationId) -> Option<CodebookCode> {
        let position = self.relations.iter().position(|r| r.id == relation_id)?;
        let removed = self.relations.remove(position);
        self.reindex();
        Some(removed)
    }

    pub(crate) fn detach_children(&mut self, parent_id: CodeId) {
        for relation in &mut self.relations {
            if relation.parent_id == Some(parent_id) {
                relation.parent_id = None;
            }
        }
        self.reindex();
    }

    /// Drop codes that no relation mentions any more.
    pub(crate) fn prune_codes(&mut self) {
        let referenced = referenced_code_ids(&self.relations);
        self.codes.retain(|id, _| referenced.contains(id));
    }

    // -- labels --------------------------------------------------------------

    /// Languages for which every cached code has had its label loaded, so a
    /// missing label is known to be absent.
    pub fn complete_languages(&self) -> &BTreeSet<LanguageId> {
        &self.complete_languages
    }

    pub fn is_language_complete(&self, language_id: LanguageId) -> bool {
        self.complete_languages.contains(&language_id)
    }

    pub(crate) fn mark_language_complete(&mut self, language_id: LanguageId) {
        self.complete_languages.insert(language_id);
    }

    /// True once labels in every language have been loaded for all codes,
    /// so the cache alone can answer "lowest language" fallbacks.
    pub fn all_languages_loaded(&self) -> bool {
        self.all_languages
    }

    pub(crate) fn mark_all_languages_loaded(&mut self) {
        self.all_languages = true;
    }

    /// Attach bulk-loaded labels to the codes. Every `(code, language)`
    /// pair in the request without a record is cached as absent.
    pub(crate) fn apply_labels(
        &mut self,
        code_ids: &[CodeId],
        language_ids: &[LanguageId],
        records: Vec<LabelRecord>,
    ) {
        let mut found: HashMap<(CodeId, LanguageId), String> = records
            .into_iter()
            .map(|r| ((r.code_id, r.language_id), r.label))
            .collect();
        for code_id in code_ids {
            if let Some(code) = self.codes.get_mut(code_id) {
                for language_id in language_ids {
                    let label = found.remove(&(*code_id, *language_id));
                    code.cache_label(*language_id, label);
                }
            }
        }
    }
}
