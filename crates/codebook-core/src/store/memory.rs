//! In-memory `CodebookStore`, used by tests and by callers that load a
//! codebook from elsewhere.
//!
//! Every trait call bumps a counter so that callers can check how many
//! round trips an operation made.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::{CodebookError, CodebookResult};
use crate::models::{
    CodeId, CodeRecord, CodebookCode, CodebookId, CodebookRecord, LabelRecord, LanguageId,
    NewCodebookCode, ProjectId, RelationId,
};
use crate::store::CodebookStore;

#[derive(Default)]
struct Tables {
    codebooks: IndexMap<CodebookId, CodebookRecord>,
    codes: IndexMap<CodeId, CodeRecord>,
    labels: IndexMap<(CodeId, LanguageId), String>,
    relations: IndexMap<RelationId, CodebookCode>,
    last_codebook_id: CodebookId,
    last_code_id: CodeId,
    last_relation_id: RelationId,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    queries: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls made since creation or the last reset.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    fn count(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }

    /// Create a code with a label, without counting as a query.
    pub fn create_labelled_code(&self, label: &str, language_id: LanguageId) -> CodeRecord {
        let mut tables = self.tables.lock();
        let record = Self::insert_code(&mut tables, None);
        tables
            .labels
            .insert((record.id, language_id), label.to_string());
        record
    }

    fn insert_code(tables: &mut Tables, uuid: Option<Uuid>) -> CodeRecord {
        tables.last_code_id += 1;
        let record = CodeRecord {
            id: tables.last_code_id,
            uuid: uuid.unwrap_or_else(Uuid::new_v4),
        };
        tables.codes.insert(record.id, record.clone());
        record
    }

    pub fn relation_count(&self) -> usize {
        self.tables.lock().relations.len()
    }
}

impl CodebookStore for InMemoryStore {
    fn fetch_codebook(&self, codebook_id: CodebookId) -> CodebookResult<CodebookRecord> {
        self.count();
        self.tables
            .lock()
            .codebooks
            .get(&codebook_id)
            .cloned()
            .ok_or(CodebookError::CodebookNotFound(codebook_id))
    }

    fn create_codebook(&self, project_id: ProjectId, name: &str) -> CodebookResult<CodebookRecord> {
        self.count();
        let mut tables = self.tables.lock();
        tables.last_codebook_id += 1;
        let record = CodebookRecord {
            id: tables.last_codebook_id,
            project_id,
            name: name.to_string(),
        };
        tables.codebooks.insert(record.id, record.clone());
        Ok(record)
    }

    fn set_codebook_project(
        &self,
        codebook_id: CodebookId,
        project_id: ProjectId,
    ) -> CodebookResult<()> {
        self.count();
        let mut tables = self.tables.lock();
        let record = tables
            .codebooks
            .get_mut(&codebook_id)
            .ok_or(CodebookError::CodebookNotFound(codebook_id))?;
        record.project_id = project_id;
        Ok(())
    }

    fn create_code(&self, uuid: Option<Uuid>) -> CodebookResult<CodeRecord> {
        self.count();
        let mut tables = self.tables.lock();
        Ok(Self::insert_code(&mut tables, uuid))
    }

    fn fetch_relations(&self, codebook_id: CodebookId) -> CodebookResult<Vec<CodebookCode>> {
        self.count();
        let tables = self.tables.lock();
        let mut relations: Vec<CodebookCode> = tables
            .relations
            .values()
            .filter(|r| r.codebook_id == codebook_id)
            .cloned()
            .collect();
        relations.sort_by_key(|r| (r.ordernr, r.code_id, r.id));
        Ok(relations)
    }

    fn fetch_codes(&self, code_ids: &[CodeId]) -> CodebookResult<Vec<CodeRecord>> {
        self.count();
        let tables = self.tables.lock();
        Ok(code_ids
            .iter()
            .filter_map(|id| tables.codes.get(id).cloned())
            .collect())
    }

    fn fetch_labels(
        &self,
        code_ids: &[CodeId],
        language_ids: Option<&[LanguageId]>,
    ) -> CodebookResult<Vec<LabelRecord>> {
        self.count();
        let wanted: HashSet<CodeId> = code_ids.iter().copied().collect();
        let tables = self.tables.lock();
        let mut labels: Vec<LabelRecord> = tables
            .labels
            .iter()
            .filter(|((code_id, language_id), _)| {
                wanted.contains(code_id)
                    && language_ids.map_or(true, |langs| langs.contains(language_id))
            })
            .map(|(&(code_id, language_id), label)| LabelRecord {
                code_id,
                language_id,
                label: label.clone(),
            })
            .collect();
        labels.sort_by_key(|l| (l.code_id, l.language_id));
        Ok(labels)
    }

    fn persist_relation(
        &self,
        codebook_id: CodebookId,
        relation: &NewCodebookCode,
    ) -> CodebookResult<RelationId> {
        self.count();
        let mut tables = self.tables.lock();
        if !tables.codebooks.contains_key(&codebook_id) {
            return Err(CodebookError::CodebookNotFound(codebook_id));
        }
        for code_id in std::iter::once(relation.code_id).chain(relation.parent_id) {
            if !tables.codes.contains_key(&code_id) {
                return Err(CodebookError::CodeNotFound(code_id));
            }
        }
        tables.last_relation_id += 1;
        let id = tables.last_relation_id;
        tables
            .relations
            .insert(id, relation.clone().into_persisted(id, codebook_id));
        Ok(id)
    }

    fn delete_relation(&self, relation_id: RelationId) -> CodebookResult<()> {
        self.count();
        self.tables.lock().relations.shift_remove(&relation_id);
        Ok(())
    }

    fn detach_children(&self, codebook_id: CodebookId, parent_id: CodeId) -> CodebookResult<usize> {
        self.count();
        let mut tables = self.tables.lock();
        let mut changed = 0;
        for relation in tables.relations.values_mut() {
            if relation.codebook_id == codebook_id && relation.parent_id == Some(parent_id) {
                relation.parent_id = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn persist_label(
        &self,
        code_id: CodeId,
        language_id: LanguageId,
        label: &str,
        replace: bool,
    ) -> CodebookResult<()> {
        self.count();
        let mut tables = self.tables.lock();
        if !tables.codes.contains_key(&code_id) {
            return Err(CodebookError::CodeNotFound(code_id));
        }
        let key = (code_id, language_id);
        if !replace && tables.labels.contains_key(&key) {
            return Err(CodebookError::DuplicateLabel {
                code_id,
                language_id,
            });
        }
        tables.labels.insert(key, label.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relations_come_back_in_order() {
        let store = InMemoryStore::new();
        let cb = store.create_codebook(1, "A").unwrap();
        let a = store.create_code(None).unwrap();
        let b = store.create_code(None).unwrap();
        store
            .persist_relation(cb.id, &NewCodebookCode::new(b.id).ordernr(1))
            .unwrap();
        store
            .persist_relation(cb.id, &NewCodebookCode::new(a.id).ordernr(2))
            .unwrap();
        store.persist_relation(cb.id, &NewCodebookCode::new(a.id)).unwrap();

        let relations = store.fetch_relations(cb.id).unwrap();
        let order: Vec<(i64, CodeId)> = relations.iter().map(|r| (r.ordernr, r.code_id)).collect();
        assert_eq!(order, vec![(0, a.id), (1, b.id), (2, a.id)]);
    }

    #[test]
    fn duplicate_label_without_replace() {
        let store = InMemoryStore::new();
        let code = store.create_labelled_code("a", 1);
        let err = store.persist_label(code.id, 1, "b", false).unwrap_err();
        assert!(matches!(err, CodebookError::DuplicateLabel { .. }));
        store.persist_label(code.id, 1, "b", true).unwrap();
        let labels = store.fetch_labels(&[code.id], None).unwrap();
        assert_eq!(labels[0].label, "b");
    }

    #[test]
    fn detach_children_is_scoped_to_codebook() {
        let store = InMemoryStore::new();
        let one = store.create_codebook(1, "one").unwrap();
        let two = store.create_codebook(1, "two").unwrap();
        let parent = store.create_code(None).unwrap();
        let child = store.create_code(None).unwrap();
        let new = NewCodebookCode::new(child.id).parent(Some(parent.id));
        store.persist_relation(one.id, &new).unwrap();
        store.persist_relation(two.id, &new).unwrap();

        assert_eq!(store.detach_children(one.id, parent.id).unwrap(), 1);
        assert_eq!(store.fetch_relations(one.id).unwrap()[0].parent_id, None);
        assert_eq!(store.fetch_relations(two.id).unwrap()[0].parent_id, Some(parent.id));
    }

    #[test]
    fn relation_needs_existing_codes() {
        let store = InMemoryStore::new();
        let cb = store.create_codebook(1, "A").unwrap();
        let a = store.create_code(None).unwrap();
        let err = store
            .persist_relation(cb.id, &NewCodebookCode::new(a.id).parent(Some(42)))
            .unwrap_err();
        assert!(matches!(err, CodebookError::CodeNotFound(42)));
        assert_eq!(store.relation_count(), 0);
    }

    #[test]
    fn every_call_is_counted() {
        let store = InMemoryStore::new();
        store.create_labelled_code("x", 1);
        assert_eq!(store.query_count(), 0);
        store.fetch_codes(&[1]).unwrap();
        store.fetch_labels(&[1], Some(&[1])).unwrap();
        assert_eq!(store.query_count(), 2);
        store.reset_query_count();
        assert_eq!(store.query_count(), 0);
    }
}
