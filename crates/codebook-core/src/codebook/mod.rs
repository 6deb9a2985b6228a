//! The `Codebook` handle: a codebook record, its backing store and an
//! optional in-memory cache.
//!
//! Every read works with or without the cache; without it each call goes
//! to the store. Writes go to the store first and then patch or drop the
//! cache. A `Codebook` owns a private snapshot: two handles on the same
//! codebook do not see each other's cache.

pub mod cache;
pub mod hierarchy;
pub mod labels;
pub mod mutation;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::config::CodebookConfig;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{
    Code, CodeId, CodebookCode, CodebookId, CodebookRecord, ProjectId, Timestamp,
};
use crate::store::CodebookStore;

pub use cache::CodebookCache;
pub use hierarchy::{AncestorIds, Hierarchy};
pub use mutation::CodeEntry;
pub use tree::{
    get_max_tree_depth, get_max_tree_level, get_tree_levels, sort_tree, TreeItem, TreeLevels,
};

pub struct Codebook {
    store: Arc<dyn CodebookStore>,
    record: CodebookRecord,
    cache: Option<CodebookCache>,
}

impl std::fmt::Debug for Codebook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codebook")
            .field("record", &self.record)
            .field("cached", &self.is_cached())
            .finish()
    }
}

impl Codebook {
    /// Open an existing codebook. The cache starts empty.
    pub fn load(store: Arc<dyn CodebookStore>, codebook_id: CodebookId) -> CodebookResult<Self> {
        let record = store.fetch_codebook(codebook_id)?;
        Ok(Self {
            store,
            record,
            cache: None,
        })
    }

    pub fn create(
        store: Arc<dyn CodebookStore>,
        project_id: ProjectId,
        name: &str,
    ) -> CodebookResult<Self> {
        let record = store.create_codebook(project_id, name)?;
        info!(codebook_id = record.id, project_id, name, "created codebook");
        Ok(Self {
            store,
            record,
            cache: None,
        })
    }

    pub fn id(&self) -> CodebookId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn project_id(&self) -> ProjectId {
        self.record.project_id
    }

    pub fn record(&self) -> &CodebookRecord {
        &self.record
    }

    pub fn store(&self) -> &dyn CodebookStore {
        self.store.as_ref()
    }

    // -- cache ---------------------------------------------------------------

    /// Load relations and codes into memory, replacing any earlier cache.
    pub fn cache(&mut self) -> CodebookResult<()> {
        self.cache = Some(CodebookCache::load(self.store.as_ref(), self.record.id)?);
        Ok(())
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cached(&self) -> Option<&CodebookCache> {
        self.cache.as_ref()
    }

    pub(crate) fn cache_mut(&mut self) -> Option<&mut CodebookCache> {
        self.cache.as_mut()
    }

    pub fn invalidate_cache(&mut self) {
        if self.cache.take().is_some() {
            debug!(codebook_id = self.record.id, "invalidated codebook cache");
        }
    }

    // -- relations and codes -------------------------------------------------

    /// All relations in `(ordernr, code_id)` order.
    pub fn get_all_codebookcodes(&self) -> CodebookResult<Vec<CodebookCode>> {
        Ok(self.relations()?.into_owned())
    }

    /// Every relation of one code, whatever its window.
    pub fn get_codebookcodes(&self, code_id: CodeId) -> CodebookResult<Vec<CodebookCode>> {
        if let Some(cache) = self.cached() {
            return Ok(cache.codebookcodes(code_id).to_vec());
        }
        Ok(self
            .relations()?
            .iter()
            .filter(|r| r.code_id == code_id)
            .cloned()
            .collect())
    }

    /// The relation of a code in effect at `date` (now when `None`).
    pub fn get_codebookcode(
        &self,
        code_id: CodeId,
        date: Option<Timestamp>,
    ) -> CodebookResult<Option<CodebookCode>> {
        let date = date.unwrap_or_else(Utc::now);
        Ok(self
            .get_codebookcodes(code_id)?
            .into_iter()
            .find(|r| r.is_valid_at(date)))
    }

    pub fn contains_code(&self, code_id: CodeId) -> CodebookResult<bool> {
        if let Some(cache) = self.cached() {
            return Ok(cache.contains_code(code_id));
        }
        Ok(self.relations()?.iter().any(|r| r.code_id == code_id))
    }

    /// Codes with a relation in this codebook, regardless of date. A code
    /// with any hidden relation is left out unless `include_hidden`;
    /// `include_parents` adds every code used as a parent.
    pub fn get_code_ids(
        &self,
        include_hidden: bool,
        include_parents: bool,
    ) -> CodebookResult<IndexSet<CodeId>> {
        let relations = self.relations()?;
        let mut code_ids = IndexSet::new();
        for relation in relations.iter() {
            if relation.hide && !include_hidden {
                code_ids.shift_remove(&relation.code_id);
            } else {
                code_ids.insert(relation.code_id);
            }
        }
        if include_parents {
            code_ids.extend(relations.iter().filter_map(|r| r.parent_id));
        }
        Ok(code_ids)
    }

    /// Codes of the codebook, cached label state included when cached.
    ///
    /// The returned codes are snapshots: labels cached or added later show
    /// up only in the cache itself, reachable through [`Codebook::cached`].
    pub fn get_codes(&self, include_hidden: bool) -> CodebookResult<Vec<Code>> {
        let code_ids: Vec<CodeId> = self
            .get_code_ids(include_hidden, false)?
            .into_iter()
            .collect();
        if let Some(cache) = self.cached() {
            return Ok(code_ids
                .iter()
                .filter_map(|id| cache.code(*id))
                .cloned()
                .collect());
        }
        if code_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .store()
            .fetch_codes(&code_ids)?
            .into_iter()
            .map(Code::new)
            .collect())
    }

    /// Snapshot of one code, as for [`Codebook::get_codes`].
    pub fn get_code(&self, code_id: CodeId) -> CodebookResult<Code> {
        if let Some(cache) = self.cached() {
            if !cache.contains_code(code_id) {
                return Err(CodebookError::CodeNotFound(code_id));
            }
            return cache
                .code(code_id)
                .cloned()
                .ok_or(CodebookError::CodeNotFound(code_id));
        }
        if !self.contains_code(code_id)? {
            return Err(CodebookError::CodeNotFound(code_id));
        }
        self.store()
            .fetch_codes(&[code_id])?
            .into_iter()
            .next()
            .map(Code::new)
            .ok_or(CodebookError::CodeNotFound(code_id))
    }

    // -- derived views -------------------------------------------------------

    /// Label of each direct child of a root, mapped to its root's label.
    /// Only available on a cached codebook.
    pub fn get_aggregation_mapping(&self) -> CodebookResult<IndexMap<String, String>> {
        if !self.is_cached() {
            return Err(CodebookError::InvalidInput(format!(
                "codebook {} must be cached before building an aggregation mapping",
                self.record.id
            )));
        }
        let mut mapping = IndexMap::new();
        for root in self.get_tree(false, None, None)? {
            for child in &root.children {
                mapping.insert(child.label.clone(), root.label.clone());
            }
        }
        Ok(mapping)
    }

    /// Move the codebook to the litter project.
    pub fn recycle(&mut self, config: &CodebookConfig) -> CodebookResult<()> {
        self.store
            .set_codebook_project(self.record.id, config.litter_project_id)?;
        info!(
            codebook_id = self.record.id,
            from = self.record.project_id,
            to = config.litter_project_id,
            "recycled codebook"
        );
        self.record.project_id = config.litter_project_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::test_support::{labelled_codes, setup, ymd};
    use crate::models::NewCodebookCode;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn load_unknown_codebook() {
        let store = Arc::new(InMemoryStore::new());
        let err = Codebook::load(store, 42).unwrap_err();
        assert!(matches!(err, CodebookError::CodebookNotFound(42)));
    }

    #[test]
    fn load_existing_codebook() {
        let (store, cb) = setup();
        let again = Codebook::load(store, cb.id()).unwrap();
        assert_eq!(again.name(), cb.name());
        assert!(!again.is_cached());
    }

    #[test]
    fn cache_and_invalidate() {
        let (store, mut cb) = setup();
        let [a] = labelled_codes(&store, ["a"]);
        cb.add_code(a, None).unwrap();

        cb.cache().unwrap();
        assert!(cb.is_cached());
        cb.cache().unwrap();
        assert!(cb.is_cached());
        cb.invalidate_cache();
        assert!(!cb.is_cached());
        cb.invalidate_cache();
    }

    #[test]
    fn cached_reads_make_no_queries() {
        let (store, mut cb) = setup();
        let [a, b, c] = labelled_codes(&store, ["a", "b", "c"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_code(c, Some(b)).unwrap();
        cb.cache().unwrap();
        cb.cache_labels(&[1]).unwrap();
        store.reset_query_count();

        cb.get_hierarchy(None, false).unwrap();
        cb.get_roots(None, true).unwrap();
        cb.get_tree(true, None, None).unwrap();
        cb.get_codes(true).unwrap();
        cb.get_code(b).unwrap();
        cb.get_codebookcode(c, None).unwrap();
        cb.get_ancestor_ids(c).unwrap().count();
        cb.get_aggregation_mapping().unwrap();
        assert_eq!(store.query_count(), 0);
    }

    #[test]
    fn uncached_and_cached_agree() {
        let (store, mut cb) = setup();
        let [a, b, c, d] = labelled_codes(&store, ["a", "b", "c", "d"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(c).parent(Some(a)).hide(true))
            .unwrap();
        cb.add_codebookcode(NewCodebookCode::new(d).parent(Some(b)).valid_to(ymd(2000, 1, 1)))
            .unwrap();

        let date = Some(ymd(1999, 1, 1));
        let hierarchy = cb.get_hierarchy(date, false).unwrap();
        let tree = cb.get_tree(true, date, None).unwrap();
        let codes = cb.get_code_ids(false, true).unwrap();

        cb.cache().unwrap();
        assert_eq!(cb.get_hierarchy(date, false).unwrap(), hierarchy);
        assert_eq!(cb.get_tree(true, date, None).unwrap(), tree);
        assert_eq!(cb.get_code_ids(false, true).unwrap(), codes);
        assert_eq!(cb.get_hierarchy(date, false).unwrap(), hierarchy);
    }

    #[test]
    fn code_ids_and_codes() {
        let (store, mut cb) = setup();
        let [a, b, c, p] = labelled_codes(&store, ["a", "b", "c", "p"]);
        cb.add_code(a, None).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(b).hide(true)).unwrap();
        store
            .persist_relation(cb.id(), &NewCodebookCode::new(c).parent(Some(p)))
            .unwrap();

        let visible: Vec<CodeId> = cb.get_code_ids(false, false).unwrap().into_iter().collect();
        assert_eq!(visible, vec![a, c]);
        let all: Vec<CodeId> = cb.get_code_ids(true, true).unwrap().into_iter().collect();
        assert_eq!(all, vec![a, b, c, p]);

        let codes: Vec<CodeId> = cb.get_codes(false).unwrap().iter().map(Code::id).collect();
        assert_eq!(codes, vec![a, c]);

        assert_eq!(cb.get_code(b).unwrap().id(), b);
        assert!(matches!(cb.get_code(p), Err(CodebookError::CodeNotFound(_))));
        cb.cache().unwrap();
        assert!(matches!(cb.get_code(p), Err(CodebookError::CodeNotFound(_))));
        assert!(matches!(cb.get_code(999), Err(CodebookError::CodeNotFound(_))));
    }

    #[test]
    fn codebookcode_by_date() {
        let (store, mut cb) = setup();
        let [a] = labelled_codes(&store, ["a"]);
        let old = cb
            .add_codebookcode(NewCodebookCode::new(a).valid_to(ymd(2010, 1, 1)))
            .unwrap();
        let new = cb
            .add_codebookcode(NewCodebookCode::new(a).valid_from(ymd(2010, 1, 1)))
            .unwrap();

        assert_eq!(cb.get_codebookcodes(a).unwrap().len(), 2);
        assert_eq!(cb.get_codebookcode(a, Some(ymd(2000, 1, 1))).unwrap(), Some(old));
        assert_eq!(cb.get_codebookcode(a, Some(ymd(2010, 1, 1))).unwrap(), Some(new));
        assert!(cb.contains_code(a).unwrap());
    }

    #[test]
    fn aggregation_mapping() {
        let (store, mut cb) = setup();
        let [a, b, c, d, e, f] = labelled_codes(&store, ["a", "b", "c", "d", "e", "f"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_code(c, Some(a)).unwrap();
        cb.add_code(d, None).unwrap();
        cb.add_code(e, Some(d)).unwrap();
        cb.add_code(f, Some(e)).unwrap();

        assert!(matches!(
            cb.get_aggregation_mapping(),
            Err(CodebookError::InvalidInput(_))
        ));
        cb.cache().unwrap();
        let mapping = cb.get_aggregation_mapping().unwrap();
        let expected: IndexMap<String, String> = [("b", "a"), ("c", "a"), ("e", "d")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(mapping, expected);
    }

    #[test]
    fn aggregation_skips_hidden_roots() {
        let (store, mut cb) = setup();
        let [a, b, c, d] = labelled_codes(&store, ["a", "b", "c", "d"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(c).hide(true)).unwrap();
        cb.add_code(d, Some(c)).unwrap();
        cb.cache().unwrap();

        let mapping = cb.get_aggregation_mapping().unwrap();
        assert_eq!(mapping.get("b").map(String::as_str), Some("a"));
        assert!(!mapping.contains_key("d"));
        assert!(!mapping.values().any(|root| root == "c"));
    }

    #[test]
    fn code_snapshots_do_not_follow_the_cache() {
        let (store, mut cb) = setup();
        let [a] = labelled_codes(&store, ["a"]);
        cb.add_code(a, None).unwrap();
        cb.cache_labels(&[1]).unwrap();

        let snapshot = cb.get_code(a).unwrap();
        cb.add_label(a, 2, "A", false).unwrap();
        assert!(!snapshot.label_is_cached(2));
        let cached = cb.cached().unwrap().code(a).unwrap();
        assert_eq!(cached.cached_label(2).and_then(|l| l.as_deref()), Some("A"));
        assert!(cb.get_code(a).unwrap().label_is_cached(2));
    }

    #[test]
    fn recycle_moves_to_litter_project() {
        let (store, mut cb) = setup();
        let config = CodebookConfig {
            litter_project_id: 99,
            ..CodebookConfig::default()
        };
        cb.recycle(&config).unwrap();
        assert_eq!(cb.project_id(), 99);
        assert_eq!(store.fetch_codebook(cb.id()).unwrap().project_id, 99);
    }
}
