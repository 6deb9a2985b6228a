//! Resolving relations into a child -> parent map for one instant.

use std::borrow::Cow;
use std::collections::HashSet;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::codebook::Codebook;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{CodeId, CodebookCode, Timestamp};

/// Child -> parent map; `None` marks a root.
pub type Hierarchy = IndexMap<CodeId, Option<CodeId>>;

/// A relation in effect at some instant. `parent_id` is the relation's
/// parent, or `None` when that parent is hidden at the same instant.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EffectiveRelation<'r> {
    pub relation: &'r CodebookCode,
    pub parent_id: Option<CodeId>,
}

/// The relation in effect for every code at `date`. When the data violates
/// the no-overlap rule the relation seen last wins.
///
/// Without `include_hidden`, hidden codes leave the hierarchy and their
/// children lose their parent.
pub(crate) fn effective_relations(
    relations: &[CodebookCode],
    date: Timestamp,
    include_hidden: bool,
) -> IndexMap<CodeId, EffectiveRelation<'_>> {
    let mut effective: IndexMap<CodeId, EffectiveRelation<'_>> = IndexMap::new();
    let mut hidden: HashSet<CodeId> = HashSet::new();
    for relation in relations {
        if !relation.is_valid_at(date) {
            continue;
        }
        if relation.hide && !include_hidden {
            hidden.insert(relation.code_id);
            continue;
        }
        let entry = EffectiveRelation {
            relation,
            parent_id: relation.parent_id,
        };
        if let Some(previous) = effective.insert(relation.code_id, entry) {
            warn!(
                code_id = relation.code_id,
                kept = relation.id,
                dropped = previous.relation.id,
                "overlapping relations valid at the same time"
            );
        }
    }

    hidden.retain(|code_id| !effective.contains_key(code_id));
    if !hidden.is_empty() {
        for entry in effective.values_mut() {
            if entry.parent_id.is_some_and(|p| hidden.contains(&p)) {
                entry.parent_id = None;
            }
        }
    }
    effective
}

pub(crate) fn resolve_hierarchy(
    relations: &[CodebookCode],
    date: Timestamp,
    include_hidden: bool,
) -> Hierarchy {
    effective_relations(relations, date, include_hidden)
        .into_iter()
        .map(|(code_id, entry)| (code_id, entry.parent_id))
        .collect()
}

/// Codes without a parent, plus parents that are not themselves children
/// (orphan roots), in the order they are first met.
pub fn find_roots(hierarchy: &Hierarchy) -> Vec<CodeId> {
    let mut roots = IndexSet::new();
    for (child, parent) in hierarchy {
        match parent {
            None => {
                roots.insert(*child);
            }
            Some(parent) if !hierarchy.contains_key(parent) => {
                roots.insert(*parent);
            }
            Some(_) => {}
        }
    }
    roots.into_iter().collect()
}

/// Walks from a code up to its root, yielding the code itself first.
///
/// Yields `Err(AncestorCycle)` and stops if a code comes round twice. The
/// starting code must be part of the hierarchy; a parent that is not is an
/// orphan root and ends the walk.
pub struct AncestorIds {
    hierarchy: Hierarchy,
    next: Option<CodeId>,
    seen: HashSet<CodeId>,
}

impl AncestorIds {
    pub(crate) fn new(hierarchy: Hierarchy, code_id: CodeId) -> Self {
        Self {
            hierarchy,
            next: Some(code_id),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for AncestorIds {
    type Item = CodebookResult<CodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if !self.seen.insert(current) {
            warn!(code_id = current, "cycle while walking ancestors");
            return Some(Err(CodebookError::AncestorCycle { code_id: current }));
        }
        match self.hierarchy.get(&current) {
            Some(parent) => self.next = *parent,
            None if self.seen.len() == 1 => {
                return Some(Err(CodebookError::CodeNotFound(current)));
            }
            None => {}
        }
        Some(Ok(current))
    }
}

impl Codebook {
    /// Relations from the cache, or a fresh fetch when not cached.
    pub(crate) fn relations(&self) -> CodebookResult<Cow<'_, [CodebookCode]>> {
        match self.cached() {
            Some(cache) => Ok(Cow::Borrowed(cache.relations())),
            None => Ok(Cow::Owned(self.store().fetch_relations(self.id())?)),
        }
    }

    /// Child -> parent map for `date` (now when `None`).
    pub fn get_hierarchy(
        &self,
        date: Option<Timestamp>,
        include_hidden: bool,
    ) -> CodebookResult<Hierarchy> {
        let relations = self.relations()?;
        Ok(resolve_hierarchy(
            &relations,
            date.unwrap_or_else(Utc::now),
            include_hidden,
        ))
    }

    pub fn get_roots(
        &self,
        date: Option<Timestamp>,
        include_hidden: bool,
    ) -> CodebookResult<Vec<CodeId>> {
        Ok(find_roots(&self.get_hierarchy(date, include_hidden)?))
    }

    /// Direct children of a code in the hierarchy at `date`.
    pub fn get_children(
        &self,
        code_id: CodeId,
        date: Option<Timestamp>,
        include_hidden: bool,
    ) -> CodebookResult<Vec<CodeId>> {
        Ok(self
            .get_hierarchy(date, include_hidden)?
            .into_iter()
            .filter(|(_, parent)| *parent == Some(code_id))
            .map(|(child, _)| child)
            .collect())
    }

    /// Ancestors of a code in the current visible hierarchy, starting with
    /// the code itself.
    pub fn get_ancestor_ids(&self, code_id: CodeId) -> CodebookResult<AncestorIds> {
        Ok(AncestorIds::new(self.get_hierarchy(None, false)?, code_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::test_support::{labelled_codes, setup, ymd};
    use crate::models::NewCodebookCode;
    use crate::store::CodebookStore;

    #[test]
    fn hierarchy_with_parents() {
        let (store, mut cb) = setup();
        let [a, b, c] = labelled_codes(&store, ["a", "b", "c"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_code(c, Some(b)).unwrap();

        let hierarchy = cb.get_hierarchy(None, false).unwrap();
        assert_eq!(hierarchy.get(&a), Some(&None));
        assert_eq!(hierarchy.get(&b), Some(&Some(a)));
        assert_eq!(hierarchy.get(&c), Some(&Some(b)));
        assert_eq!(cb.get_roots(None, false).unwrap(), vec![a]);
        assert_eq!(cb.get_children(a, None, false).unwrap(), vec![b]);
    }

    #[test]
    fn parent_changes_over_time() {
        let (store, mut cb) = setup();
        let [a, b, c] = labelled_codes(&store, ["a", "b", "c"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, None).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(c).parent(Some(a)).valid_to(ymd(2010, 1, 1)))
            .unwrap();
        cb.add_codebookcode(NewCodebookCode::new(c).parent(Some(b)).valid_from(ymd(2010, 1, 1)))
            .unwrap();

        let before = cb.get_hierarchy(Some(ymd(2005, 1, 1)), false).unwrap();
        assert_eq!(before.get(&c), Some(&Some(a)));
        let after = cb.get_hierarchy(Some(ymd(2015, 1, 1)), false).unwrap();
        assert_eq!(after.get(&c), Some(&Some(b)));
        let at_cut = cb.get_hierarchy(Some(ymd(2010, 1, 1)), false).unwrap();
        assert_eq!(at_cut.get(&c), Some(&Some(b)));
    }

    #[test]
    fn code_leaves_codebook_at_validto() {
        let (store, mut cb) = setup();
        let [a] = labelled_codes(&store, ["a"]);
        cb.add_codebookcode(NewCodebookCode::new(a).valid_to(ymd(2010, 1, 1)))
            .unwrap();
        assert!(cb.get_hierarchy(Some(ymd(2009, 1, 1)), false).unwrap().contains_key(&a));
        assert!(cb.get_hierarchy(Some(ymd(2011, 1, 1)), false).unwrap().is_empty());
    }

    #[test]
    fn hidden_codes_are_dropped_unless_requested() {
        let (store, mut cb) = setup();
        let [a, b] = labelled_codes(&store, ["a", "b"]);
        cb.add_code(a, None).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(b).parent(Some(a)).hide(true))
            .unwrap();

        let visible = cb.get_hierarchy(None, false).unwrap();
        assert!(!visible.contains_key(&b));
        let all = cb.get_hierarchy(None, true).unwrap();
        assert_eq!(all.get(&b), Some(&Some(a)));
    }

    #[test]
    fn children_of_hidden_code_become_roots() {
        let (store, mut cb) = setup();
        let [a, c, d] = labelled_codes(&store, ["a", "c", "d"]);
        cb.add_code(a, None).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(c).hide(true)).unwrap();
        cb.add_code(d, Some(c)).unwrap();

        let visible = cb.get_hierarchy(None, false).unwrap();
        assert!(!visible.contains_key(&c));
        assert_eq!(visible.get(&d), Some(&None));
        assert_eq!(cb.get_roots(None, false).unwrap(), vec![a, d]);
        assert!(cb.get_children(c, None, false).unwrap().is_empty());

        let all = cb.get_hierarchy(None, true).unwrap();
        assert_eq!(all.get(&d), Some(&Some(c)));
        assert_eq!(cb.get_roots(None, true).unwrap(), vec![a, c]);
    }

    #[test]
    fn hidden_code_is_visible_again_after_its_window() {
        let (store, mut cb) = setup();
        let [p, d] = labelled_codes(&store, ["p", "d"]);
        cb.add_codebookcode(NewCodebookCode::new(p).hide(true).valid_to(ymd(2010, 1, 1)))
            .unwrap();
        cb.add_codebookcode(NewCodebookCode::new(p).valid_from(ymd(2010, 1, 1)))
            .unwrap();
        cb.add_code(d, Some(p)).unwrap();

        let early = cb.get_hierarchy(Some(ymd(2005, 1, 1)), false).unwrap();
        assert_eq!(early.get(&d), Some(&None));
        let late = cb.get_hierarchy(Some(ymd(2015, 1, 1)), false).unwrap();
        assert_eq!(late.get(&d), Some(&Some(p)));
    }

    #[test]
    fn orphan_parent_becomes_root() {
        let (store, cb) = setup();
        let [a, b] = labelled_codes(&store, ["a", "b"]);
        store
            .persist_relation(cb.id(), &NewCodebookCode::new(b).parent(Some(a)))
            .unwrap();

        assert_eq!(cb.get_roots(None, false).unwrap(), vec![a]);
    }

    #[test]
    fn roots_keep_first_seen_order() {
        let hierarchy: Hierarchy = [(3, None), (4, Some(9)), (5, Some(3)), (1, None), (6, Some(9))]
            .into_iter()
            .collect();
        assert_eq!(find_roots(&hierarchy), vec![3, 9, 1]);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let (store, mut cb) = setup();
        let [a, b, c] = labelled_codes(&store, ["a", "b", "c"]);
        cb.add_code(a, None).unwrap();
        cb.add_code(b, Some(a)).unwrap();
        cb.add_code(c, Some(b)).unwrap();

        let ancestors: Vec<CodeId> = cb
            .get_ancestor_ids(c)
            .unwrap()
            .collect::<CodebookResult<_>>()
            .unwrap();
        assert_eq!(ancestors, vec![c, b, a]);
    }

    #[test]
    fn ancestors_of_unknown_code() {
        let (store, cb) = setup();
        let [a] = labelled_codes(&store, ["a"]);
        let mut walk = cb.get_ancestor_ids(a).unwrap();
        assert!(matches!(walk.next(), Some(Err(CodebookError::CodeNotFound(id))) if id == a));
        assert!(walk.next().is_none());
    }

    #[test]
    fn hidden_code_has_no_ancestors() {
        let (store, mut cb) = setup();
        let [a, b, c] = labelled_codes(&store, ["a", "b", "c"]);
        cb.add_code(a, None).unwrap();
        cb.add_codebookcode(NewCodebookCode::new(b).parent(Some(a)).hide(true))
            .unwrap();
        cb.add_code(c, Some(b)).unwrap();

        let mut walk = cb.get_ancestor_ids(b).unwrap();
        assert!(matches!(walk.next(), Some(Err(CodebookError::CodeNotFound(id))) if id == b));

        let from_child: Vec<CodeId> = cb
            .get_ancestor_ids(c)
            .unwrap()
            .collect::<CodebookResult<_>>()
            .unwrap();
        assert_eq!(from_child, vec![c]);
    }

    #[test]
    fn ancestor_cycle_is_reported() {
        let (store, cb) = setup();
        let [a, b] = labelled_codes(&store, ["a", "b"]);
        store
            .persist_relation(cb.id(), &NewCodebookCode::new(a).parent(Some(b)))
            .unwrap();
        store
            .persist_relation(cb.id(), &NewCodebookCode::new(b).parent(Some(a)))
            .unwrap();

        let result: CodebookResult<Vec<CodeId>> = cb.get_ancestor_ids(a).unwrap().collect();
        assert!(matches!(result, Err(CodebookError::AncestorCycle { .. })));
    }
}
