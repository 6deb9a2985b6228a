//! Tree materialization and the pure helpers that work on a built tree.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::codebook::hierarchy::{effective_relations, find_roots, EffectiveRelation};
use crate::codebook::Codebook;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{CodeId, RelationId, Timestamp};

/// One node of a materialized tree.
///
/// Orphan roots (parents that have no relation of their own) carry no
/// relation id and no order number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeItem {
    pub code_id: CodeId,
    pub codebookcode_id: Option<RelationId>,
    pub children: Vec<TreeItem>,
    pub hidden: bool,
    pub label: String,
    pub ordernr: Option<i64>,
}

impl TreeItem {
    pub fn sort_key(&self) -> (i64, CodeId) {
        (self.ordernr.unwrap_or(0), self.code_id)
    }

    /// Every node below this one, depth first, each child followed by its
    /// own descendants.
    pub fn get_descendants(&self) -> Vec<&TreeItem> {
        let mut descendants = Vec::new();
        for child in &self.children {
            descendants.push(child);
            descendants.extend(child.get_descendants());
        }
        descendants
    }
}

/// Sort siblings at every level by `(ordernr, code_id)`.
pub fn sort_tree(mut tree: Vec<TreeItem>) -> Vec<TreeItem> {
    tree.sort_by_key(TreeItem::sort_key);
    for item in &mut tree {
        let children = std::mem::take(&mut item.children);
        item.children = sort_tree(children);
    }
    tree
}

/// Breadth-first levels of a tree: roots first, then all their children,
/// and so on until a level comes up empty.
pub struct TreeLevels<'a> {
    current: Vec<&'a TreeItem>,
}

impl<'a> Iterator for TreeLevels<'a> {
    type Item = Vec<&'a TreeItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            return None;
        }
        let next: Vec<&'a TreeItem> = self
            .current
            .iter()
            .flat_map(|item| item.children.iter())
            .collect();
        Some(std::mem::replace(&mut self.current, next))
    }
}

pub fn get_tree_levels(tree: &[TreeItem]) -> TreeLevels<'_> {
    TreeLevels {
        current: tree.iter().collect(),
    }
}

/// Number of edges on the longest root-to-leaf path. Not defined for an
/// empty tree.
pub fn get_max_tree_depth(tree: &[TreeItem]) -> CodebookResult<usize> {
    match get_tree_levels(tree).count() {
        0 => Err(CodebookError::InvalidInput(
            "max depth of an empty tree".to_string(),
        )),
        levels => Ok(levels - 1),
    }
}

/// Number of levels in the tree; 0 for an empty tree.
pub fn get_max_tree_level(tree: &[TreeItem]) -> usize {
    get_tree_levels(tree).count()
}

struct TreeBuilder<'r, 'l> {
    effective: IndexMap<CodeId, EffectiveRelation<'r>>,
    children: HashMap<CodeId, Vec<CodeId>>,
    labels: &'l HashMap<CodeId, String>,
    seen: HashSet<CodeId>,
}

impl<'r, 'l> TreeBuilder<'r, 'l> {
    fn new(
        effective: IndexMap<CodeId, EffectiveRelation<'r>>,
        labels: &'l HashMap<CodeId, String>,
    ) -> Self {
        let mut children: HashMap<CodeId, Vec<CodeId>> = HashMap::new();
        for (child, entry) in &effective {
            if let Some(parent) = entry.parent_id {
                children.entry(parent).or_default().push(*child);
            }
        }
        Self {
            effective,
            children,
            labels,
            seen: HashSet::new(),
        }
    }

    fn walk(&mut self, code_id: CodeId) -> CodebookResult<TreeItem> {
        if !self.seen.insert(code_id) {
            warn!(code_id, "cycle while building codebook tree");
            return Err(CodebookError::CodebookCycle { code_id });
        }
        let child_ids = self.children.get(&code_id).cloned().unwrap_or_default();
        let mut children = child_ids
            .into_iter()
            .map(|child| self.walk(child))
            .collect::<CodebookResult<Vec<_>>>()?;
        children.sort_by_key(TreeItem::sort_key);

        let relation = self.effective.get(&code_id).map(|entry| entry.relation);
        Ok(TreeItem {
            code_id,
            codebookcode_id: relation.map(|r| r.id),
            children,
            hidden: relation.is_some_and(|r| r.hide),
            label: self
                .labels
                .get(&code_id)
                .cloned()
                .unwrap_or_else(|| format!("<Code: {code_id}>")),
            ordernr: relation.map(|r| r.ordernr),
        })
    }

    /// A code that is in the hierarchy but was never reached sits on a
    /// cycle that no root leads into.
    fn unreachable(&self) -> Option<CodeId> {
        self.effective
            .keys()
            .find(|code_id| !self.seen.contains(*code_id))
            .copied()
    }
}

impl Codebook {
    /// Materialize the hierarchy at `date` as a sorted tree.
    ///
    /// With explicit `roots` only the subtrees below them are built; codes
    /// outside those subtrees are not checked.
    pub fn get_tree(
        &self,
        include_hidden: bool,
        date: Option<Timestamp>,
        roots: Option<&[CodeId]>,
    ) -> CodebookResult<Vec<TreeItem>> {
        let relations = self.relations()?;
        let date = date.unwrap_or_else(Utc::now);
        let effective = effective_relations(&relations, date, include_hidden);

        let explicit_roots = roots.is_some();
        let roots: Vec<CodeId> = match roots {
            Some(roots) => roots.to_vec(),
            None => {
                let hierarchy = effective
                    .iter()
                    .map(|(code_id, entry)| (*code_id, entry.parent_id))
                    .collect();
                find_roots(&hierarchy)
            }
        };

        let mut label_ids: Vec<CodeId> = effective.keys().copied().collect();
        label_ids.extend(roots.iter().filter(|r| !effective.contains_key(*r)));
        let labels = self.display_labels(&label_ids)?;

        let mut builder = TreeBuilder::new(effective, &labels);
        let mut tree = roots
            .iter()
            .map(|root| builder.walk(*root))
            .collect::<CodebookResult<Vec<_>>>()?;
        if !explicit_roots {
            if let Some(code_id) = builder.unreachable() {
                warn!(code_id, "code not reachable from any root");
                return Err(CodebookError::CodebookCycle { code_id });
            }
        }
        tree.sort_by_key(TreeItem::sort_key);
        Ok(tree)
    }
}
