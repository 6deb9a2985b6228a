//! Tabular export of a codebook.
//!
//! Two layouts: `Indented` spreads the tree over `code-1 .. code-n`
//! columns, one row per node with only the column of its depth filled;
//! `Parent` has one row per relation with an explicit `parent` column.
//! Both start with `uuid` and `code_id` and can add a `label - <language>`
//! column for every other language the codebook has labels in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codebook::{get_max_tree_level, Codebook, TreeItem};
use crate::config::CodebookConfig;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{CodeId, LanguageId};

pub const LABEL_PREFIX: &str = "label - ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStructure {
    Indented,
    Parent,
}

impl std::str::FromStr for ExportStructure {
    type Err = CodebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "indented" => Ok(ExportStructure::Indented),
            "parent" => Ok(ExportStructure::Parent),
            other => Err(CodebookError::InvalidInput(format!(
                "unknown export structure '{other}'"
            ))),
        }
    }
}

/// Column names plus rows of optional cells.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ExportTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).and_then(|cell| cell.as_deref()))
                .collect(),
        )
    }

    /// Rows keyed by column name.
    pub fn to_records(&self) -> Vec<IndexMap<&str, Option<&str>>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(String::as_str)
                    .zip(row.iter().map(|cell| cell.as_deref()))
                    .collect()
            })
            .collect()
    }

    pub fn to_json(&self) -> CodebookResult<String> {
        Ok(serde_json::to_string(&self.to_records())?)
    }
}

/// Export a codebook. Labels in every language are cached first, so the
/// table is built without further store queries.
pub fn export_codebook(
    codebook: &mut Codebook,
    structure: ExportStructure,
    language_id: LanguageId,
    label_columns: bool,
) -> CodebookResult<ExportTable> {
    codebook.cache_labels(&[])?;
    let extra_languages: Vec<LanguageId> = if label_columns {
        codebook
            .cached()
            .map(|cache| {
                cache
                    .complete_languages()
                    .iter()
                    .copied()
                    .filter(|l| *l != language_id)
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let table = match structure {
        ExportStructure::Indented => indented_table(codebook, language_id, &extra_languages)?,
        ExportStructure::Parent => parent_table(codebook, language_id, &extra_languages)?,
    };
    debug!(
        codebook_id = codebook.id(),
        ?structure,
        rows = table.rows.len(),
        "exported codebook"
    );
    Ok(table)
}

/// [`export_codebook`] in the configured default language.
pub fn export_codebook_with_config(
    codebook: &mut Codebook,
    structure: ExportStructure,
    config: &CodebookConfig,
    label_columns: bool,
) -> CodebookResult<ExportTable> {
    export_codebook(codebook, structure, config.default_language_id, label_columns)
}

fn header(extra_languages: &[LanguageId]) -> Vec<String> {
    let mut columns = vec!["uuid".to_string(), "code_id".to_string()];
    columns.extend(
        extra_languages
            .iter()
            .map(|language_id| format!("{LABEL_PREFIX}{language_id}")),
    );
    columns
}

fn uuid_cell(codebook: &Codebook, code_id: CodeId) -> Option<String> {
    codebook
        .cached()
        .and_then(|cache| cache.code(code_id))
        .map(|code| code.uuid().to_string())
}

/// Labels for the extra language columns; no fallback.
fn label_cells(
    codebook: &mut Codebook,
    code_id: CodeId,
    extra_languages: &[LanguageId],
) -> CodebookResult<Vec<Option<String>>> {
    extra_languages
        .iter()
        .map(|language_id| match codebook.get_label(code_id, *language_id) {
            Ok(label) => Ok(Some(label)),
            Err(CodebookError::LabelNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        })
        .collect()
}

fn flatten<'a>(items: &'a [TreeItem], depth: usize, out: &mut Vec<(usize, &'a TreeItem)>) {
    for item in items {
        out.push((depth, item));
        flatten(&item.children, depth + 1, out);
    }
}

fn indented_table(
    codebook: &mut Codebook,
    language_id: LanguageId,
    extra_languages: &[LanguageId],
) -> CodebookResult<ExportTable> {
    let tree = codebook.get_tree(true, None, None)?;
    let levels = get_max_tree_level(&tree);
    let mut nodes = Vec::new();
    flatten(&tree, 0, &mut nodes);

    let mut columns = header(extra_languages);
    columns.extend((1..=levels).map(|n| format!("code-{n}")));

    let mut rows = Vec::with_capacity(nodes.len());
    for (depth, item) in nodes {
        let mut row = vec![uuid_cell(codebook, item.code_id), Some(item.code_id.to_string())];
        row.extend(label_cells(codebook, item.code_id, extra_languages)?);
        let label = codebook.get_label_with_fallback(item.code_id, &[language_id])?;
        for level in 0..levels {
            row.push(if level == depth { label.clone() } else { None });
        }
        rows.push(row);
    }
    Ok(ExportTable { columns, rows })
}

fn parent_table(
    codebook: &mut Codebook,
    language_id: LanguageId,
    extra_languages: &[LanguageId],
) -> CodebookResult<ExportTable> {
    let mut columns = header(extra_languages);
    columns.insert(2, "label".to_string());
    columns.insert(3, "parent".to_string());

    let relations = codebook.get_all_codebookcodes()?;
    let mut rows = Vec::with_capacity(relations.len());
    for relation in relations {
        let mut row = vec![
            uuid_cell(codebook, relation.code_id),
            Some(relation.code_id.to_string()),
            codebook.get_label_with_fallback(relation.code_id, &[language_id])?,
            relation.parent_id.map(|p| p.to_string()),
        ];
        row.extend(label_cells(codebook, relation.code_id, extra_languages)?);
        rows.push(row);
    }
    Ok(ExportTable { columns, rows })
}
