//! SQLite storage layer for codebooks.
//!
//! Each public method opens its own connection, so the caller never has to
//! manage connection lifetime.

use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::config::CodebookConfig;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{
    CodeId, CodeRecord, CodebookCode, CodebookId, CodebookRecord, LabelRecord, LanguageId,
    NewCodebookCode, ProjectId, RelationId,
};
use crate::store::{schema, CodebookStore};

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// `?1, ?2, …` placeholders for an `IN (…)` clause starting at `offset + 1`.
fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_uuid(value: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodebookCode> {
    Ok(CodebookCode {
        id: row.get(0)?,
        codebook_id: row.get(1)?,
        code_id: row.get(2)?,
        parent_id: row.get(3)?,
        hide: row.get(4)?,
        validfrom: row.get(5)?,
        validto: row.get(6)?,
        ordernr: row.get(7)?,
    })
}

/// SQLite codebook store.
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create a new `Database`. The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn new(db_path: impl AsRef<Path>) -> CodebookResult<Self> {
        let db_str = db_path.as_ref().to_string_lossy();
        let expanded = expand_tilde(&db_str);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    /// Open the database named by `config` and bring its schema up to date.
    pub fn from_config(config: &CodebookConfig) -> CodebookResult<Self> {
        let db = Self::new(&config.database_path)?;
        db.init_schema()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new SQLite connection with `foreign_keys` enabled.
    pub fn connect(&self) -> CodebookResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Set WAL mode, create all tables and indexes, then check the schema
    /// version stamp.
    pub fn init_schema(&self) -> CodebookResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::check_schema_version(&conn)?;
        Ok(())
    }
}

impl CodebookStore for Database {
    fn fetch_codebook(&self, codebook_id: CodebookId) -> CodebookResult<CodebookRecord> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, project_id, name FROM codebooks WHERE id = ?1;",
            params![codebook_id],
            |row| {
                Ok(CodebookRecord {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(CodebookError::CodebookNotFound(codebook_id))
    }

    fn create_codebook(&self, project_id: ProjectId, name: &str) -> CodebookResult<CodebookRecord> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO codebooks(project_id, name) VALUES (?1, ?2);",
            params![project_id, name],
        )?;
        Ok(CodebookRecord {
            id: conn.last_insert_rowid(),
            project_id,
            name: name.to_string(),
        })
    }

    fn set_codebook_project(
        &self,
        codebook_id: CodebookId,
        project_id: ProjectId,
    ) -> CodebookResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE codebooks SET project_id = ?1 WHERE id = ?2;",
            params![project_id, codebook_id],
        )?;
        if changed == 0 {
            return Err(CodebookError::CodebookNotFound(codebook_id));
        }
        Ok(())
    }

    fn create_code(&self, uuid: Option<Uuid>) -> CodebookResult<CodeRecord> {
        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO codes(uuid) VALUES (?1);",
            params![uuid.to_string()],
        )?;
        Ok(CodeRecord {
            id: conn.last_insert_rowid(),
            uuid,
        })
    }

    fn fetch_relations(&self, codebook_id: CodebookId) -> CodebookResult<Vec<CodebookCode>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, codebook_id, code_id, parent_id, hide, validfrom, validto, ordernr \
             FROM codebook_codes WHERE codebook_id = ?1 \
             ORDER BY ordernr ASC, code_id ASC, id ASC;",
        )?;
        let relations = stmt
            .query_map(params![codebook_id], relation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    fn fetch_codes(&self, code_ids: &[CodeId]) -> CodebookResult<Vec<CodeRecord>> {
        if code_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let sql = format!(
            "SELECT id, uuid FROM codes WHERE id IN ({}) ORDER BY id;",
            placeholders(code_ids.len(), 0)
        );
        let mut stmt = conn.prepare(&sql)?;
        let codes = stmt
            .query_map(params_from_iter(code_ids.iter()), |row| {
                Ok(CodeRecord {
                    id: row.get(0)?,
                    uuid: parse_uuid(row.get(1)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(codes)
    }

    fn fetch_labels(
        &self,
        code_ids: &[CodeId],
        language_ids: Option<&[LanguageId]>,
    ) -> CodebookResult<Vec<LabelRecord>> {
        if code_ids.is_empty() || language_ids.is_some_and(|langs| langs.is_empty()) {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let mut sql = format!(
            "SELECT code_id, language_id, label FROM labels WHERE code_id IN ({})",
            placeholders(code_ids.len(), 0)
        );
        let mut bind: Vec<i64> = code_ids.to_vec();
        if let Some(langs) = language_ids {
            sql.push_str(&format!(
                " AND language_id IN ({})",
                placeholders(langs.len(), code_ids.len())
            ));
            bind.extend_from_slice(langs);
        }
        sql.push_str(" ORDER BY code_id ASC, language_id ASC;");

        let mut stmt = conn.prepare(&sql)?;
        let labels = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok(LabelRecord {
                    code_id: row.get(0)?,
                    language_id: row.get(1)?,
                    label: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn persist_relation(
        &self,
        codebook_id: CodebookId,
        relation: &NewCodebookCode,
    ) -> CodebookResult<RelationId> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO codebook_codes \
                 (codebook_id, code_id, parent_id, hide, validfrom, validto, ordernr) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                codebook_id,
                relation.code_id,
                relation.parent_id,
                relation.hide,
                relation.validfrom,
                relation.validto,
                relation.ordernr,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_relation(&self, relation_id: RelationId) -> CodebookResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM codebook_codes WHERE id = ?1;",
            params![relation_id],
        )?;
        Ok(())
    }

    fn detach_children(&self, codebook_id: CodebookId, parent_id: CodeId) -> CodebookResult<usize> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE codebook_codes SET parent_id = NULL \
             WHERE codebook_id = ?1 AND parent_id = ?2;",
            params![codebook_id, parent_id],
        )?;
        Ok(changed)
    }

    fn persist_label(
        &self,
        code_id: CodeId,
        language_id: LanguageId,
        label: &str,
        replace: bool,
    ) -> CodebookResult<()> {
        let conn = self.connect()?;
        if !replace {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM labels WHERE code_id = ?1 AND language_id = ?2;",
                    params![code_id, language_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(CodebookError::DuplicateLabel {
                    code_id,
                    language_id,
                });
            }
        }
        conn.execute(
            "INSERT INTO labels(code_id, language_id, label) VALUES (?1, ?2, ?3) \
             ON CONFLICT(code_id, language_id) DO UPDATE SET label = excluded.label;",
            params![code_id, language_id, label],
        )?;
        Ok(())
    }
}
