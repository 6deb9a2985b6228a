//! Error types for the codebook core library.

use crate::models::{CodeId, CodebookId, LanguageId};

/// Top-level error enum for the codebook core library.
#[derive(Debug, thiserror::Error)]
pub enum CodebookError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cycle in codebook hierarchy at code {code_id}")]
    CodebookCycle { code_id: CodeId },

    #[error("Cycle in ancestors of code {code_id}")]
    AncestorCycle { code_id: CodeId },

    #[error("Code {0} not found")]
    CodeNotFound(CodeId),

    #[error("No label for code {code_id} in language {language_id}")]
    LabelNotFound {
        code_id: CodeId,
        language_id: LanguageId,
    },

    #[error("Code {code_id} already has a label in language {language_id}")]
    DuplicateLabel {
        code_id: CodeId,
        language_id: LanguageId,
    },

    #[error("Codebook {0} not found")]
    CodebookNotFound(CodebookId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodebookError {
    /// True for the data-integrity errors a UI should surface to the user.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            CodebookError::Validation(_)
                | CodebookError::CodebookCycle { .. }
                | CodebookError::AncestorCycle { .. }
        )
    }
}

pub type CodebookResult<T> = Result<T, CodebookError>;
