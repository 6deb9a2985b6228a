//! Label lookup with the per-code label cache.
//!
//! A `(code, language)` pair in the cache is either a label or an explicit
//! "no label". Once a language has been bulk-loaded for the whole codebook
//! a pair that is missing from the cache is known to have no label, so no
//! store query is made for it.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::codebook::Codebook;
use crate::errors::{CodebookError, CodebookResult};
use crate::models::{CodeId, LabelState, LanguageId};

impl Codebook {
    /// Bulk-load labels for every cached code. An empty `languages` slice
    /// means every language that occurs.
    pub fn cache_labels(&mut self, languages: &[LanguageId]) -> CodebookResult<()> {
        self.cache_labels_for(languages, None)
    }

    /// Bulk-load labels for `codes` (all cached codes when `None`), caching
    /// the codebook first if needed. Languages already loaded for the whole
    /// codebook are skipped; they are only marked loaded when `codes` is
    /// `None`.
    pub fn cache_labels_for(
        &mut self,
        languages: &[LanguageId],
        codes: Option<&[CodeId]>,
    ) -> CodebookResult<()> {
        if !self.is_cached() {
            self.cache()?;
        }
        let Some(cache) = self.cached() else {
            return Ok(());
        };
        let code_ids = match codes {
            Some(ids) => ids.to_vec(),
            None => cache.code_ids(),
        };

        let (requested, records) = if languages.is_empty() {
            if codes.is_none() && cache.all_languages_loaded() {
                return Ok(());
            }
            let records = if code_ids.is_empty() {
                Vec::new()
            } else {
                self.store().fetch_labels(&code_ids, None)?
            };
            let found: BTreeSet<LanguageId> = records.iter().map(|r| r.language_id).collect();
            (found.into_iter().collect::<Vec<_>>(), records)
        } else {
            let todo: Vec<LanguageId> = languages
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter(|l| codes.is_some() || !cache.is_language_complete(*l))
                .collect();
            if todo.is_empty() {
                return Ok(());
            }
            let records = if code_ids.is_empty() {
                Vec::new()
            } else {
                self.store().fetch_labels(&code_ids, Some(&todo))?
            };
            (todo, records)
        };

        let rows = records.len();
        if let Some(cache) = self.cache_mut() {
            cache.apply_labels(&code_ids, &requested, records);
            if codes.is_none() {
                for language_id in &requested {
                    cache.mark_language_complete(*language_id);
                }
                if languages.is_empty() {
                    cache.mark_all_languages_loaded();
                }
            }
        }
        debug!(languages = ?requested, codes = code_ids.len(), rows, "cached labels");
        Ok(())
    }

    /// Label of a code in one language.
    ///
    /// Answered from the cache when the pair is cached or the language was
    /// loaded for the whole codebook; otherwise one store query, whose
    /// outcome is cached on the code.
    pub fn get_label(
        &mut self,
        code_id: CodeId,
        language_id: LanguageId,
    ) -> CodebookResult<String> {
        let not_found = CodebookError::LabelNotFound {
            code_id,
            language_id,
        };
        if let Some(cache) = self.cached() {
            if let Some(code) = cache.code(code_id) {
                match code.cached_label(language_id) {
                    Some(LabelState::Present(label)) => return Ok(label.clone()),
                    Some(LabelState::Absent) => return Err(not_found),
                    None if cache.is_language_complete(language_id)
                        || cache.all_languages_loaded() =>
                    {
                        return Err(not_found)
                    }
                    None => {}
                }
            }
        }

        let label = self
            .store()
            .fetch_labels(&[code_id], Some(&[language_id]))?
            .into_iter()
            .next()
            .map(|record| record.label);
        if let Some(code) = self.cache_mut().and_then(|c| c.code_mut(code_id)) {
            code.cache_label(language_id, label.clone());
        }
        label.ok_or(not_found)
    }

    /// First label found in `languages`, in order; failing that, the label
    /// with the lowest language id; `None` when the code has no label.
    pub fn get_label_with_fallback(
        &mut self,
        code_id: CodeId,
        languages: &[LanguageId],
    ) -> CodebookResult<Option<String>> {
        for language_id in languages {
            match self.get_label(code_id, *language_id) {
                Ok(label) => return Ok(Some(label)),
                Err(CodebookError::LabelNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        if let Some(cache) = self.cached() {
            if cache.all_languages_loaded() {
                if let Some(code) = cache.code(code_id) {
                    return Ok(code.first_cached_label().map(str::to_string));
                }
            }
        }
        Ok(self
            .store()
            .fetch_labels(&[code_id], None)?
            .into_iter()
            .next()
            .map(|record| record.label))
    }

    /// Create or replace a label and write it through to the cache.
    pub fn add_label(
        &mut self,
        code_id: CodeId,
        language_id: LanguageId,
        label: &str,
        replace: bool,
    ) -> CodebookResult<()> {
        self.store()
            .persist_label(code_id, language_id, label, replace)?;
        if let Some(code) = self.cache_mut().and_then(|c| c.code_mut(code_id)) {
            code.cache_label(language_id, Some(label.to_string()));
        }
        Ok(())
    }

    /// Languages in which any code of the codebook (parents included) has
    /// a label.
    pub fn get_language_ids(&self) -> CodebookResult<BTreeSet<LanguageId>> {
        let code_ids: Vec<CodeId> = self.get_code_ids(true, true)?.into_iter().collect();
        if code_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .store()
            .fetch_labels(&code_ids, None)?
            .into_iter()
            .map(|record| record.language_id)
            .collect())
    }

    /// Display label per code for tree building: cached labels where the
    /// code has any, a single bulk query for the rest. Nothing is written
    /// to the cache.
    pub(crate) fn display_labels(
        &self,
        code_ids: &[CodeId],
    ) -> CodebookResult<HashMap<CodeId, String>> {
        let mut labels = HashMap::with_capacity(code_ids.len());
        let mut pending = Vec::new();
        for code_id in code_ids {
            match self.cached().and_then(|c| c.code(*code_id)) {
                Some(code) if code.has_cached_labels() => {
                    labels.insert(*code_id, code.display_label());
                }
                _ => pending.push(*code_id),
            }
        }
        if !pending.is_empty() {
            for record in self.store().fetch_labels(&pending, None)? {
                labels.entry(record.code_id).or_insert(record.label);
            }
        }
        Ok(labels)
    }
}
