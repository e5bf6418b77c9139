//! Diagnostic normalization and the per-file diagnostics store.

use std::collections::HashMap;

use cellbook_types::{Diagnostic, Severity};

use crate::protocol::{DiagPass, ServiceDiagnostic};

/// Map the service's category vocabulary onto [`Severity`].
///
/// Unknown categories are reported as warnings so nothing is silently lost.
#[must_use]
pub fn severity_for_category(category: &str) -> Severity {
    match category {
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        "suggestion" => Severity::Hint,
        "message" => Severity::Info,
        _ => Severity::Warning,
    }
}

/// Drops known-noisy rules and converts the rest.
#[derive(Debug, Clone, Default)]
pub(crate) struct Normalizer {
    ignored_diagnostic_codes: Vec<u32>,
    ignored_suggestion_codes: Vec<u32>,
}

impl Normalizer {
    pub fn new(ignored_diagnostic_codes: Vec<u32>, ignored_suggestion_codes: Vec<u32>) -> Self {
        Self {
            ignored_diagnostic_codes,
            ignored_suggestion_codes,
        }
    }

    pub fn normalize(&self, pass: DiagPass, raw: &[ServiceDiagnostic]) -> Vec<Diagnostic> {
        let ignored = match pass {
            DiagPass::Suggestion => &self.ignored_suggestion_codes,
            DiagPass::Syntax | DiagPass::Semantic => &self.ignored_diagnostic_codes,
        };
        raw.iter()
            .filter(|d| !ignored.contains(&d.code))
            .map(|d| Diagnostic {
                severity: severity_for_category(&d.category),
                start: d.start,
                end: d.end,
                message: d.text.clone(),
                code: d.code,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct FileDiagnostics {
    syntax: Vec<Diagnostic>,
    semantic: Vec<Diagnostic>,
}

/// Latest syntax and semantic diagnostics per open file. Each pass replaces
/// its own previous result wholesale.
pub(crate) struct DiagnosticsStore {
    data: HashMap<String, FileDiagnostics>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Record one pass for `filename` and return the combined set.
    pub fn update(
        &mut self,
        filename: &str,
        pass: DiagPass,
        items: Vec<Diagnostic>,
    ) -> Vec<Diagnostic> {
        let entry = self.data.entry(filename.to_string()).or_default();
        match pass {
            DiagPass::Syntax => entry.syntax = items,
            DiagPass::Semantic => entry.semantic = items,
            DiagPass::Suggestion => {}
        }
        let combined: Vec<Diagnostic> = entry
            .syntax
            .iter()
            .chain(entry.semantic.iter())
            .cloned()
            .collect();
        if combined.is_empty() {
            self.data.remove(filename);
        }
        combined
    }

    pub fn remove(&mut self, filename: &str) {
        self.data.remove(filename);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbook_types::LineOffset;

    fn raw(code: u32, category: &str) -> ServiceDiagnostic {
        ServiceDiagnostic {
            start: LineOffset::new(1, 1),
            end: LineOffset::new(1, 2),
            text: format!("diag {code}"),
            code,
            category: category.to_string(),
        }
    }

    fn diag(message: &str) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            start: LineOffset::new(1, 1),
            end: LineOffset::new(1, 1),
            message: message.to_string(),
            code: 1,
        }
    }

    #[test]
    fn category_mapping() {
        assert_eq!(severity_for_category("error"), Severity::Error);
        assert_eq!(severity_for_category("warning"), Severity::Warning);
        assert_eq!(severity_for_category("suggestion"), Severity::Hint);
        assert_eq!(severity_for_category("message"), Severity::Info);
        assert_eq!(severity_for_category("bogus"), Severity::Warning);
    }

    #[test]
    fn normalizer_drops_ignored_codes_per_pass() {
        let normalizer = Normalizer::new(vec![2307], vec![80001]);
        let input = vec![raw(2307, "error"), raw(80001, "suggestion"), raw(2304, "error")];

        let semantic = normalizer.normalize(DiagPass::Semantic, &input);
        assert_eq!(
            semantic.iter().map(|d| d.code).collect::<Vec<_>>(),
            vec![80001, 2304]
        );

        let suggestions = normalizer.normalize(DiagPass::Suggestion, &input);
        assert_eq!(
            suggestions.iter().map(|d| d.code).collect::<Vec<_>>(),
            vec![2307, 2304]
        );
        assert_eq!(suggestions[0].message, "diag 2307");
    }

    #[test]
    fn store_combines_passes() {
        let mut store = DiagnosticsStore::new();
        let combined = store.update("a.ts", DiagPass::Syntax, vec![diag("syntax")]);
        assert_eq!(combined.len(), 1);
        let combined = store.update("a.ts", DiagPass::Semantic, vec![diag("semantic")]);
        assert_eq!(
            combined.iter().map(|d| d.message.as_str()).collect::<Vec<_>>(),
            vec!["syntax", "semantic"]
        );
    }

    #[test]
    fn store_replaces_pass_wholesale() {
        let mut store = DiagnosticsStore::new();
        store.update("a.ts", DiagPass::Semantic, vec![diag("one"), diag("two")]);
        let combined = store.update("a.ts", DiagPass::Semantic, vec![diag("three")]);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].message, "three");
    }

    #[test]
    fn empty_result_removes_file() {
        let mut store = DiagnosticsStore::new();
        store.update("a.ts", DiagPass::Semantic, vec![diag("x")]);
        assert_eq!(store.len(), 1);
        assert!(store.update("a.ts", DiagPass::Semantic, vec![]).is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn remove_and_clear() {
        let mut store = DiagnosticsStore::new();
        store.update("a.ts", DiagPass::Semantic, vec![diag("x")]);
        store.update("b.ts", DiagPass::Semantic, vec![diag("y")]);
        store.remove("a.ts");
        assert_eq!(store.len(), 1);
        store.clear();
        assert_eq!(store.len(), 0);
    }
}
