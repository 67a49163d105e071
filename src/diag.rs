use std::fmt;

/// Severity of a recorded diagnostic. The pass never escalates past warnings;
/// hard failures travel as [`crate::SplitError`] values instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Note,
    Warning,
}

/// A single recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Collects diagnostics emitted while splitting.
///
/// The sink is threaded explicitly through the manager, the surgeon, and the
/// shape calculus so callers (and tests) can inspect exactly what was
/// reported, instead of scraping a global stream.
#[derive(Debug, Default)]
pub struct DiagSink {
    records: Vec<Diagnostic>,
}

impl DiagSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.records.push(Diagnostic {
            severity: Severity::Note,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.records.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl fmt::Display for DiagSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            let tag = match record.severity {
                Severity::Note => "note",
                Severity::Warning => "warning",
            };
            writeln!(f, "{}: {}", tag, record.message)?;
        }
        Ok(())
    }
}
