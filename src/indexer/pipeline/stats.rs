use serde::Serialize;

/// Result of indexing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub file_path: String,
    pub functions: usize,
    /// Records for this path that the replacement dropped.
    pub removed: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRunStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub functions_indexed: usize,
    pub files_degraded: usize,
    pub files_failed: usize,
}

impl IndexRunStats {
    pub fn record(&mut self, outcome: &IndexOutcome) {
        self.files_indexed += 1;
        self.functions_indexed += outcome.functions;
        if outcome.degraded {
            self.files_degraded += 1;
        }
    }
}
