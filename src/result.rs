//! Session output handed to exporters

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::archive::ArchiveEntry;
use crate::assertion::Assertion;
use crate::engine::statistics::SearchStatistics;
use crate::engine::stopping::TerminationReason;
use crate::testcase::TestCase;

/// A crashed execution kept as a potential regression defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureFinding {
    pub callable: String,
    pub message: String,
    pub test: TestCase,
}

/// Failure findings, deduplicated by callable and message
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    findings: Vec<FailureFinding>,
    seen: BTreeSet<(String, String)>,
    limit: usize,
}

impl FailureLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Record a finding; returns false for duplicates or once the limit is hit
    pub fn record(&mut self, callable: &str, message: &str, test: &TestCase) -> bool {
        if self.findings.len() >= self.limit {
            return false;
        }
        if !self.seen.insert((callable.to_string(), message.to_string())) {
            return false;
        }
        log::info!("New failure in {}: {}", callable, message);
        self.findings.push(FailureFinding {
            callable: callable.to_string(),
            message: message.to_string(),
            test: test.clone(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn into_findings(self) -> Vec<FailureFinding> {
        self.findings
    }
}

/// A distinct archived test with its regression assertions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub fingerprint: String,
    pub test: TestCase,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub subject: String,
    /// One entry per archived target, ordered by target id
    pub archive: Vec<ArchiveEntry>,
    pub covered_targets: usize,
    pub total_targets: usize,
    /// Covered share of all targets, in percent
    pub coverage: f64,
    pub statistics: SearchStatistics,
    pub termination: TerminationReason,
    pub failures: Vec<FailureFinding>,
    pub tests: Vec<GeneratedTest>,
}

impl GenerationResult {
    /// Number of distinct test cases in the archive
    pub fn distinct_tests(&self) -> usize {
        self.archive
            .iter()
            .map(|entry| entry.test.fingerprint())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn is_fully_covered(&self) -> bool {
        self.total_targets > 0 && self.covered_targets == self.total_targets
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
