//! Result interpretation: `pipeline_results.json` to ranked patch candidates.
//!
//! The document is decoded into [`PipelineResults`] (every field optional),
//! then three pure extraction tiers run over it:
//!
//! 1. successful validation record + usable candidate with the same `patch_id`
//! 2. successful validation record without a candidate: placeholder at the
//!    first suspicious location, or a generic placeholder
//! 3. no successful validation at all: one placeholder per suspicious location
//!
//! Read and decode failures become an unsuccessful [`AnalysisOutcome`] with a
//! classified [`ResultParsingError`]; nothing in here is fatal to a run.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnalysisExecutionError, ResultParsingError};

pub const RESULTS_FILE_NAME: &str = "pipeline_results.json";

const BASE_CONFIDENCE: f64 = 0.5;
const SUSPICIOUS_FALLBACK_CONFIDENCE: f64 = 0.7;
const GENERIC_FALLBACK_CONFIDENCE: f64 = 0.6;
const LOCALIZATION_ONLY_CONFIDENCE: f64 = 0.5;

/// Decoded engine result document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineResults {
    pub validation_results: Option<Vec<ValidationRecord>>,
    pub patch_candidates: Option<Vec<CandidateRecord>>,
    pub suspicious_locations: Option<Vec<SuspiciousLocation>>,
    pub pipeline_summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationRecord {
    #[serde(default, deserialize_with = "patch_id")]
    pub patch_id: Option<String>,
    pub compilation_success: Option<bool>,
    pub tests_passed: Option<bool>,
    pub tests_passed_count: Option<u64>,
    pub tests_total_count: Option<u64>,
}

impl ValidationRecord {
    pub fn compiled(&self) -> bool {
        self.compilation_success.unwrap_or(false)
    }

    pub fn passed(&self) -> bool {
        self.tests_passed.unwrap_or(false)
    }

    /// Compiled and passed its tests.
    pub fn succeeded(&self) -> bool {
        self.compiled() && self.passed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, deserialize_with = "patch_id")]
    pub patch_id: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub original_code: Option<String>,
    pub modified_code: Option<String>,
    /// Reported by the engine; not scored.
    pub mutation_type: Option<String>,
}

impl CandidateRecord {
    fn is_usable(&self) -> bool {
        self.file_path.as_deref().is_some_and(|p| !p.is_empty()) && self.start_line.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SuspiciousLocation {
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub suspiciousness_score: Option<f64>,
}

impl SuspiciousLocation {
    fn usable(&self) -> Option<(&str, i64)> {
        let path = self.file_path.as_deref().filter(|p| !p.is_empty())?;
        let line = self.line_number.filter(|l| *l != 0)?;
        Some((path, line))
    }

    /// The score, unless absent, zero or not a number.
    fn score_or(&self, fallback: f64) -> f64 {
        match self.suspiciousness_score {
            Some(score) if score != 0.0 && !score.is_nan() => score,
            _ => fallback,
        }
    }
}

/// `patch_id` is emitted as either a string or a number.
fn patch_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    }))
}

/// A normalized, confidence-scored edit proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub file_path: String,
    /// 1-based; `<= 0` means "prepend".
    pub line: i64,
    pub original_snippet: String,
    pub fixed_snippet: String,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
}

impl PatchCandidate {
    pub fn new(
        file_path: impl Into<String>,
        line: i64,
        original_snippet: impl Into<String>,
        fixed_snippet: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            original_snippet: original_snippet.into(),
            fixed_snippet: fixed_snippet.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// Confidence as a rounded percentage.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Why an analysis produced no usable outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum AnalysisFailure {
    Execution(AnalysisExecutionError),
    Parsing(ResultParsingError),
}

impl AnalysisFailure {
    pub fn remediation(&self) -> String {
        match self {
            Self::Execution(err) => err.remediation(),
            Self::Parsing(err) => err.remediation().to_string(),
        }
    }
}

/// Counts over the validation records, used for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationTally {
    pub present: bool,
    pub total: usize,
    pub compilation_failures: usize,
    pub test_failures: usize,
    pub successful: usize,
}

impl ValidationTally {
    pub fn from_results(results: &PipelineResults) -> Self {
        let Some(records) = &results.validation_results else {
            return Self::default();
        };
        Self {
            present: true,
            total: records.len(),
            compilation_failures: records.iter().filter(|r| !r.compiled()).count(),
            test_failures: records.iter().filter(|r| r.compiled() && !r.passed()).count(),
            successful: records.iter().filter(|r| r.succeeded()).count(),
        }
    }
}

/// What the analysis stage hands to the rest of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub patches: Vec<PatchCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AnalysisFailure>,
    pub tally: ValidationTally,
}

impl AnalysisOutcome {
    pub fn from_execution_error(err: AnalysisExecutionError) -> Self {
        Self::failed(AnalysisFailure::Execution(err))
    }

    pub fn from_parsing_error(err: ResultParsingError) -> Self {
        Self::failed(AnalysisFailure::Parsing(err))
    }

    fn failed(failure: AnalysisFailure) -> Self {
        let message = match &failure {
            AnalysisFailure::Execution(err) => format!("{err}: {}", err.remediation()),
            AnalysisFailure::Parsing(err) => format!("{err}: {}", err.remediation()),
        };
        Self {
            success: false,
            patches: Vec::new(),
            error_message: Some(message),
            failure: Some(failure),
            tally: ValidationTally::default(),
        }
    }

    /// Only successful outcomes with at least one patch are materialized.
    pub fn is_actionable(&self) -> bool {
        self.success && !self.patches.is_empty()
    }

    pub fn average_confidence(&self) -> f64 {
        average_confidence(&self.patches)
    }

    /// Keep the `max` highest-confidence patches in their original order.
    /// Ties keep the earlier patch. `0` disables the cap.
    pub fn cap_patches(&mut self, max: usize) -> usize {
        if max == 0 || self.patches.len() <= max {
            return 0;
        }
        let mut ranked: Vec<usize> = (0..self.patches.len()).collect();
        ranked.sort_by(|a, b| {
            self.patches[*b]
                .confidence
                .total_cmp(&self.patches[*a].confidence)
                .then(a.cmp(b))
        });
        let mut keep = ranked[..max].to_vec();
        keep.sort_unstable();

        let dropped = self.patches.len() - max;
        self.patches = std::mem::take(&mut self.patches)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.binary_search(i).is_ok())
            .map(|(_, p)| p)
            .collect();
        dropped
    }
}

pub fn average_confidence(patches: &[PatchCandidate]) -> f64 {
    if patches.is_empty() {
        return 0.0;
    }
    patches.iter().map(|p| p.confidence).sum::<f64>() / patches.len() as f64
}

/// `0.5 + 0.2·compiled + 0.2·passed + 0.1·pass_ratio`, clamped to `[0, 1]`.
pub fn compute_confidence(record: &ValidationRecord) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if record.compiled() {
        confidence += 0.2;
    }
    if record.passed() {
        confidence += 0.2;
    }
    if let (Some(passed), Some(total)) = (record.tests_passed_count, record.tests_total_count) {
        if total > 0 {
            confidence += 0.1 * (passed as f64 / total as f64);
        }
    }
    clamp_confidence(confidence)
}

/// Run the extraction tiers over a decoded document.
pub fn extract_patches(results: &PipelineResults) -> Vec<PatchCandidate> {
    let candidates = results.patch_candidates.as_deref().unwrap_or_default();
    let locations = results.suspicious_locations.as_deref().unwrap_or_default();
    let mut patches = Vec::new();

    let successful = results
        .validation_results
        .iter()
        .flatten()
        .filter(|record| record.succeeded());

    for record in successful {
        let id = record.patch_id.as_deref().unwrap_or("unknown");
        let matching = candidates
            .iter()
            .find(|c| c.patch_id.is_some() && c.patch_id == record.patch_id && c.is_usable());

        if let Some(candidate) = matching {
            // is_usable() guarantees both fields
            let (Some(file), Some(line)) = (&candidate.file_path, candidate.start_line) else {
                continue;
            };
            debug!(patch_id = id, file = %file, line, "patch from candidate data");
            patches.push(PatchCandidate::new(
                file.clone(),
                line,
                candidate.original_code.clone().unwrap_or_default(),
                candidate.modified_code.clone().unwrap_or_default(),
                compute_confidence(record),
            ));
        } else if let Some((location, (file, line))) =
            locations.iter().find_map(|l| l.usable().map(|u| (l, u)))
        {
            debug!(patch_id = id, file, line, "patch from suspicious location");
            patches.push(PatchCandidate::new(
                file,
                line,
                format!("// original code at line {line}"),
                format!("// fixed code (patch {id})"),
                location.score_or(SUSPICIOUS_FALLBACK_CONFIDENCE),
            ));
        } else {
            debug!(patch_id = id, "generic placeholder patch");
            patches.push(PatchCandidate::new(
                "unknown",
                1,
                format!("// original code (patch {id})"),
                format!("// fixed code (patch {id})"),
                GENERIC_FALLBACK_CONFIDENCE,
            ));
        }
    }

    if patches.is_empty() {
        for location in locations {
            if let Some((file, line)) = location.usable() {
                patches.push(PatchCandidate::new(
                    file,
                    line,
                    format!("// suspicious code at line {line}"),
                    "// potential fix for suspicious code",
                    location.score_or(LOCALIZATION_ONLY_CONFIDENCE),
                ));
            }
        }
    }

    patches
}

/// Turn a decoded document into an outcome.
pub fn interpret(results: &PipelineResults) -> AnalysisOutcome {
    let patches = extract_patches(results);
    let tally = ValidationTally::from_results(results);
    let success = tally.successful > 0 && !patches.is_empty();

    let error_message = if success {
        None
    } else {
        Some(diagnose(&tally, patches.len()))
    };

    info!(
        patches = patches.len(),
        success,
        validations = tally.total,
        "interpreted analysis results"
    );

    AnalysisOutcome {
        success,
        patches,
        error_message,
        failure: None,
        tally,
    }
}

/// Human-readable explanation of an unsuccessful analysis.
pub fn diagnose(tally: &ValidationTally, patch_count: usize) -> String {
    if !tally.present {
        return "no validation results found in apr output. the apr engine may not have completed successfully or the output format is unexpected.".to_string();
    }
    if tally.total == 0 {
        return "apr engine did not generate any patches to validate. this may indicate that no suspicious locations were identified or the fault localization failed.".to_string();
    }
    if tally.compilation_failures == tally.total {
        return format!(
            "all {} generated patches failed to compile. this suggests the mutations may be too aggressive or the build environment has issues.",
            tally.total
        );
    }
    if tally.test_failures > 0 && patch_count == 0 {
        return format!(
            "{} patches compiled successfully but failed tests, {} failed to compile. the patches may not address the root cause of the test failures.",
            tally.test_failures, tally.compilation_failures
        );
    }
    if tally.successful > 0 && patch_count == 0 {
        return format!(
            "{} patches passed all tests but could not be extracted for pr creation. this may be a parsing issue with the patch candidate data.",
            tally.successful
        );
    }

    let summary = format!(
        "apr analysis completed but no viable patches were found. results: {} successful, {} test failures, {} compilation failures out of {} total attempts.",
        tally.successful, tally.test_failures, tally.compilation_failures, tally.total
    );
    if tally.total < 5 {
        format!("{summary} consider running apr with different parameters or checking if the failing tests are deterministic.")
    } else {
        format!("{summary} the fault may be too complex for automated repair or require domain-specific knowledge.")
    }
}

/// Decode a result document.
pub fn parse_results_str(raw: &str) -> Result<PipelineResults, ResultParsingError> {
    serde_json::from_str(raw).map_err(|err| match err.classify() {
        serde_json::error::Category::Data => ResultParsingError::Other {
            message: err.to_string(),
        },
        _ => ResultParsingError::MalformedJson {
            message: err.to_string(),
        },
    })
}

/// Read, decode and interpret a result file.
pub async fn parse_results_file(path: &Path) -> AnalysisOutcome {
    let path_text = path.display().to_string();
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            let parsing = match err.kind() {
                std::io::ErrorKind::NotFound => ResultParsingError::MissingFile { path: path_text },
                std::io::ErrorKind::PermissionDenied => {
                    ResultParsingError::PermissionDenied { path: path_text }
                }
                _ => ResultParsingError::Other {
                    message: err.to_string(),
                },
            };
            warn!(error = %parsing, "could not read analysis results");
            return AnalysisOutcome::from_parsing_error(parsing);
        }
    };

    debug!(path = %path.display(), bytes = raw.len(), "read analysis results");
    match parse_results_str(&raw) {
        Ok(results) => interpret(&results),
        Err(err) => {
            warn!(error = %err, "could not decode analysis results");
            AnalysisOutcome::from_parsing_error(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(json: &str) -> PipelineResults {
        parse_results_str(json).unwrap()
    }

    #[test]
    fn successful_validation_with_candidate() {
        let outcome = interpret(&results(
            r#"{
                "validation_results": [{"patch_id": "p1", "compilation_success": true, "tests_passed": true}],
                "patch_candidates": [{"patch_id": "p1", "file_path": "a.c", "start_line": 10,
                                      "original_code": "x = 1;", "modified_code": "x = 2;"}]
            }"#,
        ));
        assert!(outcome.success);
        assert_eq!(outcome.patches.len(), 1);
        let patch = &outcome.patches[0];
        assert_eq!(patch.file_path, "a.c");
        assert_eq!(patch.line, 10);
        assert_eq!(patch.fixed_snippet, "x = 2;");
        assert!((patch.confidence - 0.9).abs() < 1e-9);
        assert!(outcome.error_message.is_none());
    }

    #[test]
    fn pass_ratio_adds_to_confidence() {
        let record = ValidationRecord {
            compilation_success: Some(true),
            tests_passed: Some(true),
            tests_passed_count: Some(3),
            tests_total_count: Some(4),
            ..Default::default()
        };
        assert!((compute_confidence(&record) - 0.975).abs() < 1e-9);

        let zero_total = ValidationRecord {
            tests_passed_count: Some(3),
            tests_total_count: Some(0),
            ..record.clone()
        };
        assert!((compute_confidence(&zero_total) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn numeric_patch_ids_match_string_ids() {
        let outcome = interpret(&results(
            r#"{
                "validation_results": [{"patch_id": 7, "compilation_success": true, "tests_passed": true}],
                "patch_candidates": [{"patch_id": "7", "file_path": "b.c", "start_line": 3}]
            }"#,
        ));
        assert_eq!(outcome.patches[0].file_path, "b.c");
    }

    #[test]
    fn unusable_candidate_falls_back_to_suspicious_location() {
        let outcome = interpret(&results(
            r#"{
                "validation_results": [{"patch_id": "p1", "compilation_success": true, "tests_passed": true}],
                "patch_candidates": [{"patch_id": "p1", "start_line": 10}],
                "suspicious_locations": [
                    {"file_path": "", "line_number": 4},
                    {"file_path": "c.c", "line_number": 0, "suspiciousness_score": 0.9},
                    {"file_path": "c.c", "line_number": 12, "suspiciousness_score": 0.0}
                ]
            }"#,
        ));
        assert!(outcome.success);
        let patch = &outcome.patches[0];
        assert_eq!((patch.file_path.as_str(), patch.line), ("c.c", 12));
        assert!((patch.confidence - 0.7).abs() < 1e-9);
        assert_eq!(patch.original_snippet, "// original code at line 12");
        assert_eq!(patch.fixed_snippet, "// fixed code (patch p1)");
    }

    #[test]
    fn generic_placeholder_when_nothing_is_known() {
        let outcome = interpret(&results(
            r#"{"validation_results": [{"patch_id": "p9", "compilation_success": true, "tests_passed": true}]}"#,
        ));
        assert!(outcome.success);
        let patch = &outcome.patches[0];
        assert_eq!((patch.file_path.as_str(), patch.line), ("unknown", 1));
        assert!((patch.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn localization_only_results_are_not_successful() {
        let outcome = interpret(&results(
            r#"{
                "validation_results": [{"patch_id": "p1", "compilation_success": true, "tests_passed": false}],
                "suspicious_locations": [
                    {"file_path": "d.c", "line_number": 5, "suspiciousness_score": 0.8},
                    {"file_path": "e.c", "line_number": 6}
                ]
            }"#,
        ));
        assert!(!outcome.success);
        assert_eq!(outcome.patches.len(), 2);
        assert!((outcome.patches[0].confidence - 0.8).abs() < 1e-9);
        assert!((outcome.patches[1].confidence - 0.5).abs() < 1e-9);
        assert!(!outcome.is_actionable());
    }

    #[test]
    fn scores_above_one_are_clamped() {
        let outcome = interpret(&results(
            r#"{"suspicious_locations": [{"file_path": "f.c", "line_number": 1, "suspiciousness_score": 4.2},
                                         {"file_path": "g.c", "line_number": 2, "suspiciousness_score": -1.0}]}"#,
        ));
        for patch in &outcome.patches {
            assert!((0.0..=1.0).contains(&patch.confidence));
        }
        assert_eq!(outcome.patches[0].confidence, 1.0);
        assert_eq!(outcome.patches[1].confidence, 0.0);
    }

    #[test]
    fn diagnostics_cover_each_failure_shape() {
        let missing = interpret(&results("{}"));
        assert!(missing
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("no validation results found"));

        let empty = interpret(&results(r#"{"validation_results": []}"#));
        assert!(empty
            .error_message
            .as_deref()
            .unwrap()
            .contains("did not generate any patches"));

        let compile = interpret(&results(
            r#"{"validation_results": [{"compilation_success": false}, {"compilation_success": false}]}"#,
        ));
        assert!(compile
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("all 2 generated patches failed to compile"));

        let tests = interpret(&results(
            r#"{"validation_results": [{"compilation_success": true, "tests_passed": false},
                                       {"compilation_success": false}]}"#,
        ));
        assert!(tests
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("1 patches compiled successfully but failed tests, 1 failed to compile"));
    }

    #[test]
    fn general_summary_hint_depends_on_attempt_count() {
        let few = ValidationTally {
            present: true,
            total: 2,
            compilation_failures: 1,
            test_failures: 1,
            successful: 0,
        };
        assert!(diagnose(&few, 3).contains("different parameters"));

        let many = ValidationTally { total: 6, compilation_failures: 3, test_failures: 3, ..few };
        assert!(diagnose(&many, 3).contains("too complex"));
    }

    #[test]
    fn malformed_and_mistyped_documents_are_classified() {
        assert!(matches!(
            parse_results_str("{not json"),
            Err(ResultParsingError::MalformedJson { .. })
        ));
        assert!(matches!(
            parse_results_str(r#"{"validation_results": {"oops": true}}"#),
            Err(ResultParsingError::Other { .. })
        ));
        assert!(parse_results_str(r#"{"pipeline_summary": {"anything": [1, 2]}}"#).is_ok());
    }

    #[test]
    fn cap_keeps_highest_confidence_in_original_order() {
        let mut outcome = AnalysisOutcome {
            success: true,
            patches: [0.5, 0.9, 0.7, 0.9, 0.6]
                .iter()
                .enumerate()
                .map(|(i, c)| PatchCandidate::new(format!("f{i}.c"), 1, "", "", *c))
                .collect(),
            error_message: None,
            failure: None,
            tally: ValidationTally::default(),
        };
        assert_eq!(outcome.cap_patches(3), 2);
        let files: Vec<_> = outcome.patches.iter().map(|p| p.file_path.as_str()).collect();
        assert_eq!(files, vec!["f1.c", "f2.c", "f3.c"]);
        assert_eq!(outcome.cap_patches(0), 0);
        assert_eq!(outcome.patches.len(), 3);
    }

    #[tokio::test]
    async fn missing_file_is_a_parsing_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = parse_results_file(&dir.path().join(RESULTS_FILE_NAME)).await;
        assert!(!outcome.success);
        assert!(outcome.patches.is_empty());
        assert!(matches!(
            outcome.failure,
            Some(AnalysisFailure::Parsing(ResultParsingError::MissingFile { .. }))
        ));
    }

    #[tokio::test]
    async fn results_on_disk_are_read_and_interpreted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESULTS_FILE_NAME);
        std::fs::write(&path, "{}").unwrap();
        let outcome = parse_results_file(&path).await;
        assert_eq!(outcome.failure, None);
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("no validation results"));
    }
}
