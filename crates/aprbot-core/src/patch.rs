//! Pure text rendering for materialization: file edits, branch names,
//! commit messages and the pull request title/body.

use crate::event::RepairEvent;
use crate::interpret::{average_confidence, PatchCandidate};

pub const MISMATCH_MARKER: &str = "// apr: original content may have changed";
pub const BRANCH_PREFIX: &str = "apr/fix-ci-";

/// Where a patch landed in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Replaced,
    /// `line` was past the end; padded with empty lines and appended.
    Appended,
    /// `line <= 0`.
    Prepended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub content: String,
    pub placement: Placement,
    /// The replaced line did not contain the expected original snippet.
    pub mismatch: bool,
}

/// Largest gap of empty lines a patch may open past the end of a file.
pub const MAX_PADDING_LINES: usize = 10_000;

/// The patch targets a line too far past the end of the file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line} is more than {MAX_PADDING_LINES} lines past the end of a {len}-line file")]
pub struct LineOutOfRange {
    pub line: i64,
    pub len: usize,
}

/// Apply one patch to a file's content.
///
/// Content is split on `\n` and re-joined with `\n`, so an empty file is one
/// empty line and a trailing newline survives as a trailing empty line.
pub fn apply_patch_to_content(
    content: &str,
    patch: &PatchCandidate,
) -> Result<AppliedEdit, LineOutOfRange> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let fixed = patch.fixed_snippet.clone();

    if patch.line <= 0 {
        lines.insert(0, fixed);
        return Ok(AppliedEdit {
            content: lines.join("\n"),
            placement: Placement::Prepended,
            mismatch: false,
        });
    }

    let out_of_range = || LineOutOfRange {
        line: patch.line,
        len: lines.len(),
    };
    let line = usize::try_from(patch.line).map_err(|_| out_of_range())?;
    if line > lines.len() {
        if line - lines.len() > MAX_PADDING_LINES {
            return Err(out_of_range());
        }
        lines.resize(line - 1, String::new());
        lines.push(fixed);
        return Ok(AppliedEdit {
            content: lines.join("\n"),
            placement: Placement::Appended,
            mismatch: false,
        });
    }

    let index = line - 1;
    let mismatch = original_mismatch(&lines[index], &patch.original_snippet);
    lines[index] = if mismatch {
        format!("{fixed} {MISMATCH_MARKER}")
    } else {
        fixed
    };
    Ok(AppliedEdit {
        content: lines.join("\n"),
        placement: Placement::Replaced,
        mismatch,
    })
}

fn original_mismatch(current_line: &str, original: &str) -> bool {
    let expected = original.trim();
    !expected.is_empty() && !is_comment(expected) && !current_line.contains(expected)
}

fn is_comment(snippet: &str) -> bool {
    let snippet = snippet.trim_start();
    snippet.starts_with("//") || snippet.starts_with("/*")
}

/// `apr/fix-ci-<first 8 of head sha>`
pub fn primary_branch_name(event: &RepairEvent) -> String {
    format!("{BRANCH_PREFIX}{}", event.short_sha())
}

/// Primary name plus a random 3-character suffix.
pub fn fallback_branch_name(event: &RepairEvent) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", primary_branch_name(event), &suffix[..3])
}

/// One commit per patch; `sequence` is 1-based.
pub fn commit_message(patch: &PatchCandidate, sequence: usize) -> String {
    let confidence = patch.confidence_percent();
    let file_name = patch
        .file_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(&patch.file_path);

    format!(
        "fix(ci-apr-bot): resolve issue in {file_name}:{line}\n\
         \n\
         Applied automated program repair patch with {confidence}% confidence.\n\
         \n\
         - file: {file}\n\
         - line: {line}\n\
         - confidence: {confidence}%\n\
         - patch: {sequence}",
        line = patch.line,
        file = patch.file_path,
    )
}

fn percent(value: f64) -> u32 {
    (value * 100.0).round() as u32
}

pub fn pr_title(patches: &[PatchCandidate]) -> String {
    let count = patches.len();
    let noun = if count == 1 { "patch" } else { "patches" };
    format!(
        "ci-apr-bot: fix CI failure ({count} {noun}, {}% confidence)",
        percent(average_confidence(patches))
    )
}

/// Counts per confidence band: `>= 80%`, `60-79%`, `< 60%`.
pub fn confidence_breakdown(patches: &[PatchCandidate]) -> (usize, usize, usize) {
    patches.iter().fold((0, 0, 0), |(high, medium, low), p| {
        if p.confidence >= 0.8 {
            (high + 1, medium, low)
        } else if p.confidence >= 0.6 {
            (high, medium + 1, low)
        } else {
            (high, medium, low + 1)
        }
    })
}

fn risk(confidence: u32) -> &'static str {
    if confidence >= 80 {
        "low"
    } else if confidence >= 60 {
        "medium"
    } else {
        "high"
    }
}

fn diff_lines(prefix: char, snippet: &str) -> String {
    snippet
        .lines()
        .map(|line| format!("{prefix} {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn pr_body(patches: &[PatchCandidate], event: &RepairEvent) -> String {
    let (high, medium, low) = confidence_breakdown(patches);
    let mut body = format!(
        "## APR Bot Analysis\n\
         \n\
         This pull request contains automated fixes generated in response to a failed run of `{workflow}`.\n\
         \n\
         ### Analysis Summary\n\
         \n\
         - **Patches Generated**: {count}\n\
         - **Average Confidence**: {average}%\n\
         - **Trigger**: CI failure on commit `{short}`\n\
         - **Base Branch**: `{base}`\n\
         \n\
         ### Confidence Breakdown\n\
         \n\
         | Confidence Level | Count | Description |\n\
         |------------------|-------|-------------|\n\
         | High (>=80%) | {high} | Strongly validated patches |\n\
         | Medium (60-79%) | {medium} | Moderate validation |\n\
         | Low (<60%) | {low} | Review carefully |\n\
         \n\
         ### Applied Patches\n\n",
        workflow = event.workflow_name,
        count = patches.len(),
        average = percent(average_confidence(patches)),
        short = event.short_sha(),
        base = event.head_branch,
    );

    for (index, patch) in patches.iter().enumerate() {
        let confidence = patch.confidence_percent();
        let original = if patch.original_snippet.trim().is_empty() {
            format!("// original code at line {}", patch.line)
        } else {
            patch.original_snippet.clone()
        };
        body.push_str(&format!(
            "#### Patch {n}: `{file}`\n\
             \n\
             - **location**: line {line}\n\
             - **confidence**: {confidence}%\n\
             - **risk**: {risk}\n\
             \n\
             ```diff\n\
             {minus}\n\
             {plus}\n\
             ```\n\n",
            n = index + 1,
            file = patch.file_path,
            line = patch.line,
            risk = risk(confidence),
            minus = diff_lines('-', &original),
            plus = diff_lines('+', &patch.fixed_snippet),
        ));
    }

    body.push_str(
        "### Important Notes\n\
         \n\
         - **Review required**: double-check logic and edge cases.\n\
         - **Test locally**: run the full test suite before merging.\n\
         - **Mind the confidence scores**: higher-confidence patches are more likely correct.\n\
         \n\
         ### Next Steps\n\
         \n\
         1. Review the changes in each commit\n\
         2. Verify tests pass locally\n\
         3. Merge if satisfied, or close and rerun APR if not suitable\n\
         \n\
         This PR was automatically generated by ci-apr-bot in response to a CI failure.",
    );
    body
}
