//! Line-level diff engine.
//!
//! A pure function from two text snapshots to an ordered list of
//! [`DiffOp`]s, built on the classic longest-common-subsequence table.
//!
//! # Algorithm
//!
//! 1. Split both texts on `'\n'`.
//! 2. Fill an `(m+1)×(n+1)` LCS table.
//! 3. Backtrack from `(m, n)` to `(0, 0)`:
//!    - equal lines emit [`DiffOp::Equal`] and move diagonally;
//!    - otherwise move toward the larger neighbor, emitting
//!      [`DiffOp::Added`] along the new-text axis and [`DiffOp::Removed`]
//!      along the old-text axis;
//!    - on a tie, emit `Added`.
//! 4. Reverse the collected ops.
//!
//! The tie-break makes the output deterministic: for a replaced line the
//! removal is listed before the addition.
//!
//! Time and space are O(m·n). Documents are editor-scale, so there is no
//! large-file fallback.

use crate::models::{DiffOp, DiffStats};

/// Split text into lines. An empty string is a single empty line, which
/// keeps `lines.join("\n")` an exact inverse.
fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Compute the line diff that turns `old_text` into `new_text`.
pub fn compute_line_diff(old_text: &str, new_text: &str) -> Vec<DiffOp> {
    let old = split_lines(old_text);
    let new = split_lines(new_text);
    let (m, n) = (old.len(), new.len());

    // Row-major (m+1)×(n+1) table.
    let width = n + 1;
    let mut table = vec![0usize; (m + 1) * width];
    for i in 1..=m {
        for j in 1..=n {
            table[i * width + j] = if old[i - 1] == new[j - 1] {
                table[(i - 1) * width + (j - 1)] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + (j - 1)])
            };
        }
    }

    let mut ops = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(DiffOp::Equal {
                text: old[i - 1].to_string(),
                old_line: i,
                new_line: j,
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i * width + (j - 1)] >= table[(i - 1) * width + j]) {
            ops.push(DiffOp::Added {
                text: new[j - 1].to_string(),
                new_line: j,
            });
            j -= 1;
        } else {
            ops.push(DiffOp::Removed {
                text: old[i - 1].to_string(),
                old_line: i,
            });
            i -= 1;
        }
    }

    ops.reverse();
    ops
}

/// Count additions, removals, and unchanged lines.
pub fn diff_stats(ops: &[DiffOp]) -> DiffStats {
    ops.iter().fold(DiffStats::default(), |mut stats, op| {
        match op {
            DiffOp::Equal { .. } => stats.unchanged += 1,
            DiffOp::Added { .. } => stats.added += 1,
            DiffOp::Removed { .. } => stats.removed += 1,
        }
        stats
    })
}

/// Rebuild `(old_text, new_text)` from an op list.
pub fn apply_ops(ops: &[DiffOp]) -> (String, String) {
    let mut old = Vec::new();
    let mut new = Vec::new();
    for op in ops {
        match op {
            DiffOp::Equal { text, .. } => {
                old.push(text.as_str());
                new.push(text.as_str());
            }
            DiffOp::Added { text, .. } => new.push(text.as_str()),
            DiffOp::Removed { text, .. } => old.push(text.as_str()),
        }
    }
    (old.join("\n"), new.join("\n"))
}

/// Render ops as prefixed lines: `"  "` equal, `"+ "` added, `"- "` removed.
pub fn render_unified(ops: &[DiffOp]) -> String {
    let mut out = String::new();
    for op in ops {
        let prefix = match op {
            DiffOp::Equal { .. } => "  ",
            DiffOp::Added { .. } => "+ ",
            DiffOp::Removed { .. } => "- ",
        };
        out.push_str(prefix);
        out.push_str(op.text());
        out.push('\n');
    }
    out
}
