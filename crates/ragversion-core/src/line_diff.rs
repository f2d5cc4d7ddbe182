//! Unified line diff between two stored versions.
//!
//! Produces the classic format:
//!
//! ```text
//! --- v1
//! +++ v2
//! @@ -2,3 +2,3 @@
//!  context line
//! -removed line
//! +added line
//! ```
//!
//! Common leading and trailing lines are trimmed before the LCS table is
//! built, so small edits to large documents stay cheap. When the remaining
//! table would exceed [`MAX_TABLE_CELLS`], the middle is split with
//! Hirschberg's method, which keeps only two rows of lengths at a time.

/// Lines of context around each change.
pub const DEFAULT_CONTEXT: usize = 3;

/// Largest LCS table built in one piece.
pub const MAX_TABLE_CELLS: usize = 4_000_000;

/// A rendered diff with its line counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineDiff {
    pub text: String,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Diff `old` against `new`. Identical inputs produce an empty diff.
pub fn unified_diff(old: &str, new: &str, from_label: &str, to_label: &str, context: usize) -> LineDiff {
    if old == new {
        return LineDiff::default();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = edit_ops(&old_lines, &new_lines);
    if ops.iter().all(|op| *op == Op::Equal) {
        return LineDiff::default();
    }

    let mut diff = LineDiff {
        text: format!("--- {}\n+++ {}\n", from_label, to_label),
        ..Default::default()
    };

    // Positions in old/new before each op.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut oi, mut ni) = (0usize, 0usize);
    for op in &ops {
        positions.push((oi, ni));
        match op {
            Op::Equal => {
                oi += 1;
                ni += 1;
            }
            Op::Delete => oi += 1,
            Op::Insert => ni += 1,
        }
    }
    positions.push((oi, ni));

    for (start, end) in hunk_ranges(&ops, context) {
        let (old_start, new_start) = positions[start];
        let (old_end, new_end) = positions[end];
        diff.text.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(old_start, old_end - old_start),
            format_range(new_start, new_end - new_start)
        ));
        for (offset, op) in ops[start..end].iter().enumerate() {
            let (o, n) = positions[start + offset];
            match op {
                Op::Equal => {
                    diff.text.push(' ');
                    diff.text.push_str(old_lines[o]);
                }
                Op::Delete => {
                    diff.deletions += 1;
                    diff.text.push('-');
                    diff.text.push_str(old_lines[o]);
                }
                Op::Insert => {
                    diff.additions += 1;
                    diff.text.push('+');
                    diff.text.push_str(new_lines[n]);
                }
            }
            diff.text.push('\n');
        }
    }

    if diff.text.ends_with('\n') {
        diff.text.pop();
    }
    diff
}

/// `start` is 0-based. Empty ranges point at the line before the gap.
fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

fn edit_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = vec![Op::Equal; prefix];
    split_ops(old_mid, new_mid, MAX_TABLE_CELLS, &mut ops);
    ops.extend(std::iter::repeat(Op::Equal).take(suffix));
    ops
}

/// Appends an optimal edit script to `ops`, building full tables only for
/// pieces of at most `max_cells`.
fn split_ops(old: &[&str], new: &[&str], max_cells: usize, ops: &mut Vec<Op>) {
    if old.is_empty() {
        ops.extend(std::iter::repeat(Op::Insert).take(new.len()));
        return;
    }
    if new.is_empty() {
        ops.extend(std::iter::repeat(Op::Delete).take(old.len()));
        return;
    }
    let cells = (old.len() + 1).saturating_mul(new.len() + 1);
    if cells <= max_cells || old.len() == 1 {
        ops.extend(table_ops(old, new));
        return;
    }

    let mid = old.len() / 2;
    let head = lcs_lengths(&old[..mid], new);
    let tail = lcs_lengths_rev(&old[mid..], new);
    let split = (0..=new.len())
        .max_by_key(|&j| head[j] + tail[j])
        .unwrap_or(0);

    split_ops(&old[..mid], &new[..split], max_cells, ops);
    split_ops(&old[mid..], &new[split..], max_cells, ops);
}

/// `row[j]` = LCS length of `old` and `new[..j]`.
fn lcs_lengths(old: &[&str], new: &[&str]) -> Vec<u32> {
    let mut prev = vec![0u32; new.len() + 1];
    let mut cur = vec![0u32; new.len() + 1];
    for a in old {
        for (j, b) in new.iter().enumerate() {
            cur[j + 1] = if a == b {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev
}

/// `row[j]` = LCS length of `old` and `new[j..]`.
fn lcs_lengths_rev(old: &[&str], new: &[&str]) -> Vec<u32> {
    let m = new.len();
    let mut prev = vec![0u32; m + 1];
    let mut cur = vec![0u32; m + 1];
    for a in old.iter().rev() {
        for j in (0..m).rev() {
            cur[j] = if *a == new[j] {
                prev[j + 1] + 1
            } else {
                prev[j].max(cur[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev
}

fn table_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let (n, m) = (old.len(), new.len());
    // dp[i][j] = LCS length of old[i..] and new[j..]
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if old[i] == new[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i] == new[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if i < n && (j == m || dp[i + 1][j] >= dp[i][j + 1]) {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops
}

/// Group changed ops into `[start, end)` hunks with `context` lines on each
/// side, merging hunks whose context would overlap.
fn hunk_ranges(ops: &[Op], context: usize) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < ops.len() {
        if ops[i] == Op::Equal {
            i += 1;
            continue;
        }
        let change_start = i;
        while i < ops.len() && ops[i] != Op::Equal {
            i += 1;
        }
        let start = change_start.saturating_sub(context);
        let end = (i + context).min(ops.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}
