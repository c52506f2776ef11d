//! Splicing of adjacent window consensuses in overlap mode.

use crate::poa::{AlignmentEngine, Graph};
use crate::window::{BaseCoder, GAP_ROW};

/// The pieces of one window the stitcher votes with.
pub(crate) struct StitchSide<'a> {
    pub consensus: &'a [u8],
    pub summary: &'a [u32],
    pub coder: &'a BaseCoder,
}

/// Aligns the tail of `left` against the head of `right` and merges them
/// column by column. Equal columns pass through; one-sided gaps advance the
/// other side; conflicting bases are decided by the window summaries, with
/// a gap majority dropping the column. When no matching column exists at
/// all, both raw pieces are emitted back to back.
pub(crate) fn merge_consensus_pair(
    engine: &mut AlignmentEngine,
    graph: &mut Graph,
    left: &StitchSide,
    right: &StitchSide,
    start_l: usize,
    len_l: usize,
    len_r: usize,
) -> Vec<u8> {
    if len_l == 0 || len_r == 0 {
        let mut merged = left.consensus[start_l..start_l + len_l].to_vec();
        merged.extend_from_slice(&right.consensus[..len_r]);
        return merged;
    }
    graph.add_alignment(
        &Vec::new(),
        &left.consensus[start_l..start_l + len_l],
        &vec![1; len_l],
    );
    let alignment = engine.align(&right.consensus[..len_r], graph);
    graph.add_alignment(&alignment, &right.consensus[..len_r], &vec![1; len_r]);
    let msa = graph.generate_msa();
    graph.clear();

    let (m0, m1) = (&msa[0], &msa[1]);
    let len_msa = m0.len();
    let len_l_full = left.consensus.len();
    let len_r_full = right.consensus.len();

    let mut merged: Vec<u8> = Vec::new();
    let mut right_tail: Vec<u8> = Vec::new();
    let mut first_match = None;
    let mut last_match = None;
    let mut l_pos = start_l;
    let mut r_pos = 0usize;

    for j in 0..len_msa {
        if m0[j] == m1[j] {
            first_match = Some(j);
            break;
        }
        if m0[j] != b'-' {
            merged.push(m0[j]);
            l_pos += 1;
        }
        if m1[j] != b'-' {
            r_pos += 1;
        }
    }
    for j in (1..len_msa).rev() {
        if m0[j] == m1[j] {
            last_match = Some(j);
            break;
        }
        if m1[j] != b'-' {
            right_tail.push(m1[j]);
        }
    }

    match (first_match, last_match) {
        (Some(first), Some(last)) => {
            for j in first..=last {
                if m0[j] == m1[j] {
                    merged.push(m0[j]);
                    l_pos += 1;
                    r_pos += 1;
                } else if m0[j] == b'-' {
                    r_pos += 1;
                } else if m1[j] == b'-' {
                    l_pos += 1;
                } else {
                    let mut gaps = 0u32;
                    let mut l_count = 0u32;
                    let mut r_count = 0u32;
                    if !left.summary.is_empty() {
                        gaps += left.summary[GAP_ROW * len_l_full + l_pos];
                        let row = left.coder[m0[j] as usize];
                        if row >= 0 {
                            l_count = left.summary[row as usize * len_l_full + l_pos];
                        }
                    }
                    if !right.summary.is_empty() {
                        gaps += right.summary[GAP_ROW * len_r_full + r_pos];
                        let row = right.coder[m1[j] as usize];
                        if row >= 0 {
                            r_count = right.summary[row as usize * len_r_full + r_pos];
                        }
                    }
                    if gaps >= l_count.max(r_count) {
                        continue;
                    }
                    merged.push(if l_count > r_count { m0[j] } else { m1[j] });
                }
            }
            right_tail.reverse();
        }
        // No anchor column: emit both raw pieces, junction duplicated.
        _ => {
            merged = left.consensus[start_l..start_l + len_l].to_vec();
            right_tail = right.consensus[..len_r].to_vec();
        }
    }

    merged.extend_from_slice(&right_tail);
    merged
}
