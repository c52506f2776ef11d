//! Query-to-target overlaps and the breaking-point finder.
//!
//! Records arrive with external names (PAF, SAM) or raw file ordinals
//! (MHAP); `transmute` rewrites both into dense store ids. Breaking points
//! are recovered by re-aligning the overlapping regions and projecting the
//! alignment path onto window boundaries of the target.

use crate::align::{edit_alignment, Op};
use crate::error::PolishError;
use crate::store::{SequenceStore, Side};

#[derive(Debug, Clone)]
pub struct Overlap {
    q_name: Option<String>,
    pub q_id: u64,
    pub q_begin: u32,
    pub q_end: u32,
    pub q_length: u32,
    t_name: Option<String>,
    pub t_id: u64,
    pub t_begin: u32,
    pub t_end: u32,
    pub t_length: u32,
    /// True when the query aligns reverse-complemented.
    pub strand: bool,
    pub error: f64,
    /// Sorted (target, query) pairs; entries 2k and 2k+1 delimit the k-th
    /// intra-window fragment. Query positions are relative to the aligned
    /// query region.
    pub breaking_points: Vec<(u32, u32)>,
    transmuted: bool,
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Result<T, String> {
    fields
        .get(index)
        .ok_or_else(|| "not enough fields in overlap record".to_string())?
        .parse::<T>()
        .map_err(|_| format!("invalid overlap field {:?}", fields[index]))
}

impl Overlap {
    /// PAF: names, 0-based half-open coordinates, `+`/`-` strand. The error
    /// rate is derived from the matches / block-length columns.
    pub fn from_paf(fields: &[&str]) -> Result<Overlap, String> {
        if fields.len() < 12 {
            return Err("not enough fields in PAF record".to_string());
        }
        let strand = match fields[4] {
            "+" => false,
            "-" => true,
            other => return Err(format!("invalid strand {:?}", other)),
        };
        let matches: u32 = parse_field(fields, 9)?;
        let block_len: u32 = parse_field(fields, 10)?;
        let error = if block_len == 0 {
            1.0
        } else {
            1.0 - (matches as f64 / block_len as f64).min(1.0)
        };
        Ok(Overlap {
            q_name: Some(fields[0].to_string()),
            q_id: 0,
            q_begin: parse_field(fields, 2)?,
            q_end: parse_field(fields, 3)?,
            q_length: parse_field(fields, 1)?,
            t_name: Some(fields[5].to_string()),
            t_id: 0,
            t_begin: parse_field(fields, 7)?,
            t_end: parse_field(fields, 8)?,
            t_length: parse_field(fields, 6)?,
            strand,
            error,
            breaking_points: Vec::new(),
            transmuted: false,
        })
    }

    /// MHAP: 1-based record ordinals, per-side orientation bits; coordinates
    /// of a reversed side are flipped onto the forward strand here.
    pub fn from_mhap(fields: &[&str]) -> Result<Overlap, String> {
        if fields.len() < 12 {
            return Err("not enough fields in MHAP record".to_string());
        }
        let a_id: u64 = parse_field(fields, 0)?;
        let b_id: u64 = parse_field(fields, 1)?;
        if a_id == 0 || b_id == 0 {
            return Err("MHAP record ordinals are 1-based".to_string());
        }
        let error: f64 = parse_field(fields, 2)?;
        let a_rev: u32 = parse_field(fields, 4)?;
        let a_begin: u32 = parse_field(fields, 5)?;
        let a_end: u32 = parse_field(fields, 6)?;
        let a_length: u32 = parse_field(fields, 7)?;
        let b_rev: u32 = parse_field(fields, 8)?;
        let b_begin: u32 = parse_field(fields, 9)?;
        let b_end: u32 = parse_field(fields, 10)?;
        let b_length: u32 = parse_field(fields, 11)?;
        if a_end > a_length || b_end > b_length {
            return Err("MHAP coordinates past sequence length".to_string());
        }
        Ok(Overlap {
            q_name: None,
            q_id: a_id - 1,
            q_begin: if a_rev == 0 { a_begin } else { a_length - a_end },
            q_end: if a_rev == 0 { a_end } else { a_length - a_begin },
            q_length: a_length,
            t_name: None,
            t_id: b_id - 1,
            t_begin: if b_rev == 0 { b_begin } else { b_length - b_end },
            t_end: if b_rev == 0 { b_end } else { b_length - b_begin },
            t_length: b_length,
            strand: (a_rev != 0) != (b_rev != 0),
            error,
            breaking_points: Vec::new(),
            transmuted: false,
        })
    }

    /// SAM: query span and length are recovered from the CIGAR; unmapped
    /// records yield `None`. Reverse-strand clips are mirrored onto forward
    /// coordinates.
    pub fn from_sam(fields: &[&str]) -> Result<Option<Overlap>, String> {
        if fields.len() < 11 {
            return Err("not enough fields in SAM record".to_string());
        }
        let flag: u32 = parse_field(fields, 1)?;
        if flag & 0x4 != 0 || fields[2] == "*" || fields[5] == "*" {
            return Ok(None);
        }
        let pos: u32 = parse_field(fields, 3)?;
        if pos == 0 {
            return Ok(None);
        }

        let cigar = fields[5];
        let mut leading_clip: u32 = 0;
        let mut trailing_clip: u32 = 0;
        let mut q_consumed: u32 = 0;
        let mut t_consumed: u32 = 0;
        let mut matched: u32 = 0;
        let mut num = 0u32;
        for c in cigar.bytes() {
            if c.is_ascii_digit() {
                num = num * 10 + (c - b'0') as u32;
                continue;
            }
            match c {
                b'S' | b'H' => {
                    if q_consumed == 0 {
                        leading_clip += num;
                    } else {
                        trailing_clip += num;
                    }
                }
                b'M' | b'=' | b'X' => {
                    matched += num;
                    q_consumed += num;
                    t_consumed += num;
                }
                b'I' => q_consumed += num,
                b'D' | b'N' => t_consumed += num,
                b'P' => {}
                other => return Err(format!("invalid CIGAR operation {:?}", other as char)),
            }
            num = 0;
        }
        if q_consumed == 0 || t_consumed == 0 {
            return Ok(None);
        }

        let strand = flag & 0x10 != 0;
        let q_length = leading_clip + q_consumed + trailing_clip;
        let q_begin = if strand { trailing_clip } else { leading_clip };
        let t_begin = pos - 1;
        let span = q_consumed.max(t_consumed);
        let error = 1.0 - (matched as f64 / span as f64).min(1.0);
        Ok(Some(Overlap {
            q_name: Some(fields[0].to_string()),
            q_id: 0,
            q_begin,
            q_end: q_begin + q_consumed,
            q_length,
            t_name: Some(fields[2].to_string()),
            t_id: 0,
            t_begin,
            t_end: t_begin + t_consumed,
            t_length: 0,
            strand,
            error,
            breaking_points: Vec::new(),
            transmuted: false,
        }))
    }

    /// Rewrites external names or raw ordinals into store ids and pins the
    /// sequence lengths to the store's records.
    pub fn transmute(&mut self, store: &SequenceStore) -> Result<(), PolishError> {
        if self.transmuted {
            return Ok(());
        }
        self.q_id = match self.q_name.take() {
            Some(name) => store
                .lookup_name(Side::Query, &name)
                .ok_or(PolishError::MissingSequence(name))?,
            None => store.lookup_raw(Side::Query, self.q_id).ok_or_else(|| {
                PolishError::MissingSequence(format!("with ordinal {}", self.q_id + 1))
            })?,
        };
        self.t_id = match self.t_name.take() {
            Some(name) => store
                .lookup_name(Side::Target, &name)
                .ok_or(PolishError::MissingSequence(name))?,
            None => store.lookup_raw(Side::Target, self.t_id).ok_or_else(|| {
                PolishError::MissingSequence(format!("with ordinal {}", self.t_id + 1))
            })?,
        };
        self.q_length = store.get(self.q_id).len() as u32;
        self.t_length = store.get(self.t_id).len() as u32;
        self.transmuted = true;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.transmuted
            && self.q_begin < self.q_end
            && self.q_end <= self.q_length
            && self.t_begin < self.t_end
            && self.t_end <= self.t_length
    }

    pub fn length(&self) -> u32 {
        (self.t_end - self.t_begin).max(self.q_end - self.q_begin)
    }

    /// Re-aligns the overlapping regions and records one (start, end) pair
    /// of matched positions per window the overlap crosses. With window
    /// expansion the per-window spans overlap, so consecutive fragments may
    /// share positions.
    pub fn find_breaking_points(
        &mut self,
        store: &SequenceStore,
        window_length: u32,
        overlap_percentage: f64,
    ) {
        if !self.breaking_points.is_empty() {
            return;
        }
        let query = store.get(self.q_id);
        let target = store.get(self.t_id);
        let q_span = (self.q_end - self.q_begin) as usize;
        let q_offset = if self.strand {
            (self.q_length - self.q_end) as usize
        } else {
            self.q_begin as usize
        };
        let q_region = if self.strand {
            &query.reverse_complement[q_offset..q_offset + q_span]
        } else {
            &query.data[q_offset..q_offset + q_span]
        };
        let t_region = &target.data[self.t_begin as usize..self.t_end as usize];

        let ops = edit_alignment(q_region, t_region, self.error);

        // Compress the path into runs of matched columns.
        let mut runs: Vec<(u32, u32, u32)> = Vec::new();
        let mut t_pos = self.t_begin;
        let mut q_pos: u32 = 0;
        for op in ops {
            match op {
                Op::Match | Op::Mismatch => {
                    match runs.last_mut() {
                        Some(run) if run.0 + run.2 == t_pos && run.1 + run.2 == q_pos => run.2 += 1,
                        _ => runs.push((t_pos, q_pos, 1)),
                    }
                    t_pos += 1;
                    q_pos += 1;
                }
                Op::Ins => q_pos += 1,
                Op::Del => t_pos += 1,
            }
        }
        if runs.is_empty() {
            return;
        }

        let wl = window_length;
        let offset = (wl as f64 * overlap_percentage) as u32;
        let mut first = self.t_begin / wl;
        if offset > 0 && first > 0 && self.t_begin < first * wl + offset {
            first -= 1;
        }
        let mut last = (self.t_end - 1) / wl;
        if offset > 0 && (last + 1) * wl < self.t_length && self.t_end > (last + 1) * wl - offset {
            last += 1;
        }

        for k in first..=last {
            let span_start = if k > 0 { k * wl - offset } else { 0 };
            let span_end = (k + 1) * wl + offset;

            // First matched column at or past the span start.
            let i = runs.partition_point(|&(t, _, len)| t + len <= span_start);
            if i == runs.len() {
                continue;
            }
            let (rt, rq, _) = runs[i];
            let shift = span_start.saturating_sub(rt);
            let (t1, q1) = (rt + shift, rq + shift);
            if t1 >= span_end {
                continue;
            }

            // Last matched column before the span end.
            let j = runs.partition_point(|&(t, _, _)| t < span_end) - 1;
            let (rt, rq, rlen) = runs[j];
            let shift = (span_end - 1 - rt).min(rlen - 1);
            let (t2, q2) = (rt + shift, rq + shift);
            if t2 < t1 {
                continue;
            }

            self.breaking_points.push((t1, q1));
            self.breaking_points.push((t2 + 1, q2 + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Sequence;

    fn store_with(target: &[u8], query: &[u8]) -> SequenceStore {
        let mut store = SequenceStore::new();
        store.add_target(Sequence::new("t1".into(), target.to_vec()));
        store.add_query(Sequence::new("q1".into(), query.to_vec())).unwrap();
        store
    }

    fn identity_overlap(store: &SequenceStore) -> Overlap {
        let len = store.get(0).len();
        let line = format!(
            "q1\t{len}\t0\t{len}\t+\tt1\t{len}\t0\t{len}\t{len}\t{len}\t255"
        );
        let fields: Vec<&str> = line.split('\t').collect();
        let mut overlap = Overlap::from_paf(&fields).unwrap();
        overlap.transmute(store).unwrap();
        overlap
    }

    #[test]
    fn test_transmute_and_validity() {
        let store = store_with(b"ACGTACGTACGTACGT", b"ACGTACGTACGTACGT");
        let overlap = identity_overlap(&store);
        assert!(overlap.is_valid());
        assert_eq!(overlap.q_id, 1);
        assert_eq!(overlap.t_id, 0);
        assert_eq!(overlap.length(), 16);
    }

    #[test]
    fn test_transmute_missing_name() {
        let store = store_with(b"ACGT", b"ACGT");
        let fields: Vec<&str> = "nope\t4\t0\t4\t+\tt1\t4\t0\t4\t4\t4\t255"
            .split('\t')
            .collect();
        let mut overlap = Overlap::from_paf(&fields).unwrap();
        assert!(matches!(
            overlap.transmute(&store),
            Err(PolishError::MissingSequence(_))
        ));
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let store = store_with(b"ACGT", b"ACGT");
        let fields: Vec<&str> = "q1\t4\t0\t9\t+\tt1\t4\t0\t4\t4\t4\t255"
            .split('\t')
            .collect();
        let mut overlap = Overlap::from_paf(&fields).unwrap();
        overlap.transmute(&store).unwrap();
        assert!(!overlap.is_valid());
    }

    #[test]
    fn test_mhap_reverse_coordinates() {
        let fields: Vec<&str> = "1 2 0.1 42 1 2 10 16 0 0 8 20"
            .split_whitespace()
            .collect();
        let overlap = Overlap::from_mhap(&fields).unwrap();
        assert_eq!(overlap.q_id, 0);
        assert_eq!(overlap.t_id, 1);
        assert!(overlap.strand);
        assert_eq!((overlap.q_begin, overlap.q_end), (6, 14));
        assert_eq!((overlap.t_begin, overlap.t_end), (0, 8));
    }

    #[test]
    fn test_breaking_points_identity_default_mode() {
        let store = store_with(b"ACGTACGTACGTACGT", b"ACGTACGTACGTACGT");
        let mut overlap = identity_overlap(&store);
        overlap.find_breaking_points(&store, 8, 0.0);
        assert_eq!(
            overlap.breaking_points,
            vec![(0, 0), (8, 8), (8, 8), (16, 16)]
        );
    }

    #[test]
    fn test_breaking_points_pairs_are_ordered() {
        let store = store_with(b"ACGTACGTACGTACGTACGT", b"ACGTACGTACGGACGTACGT");
        let mut overlap = identity_overlap(&store);
        overlap.find_breaking_points(&store, 6, 0.0);
        for pair in overlap.breaking_points.chunks_exact(2) {
            assert!(pair[1].0 > pair[0].0);
            assert!(pair[1].1 >= pair[0].1);
        }
        assert_eq!(overlap.breaking_points.first(), Some(&(0, 0)));
        assert_eq!(overlap.breaking_points.last(), Some(&(20, 20)));
    }

    #[test]
    fn test_breaking_points_overlap_mode_expands_spans() {
        let store = store_with(
            b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT",
            b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT",
        );
        let mut overlap = identity_overlap(&store);
        overlap.find_breaking_points(&store, 10, 0.25);
        // Spans: [0,12) [8,22) [18,32) [28,40).
        assert_eq!(
            overlap.breaking_points,
            vec![(0, 0), (12, 12), (8, 8), (22, 22), (18, 18), (32, 32), (28, 28), (40, 40)]
        );
    }

    #[test]
    fn test_breaking_points_reverse_strand() {
        let target = b"AACCGGTTAACCGGTT";
        let revcomp = crate::sequence::reverse_complement(target);
        let mut store = SequenceStore::new();
        store.add_target(Sequence::new("t1".into(), target.to_vec()));
        store
            .add_query(Sequence::new("q1".into(), revcomp))
            .unwrap();
        store.sequences_mut()[1].materialize(false, true, true);

        let line = "q1\t16\t0\t16\t-\tt1\t16\t0\t16\t16\t16\t255";
        let fields: Vec<&str> = line.split('\t').collect();
        let mut overlap = Overlap::from_paf(&fields).unwrap();
        overlap.transmute(&store).unwrap();
        overlap.find_breaking_points(&store, 8, 0.0);
        assert_eq!(
            overlap.breaking_points,
            vec![(0, 0), (8, 8), (8, 8), (16, 16)]
        );
    }
}
