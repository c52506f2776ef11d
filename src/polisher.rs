//! The polishing pipeline: sequence loading, overlap normalization, window
//! construction, layer assignment, parallel consensus and stitching.

use crate::error::PolishError;
use crate::formats::{OverlapSource, SequenceSource};
use crate::overlap::Overlap;
use crate::poa::{AlignmentEngine, AlignmentType, Graph};
use crate::sequence::Sequence;
use crate::stitch::{merge_consensus_pair, StitchSide};
use crate::store::SequenceStore;
use crate::window::{Layer, Window, WindowType};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Mutex;

/// Streamed chunk budget for query and overlap parsing, ~1 GiB.
const CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// A fragment shorter than this fraction of the window length is skipped.
const MIN_FRAGMENT_FRACTION: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolisherType {
    /// Contig polishing: only the longest overlap per query survives.
    Contig,
    /// Fragment correction: every overlap is kept, outputs carry an `r` tag.
    Fragment,
}

pub struct Polisher {
    query_source: SequenceSource,
    overlap_source: OverlapSource,
    target_source: SequenceSource,
    kind: PolisherType,
    window_length: u32,
    overlap_percentage: f64,
    quality_threshold: f64,
    error_threshold: f64,
    trim: bool,
    pool: rayon::ThreadPool,
    engines: Vec<Mutex<AlignmentEngine>>,
    store: SequenceStore,
    windows: Vec<Window>,
    id_to_first_window: Vec<u64>,
    targets_coverages: Vec<u32>,
}

impl Polisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequences_path: &str,
        overlaps_path: &str,
        target_path: &str,
        kind: PolisherType,
        window_length: u32,
        overlap_percentage: f64,
        quality_threshold: f64,
        error_threshold: f64,
        trim: bool,
        match_score: i8,
        mismatch: i8,
        gap: i8,
        num_threads: usize,
    ) -> Result<Self, PolishError> {
        if window_length == 0 {
            return Err(PolishError::InvalidWindowLength);
        }
        if !(0.0..0.5).contains(&overlap_percentage) {
            return Err(PolishError::InvalidOverlapPercentage(overlap_percentage));
        }
        let num_threads = num_threads.max(1);

        let query_source = SequenceSource::open(sequences_path)?;
        let overlap_source = OverlapSource::open(overlaps_path)?;
        let target_source = SequenceSource::open(target_path)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| PolishError::Parse(format!("failed to build thread pool: {}", e)))?;

        // One preallocated engine per worker; workers index this table by
        // their pool thread index.
        let engines = (0..num_threads)
            .map(|_| {
                let mut engine =
                    AlignmentEngine::new(AlignmentType::Nw, match_score, mismatch, gap);
                engine.prealloc(window_length as usize);
                Mutex::new(engine)
            })
            .collect();

        Ok(Polisher {
            query_source,
            overlap_source,
            target_source,
            kind,
            window_length,
            overlap_percentage,
            quality_threshold,
            error_threshold,
            trim,
            pool,
            engines,
            store: SequenceStore::new(),
            windows: Vec::new(),
            id_to_first_window: Vec::new(),
            targets_coverages: Vec::new(),
        })
    }

    /// Loads sequences and overlaps, normalizes and filters the overlaps,
    /// recovers breaking points and distributes query fragments into
    /// windows.
    pub fn initialize(&mut self) -> Result<(), PolishError> {
        if !self.windows.is_empty() {
            warn!("[burnish::Polisher::initialize] object already initialized");
            return Ok(());
        }

        self.target_source.reset();
        let mut targets = Vec::new();
        self.target_source.parse(&mut targets, u64::MAX)?;
        for target in targets {
            self.store.add_target(target);
        }
        let num_targets = self.store.target_count();
        if num_targets == 0 {
            return Err(PolishError::EmptyTargetSet);
        }
        info!("loaded {} target sequences", num_targets);

        let mut total_query_length: u64 = 0;
        self.query_source.reset();
        loop {
            let mut chunk = Vec::new();
            let more = self.query_source.parse(&mut chunk, CHUNK_SIZE)?;
            for sequence in chunk {
                total_query_length += sequence.len() as u64;
                self.store.add_query(sequence)?;
            }
            if !more {
                break;
            }
        }
        let num_queries = self.store.query_records();
        if num_queries == 0 {
            return Err(PolishError::EmptySequenceSet);
        }
        let window_kind = if total_query_length / num_queries <= 1000 {
            WindowType::Ngs
        } else {
            WindowType::Tgs
        };
        info!("loaded {} query sequences", num_queries);

        let overlaps = self.load_overlaps()?;
        info!("loaded {} overlaps", overlaps.len());

        self.materialize_strands(&overlaps, num_targets);
        self.find_breaking_points(overlaps, window_kind)
    }

    /// Streams, rewrites and filters overlap records. Records arrive grouped
    /// by query; each group is flushed when the next query id appears, which
    /// is where contig mode drops all but the longest overlap of the group.
    fn load_overlaps(&mut self) -> Result<Vec<Overlap>, PolishError> {
        let mut overlaps: Vec<Overlap> = Vec::new();
        let mut run: Vec<Overlap> = Vec::new();
        let mut invalid: u64 = 0;

        self.overlap_source.reset();
        loop {
            let mut chunk = Vec::new();
            let more = self.overlap_source.parse(&mut chunk, CHUNK_SIZE)?;
            for mut overlap in chunk {
                overlap.transmute(&self.store)?;
                if !overlap.is_valid() {
                    invalid += 1;
                    continue;
                }
                if run.last().is_some_and(|prev| prev.q_id != overlap.q_id) {
                    self.flush_run(&mut run, &mut overlaps);
                }
                run.push(overlap);
            }
            if !more {
                break;
            }
        }
        self.flush_run(&mut run, &mut overlaps);
        self.store.release_maps();

        if overlaps.is_empty() {
            return Err(PolishError::EmptyOverlapSet);
        }
        debug!("{} structurally invalid overlaps dropped", invalid);
        Ok(overlaps)
    }

    fn flush_run(&self, run: &mut Vec<Overlap>, overlaps: &mut Vec<Overlap>) {
        let survivors = run
            .drain(..)
            .filter(|o| o.error <= self.error_threshold && o.q_id != o.t_id);
        match self.kind {
            PolisherType::Fragment => overlaps.extend(survivors),
            PolisherType::Contig => {
                let mut keep: Option<Overlap> = None;
                for overlap in survivors {
                    keep = Some(match keep.take() {
                        None => overlap,
                        Some(best) => {
                            if best.length() > overlap.length() {
                                best
                            } else {
                                overlap
                            }
                        }
                    });
                }
                overlaps.extend(keep);
            }
        }
    }

    /// Builds reverse strands, in parallel, for exactly the sequences some
    /// surviving overlap references reverse-complemented; forward data of
    /// unreferenced queries is released.
    fn materialize_strands(&mut self, overlaps: &[Overlap], num_targets: usize) {
        let mut has_forward = vec![false; self.store.len()];
        let mut has_reverse = vec![false; self.store.len()];
        for overlap in overlaps {
            if overlap.strand {
                has_reverse[overlap.q_id as usize] = true;
            } else {
                has_forward[overlap.q_id as usize] = true;
            }
        }

        let store = &mut self.store;
        self.pool.install(|| {
            store
                .sequences_mut()
                .par_iter_mut()
                .enumerate()
                .for_each(|(id, sequence)| {
                    let is_target = id < num_targets;
                    sequence.materialize(
                        is_target,
                        is_target || has_forward[id],
                        has_reverse[id],
                    );
                })
        });
    }

    /// Runs the per-overlap breaking-point alignment in parallel, then lays
    /// the windows over each target and deposits fragments into them.
    fn find_breaking_points(
        &mut self,
        mut overlaps: Vec<Overlap>,
        window_kind: WindowType,
    ) -> Result<(), PolishError> {
        let window_length = self.window_length;
        let overlap_percentage = self.overlap_percentage;
        {
            let store = &self.store;
            self.pool.install(|| {
                overlaps.par_iter_mut().for_each(|overlap| {
                    overlap.find_breaking_points(store, window_length, overlap_percentage)
                })
            });
        }
        info!("aligned overlaps");

        let num_targets = self.store.target_count();
        let offset = (window_length as f64 * overlap_percentage) as u32;
        self.id_to_first_window = vec![0u64; num_targets + 1];
        for id in 0..num_targets {
            let target_length = self.store.get(id as u64).len() as u32;
            let mut rank = 0u32;
            let mut position = 0u32;
            while position < target_length {
                let (mut start, mut expansion) = (position, offset);
                if position > 0 {
                    start -= offset;
                    expansion += offset;
                }
                let length = (start + window_length + expansion).min(target_length) - start;
                self.windows.push(Window::new(
                    id as u64,
                    rank,
                    window_kind,
                    overlap_percentage != 0.0,
                    start,
                    length,
                ));
                position += window_length;
                rank += 1;
            }
            self.id_to_first_window[id + 1] = self.id_to_first_window[id] + rank as u64;
        }

        self.targets_coverages = vec![0; num_targets];
        let mut low_quality_skips: u64 = 0;
        for overlap in overlaps.drain(..) {
            self.targets_coverages[overlap.t_id as usize] += 1;
            self.assign_layers(&overlap, offset, &mut low_quality_skips);
        }
        debug!("{} fragments skipped for low quality", low_quality_skips);
        info!("transformed data into windows");
        Ok(())
    }

    /// Walks an overlap's breaking points two by two and adds one layer per
    /// fragment. A fragment rejected for low average quality still advances
    /// the previous-window state so the boundary heuristic stays coherent
    /// for the following fragment.
    fn assign_layers(&mut self, overlap: &Overlap, offset: u32, low_quality_skips: &mut u64) {
        let window_length = self.window_length as u64;
        let first_window = self.id_to_first_window[overlap.t_id as usize];
        let sequence = self.store.get(overlap.q_id);
        let has_quality = sequence.has_quality() || !sequence.reverse_quality.is_empty();
        let base_offset = if overlap.strand {
            overlap.q_length - overlap.q_end
        } else {
            overlap.q_begin
        };

        let points = &overlap.breaking_points;
        let mut prev_window: Option<u64> = None;
        for j in (0..points.len()).step_by(2) {
            let (t1, q1) = points[j];
            let (t2, q2) = points[j + 1];
            if ((q2 - q1) as f64) < MIN_FRAGMENT_FRACTION * self.window_length as f64 {
                continue;
            }

            if has_quality {
                let quality = if overlap.strand {
                    &sequence.reverse_quality
                } else {
                    &sequence.quality
                };
                let lo = (base_offset + q1) as usize;
                let hi = (base_offset + q2) as usize;
                let sum: u64 = quality[lo..hi]
                    .iter()
                    .map(|&q| q.saturating_sub(33) as u64)
                    .sum();
                let average = sum as f64 / (q2 - q1) as f64;
                if average < self.quality_threshold {
                    *low_quality_skips += 1;
                    prev_window = Some(adjusted_window_id(
                        first_window,
                        points,
                        j,
                        window_length,
                        offset as u64,
                        prev_window,
                    ));
                    continue;
                }
            }

            let window_id = adjusted_window_id(
                first_window,
                points,
                j,
                window_length,
                offset as u64,
                prev_window,
            );
            prev_window = Some(window_id);

            let mut window_start = ((window_id - first_window) as u32) * self.window_length;
            if window_start > 0 {
                window_start -= offset;
            }
            let layer_quality = if overlap.strand {
                !sequence.reverse_quality.is_empty()
            } else {
                !sequence.quality.is_empty()
            };
            self.windows[window_id as usize].add_layer(Layer {
                query_id: overlap.q_id,
                offset: base_offset + q1,
                length: q2 - q1,
                strand: overlap.strand,
                has_quality: layer_quality,
                begin: t1 - window_start,
                end: t2 - window_start - 1,
            });
        }
    }

    /// Polishes every window in parallel and stitches the results back into
    /// one sequence per target.
    pub fn polish(&mut self, drop_unpolished_sequences: bool) -> Result<Vec<Sequence>, PolishError> {
        let trim = if self.overlap_percentage == 0.0 {
            self.trim
        } else {
            false
        };
        let results: Vec<bool> = {
            let store = &self.store;
            let engines = &self.engines;
            let windows = &mut self.windows;
            self.pool.install(|| {
                windows
                    .par_iter_mut()
                    .map(|window| {
                        let thread_id = rayon::current_thread_index().unwrap_or_else(|| {
                            panic!("[burnish::Polisher::polish] error: thread identifier not present")
                        });
                        let mut engine = engines[thread_id].lock().unwrap();
                        window.generate_consensus(&mut engine, store, trim)
                    })
                    .collect()
            })
        };

        let mut dst = Vec::new();
        let mut polished_data: Vec<u8> = Vec::new();
        let mut num_polished: u32 = 0;

        if self.overlap_percentage == 0.0 {
            info!("default mode");
            for i in 0..self.windows.len() {
                num_polished += results[i] as u32;
                let consensus = std::mem::take(&mut self.windows[i].consensus);
                polished_data.extend_from_slice(&consensus);
                if i == self.windows.len() - 1 || self.windows[i + 1].rank == 0 {
                    self.emit(
                        &mut dst,
                        i,
                        &mut polished_data,
                        &mut num_polished,
                        drop_unpolished_sequences,
                    );
                }
            }
        } else {
            info!("overlap mode");
            let total_overlap = 2.0 * self.overlap_percentage;
            let mut overlap_engine = AlignmentEngine::new(AlignmentType::Ov, 3, -5, -6);
            overlap_engine.prealloc(
                ((1.0 + total_overlap) * self.window_length as f64 * total_overlap * 1.2) as usize,
            );
            let mut graph = Graph::new();

            for i in 0..self.windows.len() {
                num_polished += results[i] as u32;
                let is_final =
                    i == self.windows.len() - 1 || self.windows[i + 1].rank == 0;

                if self.windows[i].rank == 0 {
                    let consensus = &self.windows[i].consensus;
                    let head = (consensus.len() as f64 - total_overlap * consensus.len() as f64)
                        as usize;
                    polished_data.extend_from_slice(&consensus[..head]);
                } else {
                    let left = &self.windows[i - 1];
                    let right = &self.windows[i];
                    let len_l = (left.consensus.len() as f64 * total_overlap) as usize;
                    let start_l = left.consensus.len() - len_l;
                    // The final pair aligns against the whole right window.
                    let len_r = if is_final {
                        right.consensus.len()
                    } else {
                        (right.consensus.len() as f64 * total_overlap) as usize
                    };

                    let junction = merge_consensus_pair(
                        &mut overlap_engine,
                        &mut graph,
                        &StitchSide {
                            consensus: &left.consensus,
                            summary: &left.summary,
                            coder: &left.coder,
                        },
                        &StitchSide {
                            consensus: &right.consensus,
                            summary: &right.summary,
                            coder: &right.coder,
                        },
                        start_l,
                        len_l,
                        len_r,
                    );
                    polished_data.extend_from_slice(&junction);

                    let right_full = right.consensus.len();
                    let body_end = if right_full >= 2 * len_r {
                        right_full - len_r
                    } else {
                        right_full
                    };
                    polished_data.extend_from_slice(&self.windows[i].consensus[len_r..body_end]);

                    let left = &mut self.windows[i - 1];
                    std::mem::take(&mut left.consensus);
                    std::mem::take(&mut left.summary);
                }

                if is_final {
                    let consensus = &self.windows[i].consensus;
                    let tail_start = (consensus.len() as f64
                        - consensus.len() as f64 * total_overlap)
                        as usize;
                    polished_data.extend_from_slice(&consensus[tail_start..]);
                    self.emit(
                        &mut dst,
                        i,
                        &mut polished_data,
                        &mut num_polished,
                        drop_unpolished_sequences,
                    );
                    let window = &mut self.windows[i];
                    std::mem::take(&mut window.consensus);
                    std::mem::take(&mut window.summary);
                }
            }
        }

        self.windows.clear();
        info!("generated consensus");
        Ok(dst)
    }

    fn emit(
        &self,
        dst: &mut Vec<Sequence>,
        window_index: usize,
        polished_data: &mut Vec<u8>,
        num_polished: &mut u32,
        drop_unpolished_sequences: bool,
    ) {
        let window = &self.windows[window_index];
        let polished_ratio = *num_polished as f64 / (window.rank + 1) as f64;
        if !drop_unpolished_sequences || polished_ratio > 0.0 {
            let tag = match self.kind {
                PolisherType::Fragment => "r",
                PolisherType::Contig => "",
            };
            let name = format!(
                "{}{} LN:i:{} RC:i:{} XC:f:{:.6}",
                self.store.get(window.id).name,
                tag,
                polished_data.len(),
                self.targets_coverages[window.id as usize],
                polished_ratio
            );
            dst.push(Sequence::new(name, std::mem::take(polished_data)));
        } else {
            polished_data.clear();
        }
        *num_polished = 0;
    }
}

/// Maps a fragment onto its window, adjusting for the three boundary cases:
/// a fragment spanning two boundaries belongs to the middle window, a
/// fragment colliding with the previous assignment shifts right, and a
/// fragment starting inside the left expansion zone with a duplicated start
/// shifts left.
fn adjusted_window_id(
    first_window: u64,
    points: &[(u32, u32)],
    j: usize,
    window_length: u64,
    offset: u64,
    prev_window: Option<u64>,
) -> u64 {
    let t1 = points[j].0 as u64;
    let t2 = points[j + 1].0 as u64;
    let bpw1 = t1 / window_length;
    let bpw2 = t2 / window_length;
    let mut window_id = first_window + bpw1;
    if bpw2 - bpw1 > 1 {
        window_id += 1;
    } else if Some(window_id) == prev_window {
        window_id += 1;
    } else if t1 < bpw1 * window_length + offset
        && j + 2 < points.len()
        && points[j + 2].0 as u64 == t1
    {
        window_id -= 1;
    }
    window_id
}
