//! Fixed-stride windows over a target, their query layers and the per-window
//! POA consensus.
//!
//! Windows and layers hold descriptors into the sequence store instead of
//! borrowed slices; the bytes are resolved right before they are handed to
//! the alignment engine. The store outlives every window.

use crate::poa::{AlignmentEngine, Graph};
use crate::store::SequenceStore;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// Short reads; consensus ends are kept as-is.
    Ngs,
    /// Long reads; unsupported consensus ends may be trimmed.
    Tgs,
}

pub const SUMMARY_ROWS: usize = 5;
pub const GAP_ROW: usize = SUMMARY_ROWS - 1;

/// Maps a base byte to its summary row, -1 for anything uncounted.
pub type BaseCoder = [i32; 256];

fn new_coder() -> BaseCoder {
    let mut coder = [-1i32; 256];
    for (row, bases) in [b"Aa", b"Cc", b"Gg", b"Tt"].iter().enumerate() {
        for &b in bases.iter() {
            coder[b as usize] = row as i32;
        }
    }
    coder
}

/// A query fragment deposited on a window: byte range into the query's
/// forward or reverse strand plus its begin/end anchors on the backbone.
/// The fragment length may differ from `end - begin + 1`; the difference
/// expresses an indel against the backbone.
#[derive(Debug, Clone)]
pub struct Layer {
    pub query_id: u64,
    pub offset: u32,
    pub length: u32,
    pub strand: bool,
    pub has_quality: bool,
    pub begin: u32,
    pub end: u32,
}

#[derive(Debug)]
pub struct Window {
    /// Target id this window belongs to.
    pub id: u64,
    /// Window index along the target.
    pub rank: u32,
    kind: WindowType,
    overlap: bool,
    start: u32,
    length: u32,
    layers: Vec<Layer>,
    pub consensus: Vec<u8>,
    /// Per-base counts (SUMMARY_ROWS x consensus length), filled in overlap
    /// mode after a successful consensus.
    pub summary: Vec<u32>,
    pub coder: BaseCoder,
}

impl Window {
    pub fn new(id: u64, rank: u32, kind: WindowType, overlap: bool, start: u32, length: u32) -> Self {
        Window {
            id,
            rank,
            kind,
            overlap,
            start,
            length,
            layers: Vec::new(),
            consensus: Vec::new(),
            summary: Vec::new(),
            coder: [-1; 256],
        }
    }

    pub fn backbone_length(&self) -> u32 {
        self.length
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn add_layer(&mut self, layer: Layer) {
        if layer.length == 0 || layer.begin == layer.end {
            return;
        }
        if layer.begin > layer.end || layer.end >= self.length {
            panic!(
                "[burnish::Window::add_layer] error: invalid layer boundaries ({}, {}) in window of length {}",
                layer.begin, layer.end, self.length
            );
        }
        self.layers.push(layer);
    }

    /// Builds the POA graph from the backbone and all layers and extracts
    /// the consensus. Returns true iff the window was actually polished.
    pub fn generate_consensus(
        &mut self,
        engine: &mut AlignmentEngine,
        store: &SequenceStore,
        trim: bool,
    ) -> bool {
        let target = store.get(self.id);
        let begin = self.start as usize;
        let end = begin + self.length as usize;
        let backbone = &target.data[begin..end];

        if self.layers.is_empty() {
            self.consensus = backbone.to_vec();
            return false;
        }

        // Backbone weights come from the target quality, '!' filler if none.
        let backbone_weights: Vec<u32> = if target.has_quality() {
            target.quality[begin..end]
                .iter()
                .map(|&q| q.saturating_sub(33) as u32)
                .collect()
        } else {
            vec![0; backbone.len()]
        };

        let mut graph = Graph::new();
        graph.add_alignment(&Vec::new(), backbone, &backbone_weights);

        self.layers.sort_by_key(|layer| layer.begin);
        let num_layers = self.layers.len();
        let backbone_length = self.length;
        let margin = backbone_length / 100;
        for layer in self.layers.drain(..) {
            let query = store.get(layer.query_id);
            let lo = layer.offset as usize;
            let hi = lo + layer.length as usize;
            let seq = if layer.strand {
                &query.reverse_complement[lo..hi]
            } else {
                &query.data[lo..hi]
            };
            let weights: Vec<u32> = if layer.has_quality {
                let quality = if layer.strand {
                    &query.reverse_quality
                } else {
                    &query.quality
                };
                quality[lo..hi]
                    .iter()
                    .map(|&q| q.saturating_sub(33) as u32)
                    .collect()
            } else {
                vec![1; seq.len()]
            };

            let spans_whole = layer.begin < margin && layer.end > backbone_length - margin - 1;
            let alignment = if spans_whole {
                engine.align(seq, &graph)
            } else {
                let (subgraph, mapping) =
                    graph.subgraph(layer.begin as usize, layer.end as usize);
                let alignment = engine.align(seq, &subgraph);
                Graph::update_alignment(alignment, &mapping)
            };
            graph.add_alignment(&alignment, seq, &weights);
        }

        let (mut consensus, coverages) = graph.consensus();
        if trim && self.kind == WindowType::Tgs {
            let average_coverage = num_layers as u32 / 2;
            let first = (0..coverages.len()).find(|&i| coverages[i] >= average_coverage);
            let last = (0..coverages.len()).rev().find(|&i| coverages[i] >= average_coverage);
            match (first, last) {
                (Some(first), Some(last)) if first < last => {
                    consensus = consensus[first..=last].to_vec();
                }
                _ => {
                    warn!(
                        "[burnish::Window::generate_consensus] contig {} might be chimeric in window {}",
                        self.id, self.rank
                    );
                }
            }
        }

        if self.overlap {
            self.build_summary(&graph, consensus.len());
        }
        self.consensus = consensus;
        true
    }

    /// Per consensus column, how many sequences put each base (or an
    /// internal gap) there. Drives the column voting of the stitcher.
    fn build_summary(&mut self, graph: &Graph, consensus_len: usize) {
        self.coder = new_coder();
        self.summary = vec![0u32; SUMMARY_ROWS * consensus_len];
        let msa = graph.generate_msa();
        let columns = graph.consensus_columns();
        debug_assert_eq!(columns.len(), consensus_len);

        for row in &msa {
            let first = row.iter().position(|&c| c != b'-');
            let last = row.iter().rposition(|&c| c != b'-');
            let (first, last) = match (first, last) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };
            for (position, &column) in columns.iter().enumerate() {
                let base = row[column];
                if base == b'-' {
                    if column > first && column < last {
                        self.summary[GAP_ROW * consensus_len + position] += 1;
                    }
                } else {
                    let coded = self.coder[base as usize];
                    if coded >= 0 {
                        self.summary[coded as usize * consensus_len + position] += 1;
                    }
                }
            }
        }
    }
}
