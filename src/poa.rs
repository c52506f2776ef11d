//! Partial order alignment: a weighted DAG of aligned sequences, an
//! engine aligning new sequences against it, heaviest-bundle consensus and
//! multiple sequence alignment extraction.
//!
//! The graph stores one node per distinct base observed at an alignment
//! column; nodes observed at the same column are linked as an aligned
//! cluster. Edges carry the summed per-base weights of every sequence that
//! traversed them plus the sequence labels, which is what consensus and MSA
//! generation consume.

pub type NodeId = u32;

/// One column of a graph alignment: the matched node (`None` when the
/// sequence base is an insertion against the graph) and the sequence
/// position (`None` when the graph node is deleted from the sequence).
pub type Alignment = Vec<(Option<NodeId>, Option<usize>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentType {
    /// Global alignment of the sequence against one path of the graph.
    Nw,
    /// Ends-free alignment; unaligned sequence ends are attached by
    /// [`Graph::add_alignment`] as fresh branches.
    Ov,
}

#[derive(Debug, Clone)]
struct Edge {
    to: NodeId,
    labels: Vec<u32>,
    weight: i64,
}

#[derive(Debug, Clone)]
struct Node {
    base: u8,
    /// Backbone position this node is tied to; bounds subgraph extraction.
    anchor: u32,
    out_edges: Vec<Edge>,
    in_edges: Vec<NodeId>,
    aligned_nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    rank_to_node: Vec<NodeId>,
    rank_of: Vec<u32>,
    /// MSA column per node; aligned clusters share a column.
    column_of: Vec<u32>,
    num_columns: u32,
    begin_nodes: Vec<NodeId>,
    num_sequences: u32,
    consensus_nodes: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_sequences(&self) -> u32 {
        self.num_sequences
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.rank_to_node.clear();
        self.rank_of.clear();
        self.column_of.clear();
        self.num_columns = 0;
        self.begin_nodes.clear();
        self.num_sequences = 0;
        self.consensus_nodes.clear();
    }

    fn add_node(&mut self, base: u8, anchor: u32) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            base,
            anchor,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            aligned_nodes: Vec::new(),
        });
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, weight: i64, label: u32) {
        let node = &mut self.nodes[from as usize];
        if let Some(edge) = node.out_edges.iter_mut().find(|e| e.to == to) {
            edge.weight += weight;
            edge.labels.push(label);
            return;
        }
        node.out_edges.push(Edge {
            to,
            labels: vec![label],
            weight,
        });
        self.nodes[to as usize].in_edges.push(from);
    }

    /// Threads `seq` through the graph along `alignment`, reusing nodes with
    /// matching bases, branching into aligned clusters on mismatches and
    /// attaching unaligned sequence ends as fresh chains. An empty alignment
    /// inserts the whole sequence as a new path.
    pub fn add_alignment(&mut self, alignment: &Alignment, seq: &[u8], weights: &[u32]) {
        assert_eq!(
            seq.len(),
            weights.len(),
            "per-base weights must cover the sequence"
        );
        if seq.is_empty() {
            return;
        }
        let label = self.num_sequences;

        let first_pos = alignment
            .iter()
            .find_map(|&(_, pos)| pos)
            .unwrap_or(seq.len());
        let prefix_anchor = alignment
            .iter()
            .find_map(|&(node, pos)| if pos.is_some() { node } else { None })
            .map(|n| self.nodes[n as usize].anchor);

        let mut head: Option<NodeId> = None;
        let mut prev: Option<NodeId> = None;

        for i in 0..first_pos {
            let anchor = prefix_anchor.unwrap_or(i as u32);
            let cur = self.add_node(seq[i], anchor);
            self.link_nodes(&mut prev, &mut head, cur, i, weights, label);
        }

        let mut last_pos = first_pos;
        for &(node_id, pos) in alignment {
            let i = match pos {
                Some(i) => i,
                None => continue,
            };
            last_pos = i;
            let cur = match node_id {
                None => {
                    let anchor = prev
                        .map(|p| self.nodes[p as usize].anchor)
                        .unwrap_or(i as u32);
                    self.add_node(seq[i], anchor)
                }
                Some(n) => {
                    if self.nodes[n as usize].base == seq[i] {
                        n
                    } else if let Some(&m) = self.nodes[n as usize]
                        .aligned_nodes
                        .iter()
                        .find(|&&m| self.nodes[m as usize].base == seq[i])
                    {
                        m
                    } else {
                        let anchor = self.nodes[n as usize].anchor;
                        let m = self.add_node(seq[i], anchor);
                        let mut cluster = self.nodes[n as usize].aligned_nodes.clone();
                        cluster.push(n);
                        for &c in &cluster {
                            self.nodes[c as usize].aligned_nodes.push(m);
                        }
                        self.nodes[m as usize].aligned_nodes = cluster;
                        m
                    }
                }
            };
            self.link_nodes(&mut prev, &mut head, cur, i, weights, label);
        }

        let suffix_start = if first_pos == seq.len() {
            seq.len()
        } else {
            last_pos + 1
        };
        for i in suffix_start..seq.len() {
            let anchor = prev
                .map(|p| self.nodes[p as usize].anchor)
                .unwrap_or(i as u32);
            let cur = self.add_node(seq[i], anchor);
            self.link_nodes(&mut prev, &mut head, cur, i, weights, label);
        }

        self.begin_nodes
            .push(head.expect("non-empty sequence creates at least one node"));
        self.num_sequences += 1;
        self.topological_sort();
    }

    /// Chains the node just added for `pos` to its predecessor on the
    /// sequence path; the edge carries the summed weights of both bases.
    fn link_nodes(
        &mut self,
        prev: &mut Option<NodeId>,
        head: &mut Option<NodeId>,
        cur: NodeId,
        pos: usize,
        weights: &[u32],
        label: u32,
    ) {
        if let Some(p) = *prev {
            let w = weights[pos - 1] as i64 + weights[pos] as i64;
            self.add_edge(p, cur, w, label);
        }
        if head.is_none() {
            *head = Some(cur);
        }
        *prev = Some(cur);
    }

    /// Recomputes the rank order. Aligned clusters are kept contiguous so
    /// that the cluster index doubles as the MSA column.
    fn topological_sort(&mut self) {
        let n = self.nodes.len();
        let mut cluster_of = vec![u32::MAX; n];
        let mut clusters: Vec<Vec<NodeId>> = Vec::new();
        for id in 0..n {
            if cluster_of[id] != u32::MAX {
                continue;
            }
            let mut members = vec![id as NodeId];
            members.extend_from_slice(&self.nodes[id].aligned_nodes);
            members.sort_unstable();
            members.dedup();
            let c = clusters.len() as u32;
            for &m in &members {
                cluster_of[m as usize] = c;
            }
            clusters.push(members);
        }

        let mut indegree = vec![0u32; clusters.len()];
        for node in &self.nodes {
            for edge in &node.out_edges {
                indegree[cluster_of[edge.to as usize] as usize] += 1;
            }
        }

        let mut queue: std::collections::VecDeque<u32> = (0..clusters.len() as u32)
            .filter(|&c| indegree[c as usize] == 0)
            .collect();
        self.rank_to_node.clear();
        self.rank_of = vec![u32::MAX; n];
        self.column_of = vec![u32::MAX; n];
        self.num_columns = 0;
        while let Some(c) = queue.pop_front() {
            let column = self.num_columns;
            self.num_columns += 1;
            for &m in &clusters[c as usize] {
                self.rank_of[m as usize] = self.rank_to_node.len() as u32;
                self.column_of[m as usize] = column;
                self.rank_to_node.push(m);
                for edge in &self.nodes[m as usize].out_edges {
                    let tc = cluster_of[edge.to as usize] as usize;
                    indegree[tc] -= 1;
                    if indegree[tc] == 0 {
                        queue.push_back(tc as u32);
                    }
                }
            }
        }
        debug_assert_eq!(self.rank_to_node.len(), n, "graph must stay acyclic");
    }

    fn node_coverage(&self, id: NodeId) -> u32 {
        let mut labels: Vec<u32> = self.nodes[id as usize]
            .out_edges
            .iter()
            .flat_map(|e| e.labels.iter().copied())
            .collect();
        for &from in &self.nodes[id as usize].in_edges {
            if let Some(edge) = self.nodes[from as usize]
                .out_edges
                .iter()
                .find(|e| e.to == id)
            {
                labels.extend_from_slice(&edge.labels);
            }
        }
        labels.sort_unstable();
        labels.dedup();
        labels.len() as u32
    }

    /// Heaviest-bundle consensus: the maximum-weight source-to-sink path,
    /// with per-position coverage (distinct sequences touching the node).
    pub fn consensus(&mut self) -> (Vec<u8>, Vec<u32>) {
        self.consensus_nodes.clear();
        if self.nodes.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let n = self.nodes.len();
        let mut score = vec![0i64; n];
        let mut best_edge = vec![i64::MIN; n];
        let mut pred: Vec<Option<NodeId>> = vec![None; n];
        for &u in &self.rank_to_node {
            let u = u as usize;
            for e in &self.nodes[u].out_edges {
                let t = e.to as usize;
                let better = match pred[t] {
                    None => true,
                    Some(p) => {
                        e.weight > best_edge[t]
                            || (e.weight == best_edge[t] && score[u] > score[p as usize])
                    }
                };
                if better {
                    pred[t] = Some(u as NodeId);
                    best_edge[t] = e.weight;
                    score[t] = score[u] + e.weight;
                }
            }
        }

        // The bundle must reach a sink; ties keep the first sink in rank
        // order.
        let mut tail: Option<NodeId> = None;
        for &u in &self.rank_to_node {
            if !self.nodes[u as usize].out_edges.is_empty() {
                continue;
            }
            if tail.is_none() || score[u as usize] > score[tail.unwrap() as usize] {
                tail = Some(u);
            }
        }

        let mut node = tail;
        while let Some(u) = node {
            self.consensus_nodes.push(u);
            node = pred[u as usize];
        }
        self.consensus_nodes.reverse();

        let bases = self
            .consensus_nodes
            .iter()
            .map(|&u| self.nodes[u as usize].base)
            .collect();
        let coverages = self
            .consensus_nodes
            .iter()
            .map(|&u| self.node_coverage(u))
            .collect();
        (bases, coverages)
    }

    /// MSA column of every consensus position; valid after [`Graph::consensus`].
    pub fn consensus_columns(&self) -> Vec<usize> {
        self.consensus_nodes
            .iter()
            .map(|&u| self.column_of[u as usize] as usize)
            .collect()
    }

    /// One gap-padded row per added sequence, in insertion order.
    pub fn generate_msa(&self) -> Vec<Vec<u8>> {
        let cols = self.num_columns as usize;
        (0..self.num_sequences)
            .map(|s| {
                let mut row = vec![b'-'; cols];
                let mut node = self.begin_nodes[s as usize];
                loop {
                    row[self.column_of[node as usize] as usize] = self.nodes[node as usize].base;
                    match self.nodes[node as usize]
                        .out_edges
                        .iter()
                        .find(|e| e.labels.contains(&s))
                    {
                        Some(e) => node = e.to,
                        None => break,
                    }
                }
                row
            })
            .collect()
    }

    /// Extracts the nodes anchored inside the backbone range `[begin, end]`
    /// together with a subgraph-id to graph-id mapping. Edge labels are not
    /// carried over; the subgraph only serves alignment.
    pub fn subgraph(&self, begin: usize, end: usize) -> (Graph, Vec<NodeId>) {
        let mut mapping = Vec::new();
        let mut inv = vec![u32::MAX; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            if (begin..=end).contains(&(node.anchor as usize)) {
                inv[id] = mapping.len() as u32;
                mapping.push(id as NodeId);
            }
        }

        let mut sub = Graph::new();
        for &full_id in &mapping {
            let node = &self.nodes[full_id as usize];
            sub.nodes.push(Node {
                base: node.base,
                anchor: node.anchor,
                out_edges: node
                    .out_edges
                    .iter()
                    .filter(|e| inv[e.to as usize] != u32::MAX)
                    .map(|e| Edge {
                        to: inv[e.to as usize],
                        labels: Vec::new(),
                        weight: e.weight,
                    })
                    .collect(),
                in_edges: node
                    .in_edges
                    .iter()
                    .filter(|&&from| inv[from as usize] != u32::MAX)
                    .map(|&from| inv[from as usize])
                    .collect(),
                aligned_nodes: node
                    .aligned_nodes
                    .iter()
                    .filter(|&&m| inv[m as usize] != u32::MAX)
                    .map(|&m| inv[m as usize])
                    .collect(),
            });
        }
        sub.topological_sort();
        (sub, mapping)
    }

    /// Rewrites a subgraph alignment back onto full-graph node ids.
    pub fn update_alignment(alignment: Alignment, mapping: &[NodeId]) -> Alignment {
        alignment
            .into_iter()
            .map(|(node, pos)| (node.map(|n| mapping[n as usize]), pos))
            .collect()
    }
}

/// A reusable alignment engine. The DP matrix is retained between calls, so
/// an engine must not be shared between threads; the polishing pipeline
/// binds one engine per worker.
#[derive(Debug, Clone)]
pub struct AlignmentEngine {
    kind: AlignmentType,
    match_score: i8,
    mismatch: i8,
    gap: i8,
    matrix: Vec<i32>,
}

impl AlignmentEngine {
    pub fn new(kind: AlignmentType, match_score: i8, mismatch: i8, gap: i8) -> Self {
        AlignmentEngine {
            kind,
            match_score,
            mismatch,
            gap,
            matrix: Vec::new(),
        }
    }

    /// Reserves the DP matrix for sequences up to `max_len` against graphs
    /// of comparable size.
    pub fn prealloc(&mut self, max_len: usize) {
        let dim = max_len + max_len / 4 + 1;
        self.matrix.reserve(dim.saturating_mul(dim));
    }

    fn score(&self, a: u8, b: u8) -> i32 {
        if a == b {
            self.match_score as i32
        } else {
            self.mismatch as i32
        }
    }

    /// Aligns `seq` against the graph and returns the alignment columns over
    /// the matched span. Leading and trailing unaligned sequence positions
    /// are left for [`Graph::add_alignment`] to attach.
    pub fn align(&mut self, seq: &[u8], graph: &Graph) -> Alignment {
        if seq.is_empty() || graph.is_empty() {
            return Vec::new();
        }
        let n = graph.rank_to_node.len();
        let m = seq.len();
        let width = m + 1;
        let gap = self.gap as i32;
        self.matrix.clear();
        self.matrix.resize((n + 1) * width, 0);

        for j in 0..=m {
            self.matrix[j] = match self.kind {
                AlignmentType::Nw => gap * j as i32,
                AlignmentType::Ov => 0,
            };
        }
        for r in 0..n {
            let u = graph.rank_to_node[r] as usize;
            let node = &graph.nodes[u];
            let row = (r + 1) * width;

            let pred_rows: Vec<usize> = if node.in_edges.is_empty() {
                vec![0]
            } else {
                node.in_edges
                    .iter()
                    .map(|&p| (graph.rank_of[p as usize] + 1) as usize)
                    .collect()
            };

            self.matrix[row] = match self.kind {
                AlignmentType::Nw => {
                    pred_rows
                        .iter()
                        .map(|&p| self.matrix[p * width])
                        .max()
                        .unwrap()
                        + gap
                }
                AlignmentType::Ov => 0,
            };
            for j in 1..=m {
                let s = self.score(node.base, seq[j - 1]);
                let mut best = i32::MIN;
                for &p in &pred_rows {
                    best = best.max(self.matrix[p * width + j - 1] + s);
                    best = best.max(self.matrix[p * width + j] + gap);
                }
                best = best.max(self.matrix[row + j - 1] + gap);
                self.matrix[row + j] = best;
            }
        }

        let (mut best_r, mut best_j) = (0usize, m);
        let mut best = i32::MIN;
        for r in 1..=n {
            let u = graph.rank_to_node[r - 1] as usize;
            let is_sink = graph.nodes[u].out_edges.is_empty();
            match self.kind {
                AlignmentType::Nw => {
                    if is_sink && self.matrix[r * width + m] > best {
                        best = self.matrix[r * width + m];
                        best_r = r;
                        best_j = m;
                    }
                }
                AlignmentType::Ov => {
                    if self.matrix[r * width + m] > best {
                        best = self.matrix[r * width + m];
                        best_r = r;
                        best_j = m;
                    }
                    if is_sink {
                        for j in 0..=m {
                            if self.matrix[r * width + j] > best {
                                best = self.matrix[r * width + j];
                                best_r = r;
                                best_j = j;
                            }
                        }
                    }
                }
            }
        }

        let mut alignment = Vec::new();
        let (mut r, mut j) = (best_r, best_j);
        while r > 0 && j > 0 {
            let u = graph.rank_to_node[r - 1];
            let node = &graph.nodes[u as usize];
            let cur = self.matrix[r * width + j];
            let pred_rows: Vec<usize> = if node.in_edges.is_empty() {
                vec![0]
            } else {
                node.in_edges
                    .iter()
                    .map(|&p| (graph.rank_of[p as usize] + 1) as usize)
                    .collect()
            };

            if cur == self.matrix[r * width + j - 1] + gap {
                alignment.push((None, Some(j - 1)));
                j -= 1;
                continue;
            }
            let s = self.score(node.base, seq[j - 1]);
            let mut moved = false;
            for &p in &pred_rows {
                if cur == self.matrix[p * width + j - 1] + s {
                    alignment.push((Some(u), Some(j - 1)));
                    r = p;
                    j -= 1;
                    moved = true;
                    break;
                }
            }
            if !moved {
                for &p in &pred_rows {
                    if cur == self.matrix[p * width + j] + gap {
                        alignment.push((Some(u), None));
                        r = p;
                        moved = true;
                        break;
                    }
                }
            }
            assert!(moved, "inconsistent alignment traceback");
        }
        alignment.reverse();
        alignment
    }
}
