//! Owning store for target and query sequences.
//!
//! Targets are loaded first and occupy ids `0..num_targets`; queries follow.
//! A query whose name matches a target is elided: its record is dropped and
//! both its name and its raw file index resolve to the target id. Lookups
//! are side-tagged so a target and an unrelated query may share a name
//! without ambiguity.

use crate::error::PolishError;
use crate::sequence::Sequence;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Target,
    Query,
}

fn name_key(name: &str, side: Side) -> String {
    let mut key = String::with_capacity(name.len() + 1);
    key.push_str(name);
    key.push(match side {
        Side::Target => 't',
        Side::Query => 'q',
    });
    key
}

fn raw_key(index: u64, side: Side) -> u64 {
    index << 1 | matches!(side, Side::Target) as u64
}

#[derive(Debug, Default)]
pub struct SequenceStore {
    sequences: Vec<Sequence>,
    num_targets: usize,
    name_to_id: FxHashMap<String, u64>,
    raw_to_id: FxHashMap<u64, u64>,
    num_query_records: u64,
}

impl SequenceStore {
    pub fn new() -> Self {
        SequenceStore::default()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.num_targets
    }

    /// Number of query records seen in the input, elided duplicates included.
    pub fn query_records(&self) -> u64 {
        self.num_query_records
    }

    pub fn get(&self, id: u64) -> &Sequence {
        &self.sequences[id as usize]
    }

    pub fn sequences_mut(&mut self) -> &mut [Sequence] {
        &mut self.sequences
    }

    pub fn add_target(&mut self, sequence: Sequence) {
        assert_eq!(
            self.num_query_records, 0,
            "targets must be loaded before queries"
        );
        let id = self.sequences.len() as u64;
        self.name_to_id.insert(name_key(&sequence.name, Side::Target), id);
        self.raw_to_id.insert(raw_key(id, Side::Target), id);
        self.sequences.push(sequence);
        self.num_targets += 1;
    }

    /// Adds a query record, eliding it onto the target of the same name. An
    /// elided record must match the target's data and quality lengths.
    pub fn add_query(&mut self, sequence: Sequence) -> Result<(), PolishError> {
        let raw = self.num_query_records;
        self.num_query_records += 1;

        if let Some(&target_id) = self.name_to_id.get(&name_key(&sequence.name, Side::Target)) {
            let target = &self.sequences[target_id as usize];
            if target.data.len() != sequence.data.len()
                || target.quality.len() != sequence.quality.len()
            {
                return Err(PolishError::DuplicateSequence(sequence.name));
            }
            self.name_to_id
                .insert(name_key(&sequence.name, Side::Query), target_id);
            self.raw_to_id.insert(raw_key(raw, Side::Query), target_id);
            return Ok(());
        }

        let id = self.sequences.len() as u64;
        self.name_to_id
            .insert(name_key(&sequence.name, Side::Query), id);
        self.raw_to_id.insert(raw_key(raw, Side::Query), id);
        self.sequences.push(sequence);
        Ok(())
    }

    pub fn lookup_name(&self, side: Side, name: &str) -> Option<u64> {
        self.name_to_id.get(&name_key(name, side)).copied()
    }

    pub fn lookup_raw(&self, side: Side, index: u64) -> Option<u64> {
        self.raw_to_id.get(&raw_key(index, side)).copied()
    }

    /// Drops the lookup tables once every overlap has been rewritten.
    pub fn release_maps(&mut self) {
        std::mem::take(&mut self.name_to_id);
        std::mem::take(&mut self.raw_to_id);
    }
}
