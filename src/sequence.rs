//! Nucleotide sequences with lazily materialized reverse strands.

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&base| match base {
            b'A' | b'a' => b'T',
            b'T' | b't' => b'A',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            b'N' | b'n' => b'N',
            _ => base,
        })
        .collect()
}

/// A named nucleotide sequence with optional Phred+33 quality. The reverse
/// strings stay empty until [`Sequence::materialize`] is called for ids that
/// are actually referenced by surviving overlaps.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub name: String,
    pub data: Vec<u8>,
    pub quality: Vec<u8>,
    pub reverse_complement: Vec<u8>,
    pub reverse_quality: Vec<u8>,
}

impl Sequence {
    pub fn new(name: String, data: Vec<u8>) -> Self {
        Sequence {
            name,
            data,
            ..Default::default()
        }
    }

    pub fn with_quality(name: String, data: Vec<u8>, quality: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), quality.len());
        Sequence {
            name,
            data,
            quality,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_quality(&self) -> bool {
        !self.quality.is_empty()
    }

    /// Creates the reverse strings if `need_reverse` is set and releases the
    /// parts of the record nothing references anymore. The forward data must
    /// still be present when the reverse strand is requested.
    pub fn materialize(&mut self, keep_name: bool, keep_forward: bool, need_reverse: bool) {
        if need_reverse {
            self.reverse_complement = reverse_complement(&self.data);
            if !self.quality.is_empty() {
                self.reverse_quality = self.quality.iter().rev().copied().collect();
            }
        }
        if !keep_name {
            std::mem::take(&mut self.name);
        }
        if !keep_forward {
            std::mem::take(&mut self.data);
            std::mem::take(&mut self.quality);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(reverse_complement(b"AACN"), b"NGTT".to_vec());
        assert_eq!(reverse_complement(b"acgt"), b"ACGT".to_vec());
    }

    #[test]
    fn test_materialize_reverse() {
        let mut seq = Sequence::with_quality("read".into(), b"AACG".to_vec(), b"!!+5".to_vec());
        seq.materialize(true, true, true);
        assert_eq!(seq.reverse_complement, b"CGTT");
        assert_eq!(seq.reverse_quality, b"5+!!");
        assert_eq!(seq.data, b"AACG");
    }

    #[test]
    fn test_materialize_release() {
        let mut seq = Sequence::new("read".into(), b"AACG".to_vec());
        seq.materialize(false, false, true);
        assert!(seq.name.is_empty());
        assert!(seq.data.is_empty());
        assert_eq!(seq.reverse_complement, b"CGTT");
    }
}
