//! Streaming record sources.
//!
//! Both source types offer `reset()` plus `parse(dst, byte_budget)`; parse
//! appends records until the budget is exhausted or the file ends and
//! returns whether more records remain. Plain and gzip-compressed files are
//! supported transparently.

use crate::error::PolishError;
use crate::overlap::Overlap;
use crate::sequence::Sequence;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

const SEQUENCE_EXTENSIONS: &str =
    ".fasta, .fasta.gz, .fna, .fna.gz, .fa, .fa.gz, .fastq, .fastq.gz, .fq, .fq.gz";
const OVERLAP_EXTENSIONS: &str = ".mhap, .mhap.gz, .paf, .paf.gz, .sam, .sam.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceFormat {
    Fasta,
    Fastq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlapFormat {
    Mhap,
    Paf,
    Sam,
}

fn open_reader(path: &PathBuf) -> std::io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_line(reader: &mut dyn BufRead) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// FASTA/FASTQ records from a (possibly gzipped) file.
pub struct SequenceSource {
    path: PathBuf,
    format: SequenceFormat,
    reader: Option<Box<dyn BufRead>>,
    pending_header: Option<String>,
}

impl SequenceSource {
    pub fn open(path: &str) -> Result<Self, PolishError> {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        let format = if [".fasta", ".fna", ".fa"].iter().any(|s| stem.ends_with(s)) {
            SequenceFormat::Fasta
        } else if [".fastq", ".fq"].iter().any(|s| stem.ends_with(s)) {
            SequenceFormat::Fastq
        } else {
            return Err(PolishError::UnsupportedFormat {
                path: path.to_string(),
                expected: SEQUENCE_EXTENSIONS,
            });
        };
        Ok(SequenceSource {
            path: PathBuf::from(path),
            format,
            reader: None,
            pending_header: None,
        })
    }

    pub fn reset(&mut self) {
        self.reader = None;
        self.pending_header = None;
    }

    /// Appends records until roughly `byte_budget` bytes of nucleotide data
    /// have been read. Returns true when more records remain.
    pub fn parse(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> Result<bool, PolishError> {
        if self.reader.is_none() {
            self.reader = Some(open_reader(&self.path)?);
        }
        match self.format {
            SequenceFormat::Fasta => self.parse_fasta(dst, byte_budget),
            SequenceFormat::Fastq => self.parse_fastq(dst, byte_budget),
        }
    }

    fn parse_fasta(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> Result<bool, PolishError> {
        let reader = self.reader.as_mut().unwrap();
        let mut bytes: u64 = 0;

        let mut header = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match read_line(reader.as_mut())? {
                    None => return Ok(false),
                    Some(line) if line.starts_with('>') => break line,
                    Some(line) if line.is_empty() => continue,
                    Some(line) => {
                        return Err(PolishError::Parse(format!(
                            "{}: expected FASTA header, found {:?}",
                            self.path.display(),
                            line
                        )))
                    }
                }
            },
        };

        loop {
            let name = parse_record_name(&header[1..]);
            let mut data = Vec::new();
            let next_header = loop {
                match read_line(reader.as_mut())? {
                    None => break None,
                    Some(line) if line.starts_with('>') => break Some(line),
                    Some(line) => data.extend_from_slice(line.trim().as_bytes()),
                }
            };
            if data.is_empty() {
                return Err(PolishError::Parse(format!(
                    "{}: sequence {} has no data",
                    self.path.display(),
                    name
                )));
            }
            bytes += data.len() as u64;
            dst.push(Sequence::new(name, data));

            match next_header {
                None => return Ok(false),
                Some(h) => {
                    if bytes >= byte_budget {
                        self.pending_header = Some(h);
                        return Ok(true);
                    }
                    header = h;
                }
            }
        }
    }

    fn parse_fastq(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> Result<bool, PolishError> {
        let reader = self.reader.as_mut().unwrap();
        let mut bytes: u64 = 0;
        loop {
            let header = loop {
                match read_line(reader.as_mut())? {
                    None => return Ok(false),
                    Some(line) if line.is_empty() => continue,
                    Some(line) => break line,
                }
            };
            if !header.starts_with('@') {
                return Err(PolishError::Parse(format!(
                    "{}: expected FASTQ header, found {:?}",
                    self.path.display(),
                    header
                )));
            }
            let name = parse_record_name(&header[1..]);

            let mut data = Vec::new();
            loop {
                match read_line(reader.as_mut())? {
                    None => {
                        return Err(PolishError::Parse(format!(
                            "{}: truncated FASTQ record {}",
                            self.path.display(),
                            name
                        )))
                    }
                    Some(line) if line.starts_with('+') => break,
                    Some(line) => data.extend_from_slice(line.trim().as_bytes()),
                }
            }
            let mut quality = Vec::new();
            while quality.len() < data.len() {
                match read_line(reader.as_mut())? {
                    None => {
                        return Err(PolishError::Parse(format!(
                            "{}: truncated FASTQ record {}",
                            self.path.display(),
                            name
                        )))
                    }
                    Some(line) => quality.extend_from_slice(line.trim().as_bytes()),
                }
            }
            if quality.len() != data.len() {
                return Err(PolishError::Parse(format!(
                    "{}: quality length mismatch in record {}",
                    self.path.display(),
                    name
                )));
            }

            bytes += 2 * data.len() as u64;
            dst.push(Sequence::with_quality(name, data, quality));
            if bytes >= byte_budget {
                return Ok(true);
            }
        }
    }
}

fn parse_record_name(header: &str) -> String {
    header
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// MHAP/PAF/SAM overlap records from a (possibly gzipped) file. Coordinates
/// are normalized to 0-based half-open ranges on the forward strands.
pub struct OverlapSource {
    path: PathBuf,
    format: OverlapFormat,
    reader: Option<Box<dyn BufRead>>,
}

impl OverlapSource {
    pub fn open(path: &str) -> Result<Self, PolishError> {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        let format = if stem.ends_with(".mhap") {
            OverlapFormat::Mhap
        } else if stem.ends_with(".paf") {
            OverlapFormat::Paf
        } else if stem.ends_with(".sam") {
            OverlapFormat::Sam
        } else {
            return Err(PolishError::UnsupportedFormat {
                path: path.to_string(),
                expected: OVERLAP_EXTENSIONS,
            });
        };
        Ok(OverlapSource {
            path: PathBuf::from(path),
            format,
            reader: None,
        })
    }

    pub fn reset(&mut self) {
        self.reader = None;
    }

    pub fn parse(&mut self, dst: &mut Vec<Overlap>, byte_budget: u64) -> Result<bool, PolishError> {
        if self.reader.is_none() {
            self.reader = Some(open_reader(&self.path)?);
        }
        let reader = self.reader.as_mut().unwrap();
        let mut bytes: u64 = 0;
        loop {
            let line = match read_line(reader.as_mut())? {
                None => return Ok(false),
                Some(line) => line,
            };
            bytes += line.len() as u64 + 1;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let record = match self.format {
                OverlapFormat::Mhap => {
                    // MHAP is space-separated.
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    Some(Overlap::from_mhap(&fields)).transpose()
                }
                OverlapFormat::Paf => Some(Overlap::from_paf(&fields)).transpose(),
                OverlapFormat::Sam => {
                    if line.starts_with('@') {
                        Ok(None)
                    } else {
                        Overlap::from_sam(&fields)
                    }
                }
            };
            match record {
                Ok(Some(overlap)) => dst.push(overlap),
                Ok(None) => {}
                Err(msg) => {
                    return Err(PolishError::Parse(format!(
                        "{}: {}",
                        self.path.display(),
                        msg
                    )))
                }
            }
            if bytes >= byte_budget {
                return Ok(true);
            }
        }
    }
}
