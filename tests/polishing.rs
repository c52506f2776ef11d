//! End-to-end polishing scenarios driven through the library API.

use burnish::error::PolishError;
use burnish::polisher::{Polisher, PolisherType};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn write_file(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

fn write_gzipped(dir: &Path, name: &str, contents: &str) -> String {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(contents.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path.to_string_lossy().into_owned()
}

fn paf_line(q: &str, q_len: usize, t: &str, t_len: usize, matches: usize, block: usize) -> String {
    format!("{q}\t{q_len}\t0\t{q_len}\t+\t{t}\t{t_len}\t0\t{t_len}\t{matches}\t{block}\t255\n")
}

#[allow(clippy::too_many_arguments)]
fn build_polisher(
    sequences: &str,
    overlaps: &str,
    target: &str,
    kind: PolisherType,
    window_length: u32,
    overlap_percentage: f64,
) -> Polisher {
    Polisher::new(
        sequences,
        overlaps,
        target,
        kind,
        window_length,
        overlap_percentage,
        10.0,
        0.3,
        true,
        3,
        -5,
        -8,
        1,
    )
    .unwrap()
}

#[test]
fn test_identity_polish() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAAAAAAAAAA\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nAAAAAAAAAA\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 10, "t1", 10, 10, 10),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data, b"AAAAAAAAAA");
    assert_eq!(polished[0].name, "t1 LN:i:10 RC:i:1 XC:f:1.000000");
}

#[test]
fn test_fragment_mode_adds_read_tag() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAAAAAAAAAA\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nAAAAAAAAAA\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 10, "t1", 10, 10, 10),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Fragment, 10, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();

    assert_eq!(polished[0].name, "t1r LN:i:10 RC:i:1 XC:f:1.000000");
    assert_eq!(polished[0].data, b"AAAAAAAAAA");
}

#[test]
fn test_uncovered_target_emitted_verbatim_or_dropped() {
    let dir = TempDir::new().unwrap();
    let target = write_file(
        dir.path(),
        "target.fasta",
        ">t1\nACGTACGT\n>t2\nAAAAAAAA\n",
    );
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nAAAAAAAA\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 8, "t2", 8, 8, 8),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 4, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(false).unwrap();

    assert_eq!(polished.len(), 2);
    assert_eq!(polished[0].name, "t1 LN:i:8 RC:i:0 XC:f:0.000000");
    assert_eq!(polished[0].data, b"ACGTACGT");
    assert_eq!(polished[1].name, "t2 LN:i:8 RC:i:1 XC:f:1.000000");

    // The uncovered target disappears when unpolished sequences are dropped.
    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 4, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();
    assert_eq!(polished.len(), 1);
    assert!(polished[0].name.starts_with("t2 "));
}

#[test]
fn test_substitution_healed_by_majority() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nACGTACGT\n");
    let queries = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGT\n>q2\nACGTACGT\n>q3\nACGAACGT\n",
    );
    let mut paf = String::new();
    paf.push_str(&paf_line("q1", 8, "t1", 8, 8, 8));
    paf.push_str(&paf_line("q2", 8, "t1", 8, 8, 8));
    paf.push_str(&paf_line("q3", 8, "t1", 8, 7, 8));
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 8, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();

    assert_eq!(polished[0].data, b"ACGTACGT");
    assert_eq!(polished[0].name, "t1 LN:i:8 RC:i:3 XC:f:1.000000");
}

#[test]
fn test_contig_mode_keeps_longest_overlap_per_query() {
    let body: String = "ACGT".repeat(200);
    let dir = TempDir::new().unwrap();
    let target = write_file(
        dir.path(),
        "target.fasta",
        &format!(">t1\n{}\n>t2\n{}\n", &body[..500], body),
    );
    let queries = write_file(dir.path(), "reads.fasta", &format!(">q1\n{}\n", body));
    let mut paf = String::from("q1\t800\t0\t500\t+\tt1\t500\t0\t500\t500\t500\t255\n");
    paf.push_str(&paf_line("q1", 800, "t2", 800, 800, 800));
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 500, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(false).unwrap();

    // Only the longer overlap survives deduplication: t2 gets the coverage.
    assert_eq!(polished.len(), 2);
    assert_eq!(polished[0].name, "t1 LN:i:500 RC:i:0 XC:f:0.000000");
    assert_eq!(polished[1].name, "t2 LN:i:800 RC:i:1 XC:f:1.000000");
    assert_eq!(polished[1].data, body.as_bytes());
}

#[test]
fn test_low_quality_fragment_skipped() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nACGTACGTACGTACGT\n");
    // First window fragment averages Phred 5, second Phred 30; each carries
    // one substitution against the target.
    let queries = write_file(
        dir.path(),
        "reads.fastq",
        "@q1\nACCTACGTACGAACGT\n+\n&&&&&&&&????????\n",
    );
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 16, "t1", 16, 14, 16),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 8, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(false).unwrap();

    // The low-quality substitution is ignored, the high-quality one lands.
    assert_eq!(polished[0].data, b"ACGTACGTACGAACGT");
    assert_eq!(polished[0].name, "t1 LN:i:16 RC:i:1 XC:f:0.500000");
}

#[test]
fn test_overlap_mode_stitches_identity() {
    let body = "ACGGTCAGTTGCAATCCAGATGTTCGCCTAAGGTACTGAC";
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", &format!(">t1\n{}\n", body));
    let queries = write_file(dir.path(), "reads.fasta", &format!(">q1\n{}\n", body));
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 40, "t1", 40, 40, 40),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.25);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();

    // The final pair aligns against the whole right window, whose tail is
    // then appended once more; the junction itself must not duplicate.
    let expected = format!("{}{}", body, &body[34..]);
    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data, expected.as_bytes());
    assert_eq!(
        polished[0].name,
        format!("t1 LN:i:{} RC:i:1 XC:f:1.000000", expected.len())
    );
}

#[test]
fn test_gzipped_inputs() {
    let dir = TempDir::new().unwrap();
    let target = write_gzipped(dir.path(), "target.fasta.gz", ">t1\nAAAAAAAAAA\n");
    let queries = write_gzipped(dir.path(), "reads.fasta.gz", ">q1\nAAAAAAAAAA\n");
    let overlaps = write_gzipped(
        dir.path(),
        "overlaps.paf.gz",
        &paf_line("q1", 10, "t1", 10, 10, 10),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();
    assert_eq!(polished[0].data, b"AAAAAAAAAA");
}

#[test]
fn test_configuration_errors() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nACGT\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nACGT\n");
    let overlaps = write_file(dir.path(), "overlaps.paf", "");

    assert!(matches!(
        Polisher::new(
            &queries, &overlaps, &target, PolisherType::Contig, 0, 0.0, 10.0, 0.3, true, 3, -5,
            -8, 1,
        ),
        Err(PolishError::InvalidWindowLength)
    ));
    assert!(matches!(
        Polisher::new(
            &queries, &overlaps, &target, PolisherType::Contig, 500, 0.5, 10.0, 0.3, true, 3, -5,
            -8, 1,
        ),
        Err(PolishError::InvalidOverlapPercentage(_))
    ));
    assert!(matches!(
        Polisher::new(
            &queries, "overlaps.bed", &target, PolisherType::Contig, 500, 0.0, 10.0, 0.3, true,
            3, -5, -8, 1,
        ),
        Err(PolishError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        Polisher::new(
            "reads.bam", &overlaps, &target, PolisherType::Contig, 500, 0.0, 10.0, 0.3, true, 3,
            -5, -8, 1,
        ),
        Err(PolishError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_empty_overlap_set_after_filtering_fails() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAAAAAAAAAA\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nAAAAAAAAAA\n");
    // Reported error rate 0.5 exceeds the 0.3 threshold.
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("q1", 10, "t1", 10, 5, 10),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    assert!(matches!(
        polisher.initialize(),
        Err(PolishError::EmptyOverlapSet)
    ));
}

#[test]
fn test_duplicate_name_with_unequal_data_fails() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAAAAAAAAAA\n");
    let queries = write_file(dir.path(), "reads.fasta", ">t1\nAAAA\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        &paf_line("t1", 10, "t1", 10, 10, 10),
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    assert!(matches!(
        polisher.initialize(),
        Err(PolishError::DuplicateSequence(_))
    ));
}

#[test]
fn test_reverse_strand_query_polishes() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAACCGGTTAA\n");
    // Reverse complement of the target.
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nTTAACCGGTT\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        "q1\t10\t0\t10\t-\tt1\t10\t0\t10\t10\t10\t255\n",
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();
    assert_eq!(polished[0].data, b"AACCGGTTAA");
    assert_eq!(polished[0].name, "t1 LN:i:10 RC:i:1 XC:f:1.000000");
}

#[test]
fn test_mhap_overlaps_resolve_by_ordinal() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nAAAAAAAAAA\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nAAAAAAAAAA\n");
    // a_id 1 = first query record, b_id 1 = first target record.
    let overlaps = write_file(
        dir.path(),
        "overlaps.mhap",
        "1 1 0.0 10 0 0 10 10 0 0 10 10\n",
    );

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 10, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();
    assert_eq!(polished[0].data, b"AAAAAAAAAA");
}

#[test]
fn test_sam_overlaps_polish() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "target.fasta", ">t1\nACGTACGT\n");
    let queries = write_file(dir.path(), "reads.fasta", ">q1\nACGTACGT\n");
    let sam = "@SQ\tSN:t1\tLN:8\nq1\t0\tt1\t1\t60\t8M\t*\t0\t0\tACGTACGT\t*\n";
    let overlaps = write_file(dir.path(), "overlaps.sam", sam);

    let mut polisher =
        build_polisher(&queries, &overlaps, &target, PolisherType::Contig, 8, 0.0);
    polisher.initialize().unwrap();
    let polished = polisher.polish(true).unwrap();
    assert_eq!(polished[0].data, b"ACGTACGT");
}
