use burnish::error::PolishError;
use burnish::polisher::{Polisher, PolisherType};
use clap::Parser;
use std::io::{self, BufWriter, Write};

/// Consensus polishing of assemblies and raw long reads: aligns overlapping
/// query fragments to fixed windows of each target and replaces every window
/// with the consensus of a partial order alignment.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Sequences used for polishing the target (FASTA/FASTQ, may be gzipped).
    #[clap(value_parser)]
    sequences: String,

    /// Overlaps between the sequences and the target (MHAP/PAF/SAM, may be gzipped).
    #[clap(value_parser)]
    overlaps: String,

    /// Target sequences to be polished (FASTA/FASTQ, may be gzipped).
    #[clap(value_parser)]
    target: String,

    /// Output unpolished target sequences as well.
    #[clap(short = 'u', long, action)]
    include_unpolished: bool,

    /// Perform fragment correction instead of contig polishing.
    #[clap(short = 'f', long, action)]
    fragment_correction: bool,

    /// Size of the window on which the consensus is generated.
    #[clap(short = 'w', long, value_parser, default_value_t = 500)]
    window_length: u32,

    /// Fraction of the window length shared with each neighbouring window,
    /// in [0, 0.5). Non-zero values enable the stitching pass.
    #[clap(long, value_parser, default_value_t = 0.0)]
    overlap_percentage: f64,

    /// Threshold on the average base quality of a fragment.
    #[clap(short = 'q', long, value_parser, default_value_t = 10.0)]
    quality_threshold: f64,

    /// Threshold on the self-reported error rate of an overlap.
    #[clap(short = 'e', long, value_parser, default_value_t = 0.3)]
    error_threshold: f64,

    /// Disable consensus trimming at window ends.
    #[clap(long, action)]
    no_trimming: bool,

    /// Score for matching bases.
    #[clap(short = 'm', long = "match", value_parser, default_value_t = 3, allow_negative_numbers = true)]
    match_score: i8,

    /// Score for mismatching bases.
    #[clap(short = 'x', long, value_parser, default_value_t = -5, allow_negative_numbers = true)]
    mismatch: i8,

    /// Linear gap penalty.
    #[clap(short = 'g', long, value_parser, default_value_t = -8, allow_negative_numbers = true)]
    gap: i8,

    /// Number of worker threads.
    #[clap(short = 't', long, value_parser, default_value_t = 1)]
    threads: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("[burnish] error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), PolishError> {
    let kind = if args.fragment_correction {
        PolisherType::Fragment
    } else {
        PolisherType::Contig
    };

    let mut polisher = Polisher::new(
        &args.sequences,
        &args.overlaps,
        &args.target,
        kind,
        args.window_length,
        args.overlap_percentage,
        args.quality_threshold,
        args.error_threshold,
        !args.no_trimming,
        args.match_score,
        args.mismatch,
        args.gap,
        args.threads,
    )?;
    polisher.initialize()?;
    let polished = polisher.polish(!args.include_unpolished)?;

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    for sequence in &polished {
        writer.write_all(b">")?;
        writer.write_all(sequence.name.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(&sequence.data)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
