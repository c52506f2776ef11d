use std::fmt;
use std::io;

/// Fatal conditions that terminate a polishing run. Per-record problems
/// (invalid overlaps, low-quality fragments) are filtered and counted
/// instead of being reported here.
#[derive(Debug)]
pub enum PolishError {
    UnsupportedFormat { path: String, expected: &'static str },
    InvalidWindowLength,
    InvalidOverlapPercentage(f64),
    EmptyTargetSet,
    EmptySequenceSet,
    EmptyOverlapSet,
    DuplicateSequence(String),
    MissingSequence(String),
    Io(io::Error),
    Parse(String),
}

impl fmt::Display for PolishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolishError::UnsupportedFormat { path, expected } => write!(
                f,
                "file {} has unsupported format extension (valid extensions: {})",
                path, expected
            ),
            PolishError::InvalidWindowLength => write!(f, "invalid window length"),
            PolishError::InvalidOverlapPercentage(p) => {
                write!(f, "invalid overlap percentage {} (must be in [0, 0.5))", p)
            }
            PolishError::EmptyTargetSet => write!(f, "empty target sequences set"),
            PolishError::EmptySequenceSet => write!(f, "empty sequences set"),
            PolishError::EmptyOverlapSet => write!(f, "empty overlap set"),
            PolishError::DuplicateSequence(name) => {
                write!(f, "duplicate sequence {} with unequal data", name)
            }
            PolishError::MissingSequence(name) => {
                write!(f, "missing sequence {} referenced by an overlap", name)
            }
            PolishError::Io(e) => write!(f, "IO error: {}", e),
            PolishError::Parse(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PolishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PolishError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PolishError {
    fn from(e: io::Error) -> Self {
        PolishError::Io(e)
    }
}
