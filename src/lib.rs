pub mod libs;

pub use libs::alphabet::Alphabet;
pub use libs::calibrate::{CalibrateOptions, Calibrator, EvdParams};
pub use libs::error::{IndexError, QueryError};
pub use libs::index::{BuildOptions, IndexBuilder, KmerIndex, MappedIndex, MemoryIndex};
pub use libs::kmer::{Extractor, KmerParams, SpacedPattern};
pub use libs::matcher::{Candidate, Matcher, QueryRecord, SearchOptions};
pub use libs::seqdb::SeqDb;
