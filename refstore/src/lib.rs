//! # Content-addressed reference sequence store
//!
//! Sequences are identified by the GA4GH `sha512t24u` digest of their bytes and
//! collections by a digest over their names and sequence digests, so the same
//! content loaded from differently named files is stored once.
//!
//! # Module Structure
//!
//! The `digest` module has no filesystem access:
//! - `digest::algorithms` - hash functions (sha512t24u, md5, canonicalize_json)
//! - `digest::alphabet` - sequence alphabets and encoding tables
//! - `digest::encoder` - sequence bit-packing
//! - `digest::types` - records (SequenceRecord, SequenceCollectionRecord, ...)
//! - `digest::fasta` - streaming FASTA parsing over any reader
//!
//! Everything else works with files:
//! - `fasta` - FASTA files (plain or gzipped) and `.fai` generation
//! - `collection` - index file formats and FASTA output for collections
//! - `store` - [`RefgetStore`], with lazy loading and optional persistence
//!
//! # Feature Flags
//!
//! - `http` (default): stores backed by a remote HTTP source
//!
//! # Example
//! ```no_run
//! use refstore::RefgetStore;
//!
//! let mut store = RefgetStore::on_disk("refs")?;
//! let report = store.add_sequence_collection_from_fasta("genome.fa")?;
//! let record = store.get_sequence_by_collection_and_name(&report.collection_digest, "chr1")?;
//! let digest = record.metadata().sha512t24u.clone();
//! println!("{}", store.get_substring(&digest, 1000, 1010)?);
//! # Ok::<(), refstore::RefgetError>(())
//! ```

// ============================================================================
// Digesting and encoding
// ============================================================================

pub mod digest;

pub use digest::{
    // Algorithms
    canonicalize_json, md5, sha512t24u,
    // Alphabet
    guess_alphabet, lookup_alphabet, Alphabet, AlphabetGuesser, AlphabetType,
    // Encoder
    decode_string_from_bytes, decode_substring_from_bytes, encode_sequence, SequenceEncoder,
    // Types
    digest_sequence, digest_sequence_with_description, FaiMetadata, SeqColDigestLvl1,
    SequenceCollection, SequenceCollectionMetadata, SequenceCollectionRecord, SequenceMetadata,
    SequenceRecord, StorageMode,
    // FASTA
    digest_fasta_bytes, load_fasta_bytes, FastaOptions, FastaReader,
};

// ============================================================================
// Files and the store
// ============================================================================

pub mod collection;
pub mod errors;
pub mod fasta;
pub mod store;

mod hashkeyable;

pub use collection::SequenceCollectionExt;
pub use errors::{RefgetError, Result};
pub use fasta::{compute_fai, digest_fasta, load_fasta, FaiRecord};
pub use store::{IngestReport, RefgetStore, RemoteOptions, StoreStats};
