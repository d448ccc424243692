//! Digesting, classification and encoding of sequences. No filesystem access.
//!
//! # Submodules
//!
//! - `algorithms` - hash functions (sha512t24u, md5, canonicalize_json) and level-1 digests
//! - `alphabet` - alphabet types and encoding/decoding tables
//! - `encoder` - sequence bit-packing and decoding
//! - `types` - records (SequenceRecord, SequenceCollectionRecord, ...)
//! - `fasta` - streaming FASTA parsing over any reader

pub mod algorithms;
pub mod alphabet;
pub mod encoder;
pub mod fasta;
pub mod types;

pub use algorithms::{canonicalize_json, collection_digest, level1_digest, md5, sha512t24u};
pub use alphabet::{
    guess_alphabet, lookup_alphabet, Alphabet, AlphabetGuesser, AlphabetType, ASCII_ALPHABET,
    DNA_2BIT_ALPHABET, DNA_3BIT_ALPHABET, DNA_IUPAC_ALPHABET, PROTEIN_ALPHABET,
};
pub use encoder::{
    decode_string_from_bytes, decode_substring_from_bytes, encode_sequence, SequenceEncoder,
};
pub use fasta::{
    digest_fasta_bytes, load_fasta_bytes, parse_fasta_header, FastaEntry, FastaOptions,
    FastaReader, ParsedFasta,
};
pub use types::{
    digest_sequence, digest_sequence_with_description, FaiMetadata, SeqColDigestLvl1,
    SequenceCollection, SequenceCollectionMetadata, SequenceCollectionRecord, SequenceMetadata,
    SequenceRecord, StorageMode,
};
