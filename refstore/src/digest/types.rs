//! Core types for sequences and sequence collections.
//!
//! Both sequences and collections come in two shapes: a `Stub` that carries only
//! metadata, and a `Full` record that also carries the payload. A store moves
//! records between the two as it loads them from and flushes them to disk.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use super::algorithms::{collection_digest, level1_digest, md5, refget_sequence_id, sha512t24u};
use super::alphabet::{AlphabetType, guess_alphabet, lookup_alphabet};
use super::encoder::{decode_substring_from_bytes, encode_sequence, encoded_size};

/// How sequence payload bytes are laid out, in memory or on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageMode {
    /// One byte per symbol, exactly as read from the FASTA file.
    Raw,
    /// Bit-packed using the sequence's alphabet.
    #[default]
    Encoded,
}

impl Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Raw => write!(f, "Raw"),
            StorageMode::Encoded => write!(f, "Encoded"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(StorageMode::Raw),
            "encoded" => Ok(StorageMode::Encoded),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

/// Metadata for a single sequence, including its name, length, digests, and alphabet type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    pub name: String,
    /// Text after the first whitespace of the FASTA header.
    #[serde(default)]
    pub description: Option<String>,
    pub length: usize,
    pub sha512t24u: String,
    pub md5: String,
    pub alphabet: AlphabetType,
    /// Layout of the sequence in the file it was read from, when known.
    #[serde(default)]
    pub fai: Option<FaiMetadata>,
}

impl SequenceMetadata {
    /// The `SQ.`-prefixed identifier used in collection digests.
    pub fn refget_id(&self) -> String {
        refget_sequence_id(&self.sha512t24u)
    }

    /// Size in bytes of this sequence's payload in the given mode.
    pub fn payload_size(&self, mode: StorageMode) -> usize {
        match mode {
            StorageMode::Raw => self.length,
            StorageMode::Encoded => encoded_size(self.length, lookup_alphabet(&self.alphabet)),
        }
    }
}

/// FASTA index (FAI) fragment for a sequence.
/// Only present when the sequence was read from an uncompressed FASTA file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaiMetadata {
    pub offset: u64,     // byte offset to first base of sequence data
    pub line_bases: u32, // number of bases per line
    pub line_bytes: u32, // number of bytes per line (including newline chars)
}

/// Re-lays out a payload from one storage mode to another.
pub fn convert_payload(
    payload: Vec<u8>,
    metadata: &SequenceMetadata,
    from: StorageMode,
    to: StorageMode,
) -> Vec<u8> {
    let alphabet = lookup_alphabet(&metadata.alphabet);
    match (from, to) {
        (StorageMode::Raw, StorageMode::Raw) | (StorageMode::Encoded, StorageMode::Encoded) => {
            payload
        }
        (StorageMode::Raw, StorageMode::Encoded) => encode_sequence(&payload, alphabet),
        (StorageMode::Encoded, StorageMode::Raw) => {
            decode_substring_from_bytes(&payload, 0, metadata.length, alphabet)
        }
    }
}

/// A single sequence, with or without its payload.
///
/// - `Stub`: metadata only; the payload lives in a backing store
/// - `Full`: metadata plus the payload, laid out according to `mode`
#[derive(Clone, Debug, PartialEq)]
pub enum SequenceRecord {
    Stub(SequenceMetadata),
    Full {
        metadata: SequenceMetadata,
        sequence: Vec<u8>,
        mode: StorageMode,
    },
}

impl SequenceRecord {
    /// Get metadata regardless of variant
    pub fn metadata(&self) -> &SequenceMetadata {
        match self {
            SequenceRecord::Stub(meta) => meta,
            SequenceRecord::Full { metadata, .. } => metadata,
        }
    }

    /// Payload bytes as stored, if loaded.
    pub fn sequence(&self) -> Option<&[u8]> {
        match self {
            SequenceRecord::Stub(_) => None,
            SequenceRecord::Full { sequence, .. } => Some(sequence),
        }
    }

    /// Layout of the payload, if loaded.
    pub fn mode(&self) -> Option<StorageMode> {
        match self {
            SequenceRecord::Stub(_) => None,
            SequenceRecord::Full { mode, .. } => Some(*mode),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, SequenceRecord::Full { .. })
    }

    /// Attach a payload, replacing any existing one.
    pub fn with_data(self, sequence: Vec<u8>, mode: StorageMode) -> Self {
        SequenceRecord::Full {
            metadata: self.into_metadata(),
            sequence,
            mode,
        }
    }

    /// Drop the payload, keeping only metadata.
    pub fn to_stub(self) -> Self {
        SequenceRecord::Stub(self.into_metadata())
    }

    pub fn into_metadata(self) -> SequenceMetadata {
        match self {
            SequenceRecord::Stub(metadata) => metadata,
            SequenceRecord::Full { metadata, .. } => metadata,
        }
    }

    /// Re-lay out a loaded payload in `target` mode. Stubs are returned unchanged.
    pub fn into_mode(mut self, target: StorageMode) -> Self {
        self.convert_mode(target);
        self
    }

    /// In-place version of [`into_mode`](Self::into_mode).
    pub fn convert_mode(&mut self, target: StorageMode) {
        if let SequenceRecord::Full {
            metadata,
            sequence,
            mode,
        } = self
        {
            if *mode != target {
                let payload = std::mem::take(sequence);
                *sequence = convert_payload(payload, metadata, *mode, target);
                *mode = target;
            }
        }
    }

    /// Attach a payload in place, turning a Stub into a Full record.
    pub fn load_data(&mut self, payload: Vec<u8>, payload_mode: StorageMode) {
        match self {
            SequenceRecord::Stub(metadata) => {
                let metadata = metadata.clone();
                *self = SequenceRecord::Full {
                    metadata,
                    sequence: payload,
                    mode: payload_mode,
                };
            }
            SequenceRecord::Full { sequence, mode, .. } => {
                *sequence = payload;
                *mode = payload_mode;
            }
        }
    }

    /// Drop the payload in place.
    pub fn unload(&mut self) {
        if let SequenceRecord::Full { metadata, .. } = self {
            let metadata = metadata.clone();
            *self = SequenceRecord::Stub(metadata);
        }
    }

    /// Symbols `[start, end)` of a loaded sequence, decoded to raw bytes.
    ///
    /// `end` is clamped to the sequence length. Returns `None` for a Stub.
    pub fn substring(&self, start: usize, end: usize) -> Option<Vec<u8>> {
        match self {
            SequenceRecord::Stub(_) => None,
            SequenceRecord::Full {
                metadata,
                sequence,
                mode,
            } => {
                let end = end.min(metadata.length);
                let start = start.min(end);
                Some(match mode {
                    StorageMode::Raw => sequence[start..end].to_vec(),
                    StorageMode::Encoded => decode_substring_from_bytes(
                        sequence,
                        start,
                        end,
                        lookup_alphabet(&metadata.alphabet),
                    ),
                })
            }
        }
    }

    /// The whole sequence decoded to raw bytes, if loaded.
    pub fn decode(&self) -> Option<Vec<u8>> {
        self.substring(0, self.metadata().length)
    }
}

impl Display for SequenceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metadata = self.metadata();
        write!(
            f,
            "SequenceRecord: {} (length: {}, alphabet: {}, sha512t24u: {}, md5: {}, loaded: {})",
            metadata.name,
            metadata.length,
            metadata.alphabet,
            metadata.sha512t24u,
            metadata.md5,
            self.is_loaded()
        )
    }
}

/// The three level-1 digests of a collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeqColDigestLvl1 {
    pub sequences_digest: String,
    pub names_digest: String,
    pub lengths_digest: String,
}

impl SeqColDigestLvl1 {
    /// The top-level collection digest.
    pub fn to_digest(&self) -> String {
        collection_digest(&self.names_digest, &self.sequences_digest)
    }

    /// Computes the level-1 digests of an ordered list of sequences.
    pub fn from_metadata(metadata_vec: &[&SequenceMetadata]) -> Self {
        let names: Vec<&str> = metadata_vec.iter().map(|m| m.name.as_str()).collect();
        let lengths: Vec<usize> = metadata_vec.iter().map(|m| m.length).collect();
        let sequences: Vec<String> = metadata_vec.iter().map(|m| m.refget_id()).collect();

        SeqColDigestLvl1 {
            sequences_digest: level1_digest(&sequences),
            names_digest: level1_digest(&names),
            lengths_digest: level1_digest(&lengths),
        }
    }
}

/// Summary of a collection: its digests, size, and where it was read from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCollectionMetadata {
    pub digest: String,
    pub n_sequences: usize,
    pub names_digest: String,
    pub sequences_digest: String,
    pub lengths_digest: String,
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl SequenceCollectionMetadata {
    pub fn from_sequences(sequences: &[SequenceRecord], file_path: Option<PathBuf>) -> Self {
        let metadata: Vec<&SequenceMetadata> = sequences.iter().map(|r| r.metadata()).collect();
        Self::from_lvl1(SeqColDigestLvl1::from_metadata(&metadata), metadata.len(), file_path)
    }

    pub fn from_lvl1(
        lvl1: SeqColDigestLvl1,
        n_sequences: usize,
        file_path: Option<PathBuf>,
    ) -> Self {
        SequenceCollectionMetadata {
            digest: lvl1.to_digest(),
            n_sequences,
            names_digest: lvl1.names_digest,
            sequences_digest: lvl1.sequences_digest,
            lengths_digest: lvl1.lengths_digest,
            file_path,
        }
    }

    pub fn to_lvl1(&self) -> SeqColDigestLvl1 {
        SeqColDigestLvl1 {
            sequences_digest: self.sequences_digest.clone(),
            names_digest: self.names_digest.clone(),
            lengths_digest: self.lengths_digest.clone(),
        }
    }

    /// True when the digests and count agree. The source path is not compared.
    pub fn same_contents(&self, other: &SequenceCollectionMetadata) -> bool {
        self.digest == other.digest
            && self.n_sequences == other.n_sequences
            && self.to_lvl1() == other.to_lvl1()
    }
}

/// An ordered set of sequences, independent of any store.
#[derive(Clone, Debug)]
pub struct SequenceCollection {
    pub metadata: SequenceCollectionMetadata,
    pub sequences: Vec<SequenceRecord>,
}

impl SequenceCollection {
    pub fn from_records(records: Vec<SequenceRecord>, file_path: Option<PathBuf>) -> Self {
        SequenceCollection {
            metadata: SequenceCollectionMetadata::from_sequences(&records, file_path),
            sequences: records,
        }
    }

    pub fn digest(&self) -> &str {
        &self.metadata.digest
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl Display for SequenceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "SequenceCollection with {} sequences, digest: {}",
            self.sequences.len(),
            self.metadata.digest
        )?;
        for record in self.sequences.iter().take(10) {
            writeln!(f, "  - {}", record)?;
        }
        if self.sequences.len() > 10 {
            writeln!(f, "  ... and {} more", self.sequences.len() - 10)?;
        }
        Ok(())
    }
}

impl IntoIterator for SequenceCollection {
    type Item = SequenceRecord;
    type IntoIter = std::vec::IntoIter<SequenceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.into_iter()
    }
}

impl<'a> IntoIterator for &'a SequenceCollection {
    type Item = &'a SequenceRecord;
    type IntoIter = std::slice::Iter<'a, SequenceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}

/// A collection as held by a store.
///
/// - `Stub`: only the collection summary is known
/// - `Full`: the ordered member list is loaded. Members are metadata-only; the
///   store keeps payloads in its sequence map.
#[derive(Clone, Debug)]
pub enum SequenceCollectionRecord {
    Stub(SequenceCollectionMetadata),
    Full {
        metadata: SequenceCollectionMetadata,
        sequences: Vec<SequenceRecord>,
    },
}

impl SequenceCollectionRecord {
    pub fn metadata(&self) -> &SequenceCollectionMetadata {
        match self {
            SequenceCollectionRecord::Stub(meta) => meta,
            SequenceCollectionRecord::Full { metadata, .. } => metadata,
        }
    }

    pub fn sequences(&self) -> Option<&[SequenceRecord]> {
        match self {
            SequenceCollectionRecord::Stub(_) => None,
            SequenceCollectionRecord::Full { sequences, .. } => Some(sequences),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, SequenceCollectionRecord::Full { .. })
    }

    pub fn with_sequences(self, sequences: Vec<SequenceRecord>) -> Self {
        SequenceCollectionRecord::Full {
            metadata: self.into_metadata(),
            sequences,
        }
    }

    pub fn to_stub(self) -> Self {
        SequenceCollectionRecord::Stub(self.into_metadata())
    }

    pub fn into_metadata(self) -> SequenceCollectionMetadata {
        match self {
            SequenceCollectionRecord::Stub(metadata) => metadata,
            SequenceCollectionRecord::Full { metadata, .. } => metadata,
        }
    }
}

impl From<SequenceCollection> for SequenceCollectionRecord {
    /// Members are reduced to metadata.
    fn from(collection: SequenceCollection) -> Self {
        SequenceCollectionRecord::Full {
            metadata: collection.metadata,
            sequences: collection
                .sequences
                .into_iter()
                .map(SequenceRecord::to_stub)
                .collect(),
        }
    }
}

/// Digest an in-memory sequence, producing a Full record with a raw payload.
///
/// # Example
/// ```
/// use refstore::digest::types::digest_sequence;
///
/// let record = digest_sequence("chrX", b"TTGGGGAA");
/// assert_eq!(record.metadata().sha512t24u, "iYtREV555dUFKg2_agSJW6suquUyPpMw");
/// assert_eq!(record.metadata().length, 8);
/// ```
pub fn digest_sequence(name: &str, data: &[u8]) -> SequenceRecord {
    digest_sequence_with_description(name, None, data)
}

pub fn digest_sequence_with_description(
    name: &str,
    description: Option<&str>,
    data: &[u8],
) -> SequenceRecord {
    SequenceRecord::Full {
        metadata: SequenceMetadata {
            name: name.to_string(),
            description: description.map(str::to_string),
            length: data.len(),
            sha512t24u: sha512t24u(data),
            md5: md5(data),
            alphabet: guess_alphabet(data),
            fai: None,
        },
        sequence: data.to_vec(),
        mode: StorageMode::Raw,
    }
}

// ============================================================================
// Index line format
// ============================================================================

/// Column header shared by `sequences.index` and per-collection index files.
pub const SEQUENCE_INDEX_HEADER: &str = "#name\tdescription\tlength\talphabet\tsha512t24u\tmd5";

/// Escapes tabs, newlines and backslashes so a field fits in one TSV cell.
fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_field(field: &str) -> Result<String, String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("unknown escape '\\{}'", other)),
            None => return Err("dangling escape at end of field".to_string()),
        }
    }
    Ok(out)
}

impl SequenceMetadata {
    /// One row of a sequence index: name, description, length, alphabet,
    /// sha512t24u, md5.
    pub fn to_index_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            escape_field(&self.name),
            escape_field(self.description.as_deref().unwrap_or("")),
            self.length,
            self.alphabet,
            self.sha512t24u,
            self.md5
        )
    }
}

/// Parse one row written by [`SequenceMetadata::to_index_line`].
pub fn parse_sequence_index_line(line: &str) -> Result<SequenceMetadata, String> {
    let parts: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if parts.len() != 6 {
        return Err(format!("expected 6 columns, found {}", parts.len()));
    }

    // A bare `>` header gives an empty name, which is kept as-is.
    let name = unescape_field(parts[0])?;
    let description = unescape_field(parts[1])?;
    let length = parts[2]
        .parse::<usize>()
        .map_err(|e| format!("invalid length '{}': {}", parts[2], e))?;
    let alphabet = parts[3].parse::<AlphabetType>()?;
    if parts[4].is_empty() || parts[5].is_empty() {
        return Err("missing digest".to_string());
    }

    Ok(SequenceMetadata {
        name,
        description: (!description.is_empty()).then_some(description),
        length,
        alphabet,
        sha512t24u: parts[4].to_string(),
        md5: parts[5].to_string(),
        fai: None,
    })
}
