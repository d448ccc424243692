//! Index file formats and filesystem helpers for collections.
//!
//! Three plain-text, tab-separated formats are used by a store's backing
//! directory:
//!
//! - the sequence index (`sequences.index`): one row per stored sequence
//! - the collections index (`collections.index`): one row per collection
//! - a per-collection index: `##key=value` digest headers followed by the
//!   collection's sequences in order
//!
//! Readers take the source path only to report where a malformed line came from.

use std::io::{BufRead, Write};
use std::path::Path;

use refstore_core::utils::get_dynamic_writer;

use crate::digest::fasta::FastaOptions;
use crate::digest::types::{
    parse_sequence_index_line, SeqColDigestLvl1, SequenceCollection,
    SequenceCollectionMetadata, SequenceMetadata, SequenceRecord, SEQUENCE_INDEX_HEADER,
};
use crate::errors::{RefgetError, Result};
use crate::fasta::{digest_fasta_with_options, load_fasta_with_options};

pub const COLLECTIONS_INDEX_HEADER: &str =
    "#digest\tn_sequences\tnames_digest\tsequences_digest\tlengths_digest";

/// Line width used when writing FASTA without any layout information.
pub const DEFAULT_LINE_WIDTH: usize = 80;

fn corrupt(path: &Path, line: usize, reason: impl Into<String>) -> RefgetError {
    RefgetError::CorruptIndex {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

// ============================================================================
// Sequence index
// ============================================================================

pub fn write_sequence_index<'a, W, I>(mut writer: W, sequences: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SequenceMetadata>,
{
    writeln!(writer, "{}", SEQUENCE_INDEX_HEADER)?;
    for metadata in sequences {
        writeln!(writer, "{}", metadata.to_index_line())?;
    }
    writer.flush()
}

/// Reads a sequence index. Parsing stops at the first malformed line.
pub fn read_sequence_index<R: BufRead>(reader: R, path: &Path) -> Result<Vec<SequenceMetadata>> {
    let mut sequences = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(RefgetError::backing_io(path))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let metadata =
            parse_sequence_index_line(&line).map_err(|reason| corrupt(path, index + 1, reason))?;
        sequences.push(metadata);
    }
    Ok(sequences)
}

// ============================================================================
// Collections index
// ============================================================================

pub fn write_collections_index<'a, W, I>(mut writer: W, collections: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SequenceCollectionMetadata>,
{
    writeln!(writer, "{}", COLLECTIONS_INDEX_HEADER)?;
    for metadata in collections {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            metadata.digest,
            metadata.n_sequences,
            metadata.names_digest,
            metadata.sequences_digest,
            metadata.lengths_digest
        )?;
    }
    writer.flush()
}

pub fn read_collections_index<R: BufRead>(
    reader: R,
    path: &Path,
) -> Result<Vec<SequenceCollectionMetadata>> {
    let mut collections = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(RefgetError::backing_io(path))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
            return Err(corrupt(path, index + 1, format!("expected 5 columns, found {}", parts.len())));
        }
        let n_sequences = parts[1].parse::<usize>().map_err(|e| {
            corrupt(path, index + 1, format!("invalid sequence count '{}': {}", parts[1], e))
        })?;
        collections.push(SequenceCollectionMetadata {
            digest: parts[0].to_string(),
            n_sequences,
            names_digest: parts[2].to_string(),
            sequences_digest: parts[3].to_string(),
            lengths_digest: parts[4].to_string(),
            file_path: None,
        });
    }
    Ok(collections)
}

// ============================================================================
// Per-collection index
// ============================================================================

pub fn write_collection_index<W: Write>(
    mut writer: W,
    metadata: &SequenceCollectionMetadata,
    sequences: &[SequenceRecord],
) -> std::io::Result<()> {
    writeln!(writer, "##seqcol_digest={}", metadata.digest)?;
    writeln!(writer, "##names_digest={}", metadata.names_digest)?;
    writeln!(writer, "##sequences_digest={}", metadata.sequences_digest)?;
    writeln!(writer, "##lengths_digest={}", metadata.lengths_digest)?;
    write_sequence_index(writer, sequences.iter().map(|r| r.metadata()))
}

/// Reads a per-collection index into a collection of Stub records.
///
/// The header digests must agree with the digests recomputed from the rows;
/// a mismatch means the file was altered or only partly written.
pub fn read_collection_index<R: BufRead>(reader: R, path: &Path) -> Result<SequenceCollection> {
    let mut digest = None;
    let mut names_digest = None;
    let mut sequences_digest = None;
    let mut lengths_digest = None;
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(RefgetError::backing_io(path))?;
        if let Some(header) = line.strip_prefix("##") {
            let (key, value) = header
                .split_once('=')
                .ok_or_else(|| corrupt(path, index + 1, "header without '='"))?;
            let slot = match key {
                "seqcol_digest" => &mut digest,
                "names_digest" => &mut names_digest,
                "sequences_digest" => &mut sequences_digest,
                "lengths_digest" => &mut lengths_digest,
                _ => continue,
            };
            *slot = Some(value.to_string());
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let metadata =
            parse_sequence_index_line(&line).map_err(|reason| corrupt(path, index + 1, reason))?;
        records.push(SequenceRecord::Stub(metadata));
    }

    let (Some(digest), Some(names_digest), Some(sequences_digest), Some(lengths_digest)) =
        (digest, names_digest, sequences_digest, lengths_digest)
    else {
        return Err(corrupt(path, 0, "missing one of the ## digest headers"));
    };

    let declared = SequenceCollectionMetadata {
        digest,
        n_sequences: records.len(),
        names_digest,
        sequences_digest,
        lengths_digest,
        file_path: None,
    };
    let collection = SequenceCollection::from_records(records, None);
    if !collection.metadata.same_contents(&declared) {
        return Err(RefgetError::Consistency(format!(
            "{} declares collection {} but its rows digest to {}",
            path.display(),
            declared.digest,
            collection.metadata.digest
        )));
    }
    Ok(collection)
}

// ============================================================================
// FASTA output
// ============================================================================

/// Writes one FASTA record, wrapping the sequence every `line_width` bytes.
/// A width of zero writes the sequence on a single line.
pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    metadata: &SequenceMetadata,
    sequence: &[u8],
    line_width: usize,
) -> std::io::Result<()> {
    match &metadata.description {
        Some(description) => writeln!(writer, ">{} {}", metadata.name, description)?,
        None => writeln!(writer, ">{}", metadata.name)?,
    }
    if line_width == 0 {
        writer.write_all(sequence)?;
        writer.write_all(b"\n")?;
        return Ok(());
    }
    for line in sequence.chunks(line_width) {
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

// ============================================================================
// Extensions to SequenceCollection for filesystem operations
// ============================================================================

/// Filesystem helpers for standalone collections.
pub trait SequenceCollectionExt: Sized {
    /// Digest a FASTA file into a collection of Stub records.
    fn from_fasta<P: AsRef<Path>>(file_path: P) -> Result<Self>;
    /// Read a collection from a FASTA file, keeping raw sequence data.
    fn from_fasta_with_data<P: AsRef<Path>>(file_path: P) -> Result<Self>;
    fn write_collection_index_file<P: AsRef<Path>>(&self, file_path: P) -> Result<()>;
    /// Write all loaded sequences as FASTA. `.gz` paths are compressed.
    fn write_fasta<P: AsRef<Path>>(&self, file_path: P, line_width: Option<usize>) -> Result<()>;
}

impl SequenceCollectionExt for SequenceCollection {
    fn from_fasta<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        Ok(digest_fasta_with_options(file_path, FastaOptions::default())?.collection)
    }

    fn from_fasta_with_data<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        Ok(load_fasta_with_options(file_path, FastaOptions::default())?.collection)
    }

    fn write_collection_index_file<P: AsRef<Path>>(&self, file_path: P) -> Result<()> {
        let path = file_path.as_ref();
        let file = std::fs::File::create(path).map_err(RefgetError::backing_io(path))?;
        write_collection_index(std::io::BufWriter::new(file), &self.metadata, &self.sequences)
            .map_err(RefgetError::backing_io(path))
    }

    fn write_fasta<P: AsRef<Path>>(&self, file_path: P, line_width: Option<usize>) -> Result<()> {
        let mut writer = get_dynamic_writer(file_path.as_ref())?;
        for record in &self.sequences {
            let sequence = record
                .decode()
                .ok_or_else(|| RefgetError::NoBacking(record.metadata().sha512t24u.clone()))?;
            let width = line_width.unwrap_or(DEFAULT_LINE_WIDTH);
            write_fasta_record(&mut writer, record.metadata(), &sequence, width)?;
        }
        writer.finish()?;
        Ok(())
    }
}

/// Level-1 digests of an ordered list of records.
pub fn collection_lvl1(sequences: &[SequenceRecord]) -> SeqColDigestLvl1 {
    let metadata: Vec<&SequenceMetadata> = sequences.iter().map(|r| r.metadata()).collect();
    SeqColDigestLvl1::from_metadata(&metadata)
}
