//! File-based FASTA reading. Wraps [`crate::digest::fasta`] with file I/O and
//! gzip detection.

use std::fmt::{self, Display};
use std::io::{BufReader, Read};
use std::path::Path;

use refstore_core::utils::get_dynamic_reader_with_info;

use crate::digest::fasta::{parse_fasta_reader, FastaOptions, FastaReader, ParsedFasta};
use crate::digest::types::SequenceCollection;
use crate::errors::Result;

/// Open a FASTA file (plain or gzipped) as a streaming record iterator.
///
/// FAI layout is tracked only when the file is not compressed.
pub fn open_fasta<P: AsRef<Path>>(
    file_path: P,
    options: FastaOptions,
    keep_sequence: bool,
) -> Result<FastaReader<BufReader<Box<dyn Read>>>> {
    let (reader, is_gzipped) = get_dynamic_reader_with_info(file_path.as_ref())?;
    Ok(FastaReader::new(reader, options, keep_sequence, !is_gzipped))
}

fn parse_fasta_file(file_path: &Path, options: FastaOptions, keep_sequence: bool) -> Result<ParsedFasta> {
    let (reader, is_gzipped) = get_dynamic_reader_with_info(file_path)?;
    parse_fasta_reader(
        reader,
        options,
        keep_sequence,
        !is_gzipped,
        Some(file_path.to_path_buf()),
    )
}

/// Digest every sequence in a FASTA file without keeping the sequence data.
///
/// # Example
/// ```no_run
/// use refstore::fasta::digest_fasta;
///
/// let collection = digest_fasta("genome.fa").unwrap();
/// println!("{}", collection.digest());
/// ```
pub fn digest_fasta<P: AsRef<Path>>(file_path: P) -> Result<SequenceCollection> {
    Ok(parse_fasta_file(file_path.as_ref(), FastaOptions::default(), false)?.collection)
}

pub fn digest_fasta_with_options<P: AsRef<Path>>(
    file_path: P,
    options: FastaOptions,
) -> Result<ParsedFasta> {
    parse_fasta_file(file_path.as_ref(), options, false)
}

/// Like [`digest_fasta`], but every record is Full with its raw sequence.
pub fn load_fasta<P: AsRef<Path>>(file_path: P) -> Result<SequenceCollection> {
    Ok(parse_fasta_file(file_path.as_ref(), FastaOptions::default(), true)?.collection)
}

pub fn load_fasta_with_options<P: AsRef<Path>>(
    file_path: P,
    options: FastaOptions,
) -> Result<ParsedFasta> {
    parse_fasta_file(file_path.as_ref(), options, true)
}

/// One line of a samtools-style `.fai` index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaiRecord {
    pub name: String,
    pub length: usize,
    pub offset: u64,
    pub line_bases: u32,
    pub line_bytes: u32,
}

impl Display for FaiRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name, self.length, self.offset, self.line_bases, self.line_bytes
        )
    }
}

/// Compute `.fai` entries for an uncompressed FASTA file.
///
/// Gzipped files have no meaningful byte offsets, so they yield no entries.
/// Empty sequences are skipped.
pub fn compute_fai<P: AsRef<Path>>(file_path: P) -> Result<Vec<FaiRecord>> {
    let collection = digest_fasta(file_path)?;
    Ok(collection
        .sequences
        .iter()
        .filter_map(|record| {
            let metadata = record.metadata();
            metadata.fai.as_ref().map(|fai| FaiRecord {
                name: metadata.name.clone(),
                length: metadata.length,
                offset: fai.offset,
                line_bases: fai.line_bases,
                line_bytes: fai.line_bytes,
            })
        })
        .collect())
}
