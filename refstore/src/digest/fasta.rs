//! Streaming FASTA parsing over any `BufRead`.
//!
//! [`FastaReader`] yields one digested record at a time, so a caller can encode
//! or persist each sequence before the next one is read. The byte-slice helpers
//! at the bottom collect a whole file into a [`SequenceCollection`].

use std::collections::HashSet;
use std::io::{BufRead, Cursor};
use std::path::PathBuf;

use log::warn;
use refstore_core::utils::auto_decompress;

use super::algorithms::StreamingDigester;
use super::alphabet::AlphabetGuesser;
use super::types::{FaiMetadata, SequenceCollection, SequenceMetadata, SequenceRecord, StorageMode};
use crate::errors::{RefgetError, Result};

/// Parse a FASTA header line (without the leading '>') into name and description.
///
/// The sequence ID is the first word (up to first whitespace), and everything
/// after is the description.
///
/// # Examples
/// ```
/// use refstore::digest::fasta::parse_fasta_header;
///
/// let (name, desc) = parse_fasta_header("chr1 some description here");
/// assert_eq!(name, "chr1");
/// assert_eq!(desc, Some("some description here".to_string()));
///
/// let (name, desc) = parse_fasta_header("chr1");
/// assert_eq!(name, "chr1");
/// assert_eq!(desc, None);
/// ```
pub fn parse_fasta_header(header: &str) -> (String, Option<String>) {
    let header = header.trim();
    match header.split_once(char::is_whitespace) {
        Some((id, desc)) => {
            let desc = desc.trim();
            (id.to_string(), (!desc.is_empty()).then(|| desc.to_string()))
        }
        None => (header.to_string(), None),
    }
}

/// How FASTA headers are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastaOptions {
    /// Strict: the name is the first header token and names must be unique
    /// within a file; later duplicates are skipped with a diagnostic.
    /// Lenient: the whole header is the name and duplicates are kept.
    pub strict: bool,
}

impl Default for FastaOptions {
    fn default() -> Self {
        FastaOptions { strict: true }
    }
}

impl FastaOptions {
    pub const STRICT: Self = Self { strict: true };
    pub const LENIENT: Self = Self { strict: false };

    fn split_header(&self, header: &str) -> (String, Option<String>) {
        if self.strict {
            parse_fasta_header(header)
        } else {
            (header.trim().to_string(), None)
        }
    }
}

/// A parsed record plus the line its header was on.
#[derive(Debug)]
pub struct FastaEntry {
    pub record: SequenceRecord,
    pub header_line: usize,
}

/// Per-record state while its sequence lines are being read.
struct PendingRecord {
    name: String,
    description: Option<String>,
    header_line: usize,
    digester: StreamingDigester,
    guesser: AlphabetGuesser,
    length: usize,
    data: Vec<u8>,
    offset: u64,
    first_line: Option<(u32, u32)>,
}

/// Streaming iterator over the records of a FASTA stream.
///
/// Lines before the first header and blank lines are ignored. Sequence lines are
/// concatenated with their `\n` / `\r\n` terminators removed. Bytes are digested
/// exactly as they appear.
pub struct FastaReader<R: BufRead> {
    reader: R,
    options: FastaOptions,
    keep_sequence: bool,
    track_fai: bool,
    line: Vec<u8>,
    line_number: usize,
    byte_position: u64,
    pending: Option<PendingRecord>,
    finished: bool,
}

impl<R: BufRead> FastaReader<R> {
    /// `keep_sequence` keeps each raw payload in the yielded Full record; otherwise
    /// records are Stubs. `track_fai` records line layout, which is only meaningful
    /// when byte positions in `reader` match the file on disk.
    pub fn new(reader: R, options: FastaOptions, keep_sequence: bool, track_fai: bool) -> Self {
        FastaReader {
            reader,
            options,
            keep_sequence,
            track_fai,
            line: Vec::new(),
            line_number: 0,
            byte_position: 0,
            pending: None,
            finished: false,
        }
    }

    fn start_record(&mut self, header: &[u8]) {
        let header = String::from_utf8_lossy(header);
        let (name, description) = self.options.split_header(&header);
        self.pending = Some(PendingRecord {
            name,
            description,
            header_line: self.line_number,
            digester: StreamingDigester::new(),
            guesser: AlphabetGuesser::new(),
            length: 0,
            data: Vec::new(),
            offset: self.byte_position,
            first_line: None,
        });
    }

    fn finish_record(&self, pending: PendingRecord) -> FastaEntry {
        let (sha512t24u, md5) = pending.digester.finalize();
        let fai = match (self.track_fai, pending.first_line) {
            (true, Some((line_bases, line_bytes))) => Some(FaiMetadata {
                offset: pending.offset,
                line_bases,
                line_bytes,
            }),
            _ => None,
        };
        let metadata = SequenceMetadata {
            name: pending.name,
            description: pending.description,
            length: pending.length,
            sha512t24u,
            md5,
            alphabet: pending.guesser.guess(),
            fai,
        };
        let record = if self.keep_sequence {
            SequenceRecord::Full {
                metadata,
                sequence: pending.data,
                mode: StorageMode::Raw,
            }
        } else {
            SequenceRecord::Stub(metadata)
        };
        FastaEntry {
            record,
            header_line: pending.header_line,
        }
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<FastaEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.line.clear();
            let bytes_read = match self.reader.read_until(b'\n', &mut self.line) {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(RefgetError::Io(e)));
                }
            };

            if bytes_read == 0 {
                self.finished = true;
                return self.pending.take().map(|p| Ok(self.finish_record(p)));
            }

            self.line_number += 1;
            self.byte_position += bytes_read as u64;

            let mut content = self.line.as_slice();
            while let Some((&last, rest)) = content.split_last() {
                if last == b'\n' || last == b'\r' {
                    content = rest;
                } else {
                    break;
                }
            }

            if let Some(header) = content.strip_prefix(b">") {
                let header = header.to_vec();
                let previous = self.pending.take();
                self.start_record(&header);
                if let Some(previous) = previous {
                    return Some(Ok(self.finish_record(previous)));
                }
                continue;
            }

            let Some(pending) = self.pending.as_mut() else {
                continue;
            };
            if content.is_empty() {
                continue;
            }

            if pending.first_line.is_none() {
                pending.offset = self.byte_position - bytes_read as u64;
                pending.first_line = Some((content.len() as u32, bytes_read as u32));
            }
            pending.digester.update(content);
            pending.guesser.update(content);
            pending.length += content.len();
            if self.keep_sequence {
                pending.data.extend_from_slice(content);
            }
        }
    }
}

/// Drops later records whose name was already seen, for strict ingestion.
#[derive(Default)]
pub struct DuplicateNameFilter {
    seen: HashSet<String>,
}

impl DuplicateNameFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the diagnostic for a repeated name, or `None` if the record is accepted.
    pub fn check(&mut self, entry: &FastaEntry) -> Option<RefgetError> {
        let name = &entry.record.metadata().name;
        if self.seen.insert(name.clone()) {
            return None;
        }
        warn!(
            "Duplicate sequence name '{}' at line {}; keeping the first occurrence",
            name, entry.header_line
        );
        Some(RefgetError::DuplicateIdentifier {
            name: name.clone(),
            line: entry.header_line,
        })
    }
}

/// Result of parsing a whole FASTA stream.
#[derive(Debug)]
pub struct ParsedFasta {
    pub collection: SequenceCollection,
    /// One `DuplicateIdentifier` per record skipped in strict mode.
    pub diagnostics: Vec<RefgetError>,
}

/// Parses every record of `reader` into a collection, applying the duplicate
/// policy of `options`.
pub fn parse_fasta_reader<R: BufRead>(
    reader: R,
    options: FastaOptions,
    keep_sequence: bool,
    track_fai: bool,
    file_path: Option<PathBuf>,
) -> Result<ParsedFasta> {
    let mut filter = DuplicateNameFilter::new();
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    for entry in FastaReader::new(reader, options, keep_sequence, track_fai) {
        let entry = entry?;
        if options.strict {
            if let Some(duplicate) = filter.check(&entry) {
                diagnostics.push(duplicate);
                continue;
            }
        }
        records.push(entry.record);
    }

    Ok(ParsedFasta {
        collection: SequenceCollection::from_records(records, file_path),
        diagnostics,
    })
}

fn parse_fasta_bytes(bytes: &[u8], options: FastaOptions, keep_sequence: bool) -> Result<ParsedFasta> {
    let (reader, is_gzipped) = auto_decompress(Cursor::new(bytes.to_vec()))?;
    parse_fasta_reader(reader, options, keep_sequence, !is_gzipped, None)
}

/// Digest FASTA content held in memory (plain or gzipped). Records are Stubs.
pub fn digest_fasta_bytes(bytes: &[u8]) -> Result<SequenceCollection> {
    Ok(parse_fasta_bytes(bytes, FastaOptions::default(), false)?.collection)
}

/// Like [`digest_fasta_bytes`] but keeps raw payloads in Full records.
pub fn load_fasta_bytes(bytes: &[u8]) -> Result<SequenceCollection> {
    Ok(parse_fasta_bytes(bytes, FastaOptions::default(), true)?.collection)
}
