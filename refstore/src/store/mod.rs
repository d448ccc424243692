//! A content-addressed store of sequences and sequence collections.
//!
//! Sequences are keyed by their sha512t24u digest, so identical content read from
//! differently named files is stored once. Collections keep the ordered list of
//! member digests and names. Records are either Full (payload in memory) or Stub
//! (payload in the backing directory or at a remote source); reads upgrade Stubs
//! transparently.

mod export;
mod persistence;

pub use export::{RetrievedSequence, SubstringsFromRegions};
pub use persistence::{RemoteOptions, StoreManifest};

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::info;

use crate::digest::fasta::{DuplicateNameFilter, FastaEntry, FastaOptions, FastaReader};
use crate::digest::types::{
    SequenceCollection, SequenceCollectionMetadata, SequenceCollectionRecord, SequenceMetadata,
    SequenceRecord, StorageMode,
};
use crate::errors::{RefgetError, Result};
use crate::fasta::open_fasta;
use crate::hashkeyable::{key_to_digest_string, HashKeyable};
use persistence::RemoteSource;

/// File extensions picked up by [`RefgetStore::add_sequence_collections_from_dir`].
const FASTA_EXTENSIONS: [&str; 8] = [
    ".fa", ".fasta", ".fna", ".fas", ".fa.gz", ".fasta.gz", ".fna.gz", ".fas.gz",
];

/// Outcome of ingesting one FASTA file.
#[derive(Debug)]
pub struct IngestReport {
    pub collection_digest: String,
    pub n_sequences: usize,
    /// Sequences whose content was not already in the store.
    pub n_new_sequences: usize,
    /// The collection digest was already present, so nothing changed.
    pub already_present: bool,
    /// One `DuplicateIdentifier` per record rejected in strict mode.
    pub diagnostics: Vec<RefgetError>,
}

/// Counts describing a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub n_sequences: usize,
    pub n_sequences_loaded: usize,
    pub n_collections: usize,
    pub n_collections_loaded: usize,
    pub total_length: usize,
    pub mode: StorageMode,
    pub persisting: bool,
}

/// Store handling cross-collection sequence management.
///
/// Holds a global sequence map, so that sequences are deduplicated across
/// collections, and a collection map for lookup by collection + name.
///
/// All operations that may load data take `&mut self`; share a store across
/// threads by wrapping it in a `Mutex`.
#[derive(Debug)]
pub struct RefgetStore {
    /// sha512t24u digest -> SequenceRecord (metadata + optional payload)
    sequence_store: HashMap<[u8; 32], SequenceRecord>,
    /// MD5 digest -> sha512t24u digest
    md5_lookup: HashMap<[u8; 32], [u8; 32]>,
    /// Collection digest -> {name -> sha512t24u digest}, for loaded collections
    name_lookup: HashMap<[u8; 32], HashMap<String, [u8; 32]>>,
    /// Collection digest -> collection
    collections: HashMap<[u8; 32], SequenceCollectionRecord>,
    /// Layout of in-memory payloads
    mode: StorageMode,
    /// Backing directory (local store or remote cache)
    local_path: Option<PathBuf>,
    /// Description of the backing directory; payloads on disk use its mode
    manifest: Option<StoreManifest>,
    /// Where to fetch files missing from `local_path`
    remote: Option<RemoteSource>,
    /// Write new data through to `local_path`
    persist_to_disk: bool,
    /// Keep fetched payloads in `local_path`
    cache_to_disk: bool,
    quiet: bool,
}

/// Fixed-size map key for a digest, or `None` if the string cannot be one.
pub(crate) fn digest_key(digest: &str) -> Option<[u8; 32]> {
    (!digest.is_empty() && digest.len() <= 32).then(|| digest.to_key())
}

fn build_name_map(members: &[SequenceRecord]) -> HashMap<String, [u8; 32]> {
    let mut names = HashMap::with_capacity(members.len());
    for member in members {
        let metadata = member.metadata();
        names
            .entry(metadata.name.clone())
            .or_insert_with(|| metadata.sha512t24u.to_key());
    }
    names
}

impl RefgetStore {
    /// Creates a new, empty, memory-only store.
    pub fn new(mode: StorageMode) -> Self {
        RefgetStore {
            sequence_store: HashMap::new(),
            md5_lookup: HashMap::new(),
            name_lookup: HashMap::new(),
            collections: HashMap::new(),
            mode,
            local_path: None,
            manifest: None,
            remote: None,
            persist_to_disk: false,
            cache_to_disk: false,
            quiet: false,
        }
    }

    /// An empty in-memory store keeping payloads bit-packed.
    pub fn in_memory() -> Self {
        Self::new(StorageMode::Encoded)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Suppress progress logging.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn remote_source(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.url.as_str())
    }

    pub fn is_persisting(&self) -> bool {
        self.persist_to_disk
    }

    /// Switch the in-memory layout.
    ///
    /// Loaded payloads are converted in place; Stubs are untouched and load in
    /// the new mode later. Payloads already on disk keep the backing directory's
    /// mode.
    pub fn set_mode(&mut self, mode: StorageMode) {
        if mode == self.mode {
            return;
        }
        for record in self.sequence_store.values_mut() {
            record.convert_mode(mode);
        }
        if !self.quiet {
            info!("Storage mode changed from {} to {}", self.mode, mode);
        }
        self.mode = mode;
    }

    pub fn enable_encoding(&mut self) {
        self.set_mode(StorageMode::Encoded);
    }

    pub fn disable_encoding(&mut self) {
        self.set_mode(StorageMode::Raw);
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest a FASTA file (plain or gzipped) with strict header parsing.
    pub fn add_sequence_collection_from_fasta<P: AsRef<Path>>(
        &mut self,
        file_path: P,
    ) -> Result<IngestReport> {
        self.add_sequence_collection_from_fasta_with_options(file_path, FastaOptions::default())
    }

    pub fn add_sequence_collection_from_fasta_with_options<P: AsRef<Path>>(
        &mut self,
        file_path: P,
        options: FastaOptions,
    ) -> Result<IngestReport> {
        let file_path = file_path.as_ref();
        if !self.quiet {
            info!("Loading FASTA file {}", file_path.display());
        }
        let reader = open_fasta(file_path, options, true)?;
        self.ingest_entries(reader, options, Some(file_path.to_path_buf()))
    }

    /// Ingest FASTA records from an already-open, uncompressed reader.
    pub fn add_sequence_collection_from_reader<R: BufRead>(
        &mut self,
        reader: R,
        options: FastaOptions,
    ) -> Result<IngestReport> {
        self.ingest_entries(FastaReader::new(reader, options, true, false), options, None)
    }

    /// Ingest every FASTA file in a directory, in file-name order.
    pub fn add_sequence_collections_from_dir<P: AsRef<Path>>(
        &mut self,
        dir: P,
    ) -> Result<Vec<IngestReport>> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(RefgetError::backing_io(dir))? {
            let path = entry.map_err(RefgetError::backing_io(dir))?.path();
            let is_fasta = path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                    FASTA_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
                });
            if is_fasta {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .iter()
            .map(|path| self.add_sequence_collection_from_fasta(path))
            .collect()
    }

    /// Add a collection built elsewhere, e.g. with [`load_fasta`](crate::fasta::load_fasta).
    ///
    /// Every member must either carry its payload or already be in the store.
    pub fn add_sequence_collection(&mut self, collection: SequenceCollection) -> Result<IngestReport> {
        let file_path = collection.metadata.file_path.clone();
        let entries = collection
            .sequences
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                Ok(FastaEntry {
                    record,
                    header_line: index + 1,
                })
            });
        // Names were fixed when the collection was built; keep duplicates as-is.
        self.ingest_entries(entries, FastaOptions::LENIENT, file_path)
    }

    /// Shared ingestion path: insert each accepted record, then register the
    /// collection. On error, sequences added so far are removed again.
    fn ingest_entries<I>(
        &mut self,
        entries: I,
        options: FastaOptions,
        file_path: Option<PathBuf>,
    ) -> Result<IngestReport>
    where
        I: IntoIterator<Item = Result<FastaEntry>>,
    {
        let mut filter = DuplicateNameFilter::new();
        let mut diagnostics = Vec::new();
        let mut members = Vec::new();
        let mut new_keys = Vec::new();

        let outcome = (|| -> Result<()> {
            for entry in entries {
                let entry = entry?;
                if options.strict {
                    if let Some(duplicate) = filter.check(&entry) {
                        diagnostics.push(duplicate);
                        continue;
                    }
                }
                let metadata = entry.record.metadata().clone();
                if let Some(key) = self.insert_sequence(entry.record)? {
                    new_keys.push(key);
                }
                members.push(SequenceRecord::Stub(metadata));
            }
            Ok(())
        })();

        if let Err(e) = outcome {
            self.remove_sequences(&new_keys);
            return Err(e);
        }

        let collection = SequenceCollection::from_records(members, file_path);
        let key = collection.metadata.digest.to_key();
        let mut report = IngestReport {
            collection_digest: collection.metadata.digest.clone(),
            n_sequences: collection.len(),
            n_new_sequences: new_keys.len(),
            already_present: false,
            diagnostics,
        };

        if self.collections.contains_key(&key) {
            if !self.quiet {
                info!("Collection {} is already in the store", report.collection_digest);
            }
            report.already_present = true;
            return Ok(report);
        }

        self.name_lookup.insert(key, build_name_map(&collection.sequences));
        self.collections
            .insert(key, SequenceCollectionRecord::from(collection));

        if self.persist_to_disk {
            if let Err(e) = self.write_through(&key, &new_keys) {
                self.collections.remove(&key);
                self.name_lookup.remove(&key);
                self.remove_sequences(&new_keys);
                return Err(e);
            }
        }

        if !self.quiet {
            info!(
                "Added collection {} ({} sequences, {} new)",
                report.collection_digest, report.n_sequences, report.n_new_sequences
            );
        }
        Ok(report)
    }

    /// Inserts a sequence unless its digest is already present. Returns the key
    /// if it was new.
    fn insert_sequence(&mut self, record: SequenceRecord) -> Result<Option<[u8; 32]>> {
        let key = record.metadata().sha512t24u.to_key();
        if self.sequence_store.contains_key(&key) {
            return Ok(None);
        }
        if !record.is_loaded() {
            return Err(RefgetError::NoBacking(record.metadata().sha512t24u.clone()));
        }
        self.md5_lookup.insert(record.metadata().md5.to_key(), key);
        self.sequence_store.insert(key, record.into_mode(self.mode));
        Ok(Some(key))
    }

    fn remove_sequences(&mut self, keys: &[[u8; 32]]) {
        for key in keys {
            if let Some(record) = self.sequence_store.remove(key) {
                self.md5_lookup.remove(&record.metadata().md5.to_key());
            }
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Digests of every stored sequence.
    pub fn sequence_digests(&self) -> impl Iterator<Item = String> + '_ {
        self.sequence_store.keys().map(key_to_digest_string)
    }

    /// Metadata of every stored sequence, without loading payloads.
    pub fn sequence_metadata(&self) -> impl Iterator<Item = &SequenceMetadata> + '_ {
        self.sequence_store.values().map(|record| record.metadata())
    }

    pub fn contains_sequence(&self, digest: &str) -> bool {
        digest_key(digest).is_some_and(|key| self.sequence_store.contains_key(&key))
    }

    pub fn contains_collection(&self, digest: &str) -> bool {
        digest_key(digest).is_some_and(|key| self.collections.contains_key(&key))
    }

    /// Summaries of every collection, ordered by digest.
    pub fn list_collections(&self) -> Vec<&SequenceCollectionMetadata> {
        let mut collections: Vec<&SequenceCollectionMetadata> =
            self.collections.values().map(|c| c.metadata()).collect();
        collections.sort_by(|a, b| a.digest.cmp(&b.digest));
        collections
    }

    pub fn get_collection_metadata(&self, digest: &str) -> Result<&SequenceCollectionMetadata> {
        digest_key(digest)
            .and_then(|key| self.collections.get(&key))
            .map(|record| record.metadata())
            .ok_or_else(|| RefgetError::CollectionNotFound(digest.to_string()))
    }

    /// The collection with its ordered member list, loading it if needed.
    pub fn get_collection(&mut self, digest: &str) -> Result<&SequenceCollectionRecord> {
        let key = self.collection_key(digest)?;
        self.ensure_collection_loaded(&key)?;
        self.collections
            .get(&key)
            .ok_or_else(|| RefgetError::CollectionNotFound(digest.to_string()))
    }

    /// A standalone copy of a collection with every member's payload loaded.
    ///
    /// Member records carry the names used in this collection.
    pub fn load_collection_sequences(&mut self, digest: &str) -> Result<SequenceCollection> {
        let key = self.collection_key(digest)?;
        let (metadata, members) = self.collection_members(&key)?;

        let store_mode = self.mode;
        let mut sequences = Vec::with_capacity(members.len());
        for member in members {
            let member_key = member.sha512t24u.to_key();
            let record = self.loaded_sequence(&member_key)?;
            let payload = record.sequence().map(<[u8]>::to_vec).unwrap_or_default();
            let mode = record.mode().unwrap_or(store_mode);
            sequences.push(SequenceRecord::Full {
                metadata: member,
                sequence: payload,
                mode,
            });
        }
        Ok(SequenceCollection {
            metadata,
            sequences,
        })
    }

    /// Metadata of a sequence, without loading its payload.
    pub fn get_sequence_metadata(&self, digest: &str) -> Result<&SequenceMetadata> {
        digest_key(digest)
            .and_then(|key| self.sequence_store.get(&key))
            .map(|record| record.metadata())
            .ok_or_else(|| RefgetError::SequenceNotFound(digest.to_string()))
    }

    /// A sequence by sha512t24u digest, with its payload loaded.
    pub fn get_sequence(&mut self, digest: &str) -> Result<&SequenceRecord> {
        let key = digest_key(digest)
            .filter(|key| self.sequence_store.contains_key(key))
            .ok_or_else(|| RefgetError::SequenceNotFound(digest.to_string()))?;
        self.loaded_sequence(&key)
    }

    /// A sequence by MD5 digest, with its payload loaded.
    pub fn get_sequence_by_md5(&mut self, md5: &str) -> Result<&SequenceRecord> {
        let key = digest_key(md5)
            .and_then(|key| self.md5_lookup.get(&key).copied())
            .ok_or_else(|| RefgetError::SequenceNotFound(md5.to_string()))?;
        self.loaded_sequence(&key)
    }

    /// A sequence by its name within a collection, with its payload loaded.
    ///
    /// The returned record's metadata is the store-wide record for that content;
    /// its name is whichever name the content was first ingested under.
    pub fn get_sequence_by_collection_and_name(
        &mut self,
        collection_digest: &str,
        name: &str,
    ) -> Result<&SequenceRecord> {
        let key = self.sequence_key_by_name(collection_digest, name)?;
        self.loaded_sequence(&key)
    }

    pub(crate) fn collection_key(&self, digest: &str) -> Result<[u8; 32]> {
        digest_key(digest)
            .filter(|key| self.collections.contains_key(key))
            .ok_or_else(|| RefgetError::CollectionNotFound(digest.to_string()))
    }

    pub(crate) fn sequence_key_by_name(
        &mut self,
        collection_digest: &str,
        name: &str,
    ) -> Result<[u8; 32]> {
        let collection_key = self.collection_key(collection_digest)?;
        self.ensure_collection_loaded(&collection_key)?;
        self.name_lookup
            .get(&collection_key)
            .and_then(|names| names.get(name))
            .copied()
            .ok_or_else(|| RefgetError::NameNotFound {
                collection: collection_digest.to_string(),
                name: name.to_string(),
            })
    }

    /// Collection summary plus member metadata, loading the collection if needed.
    pub(crate) fn collection_members(
        &mut self,
        key: &[u8; 32],
    ) -> Result<(SequenceCollectionMetadata, Vec<SequenceMetadata>)> {
        self.ensure_collection_loaded(key)?;
        let record = self
            .collections
            .get(key)
            .ok_or_else(|| RefgetError::CollectionNotFound(key_to_digest_string(key)))?;
        let members = record
            .sequences()
            .unwrap_or_default()
            .iter()
            .map(|member| member.metadata().clone())
            .collect();
        Ok((record.metadata().clone(), members))
    }

    pub(crate) fn loaded_sequence(&mut self, key: &[u8; 32]) -> Result<&SequenceRecord> {
        self.ensure_sequence_loaded(key)?;
        self.sequence_store
            .get(key)
            .ok_or_else(|| RefgetError::SequenceNotFound(key_to_digest_string(key)))
    }

    /// Returns statistics about the store.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            n_sequences: self.sequence_store.len(),
            n_sequences_loaded: self.sequence_store.values().filter(|r| r.is_loaded()).count(),
            n_collections: self.collections.len(),
            n_collections_loaded: self.collections.values().filter(|c| c.is_loaded()).count(),
            total_length: self.sequence_store.values().map(|r| r.metadata().length).sum(),
            mode: self.mode,
            persisting: self.persist_to_disk,
        }
    }
}

impl Default for RefgetStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Display for RefgetStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        writeln!(f, "RefgetStore ({} mode):", stats.mode)?;
        if let Some(path) = &self.local_path {
            writeln!(
                f,
                "  Backing: {}{}",
                path.display(),
                if self.persist_to_disk { "" } else { " (read-only)" }
            )?;
        }
        if let Some(url) = self.remote_source() {
            writeln!(f, "  Remote: {}", url)?;
        }
        writeln!(
            f,
            ">Sequences (n={}, loaded={}):",
            stats.n_sequences, stats.n_sequences_loaded
        )?;
        let mut records: Vec<&SequenceRecord> = self.sequence_store.values().collect();
        records.sort_by(|a, b| a.metadata().sha512t24u.cmp(&b.metadata().sha512t24u));
        for (i, record) in records.iter().take(10).enumerate() {
            let metadata = record.metadata();
            let preview = match record.substring(0, 8) {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => "<stub>".to_string(),
            };
            writeln!(
                f,
                "   - {}. {}, MD5: {}, Length: {}, Alphabet: {}, Start: {}",
                i + 1,
                metadata.sha512t24u,
                metadata.md5,
                metadata.length,
                metadata.alphabet,
                preview
            )?;
        }
        writeln!(f, ">Collections (n={}):", stats.n_collections)?;
        for (i, metadata) in self.list_collections().iter().enumerate() {
            writeln!(
                f,
                "  {}. Collection Digest: {} ({} sequences)",
                i + 1,
                metadata.digest,
                metadata.n_sequences
            )?;
        }
        Ok(())
    }
}
