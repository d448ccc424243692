//! Backing directory for a [`RefgetStore`]: opening, write-through, lazy loading
//! and remote fetching.
//!
//! Layout under the store root:
//!
//! ```text
//! store.json                    manifest (StoreManifest)
//! sequences.index               one row per sequence, sorted by digest
//! collections.index             one row per collection, sorted by digest
//! collections/<digest>.index    members of one collection, in order
//! sequences/<xx>/<digest>.bin   payload, in the manifest's mode
//! ```

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{build_name_map, digest_key, RefgetStore};
use crate::collection::{
    read_collection_index, read_collections_index, read_sequence_index, write_collection_index,
    write_collections_index, write_sequence_index,
};
use crate::digest::types::{
    convert_payload, SequenceCollectionMetadata, SequenceCollectionRecord, SequenceMetadata,
    SequenceRecord, StorageMode,
};
use crate::errors::{RefgetError, Result};
use crate::hashkeyable::{key_to_digest_string, HashKeyable};

const MANIFEST_FILE: &str = "store.json";
const LOCK_FILE: &str = ".lock";
const MANIFEST_VERSION: u32 = 1;

/// Contents of `store.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: u32,
    /// `%s` is the digest, `%s2` / `%s4` its first 2 / 4 characters.
    pub seqdata_path_template: String,
    pub collections_path_template: String,
    pub sequence_index: String,
    pub collection_index: String,
    /// Layout of every payload file.
    pub mode: StorageMode,
    pub created_at: DateTime<Utc>,
}

impl StoreManifest {
    pub fn new(mode: StorageMode) -> Self {
        StoreManifest {
            version: MANIFEST_VERSION,
            seqdata_path_template: "sequences/%s2/%s.bin".to_string(),
            collections_path_template: "collections/%s.index".to_string(),
            sequence_index: "sequences.index".to_string(),
            collection_index: "collections.index".to_string(),
            mode,
            created_at: Utc::now(),
        }
    }

    /// Payload path of a sequence, relative to the store root.
    pub fn sequence_path(&self, digest: &str) -> String {
        expand_template(&self.seqdata_path_template, digest)
    }

    /// Index path of a collection, relative to the store root.
    pub fn collection_path(&self, digest: &str) -> String {
        expand_template(&self.collections_path_template, digest)
    }
}

fn expand_template(template: &str, digest: &str) -> String {
    template
        .replace("%s2", digest.get(0..2).unwrap_or(digest))
        .replace("%s4", digest.get(0..4).unwrap_or(digest))
        .replace("%s", digest)
}

/// Settings for [`RefgetStore::open_remote_with_options`].
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Applies to connecting and to reading each response.
    pub timeout: Duration,
    /// Keep fetched payloads in the cache directory. Index files are always kept.
    pub cache_to_disk: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        RemoteOptions {
            timeout: Duration::from_secs(30),
            cache_to_disk: true,
        }
    }
}

/// A read-only store published over HTTP.
pub(super) struct RemoteSource {
    pub(super) url: String,
    #[cfg(feature = "http")]
    agent: ureq::Agent,
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource").field("url", &self.url).finish()
    }
}

impl RemoteSource {
    fn new(url: &str, options: &RemoteOptions) -> Self {
        #[cfg(not(feature = "http"))]
        let _ = options;
        RemoteSource {
            url: url.trim_end_matches('/').to_string(),
            #[cfg(feature = "http")]
            agent: ureq::AgentBuilder::new().timeout(options.timeout).build(),
        }
    }

    fn url_for(&self, relative_path: &str) -> String {
        format!("{}/{}", self.url, relative_path)
    }

    #[cfg(feature = "http")]
    fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
        use std::io::Read;

        let url = self.url_for(relative_path);
        debug!("Fetching {}", url);
        let response = self.agent.get(&url).call().map_err(|e| RefgetError::Remote {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let mut data = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut data)
            .map_err(|e| RefgetError::Remote {
                url,
                message: e.to_string(),
            })?;
        Ok(data)
    }

    #[cfg(not(feature = "http"))]
    fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
        Err(RefgetError::Remote {
            url: self.url_for(relative_path),
            message: "built without the `http` feature".to_string(),
        })
    }
}

/// Exclusive advisory lock on `<root>/.lock`, released on drop.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(RefgetError::backing_io(&path))?;
        FileExt::lock_exclusive(&file).map_err(RefgetError::backing_io(&path))?;
        Ok(StoreLock { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Writes `path` through a sibling temporary file that is renamed into place.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(RefgetError::backing_io(parent))?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{}.tmp", file_name));

    let file = File::create(&tmp_path).map_err(RefgetError::backing_io(&tmp_path))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(RefgetError::backing_io(&tmp_path))?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(RefgetError::backing_io(path))
}

/// Writes a Full record's payload in the manifest's mode, unless the file exists.
/// Returns true if a file was written.
fn write_payload(root: &Path, manifest: &StoreManifest, record: &SequenceRecord) -> Result<bool> {
    let SequenceRecord::Full {
        metadata,
        sequence,
        mode,
    } = record
    else {
        return Ok(false);
    };
    let path = root.join(manifest.sequence_path(&metadata.sha512t24u));
    if path.exists() {
        return Ok(false);
    }
    debug!("Writing payload {}", path.display());
    if *mode == manifest.mode {
        write_atomic(&path, |w| w.write_all(sequence))?;
    } else {
        let converted = convert_payload(sequence.clone(), metadata, *mode, manifest.mode);
        write_atomic(&path, |w| w.write_all(&converted))?;
    }
    Ok(true)
}

fn read_manifest(bytes: &[u8]) -> Result<StoreManifest> {
    Ok(serde_json::from_slice(bytes)?)
}

impl RefgetStore {
    // ========================================================================
    // Opening
    // ========================================================================

    /// Open the store in `path`, or start a new persistent store there if the
    /// directory holds none.
    pub fn on_disk<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();
        if root.join(MANIFEST_FILE).exists() {
            let mut store = Self::open_local(root)?;
            store.persist_to_disk = true;
            Ok(store)
        } else {
            let mut store = Self::in_memory();
            store.enable_persistence(root)?;
            Ok(store)
        }
    }

    /// Open an existing store directory read-only. Only metadata is read; payloads
    /// and collection member lists load on first use.
    ///
    /// Fails with `Consistency` if `collections.index` and the collection files on
    /// disk disagree.
    pub fn open_local<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = read_manifest(
            &fs::read(&manifest_path).map_err(RefgetError::backing_io(&manifest_path))?,
        )?;

        let mut store = RefgetStore::new(manifest.mode);
        let sequence_index = root.join(&manifest.sequence_index);
        let bytes = fs::read(&sequence_index).map_err(RefgetError::backing_io(&sequence_index))?;
        store.load_sequence_index(&bytes, &sequence_index)?;
        let collection_index = root.join(&manifest.collection_index);
        let bytes =
            fs::read(&collection_index).map_err(RefgetError::backing_io(&collection_index))?;
        store.load_collections_index(&bytes, &collection_index)?;
        store.check_collection_files(root, &manifest)?;

        store.local_path = Some(root.to_path_buf());
        store.cache_to_disk = true;
        store.manifest = Some(manifest);
        info!(
            "Opened store {} ({} sequences, {} collections)",
            root.display(),
            store.sequence_store.len(),
            store.collections.len()
        );
        Ok(store)
    }

    /// Open a store published at `url`, caching into `cache_dir`.
    pub fn open_remote<P: AsRef<Path>>(cache_dir: P, url: &str) -> Result<Self> {
        Self::open_remote_with_options(cache_dir, url, RemoteOptions::default())
    }

    /// Like [`open_remote`](Self::open_remote). The manifest and index files are
    /// always fetched fresh and cached; payloads are cached when
    /// `options.cache_to_disk` is set.
    pub fn open_remote_with_options<P: AsRef<Path>>(
        cache_dir: P,
        url: &str,
        options: RemoteOptions,
    ) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        fs::create_dir_all(cache_dir).map_err(RefgetError::backing_io(cache_dir))?;
        let remote = RemoteSource::new(url, &options);

        let fetch_and_cache = |relative_path: &str| -> Result<(Vec<u8>, PathBuf)> {
            let data = remote.fetch(relative_path)?;
            let path = cache_dir.join(relative_path);
            write_atomic(&path, |w| w.write_all(&data))?;
            Ok((data, path))
        };

        let (manifest_bytes, _) = fetch_and_cache(MANIFEST_FILE)?;
        let manifest = read_manifest(&manifest_bytes)?;
        let (sequence_index, sequence_index_path) = fetch_and_cache(&manifest.sequence_index)?;
        let (collection_index, collection_index_path) =
            fetch_and_cache(&manifest.collection_index)?;

        let mut store = RefgetStore::new(manifest.mode);
        store.load_sequence_index(&sequence_index, &sequence_index_path)?;
        store.load_collections_index(&collection_index, &collection_index_path)?;

        info!(
            "Opened remote store {} ({} sequences, {} collections)",
            remote.url,
            store.sequence_store.len(),
            store.collections.len()
        );
        store.local_path = Some(cache_dir.to_path_buf());
        store.cache_to_disk = options.cache_to_disk;
        store.manifest = Some(manifest);
        store.remote = Some(remote);
        Ok(store)
    }

    fn load_sequence_index(&mut self, bytes: &[u8], path: &Path) -> Result<()> {
        for metadata in read_sequence_index(bytes, path)? {
            let key = metadata.sha512t24u.to_key();
            self.md5_lookup.insert(metadata.md5.to_key(), key);
            self.sequence_store.insert(key, SequenceRecord::Stub(metadata));
        }
        Ok(())
    }

    fn load_collections_index(&mut self, bytes: &[u8], path: &Path) -> Result<()> {
        for metadata in read_collections_index(bytes, path)? {
            self.collections
                .insert(metadata.digest.to_key(), SequenceCollectionRecord::Stub(metadata));
        }
        Ok(())
    }

    /// Every listed collection has a file, and every collection file is listed.
    fn check_collection_files(&self, root: &Path, manifest: &StoreManifest) -> Result<()> {
        let mut expected = HashSet::new();
        for record in self.collections.values() {
            let path = root.join(manifest.collection_path(&record.metadata().digest));
            if !path.is_file() {
                warn!("Collection file {} is missing", path.display());
                return Err(RefgetError::Consistency(format!(
                    "collection {} is listed in {} but {} is missing",
                    record.metadata().digest,
                    manifest.collection_index,
                    path.display()
                )));
            }
            expected.insert(path);
        }

        let probe = root.join(manifest.collection_path("x"));
        let Some(collections_dir) = probe.parent().filter(|dir| dir.is_dir()) else {
            return Ok(());
        };
        let extension = probe.extension();
        for entry in fs::read_dir(collections_dir).map_err(RefgetError::backing_io(collections_dir))? {
            let path = entry.map_err(RefgetError::backing_io(collections_dir))?.path();
            if path.is_file() && path.extension() == extension && !expected.contains(&path) {
                warn!("Collection file {} is not listed", path.display());
                return Err(RefgetError::Consistency(format!(
                    "{} is not listed in {}",
                    path.display(),
                    manifest.collection_index
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lazy loading
    // ========================================================================

    /// Reads a file from the backing directory, or from the remote source if it is
    /// not there. Remote data is kept locally when `cache` is set.
    fn fetch_file(&self, relative_path: &str, cache: bool) -> Result<Vec<u8>> {
        let local = self.local_path.as_ref().map(|root| root.join(relative_path));

        match (&local, &self.remote) {
            (Some(path), _) if path.is_file() => {
                debug!("Reading {}", path.display());
                fs::read(path).map_err(RefgetError::backing_io(path))
            }
            (_, Some(remote)) => {
                let data = remote.fetch(relative_path)?;
                if let (true, Some(path)) = (cache, &local) {
                    write_atomic(path, |w| w.write_all(&data))?;
                }
                Ok(data)
            }
            (Some(path), None) => fs::read(path).map_err(RefgetError::backing_io(path)),
            (None, None) => Err(RefgetError::NoBacking(relative_path.to_string())),
        }
    }

    /// True when the backing directory holds this collection's file.
    fn has_collection_file(&self, digest: &str) -> bool {
        match (&self.local_path, &self.manifest) {
            (Some(root), Some(manifest)) => root.join(manifest.collection_path(digest)).is_file(),
            _ => false,
        }
    }

    /// Turns a sequence Stub into a Full record in the store's mode.
    pub(super) fn ensure_sequence_loaded(&mut self, key: &[u8; 32]) -> Result<()> {
        let record = self
            .sequence_store
            .get(key)
            .ok_or_else(|| RefgetError::SequenceNotFound(key_to_digest_string(key)))?;
        if record.is_loaded() {
            return Ok(());
        }
        let metadata = record.metadata().clone();
        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| RefgetError::NoBacking(metadata.sha512t24u.clone()))?;
        let disk_mode = manifest.mode;

        let payload = self.fetch_file(&manifest.sequence_path(&metadata.sha512t24u), self.cache_to_disk)?;
        let expected = metadata.payload_size(disk_mode);
        if payload.len() != expected {
            warn!(
                "Payload of {} has {} bytes, expected {}",
                metadata.sha512t24u,
                payload.len(),
                expected
            );
            return Err(RefgetError::CorruptPayload {
                digest: metadata.sha512t24u,
                expected,
                found: payload.len(),
            });
        }

        let mode = self.mode;
        let payload = convert_payload(payload, &metadata, disk_mode, mode);
        if let Some(record) = self.sequence_store.get_mut(key) {
            record.load_data(payload, mode);
        }
        Ok(())
    }

    /// Reads a collection's member list and checks it against the summary the
    /// store already holds.
    fn read_collection_file(&self, key: &[u8; 32]) -> Result<Vec<SequenceRecord>> {
        let expected = self
            .collections
            .get(key)
            .ok_or_else(|| RefgetError::CollectionNotFound(key_to_digest_string(key)))?
            .metadata();
        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| RefgetError::NoBacking(expected.digest.clone()))?;

        let relative_path = manifest.collection_path(&expected.digest);
        let data = self.fetch_file(&relative_path, true)?;
        let path = match &self.local_path {
            Some(root) => root.join(&relative_path),
            None => PathBuf::from(&relative_path),
        };
        let collection = read_collection_index(data.as_slice(), &path)?;

        if !collection.metadata.same_contents(expected) {
            warn!("Collection file {} does not match its index entry", path.display());
            return Err(RefgetError::Consistency(format!(
                "{} holds collection {} ({} sequences) but {} lists {} ({} sequences)",
                path.display(),
                collection.metadata.digest,
                collection.metadata.n_sequences,
                manifest.collection_index,
                expected.digest,
                expected.n_sequences
            )));
        }
        if let Some(missing) = collection
            .sequences
            .iter()
            .map(|member| member.metadata())
            .find(|member| !self.sequence_store.contains_key(&member.sha512t24u.to_key()))
        {
            return Err(RefgetError::Consistency(format!(
                "collection {} references sequence {} which is not in {}",
                expected.digest, missing.sha512t24u, manifest.sequence_index
            )));
        }
        Ok(collection.sequences)
    }

    /// Turns a collection Stub into a Full record and builds its name index.
    pub(super) fn ensure_collection_loaded(&mut self, key: &[u8; 32]) -> Result<()> {
        let record = self
            .collections
            .get(key)
            .ok_or_else(|| RefgetError::CollectionNotFound(key_to_digest_string(key)))?;
        if record.is_loaded() {
            return Ok(());
        }

        let members = self.read_collection_file(key)?;
        self.name_lookup.insert(*key, build_name_map(&members));
        if let Some(record) = self.collections.remove(key) {
            self.collections.insert(*key, record.with_sequences(members));
        }
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist the store to `path` and write through every later ingest.
    ///
    /// Full records are written out and downgraded to Stubs. A directory holding a
    /// different store is refused; re-enabling the store's own directory writes
    /// whatever was ingested in the meantime.
    pub fn enable_persistence<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let root = path.as_ref();
        if let Some(remote) = &self.remote {
            return Err(RefgetError::InvalidOperation(format!(
                "store is backed by remote source {} and cannot persist locally",
                remote.url
            )));
        }

        let same_dir = self.local_path.as_deref() == Some(root);
        if !same_dir {
            if root.join(MANIFEST_FILE).exists() {
                return Err(RefgetError::InvalidOperation(format!(
                    "{} already holds a store",
                    root.display()
                )));
            }
            if self.local_path.is_some() {
                self.materialize_all()?;
            }
        }

        let manifest = match (&self.manifest, same_dir) {
            (Some(manifest), true) => manifest.clone(),
            _ => StoreManifest::new(self.mode),
        };
        fs::create_dir_all(root).map_err(RefgetError::backing_io(root))?;
        let _lock = StoreLock::acquire(root)?;

        let mut written = 0;
        for record in self.sequence_store.values() {
            if write_payload(root, &manifest, record)? {
                written += 1;
            }
        }
        for record in self.collections.values() {
            if let SequenceCollectionRecord::Full {
                metadata,
                sequences,
            } = record
            {
                let path = root.join(manifest.collection_path(&metadata.digest));
                write_atomic(&path, |w| write_collection_index(w, metadata, sequences))?;
            }
        }
        self.write_indexes(root, &manifest)?;
        let manifest_path = root.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        write_atomic(&manifest_path, |w| w.write_all(json.as_bytes()))?;

        for record in self.sequence_store.values_mut() {
            record.unload();
        }
        let keys: Vec<[u8; 32]> = self.collections.keys().copied().collect();
        for key in keys {
            if let Some(record) = self.collections.remove(&key) {
                self.collections.insert(key, record.to_stub());
            }
        }
        self.name_lookup.clear();

        self.local_path = Some(root.to_path_buf());
        self.manifest = Some(manifest);
        self.persist_to_disk = true;
        self.cache_to_disk = true;
        if !self.quiet {
            info!(
                "Persisting store to {} ({} payloads written)",
                root.display(),
                written
            );
        }
        Ok(())
    }

    /// Stop writing new data to disk. Stubs stay readable from the backing
    /// directory.
    pub fn disable_persistence(&mut self) {
        self.persist_to_disk = false;
    }

    fn materialize_all(&mut self) -> Result<()> {
        let keys: Vec<[u8; 32]> = self.collections.keys().copied().collect();
        for key in &keys {
            self.ensure_collection_loaded(key)?;
        }
        let keys: Vec<[u8; 32]> = self.sequence_store.keys().copied().collect();
        for key in &keys {
            self.ensure_sequence_loaded(key)?;
        }
        Ok(())
    }

    fn write_indexes(&self, root: &Path, manifest: &StoreManifest) -> Result<()> {
        let mut sequences: Vec<&SequenceMetadata> =
            self.sequence_store.values().map(|r| r.metadata()).collect();
        sequences.sort_by(|a, b| a.sha512t24u.cmp(&b.sha512t24u));
        write_atomic(&root.join(&manifest.sequence_index), |w| {
            write_sequence_index(w, sequences)
        })?;
        let collections = self.list_collections();
        write_atomic(&root.join(&manifest.collection_index), |w| {
            write_collections_index(w, collections)
        })
    }

    fn persistence_target(&self) -> Result<(PathBuf, StoreManifest)> {
        match (self.persist_to_disk, &self.local_path, &self.manifest) {
            (true, Some(root), Some(manifest)) => Ok((root.clone(), manifest.clone())),
            _ => Err(RefgetError::PersistenceDisabled),
        }
    }

    /// Write a freshly ingested collection and its new payloads, then drop the
    /// payloads from memory.
    pub(super) fn write_through(&mut self, key: &[u8; 32], new_keys: &[[u8; 32]]) -> Result<()> {
        let (root, manifest) = self.persistence_target()?;
        let _lock = StoreLock::acquire(&root)?;

        for sequence_key in new_keys {
            if let Some(record) = self.sequence_store.get(sequence_key) {
                write_payload(&root, &manifest, record)?;
            }
        }
        let mut collection_file = None;
        if let Some(SequenceCollectionRecord::Full {
            metadata,
            sequences,
        }) = self.collections.get(key)
        {
            let path = root.join(manifest.collection_path(&metadata.digest));
            write_atomic(&path, |w| write_collection_index(w, metadata, sequences))?;
            collection_file = Some(path);
        }
        if let Err(e) = self.write_indexes(&root, &manifest) {
            // An unlisted collection file makes the directory fail to open.
            if let Some(path) = collection_file {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        for sequence_key in new_keys {
            if let Some(record) = self.sequence_store.get_mut(sequence_key) {
                record.unload();
            }
        }
        Ok(())
    }

    /// Write any missing payloads and drop every loaded payload from memory.
    pub fn flush(&mut self) -> Result<()> {
        let (root, manifest) = self.persistence_target()?;
        let _lock = StoreLock::acquire(&root)?;
        for record in self.sequence_store.values_mut() {
            write_payload(&root, &manifest, record)?;
            record.unload();
        }
        Ok(())
    }

    /// [`flush`](Self::flush) for a single sequence.
    pub fn flush_sequence(&mut self, digest: &str) -> Result<()> {
        let (root, manifest) = self.persistence_target()?;
        let key = digest_key(digest)
            .filter(|key| self.sequence_store.contains_key(key))
            .ok_or_else(|| RefgetError::SequenceNotFound(digest.to_string()))?;
        let _lock = StoreLock::acquire(&root)?;
        if let Some(record) = self.sequence_store.get_mut(&key) {
            write_payload(&root, &manifest, record)?;
            record.unload();
        }
        Ok(())
    }

    /// Check every collection: its member list must digest to its summary and
    /// every member must be in the sequence map. Collections with a file in the
    /// backing directory are re-read from disk.
    pub fn verify(&self) -> Result<()> {
        for (key, record) in &self.collections {
            let members = match record {
                SequenceCollectionRecord::Full { sequences, .. }
                    if !self.has_collection_file(&record.metadata().digest) =>
                {
                    sequences.clone()
                }
                SequenceCollectionRecord::Full { .. } => self.read_collection_file(key)?,
                SequenceCollectionRecord::Stub(metadata) if self.manifest.is_none() => {
                    return Err(RefgetError::NoBacking(metadata.digest.clone()));
                }
                SequenceCollectionRecord::Stub(_) => self.read_collection_file(key)?,
            };
            let summary = SequenceCollectionMetadata::from_sequences(&members, None);
            if !summary.same_contents(record.metadata()) {
                return Err(RefgetError::Consistency(format!(
                    "collection {} has members digesting to {}",
                    record.metadata().digest,
                    summary.digest
                )));
            }
            if let Some(missing) = members
                .iter()
                .find(|m| !self.sequence_store.contains_key(&m.metadata().sha512t24u.to_key()))
            {
                return Err(RefgetError::Consistency(format!(
                    "collection {} references missing sequence {}",
                    record.metadata().digest,
                    missing.metadata().sha512t24u
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use tempfile::tempdir;

    const FASTA: &str = ">chrX\nTTGGGGAA\n>chr1\nGGAA\n>chr2\nGCGC\n";

    fn persisted_store(mode: StorageMode) -> (tempfile::TempDir, RefgetStore, String) {
        let dir = tempdir().unwrap();
        let mut store = RefgetStore::new(mode);
        store.set_quiet(true);
        let report = store
            .add_sequence_collection_from_reader(FASTA.as_bytes(), Default::default())
            .unwrap();
        store.enable_persistence(dir.path().join("store")).unwrap();
        (dir, store, report.collection_digest)
    }

    #[rstest]
    #[case("sequences/%s2/%s.bin", "sequences/iY/iYtREV555dUFKg2_agSJW6suquUyPpMw.bin")]
    #[case("seq/%s4/%s", "seq/iYtR/iYtREV555dUFKg2_agSJW6suquUyPpMw")]
    fn test_expand_template(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(
            expand_template(template, "iYtREV555dUFKg2_agSJW6suquUyPpMw"),
            expected
        );
    }

    #[rstest]
    fn test_manifest_round_trip() {
        let manifest = StoreManifest::new(StorageMode::Raw);
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"mode\":\"Raw\""));
        assert_eq!(read_manifest(json.as_bytes()).unwrap(), manifest);
    }

    #[rstest]
    #[case(StorageMode::Raw, 8)]
    #[case(StorageMode::Encoded, 2)]
    fn test_enable_persistence_writes_layout(#[case] mode: StorageMode, #[case] size: u64) {
        let (dir, store, digest) = persisted_store(mode);
        let root = dir.path().join("store");

        assert!(root.join("store.json").is_file());
        assert!(root.join("sequences.index").is_file());
        assert!(root.join("collections.index").is_file());
        assert!(root.join(format!("collections/{}.index", digest)).is_file());
        let payload = root.join("sequences/iY/iYtREV555dUFKg2_agSJW6suquUyPpMw.bin");
        assert_eq!(fs::metadata(payload).unwrap().len(), size);

        let stats = store.stats();
        assert_eq!(stats.n_sequences_loaded, 0);
        assert_eq!(stats.n_collections_loaded, 0);
        assert!(stats.persisting);
    }

    #[rstest]
    fn test_stub_loads_in_current_mode() {
        let (_dir, mut store, digest) = persisted_store(StorageMode::Encoded);
        store.disable_encoding();

        let record = store.get_sequence_by_collection_and_name(&digest, "chrX").unwrap();
        assert_eq!(record.mode(), Some(StorageMode::Raw));
        assert_eq!(record.sequence().unwrap(), b"TTGGGGAA");
    }

    #[rstest]
    fn test_refuse_foreign_store_directory() {
        let (dir, _store, _) = persisted_store(StorageMode::Encoded);
        let mut other = RefgetStore::in_memory();
        other.set_quiet(true);
        let err = other.enable_persistence(dir.path().join("store")).unwrap_err();
        assert!(matches!(err, RefgetError::InvalidOperation(_)));
    }

    #[rstest]
    fn test_reenable_same_directory_writes_new_data() {
        let (dir, mut store, _) = persisted_store(StorageMode::Encoded);
        store.disable_persistence();
        store
            .add_sequence_collection_from_reader(">chrM\nACGTN\n".as_bytes(), Default::default())
            .unwrap();
        assert_eq!(store.stats().n_sequences_loaded, 1);

        store.enable_persistence(dir.path().join("store")).unwrap();
        assert_eq!(store.stats().n_sequences_loaded, 0);

        let reopened = RefgetStore::open_local(dir.path().join("store")).unwrap();
        assert_eq!(reopened.stats().n_sequences, 4);
        assert_eq!(reopened.stats().n_collections, 2);
    }

    #[rstest]
    fn test_move_to_new_directory() {
        let (dir, mut store, digest) = persisted_store(StorageMode::Encoded);
        store.enable_persistence(dir.path().join("moved")).unwrap();

        let mut reopened = RefgetStore::open_local(dir.path().join("moved")).unwrap();
        let record = reopened.get_sequence_by_collection_and_name(&digest, "chr2").unwrap();
        assert_eq!(record.decode().unwrap(), b"GCGC");
    }

    #[rstest]
    fn test_flush_requires_persistence() {
        let mut store = RefgetStore::in_memory();
        assert!(matches!(store.flush(), Err(RefgetError::PersistenceDisabled)));
        assert!(matches!(
            store.flush_sequence("iYtREV555dUFKg2_agSJW6suquUyPpMw"),
            Err(RefgetError::PersistenceDisabled)
        ));
    }

    #[rstest]
    fn test_flush_unloads() {
        let (_dir, mut store, _) = persisted_store(StorageMode::Encoded);
        store.get_sequence("iYtREV555dUFKg2_agSJW6suquUyPpMw").unwrap();
        assert_eq!(store.stats().n_sequences_loaded, 1);
        store.flush_sequence("iYtREV555dUFKg2_agSJW6suquUyPpMw").unwrap();
        assert_eq!(store.stats().n_sequences_loaded, 0);

        store.get_sequence("iYtREV555dUFKg2_agSJW6suquUyPpMw").unwrap();
        store.flush().unwrap();
        assert_eq!(store.stats().n_sequences_loaded, 0);
    }

    #[rstest]
    fn test_truncated_payload_is_corrupt() {
        let (dir, mut store, _) = persisted_store(StorageMode::Raw);
        let payload = dir
            .path()
            .join("store/sequences/iY/iYtREV555dUFKg2_agSJW6suquUyPpMw.bin");
        fs::write(payload, b"TTGG").unwrap();

        let err = store.get_sequence("iYtREV555dUFKg2_agSJW6suquUyPpMw").unwrap_err();
        assert!(matches!(
            err,
            RefgetError::CorruptPayload {
                expected: 8,
                found: 4,
                ..
            }
        ));
    }

    #[rstest]
    fn test_verify() {
        let (dir, store, digest) = persisted_store(StorageMode::Encoded);
        store.verify().unwrap();

        let path = dir.path().join(format!("store/collections/{}.index", digest));
        let text = fs::read_to_string(&path).unwrap();
        let edited: String = text
            .lines()
            .filter(|line| !line.starts_with("chr2\t"))
            .map(|line| format!("{}\n", line))
            .collect();
        fs::write(&path, edited).unwrap();
        assert!(matches!(store.verify(), Err(RefgetError::Consistency(_))));
    }

    #[rstest]
    fn test_verify_after_disable_persistence() {
        let (dir, mut store, _) = persisted_store(StorageMode::Encoded);
        store.disable_persistence();
        let report = store
            .add_sequence_collection_from_reader(">chrM\nACGTN\n".as_bytes(), Default::default())
            .unwrap();
        assert!(
            !dir.path()
                .join(format!("store/collections/{}.index", report.collection_digest))
                .exists()
        );
        store.verify().unwrap();
    }

    #[rstest]
    fn test_failed_write_through_is_rolled_back() {
        let (dir, mut store, _) = persisted_store(StorageMode::Encoded);
        let fasta = ">chrM\nACGTN\n";
        let digest = crate::digest::fasta::digest_fasta_bytes(fasta.as_bytes())
            .unwrap()
            .digest()
            .to_string();
        let blocker = dir
            .path()
            .join(format!("store/collections/{}.index.tmp", digest));
        fs::create_dir_all(&blocker).unwrap();

        let err = store
            .add_sequence_collection_from_reader(fasta.as_bytes(), Default::default())
            .unwrap_err();
        assert!(matches!(err, RefgetError::BackingIo { .. }));
        assert!(!store.contains_collection(&digest));
        assert_eq!(store.stats().n_sequences, 3);

        // Later ingests must not list the failed collection.
        store
            .add_sequence_collection_from_reader(">chrY\nGGTT\n".as_bytes(), Default::default())
            .unwrap();
        let reopened = RefgetStore::open_local(dir.path().join("store")).unwrap();
        assert_eq!(reopened.stats().n_collections, 2);
        assert_eq!(reopened.stats().n_sequences, 4);

        fs::remove_dir(&blocker).unwrap();
        let report = store
            .add_sequence_collection_from_reader(fasta.as_bytes(), Default::default())
            .unwrap();
        assert!(!report.already_present);
        assert_eq!(report.n_new_sequences, 1);
        let mut reopened = RefgetStore::open_local(dir.path().join("store")).unwrap();
        assert_eq!(reopened.stats().n_collections, 3);
        let record = reopened
            .get_sequence_by_collection_and_name(&report.collection_digest, "chrM")
            .unwrap();
        assert_eq!(record.decode().unwrap(), b"ACGTN");
    }

    #[rstest]
    fn test_unreachable_remote() {
        let dir = tempdir().unwrap();
        let options = RemoteOptions {
            timeout: Duration::from_millis(200),
            cache_to_disk: false,
        };
        let result = RefgetStore::open_remote_with_options(dir.path(), "http://127.0.0.1:9", options);
        assert!(matches!(result, Err(RefgetError::Remote { .. })));
    }
}
