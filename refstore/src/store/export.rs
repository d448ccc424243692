//! Substring extraction and FASTA export.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use refstore_core::models::{is_bed_header, Region};
use refstore_core::utils::{get_dynamic_reader, get_dynamic_writer};

use super::{digest_key, RefgetStore};
use crate::collection::{write_fasta_record, DEFAULT_LINE_WIDTH};
use crate::digest::types::SequenceMetadata;
use crate::errors::{RefgetError, Result};
use crate::hashkeyable::{key_to_digest_string, HashKeyable};

/// A region's sequence, as produced by [`SubstringsFromRegions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedSequence {
    pub sequence: String,
    pub chrom_name: String,
    pub start: u32,
    pub end: u32,
}

/// Streams the sequences of the regions listed in a BED file.
///
/// Yields one item per region line. A line that fails to parse or names an
/// unknown sequence yields an error and iteration continues with the next line.
pub struct SubstringsFromRegions<'a> {
    store: &'a mut RefgetStore,
    reader: BufReader<Box<dyn Read>>,
    collection_digest: String,
    line_number: usize,
    previous_chr: String,
    current_digest: String,
}

impl Iterator for SubstringsFromRegions<'_> {
    type Item = Result<RetrievedSequence>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_number += 1;
            if !is_bed_header(&line) {
                break;
            }
        }
        Some(self.retrieve(&line))
    }
}

impl SubstringsFromRegions<'_> {
    fn retrieve(&mut self, line: &str) -> Result<RetrievedSequence> {
        let region = Region::from_bed_line(line, self.line_number)?;

        if self.previous_chr != region.chr {
            let key = self
                .store
                .sequence_key_by_name(&self.collection_digest, &region.chr)?;
            self.current_digest = key_to_digest_string(&key);
            self.previous_chr = region.chr.clone();
        }

        let sequence = self.store.get_substring(
            &self.current_digest,
            region.start as usize,
            region.end as usize,
        )?;
        Ok(RetrievedSequence {
            sequence,
            chrom_name: region.chr,
            start: region.start,
            end: region.end,
        })
    }
}

impl RefgetStore {
    /// Symbols `[start, end)` of a sequence as raw bytes.
    ///
    /// Only the bytes covering the range are decoded. `start == end` gives an empty
    /// result; `end` past the sequence or `start > end` is a `Range` error.
    pub fn get_substring_bytes(&mut self, digest: &str, start: usize, end: usize) -> Result<Vec<u8>> {
        let key = digest_key(digest)
            .filter(|key| self.sequence_store.contains_key(key))
            .ok_or_else(|| RefgetError::SequenceNotFound(digest.to_string()))?;
        let record = self.loaded_sequence(&key)?;
        let length = record.metadata().length;
        if start > end || end > length {
            return Err(RefgetError::Range {
                digest: digest.to_string(),
                start,
                end,
                length,
            });
        }
        record
            .substring(start, end)
            .ok_or_else(|| RefgetError::NoBacking(digest.to_string()))
    }

    /// [`get_substring_bytes`](Self::get_substring_bytes) as a `String`.
    pub fn get_substring(&mut self, digest: &str, start: usize, end: usize) -> Result<String> {
        Ok(String::from_utf8(self.get_substring_bytes(digest, start, end)?)?)
    }

    /// Write a collection as FASTA, in collection order.
    ///
    /// With `names`, only those members are written, in the order given. Without a
    /// `line_width`, each record is wrapped like the file it came from when that is
    /// known, else at 80 columns.
    pub fn write_fasta<W: Write>(
        &mut self,
        collection_digest: &str,
        writer: &mut W,
        names: Option<&[&str]>,
        line_width: Option<usize>,
    ) -> Result<()> {
        let key = self.collection_key(collection_digest)?;
        let (_, members) = self.collection_members(&key)?;

        let selected: Vec<SequenceMetadata> = match names {
            None => members,
            Some(names) => names
                .iter()
                .map(|name| {
                    members
                        .iter()
                        .find(|member| member.name == *name)
                        .cloned()
                        .ok_or_else(|| RefgetError::NameNotFound {
                            collection: collection_digest.to_string(),
                            name: name.to_string(),
                        })
                })
                .collect::<Result<_>>()?,
        };

        for member in &selected {
            self.write_member(writer, member, line_width)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_member<W: Write>(
        &mut self,
        writer: &mut W,
        member: &SequenceMetadata,
        line_width: Option<usize>,
    ) -> Result<()> {
        let record = self.loaded_sequence(&member.sha512t24u.to_key())?;
        let sequence = record
            .decode()
            .ok_or_else(|| RefgetError::NoBacking(member.sha512t24u.clone()))?;
        let width = line_width
            .or_else(|| member.fai.as_ref().map(|fai| fai.line_bases as usize))
            .or_else(|| record.metadata().fai.as_ref().map(|fai| fai.line_bases as usize))
            .unwrap_or(DEFAULT_LINE_WIDTH);
        write_fasta_record(writer, member, &sequence, width)?;
        Ok(())
    }

    /// [`write_fasta`](Self::write_fasta) to a file; `.gz` paths are compressed.
    pub fn export_fasta<P: AsRef<Path>>(
        &mut self,
        collection_digest: &str,
        output_path: P,
        names: Option<&[&str]>,
        line_width: Option<usize>,
    ) -> Result<()> {
        // Resolve before creating the output file.
        self.collection_key(collection_digest)?;
        let mut writer = get_dynamic_writer(output_path.as_ref())?;
        self.write_fasta(collection_digest, &mut writer, names, line_width)?;
        writer.finish()?;
        Ok(())
    }

    /// Export sequences by digest, each under the name it was first ingested as.
    pub fn export_fasta_by_digests<P: AsRef<Path>>(
        &mut self,
        digests: &[&str],
        output_path: P,
        line_width: Option<usize>,
    ) -> Result<()> {
        let members = digests
            .iter()
            .map(|digest| self.get_sequence_metadata(digest).cloned())
            .collect::<Result<Vec<_>>>()?;

        let mut writer = get_dynamic_writer(output_path.as_ref())?;
        for member in &members {
            self.write_member(&mut writer, member, line_width)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Write one unwrapped record per region, headed `>name:start-end`, in the
    /// order given.
    pub fn write_fasta_from_regions<W: Write>(
        &mut self,
        collection_digest: &str,
        regions: &[Region],
        writer: &mut W,
    ) -> Result<()> {
        for region in regions {
            let key = self.sequence_key_by_name(collection_digest, &region.chr)?;
            let digest = key_to_digest_string(&key);
            let sequence =
                self.get_substring_bytes(&digest, region.start as usize, region.end as usize)?;
            writeln!(writer, ">{}:{}-{}", region.chr, region.start, region.end)?;
            writer.write_all(&sequence)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// [`write_fasta_from_regions`](Self::write_fasta_from_regions) to a file.
    pub fn export_fasta_from_regions<P: AsRef<Path>>(
        &mut self,
        collection_digest: &str,
        regions: &[Region],
        output_path: P,
    ) -> Result<()> {
        self.collection_key(collection_digest)?;
        let mut writer = get_dynamic_writer(output_path.as_ref())?;
        self.write_fasta_from_regions(collection_digest, regions, &mut writer)?;
        writer.finish()?;
        Ok(())
    }

    /// Iterate the sequences of the regions in a BED file (plain or gzipped).
    pub fn substrings_from_regions<P: AsRef<Path>>(
        &mut self,
        collection_digest: &str,
        bed_path: P,
    ) -> Result<SubstringsFromRegions<'_>> {
        self.collection_key(collection_digest)?;
        let reader = get_dynamic_reader(bed_path.as_ref())?;
        Ok(SubstringsFromRegions {
            store: self,
            reader,
            collection_digest: collection_digest.to_string(),
            line_number: 0,
            previous_chr: String::new(),
            current_digest: String::new(),
        })
    }

    /// Export the regions of a BED file as FASTA. The first bad region aborts the
    /// export.
    pub fn export_fasta_from_bed<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        collection_digest: &str,
        bed_path: P,
        output_path: Q,
    ) -> Result<()> {
        let regions = refstore_core::utils::parse_bedlike_file(bed_path.as_ref())?;
        self.export_fasta_from_regions(collection_digest, &regions, output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::types::StorageMode;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use tempfile::tempdir;

    const FASTA: &str = ">chrX desc\nTTGGGGAA\n>chr1\nGGAA\n>chr2\nGCGC\n";

    fn store(mode: StorageMode) -> (RefgetStore, String) {
        let mut store = RefgetStore::new(mode);
        store.set_quiet(true);
        let report = store
            .add_sequence_collection_from_reader(FASTA.as_bytes(), Default::default())
            .unwrap();
        (store, report.collection_digest)
    }

    #[rstest]
    #[case(StorageMode::Raw)]
    #[case(StorageMode::Encoded)]
    fn test_get_substring(#[case] mode: StorageMode) {
        let (mut store, _) = store(mode);
        let digest = "iYtREV555dUFKg2_agSJW6suquUyPpMw";
        assert_eq!(store.get_substring(digest, 2, 7).unwrap(), "GGGGA");
        assert_eq!(store.get_substring(digest, 3, 5).unwrap(), "GG");
        assert_eq!(store.get_substring(digest, 0, 8).unwrap(), "TTGGGGAA");
        assert_eq!(store.get_substring(digest, 8, 8).unwrap(), "");
    }

    #[rstest]
    #[case(0, 9)]
    #[case(5, 4)]
    #[case(9, 9)]
    fn test_get_substring_range_errors(#[case] start: usize, #[case] end: usize) {
        let (mut store, _) = store(StorageMode::Encoded);
        let err = store
            .get_substring("iYtREV555dUFKg2_agSJW6suquUyPpMw", start, end)
            .unwrap_err();
        assert!(matches!(err, RefgetError::Range { length: 8, .. }));
    }

    #[rstest]
    fn test_write_fasta_all_and_subset() {
        let (mut store, digest) = store(StorageMode::Encoded);

        let mut out = Vec::new();
        store.write_fasta(&digest, &mut out, None, None).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            ">chrX desc\nTTGGGGAA\n>chr1\nGGAA\n>chr2\nGCGC\n"
        );

        let mut out = Vec::new();
        store
            .write_fasta(&digest, &mut out, Some(&["chr2", "chrX"][..]), Some(3))
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            ">chr2\nGCG\nC\n>chrX desc\nTTG\nGGG\nAA\n"
        );
    }

    #[rstest]
    fn test_write_fasta_unknown_name() {
        let (mut store, digest) = store(StorageMode::Encoded);
        let mut out = Vec::new();
        let err = store
            .write_fasta(&digest, &mut out, Some(&["chr9"][..]), None)
            .unwrap_err();
        assert!(matches!(err, RefgetError::NameNotFound { .. }));
        assert!(out.is_empty());
    }

    #[rstest]
    fn test_regions() {
        let (mut store, digest) = store(StorageMode::Encoded);
        let regions = vec![Region::new("chr2", 1, 3), Region::new("chrX", 0, 4)];

        let mut out = Vec::new();
        store
            .write_fasta_from_regions(&digest, &regions, &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            ">chr2:1-3\nCG\n>chrX:0-4\nTTGG\n"
        );
    }

    #[rstest]
    fn test_substrings_from_bed() {
        let (mut store, digest) = store(StorageMode::Raw);
        let dir = tempdir().unwrap();
        let bed = dir.path().join("regions.bed");
        std::fs::write(&bed, "track name=x\nchrX\t2\t7\nchrZ\t0\t1\nchr1\t0\t2\n").unwrap();

        let results: Vec<Result<RetrievedSequence>> =
            store.substrings_from_regions(&digest, &bed).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().sequence, "GGGGA");
        assert!(matches!(results[1], Err(RefgetError::NameNotFound { .. })));
        let last = results[2].as_ref().unwrap();
        assert_eq!((last.chrom_name.as_str(), last.start, last.end), ("chr1", 0, 2));
        assert_eq!(last.sequence, "GG");
    }

    #[rstest]
    fn test_export_fasta_by_digests() {
        let (mut store, _) = store(StorageMode::Encoded);
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.fa");
        store
            .export_fasta_by_digests(&["iYtREV555dUFKg2_agSJW6suquUyPpMw"], &out, None)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            ">chrX desc\nTTGGGGAA\n"
        );
        assert!(store
            .export_fasta_by_digests(&["missing"], dir.path().join("x.fa"), None)
            .is_err());
    }
}
