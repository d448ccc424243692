//! End-to-end store behavior: deduplication, persistence, lazy loading and export.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use rstest::*;
use tempfile::tempdir;

use refstore::errors::RefgetError;
use refstore::{sha512t24u, RefgetStore, StorageMode};

fn fasta(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../tests/data/fasta")
        .join(name)
}

fn bed(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../tests/data/bed")
        .join(name)
}

fn quiet(mut store: RefgetStore) -> RefgetStore {
    store.set_quiet(true);
    store
}

fn rows(text: &str) -> Vec<&str> {
    text.lines().filter(|line| !line.starts_with('#')).collect()
}

const BASE_DIGEST: &str = "XZlrcEGi6mlopZ2uD8ObHkQB1d0oDwKk";
const BASE_SEQUENCES: [(&str, &str); 3] = [
    ("chrX", "TTGGGGAA"),
    ("chr1", "GGAA"),
    ("chr2", "GCGC"),
];

#[rstest]
fn test_encoded_substring() -> anyhow::Result<()> {
    let mut store = quiet(RefgetStore::new(StorageMode::Encoded));
    let report = store.add_sequence_collection_from_fasta(fasta("two_seqs.fa"))?;
    assert_eq!(report.collection_digest, "YbLxyPIv55CrxXKNIwOA707oU_fgUF_h");

    let digest = sha512t24u(b"ACGT");
    assert_eq!(digest, "aKF498dAxcJAqme6QYQ7EZ07-fiw8Kw2");
    assert_eq!(store.get_substring(&digest, 1, 3)?, "CG");
    Ok(())
}

#[rstest]
fn test_renamed_files_share_sequences_on_disk() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let mut store = quiet(RefgetStore::on_disk(&root)?);

    let ucsc = store.add_sequence_collection_from_fasta(fasta("ucsc.fa"))?;
    let ensembl = store.add_sequence_collection_from_fasta(fasta("ensembl.fa"))?;
    assert_eq!(ucsc.collection_digest, "uC_UorBNf3YUu1YIDainBhI94CedlNeH");
    assert_ne!(ucsc.collection_digest, ensembl.collection_digest);
    assert_eq!(ensembl.n_new_sequences, 0);

    let collections_index = fs::read_to_string(root.join("collections.index"))?;
    let collection_rows = rows(&collections_index);
    assert_eq!(collection_rows.len(), 2);
    let columns: Vec<Vec<&str>> = collection_rows
        .iter()
        .map(|row| row.split('\t').collect())
        .collect();
    let mut listed = vec![columns[0][0], columns[1][0]];
    listed.sort();
    let mut expected = vec![
        ucsc.collection_digest.as_str(),
        ensembl.collection_digest.as_str(),
    ];
    expected.sort();
    assert_eq!(listed, expected);
    // Same sequences and lengths, different names.
    assert_eq!(columns[0][3], columns[1][3]);
    assert_eq!(columns[0][4], columns[1][4]);
    assert_ne!(columns[0][2], columns[1][2]);

    let sequences_index = fs::read_to_string(root.join("sequences.index"))?;
    let digests: Vec<&str> = rows(&sequences_index)
        .iter()
        .map(|row| row.split('\t').nth(4).unwrap())
        .collect();
    let mut expected = vec![sha512t24u(b"ATGCATGCATGC"), sha512t24u(b"GGGGAAAA")];
    expected.sort();
    assert_eq!(digests, expected);

    let payloads: Vec<_> = walk(&root.join("sequences"));
    assert_eq!(payloads.len(), 2);
    Ok(())
}

fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[rstest]
#[case("base.fa")]
#[case("base.fa.gz")]
fn test_ingest_is_idempotent(#[case] file_name: &str) -> anyhow::Result<()> {
    let mut store = quiet(RefgetStore::in_memory());
    let first = store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    let second = store.add_sequence_collection_from_fasta(fasta(file_name))?;

    assert_eq!(first.collection_digest, BASE_DIGEST);
    assert_eq!(second.collection_digest, BASE_DIGEST);
    assert!(second.already_present);
    assert_eq!(store.stats().n_sequences, 3);
    assert_eq!(store.stats().n_collections, 1);
    Ok(())
}

#[rstest]
fn test_set_mode_export_matches() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut store = quiet(RefgetStore::new(StorageMode::Raw));
    let digest = store
        .add_sequence_collection_from_fasta(fasta("wrapped.fa"))?
        .collection_digest;

    let before = dir.path().join("before.fa");
    store.export_fasta(&digest, &before, None, None)?;
    store.set_mode(StorageMode::Encoded);
    let after = dir.path().join("after.fa");
    store.export_fasta(&digest, &after, None, None)?;

    assert_eq!(fs::read(&before)?, fs::read(&after)?);
    assert_eq!(fs::read(&before)?, fs::read(fasta("wrapped.fa"))?);
    Ok(())
}

#[rstest]
#[case(StorageMode::Raw)]
#[case(StorageMode::Encoded)]
fn test_every_substring_matches(#[case] mode: StorageMode) -> anyhow::Result<()> {
    let mut store = quiet(RefgetStore::new(mode));
    store.add_sequence_collection_from_fasta(fasta("wrapped.fa"))?;

    let digests: Vec<String> = store.sequence_digests().collect();
    for digest in digests {
        let full = store.get_sequence(&digest)?.decode().unwrap();
        for start in 0..=full.len() {
            for end in start..=full.len() {
                assert_eq!(
                    store.get_substring_bytes(&digest, start, end)?,
                    &full[start..end],
                    "{} [{}, {})",
                    digest,
                    start,
                    end
                );
            }
        }
    }
    Ok(())
}

/// Reads from a store whose records came back from disk as Stubs must match
/// reads from a store that ingested the file directly.
#[rstest]
#[case(StorageMode::Raw)]
#[case(StorageMode::Encoded)]
fn test_stub_and_full_reads_agree(#[case] mode: StorageMode) -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");

    let mut memory = quiet(RefgetStore::new(mode));
    memory.add_sequence_collection_from_fasta(fasta("base.fa"))?;

    {
        let mut disk = quiet(RefgetStore::new(mode));
        disk.enable_persistence(&root)?;
        disk.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    let mut reopened = quiet(RefgetStore::open_local(&root)?);
    assert_eq!(reopened.stats().n_sequences_loaded, 0);

    let a = memory.get_collection_metadata(BASE_DIGEST)?.clone();
    let b = reopened.get_collection_metadata(BASE_DIGEST)?.clone();
    assert!(a.same_contents(&b));

    for (name, sequence) in BASE_SEQUENCES {
        let from_memory = memory
            .get_sequence_by_collection_and_name(BASE_DIGEST, name)?
            .clone();
        let from_disk = reopened
            .get_sequence_by_collection_and_name(BASE_DIGEST, name)?
            .clone();
        assert_eq!(from_memory.decode(), from_disk.decode());
        assert_eq!(from_disk.decode().unwrap(), sequence.as_bytes());
        assert_eq!(from_memory.mode(), from_disk.mode());

        let (m, d) = (from_memory.metadata(), from_disk.metadata());
        assert_eq!(
            (&m.name, m.length, &m.sha512t24u, &m.md5, m.alphabet),
            (&d.name, d.length, &d.sha512t24u, &d.md5, d.alphabet)
        );

        let digest = m.sha512t24u.clone();
        for start in 0..=sequence.len() {
            assert_eq!(
                memory.get_substring(&digest, start, sequence.len())?,
                reopened.get_substring(&digest, start, sequence.len())?
            );
        }
        let md5 = m.md5.clone();
        assert_eq!(
            reopened.get_sequence_by_md5(&md5)?.metadata().sha512t24u,
            digest
        );
    }

    let (mut out_memory, mut out_disk) = (Vec::new(), Vec::new());
    memory.write_fasta(BASE_DIGEST, &mut out_memory, None, None)?;
    reopened.write_fasta(BASE_DIGEST, &mut out_disk, None, None)?;
    assert_eq!(out_memory, out_disk);
    assert_eq!(out_disk, fs::read(fasta("base.fa"))?);
    Ok(())
}

#[rstest]
fn test_disable_persistence_keeps_stubs_readable() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let mut store = quiet(RefgetStore::on_disk(&root)?);
    store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    let index_before = fs::read_to_string(root.join("sequences.index"))?;

    store.disable_persistence();
    assert!(!store.is_persisting());
    let report = store.add_sequence_collection_from_fasta(fasta("two_seqs.fa"))?;

    assert_eq!(fs::read_to_string(root.join("sequences.index"))?, index_before);
    assert_eq!(store.get_substring(&sha512t24u(b"TTGGGGAA"), 0, 2)?, "TT");
    assert_eq!(
        store
            .get_sequence_by_collection_and_name(&report.collection_digest, "chrB")?
            .decode()
            .unwrap(),
        b"GGCC"
    );

    let reopened = RefgetStore::open_local(&root)?;
    assert_eq!(reopened.stats().n_collections, 1);
    Ok(())
}

#[rstest]
fn test_reopen_on_disk_appends() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        assert!(store.is_persisting());
        store.add_sequence_collection_from_fasta(fasta("two_seqs.fa"))?;
    }
    let mut store = RefgetStore::open_local(&root)?;
    assert_eq!(store.stats().n_sequences, 5);
    assert_eq!(store.list_collections().len(), 2);
    store.verify()?;
    assert_eq!(store.get_substring(&sha512t24u(b"GGCC"), 0, 4)?, "GGCC");
    Ok(())
}

#[rstest]
fn test_missing_collection_file_is_inconsistent() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    fs::remove_file(root.join(format!("collections/{}.index", BASE_DIGEST)))?;

    let err = RefgetStore::open_local(&root).unwrap_err();
    assert!(matches!(err, RefgetError::Consistency(_)), "{}", err);
    Ok(())
}

#[rstest]
fn test_unlisted_collection_file_is_inconsistent() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    fs::copy(
        root.join(format!("collections/{}.index", BASE_DIGEST)),
        root.join("collections/stray.index"),
    )?;

    let err = RefgetStore::open_local(&root).unwrap_err();
    assert!(matches!(err, RefgetError::Consistency(_)), "{}", err);
    Ok(())
}

#[rstest]
fn test_tampered_collection_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    let path = root.join(format!("collections/{}.index", BASE_DIGEST));
    let text = fs::read_to_string(&path)?;
    fs::write(&path, text.replace("chr1\t", "chrOne\t"))?;

    let mut store = quiet(RefgetStore::open_local(&root)?);
    let err = store
        .get_sequence_by_collection_and_name(BASE_DIGEST, "chr1")
        .unwrap_err();
    assert!(matches!(err, RefgetError::Consistency(_)), "{}", err);
    Ok(())
}

#[rstest]
fn test_corrupt_index_line() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    {
        let mut store = quiet(RefgetStore::on_disk(&root)?);
        store.add_sequence_collection_from_fasta(fasta("base.fa"))?;
    }
    let path = root.join("sequences.index");
    let mut text = fs::read_to_string(&path)?;
    text.push_str("chr9\t\tnot-a-number\tdna2bit\tabc\tdef\n");
    fs::write(&path, text)?;

    match RefgetStore::open_local(&root) {
        Err(RefgetError::CorruptIndex { line, .. }) => assert_eq!(line, 5),
        other => panic!("expected CorruptIndex, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[rstest]
fn test_export_regions_from_bed_gz() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut store = quiet(RefgetStore::in_memory());
    store.add_sequence_collection_from_fasta(fasta("base.fa"))?;

    let out = dir.path().join("regions.fa.gz");
    store.export_fasta_from_bed(BASE_DIGEST, bed("base.bed"), &out)?;

    let mut text = String::new();
    GzDecoder::new(fs::File::open(&out)?).read_to_string(&mut text)?;
    assert_eq!(text, ">chrX:0-4\nTTGG\n>chr2:1-3\nCG\n>chrX:5-8\nGAA\n");
    Ok(())
}

#[rstest]
fn test_export_subset_from_persisted_store() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let mut store = quiet(RefgetStore::on_disk(&root)?);
    let digest = store
        .add_sequence_collection_from_fasta(fasta("ucsc.fa"))?
        .collection_digest;

    let out = dir.path().join("subset.fa");
    store.export_fasta(&digest, &out, Some(&["chr2"][..]), Some(4))?;
    assert_eq!(fs::read_to_string(&out)?, ">chr2 desc1\nGGGG\nAAAA\n");

    let err = store
        .export_fasta(&digest, dir.path().join("bad.fa"), Some(&["chrZ"][..]), None)
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[rstest]
fn test_unnamed_record_survives_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let mut store = quiet(RefgetStore::on_disk(&root)?);
    let report = store
        .add_sequence_collection_from_reader(">\nACGT\n>chr2\nGGCC\n".as_bytes(), Default::default())?;
    assert_eq!(
        store
            .get_sequence_by_collection_and_name(&report.collection_digest, "")?
            .decode()
            .unwrap(),
        b"ACGT"
    );

    let mut reopened = quiet(RefgetStore::open_local(&root)?);
    reopened.verify()?;
    let record = reopened.get_sequence_by_collection_and_name(&report.collection_digest, "")?;
    assert_eq!(record.metadata().name, "");
    assert_eq!(record.decode().unwrap(), b"ACGT");
    Ok(())
}
