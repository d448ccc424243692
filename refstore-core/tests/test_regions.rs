use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use pretty_assertions::assert_eq;
use rstest::*;
use tempfile::tempdir;

use refstore_core::errors::CoreError;
use refstore_core::models::Region;
use refstore_core::utils::parse_bedlike_file;

const BED: &str = "track name=test\n# a comment\nchr1\t0\t4\nchr2\t2\t6\tname\n\nchr1\t5\t5\n";

#[rstest]
#[case("regions.bed")]
#[case("regions.bed.gz")]
fn test_parse_bedlike_file(#[case] file_name: &str) -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join(file_name);
    let mut file = std::fs::File::create(&path)?;
    if file_name.ends_with(".gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(BED.as_bytes())?;
        file.write_all(&encoder.finish()?)?;
    } else {
        file.write_all(BED.as_bytes())?;
    }

    let regions = parse_bedlike_file(&path)?;
    let mut named = Region::new("chr2", 2, 6);
    named.rest = Some("name".to_string());
    assert_eq!(
        regions,
        vec![Region::new("chr1", 0, 4), named, Region::new("chr1", 5, 5)]
    );
    Ok(())
}

#[rstest]
fn test_parse_bedlike_file_reports_line_number() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.bed");
    std::fs::write(&path, "chr1\t0\t4\nchr1\tx\t4\n")?;

    match parse_bedlike_file(&path) {
        Err(CoreError::RegionParse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected a region parse error, got {:?}", other),
    }
    Ok(())
}
