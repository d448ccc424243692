use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::errors::CoreError;
use crate::models::region::{is_bed_header, Region};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

///
/// Wrap any reader so that gzip input is decompressed transparently.
///
/// The first bytes of the stream are inspected without consuming them: if they
/// carry the gzip magic number the stream goes through a multi-member gzip
/// decoder, otherwise it is passed through unchanged. Returns the buffered
/// reader and whether the input was compressed.
///
pub fn auto_decompress<R: Read + 'static>(
    inner: R,
) -> io::Result<(BufReader<Box<dyn Read>>, bool)> {
    let mut peeked = BufReader::new(inner);
    let is_gzipped = peeked.fill_buf()?.starts_with(&GZIP_MAGIC);

    let reader: Box<dyn Read> = if is_gzipped {
        Box::new(MultiGzDecoder::new(peeked))
    } else {
        Box::new(peeked)
    };

    Ok((BufReader::new(reader), is_gzipped))
}

///
/// Get a reader for either a gzip'd or non-gzip'd file, along with
/// whether the file turned out to be compressed.
///
/// # Arguments
///
/// - path: path to the file to read
///
pub fn get_dynamic_reader_with_info(
    path: &Path,
) -> Result<(BufReader<Box<dyn Read>>, bool), CoreError> {
    let file = File::open(path).map_err(|source| CoreError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    Ok(auto_decompress(file)?)
}

///
/// Get a reader for either a gzip'd or non-gzip'd file.
///
pub fn get_dynamic_reader(path: &Path) -> Result<BufReader<Box<dyn Read>>, CoreError> {
    get_dynamic_reader_with_info(path).map(|(reader, _)| reader)
}

/// True when the path ends in `.gz`.
pub fn has_gz_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// An output file, gzip-compressed or plain.
///
/// Call [`finish`](DynamicWriter::finish) when done: it writes the gzip trailer
/// and reports any error doing so, which dropping the writer would not.
pub enum DynamicWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl DynamicWriter {
    pub fn finish(self) -> io::Result<()> {
        match self {
            DynamicWriter::Plain(mut writer) => writer.flush(),
            DynamicWriter::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for DynamicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DynamicWriter::Plain(writer) => writer.write(buf),
            DynamicWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DynamicWriter::Plain(writer) => writer.flush(),
            DynamicWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

///
/// Get a writer for a file; paths ending in `.gz` are gzip-compressed.
///
pub fn get_dynamic_writer(path: &Path) -> Result<DynamicWriter, CoreError> {
    let file = BufWriter::new(File::create(path)?);
    Ok(if has_gz_extension(path) {
        DynamicWriter::Gzip(GzEncoder::new(file, Compression::default()))
    } else {
        DynamicWriter::Plain(file)
    })
}

///
/// Read every region from a BED-like file (plain or gzipped), skipping header,
/// comment and blank lines. Region order follows the file.
///
pub fn parse_bedlike_file(path: &Path) -> Result<Vec<Region>, CoreError> {
    let reader = get_dynamic_reader(path)?;
    let mut regions = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if is_bed_header(&line) {
            continue;
        }
        regions.push(Region::from_bed_line(&line, index + 1)?);
    }
    Ok(regions)
}
