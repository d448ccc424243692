use std::fmt::{self, Display};

use crate::errors::CoreError;

///
/// A half-open `[start, end)` interval on a named sequence, 0-based like BED.
///
#[derive(Eq, PartialEq, Hash, Debug, Clone)]
pub struct Region {
    pub chr: String,
    pub start: u32,
    pub end: u32,

    pub rest: Option<String>,
}

impl Region {
    pub fn new(chr: impl Into<String>, start: u32, end: u32) -> Self {
        Region {
            chr: chr.into(),
            start,
            end,
            rest: None,
        }
    }

    ///
    /// Get the number of bases covered by the region
    ///
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    ///
    /// Parse one tab- or space-separated BED-like line. Columns past the third
    /// are kept verbatim in `rest`.
    ///
    /// `line_number` is only used for error reporting.
    ///
    pub fn from_bed_line(line: &str, line_number: usize) -> Result<Region, CoreError> {
        let parse_error = |message: String| CoreError::RegionParse {
            line: line_number,
            message,
        };

        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = line.splitn(4, |c: char| c == '\t' || c == ' ');

        let chr = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| parse_error("missing sequence name".to_string()))?;

        let mut coordinate = |label: &str| -> Result<u32, CoreError> {
            let raw = fields
                .next()
                .ok_or_else(|| parse_error(format!("missing {} coordinate", label)))?;
            raw.trim()
                .parse::<u32>()
                .map_err(|e| parse_error(format!("invalid {} '{}': {}", label, raw, e)))
        };
        let start = coordinate("start")?;
        let end = coordinate("end")?;

        if end < start {
            return Err(parse_error(format!("end {} is before start {}", end, start)));
        }

        Ok(Region {
            chr: chr.to_string(),
            start,
            end,
            rest: fields.next().map(|s| s.to_string()),
        })
    }

    ///
    /// Get file string of Region
    ///
    pub fn as_string(&self) -> String {
        format!(
            "{}\t{}\t{}{}",
            self.chr,
            self.start,
            self.end,
            self.rest
                .as_deref()
                .map_or(String::new(), |s| format!("\t{}", s)),
        )
    }
}

/// Lines a BED reader should skip: blanks, comments and UCSC `track`/`browser` lines.
pub fn is_bed_header(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with('#')
        || line.starts_with("track")
        || line.starts_with("browser")
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}
