//! grep 输出解析
//!
//! Record layout (`grep --null --line-number --byte-offset`):
//! `<path>\0<line>:<offset>:<text>`, one record per line.
//! Malformed records are dropped silently.

use crate::services::ports::search::Match;
use memchr::memchr;

/// Parses one record (without its trailing newline).
pub fn parse_record(record: &[u8]) -> Option<Match> {
    let zero = memchr(0, record)?;
    let file_path = &record[..zero];
    let rest = &record[zero + 1..];

    let (line_number, rest) = split_number(rest)?;
    let (byte_offset, line) = split_number(rest)?;

    Some(Match {
        file_path: String::from_utf8_lossy(file_path).into_owned(),
        line_number,
        byte_offset,
        line: String::from_utf8_lossy(line).into_owned(),
    })
}

/// Parses every newline separated record of a chunk. Stateless: a record cut
/// by the end of the chunk is parsed as-is (and usually dropped).
pub fn parse_records(chunk: &[u8]) -> Vec<Match> {
    chunk.split(|&b| b == b'\n').filter_map(parse_record).collect()
}

fn split_number(source: &[u8]) -> Option<(u64, &[u8])> {
    let colon = memchr(b':', source)?;
    let digits = std::str::from_utf8(&source[..colon]).ok()?;
    let value = digits.parse::<u64>().ok()?;
    Some((value, &source[colon + 1..]))
}

/// Streaming front end of [`parse_record`] which carries a trailing partial
/// record over to the next chunk.
#[derive(Debug, Default)]
pub struct LineParser {
    partial: Vec<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Match> {
        let mut matches = Vec::new();
        let mut rest = chunk;

        while let Some(newline) = memchr(b'\n', rest) {
            let record = &rest[..newline];
            let parsed = if self.partial.is_empty() {
                parse_record(record)
            } else {
                self.partial.extend_from_slice(record);
                let parsed = parse_record(&self.partial);
                self.partial.clear();
                parsed
            };
            matches.extend(parsed);
            rest = &rest[newline + 1..];
        }

        self.partial.extend_from_slice(rest);
        matches
    }

    /// Flushes the pending partial record at end of stream.
    pub fn finish(&mut self) -> Vec<Match> {
        if self.partial.is_empty() {
            return Vec::new();
        }
        let record = std::mem::take(&mut self.partial);
        parse_record(&record).into_iter().collect()
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/parser.rs"]
mod tests;
