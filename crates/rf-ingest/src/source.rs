//! CSV record source.
//!
//! The header row must contain `token_address`, `price_in_sol` and
//! `block_time` (any order, extra columns ignored). Each data row becomes a
//! [`SourceItem`]: either a validated [`TradeRecord`] or a malformed row with
//! the reason it was rejected. Row order is preserved.
//!
//! The csv reader skips blank lines on its own; they are recovered from the
//! line counter and reported as malformed `empty row` items, so they show up
//! in the producer's skip count. Blank lines after the last row are ignored.

use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

use rf_core::{TradeRecord, error::FeedError};

use crate::IngestError;

const COL_TOKEN: &str = "token_address";
const COL_PRICE: &str = "price_in_sol";
const COL_TIME: &str = "block_time";

/// One data row from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Record(TradeRecord),
    Malformed { line: u64, reason: FeedError },
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    token: usize,
    price: usize,
    time: usize,
}

/// Ordered reader over a delimited trade dataset.
pub struct RecordSource<R: Read> {
    reader: csv::Reader<R>,
    columns: Columns,
    row: csv::StringRecord,
    /// Blank lines skipped before the row held in `row`.
    blank_lines: Range<u64>,
    /// Line of a row read ahead of pending blank lines.
    held: Option<u64>,
}

impl RecordSource<File> {
    /// Open a CSV file and validate its header.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let reader = Self::builder().from_path(path)?;
        Self::with_reader(reader)
    }
}

impl<R: Read> RecordSource<R> {
    /// Wrap any reader (file, socket, in-memory buffer) and validate its header.
    pub fn from_reader(rdr: R) -> Result<Self, IngestError> {
        Self::with_reader(Self::builder().from_reader(rdr))
    }

    fn builder() -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.flexible(true).trim(csv::Trim::All);
        builder
    }

    fn with_reader(mut reader: csv::Reader<R>) -> Result<Self, IngestError> {
        let headers = reader.headers()?.clone();
        let find = |name: &'static str| {
            headers.iter().position(|h| h.eq_ignore_ascii_case(name)).ok_or(IngestError::MissingColumn(name))
        };
        let columns = Columns { token: find(COL_TOKEN)?, price: find(COL_PRICE)?, time: find(COL_TIME)? };
        Ok(Self { reader, columns, row: csv::StringRecord::new(), blank_lines: 0..0, held: None })
    }

    fn parse_row(&self) -> Result<TradeRecord, FeedError> {
        let field = |idx: usize, name: &str| {
            self.row.get(idx).filter(|v| !v.is_empty()).ok_or_else(|| FeedError::Parse(format!("missing {name}")))
        };
        let token = field(self.columns.token, COL_TOKEN)?;
        let raw_price = field(self.columns.price, COL_PRICE)?;
        let time = field(self.columns.time, COL_TIME)?;

        let price = fast_float2::parse::<f64, _>(raw_price)
            .map_err(|_| FeedError::Parse(format!("non-numeric price_in_sol '{raw_price}'")))?;
        TradeRecord::new(token, price, time)
    }

    fn item(&self, line: u64) -> SourceItem {
        match self.parse_row() {
            Ok(record) => SourceItem::Record(record),
            Err(reason) => SourceItem::Malformed { line, reason },
        }
    }
}

impl<R: Read> Iterator for RecordSource<R> {
    type Item = Result<SourceItem, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.blank_lines.next() {
            return Some(Ok(SourceItem::Malformed { line, reason: FeedError::Parse("empty row".into()) }));
        }
        if let Some(line) = self.held.take() {
            return Some(Ok(self.item(line)));
        }

        let start = self.reader.position().line();
        match self.reader.read_record(&mut self.row) {
            Ok(false) => None,
            Ok(true) => {
                // One newline terminates the row itself; quoted fields may
                // carry more. Anything beyond that was a skipped blank line.
                let consumed = self.reader.position().line().saturating_sub(start);
                let embedded: u64 = self.row.iter().map(|f| f.matches('\n').count() as u64).sum();
                let blanks = consumed.saturating_sub(1 + embedded);
                let line = start + blanks;
                if blanks == 0 {
                    return Some(Ok(self.item(line)));
                }
                self.blank_lines = start..line;
                self.held = Some(line);
                self.next()
            }
            // Invalid UTF-8 in one row does not poison the rest of the file.
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                Some(Ok(SourceItem::Malformed { line, reason: FeedError::Parse(e.to_string()) }))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(csv: &str) -> Vec<SourceItem> {
        RecordSource::from_reader(csv.as_bytes()).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn reads_rows_in_order() {
        let got = items("token_address,price_in_sol,block_time\nBTC,100.0,t1\nBTC,101.5,t2\nETH,50.0,t1\n");
        let tokens: Vec<_> = got
            .iter()
            .map(|i| match i {
                SourceItem::Record(r) => (r.token_address.as_str(), r.price_in_sol),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(tokens, vec![("BTC", 100.0), ("BTC", 101.5), ("ETH", 50.0)]);
    }

    #[test]
    fn column_order_and_extra_columns() {
        let got = items("block_time,slot,price_in_sol,token_address\n2024-01-01,9,0.5,SOL\n");
        assert_eq!(got, vec![SourceItem::Record(TradeRecord::new("SOL", 0.5, "2024-01-01").unwrap())]);
    }

    #[test]
    fn malformed_rows_are_reported_not_fatal() {
        let got = items(
            "token_address,price_in_sol,block_time\n\
             BTC,abc,t1\n\
             BTC,-2,t2\n\
             ,1.0,t3\n\
             BTC,1.0\n\
             ETH,2.0,t5\n",
        );
        assert_eq!(got.len(), 5);
        assert!(got[..4].iter().all(|i| matches!(i, SourceItem::Malformed { .. })));
        assert!(matches!(&got[4], SourceItem::Record(r) if r.token_address == "ETH"));
        match &got[0] {
            SourceItem::Malformed { line, reason } => {
                assert_eq!(*line, 2);
                assert!(reason.to_string().contains("abc"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_reported_as_malformed() {
        let got = items("token_address,price_in_sol,block_time\nBTC,1.0,t1\n\n   \n,,\n\n\nETH,2.0,t2\n");
        let lines: Vec<_> = got
            .iter()
            .map(|i| match i {
                SourceItem::Record(r) => (r.token_address.clone(), 0),
                SourceItem::Malformed { line, .. } => ("-".to_string(), *line),
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                ("BTC".to_string(), 0),
                ("-".to_string(), 3),
                ("-".to_string(), 4),
                ("-".to_string(), 5),
                ("-".to_string(), 6),
                ("-".to_string(), 7),
                ("ETH".to_string(), 0),
            ]
        );
        match &got[1] {
            SourceItem::Malformed { reason, .. } => assert!(reason.to_string().contains("empty row")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quoted_newlines_are_not_blank_lines() {
        let got = items("token_address,price_in_sol,block_time\nBTC,1.0,\"t\n1\"\nETH,2.0,t2\n");
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|i| matches!(i, SourceItem::Record(_))));
    }

    #[test]
    fn missing_column_is_fatal() {
        let err = RecordSource::from_reader("token_address,block_time\nBTC,t1\n".as_bytes()).err().unwrap();
        assert!(matches!(err, IngestError::MissingColumn("price_in_sol")));
    }

    #[test]
    fn block_time_is_passed_through() {
        let got = items("token_address,price_in_sol,block_time\nBTC,1,  1709251200 \n");
        assert!(matches!(&got[0], SourceItem::Record(r) if r.block_time == "1709251200"));
    }
}
