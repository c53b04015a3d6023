//! Row source reader
//!
//! Opens a CSV or spreadsheet file and yields its header plus a lazy,
//! non-restartable sequence of data rows. CSV sources stream from disk;
//! spreadsheets are loaded one sheet at a time into memory.
//!
//! All reads are blocking file IO. Async callers go through
//! [`open_source`], [`count_rows`] and [`RowSource::read_chunk`], which run
//! on the blocking pool.

use calamine::{open_workbook_auto, Data, Reader};
use csv::{ByteRecord, ReaderBuilder, Trim};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::error::{IngestError, IngestResult};

const CSV_READ_BUFFER: usize = 1 << 20;

/// Column name holding the dedup key
pub const EIN_COLUMN: &str = "EIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> IngestResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(IngestError::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                ext
            })),
        }
    }
}

/// A raw row: one string per cell
pub type RawRow = Vec<String>;

/// Cells are trimmed before this check, so whitespace-only rows are blank too
fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.is_empty())
}

fn csv_reader(path: &Path) -> IngestResult<csv::Reader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(BufReader::with_capacity(CSV_READ_BUFFER, file)))
}

fn byte_record_to_row(record: &ByteRecord) -> RawRow {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).trim().to_string())
        .collect()
}

fn load_first_sheet(path: &Path) -> IngestResult<Vec<RawRow>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Err(IngestError::NoDataRows),
    };

    Ok(range
        .rows()
        .map(|cells| cells.iter().map(cell_to_string).collect::<RawRow>())
        .filter(|row| !is_blank(row))
        .collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

enum Rows {
    Csv {
        reader: csv::Reader<BufReader<File>>,
        record: ByteRecord,
    },
    Sheet(std::vec::IntoIter<RawRow>),
}

/// Opened source: header row plus the remaining data rows
pub struct RowSource {
    format: SourceFormat,
    header: RawRow,
    rows: Rows,
}

impl std::fmt::Debug for RowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSource")
            .field("format", &self.format)
            .field("header", &self.header)
            .finish()
    }
}

impl RowSource {
    /// Open a source and extract its header row
    pub fn open(path: &Path) -> IngestResult<Self> {
        if !path.exists() {
            return Err(IngestError::SourceFileMissing(path.to_path_buf()));
        }

        let format = SourceFormat::from_path(path)?;
        let mut source = match format {
            SourceFormat::Csv => RowSource {
                format,
                header: Vec::new(),
                rows: Rows::Csv {
                    reader: csv_reader(path)?,
                    record: ByteRecord::new(),
                },
            },
            SourceFormat::Spreadsheet => RowSource {
                format,
                header: Vec::new(),
                rows: Rows::Sheet(load_first_sheet(path)?.into_iter()),
            },
        };

        source.header = match source.next_row() {
            Some(header) => header?,
            None => return Err(IngestError::NoDataRows),
        };

        Ok(source)
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Read up to `size` rows on the blocking pool, handing the source back
    pub async fn read_chunk(self, size: usize) -> IngestResult<(Self, Vec<RawRow>)> {
        blocking(move || {
            let mut source = self;
            let rows = source
                .by_ref()
                .take(size)
                .collect::<IngestResult<Vec<_>>>()?;
            Ok((source, rows))
        })
        .await
    }

    /// Read the `count` rows following the first `skip` data rows
    pub async fn read_slice(self, skip: usize, count: usize) -> IngestResult<Vec<RawRow>> {
        blocking(move || self.skip(skip).take(count).collect()).await
    }

    fn next_row(&mut self) -> Option<IngestResult<RawRow>> {
        match &mut self.rows {
            Rows::Csv { reader, record } => loop {
                match reader.read_byte_record(record) {
                    Ok(true) => {
                        let row = byte_record_to_row(record);
                        if is_blank(&row) {
                            continue;
                        }
                        return Some(Ok(row));
                    }
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e.into())),
                }
            },
            Rows::Sheet(rows) => rows.next().map(Ok),
        }
    }
}

impl Iterator for RowSource {
    type Item = IngestResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

/// Index of the EIN column, matched case-insensitively
pub fn locate_ein_column(header: &[String]) -> IngestResult<usize> {
    header
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(EIN_COLUMN))
        .ok_or(IngestError::MissingEinColumn)
}

/// Count data rows (header excluded) without keeping them around. Uses
/// the same row filter as [`RowSource`], so counts match what gets read.
pub fn count_data_rows(path: &Path) -> IngestResult<i64> {
    let mut source = match RowSource::open(path) {
        Ok(source) => source,
        Err(IngestError::NoDataRows) => return Ok(0),
        Err(e) => return Err(e),
    };

    source.try_fold(0i64, |count, row| row.map(|_| count + 1))
}

async fn blocking<T, F>(f: F) -> IngestResult<T>
where
    F: FnOnce() -> IngestResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// [`RowSource::open`] on the blocking pool
pub async fn open_source(path: PathBuf) -> IngestResult<RowSource> {
    blocking(move || RowSource::open(&path)).await
}

/// [`count_data_rows`] on the blocking pool
pub async fn count_rows(path: PathBuf) -> IngestResult<i64> {
    blocking(move || count_data_rows(&path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SourceFormat::from_path(Path::new("a.CSV")).unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_path(Path::new("a.txt")).unwrap(), SourceFormat::Csv);
        assert_eq!(
            SourceFormat::from_path(Path::new("a.xlsx")).unwrap(),
            SourceFormat::Spreadsheet
        );
        assert_eq!(
            SourceFormat::from_path(Path::new("a.xls")).unwrap(),
            SourceFormat::Spreadsheet
        );
        assert!(matches!(
            SourceFormat::from_path(Path::new("a.pdf")),
            Err(IngestError::UnsupportedFormat(ext)) if ext == "pdf"
        ));
    }

    #[test]
    fn test_csv_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "bmf.csv",
            "EIN,NAME,ICO,STREET,CITY\n\n12-3456789,\"Helping, Hands\",,1 Main St,  Springfield \n\n",
        );

        let source = RowSource::open(&path).unwrap();
        assert_eq!(source.format(), SourceFormat::Csv);
        assert_eq!(source.header(), &["EIN", "NAME", "ICO", "STREET", "CITY"]);

        let rows: Vec<RawRow> = source.collect::<IngestResult<_>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "12-3456789");
        assert_eq!(rows[0][1], "Helping, Hands");
        assert_eq!(rows[0][2], "");
        assert_eq!(rows[0][4], "Springfield");
    }

    #[test]
    fn test_csv_ragged_rows_are_kept() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "ragged.csv", "EIN,NAME\n1,a,extra\n2\n");
        let rows: Vec<RawRow> = RowSource::open(&path)
            .unwrap()
            .collect::<IngestResult<_>>()
            .unwrap();
        assert_eq!(rows[0].len(), 3);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_empty_file_has_no_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "empty.csv", "\n\n");
        assert!(matches!(RowSource::open(&path), Err(IngestError::NoDataRows)));
    }

    #[test]
    fn test_missing_file() {
        let err = RowSource::open(Path::new("/nonexistent/file.csv")).unwrap_err();
        assert!(matches!(err, IngestError::SourceFileMissing(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_locate_ein_column() {
        let header: Vec<String> = ["NAME", " ein ", "CITY"].iter().map(|s| s.to_string()).collect();
        assert_eq!(locate_ein_column(&header).unwrap(), 1);

        let header: Vec<String> = ["NAME", "CITY"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(locate_ein_column(&header), Err(IngestError::MissingEinColumn)));
    }

    #[test]
    fn test_count_data_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "count.csv", "EIN,NAME\n1,a\n\n2,b\n3,c\n");
        assert_eq!(count_data_rows(&path).unwrap(), 3);

        let header_only = write_csv(&dir, "header.csv", "EIN,NAME\n");
        assert_eq!(count_data_rows(&header_only).unwrap(), 0);

        let empty = write_csv(&dir, "empty.csv", "\n");
        assert_eq!(count_data_rows(&empty).unwrap(), 0);
    }

    #[test]
    fn test_unicode_whitespace_row_is_neither_counted_nor_read() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "nbsp.csv", "EIN,NAME\n1,a\n\u{a0}\n2,b\n \u{a0} , \u{2003}\n");

        let rows: Vec<RawRow> = RowSource::open(&path)
            .unwrap()
            .collect::<IngestResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(count_data_rows(&path).unwrap(), rows.len() as i64);
    }

    #[tokio::test]
    async fn test_chunked_reads_on_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "chunks.csv", "EIN,NAME\n1,a\n2,b\n3,c\n");

        assert_eq!(count_rows(path.clone()).await.unwrap(), 3);

        let source = open_source(path.clone()).await.unwrap();
        let (source, first) = source.read_chunk(2).await.unwrap();
        let (_, second) = source.read_chunk(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second, vec![vec!["3".to_string(), "c".to_string()]]);

        let slice = open_source(path).await.unwrap().read_slice(1, 1).await.unwrap();
        assert_eq!(slice, vec![vec!["2".to_string(), "b".to_string()]]);
    }
}
