//! Streaming CSV/TSV writer and reader with optional BOM and source encoding.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

use crate::error::{DbcopyError, Result};

const UTF8_BOM: &str = "\u{feff}";

/// Quote a field when it holds the delimiter, a quote, a line break or
/// leading/trailing blanks.
#[must_use]
pub fn escape_field(field: &str, delim: char) -> Cow<'_, str> {
    let needs_quotes = field.contains(delim)
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r')
        || field.starts_with(' ')
        || field.ends_with(' ');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[must_use]
pub fn is_tsv_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
}

pub struct CsvWriter<W: Write> {
    out: W,
    delim: char,
}

impl<W: Write> CsvWriter<W> {
    /// # Errors
    /// Returns `Io` when the BOM cannot be written.
    pub fn new(mut out: W, is_tsv: bool, with_bom: bool) -> Result<Self> {
        if with_bom {
            out.write_all(UTF8_BOM.as_bytes())?;
        }
        Ok(Self { out, delim: if is_tsv { '\t' } else { ',' } })
    }

    /// # Errors
    /// Returns `Io` on write failure.
    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<()> {
        let mut line = String::new();
        for (k, field) in row.iter().enumerate() {
            if k > 0 {
                line.push(self.delim);
            }
            line.push_str(&escape_field(field.as_ref(), self.delim));
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        Ok(())
    }

    /// # Errors
    /// Returns `Io` on flush failure.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Create (truncate) a CSV file; the delimiter follows the file extension.
///
/// # Errors
/// Returns `Io` when the file cannot be created.
pub fn create_csv_file(path: &Path, with_bom: bool) -> Result<CsvWriter<BufWriter<File>>> {
    let file = File::create(path)
        .map_err(|err| DbcopyError::Io(format!("failed to create {}: {err}", path.display())))?;
    CsvWriter::new(BufWriter::new(file), is_tsv_path(path), with_bom)
}

/// Open a CSV file for appending rows after an existing header.
///
/// # Errors
/// Returns `Io` when the file cannot be opened.
pub fn append_csv_file(path: &Path) -> Result<CsvWriter<BufWriter<File>>> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|err| DbcopyError::Io(format!("failed to open {}: {err}", path.display())))?;
    CsvWriter::new(BufWriter::new(file), is_tsv_path(path), false)
}

/// Resolve a code page name such as `windows-1252`, `1252` or `UTF-8`.
///
/// # Errors
/// Returns `InvalidArgument` for an unknown encoding.
pub fn encoding_by_name(code_page: &str) -> Result<&'static Encoding> {
    let name = code_page.trim();
    if name.is_empty() {
        return Ok(UTF_8);
    }
    let label = if name.chars().all(|c| c.is_ascii_digit()) {
        format!("windows-{name}")
    } else {
        name.to_string()
    };
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| DbcopyError::invalid(format!("unknown code page: {code_page}")))
}

/// Converts an input byte stream to UTF-8. A byte order mark, if present,
/// selects the encoding and is removed.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    in_buf: Vec<u8>,
    in_len: usize,
    out: String,
    out_pos: usize,
    done: bool,
}

impl<R: Read> DecodingReader<R> {
    #[must_use]
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            in_buf: vec![0; 64 * 1024],
            in_len: 0,
            out: String::new(),
            out_pos: 0,
            done: false,
        }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        let n = self.inner.read(&mut self.in_buf[self.in_len..])?;
        let last = n == 0;
        let total = self.in_len + n;
        self.out.clear();
        self.out_pos = 0;
        let need = self.decoder.max_utf8_buffer_length(total).unwrap_or(total * 4 + 16);
        self.out.reserve(need);
        let (result, read, _) = self.decoder.decode_to_string(&self.in_buf[..total], &mut self.out, last);
        self.in_buf.copy_within(read..total, 0);
        self.in_len = total - read;
        if last && result == CoderResult::InputEmpty {
            self.done = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.out_pos < self.out.len() {
                let src = &self.out.as_bytes()[self.out_pos..];
                let n = src.len().min(buf.len());
                buf[..n].copy_from_slice(&src[..n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Iterator over CSV records; quoted fields may span lines.
pub struct CsvReader<R: BufRead> {
    inner: R,
    delim: char,
    is_first: bool,
    line_no: usize,
}

impl<R: BufRead> CsvReader<R> {
    pub fn new(inner: R, is_tsv: bool) -> Self {
        Self { inner, delim: if is_tsv { '\t' } else { ',' }, is_first: true, line_no: 0 }
    }

    fn read_line(&mut self, buf: &mut String) -> Result<bool> {
        buf.clear();
        let n = self.inner.read_line(buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        if self.is_first {
            self.is_first = false;
            if let Some(rest) = buf.strip_prefix(UTF8_BOM) {
                *buf = rest.to_string();
            }
        }
        Ok(true)
    }

    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        let mut line = String::new();
        loop {
            if !self.read_line(&mut line)? {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        let start_line = self.line_no;

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut was_quoted = false;
        loop {
            let mut chars = line.chars().peekable();
            while let Some(c) = chars.next() {
                if in_quotes {
                    if c == '"' {
                        if chars.peek() == Some(&'"') {
                            field.push('"');
                            chars.next();
                        } else {
                            in_quotes = false;
                        }
                    } else {
                        field.push(c);
                    }
                } else if c == self.delim {
                    fields.push(finish_field(&mut field, was_quoted));
                    was_quoted = false;
                } else if c == '"' && field.trim().is_empty() && !was_quoted {
                    field.clear();
                    in_quotes = true;
                    was_quoted = true;
                } else {
                    field.push(c);
                }
            }
            if !in_quotes {
                break;
            }
            field.push('\n');
            if !self.read_line(&mut line)? {
                return Err(DbcopyError::Io(format!(
                    "unterminated quoted field starting at line {start_line}"
                )));
            }
        }
        fields.push(finish_field(&mut field, was_quoted));
        Ok(Some(fields))
    }
}

fn finish_field(field: &mut String, was_quoted: bool) -> String {
    let value = std::mem::take(field);
    if was_quoted {
        value
    } else {
        value.trim().to_string()
    }
}

impl<R: BufRead> Iterator for CsvReader<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

pub type FileCsvReader = CsvReader<BufReader<DecodingReader<File>>>;

/// Open a CSV or TSV file, converting from `code_page` (UTF-8 when empty).
///
/// # Errors
/// Returns `Io` when the file cannot be opened and `InvalidArgument` for an
/// unknown code page.
pub fn open_csv_file(path: &Path, code_page: &str) -> Result<FileCsvReader> {
    let encoding = encoding_by_name(code_page)?;
    let file = File::open(path)
        .map_err(|err| DbcopyError::Io(format!("failed to open {}: {err}", path.display())))?;
    Ok(CsvReader::new(BufReader::new(DecodingReader::new(file, encoding)), is_tsv_path(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn read_all(text: &[u8], encoding: &'static Encoding) -> anyhow::Result<Vec<Vec<String>>> {
        let reader = CsvReader::new(BufReader::new(DecodingReader::new(text, encoding)), false);
        Ok(reader.collect::<Result<Vec<_>>>()?)
    }

    #[test]
    fn writer_quotes_and_prepends_bom() -> anyhow::Result<()> {
        let mut w = CsvWriter::new(Vec::new(), false, true)?;
        w.write_row(&["sub_id", "dim0", "param_value"])?;
        w.write_row(&["0", "a,b", "say \"hi\""])?;
        let text = String::from_utf8(w.into_inner())?;
        assert_eq!(text, "\u{feff}sub_id,dim0,param_value\n0,\"a,b\",\"say \"\"hi\"\"\"\n");
        Ok(())
    }

    #[test]
    fn tsv_uses_tab_delimiter() -> anyhow::Result<()> {
        let mut w = CsvWriter::new(Vec::new(), true, false)?;
        w.write_row(&["a", "b,c"])?;
        assert_eq!(String::from_utf8(w.into_inner())?, "a\tb,c\n");
        Ok(())
    }

    #[test]
    fn reader_strips_bom_and_handles_multiline_quotes() -> anyhow::Result<()> {
        let rows = read_all(b"\xEF\xBB\xBFname,note\r\nx,\"line1\nline2\"\r\n\r\ny, z \n", UTF_8)?;
        assert_eq!(rows[0], vec!["name", "note"]);
        assert_eq!(rows[1], vec!["x", "line1\nline2"]);
        assert_eq!(rows[2], vec!["y", "z"]);
        assert_eq!(rows.len(), 3);
        Ok(())
    }

    #[test]
    fn reader_decodes_windows_1252() -> anyhow::Result<()> {
        let enc = encoding_by_name("1252")?;
        let rows = read_all(b"caf\xE9,1\n", enc)?;
        assert_eq!(rows[0][0], "café");
        Ok(())
    }

    #[test]
    fn unterminated_quote_is_error() {
        let reader = CsvReader::new(BufReader::new(&b"a,\"open\n"[..]), false);
        let rows: Vec<_> = reader.collect();
        assert!(rows[0].is_err());
    }

    #[test]
    fn unknown_code_page_is_invalid() {
        assert!(encoding_by_name("no-such-encoding").is_err());
    }

    proptest! {
        #[test]
        fn escaped_fields_read_back(fields in proptest::collection::vec("[a-z ,\"\n]{0,12}", 1..6)) {
            let mut w = CsvWriter::new(Vec::new(), false, false).map_err(|e| TestCaseError::fail(e.to_string()))?;
            w.write_row(&fields).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let bytes = w.into_inner();
            let mut reader = CsvReader::new(BufReader::new(&bytes[..]), false);
            let blank = fields.iter().all(|f| f.trim().is_empty()) && fields.len() == 1;
            match reader.next() {
                Some(Ok(row)) => {
                    let expected: Vec<String> = fields.iter().map(|f| if f.contains(['"', ',', '\n']) || f.starts_with(' ') || f.ends_with(' ') { f.clone() } else { f.trim().to_string() }).collect();
                    prop_assert_eq!(row, expected);
                }
                None => prop_assert!(blank),
                Some(Err(e)) => return Err(TestCaseError::fail(e.to_string())),
            }
        }
    }
}
