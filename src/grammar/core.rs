use crate::common::{LedgerError, Result};

/// Longest delimiter set or comment prefix, in bytes. Matches the length
/// byte in the persisted rules file.
pub const MAX_TOKEN_CHARS: usize = 32;

/// Probe text the constructor tokenizes to validate a delimiter set.
const PROBE: &[u8] = b"probe text\t0 1,2;3\n";

/// Line-level whitespace: space, tab, CR, LF, FF.
#[inline]
pub fn is_line_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0C)
}

/// True if every byte of the line is whitespace.
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|&b| is_line_ws(b))
}

/// How the grammar classifies one raw line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineClass {
    /// Skipped: entirely whitespace (and the grammar skips blank lines).
    Blank,
    /// Skipped: starts with the comment prefix.
    Comment,
    /// Counts as a row.
    Ledgerable,
}

impl LineClass {
    pub fn is_ledgerable(self) -> bool {
        matches!(self, LineClass::Ledgerable)
    }
}

/// Tokenization and line-classification rules for a log.
///
/// Immutable; the `with_*` mutators return new values. The delimiter set and
/// comment prefix are validated at construction, so a `Grammar` in hand is
/// always usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grammar {
    token_delimiters: Option<String>,
    comment_prefix: Option<Vec<u8>>,
    skip_blank_lines: bool,
}

impl Default for Grammar {
    /// Whitespace tokens, no comment lines, blank lines skipped.
    fn default() -> Self {
        Grammar {
            token_delimiters: None,
            comment_prefix: None,
            skip_blank_lines: true,
        }
    }
}

impl Grammar {
    pub fn new(
        skip_blank_lines: bool,
        token_delimiters: Option<&str>,
        comment_prefix: Option<&str>,
    ) -> Result<Self> {
        Grammar {
            token_delimiters: None,
            comment_prefix: None,
            skip_blank_lines,
        }
        .with_token_delimiters(token_delimiters)?
        .with_comment_prefix(comment_prefix)
    }

    /// Replaces the delimiter set. `None` means any whitespace.
    pub fn with_token_delimiters(mut self, delimiters: Option<&str>) -> Result<Self> {
        if let Some(d) = delimiters {
            validate_delimiters(d)?;
        }
        self.token_delimiters = delimiters.map(str::to_owned);
        Ok(self)
    }

    /// Replaces the comment prefix. `None` disables comment matching.
    pub fn with_comment_prefix(mut self, prefix: Option<&str>) -> Result<Self> {
        if let Some(p) = prefix {
            if p.is_empty() {
                return Err(LedgerError::GrammarInvalid("empty comment prefix".into()));
            }
            if p.len() > MAX_TOKEN_CHARS {
                return Err(LedgerError::GrammarInvalid(format!(
                    "comment prefix exceeds {MAX_TOKEN_CHARS} bytes"
                )));
            }
        }
        self.comment_prefix = prefix.map(|p| p.as_bytes().to_vec());
        Ok(self)
    }

    pub fn with_skip_blank_lines(mut self, skip: bool) -> Self {
        self.skip_blank_lines = skip;
        self
    }

    pub fn token_delimiters(&self) -> Option<&str> {
        self.token_delimiters.as_deref()
    }

    pub fn comment_prefix(&self) -> Option<&[u8]> {
        self.comment_prefix.as_deref()
    }

    pub fn skip_blank_lines(&self) -> bool {
        self.skip_blank_lines
    }

    /// Byte-prefix match against the comment prefix. No allocation; absent
    /// prefix never matches.
    pub fn is_comment(&self, line: &[u8]) -> bool {
        match &self.comment_prefix {
            Some(prefix) => line.starts_with(prefix),
            None => false,
        }
    }

    pub fn classify(&self, line: &[u8]) -> LineClass {
        if self.skip_blank_lines && is_blank(line) {
            LineClass::Blank
        } else if self.is_comment(line) {
            LineClass::Comment
        } else {
            LineClass::Ledgerable
        }
    }

    #[inline]
    fn is_delimiter(&self, b: u8) -> bool {
        match &self.token_delimiters {
            Some(d) => d.as_bytes().contains(&b),
            None => is_line_ws(b),
        }
    }

    /// Splits a line into cells on runs of delimiter bytes, suppressing
    /// empty tokens. The line terminator (`\n`, optionally preceded by `\r`)
    /// is stripped first so custom delimiter sets never see it.
    pub fn tokenize<'a>(&self, line: &'a [u8]) -> Vec<&'a [u8]> {
        let content = strip_eol(line);
        let mut cells = Vec::new();
        let mut start: Option<usize> = None;
        for (i, &b) in content.iter().enumerate() {
            if self.is_delimiter(b) {
                if let Some(s) = start.take() {
                    cells.push(&content[s..i]);
                }
            } else if start.is_none() {
                start = Some(i);
            }
        }
        if let Some(s) = start {
            cells.push(&content[s..]);
        }
        cells
    }
}

/// Drops a trailing `\n` and an immediately preceding `\r`.
pub fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn validate_delimiters(delimiters: &str) -> Result<()> {
    if delimiters.is_empty() {
        return Err(LedgerError::GrammarInvalid("empty delimiter set".into()));
    }
    if delimiters.len() > MAX_TOKEN_CHARS {
        return Err(LedgerError::GrammarInvalid(format!(
            "delimiter set exceeds {MAX_TOKEN_CHARS} bytes"
        )));
    }
    if !delimiters.is_ascii() {
        return Err(LedgerError::GrammarInvalid(
            "delimiter set must be ASCII".into(),
        ));
    }
    // Run the set against the probe: a delimiter set that swallows every
    // probe byte cannot produce cells from real text.
    let bytes = delimiters.as_bytes();
    if PROBE.iter().all(|b| bytes.contains(b)) {
        return Err(LedgerError::GrammarInvalid(
            "delimiter set matches all probe text".into(),
        ));
    }
    Ok(())
}
