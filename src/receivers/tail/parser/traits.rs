// SPDX-License-Identifier: Apache-2.0

use crate::receivers::tail::error::Result;
use crate::receivers::tail::record::Record;

/// A format-specific line parser.
///
/// One instance is bound to one followed file, so implementations may keep
/// per-file state (a learned header row, for example).
pub trait Parser: Send {
    /// Parse a whole buffer, which may hold several lines and, for
    /// header-sensitive formats, header rows.
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>>;

    /// Parse a single line that is known not to be a header.
    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>>;

    /// Whether the first line of a file has to go through [`Parser::parse`].
    fn header_sensitive(&self) -> bool {
        false
    }
}

/// Binds a [`Parser`] to one file and routes the file's first line through
/// the whole-buffer entry point when the format asks for it.
pub struct LineParser {
    parser: Box<dyn Parser>,
    first_line: bool,
}

impl LineParser {
    pub fn new(parser: Box<dyn Parser>) -> Self {
        Self {
            parser,
            first_line: true,
        }
    }

    pub fn is_first_line(&self) -> bool {
        self.first_line
    }

    /// Convert one raw line into records. A single trailing `\r` is removed.
    /// The first-line state is cleared whether or not parsing succeeds.
    pub fn parse_line(&mut self, raw: &str) -> Result<Vec<Record>> {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let result = if self.first_line && self.parser.header_sensitive() {
            self.parser.parse(line)
        } else {
            self.parser.parse_line(line)
        };
        self.first_line = false;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::tail::error::Error;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Records which entry point saw which line
    struct Recorder {
        header_sensitive: bool,
        calls: Arc<Mutex<Vec<(&'static str, String)>>>,
    }

    impl Recorder {
        fn record(&self, entry: &'static str, line: &str) -> Result<Vec<Record>> {
            self.calls.lock().unwrap().push((entry, line.to_string()));
            if line == "bad" {
                return Err(Error::Format("bad line".to_string()));
            }
            Ok(vec![Record::new(line, BTreeMap::new(), BTreeMap::new(), Utc::now())])
        }
    }

    impl Parser for Recorder {
        fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
            self.record("parse", buf)
        }

        fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
            self.record("parse_line", line)
        }

        fn header_sensitive(&self) -> bool {
            self.header_sensitive
        }
    }

    fn recording(header_sensitive: bool) -> (LineParser, Arc<Mutex<Vec<(&'static str, String)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let parser = LineParser::new(Box::new(Recorder {
            header_sensitive,
            calls: calls.clone(),
        }));
        (parser, calls)
    }

    #[test]
    fn test_first_line_goes_to_parse_once() {
        let (mut parser, calls) = recording(true);
        assert!(parser.is_first_line());
        parser.parse_line("header").unwrap();
        parser.parse_line("row1").unwrap();
        parser.parse_line("row2").unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], ("parse", "header".to_string()));
        assert_eq!(calls[1], ("parse_line", "row1".to_string()));
        assert_eq!(calls[2], ("parse_line", "row2".to_string()));
    }

    #[test]
    fn test_plain_format_never_uses_parse() {
        let (mut parser, calls) = recording(false);
        parser.parse_line("a").unwrap();
        parser.parse_line("b").unwrap();
        assert!(calls.lock().unwrap().iter().all(|(entry, _)| *entry == "parse_line"));
    }

    #[test]
    fn test_first_line_cleared_on_error() {
        let (mut parser, calls) = recording(true);
        assert!(parser.parse_line("bad").is_err());
        assert!(!parser.is_first_line());
        parser.parse_line("row").unwrap();
        assert_eq!(calls.lock().unwrap()[1].0, "parse_line");
    }

    #[test]
    fn test_strips_one_carriage_return() {
        let (mut parser, calls) = recording(false);
        let records = parser.parse_line("value\r").unwrap();
        assert_eq!(records[0].name(), "value");
        parser.parse_line("two\r\r").unwrap();
        assert_eq!(calls.lock().unwrap()[1].1, "two\r");
    }
}
