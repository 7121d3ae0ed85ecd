use super::error::HttpError;
use super::layout;

/// Line-oriented reader over an HTTP/1.x payload.
///
/// Lines end at `\n` with an optional preceding `\r`; a final line without
/// terminator is still returned because captured segments are often cut
/// mid-header.
pub struct HttpReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> HttpReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    pub fn require_len(&self, needed: usize) -> Result<(), HttpError> {
        if self.payload.len() < needed {
            return Err(HttpError::TooShort {
                needed,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    pub fn prefix(&self) -> Result<&'a [u8; layout::PREFIX_LEN], HttpError> {
        self.payload
            .first_chunk::<{ layout::PREFIX_LEN }>()
            .ok_or(HttpError::TooShort {
                needed: layout::PREFIX_LEN,
                actual: self.payload.len(),
            })
    }

    pub fn next_line(&mut self) -> Option<&'a [u8]> {
        let rest = self.payload.get(self.pos..)?;
        if rest.is_empty() {
            return None;
        }
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }

    pub fn start_line(&mut self) -> Result<&'a str, HttpError> {
        let line = self
            .next_line()
            .filter(|line| !line.is_empty())
            .ok_or(HttpError::MissingStartLine)?;
        std::str::from_utf8(line).map_err(|_| HttpError::NotUtf8)
    }

    /// Read header fields up to the blank line.
    ///
    /// Parsing stops quietly at the first line that is not a field, so a
    /// truncated header block yields the fields seen so far.
    pub fn headers(&mut self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();
        while let Some(line) = self.next_line() {
            if line.is_empty() {
                break;
            }
            if matches!(line[0], b' ' | b'\t') {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(String::from_utf8_lossy(line).trim());
                    continue;
                }
                break;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                break;
            };
            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            if name.is_empty() {
                break;
            }
            let value = String::from_utf8_lossy(&line[colon + 1..])
                .trim()
                .to_string();
            headers.push((name, value));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::HttpReader;
    use crate::protocols::http::error::HttpError;

    #[test]
    fn lines_strip_crlf() {
        let mut reader = HttpReader::new(b"a\r\nb\nc");
        assert_eq!(reader.next_line(), Some(&b"a"[..]));
        assert_eq!(reader.next_line(), Some(&b"b"[..]));
        assert_eq!(reader.next_line(), Some(&b"c"[..]));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn headers_stop_at_blank_line() {
        let mut reader = HttpReader::new(b"Host: a\r\nX-Long: one\r\n two\r\n\r\nbody: no");
        let headers = reader.headers();
        assert_eq!(
            headers,
            vec![
                ("Host".to_string(), "a".to_string()),
                ("X-Long".to_string(), "one two".to_string()),
            ]
        );
    }

    #[test]
    fn truncated_headers_are_kept() {
        let mut reader = HttpReader::new(b"Host: a\r\nAccept: te");
        let headers = reader.headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].1, "te");
    }

    #[test]
    fn empty_start_line_is_missing() {
        let mut reader = HttpReader::new(b"\r\nHost: a");
        assert_eq!(reader.start_line(), Err(HttpError::MissingStartLine));
    }

    #[test]
    fn prefix_requires_four_bytes() {
        let reader = HttpReader::new(b"GE");
        assert!(matches!(reader.prefix(), Err(HttpError::TooShort { .. })));
    }
}
