use crate::error::MalformedSelectorError;
use crate::{Segment, SetEntry};

/// Characters allowed in an unquoted name.
pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

pub(crate) fn is_ident(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_ident_char)
}

/// Render a name bare when it is an identifier, quoted otherwise.
pub(crate) fn render_name(name: &str, out: &mut String) {
    if is_ident(name) {
        out.push_str(name);
        return;
    }
    out.push('"');
    for c in name.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

pub(crate) fn parse_segments(src: &str) -> Result<Vec<Segment>, MalformedSelectorError> {
    let mut parser = Parser { src, pos: 0 };
    let mut segments = Vec::new();

    loop {
        segments.push(parser.segment()?);
        match parser.peek() {
            None => break,
            Some('.') => {
                parser.bump('.');
                if parser.peek().is_none() {
                    return Err(parser.error("empty segment", parser.pos, 0));
                }
            }
            Some('}') => return Err(parser.error("unbalanced `}`", parser.pos, 1)),
            Some(c) => {
                return Err(parser.error(
                    format!("unexpected character `{c}`"),
                    parser.pos,
                    c.len_utf8(),
                ));
            }
        }
    }

    Ok(segments)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn error(&self, reason: impl ToString, start: usize, len: usize) -> MalformedSelectorError {
        MalformedSelectorError::new(self.src, reason, start, len)
    }

    fn segment(&mut self) -> Result<Segment, MalformedSelectorError> {
        let start = self.pos;
        match self.peek() {
            None | Some('.') => Err(self.error("empty segment", start, 0)),
            Some('*') => {
                self.bump('*');
                match self.peek() {
                    None | Some('.') => Ok(Segment::Wildcard),
                    Some(_) => Err(self.error(
                        "a wildcard must be a whole segment",
                        start,
                        self.segment_len(start),
                    )),
                }
            }
            Some('?') => {
                self.bump('?');
                let name = self.name()?;
                Ok(Segment::Optional(name))
            }
            Some('{') => {
                self.bump('{');
                self.set(start)
            }
            Some('}') => Err(self.error("unbalanced `}`", start, 1)),
            Some(_) => {
                let name = self.name()?;
                Ok(Segment::Attr(name))
            }
        }
    }

    fn set(&mut self, start: usize) -> Result<Segment, MalformedSelectorError> {
        if self.peek() == Some('}') {
            return Err(self.error("empty set", start, 2));
        }

        let mut entries = Vec::new();
        loop {
            let optional = if self.peek() == Some('?') {
                self.bump('?');
                true
            } else {
                false
            };
            let name = self.name()?;
            entries.push(SetEntry { name, optional });

            match self.peek() {
                Some(',') => self.bump(','),
                Some('}') => {
                    self.bump('}');
                    return Ok(Segment::Set(entries));
                }
                None => {
                    return Err(self.error("unbalanced `{`", start, self.pos - start));
                }
                Some(c) => {
                    return Err(self.error(
                        format!("unexpected character `{c}` in set"),
                        self.pos,
                        c.len_utf8(),
                    ));
                }
            }
        }
    }

    fn name(&mut self) -> Result<String, MalformedSelectorError> {
        let start = self.pos;
        if self.peek() == Some('"') {
            return self.quoted(start);
        }

        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            self.bump(c);
        }

        if self.pos == start {
            return match self.peek() {
                None | Some('.') | Some(',') | Some('}') => {
                    Err(self.error("empty segment", start, 0))
                }
                Some(c) => Err(self.error(
                    format!("`{c}` is not allowed in a name"),
                    start,
                    c.len_utf8(),
                )),
            };
        }

        Ok(self.src[start..self.pos].to_string())
    }

    fn quoted(&mut self, start: usize) -> Result<String, MalformedSelectorError> {
        self.bump('"');
        let mut name = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error("unterminated quoted name", start, self.pos - start));
                }
                Some('"') => {
                    self.bump('"');
                    break;
                }
                Some('\\') => {
                    self.bump('\\');
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => {
                            self.bump(c);
                            name.push(c);
                        }
                        _ => {
                            return Err(self.error(
                                "only `\\\"` and `\\\\` escapes are supported",
                                self.pos - 1,
                                2,
                            ));
                        }
                    }
                }
                Some(c) => {
                    self.bump(c);
                    name.push(c);
                }
            }
        }

        if name.is_empty() {
            return Err(self.error("empty segment", start, self.pos - start));
        }
        Ok(name)
    }

    /// Length of the segment starting at `start`, for error spans.
    fn segment_len(&self, start: usize) -> usize {
        self.src[start..]
            .find('.')
            .unwrap_or(self.src.len() - start)
    }
}
