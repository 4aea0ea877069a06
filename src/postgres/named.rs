use std::fmt::Write;

use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::types::RowValues;

/// A query whose `:name` placeholders were rewritten to Postgres `$n` ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    /// Query text sent to the server.
    pub sql: String,
    /// Placeholder names; `names[i]` binds `$i+1`.
    pub names: Vec<String>,
}

impl NamedQuery {
    /// Values for `$1..$n`, looked up by name.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::MissingParameter`] for a placeholder without a value.
    pub fn bind<'p>(&self, params: &'p NamedParams) -> Result<Vec<&'p RowValues>, SqlStmtError> {
        self.names.iter().map(|name| params.require(name)).collect()
    }
}

enum State {
    Normal,
    SingleQuoted,
    EscapeQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted { start: usize, len: usize },
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn ident_end(bytes: &[u8], start: usize) -> Option<usize> {
    if !bytes.get(start).copied().is_some_and(is_ident_start) {
        return None;
    }
    let len = bytes[start..].iter().take_while(|b| is_ident_char(**b)).count();
    Some(start + len)
}

/// Index of the `$` closing a dollar-quote opener starting at `start`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let tag_start = start + 1;
    match bytes.get(tag_start) {
        Some(b'$') => Some(tag_start),
        Some(b) if is_ident_start(*b) => {
            let len = bytes[tag_start..].iter().take_while(|b| is_ident_char(**b)).count();
            (bytes.get(tag_start + len) == Some(&b'$')).then_some(tag_start + len)
        }
        _ => None,
    }
}

/// Rewrite `:name` placeholders to `$n`, numbering names by first appearance.
///
/// Quoted strings and identifiers, `E''` strings, comments, dollar-quoted bodies and
/// `::` casts are copied untouched. The same name used twice binds the same `$n`.
///
/// # Errors
/// Returns [`SqlStmtError::ParameterError`] if the query already uses positional
/// `$n` placeholders.
pub fn compile_named(sql: &str) -> Result<NamedQuery, SqlStmtError> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut copied = 0;
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        let next = bytes.get(idx + 1).copied();
        match state {
            State::Normal => match b {
                b'\'' => {
                    let escaped = idx > 0
                        && matches!(bytes[idx - 1], b'E' | b'e')
                        && (idx < 2 || !is_ident_char(bytes[idx - 2]));
                    state = if escaped {
                        State::EscapeQuoted
                    } else {
                        State::SingleQuoted
                    };
                }
                b'"' => state = State::DoubleQuoted,
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' if idx == 0 || !is_ident_char(bytes[idx - 1]) => {
                    if let Some(end) = dollar_tag_end(bytes, idx) {
                        state = State::DollarQuoted {
                            start: idx,
                            len: end - idx + 1,
                        };
                        idx = end;
                    } else if next.is_some_and(|n| n.is_ascii_digit()) {
                        return Err(SqlStmtError::ParameterError(format!(
                            "positional placeholder at byte {idx}; use :name placeholders"
                        )));
                    }
                }
                b':' if next == Some(b':') => idx += 1,
                b':' => {
                    if let Some(end) = ident_end(bytes, idx + 1) {
                        let name = &sql[idx + 1..end];
                        let pos = match names.iter().position(|n| n == name) {
                            Some(pos) => pos,
                            None => {
                                names.push(name.to_owned());
                                names.len() - 1
                            }
                        };
                        out.push_str(&sql[copied..idx]);
                        let _ = write!(out, "${}", pos + 1);
                        copied = end;
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted | State::DoubleQuoted => {
                let quote = if matches!(state, State::SingleQuoted) {
                    b'\''
                } else {
                    b'"'
                };
                if b == quote {
                    if next == Some(quote) {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::EscapeQuoted => match b {
                b'\\' => idx += 1,
                b'\'' if next == Some(b'\'') => idx += 1,
                b'\'' => state = State::Normal,
                _ => {}
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'/' && next == Some(b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if b == b'*' && next == Some(b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted { start, len } => {
                if b == b'$' && bytes[idx..].starts_with(&bytes[start..start + len]) {
                    idx += len - 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    out.push_str(&sql[copied..]);
    Ok(NamedQuery { sql: out, names })
}
