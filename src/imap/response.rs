//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of mhsync.
//
// mhsync is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// mhsync is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// mhsync. If not, see <http://www.gnu.org/licenses/>.

//! Interpretation of the few IMAP responses `ImapSession` cares about.
//!
//! Everything here works on logical lines as returned by
//! `Client::read_response`, i.e., with literals spliced in and without the
//! final CRLF. Anything that does not parse is simply not recognised; it is
//! up to the caller whether that matters.

use std::borrow::Cow;
use std::str;

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::store::model::Uid;

lazy_static! {
    static ref TAGGED: Regex =
        Regex::new(r"(?-u)^[^ *+]+ (?i)(OK|NO|BAD)(?: (.*))?$").unwrap();
    static ref UIDVALIDITY: Regex =
        Regex::new(r"^\* (?i)OK \[UIDVALIDITY ([0-9]+)\]").unwrap();
    static ref EXISTS: Regex = Regex::new(r"^\* ([0-9]+) (?i)EXISTS$").unwrap();
    static ref SEARCH: Regex =
        Regex::new(r"^\* (?i)SEARCH((?: [0-9]+)*) *$").unwrap();
    static ref CAPABILITY: Regex =
        Regex::new(r"^\* (?i)(?:OK \[)?CAPABILITY ([^\]]*)").unwrap();
    static ref FETCH: Regex = Regex::new(r"^\* [0-9]+ (?i)FETCH \(").unwrap();
    static ref BYE: Regex = Regex::new(r"^\* (?i)BYE\b").unwrap();
}

/// The condition of a tagged completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Ok,
    No,
    Bad,
}

/// A tagged command completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub cond: Cond,
    pub text: String,
}

impl Completion {
    /// Parse `line` as a tagged completion.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let cap = TAGGED.captures(line)?;
        let cond = match cap.get(1)?.as_bytes().to_ascii_uppercase().as_slice()
        {
            b"OK" => Cond::Ok,
            b"NO" => Cond::No,
            _ => Cond::Bad,
        };
        let text = cap
            .get(2)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
            .unwrap_or_default();
        Some(Completion { cond, text })
    }

    pub fn is_ok(&self) -> bool {
        Cond::Ok == self.cond
    }

    /// Describe a failed completion for error messages.
    pub fn describe(&self) -> String {
        let cond = match self.cond {
            Cond::Ok => "OK",
            Cond::No => "NO",
            Cond::Bad => "BAD",
        };

        if self.text.is_empty() {
            cond.to_owned()
        } else {
            format!("{} {}", cond, self.text)
        }
    }
}

fn parse_u32(bytes: &[u8]) -> Option<u32> {
    str::from_utf8(bytes).ok()?.parse().ok()
}

/// `* OK [UIDVALIDITY n]`
pub fn uid_validity(line: &[u8]) -> Option<u32> {
    parse_u32(UIDVALIDITY.captures(line)?.get(1)?.as_bytes())
}

/// `* n EXISTS`
pub fn exists(line: &[u8]) -> Option<u32> {
    parse_u32(EXISTS.captures(line)?.get(1)?.as_bytes())
}

/// `* SEARCH n n n...`
pub fn search(line: &[u8]) -> Option<Vec<Uid>> {
    SEARCH
        .captures(line)?
        .get(1)?
        .as_bytes()
        .split(|&b| b' ' == b)
        .filter(|s| !s.is_empty())
        .map(|s| parse_u32(s).map(Uid))
        .collect()
}

/// `* CAPABILITY ...` or `* OK [CAPABILITY ...] ...`
pub fn capabilities(line: &[u8]) -> Option<Vec<String>> {
    let caps = CAPABILITY.captures(line)?.get(1)?.as_bytes();
    Some(
        String::from_utf8_lossy(caps)
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

/// `* BYE ...`
pub fn is_bye(line: &[u8]) -> bool {
    BYE.is_match(line)
}

/// The attributes of a `FETCH` response that we care about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchData<'a> {
    pub uid: Option<Uid>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// `BODY[]` or `RFC822`. `None` for `NIL` or if absent.
    pub body: Option<Cow<'a, [u8]>>,
}

/// Parse `line` as a `FETCH` response.
///
/// Returns `None` if it is not a `FETCH` response at all or if it is too
/// malformed to make sense of.
pub fn fetch(line: &[u8]) -> Option<FetchData<'_>> {
    let prefix = FETCH.find(line)?;
    let mut lexer = Lexer {
        data: line,
        pos: prefix.end(),
    };
    let mut data = FetchData::default();

    loop {
        let key = match lexer.next()? {
            Token::Close => break,
            Token::Atom(key) => key.to_ascii_uppercase(),
            _ => return None,
        };

        match key.as_slice() {
            b"UID" => match lexer.next()? {
                Token::Atom(n) => data.uid = Some(Uid(parse_u32(n)?)),
                _ => return None,
            },
            b"INTERNALDATE" => match lexer.next()? {
                Token::String(s) => {
                    data.internal_date = parse_internal_date(&s);
                }
                _ => return None,
            },
            b"BODY[]" | b"RFC822" => match lexer.next()? {
                Token::String(s) => data.body = Some(s),
                Token::Atom(nil) if nil.eq_ignore_ascii_case(b"NIL") => (),
                _ => return None,
            },
            _ => lexer.skip_value()?,
        }
    }

    Some(data)
}

/// Parse an IMAP `date-time`, e.g. `17-Jul-1996 02:44:25 -0700`.
pub fn parse_internal_date(s: &[u8]) -> Option<DateTime<FixedOffset>> {
    let s = str::from_utf8(s).ok()?.trim();
    DateTime::parse_from_str(s, "%d-%b-%Y %H:%M:%S %z").ok()
}

#[derive(Debug)]
enum Token<'a> {
    Atom(&'a [u8]),
    /// A quoted string or a literal.
    String(Cow<'a, [u8]>),
    Open,
    Close,
}

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn next(&mut self) -> Option<Token<'a>> {
        while self.data.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }

        let data = self.data;
        match *data.get(self.pos)? {
            b'(' => {
                self.pos += 1;
                Some(Token::Open)
            }
            b')' => {
                self.pos += 1;
                Some(Token::Close)
            }
            b'"' => self.quoted(),
            b'{' | b'~' => self.literal(),
            _ => {
                // Atoms like BODY[HEADER.FIELDS (SUBJECT)] may contain spaces
                // and parentheses inside the brackets.
                let start = self.pos;
                let mut depth = 0usize;
                while let Some(&b) = data.get(self.pos) {
                    match b {
                        b'[' => depth += 1,
                        b']' => depth = depth.saturating_sub(1),
                        b' ' | b'(' | b')' if 0 == depth => break,
                        _ => (),
                    }
                    self.pos += 1;
                }
                Some(Token::Atom(&data[start..self.pos]))
            }
        }
    }

    fn quoted(&mut self) -> Option<Token<'a>> {
        let data = self.data;
        self.pos += 1;
        let start = self.pos;
        let mut unescaped: Option<Vec<u8>> = None;
        loop {
            match *data.get(self.pos)? {
                b'"' => {
                    let raw = &data[start..self.pos];
                    self.pos += 1;
                    return Some(Token::String(match unescaped {
                        Some(v) => Cow::Owned(v),
                        None => Cow::Borrowed(raw),
                    }));
                }
                b'\\' => {
                    let v = unescaped
                        .get_or_insert_with(|| data[start..self.pos].to_vec());
                    v.push(*data.get(self.pos + 1)?);
                    self.pos += 2;
                }
                b => {
                    if let Some(ref mut v) = unescaped {
                        v.push(b);
                    }
                    self.pos += 1;
                }
            }
        }
    }

    fn literal(&mut self) -> Option<Token<'a>> {
        let data = self.data;
        if b'~' == data[self.pos] {
            self.pos += 1;
        }
        if Some(&b'{') != data.get(self.pos) {
            return None;
        }

        let close = self.pos + memchr::memchr(b'}', &data[self.pos..])?;
        let len = data[self.pos + 1..close]
            .strip_suffix(b"+")
            .unwrap_or(&data[self.pos + 1..close]);
        let len = parse_u32(len)? as usize;

        let start = close + 1 + 2;
        if !data.get(close + 1..start)?.eq(b"\r\n") {
            return None;
        }

        let end = start.checked_add(len)?;
        let content = data.get(start..end)?;
        self.pos = end;
        Some(Token::String(Cow::Borrowed(content)))
    }

    /// Skip over one value, which may be a parenthesised list.
    fn skip_value(&mut self) -> Option<()> {
        match self.next()? {
            Token::Open => loop {
                match self.next()? {
                    Token::Close => return Some(()),
                    Token::Open => {
                        // Back up so the nested list is skipped as a whole
                        self.pos -= 1;
                        self.skip_value()?;
                    }
                    _ => (),
                }
            },
            Token::Close => None,
            _ => Some(()),
        }
    }
}
