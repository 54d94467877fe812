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

//! RFC 2047 "encoded words", as found in `Subject` and `From` headers.

use std::borrow::Cow;

use encoding_rs::Encoding;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([!->@-~]*)\?([!->@-~]*)\?([!->@-~]*)\?=$").unwrap();
}

/// Test if `word` (in its entirety) is an RFC 2047 encoded word, and if so,
/// return its decoded value.
///
/// Returns `None` if `word` is not an encoded word or could not be decoded,
/// in which case the caller should use it verbatim.
///
/// Words longer than the 75 characters RFC 2047 permits are accepted, since
/// plenty of agents produce them.
pub fn ew_decode(word: &str) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;
    let charset = captures.get(1)?.as_str();
    let transfer_encoding = captures.get(2)?.as_str();
    let content = captures.get(3)?.as_str().as_bytes();

    let bytes = match transfer_encoding {
        "q" | "Q" => q_decode(content),
        "b" | "B" => base64::decode(content).ok()?,
        _ => return None,
    };

    // RFC 2231 permits a language suffix, e.g. "US-ASCII*EN"
    let charset = charset.split('*').next().unwrap_or(charset);
    let (decoded, _) = Encoding::for_label_no_replacement(charset.as_bytes())?
        .decode_with_bom_removal(&bytes);
    Some(decoded.into_owned())
}

/// The "Q" encoding: quoted-printable, except that `_` is a space and there
/// are no line breaks.
///
/// Malformed escapes are passed through.
fn q_decode(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;
    while i < content.len() {
        match content[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = content
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(b) = hex {
                    out.push(b);
                    i += 3;
                    continue;
                }
                out.push(b'=');
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

/// Decode every encoded word in the free text `text`.
///
/// Whitespace between two adjacent encoded words is removed; all other
/// whitespace is kept.
pub fn decode_words(text: &str) -> Cow<str> {
    if !text.contains("=?") {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut last_was_encoded = false;
    let mut rest = text;
    while !rest.is_empty() {
        let ws_len = rest.len() - rest.trim_start().len();
        let (ws, tail) = rest.split_at(ws_len);
        let word_len = tail.find(char::is_whitespace).unwrap_or(tail.len());
        let (word, tail) = tail.split_at(word_len);
        rest = tail;

        match ew_decode(word) {
            Some(decoded) => {
                if !last_was_encoded {
                    out.push_str(ws);
                }
                out.push_str(&decoded);
                last_was_encoded = true;
            }
            None => {
                out.push_str(ws);
                out.push_str(word);
                last_was_encoded = false;
            }
        }
    }

    Cow::Owned(out)
}
