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

//! Extraction of the few headers the folder listing shows.

use std::borrow::Cow;
use std::str;

use chrono::prelude::*;

use super::encoded_word::decode_words;

/// Headers beyond this many bytes are not examined.
const MAX_HEADER_BLOCK: usize = 256 * 1024;

/// The parts of a message shown in a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSummary {
    pub subject: Option<String>,
    /// The display name of the sender, or their address if there is none.
    pub from: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
}

/// Parse the header block of `message`.
///
/// This never fails; headers which are missing or cannot be understood are
/// simply left as `None`. Only the first occurrence of each header counts.
pub fn parse_headers(message: &[u8]) -> MessageSummary {
    let mut summary = MessageSummary::default();

    for (name, value) in headers(message) {
        let value = text(&value);
        if "subject".eq_ignore_ascii_case(name) && summary.subject.is_none() {
            summary.subject = Some(decode_words(value.trim()).into_owned());
        } else if "from".eq_ignore_ascii_case(name) && summary.from.is_none() {
            summary.from = sender_name(&value);
        } else if "date".eq_ignore_ascii_case(name) && summary.date.is_none() {
            summary.date = parse_date(&value);
        }
    }

    summary
}

/// Split the header block of `message` into unfolded `(name, value)` pairs.
fn headers(message: &[u8]) -> Vec<(&str, Vec<u8>)> {
    let block = &message[..message.len().min(MAX_HEADER_BLOCK)];
    let mut headers: Vec<(&str, Vec<u8>)> = Vec::new();

    for line in block.split(|&b| b'\n' == b) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            // Continuation; orphans before the first header are dropped
            if let Some((_, value)) = headers.last_mut() {
                value.extend_from_slice(line);
            }
            continue;
        }

        let mut split = line.splitn(2, |&b| b':' == b);
        let (name, value) = match (split.next(), split.next()) {
            (Some(name), Some(value)) => (name, value),
            _ => continue,
        };

        match str::from_utf8(name) {
            Ok(name) if !name.is_empty() && !name.contains(' ') => {
                headers.push((name, value.to_vec()))
            }
            _ => continue,
        }
    }

    headers
}

/// Interpret raw header bytes as text.
///
/// RFC 6532 allows UTF-8; anything else that isn't valid UTF-8 is most
/// likely Windows-1252.
fn text(raw: &[u8]) -> Cow<str> {
    match str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => encoding_rs::WINDOWS_1252.decode_without_bom_handling(raw).0,
    }
}

/// Pick the name to show for the first mailbox in a `From` header.
fn sender_name(value: &str) -> Option<String> {
    let value = value.trim();
    let first = split_first_mailbox(value);

    let name = if let Some(lt) = first.find('<') {
        // "Display Name" <addr@example.com>
        let name = unquote(first[..lt].trim());
        if name.is_empty() {
            first[lt + 1..].trim_end().trim_end_matches('>').to_owned()
        } else {
            name
        }
    } else if let (Some(lp), true) = (first.find('('), first.ends_with(')')) {
        // addr@example.com (Display Name)
        let comment = first[lp + 1..first.len() - 1].trim();
        if comment.is_empty() {
            first[..lp].trim().to_owned()
        } else {
            comment.to_owned()
        }
    } else {
        first.to_owned()
    };

    let name = decode_words(name.trim()).trim().to_owned();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Return the text of the first mailbox of an address list, i.e., up to the
/// first comma not within a quoted string or angle brackets.
fn split_first_mailbox(value: &str) -> &str {
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;
    for (ix, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => return &value[..ix],
            _ => (),
        }
    }

    value
}

/// Strip the quotes and backslash escapes from a display name.
fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for ch in s.chars() {
        match ch {
            _ if escaped => {
                out.push(ch);
                escaped = false;
            }
            '\\' => escaped = true,
            '"' => (),
            _ => out.push(ch),
        }
    }
    out
}

/// Parse an RFC 2822 `Date` header.
///
/// A trailing comment, such as the `(UTC)` many agents append, is ignored.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let mut value = value.trim();
    if value.ends_with(')') {
        if let Some(lp) = value.rfind('(') {
            value = value[..lp].trim_end();
        }
    }

    DateTime::parse_from_rfc2822(value).ok()
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn typical_message() {
        let summary = parse_headers(
            b"Received: from mx.example.com\r\n\
              \tby mail.example.net; Tue, 1 Jul 2003 10:52:37 +0200\r\n\
              From: \"Doe, John\" <john@example.com>\r\n\
              Subject: Quarterly\r\n  report\r\n\
              Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n\
              \r\n\
              Subject: not a header\r\n",
        );

        assert_eq!(Some("Quarterly  report".to_owned()), summary.subject);
        assert_eq!(Some("Doe, John".to_owned()), summary.from);
        assert_eq!(
            DateTime::parse_from_rfc3339("2003-07-01T10:52:37+02:00").ok(),
            summary.date
        );
    }

    #[test]
    fn missing_headers() {
        assert_eq!(MessageSummary::default(), parse_headers(b"\r\nbody"));
        assert_eq!(MessageSummary::default(), parse_headers(b""));
        assert_eq!(
            MessageSummary::default(),
            parse_headers(b"garbage without colon\nDate: nonsense\n")
        );
    }

    #[test]
    fn unix_line_endings() {
        let summary = parse_headers(b"Subject: hi\n there\nFrom: a@b\n\nx");
        assert_eq!(Some("hi there".to_owned()), summary.subject);
        assert_eq!(Some("a@b".to_owned()), summary.from);
    }

    #[test]
    fn encoded_headers() {
        let summary = parse_headers(
            b"Subject: =?UTF-8?Q?Gr=C3=BC=C3=9Fe?= aus\r\n \
              =?ISO-8859-1?Q?M=FCnchen?=\r\n\
              From: =?UTF-8?B?SsO2cmc=?= <j@example.de>\r\n\r\n",
        );
        assert_eq!(Some("Grüße aus München".to_owned()), summary.subject);
        assert_eq!(Some("Jörg".to_owned()), summary.from);
    }

    #[test]
    fn sender_forms() {
        assert_eq!(
            Some("john@example.com".to_owned()),
            sender_name("john@example.com")
        );
        assert_eq!(
            Some("john@example.com".to_owned()),
            sender_name(" <john@example.com>")
        );
        assert_eq!(
            Some("John Doe".to_owned()),
            sender_name("john@example.com (John Doe)")
        );
        assert_eq!(
            Some("Say \"hi\"".to_owned()),
            sender_name(r#""Say \"hi\"" <x@y>, other@y"#)
        );
        assert_eq!(
            Some("first@example.com".to_owned()),
            sender_name("first@example.com, second@example.com")
        );
        assert_eq!(None, sender_name("  "));
    }

    #[test]
    fn date_forms() {
        assert_eq!(
            DateTime::parse_from_rfc3339("2020-02-03T04:05:06+00:00").ok(),
            parse_date(" Mon, 3 Feb 2020 04:05:06 +0000 (UTC)")
        );
        assert_eq!(
            DateTime::parse_from_rfc3339("2020-02-03T04:05:06-05:00").ok(),
            parse_date("3 Feb 2020 04:05:06 -0500")
        );
        assert_eq!(None, parse_date("yesterday"));
    }

    #[test]
    fn eight_bit_headers() {
        let summary = parse_headers(b"Subject: caf\xe9\r\n\r\n");
        assert_eq!(Some("café".to_owned()), summary.subject);

        let summary = parse_headers("Subject: 日本語\r\n\r\n".as_bytes());
        assert_eq!(Some("日本語".to_owned()), summary.subject);
    }

    proptest! {
        #[test]
        fn parse_headers_never_panics(
            s in prop::collection::vec(prop::num::u8::ANY, 0..200)
        ) {
            parse_headers(&s);
        }

        #[test]
        fn parse_headers_never_panics_on_text(
            s in r"([A-Za-z]{1,8}: [ -~]{0,20}\r?\n( [ -~]{0,10}\r?\n)?){0,5}"
        ) {
            parse_headers(s.as_bytes());
        }
    }
}
