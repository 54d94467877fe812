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

//! A minimal line-level IMAP client.
//!
//! This only knows how to frame traffic: it sends tagged commands and reads
//! back "logical lines", i.e., response lines with any literals they announce
//! spliced in. Making sense of the responses is left to `response`, and the
//! conversation itself to `session`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::str;

use lazy_static::lazy_static;
use regex::bytes::Regex;
use thiserror::Error;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r#"~?\{([0-9]+)\+?\}\r\n$"#).unwrap();
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Server closed the connection")]
    Eof,
}

pub struct Client<S> {
    stream: BufReader<S>,
    trace_stderr: Option<&'static str>,
    next_tag: u64,
}

impl<S: Read + Write> Client<S> {
    pub fn new(stream: S, trace_stderr: Option<&'static str>) -> Self {
        Client {
            stream: BufReader::new(stream),
            trace_stderr,
            next_tag: 1,
        }
    }

    /// Allocate a fresh command tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Write `bytes` as-is, keeping them out of the trace.
    pub fn write_raw_censored(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.trace(false, ">>[raw]", b"<censored>");
        self.write_all(bytes)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_line_raw(&mut self, dst: &mut Vec<u8>) -> Result<(), Error> {
        let start = dst.len();
        if 0 == self.stream.read_until(b'\n', dst)? {
            return Err(Error::Eof);
        }

        self.trace(false, "<<[eol]", &dst[start..]);
        Ok(())
    }

    fn read_data_raw(
        &mut self,
        dst: &mut Vec<u8>,
        n: u32,
    ) -> Result<(), Error> {
        let start = dst.len();
        let nread = self.stream.by_ref().take(n.into()).read_to_end(dst)?;
        self.trace(true, "<<[lit]", &dst[start..]);
        if (n as usize) > nread {
            return Err(Error::Eof);
        }

        Ok(())
    }

    /// Read one response line, including the content of any literals, into
    /// `dst`. The final CRLF is kept.
    pub fn read_logical_line(
        &mut self,
        dst: &mut Vec<u8>,
    ) -> Result<(), Error> {
        loop {
            let line_start = dst.len();
            self.read_line_raw(dst)?;
            if !dst.ends_with(b"\r\n") {
                // Some servers end lines with a bare LF; be lenient about it,
                // but never when the line was cut short by EOF.
                if !dst.ends_with(b"\n") {
                    return Err(Error::Eof);
                }
                dst.pop();
                dst.extend_from_slice(b"\r\n");
            }

            let literal_len = LITERAL_AT_EOL
                .captures(&dst[line_start..])
                .and_then(|cap| cap.get(1))
                .and_then(|m| str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.parse::<u32>().ok());

            match literal_len {
                Some(literal_len) => self.read_data_raw(dst, literal_len)?,
                None => break,
            }
        }

        Ok(())
    }

    /// Read one logical line, without its final CRLF.
    pub fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut line = Vec::new();
        self.read_logical_line(&mut line)?;
        line.truncate(line.len() - 2);
        Ok(line)
    }

    /// Send `command` under a fresh tag, which is returned.
    ///
    /// The caller is responsible for reading the responses.
    pub fn send(&mut self, command: &str) -> Result<String, Error> {
        let tag = self.next_tag();
        let line = format!("{} {}\r\n", tag, command);
        self.trace(false, ">>[cmd]", line.as_bytes());
        self.write_all(line.as_bytes())?;
        Ok(tag)
    }

    /// Like `send`, but keeps the command out of the trace.
    pub fn send_censored(&mut self, command: &str) -> Result<String, Error> {
        let tag = self.next_tag();
        self.trace(false, ">>[cmd]", format!("{} <censored>", tag).as_bytes());
        self.write_all(format!("{} {}\r\n", tag, command).as_bytes())?;
        Ok(tag)
    }

    /// Read responses up to and including the one tagged with `tag`.
    ///
    /// The tagged response is always the last element.
    pub fn read_until_tagged(
        &mut self,
        tag: &str,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let mut responses = Vec::new();
        loop {
            let line = self.read_response()?;
            let done = is_tagged(&line, tag);
            responses.push(line);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Send `command` and read all its responses.
    pub fn command(&mut self, command: &str) -> Result<Vec<Vec<u8>>, Error> {
        let tag = self.send(command)?;
        self.read_until_tagged(&tag)
    }

    fn trace(&self, truncate: bool, what: &str, data: &[u8]) {
        if let Some(prefix) = self.trace_stderr {
            if data.is_empty() {
                eprintln!("{} WIRE {}<empty>", prefix, what);
                return;
            }

            let (data, truncated) = if truncate {
                data.split_at(data.len().min(128))
            } else {
                (data, &[] as &[u8])
            };

            let mut start = 0;
            for split in memchr::memchr_iter(b'\n', data)
                .chain(std::iter::once(data.len() - 1))
            {
                if split < start {
                    continue;
                }

                let data = &data[start..=split];
                start = split + 1;

                let mut vis = String::new();
                for &byte in data {
                    match byte {
                        b' '..=b'~' => vis.push(byte as char),
                        b'\n' => vis.push_str("\\n"),
                        b'\r' => vis.push_str("\\r"),
                        b => vis.push_str(&format!("\\x{:02X}", b)),
                    }
                }

                eprintln!("{} WIRE {} {}", prefix, what, vis);
            }

            if !truncated.is_empty() {
                eprintln!(
                    "{} WIRE {}<{} more bytes>",
                    prefix,
                    what,
                    truncated.len()
                );
            }
        }
    }
}

/// Whether `line` is the completion of the command tagged `tag`.
pub fn is_tagged(line: &[u8], tag: &str) -> bool {
    line.len() > tag.len()
        && line.starts_with(tag.as_bytes())
        && b' ' == line[tag.len()]
}
