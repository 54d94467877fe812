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

//! The `Session` used against real IMAP servers.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::{Read, Write};

use chrono::prelude::*;
use log::{debug, info, warn};

use super::client::{self, is_tagged, Client};
use super::response::{self, Completion};
use crate::store::model::*;
use crate::store::sync::{FetchResponses, Session};
use crate::support::error::Error;

/// A session over any byte stream, normally a TLS connection.
///
/// All mailboxes are opened with `EXAMINE`, so nothing on the server is ever
/// modified; in particular, fetching uses `BODY.PEEK[]` and leaves `\Seen`
/// alone.
pub struct ImapSession<S> {
    client: Client<S>,
    capabilities: Vec<String>,
    authenticated: bool,
}

impl<S: Read + Write> ImapSession<S> {
    /// Read the server greeting from `stream`.
    pub fn start(
        stream: S,
        trace_stderr: Option<&'static str>,
    ) -> Result<Self, Error> {
        let mut client = Client::new(stream, trace_stderr);
        let greeting = client.read_response()?;

        let authenticated = if greeting.starts_with(b"* PREAUTH") {
            true
        } else if greeting.starts_with(b"* OK") {
            false
        } else {
            return Err(Error::UnexpectedResponse(format!(
                "greeting: {}",
                String::from_utf8_lossy(&greeting)
            )));
        };

        Ok(ImapSession {
            client,
            capabilities: response::capabilities(&greeting)
                .unwrap_or_default(),
            authenticated,
        })
    }

    /// Log in as `user`.
    ///
    /// `AUTHENTICATE PLAIN` is used when the server offers it, `LOGIN`
    /// otherwise. Does nothing if the server pre-authenticated the
    /// connection.
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), Error> {
        if self.authenticated {
            return Ok(());
        }

        if self.capabilities.is_empty() {
            self.refresh_capabilities()?;
        }

        if self.has_capability("AUTH=PLAIN") {
            self.authenticate_plain(user, password)?;
        } else if self.has_capability("LOGINDISABLED") {
            return Err(Error::UnexpectedResponse(
                "server offers neither AUTH=PLAIN nor LOGIN".to_owned(),
            ));
        } else {
            let tag = self.client.send_censored(&format!(
                "LOGIN {} {}",
                quote(user),
                quote(password)
            ))?;
            let responses = self.client.read_until_tagged(&tag)?;
            check_completion("LOGIN", &responses)?;
        }

        info!("Logged in as {}", user);
        self.authenticated = true;
        Ok(())
    }

    fn authenticate_plain(
        &mut self,
        user: &str,
        password: &str,
    ) -> Result<(), Error> {
        let tag = self.client.send("AUTHENTICATE PLAIN")?;
        let continuation = self.client.read_response()?;
        if is_tagged(&continuation, &tag) {
            return check_completion("AUTHENTICATE", &[continuation]);
        } else if !continuation.starts_with(b"+") {
            return Err(Error::UnexpectedResponse(format!(
                "AUTHENTICATE: {}",
                String::from_utf8_lossy(&continuation)
            )));
        }

        let mut auth = base64::encode(format!("\0{}\0{}", user, password));
        auth.push_str("\r\n");
        self.client.write_raw_censored(auth.as_bytes())?;

        let responses = self.client.read_until_tagged(&tag)?;
        check_completion("AUTHENTICATE", &responses)
    }

    fn refresh_capabilities(&mut self) -> Result<(), Error> {
        let responses = self.client.command("CAPABILITY")?;
        check_completion("CAPABILITY", &responses)?;
        self.capabilities = responses
            .iter()
            .filter_map(|r| response::capabilities(r))
            .flatten()
            .collect();
        Ok(())
    }

    fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| cap.eq_ignore_ascii_case(c))
    }
}

impl<S: Read + Write> Session for ImapSession<S> {
    fn select_folder(&mut self, name: &str) -> Result<SelectedFolder, Error> {
        let responses =
            self.client.command(&format!("EXAMINE {}", quote(name)))?;
        check_completion("EXAMINE", &responses)?;

        let uid_validity = responses
            .iter()
            .find_map(|r| response::uid_validity(r))
            .ok_or_else(|| {
                Error::UnexpectedResponse(
                    "EXAMINE did not report UIDVALIDITY".to_owned(),
                )
            })?;
        let exists = responses
            .iter()
            .find_map(|r| response::exists(r))
            .unwrap_or(0);

        Ok(SelectedFolder {
            uid_validity: UidValidity(uid_validity),
            exists,
        })
    }

    fn list_identifiers(&mut self) -> Result<HashSet<Uid>, Error> {
        let responses = self.client.command("UID SEARCH ALL")?;
        check_completion("UID SEARCH", &responses)?;

        Ok(responses
            .iter()
            .filter_map(|r| response::search(r))
            .flatten()
            .collect())
    }

    fn fetch<'a>(
        &'a mut self,
        uids: &[Uid],
    ) -> Result<FetchResponses<'a>, Error> {
        let tag = self.client.send(&format!(
            "UID FETCH {} (UID INTERNALDATE BODY.PEEK[])",
            uid_set(uids)
        ))?;

        Ok(Box::new(FetchIter {
            client: &mut self.client,
            tag,
            done: false,
        }))
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.client.command("LOGOUT") {
            // Servers may hang up right after the BYE
            Ok(_) | Err(client::Error::Eof) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct FetchIter<'a, S> {
    client: &'a mut Client<S>,
    tag: String,
    done: bool,
}

impl<'a, S: Read + Write> Iterator for FetchIter<'a, S> {
    type Item = Result<FetchedMessage, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.client.read_response() {
                Ok(line) => line,
                Err(e) => {
                    warn!("Connection lost during FETCH: {}", e);
                    self.done = true;
                    return Some(Err(Error::CommandAborted));
                }
            };

            if is_tagged(&line, &self.tag) {
                self.done = true;
                return match Completion::parse(&line) {
                    Some(c) if c.is_ok() => None,
                    Some(c) => Some(Err(Error::CommandFailed(c.describe()))),
                    None => Some(Err(Error::UnexpectedResponse(
                        String::from_utf8_lossy(&line).into_owned(),
                    ))),
                };
            }

            if response::is_bye(&line) {
                warn!(
                    "Server hung up during FETCH: {}",
                    String::from_utf8_lossy(&line)
                );
                self.done = true;
                return Some(Err(Error::CommandAborted));
            }

            let data = match response::fetch(&line) {
                Some(data) => data,
                None => {
                    debug!(
                        "Ignoring unsolicited response: {}",
                        String::from_utf8_lossy(&line[..line.len().min(64)])
                    );
                    continue;
                }
            };

            let (uid, content) = match (data.uid, data.body) {
                (Some(uid), Some(body)) => (uid, body.into_owned()),
                (uid, _) => {
                    warn!("Ignoring FETCH without body (UID {:?})", uid);
                    continue;
                }
            };

            let received = data.internal_date.unwrap_or_else(|| {
                warn!("No usable INTERNALDATE for UID {}; using now", uid);
                Local::now().into()
            });

            return Some(Ok(FetchedMessage {
                uid,
                received,
                content,
            }));
        }

        None
    }
}

/// Format `uids`, which must be sorted, as an IMAP sequence set, collapsing
/// runs of consecutive UIDs into ranges.
pub fn uid_set(uids: &[Uid]) -> String {
    let mut out = String::new();
    let mut it = uids.iter().copied().peekable();
    while let Some(start) = it.next() {
        let mut end = start;
        while let Some(&n) = it.peek() {
            if Some(n) != end.next() {
                break;
            }
            end = n;
            it.next();
        }

        if !out.is_empty() {
            out.push(',');
        }

        if start == end {
            let _ = write!(out, "{}", start);
        } else {
            let _ = write!(out, "{}:{}", start, end);
        }
    }

    out
}

/// Render `s` as an IMAP quoted string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if '"' == ch || '\\' == ch {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn check_completion(what: &str, responses: &[Vec<u8>]) -> Result<(), Error> {
    let last = responses.last().map(Vec::as_slice).unwrap_or_default();
    match Completion::parse(last) {
        Some(c) if c.is_ok() => Ok(()),
        Some(c) => Err(Error::CommandFailed(format!(
            "{}: {}",
            what,
            c.describe()
        ))),
        None => Err(Error::UnexpectedResponse(format!(
            "{}: {}",
            what,
            String::from_utf8_lossy(last)
        ))),
    }
}
