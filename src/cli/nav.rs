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


use std::io::{self, Write};

use log::warn;

use super::main::die_on;
use crate::mime::header::{parse_headers, MessageSummary};
use crate::store::cursor;
use crate::store::folder_path::FolderPath;
use crate::store::local_store::{DirStore, LocalStore};
use crate::store::model::Uid;
use crate::support::error::Error;

pub(super) fn show(folder: &FolderPath) {
    print_message(folder, cursor::current(folder));
}

pub(super) fn next(folder: &FolderPath) {
    let uid = cursor::advance(folder, &DirStore).unwrap_or_else(|e| die_on(e));
    print_message(folder, uid);
}

pub(super) fn prev(folder: &FolderPath) {
    let uid = cursor::retreat(folder, &DirStore).unwrap_or_else(|e| die_on(e));
    print_message(folder, uid);
}

pub(super) fn scan(folder: &FolderPath) {
    let mut uids = DirStore
        .list_cached(folder)
        .unwrap_or_else(|e| die_on(e))
        .into_iter()
        .collect::<Vec<_>>();
    uids.sort_unstable();

    let current = cursor::current(folder);
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for uid in uids {
        let summary = match DirStore.read_message(folder, uid) {
            Ok(data) => parse_headers(&data),
            Err(e) => {
                warn!("{}: can't read {}: {}", folder.name(), uid, e);
                MessageSummary::default()
            }
        };

        let line = scan_line(uid, current == uid, &summary);
        if let Err(e) = writeln!(stdout, "{}", line) {
            quit_on_write_error(e);
        }
    }
}

fn print_message(folder: &FolderPath, uid: Uid) {
    let data = DirStore
        .read_message(folder, uid)
        .unwrap_or_else(|e| die_on(e));

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    if let Err(e) = stdout.write_all(&data).and_then(|_| stdout.flush()) {
        quit_on_write_error(e);
    }
}

fn quit_on_write_error(e: io::Error) -> ! {
    // Usually just the pager exiting early
    if io::ErrorKind::BrokenPipe == e.kind() {
        std::process::exit(0);
    }

    die_on(Error::Io(e))
}

/// Format one line of the folder listing.
///
/// The columns are: UID, `+` if current, a reply marker (always blank, since
/// flags are not mirrored), the month and day of the `Date` header, the
/// sender and the subject.
fn scan_line(uid: Uid, is_current: bool, summary: &MessageSummary) -> String {
    let date = summary
        .date
        .map(|d| d.format("%m-%d").to_string())
        .unwrap_or_else(|| "MM-DD".to_owned());
    let from = summary.from.as_deref().unwrap_or("From?");
    let subject = summary.subject.as_deref().unwrap_or("??");

    format!(
        "{:>4}{:1}{:1}{} {:<17.17}  {:<40.40}",
        uid.to_string(),
        if is_current { "+" } else { "" },
        "",
        date,
        from,
        subject
    )
}
