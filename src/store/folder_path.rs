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

//! Support for locating folders and their bookkeeping files on disk.
//!
//! # Layout
//!
//! Every folder lives directly under the base directory:
//!
//! - `<base>/<folder>/<uid>`: one file per cached message, named by the
//!   decimal UID, with its modification time set to the server's receipt
//!   time.
//! - `<base>/<folder>/.uidvalidity`: the UID validity the cached messages
//!   belong to.
//! - `<base>/<folder>/.cur`: the current message pointer.
//!
//! Anything in a folder whose name is not a decimal integer is not a message.
//! This is also what makes it safe to stage temporary files (which always
//! start with `.`) inside the folder directory itself.

use std::path::{Path, PathBuf};

use super::model::Uid;
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

pub const UID_VALIDITY_FILE: &str = ".uidvalidity";
pub const CURSOR_FILE: &str = ".cur";

/// A lightweight reference to a local folder by path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderPath {
    name: String,
    base: PathBuf,
    path: PathBuf,
}

impl FolderPath {
    /// Refer to the folder `name` under `base`.
    ///
    /// Fails with `UnsafeName` if `name` cannot be used as a single directory
    /// name.
    pub fn new(base: impl AsRef<Path>, name: &str) -> Result<Self, Error> {
        if !is_safe_name(name) {
            return Err(Error::UnsafeName);
        }

        let base = base.as_ref().to_owned();
        let path = base.join(name);
        Ok(FolderPath {
            name: name.to_owned(),
            base,
            path,
        })
    }

    /// Refer to the local folder which mirrors the remote `mailbox`.
    ///
    /// The remote INBOX is case-insensitive per RFC 3501 and is always kept in
    /// `inbox`; every other mailbox keeps its name.
    pub fn for_mailbox(
        base: impl AsRef<Path>,
        mailbox: &str,
    ) -> Result<Self, Error> {
        if mailbox.eq_ignore_ascii_case("INBOX") {
            Self::new(base, "inbox")
        } else {
            Self::new(base, mailbox)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory containing all folders.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The directory holding this folder's messages.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uid_validity_path(&self) -> PathBuf {
        self.path.join(UID_VALIDITY_FILE)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.path.join(CURSOR_FILE)
    }

    pub fn message_path(&self, uid: Uid) -> PathBuf {
        self.path.join(uid.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inbox_is_normalised() {
        let fp = FolderPath::for_mailbox("/mail", "Inbox").unwrap();
        assert_eq!("inbox", fp.name());
        assert_eq!(Path::new("/mail/inbox"), fp.path());

        let fp = FolderPath::for_mailbox("/mail", "Archive").unwrap();
        assert_eq!("Archive", fp.name());
    }

    #[test]
    fn bookkeeping_paths() {
        let fp = FolderPath::new("/mail", "inbox").unwrap();
        assert_eq!(
            Path::new("/mail/inbox/.uidvalidity"),
            fp.uid_validity_path()
        );
        assert_eq!(Path::new("/mail/inbox/.cur"), fp.cursor_path());
        assert_eq!(Path::new("/mail/inbox/42"), fp.message_path(Uid(42)));
    }

    #[test]
    fn unsafe_names_rejected() {
        assert_matches!(Err(Error::UnsafeName), FolderPath::new("/mail", ".."));
        assert_matches!(
            Err(Error::UnsafeName),
            FolderPath::for_mailbox("/mail", "Lists/rust")
        );
    }
}
