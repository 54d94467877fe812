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

//! The low-level message store.
//!
//! The store only knows how to enumerate, write and read message files. It
//! does not know about UID validity (see `validity`) or the cursor (see
//! `cursor`); both of those live in dot-files next to the messages and are
//! invisible to it.

use std::collections::HashSet;
use std::fs;
use std::io;

use chrono::prelude::*;

use super::folder_path::FolderPath;
use super::model::Uid;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms};

/// The cache of messages for each folder, keyed by UID.
pub trait LocalStore {
    /// Return the UIDs of every message currently cached in `folder`.
    ///
    /// A folder which does not exist yet has no messages.
    fn list_cached(&self, folder: &FolderPath) -> Result<HashSet<Uid>, Error>;

    /// Durably add the message `uid` to `folder`.
    ///
    /// `received` becomes the modification time of the message file. Fails
    /// if `uid` is already present.
    fn write_message(
        &self,
        folder: &FolderPath,
        uid: Uid,
        content: &[u8],
        received: DateTime<FixedOffset>,
    ) -> Result<(), Error>;

    /// Read the raw content of message `uid`.
    ///
    /// Fails with `NxMessage` if there is no such message.
    fn read_message(
        &self,
        folder: &FolderPath,
        uid: Uid,
    ) -> Result<Vec<u8>, Error>;

    /// Whether message `uid` is present in `folder`.
    fn contains(&self, folder: &FolderPath, uid: Uid) -> bool;
}

/// The flat-file store: one file per message, named by UID.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirStore;

const MESSAGE_MODE: u32 = 0o600;

impl LocalStore for DirStore {
    fn list_cached(&self, folder: &FolderPath) -> Result<HashSet<Uid>, Error> {
        let it = match fs::read_dir(folder.path()) {
            Ok(it) => it,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Ok(HashSet::new())
            }
            Err(e) => return Err(e.into()),
        };

        let mut uids = HashSet::new();
        for entry in it {
            let entry = entry?;
            if let Some(uid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<Uid>().ok())
            {
                uids.insert(uid);
            }
        }

        Ok(uids)
    }

    fn write_message(
        &self,
        folder: &FolderPath,
        uid: Uid,
        content: &[u8],
        received: DateTime<FixedOffset>,
    ) -> Result<(), Error> {
        file_ops::spit(
            folder.path(),
            folder.message_path(uid),
            false,
            MESSAGE_MODE,
            Some(received.timestamp()),
            content,
        )
    }

    fn read_message(
        &self,
        folder: &FolderPath,
        uid: Uid,
    ) -> Result<Vec<u8>, Error> {
        fs::read(folder.message_path(uid)).on_not_found(Error::NxMessage)
    }

    fn contains(&self, folder: &FolderPath, uid: Uid) -> bool {
        folder.message_path(uid).is_file()
    }
}
