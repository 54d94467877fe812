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

//! The current message pointer used by `show`, `next` and `prev`.
//!
//! Cached UIDs are sparse (expunged or never fetched messages leave holes),
//! so moving the pointer means scanning for the next message that actually
//! exists rather than stepping by one.

use std::fs;

use super::folder_path::FolderPath;
use super::local_store::LocalStore;
use super::model::Uid;
use crate::support::error::Error;
use crate::support::file_ops;

const CURSOR_MODE: u32 = 0o600;

/// The pointer used when none has been recorded.
pub const DEFAULT_CURRENT: Uid = Uid(1);

/// Return the current message of `folder`.
///
/// A missing or garbled pointer is not an error; it just means message 1.
pub fn current(folder: &FolderPath) -> Uid {
    fs::read_to_string(folder.cursor_path())
        .ok()
        .and_then(|s| s.trim().parse::<Uid>().ok())
        .unwrap_or(DEFAULT_CURRENT)
}

/// Record `uid` as the current message of `folder`.
pub fn set_current(folder: &FolderPath, uid: Uid) -> Result<(), Error> {
    file_ops::spit(
        folder.path(),
        folder.cursor_path(),
        true,
        CURSOR_MODE,
        None,
        uid.to_string().as_bytes(),
    )
}

/// Move the pointer to the closest existing message after it.
///
/// On `NoNextMessage`, the pointer is left alone.
pub fn advance(
    folder: &FolderPath,
    store: &dyn LocalStore,
) -> Result<Uid, Error> {
    let max = store
        .list_cached(folder)?
        .into_iter()
        .max()
        .ok_or(Error::NoNextMessage)?;

    let mut candidate = current(folder);
    while candidate < max {
        candidate = match candidate.next() {
            Some(c) => c,
            None => break,
        };

        if store.contains(folder, candidate) {
            set_current(folder, candidate)?;
            return Ok(candidate);
        }
    }

    Err(Error::NoNextMessage)
}

/// Move the pointer to the closest existing message before it.
///
/// On `NoPreviousMessage`, the pointer is left alone.
pub fn retreat(
    folder: &FolderPath,
    store: &dyn LocalStore,
) -> Result<Uid, Error> {
    let mut candidate = current(folder);
    while let Some(prev) = candidate.prev() {
        candidate = prev;
        if store.contains(folder, candidate) {
            set_current(folder, candidate)?;
            return Ok(candidate);
        }
    }

    Err(Error::NoPreviousMessage)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::store::local_store::DirStore;

    fn fixture(uids: &[u32]) -> (TempDir, FolderPath) {
        let root = TempDir::new().unwrap();
        let folder = FolderPath::new(root.path(), "inbox").unwrap();
        fs::create_dir(folder.path()).unwrap();
        for &uid in uids {
            fs::write(folder.message_path(Uid(uid)), b"x").unwrap();
        }
        (root, folder)
    }

    #[test]
    fn default_pointer() {
        let (_root, folder) = fixture(&[]);
        assert_eq!(Uid(1), current(&folder));

        fs::write(folder.cursor_path(), "xyzzy").unwrap();
        assert_eq!(Uid(1), current(&folder));

        fs::write(folder.cursor_path(), "17\n").unwrap();
        assert_eq!(Uid(17), current(&folder));
    }

    #[test]
    fn set_then_get() {
        let (_root, folder) = fixture(&[]);
        set_current(&folder, Uid(99)).unwrap();
        assert_eq!(Uid(99), current(&folder));
        assert_eq!("99", fs::read_to_string(folder.cursor_path()).unwrap());
    }

    #[test]
    fn scans_over_holes() {
        let (_root, folder) = fixture(&[1, 3, 4, 7]);

        assert_eq!(Uid(3), advance(&folder, &DirStore).unwrap());
        assert_eq!(Uid(3), current(&folder));
        assert_eq!(Uid(4), advance(&folder, &DirStore).unwrap());
        assert_eq!(Uid(7), advance(&folder, &DirStore).unwrap());
        assert_matches!(Err(Error::NoNextMessage), advance(&folder, &DirStore));
        assert_eq!(Uid(7), current(&folder));

        set_current(&folder, Uid(3)).unwrap();
        assert_eq!(Uid(1), retreat(&folder, &DirStore).unwrap());
        assert_matches!(
            Err(Error::NoPreviousMessage),
            retreat(&folder, &DirStore)
        );
        assert_eq!(Uid(1), current(&folder));
    }

    #[test]
    fn pointer_into_a_hole() {
        let (_root, folder) = fixture(&[2, 10]);
        set_current(&folder, Uid(5)).unwrap();
        assert_eq!(Uid(10), advance(&folder, &DirStore).unwrap());

        set_current(&folder, Uid(5)).unwrap();
        assert_eq!(Uid(2), retreat(&folder, &DirStore).unwrap());
    }

    #[test]
    fn empty_folder_has_nowhere_to_go() {
        let (_root, folder) = fixture(&[]);
        assert_matches!(Err(Error::NoNextMessage), advance(&folder, &DirStore));
        assert_matches!(
            Err(Error::NoPreviousMessage),
            retreat(&folder, &DirStore)
        );
        assert!(!folder.cursor_path().exists());
    }

    #[test]
    fn bookkeeping_files_are_not_messages() {
        let (_root, folder) = fixture(&[1]);
        fs::write(folder.uid_validity_path(), "5").unwrap();
        assert_matches!(Err(Error::NoNextMessage), advance(&folder, &DirStore));
    }

    proptest! {
        #[test]
        fn matches_ordered_model(
            uids in prop::collection::btree_set(0u32..64, 0..16),
            start in 0u32..70,
        ) {
            let uid_vec = uids.iter().copied().collect::<Vec<_>>();
            let (_root, folder) = fixture(&uid_vec);
            let model: BTreeSet<u32> = uids;

            set_current(&folder, Uid(start)).unwrap();
            let expected_next = model.range(start + 1..).next().copied();
            match advance(&folder, &DirStore) {
                Ok(uid) => prop_assert_eq!(expected_next, Some(uid.0)),
                Err(Error::NoNextMessage) => {
                    prop_assert_eq!(None, expected_next);
                    prop_assert_eq!(Uid(start), current(&folder));
                }
                Err(e) => panic!("unexpected error: {}", e),
            }

            set_current(&folder, Uid(start)).unwrap();
            let expected_prev = model.range(..start).next_back().copied();
            match retreat(&folder, &DirStore) {
                Ok(uid) => prop_assert_eq!(expected_prev, Some(uid.0)),
                Err(Error::NoPreviousMessage) => {
                    prop_assert_eq!(None, expected_prev);
                    prop_assert_eq!(Uid(start), current(&folder));
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }
}
