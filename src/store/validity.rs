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

//! Guards the local cache against UID validity changes.
//!
//! Each folder records the UID validity its messages belong to in
//! `.uidvalidity`. When the server reports a different value, every cached
//! UID is meaningless and the whole folder is thrown away.
//!
//! Eviction first renames the folder directory aside to a `.garbage.*`
//! sibling, and only then deletes it and recreates an empty folder. A crash
//! at any point therefore leaves either the untouched stale folder (which the
//! next sync evicts again), an absent folder (which the next sync treats as
//! new), or a fresh empty folder; never a partially cleared one. The only
//! residue is the `.garbage.*` directory, which `purge_garbage` removes.

use std::fs;
use std::io;
use std::path::Path;

use log::{error, info, warn};

use super::folder_path::FolderPath;
use super::model::UidValidity;
use crate::support::error::Error;
use crate::support::file_ops::{self, GARBAGE_PREFIX};

const MARKER_MODE: u32 = 0o600;

/// What `ensure_valid` found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidityOutcome {
    /// There was no record of the folder; it now exists and is empty or holds
    /// whatever was already in the directory.
    Fresh,
    /// The cache matches the server.
    Unchanged,
    /// The cache belonged to another UID epoch and has been emptied.
    ///
    /// `previous` is `None` if the old marker was unreadable.
    Evicted { previous: Option<UidValidity> },
}

impl ValidityOutcome {
    pub fn evicted(self) -> bool {
        matches!(self, ValidityOutcome::Evicted { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Absent,
    Valid(UidValidity),
    Corrupt,
}

/// Make sure the cache of `folder` belongs to the `server` UID epoch,
/// evicting it if it does not.
///
/// Any failure is fatal to the caller, since the state of the cache can no
/// longer be trusted; it is reported as `Error::Inconsistent`. Retrying is
/// always safe.
pub fn ensure_valid(
    folder: &FolderPath,
    server: UidValidity,
) -> Result<ValidityOutcome, Error> {
    ensure_valid_impl(folder, server).map_err(|e| Error::Inconsistent {
        folder: folder.name().to_owned(),
        source: Box::new(e),
    })
}

fn ensure_valid_impl(
    folder: &FolderPath,
    server: UidValidity,
) -> Result<ValidityOutcome, Error> {
    let previous = match read_marker(folder)? {
        Marker::Valid(stored) if stored == server => {
            return Ok(ValidityOutcome::Unchanged)
        }

        Marker::Absent => {
            info!(
                "{}: no UID validity on record, adopting {}",
                folder.name(),
                server
            );
            fs::create_dir_all(folder.path())?;
            write_marker(folder, server)?;
            return Ok(ValidityOutcome::Fresh);
        }

        Marker::Valid(stored) => {
            warn!(
                "{}: UID validity changed from {} to {}, evicting cache",
                folder.name(),
                stored,
                server
            );
            Some(stored)
        }

        Marker::Corrupt => {
            warn!(
                "{}: UID validity marker is corrupt, evicting cache",
                folder.name()
            );
            None
        }
    };

    file_ops::delete_aside(folder.path())?;
    fs::create_dir_all(folder.path())?;
    write_marker(folder, server)?;

    Ok(ValidityOutcome::Evicted { previous })
}

fn read_marker(folder: &FolderPath) -> Result<Marker, Error> {
    match fs::read_to_string(folder.uid_validity_path()) {
        Ok(s) => Ok(s
            .trim()
            .parse::<u32>()
            .map(|v| Marker::Valid(UidValidity(v)))
            .unwrap_or(Marker::Corrupt)),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(Marker::Absent),
        Err(e) if io::ErrorKind::InvalidData == e.kind() => {
            Ok(Marker::Corrupt)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_marker(folder: &FolderPath, v: UidValidity) -> Result<(), Error> {
    file_ops::spit(
        folder.path(),
        folder.uid_validity_path(),
        true,
        MARKER_MODE,
        None,
        v.to_string().as_bytes(),
    )
}

/// Return the UID validity on record for `folder`, if any.
#[cfg(test)]
pub fn recorded(folder: &FolderPath) -> Result<Option<UidValidity>, Error> {
    match read_marker(folder)? {
        Marker::Valid(v) => Ok(Some(v)),
        Marker::Absent | Marker::Corrupt => Ok(None),
    }
}

/// Remove leftovers of evictions interrupted between the rename and the
/// recursive delete.
///
/// Failures are logged and skipped. Returns the number of directories
/// removed.
pub fn purge_garbage(base: &Path) -> usize {
    let it = match fs::read_dir(base) {
        Ok(it) => it,
        Err(e) => {
            if io::ErrorKind::NotFound != e.kind() {
                error!("Failed to scan {} for garbage: {}", base.display(), e);
            }
            return 0;
        }
    };

    let mut removed = 0;
    for entry in it.filter_map(|r| r.ok()) {
        let is_garbage = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with(GARBAGE_PREFIX));
        if !is_garbage {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!("Removed orphaned {}", entry.path().display());
                removed += 1;
            }
            Err(e) => {
                error!("Failed to remove {}: {}", entry.path().display(), e)
            }
        }
    }

    removed
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::store::local_store::{DirStore, LocalStore};
    use crate::store::model::Uid;

    fn fixture() -> (TempDir, FolderPath) {
        let root = TempDir::new().unwrap();
        let folder = FolderPath::new(root.path(), "inbox").unwrap();
        (root, folder)
    }

    fn populate(folder: &FolderPath, uids: &[u32]) {
        for &uid in uids {
            fs::write(folder.message_path(Uid(uid)), b"x").unwrap();
        }
    }

    #[test]
    fn fresh_folder_is_created_and_marked() {
        let (_root, folder) = fixture();
        assert_eq!(
            ValidityOutcome::Fresh,
            ensure_valid(&folder, UidValidity(42)).unwrap()
        );
        assert!(folder.path().is_dir());
        assert_eq!(Some(UidValidity(42)), recorded(&folder).unwrap());
        assert_eq!(
            "42",
            fs::read_to_string(folder.uid_validity_path()).unwrap()
        );
    }

    #[test]
    fn matching_validity_keeps_cache() {
        let (_root, folder) = fixture();
        ensure_valid(&folder, UidValidity(42)).unwrap();
        populate(&folder, &[1, 2, 3]);

        assert_eq!(
            ValidityOutcome::Unchanged,
            ensure_valid(&folder, UidValidity(42)).unwrap()
        );
        assert_eq!(3, DirStore.list_cached(&folder).unwrap().len());
    }

    #[test]
    fn marker_written_by_hand_is_tolerated() {
        let (_root, folder) = fixture();
        fs::create_dir(folder.path()).unwrap();
        fs::write(folder.uid_validity_path(), "42\n").unwrap();
        populate(&folder, &[1]);

        assert_eq!(
            ValidityOutcome::Unchanged,
            ensure_valid(&folder, UidValidity(42)).unwrap()
        );
    }

    #[test]
    fn changed_validity_evicts_everything() {
        let (root, folder) = fixture();
        ensure_valid(&folder, UidValidity(42)).unwrap();
        populate(&folder, &[1, 2, 3]);
        fs::write(folder.cursor_path(), "2").unwrap();

        assert_eq!(
            ValidityOutcome::Evicted {
                previous: Some(UidValidity(42))
            },
            ensure_valid(&folder, UidValidity(43)).unwrap()
        );
        assert!(DirStore.list_cached(&folder).unwrap().is_empty());
        assert_eq!(Some(UidValidity(43)), recorded(&folder).unwrap());
        assert!(!folder.cursor_path().exists());

        // Nothing left over beside the folder itself
        let names = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(vec!["inbox".to_owned()], names);
    }

    #[test]
    fn corrupt_marker_evicts() {
        let (_root, folder) = fixture();
        fs::create_dir(folder.path()).unwrap();
        fs::write(folder.uid_validity_path(), "plugh").unwrap();
        populate(&folder, &[5]);

        assert_eq!(
            ValidityOutcome::Evicted { previous: None },
            ensure_valid(&folder, UidValidity(7)).unwrap()
        );
        assert!(DirStore.list_cached(&folder).unwrap().is_empty());
        assert_eq!(Some(UidValidity(7)), recorded(&folder).unwrap());
    }

    #[test]
    fn crash_between_rename_and_delete() {
        let (root, folder) = fixture();
        ensure_valid(&folder, UidValidity(1)).unwrap();
        populate(&folder, &[1, 2, 3]);

        // Simulate an eviction that died right after renaming the folder away
        let aside = file_ops::rename_aside(folder.path()).unwrap();
        assert!(DirStore.list_cached(&folder).unwrap().is_empty());

        assert_eq!(
            ValidityOutcome::Fresh,
            ensure_valid(&folder, UidValidity(2)).unwrap()
        );
        assert!(DirStore.list_cached(&folder).unwrap().is_empty());
        assert_eq!(
            ValidityOutcome::Unchanged,
            ensure_valid(&folder, UidValidity(2)).unwrap()
        );

        assert!(aside.is_dir());
        assert_eq!(1, purge_garbage(root.path()));
        assert!(!aside.exists());
        assert!(folder.path().is_dir());
        assert_eq!(0, purge_garbage(root.path()));
    }

    #[test]
    fn failed_eviction_is_inconsistent() {
        let root = TempDir::new().unwrap();
        // A plain file where the base directory should be means nothing can
        // be created under it.
        let base = root.path().join("base");
        fs::write(&base, b"").unwrap();
        let folder = FolderPath::new(&base, "inbox").unwrap();

        assert_matches!(
            Err(Error::Inconsistent { .. }),
            ensure_valid(&folder, UidValidity(1))
        );
    }

    proptest! {
        #[test]
        fn eviction_always_empties(
            cached in prop::collection::hash_set(0u32..1000, 0..20),
            old in 0u32..5,
            new in 0u32..5,
        ) {
            let (_root, folder) = fixture();
            ensure_valid(&folder, UidValidity(old)).unwrap();
            populate(&folder, &cached.iter().copied().collect::<Vec<_>>());

            let outcome = ensure_valid(&folder, UidValidity(new)).unwrap();
            let after = DirStore.list_cached(&folder).unwrap();
            prop_assert_eq!(Some(UidValidity(new)), recorded(&folder).unwrap());
            if old == new {
                prop_assert_eq!(ValidityOutcome::Unchanged, outcome);
                let expected: HashSet<Uid> =
                    cached.iter().copied().map(Uid).collect();
                prop_assert_eq!(expected, after);
            } else {
                prop_assert!(outcome.evicted());
                prop_assert!(after.is_empty());
            }
        }
    }
}
