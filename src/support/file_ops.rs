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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::error;
use nix::sys::time::{TimeVal, TimeValLike};
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;

/// Prefix of the names of directories which have been renamed aside pending
/// removal.
pub const GARBAGE_PREFIX: &str = ".garbage.";

/// Write `data` into the file at `path`, atomically.
///
/// The file will first be staged within `tmp`.
///
/// If `overwrite` is true, this will replace anything already at `path`. If
/// false, the call will fail if `path` already exists.
///
/// If `mtime` is given, the file's modification time is set to that many
/// seconds since the UNIX epoch before it becomes visible at `path`.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    overwrite: bool,
    mode: u32,
    mtime: Option<i64>,
    data: &[u8],
) -> Result<(), Error> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    if let Some(mtime) = mtime {
        set_mtime(tf.path(), mtime)?;
    }
    if overwrite {
        tf.persist(path).map_err(io::Error::from)?;
    } else {
        tf.persist_noclobber(path).map_err(io::Error::from)?;
    }
    Ok(())
}

/// Move `target` out of the way by renaming it to a random sibling whose name
/// starts with `GARBAGE_PREFIX`.
///
/// The rename is atomic, so observers see either the whole old tree at
/// `target` or nothing there at all. Returns the new location.
pub fn rename_aside(target: impl AsRef<Path>) -> io::Result<PathBuf> {
    let target = target.as_ref();
    let parent = target.parent().unwrap_or_else(|| Path::new("."));

    loop {
        let name = format!("{}{}", GARBAGE_PREFIX, OsRng.gen::<u64>());
        let dst = parent.join(name);

        // rename() happily replaces an empty directory, so make sure nothing
        // is there first
        if dst.exists() {
            continue;
        }

        match fs::rename(target, &dst) {
            Ok(()) => return Ok(dst),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Delete `target` by first renaming it aside (see `rename_aside`), then
/// recursively removing the renamed tree.
///
/// Only the rename can fail the call. Failure to remove the renamed tree is
/// logged and otherwise ignored since it no longer shadows anything.
pub fn delete_aside(target: impl AsRef<Path>) -> io::Result<()> {
    let dst = rename_aside(target)?;
    if let Err(e) = fs::remove_dir_all(&dst) {
        error!("Failed to remove {}: {}", dst.display(), e);
    }

    Ok(())
}

/// Set the modification (and access) time of the file at `path` to `unix`
/// seconds since the epoch.
pub fn set_mtime(path: impl AsRef<Path>, unix: i64) -> Result<(), Error> {
    let tv = TimeVal::seconds(unix);
    nix::sys::stat::utimes(path.as_ref(), &tv, &tv)?;
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            Err(Error::Nix(nix::Error::Sys(nix::errno::Errno::ENOENT))) => {
                Err(error)
            }
            s => s,
        }
    }
}
