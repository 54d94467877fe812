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

//! Exit codes from `sysexits.h`, following the MH/sendmail conventions.

use crate::support::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_NOHOST: Sysexit = Sysexit(68);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_PROTOCOL: Sysexit = Sysexit(76);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// The exit code for a command which failed with `error`.
    pub fn for_error(error: &Error) -> Self {
        match *error {
            Error::NoBaseDirectory
            | Error::UnsafeName
            | Error::BadConfig(..) => EX_CONFIG,
            Error::NxMessage
            | Error::NoNextMessage
            | Error::NoPreviousMessage => EX_NOINPUT,
            Error::CommandFailed(..)
            | Error::CommandAborted
            | Error::UnexpectedResponse(..) => EX_PROTOCOL,
            Error::Client(..) | Error::Ssl(..) | Error::Ssl2(..) => {
                EX_UNAVAILABLE
            }
            Error::Inconsistent { .. } | Error::Io(..) | Error::Nix(..) => {
                EX_IOERR
            }
        }
    }
}
