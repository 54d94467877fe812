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

use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;

/// A server-assigned message identifier.
///
/// UIDs are only meaningful within one `UidValidity` epoch of one folder.
/// Within an epoch they only ever grow as new mail arrives, but the local
/// cache makes no use of ordering beyond navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

impl Uid {
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Uid)
    }

    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Uid)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Uid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u32::from_str tolerates a leading '+', which would make "+1" alias
        // "1"; message files only ever have plain decimal names.
        if s.starts_with('+') {
            return "".parse::<u32>().map(Uid);
        }

        s.parse::<u32>().map(Uid)
    }
}

/// The server's identifier for the current UID epoch of a folder.
///
/// It has no meaning beyond equality: when it changes, every UID previously
/// seen in the folder is void.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UidValidity(pub u32);

impl fmt::Display for UidValidity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state reported by the server upon selecting a folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectedFolder {
    pub uid_validity: UidValidity,
    /// The number of messages in the folder.
    pub exists: u32,
}

/// One message as delivered by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: Uid,
    /// When the server received the message (the IMAP `INTERNALDATE`).
    pub received: DateTime<FixedOffset>,
    pub content: Vec<u8>,
}
