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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No mail directory configured; set MHSYNC_PATH or pass --base")]
    NoBaseDirectory,
    #[error("Unsafe folder name")]
    UnsafeName,
    #[error("Bad configuration: {0}")]
    BadConfig(String),
    #[error("No such message")]
    NxMessage,
    #[error("No next message")]
    NoNextMessage,
    #[error("No previous message")]
    NoPreviousMessage,
    #[error("Server rejected command: {0}")]
    CommandFailed(String),
    #[error("Command aborted")]
    CommandAborted,
    #[error("Unexpected server response: {0}")]
    UnexpectedResponse(String),
    #[error("Cache of '{folder}' could not be made consistent: {source}")]
    Inconsistent {
        folder: String,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Ssl2(#[from] openssl::ssl::Error),
    #[error(transparent)]
    Client(#[from] crate::imap::client::Error),
}
