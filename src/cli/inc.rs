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
use std::net::{TcpStream, ToSocketAddrs};

use log::{info, warn};
use openssl::ssl::{
    HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode,
};

use super::main::{die_on, IncSubcommand};
use crate::imap::session::ImapSession;
use crate::store::folder_path::FolderPath;
use crate::store::local_store::DirStore;
use crate::store::sync::{self, FetchStatus, Session, SyncReport};
use crate::store::validity;
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::{RemoteConfig, SystemConfig};

type RemoteSession = ImapSession<SslStream<TcpStream>>;

pub(super) fn inc(
    config: SystemConfig,
    folder: FolderPath,
    cmd: IncSubcommand,
) {
    let remote = apply_overrides(config.remote, &cmd);

    let purged = validity::purge_garbage(folder.base());
    if purged > 0 {
        info!("Purged {} interrupted evictions", purged);
    }

    let user = if remote.user.is_empty() {
        current_unix_user()
    } else {
        remote.user.clone()
    };

    let password = match cmd.password {
        Some(ref password) => password.clone(),
        None => match rpassword::read_password_from_tty(Some("Password: ")) {
            Ok(p) => p,
            Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
        },
    };

    let mut session = connect(&remote, cmd.trace).unwrap_or_else(|e| die_on(e));
    session.login(&user, &password).unwrap_or_else(|e| die_on(e));

    let report = sync::sync(&mut session, &DirStore, &folder, &remote.mailbox)
        .unwrap_or_else(|e| die_on(e));

    if let Err(e) = session.close() {
        warn!("LOGOUT failed: {}", e);
    }

    print_report(&folder, &report);
}

fn apply_overrides(
    mut remote: RemoteConfig,
    cmd: &IncSubcommand,
) -> RemoteConfig {
    if let Some(ref host) = cmd.host {
        remote.host = host.clone();
    }
    if let Some(port) = cmd.port {
        remote.port = port;
    }
    if let Some(ref user) = cmd.user {
        remote.user = user.clone();
    }
    if let Some(ref mailbox) = cmd.mailbox {
        remote.mailbox = mailbox.clone();
    }
    remote.allow_insecure_tls_connections |=
        cmd.allow_insecure_tls_connections;
    remote
}

fn current_unix_user() -> String {
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(u)) => u.name,
        Ok(None) => die!(EX_NOUSER, "No passwd entry for current user"),
        Err(e) => {
            die!(EX_NOUSER, "Failed to look up current UNIX user: {}", e)
        }
    }
}

fn connect(remote: &RemoteConfig, trace: bool) -> Result<RemoteSession, Error> {
    let address = match (&remote.host as &str, remote.port)
        .to_socket_addrs()?
        .next()
    {
        Some(address) => address,
        None => die!(EX_NOHOST, "Host not found: {}", remote.host),
    };

    info!("Connecting to {} ({})", remote.host, address);
    let tcp_stream = TcpStream::connect(address)?;

    let mut connector = SslConnector::builder(SslMethod::tls())?;
    if remote.allow_insecure_tls_connections {
        connector.set_verify(SslVerifyMode::NONE);
    }

    let ssl_stream = connector
        .build()
        .connect(&remote.host, tcp_stream)
        .map_err(|e| match e {
            HandshakeError::SetupFailure(es) => Error::Ssl(es),
            HandshakeError::Failure(f) => Error::Ssl2(f.into_error()),
            HandshakeError::WouldBlock(_) => {
                Error::Io(io::ErrorKind::WouldBlock.into())
            }
        })?;

    ImapSession::start(ssl_stream, if trace { Some("imap") } else { None })
}

fn print_report(folder: &FolderPath, report: &SyncReport) {
    if report.validity.evicted() {
        println!(
            "{}: UID validity changed; local copies discarded",
            folder.name()
        );
    }

    match report.status {
        FetchStatus::NotNeeded => {
            println!("{}: no new messages", folder.name());
        }
        _ => {
            println!(
                "{}: incorporated {} of {} new messages",
                folder.name(),
                report.stored.len(),
                report.missing.len()
            );
        }
    }

    for &(uid, ref e) in &report.failed {
        eprintln!("{}: failed to store message {}: {}", folder.name(), uid, e);
    }

    if !report.undelivered.is_empty() {
        eprintln!(
            "{}: server did not deliver {} messages ({})",
            folder.name(),
            report.undelivered.len(),
            report.status
        );
    }

    if !report.is_complete() {
        eprintln!(
            "Warning: {} is incomplete; run inc again to retry",
            folder.name()
        );
    }
}
