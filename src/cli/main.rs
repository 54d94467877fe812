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


use std::path::{Path, PathBuf};

use log::{error, LevelFilter};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use structopt::StructOpt;

use crate::store::folder_path::FolderPath;
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::{self, SystemConfig};

const LOG_CONFIG_FILE: &str = "logging.toml";
const LOG_FILE: &str = "mhsync.log";
const LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%S%z)} {l} {t} - {m}{n}";

/// Mirror IMAP mailboxes into MH-style folders, one file per message.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Incorporate new mail from the server into the local folder.
    ///
    /// Only messages which are not already cached are downloaded. The
    /// mailbox is opened read-only, so nothing on the server is changed and
    /// no message is marked as read.
    ///
    /// If the server reports that the UIDs of the mailbox have been reset
    /// (i.e., its UIDVALIDITY changed), the whole local folder is thrown
    /// away and downloaded again.
    Inc(IncSubcommand),
    /// Print the current message.
    Show(CommonOptions),
    /// Advance to the next message and print it.
    Next(CommonOptions),
    /// Go back to the previous message and print it.
    Prev(CommonOptions),
    /// List the messages in the folder, one per line.
    Scan(CommonOptions),
}

impl Command {
    fn common_options(&self) -> &CommonOptions {
        match *self {
            Command::Inc(ref c) => &c.common,
            Command::Show(ref c)
            | Command::Next(ref c)
            | Command::Prev(ref c)
            | Command::Scan(ref c) => c,
        }
    }
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The directory containing the folders and `mhsync.toml`
    /// [default: $MHSYNC_PATH]
    #[structopt(long, parse(from_os_str))]
    pub(super) base: Option<PathBuf>,
    /// The local folder to use [default: from mhsync.toml, else inbox]
    #[structopt(long, short)]
    pub(super) folder: Option<String>,
}

#[derive(StructOpt)]
pub(super) struct IncSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,
    /// The host to connect to [default: from mhsync.toml, else
    /// imap.gmail.com]
    #[structopt(long)]
    pub(super) host: Option<String>,
    /// The port to connect to [default: from mhsync.toml, else 993]
    #[structopt(long, short)]
    pub(super) port: Option<u16>,
    /// The user name to log in as [default: from mhsync.toml, else the
    /// current UNIX user name]
    #[structopt(long, short)]
    pub(super) user: Option<String>,
    /// The password to log in with. If not given, it is prompted for on the
    /// terminal.
    #[structopt(long)]
    pub(super) password: Option<String>,
    /// The remote mailbox to incorporate from [default: from mhsync.toml,
    /// else INBOX]
    ///
    /// Unless --folder is also given, the local folder is named after the
    /// mailbox.
    #[structopt(long, short)]
    pub(super) mailbox: Option<String>,
    /// Allow insecure TLS connections
    #[structopt(long)]
    pub(super) allow_insecure_tls_connections: bool,
    /// Dump a trace of the IMAP connection to standard error.
    #[structopt(long)]
    pub(super) trace: bool,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let common = cmd.common_options();
    let base = system_config::resolve_base(common.base.clone())
        .unwrap_or_else(|e| die_on(e));
    let config = SystemConfig::load(&base).unwrap_or_else(|e| die_on(e));

    init_logging(&base);

    let folder = if let Some(ref folder) = common.folder {
        FolderPath::new(&base, folder)
    } else if let Command::Inc(IncSubcommand {
        mailbox: Some(ref mailbox),
        ..
    }) = cmd
    {
        FolderPath::for_mailbox(&base, mailbox)
    } else {
        FolderPath::new(&base, &config.local.folder)
    }
    .unwrap_or_else(|e| die_on(e));

    match cmd {
        Command::Inc(cmd) => super::inc::inc(config, folder, cmd),
        Command::Show(_) => super::nav::show(&folder),
        Command::Next(_) => super::nav::next(&folder),
        Command::Prev(_) => super::nav::prev(&folder),
        Command::Scan(_) => super::nav::scan(&folder),
    }
}

/// Report `e` and exit with the status appropriate to it.
pub(super) fn die_on(e: Error) -> ! {
    error!("{}", e);
    die!(Sysexit::for_error(&e), "Error: {}", e)
}

fn init_logging(base: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    let log_config_file = base.join(LOG_CONFIG_FILE);
    if log_config_file.is_file() {
        match log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::default(),
        ) {
            Ok(()) => return,
            Err(e) => eprintln!(
                "Failed to load '{}', using defaults: {}",
                log_config_file.display(),
                e
            ),
        }
    }

    let log_file = base.join(LOG_FILE);
    let appender = match FileAppender::builder()
        .append(true)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(&log_file)
    {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!(
                "Unable to open '{}', logging to stderr: {}",
                log_file.display(),
                e
            );
            crate::init_simple_log();
            return;
        }
    };

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Failed to initialise logging: {}", e),
    }
}
