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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;

/// Name of the environment variable giving the base directory.
pub const BASE_ENV: &str = "MHSYNC_PATH";
/// Name of the configuration file within the base directory.
pub const CONFIG_FILE: &str = "mhsync.toml";

/// The configuration for one mhsync base directory.
///
/// This is stored in a file named `mhsync.toml` directly under the base
/// directory. The file is optional; every field has a default, and the
/// command line overrides whatever is found here.
#[derive(Clone, Debug, Deserialize, Serialize, Default, PartialEq)]
pub struct SystemConfig {
    /// Where and how to reach the IMAP server.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Options for the local store.
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    /// The IMAPS host to connect to.
    pub host: String,
    /// The port to connect to. The connection is always implicit TLS.
    pub port: u16,
    /// The user name to log in as.
    ///
    /// If empty, the name of the current UNIX user is used.
    pub user: String,
    /// The remote mailbox to incorporate.
    pub mailbox: String,
    /// Skip certificate verification. Only useful for testing.
    pub allow_insecure_tls_connections: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            host: "imap.gmail.com".to_owned(),
            port: 993,
            user: String::new(),
            mailbox: "INBOX".to_owned(),
            allow_insecure_tls_connections: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LocalConfig {
    /// The folder that navigation commands operate on.
    pub folder: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            folder: "inbox".to_owned(),
        }
    }
}

impl SystemConfig {
    /// Load the configuration from `base`, falling back to defaults if there
    /// is no configuration file.
    pub fn load(base: &Path) -> Result<Self, Error> {
        let path = base.join(CONFIG_FILE);
        let data = fs::read(&path).ignore_not_found()?;
        if data.is_empty() {
            return Ok(SystemConfig::default());
        }

        toml::from_slice(&data).map_err(|e| {
            Error::BadConfig(format!("{}: {}", path.display(), e))
        })
    }
}

/// Resolve the base directory from the command line or, failing that, the
/// environment, creating it if it does not exist yet.
pub fn resolve_base(explicit: Option<PathBuf>) -> Result<PathBuf, Error> {
    let base = explicit
        .or_else(|| {
            std::env::var_os(BASE_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .ok_or(Error::NoBaseDirectory)?;

    fs::create_dir_all(&base)?;
    Ok(base)
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let root = TempDir::new().unwrap();
        let config = SystemConfig::load(root.path()).unwrap();
        assert_eq!(SystemConfig::default(), config);
        assert_eq!("INBOX", config.remote.mailbox);
        assert_eq!(993, config.remote.port);
        assert_eq!("inbox", config.local.folder);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join(CONFIG_FILE),
            "[remote]\n\
             host = \"mail.example.com\"\n\
             user = \"alice\"\n",
        )
        .unwrap();

        let config = SystemConfig::load(root.path()).unwrap();
        assert_eq!("mail.example.com", config.remote.host);
        assert_eq!("alice", config.remote.user);
        assert_eq!(993, config.remote.port);
        assert_eq!("inbox", config.local.folder);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(CONFIG_FILE), "[remote\n").unwrap();
        assert_matches!(
            Err(Error::BadConfig(..)),
            SystemConfig::load(root.path())
        );
    }

    #[test]
    fn explicit_base_is_created() {
        let root = TempDir::new().unwrap();
        let base = root.path().join("Mail");
        assert_eq!(base, resolve_base(Some(base.clone())).unwrap());
        assert!(base.is_dir());
    }
}
