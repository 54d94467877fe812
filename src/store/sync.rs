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

//! Incorporation of new mail from the server into the local cache.

use std::collections::HashSet;
use std::fmt;

use log::{debug, info, warn};

use super::folder_path::FolderPath;
use super::local_store::LocalStore;
use super::model::*;
use super::validity::{self, ValidityOutcome};
use crate::support::error::Error;

/// The responses to a fetch, pulled one at a time.
///
/// The iterator ends after the command completes. A failed or aborted
/// command yields one final `Err`.
pub type FetchResponses<'a> =
    Box<dyn Iterator<Item = Result<FetchedMessage, Error>> + 'a>;

/// A connection to the server holding the remote side of the folders.
pub trait Session {
    /// Select the remote mailbox `name`, read-only.
    fn select_folder(&mut self, name: &str) -> Result<SelectedFolder, Error>;

    /// Return the UIDs of every message in the selected mailbox.
    fn list_identifiers(&mut self) -> Result<HashSet<Uid>, Error>;

    /// Fetch the full content and receipt time of each message in `uids`
    /// from the selected mailbox.
    ///
    /// Messages may arrive in any order.
    fn fetch<'a>(
        &'a mut self,
        uids: &[Uid],
    ) -> Result<FetchResponses<'a>, Error>;

    /// End the session.
    fn close(&mut self) -> Result<(), Error>;
}

/// How the fetch command of a sync ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    /// Nothing was missing, so nothing was fetched.
    NotNeeded,
    Completed,
    Aborted,
    /// The server rejected the command.
    Failed(String),
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FetchStatus::NotNeeded => write!(f, "up to date"),
            FetchStatus::Completed => write!(f, "completed"),
            FetchStatus::Aborted => write!(f, "aborted"),
            FetchStatus::Failed(ref why) => write!(f, "failed: {}", why),
        }
    }
}

/// What a sync did.
#[derive(Debug)]
pub struct SyncReport {
    pub uid_validity: UidValidity,
    pub validity: ValidityOutcome,
    /// The number of messages the server reported on selection.
    pub exists: u32,
    /// The UIDs which were not cached before the sync.
    pub missing: HashSet<Uid>,
    /// The UIDs written to the cache, in the order they arrived.
    pub stored: Vec<Uid>,
    /// The UIDs which arrived but could not be written.
    pub failed: Vec<(Uid, Error)>,
    /// The missing UIDs the server never delivered.
    pub undelivered: Vec<Uid>,
    pub status: FetchStatus,
}

impl SyncReport {
    /// Whether every missing message is now cached.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
            && self.undelivered.is_empty()
            && matches!(
                self.status,
                FetchStatus::NotNeeded | FetchStatus::Completed
            )
    }
}

/// Bring the cache of `folder` up to date with the remote mailbox
/// `mailbox`.
///
/// Only messages not already cached are transferred. Failing to store one
/// message does not stop the others from being stored; such failures, as well
/// as the server failing or aborting the fetch, are reported in the returned
/// `SyncReport` rather than as an error. Errors are only returned for
/// problems which prevent the sync from starting or which leave the whole
/// folder suspect (in particular, `Error::Inconsistent`).
pub fn sync(
    session: &mut dyn Session,
    store: &dyn LocalStore,
    folder: &FolderPath,
    mailbox: &str,
) -> Result<SyncReport, Error> {
    let selected = session.select_folder(mailbox)?;
    info!(
        "{}: selected {}, UID validity {}, {} messages",
        folder.name(),
        mailbox,
        selected.uid_validity,
        selected.exists
    );

    let validity = validity::ensure_valid(folder, selected.uid_validity)?;
    let cached = if validity.evicted() {
        HashSet::new()
    } else {
        store.list_cached(folder)?
    };

    let on_server = session.list_identifiers()?;
    let missing = on_server
        .difference(&cached)
        .copied()
        .collect::<HashSet<Uid>>();
    info!(
        "{}: {} on server, {} cached, {} missing",
        folder.name(),
        on_server.len(),
        cached.len(),
        missing.len()
    );

    let mut report = SyncReport {
        uid_validity: selected.uid_validity,
        validity,
        exists: selected.exists,
        missing,
        stored: Vec::new(),
        failed: Vec::new(),
        undelivered: Vec::new(),
        status: FetchStatus::NotNeeded,
    };

    if report.missing.is_empty() {
        return Ok(report);
    }

    let mut request = report.missing.iter().copied().collect::<Vec<_>>();
    request.sort_unstable();

    let mut outstanding = report.missing.clone();
    report.status = FetchStatus::Completed;
    for response in session.fetch(&request)? {
        let message = match response {
            Ok(message) => message,
            Err(Error::CommandFailed(why)) => {
                warn!("{}: fetch failed: {}", folder.name(), why);
                report.status = FetchStatus::Failed(why);
                break;
            }
            Err(e) => {
                warn!("{}: fetch aborted: {}", folder.name(), e);
                report.status = FetchStatus::Aborted;
                break;
            }
        };

        if !outstanding.remove(&message.uid) {
            debug!(
                "{}: ignoring unrequested or duplicate UID {}",
                folder.name(),
                message.uid
            );
            continue;
        }

        match store.write_message(
            folder,
            message.uid,
            &message.content,
            message.received,
        ) {
            Ok(()) => {
                debug!("{}: stored {}", folder.name(), message.uid);
                report.stored.push(message.uid);
            }
            Err(e) => {
                warn!(
                    "{}: failed to store {}: {}",
                    folder.name(),
                    message.uid,
                    e
                );
                report.failed.push((message.uid, e));
            }
        }
    }

    report.undelivered = outstanding.into_iter().collect();
    report.undelivered.sort_unstable();
    if !report.undelivered.is_empty() {
        warn!(
            "{}: server never delivered {} messages",
            folder.name(),
            report.undelivered.len()
        );
    }

    info!(
        "{}: stored {} new messages, {} failed, fetch {}",
        folder.name(),
        report.stored.len(),
        report.failed.len(),
        report.status
    );

    Ok(report)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;

    use chrono::prelude::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::store::local_store::DirStore;

    /// How a `MemorySession` should end its fetch command.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Ending {
        Ok,
        No,
        Abort,
    }

    /// An in-memory server.
    pub struct MemorySession {
        pub uid_validity: u32,
        pub messages: BTreeMap<u32, Vec<u8>>,
        /// Every UID set requested through `fetch`.
        pub fetches: Vec<Vec<Uid>>,
        /// Deliver responses in descending UID order.
        pub reverse: bool,
        /// Interleave responses for UIDs nobody asked for.
        pub unsolicited: Vec<u32>,
        /// Stop delivering after this many messages.
        pub deliver_limit: Option<usize>,
        pub ending: Ending,
    }

    impl MemorySession {
        pub fn new(uid_validity: u32, uids: &[u32]) -> Self {
            MemorySession {
                uid_validity,
                messages: uids
                    .iter()
                    .map(|&u| (u, format!("Subject: {}\r\n\r\n", u).into()))
                    .collect(),
                fetches: Vec::new(),
                reverse: false,
                unsolicited: Vec::new(),
                deliver_limit: None,
                ending: Ending::Ok,
            }
        }
    }

    pub fn received(uid: Uid) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .timestamp_opt(1_300_000_000 + uid.0 as i64, 0)
            .unwrap()
    }

    impl Session for MemorySession {
        fn select_folder(
            &mut self,
            _name: &str,
        ) -> Result<SelectedFolder, Error> {
            Ok(SelectedFolder {
                uid_validity: UidValidity(self.uid_validity),
                exists: self.messages.len() as u32,
            })
        }

        fn list_identifiers(&mut self) -> Result<HashSet<Uid>, Error> {
            Ok(self.messages.keys().copied().map(Uid).collect())
        }

        fn fetch<'a>(
            &'a mut self,
            uids: &[Uid],
        ) -> Result<FetchResponses<'a>, Error> {
            self.fetches.push(uids.to_vec());

            let mut responses = Vec::new();
            let mut order = uids.to_vec();
            if self.reverse {
                order.reverse();
            }
            for (ix, &uid) in order.iter().enumerate() {
                if self.deliver_limit.map_or(false, |l| ix >= l) {
                    break;
                }
                if let Some(&extra) = self.unsolicited.get(ix) {
                    responses.push(Ok(FetchedMessage {
                        uid: Uid(extra),
                        received: received(Uid(extra)),
                        content: b"unsolicited".to_vec(),
                    }));
                }
                if let Some(content) = self.messages.get(&uid.0) {
                    responses.push(Ok(FetchedMessage {
                        uid,
                        received: received(uid),
                        content: content.clone(),
                    }));
                }
            }

            match self.ending {
                Ending::Ok => (),
                Ending::No => responses
                    .push(Err(Error::CommandFailed("NO try later".into()))),
                Ending::Abort => responses.push(Err(Error::CommandAborted)),
            }

            Ok(Box::new(responses.into_iter()))
        }

        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Wraps `DirStore`, failing to write the chosen UIDs and counting the
    /// writes.
    struct FaultyStore {
        fail: HashSet<Uid>,
        writes: RefCell<usize>,
    }

    impl FaultyStore {
        fn new(fail: &[u32]) -> Self {
            FaultyStore {
                fail: fail.iter().copied().map(Uid).collect(),
                writes: RefCell::new(0),
            }
        }
    }

    impl LocalStore for FaultyStore {
        fn list_cached(
            &self,
            folder: &FolderPath,
        ) -> Result<HashSet<Uid>, Error> {
            DirStore.list_cached(folder)
        }

        fn write_message(
            &self,
            folder: &FolderPath,
            uid: Uid,
            content: &[u8],
            received: DateTime<FixedOffset>,
        ) -> Result<(), Error> {
            *self.writes.borrow_mut() += 1;
            if self.fail.contains(&uid) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                )));
            }
            DirStore.write_message(folder, uid, content, received)
        }

        fn read_message(
            &self,
            folder: &FolderPath,
            uid: Uid,
        ) -> Result<Vec<u8>, Error> {
            DirStore.read_message(folder, uid)
        }

        fn contains(&self, folder: &FolderPath, uid: Uid) -> bool {
            DirStore.contains(folder, uid)
        }
    }

    fn fixture() -> (TempDir, FolderPath) {
        crate::init_test_log();
        let root = TempDir::new().unwrap();
        let folder = FolderPath::new(root.path(), "inbox").unwrap();
        (root, folder)
    }

    fn cached(folder: &FolderPath) -> Vec<u32> {
        let mut v = DirStore
            .list_cached(folder)
            .unwrap()
            .into_iter()
            .map(|u| u.0)
            .collect::<Vec<_>>();
        v.sort_unstable();
        v
    }

    fn uids(raw: &[u32]) -> Vec<Uid> {
        raw.iter().copied().map(Uid).collect()
    }

    #[test]
    fn first_sync_fetches_everything() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 5]);

        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(ValidityOutcome::Fresh, report.validity);
        assert_eq!(FetchStatus::Completed, report.status);
        assert!(report.is_complete());
        assert_eq!(vec![uids(&[1, 2, 5])], session.fetches);
        assert_eq!(vec![1, 2, 5], cached(&folder));
        assert_eq!(
            b"Subject: 5\r\n\r\n".to_vec(),
            DirStore.read_message(&folder, Uid(5)).unwrap()
        );

        let mtime = fs::metadata(folder.message_path(Uid(5)))
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert_eq!(received(Uid(5)).timestamp(), mtime);
    }

    #[test]
    fn second_sync_is_idempotent() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 3]);
        sync(&mut session, &DirStore, &folder, "INBOX").unwrap();

        let store = FaultyStore::new(&[]);
        let report = sync(&mut session, &store, &folder, "INBOX").unwrap();
        assert_eq!(ValidityOutcome::Unchanged, report.validity);
        assert_eq!(FetchStatus::NotNeeded, report.status);
        assert_eq!(0, *store.writes.borrow());
        assert_eq!(1, session.fetches.len());
    }

    #[test]
    fn only_missing_messages_are_fetched() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 3]);
        sync(&mut session, &DirStore, &folder, "INBOX").unwrap();

        session.messages.insert(4, b"new".to_vec());
        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(uids(&[4]), session.fetches[1]);
        assert_eq!(uids(&[4]), report.stored);
        assert_eq!(vec![1, 2, 3, 4], cached(&folder));
    }

    #[test]
    fn write_failures_are_isolated() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[4, 5, 6]);
        let store = FaultyStore::new(&[5]);

        let report = sync(&mut session, &store, &folder, "INBOX").unwrap();
        assert_eq!(FetchStatus::Completed, report.status);
        assert_eq!(1, report.failed.len());
        assert_eq!(Uid(5), report.failed[0].0);
        assert!(!report.is_complete());
        assert_eq!(vec![4, 6], cached(&folder));

        // The next sync picks up where this one left off
        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(uids(&[5]), report.stored);
        assert_eq!(vec![4, 5, 6], cached(&folder));
    }

    #[test]
    fn validity_change_refetches_everything() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 3]);
        sync(&mut session, &DirStore, &folder, "INBOX").unwrap();

        // Server renumbered; UID 2 now means something else
        session.uid_validity = 8;
        session.messages.clear();
        session.messages.insert(1, b"renumbered 1".to_vec());
        session.messages.insert(2, b"renumbered 2".to_vec());

        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(
            ValidityOutcome::Evicted {
                previous: Some(UidValidity(7))
            },
            report.validity
        );
        assert_eq!(uids(&[1, 2]), session.fetches[1]);
        assert_eq!(vec![1, 2], cached(&folder));
        assert_eq!(
            b"renumbered 2".to_vec(),
            DirStore.read_message(&folder, Uid(2)).unwrap()
        );
        assert_eq!(
            Some(UidValidity(8)),
            validity::recorded(&folder).unwrap()
        );
    }

    #[test]
    fn out_of_order_and_unsolicited_responses() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 3, 4]);
        session.reverse = true;
        session.unsolicited = vec![99, 100];

        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(uids(&[4, 3, 2, 1]), report.stored);
        assert!(report.is_complete());
        assert_eq!(vec![1, 2, 3, 4], cached(&folder));
    }

    #[test]
    fn server_failure_keeps_what_was_written() {
        let (_root, folder) = fixture();
        let mut session = MemorySession::new(7, &[1, 2, 3, 4]);
        session.deliver_limit = Some(2);
        session.ending = Ending::No;

        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(
            FetchStatus::Failed("NO try later".to_owned()),
            report.status
        );
        assert_eq!(uids(&[3, 4]), report.undelivered);
        assert_eq!(vec![1, 2], cached(&folder));

        session.deliver_limit = None;
        session.ending = Ending::Abort;
        let report = sync(&mut session, &DirStore, &folder, "INBOX").unwrap();
        assert_eq!(FetchStatus::Aborted, report.status);
        assert_eq!(uids(&[3, 4]), session.fetches[1]);
        assert_eq!(vec![1, 2, 3, 4], cached(&folder));
    }

    #[test]
    fn inconsistent_cache_is_fatal() {
        let root = TempDir::new().unwrap();
        let base = root.path().join("base");
        fs::write(&base, b"").unwrap();
        let folder = FolderPath::new(&base, "inbox").unwrap();
        let mut session = MemorySession::new(7, &[1]);

        assert_matches!(
            Err(Error::Inconsistent { .. }),
            sync(&mut session, &DirStore, &folder, "INBOX")
        );
        assert!(session.fetches.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fetches_exactly_the_difference(
            before in prop::collection::btree_set(1u32..40, 0..12),
            after in prop::collection::btree_set(1u32..40, 0..12),
        ) {
            let (_root, folder) = fixture();
            let before = before.into_iter().collect::<Vec<_>>();
            let after = after.into_iter().collect::<Vec<_>>();

            let mut session = MemorySession::new(1, &before);
            sync(&mut session, &DirStore, &folder, "INBOX").unwrap();

            let mut session = MemorySession::new(1, &after);
            sync(&mut session, &DirStore, &folder, "INBOX").unwrap();

            let expected = after
                .iter()
                .copied()
                .filter(|u| !before.contains(u))
                .map(Uid)
                .collect::<Vec<_>>();
            if expected.is_empty() {
                prop_assert!(session.fetches.is_empty());
            } else {
                prop_assert_eq!(vec![expected], session.fetches);
            }

            let mut union = before.clone();
            union.extend(after.iter().copied());
            union.sort_unstable();
            union.dedup();
            prop_assert_eq!(union, cached(&folder));
        }
    }
}
