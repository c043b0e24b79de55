use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use civicfix_types::api::{UserStats, VoteActivity};
use civicfix_types::models::{Identity, VoteAction};

use crate::Database;
use crate::models::{VoteOutcome, ts_col};
use crate::notifications::insert_notification;
use crate::queries::{OptionalExt, is_unique_violation, now_ts, upsert_user};

/// A losing insert flips to a delete on the next attempt; more than a couple
/// of rounds means something other than a racing twin is going on.
const MAX_TOGGLE_ATTEMPTS: usize = 3;

type VoteKey = (Uuid, i64);
type SharedOutcome = std::result::Result<Option<VoteOutcome>, String>;

/// Toggles for one (voter, issue) that overlap in time collapse into a
/// single ledger write. The first caller runs it; callers arriving while it
/// is in flight wait and receive the same outcome. A toggle that starts after
/// the flight has landed is a new flip.
#[derive(Default)]
pub(crate) struct VoteFlights {
    flights: Mutex<HashMap<VoteKey, Arc<Flight>>>,
}

#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<SharedOutcome>>,
    landed: Condvar,
    joined: AtomicUsize,
}

impl VoteFlights {
    fn run<F>(&self, key: VoteKey, toggle: F) -> Result<Option<VoteOutcome>>
    where
        F: FnOnce() -> Result<Option<VoteOutcome>>,
    {
        let flight = {
            let mut flights = self.lock();
            if let Some(flight) = flights.get(&key) {
                flight.joined.fetch_add(1, Ordering::AcqRel);
                let flight = flight.clone();
                drop(flights);
                debug!("Vote toggle for ({}, {}) joined an in-flight toggle", key.0, key.1);
                return flight.wait();
            }
            let flight = Arc::new(Flight::default());
            flights.insert(key, flight.clone());
            flight
        };

        let mut leader = Leader {
            flights: self,
            key,
            flight,
            outcome: None,
        };
        let result = toggle();
        leader.outcome = Some(match &result {
            Ok(outcome) => Ok(outcome.clone()),
            Err(e) => Err(format!("{:#}", e)),
        });
        result
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<VoteKey, Arc<Flight>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callers currently waiting on the in-flight toggle for `key`.
    #[cfg(test)]
    pub(crate) fn joined(&self, key: VoteKey) -> usize {
        self.lock()
            .get(&key)
            .map_or(0, |f| f.joined.load(Ordering::Acquire))
    }
}

impl Flight {
    fn wait(&self) -> Result<Option<VoteOutcome>> {
        let guard = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = self
            .landed
            .wait_while(guard, |o| o.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match outcome.as_ref() {
            Some(Ok(shared)) => Ok(shared.clone()),
            Some(Err(msg)) => Err(anyhow!("{}", msg)),
            None => bail!("Vote flight woke without an outcome"),
        }
    }

    fn land(&self, outcome: SharedOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.landed.notify_all();
    }
}

/// Unregisters the flight and wakes its waiters, also when the leading
/// toggle unwinds.
struct Leader<'a> {
    flights: &'a VoteFlights,
    key: VoteKey,
    flight: Arc<Flight>,
    outcome: Option<SharedOutcome>,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        self.flights.lock().remove(&self.key);
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("vote toggle abandoned".to_string()));
        self.flight.land(outcome);
    }
}

impl Database {
    /// Toggle the (voter, issue) vote: remove it if present, insert it if not.
    ///
    /// The flip is a delete-or-insert inside one write transaction, with the
    /// `UNIQUE (user_id, issue_id)` constraint as the final arbiter. An insert
    /// that loses to a concurrent twin is retried as a delete rather than
    /// reported. `vote_count` is recounted from the ledger afterwards.
    ///
    /// Duplicate toggles that arrive while one is already running for the
    /// same pair share its outcome instead of flipping again, so a burst of
    /// identical requests from "no vote" always ends with one vote.
    ///
    /// Returns `None` when the issue does not exist.
    pub fn toggle_vote(&self, issue_id: i64, voter: &Identity) -> Result<Option<VoteOutcome>> {
        self.vote_flights
            .run((voter.user_id, issue_id), || self.apply_toggle(issue_id, voter))
    }

    fn apply_toggle(&self, issue_id: i64, voter: &Identity) -> Result<Option<VoteOutcome>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some((owner_id, title)) = issue_owner(&tx, issue_id)? else {
                return Ok(None);
            };
            upsert_user(&tx, voter)?;

            let voter_id = voter.user_id.to_string();
            let mut action = None;

            for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
                let removed = tx.execute(
                    "DELETE FROM votes WHERE user_id = ?1 AND issue_id = ?2",
                    rusqlite::params![voter_id, issue_id],
                )?;
                if removed > 0 {
                    action = Some(VoteAction::Unvoted);
                    break;
                }

                match tx.execute(
                    "INSERT INTO votes (user_id, issue_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![voter_id, issue_id, now_ts()],
                ) {
                    Ok(_) => {
                        action = Some(VoteAction::Voted);
                        break;
                    }
                    Err(e) if is_unique_violation(&e) => {
                        debug!(
                            "Vote insert for ({}, {}) lost a race on attempt {}, retrying as delete",
                            voter_id, issue_id, attempt
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let Some(action) = action else {
                bail!("Vote toggle for ({}, {}) did not settle", voter_id, issue_id);
            };

            let vote_count = count_votes(&tx, issue_id)?;

            let notification = if action == VoteAction::Voted && voter.user_id != owner_id {
                Some(insert_notification(
                    &tx,
                    owner_id,
                    Some(issue_id),
                    "New vote",
                    &format!("Your issue '{}' received a new vote.", title),
                    "vote",
                )?)
            } else {
                None
            };

            tx.commit()?;

            Ok(Some(VoteOutcome {
                action,
                vote_count,
                owner_id,
                notification,
            }))
        })
    }

    /// Live vote count, or `None` for an unknown issue.
    pub fn vote_count(&self, issue_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            if issue_owner(conn, issue_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(count_votes(conn, issue_id)?))
        })
    }

    pub fn has_voted(&self, issue_id: i64, voter_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM votes WHERE user_id = ?1 AND issue_id = ?2",
                    rusqlite::params![voter_id.to_string(), issue_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Vote-ledger activity for one user: votes cast, votes received on
    /// their issues, issues reported, and their 10 most recent votes.
    pub fn user_stats(&self, user_id: Uuid) -> Result<UserStats> {
        self.with_conn(|conn| {
            let id = user_id.to_string();
            let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [&id], |r| r.get(0))?) };

            let votes_given = count("SELECT COUNT(*) FROM votes WHERE user_id = ?1")?;
            let votes_received = count(
                "SELECT COUNT(*) FROM votes v JOIN issues i ON i.id = v.issue_id WHERE i.user_id = ?1",
            )?;
            let issues_submitted = count("SELECT COUNT(*) FROM issues WHERE user_id = ?1")?;

            let mut stmt = conn.prepare(
                "SELECT v.issue_id, i.title, v.created_at FROM votes v
                 JOIN issues i ON i.id = v.issue_id
                 WHERE v.user_id = ?1
                 ORDER BY v.created_at DESC, v.id DESC
                 LIMIT 10",
            )?;
            let recent_activity = stmt
                .query_map([&id], |r| {
                    Ok(VoteActivity {
                        kind: "vote".to_string(),
                        issue_id: r.get(0)?,
                        issue_title: r.get(1)?,
                        created_at: ts_col(r, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(UserStats {
                votes_given,
                votes_received,
                issues_submitted,
                recent_activity,
            })
        })
    }
}

fn issue_owner(conn: &Connection, issue_id: i64) -> Result<Option<(Uuid, String)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, title FROM issues WHERE id = ?1",
            [issue_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match row {
        Some((owner, title)) => Ok(Some((Uuid::parse_str(&owner)?, title))),
        None => Ok(None),
    }
}

fn count_votes(conn: &Connection, issue_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE issue_id = ?1",
        [issue_id],
        |r| r.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::tests::report;
    use crate::test_support::TempDb;
    use crate::timeline::tests::refuse_notifications;
    use std::sync::Arc;

    #[test]
    fn toggle_flips_between_voted_and_unvoted() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        let first = db.toggle_vote(issue.id, &voter).unwrap().unwrap();
        assert_eq!(first.action, VoteAction::Voted);
        assert_eq!(first.vote_count, 1);
        assert_eq!(first.owner_id, owner.user_id);
        assert!(first.notification.is_some());

        let second = db.toggle_vote(issue.id, &voter).unwrap().unwrap();
        assert_eq!(second.action, VoteAction::Unvoted);
        assert_eq!(second.vote_count, 0);
        assert!(second.notification.is_none());
    }

    #[test]
    fn even_and_odd_toggle_counts() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        for n in 1..=6 {
            db.toggle_vote(issue.id, &voter).unwrap();
            assert_eq!(db.has_voted(issue.id, voter.user_id).unwrap(), n % 2 == 1);
            assert_eq!(db.vote_count(issue.id).unwrap(), Some((n % 2) as i64));
        }
    }

    #[test]
    fn self_vote_does_not_notify_owner() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        let outcome = db.toggle_vote(issue.id, &owner).unwrap().unwrap();
        assert_eq!(outcome.action, VoteAction::Voted);
        assert!(outcome.notification.is_none());
    }

    #[test]
    fn unknown_issue_returns_none() {
        let db = TempDb::new();
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        assert!(db.toggle_vote(42, &voter).unwrap().is_none());
        assert_eq!(db.vote_count(42).unwrap(), None);
    }

    fn vote_rows(db: &Database, voter: Uuid, issue_id: i64) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM votes WHERE user_id = ?1 AND issue_id = ?2",
                rusqlite::params![voter.to_string(), issue_id],
                |r| r.get(0),
            )?)
        })
        .unwrap()
    }

    /// Start `n` identical toggles while the writer is held, so they all
    /// overlap, then release it.
    fn overlapping_toggles(db: &Arc<TempDb>, voter: &Identity, issue_id: i64, n: usize) -> Vec<VoteOutcome> {
        let writer = db.writer.lock().unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..n)
                .map(|_| {
                    let db = db.clone();
                    let voter = voter.clone();
                    s.spawn(move || db.toggle_vote(issue_id, &voter).unwrap().unwrap())
                })
                .collect();

            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
            while db.vote_flights.joined((voter.user_id, issue_id)) < n - 1 {
                assert!(std::time::Instant::now() < deadline, "toggles never overlapped");
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            drop(writer);

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn overlapping_duplicate_toggles_leave_one_vote() {
        let db = Arc::new(TempDb::new());
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        let outcomes = overlapping_toggles(&db, &voter, issue.id, 2);
        assert!(outcomes.iter().all(|o| o.action == VoteAction::Voted && o.vote_count == 1));
        assert_eq!(vote_rows(&db, voter.user_id, issue.id), 1);

        let outcomes = overlapping_toggles(&db, &voter, issue.id, 8);
        assert!(outcomes.iter().all(|o| o.action == VoteAction::Unvoted && o.vote_count == 0));
        assert_eq!(vote_rows(&db, voter.user_id, issue.id), 0);

        // Only the leading toggle wrote a notification.
        let votes_noted = db
            .list_notifications(owner.user_id)
            .unwrap()
            .iter()
            .filter(|n| n.kind == "vote")
            .count();
        assert_eq!(votes_noted, 1);
    }

    #[test]
    fn unsynchronised_burst_never_duplicates() {
        let db = Arc::new(TempDb::new());
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        std::thread::scope(|s| {
            for _ in 0..10 {
                let db = db.clone();
                let voter = voter.clone();
                s.spawn(move || db.toggle_vote(issue.id, &voter).unwrap().unwrap());
            }
        });

        let rows = vote_rows(&db, voter.user_id, issue.id);
        assert!(rows <= 1);
        assert_eq!(db.vote_count(issue.id).unwrap(), Some(rows));
    }

    #[test]
    fn sequential_toggle_after_a_flight_flips_again() {
        let db = Arc::new(TempDb::new());
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");

        overlapping_toggles(&db, &voter, issue.id, 4);
        let next = db.toggle_vote(issue.id, &voter).unwrap().unwrap();
        assert_eq!(next.action, VoteAction::Unvoted);
        assert_eq!(vote_rows(&db, voter.user_id, issue.id), 0);
    }

    #[test]
    fn failed_notification_rolls_back_the_vote() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");
        refuse_notifications(&db);

        assert!(db.toggle_vote(issue.id, &voter).is_err());
        assert!(!db.has_voted(issue.id, voter.user_id).unwrap());
        assert_eq!(db.vote_count(issue.id).unwrap(), Some(0));
        assert!(!db.user_exists(voter.user_id).unwrap());

        // The failed flight is gone; a later toggle runs afresh.
        assert!(db.toggle_vote(issue.id, &voter).is_err());
        assert_eq!(db.vote_flights.joined((voter.user_id, issue.id)), 0);
    }

    #[test]
    fn unique_constraint_backs_the_ledger() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let issue = report(&db, &owner, "Pothole", "Gasabo");
        db.toggle_vote(issue.id, &owner).unwrap();

        let err = db
            .with_conn_mut(|conn| {
                Ok(conn.execute(
                    "INSERT INTO votes (user_id, issue_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![owner.user_id.to_string(), issue.id, now_ts()],
                ))
            })
            .unwrap()
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn user_stats_come_from_the_ledger() {
        let db = TempDb::new();
        let ana = Identity::citizen(Uuid::new_v4(), "ana");
        let ben = Identity::citizen(Uuid::new_v4(), "ben");
        let mine = report(&db, &ana, "Pothole", "Gasabo");
        let theirs: Vec<_> = (0..12)
            .map(|n| report(&db, &ben, &format!("Streetlight {}", n), "Gasabo"))
            .collect();

        db.toggle_vote(mine.id, &ben).unwrap();
        for issue in &theirs {
            db.toggle_vote(issue.id, &ana).unwrap();
        }
        // Withdrawn votes do not count.
        db.toggle_vote(theirs[0].id, &ana).unwrap();

        let stats = db.user_stats(ana.user_id).unwrap();
        assert_eq!(stats.votes_given, 11);
        assert_eq!(stats.votes_received, 1);
        assert_eq!(stats.issues_submitted, 1);
        assert_eq!(stats.recent_activity.len(), 10);
        assert_eq!(stats.recent_activity[0].issue_id, theirs[11].id);
        assert_eq!(stats.recent_activity[0].kind, "vote");
        assert_eq!(stats.recent_activity[0].issue_title, "Streetlight 11");
    }

    #[test]
    fn deleting_issue_cascades_votes() {
        let db = TempDb::new();
        let owner = Identity::citizen(Uuid::new_v4(), "ana");
        let voter = Identity::citizen(Uuid::new_v4(), "ben");
        let issue = report(&db, &owner, "Pothole", "Gasabo");
        db.toggle_vote(issue.id, &voter).unwrap();

        db.delete_issue(issue.id).unwrap();
        assert!(!db.has_voted(issue.id, voter.user_id).unwrap());
    }
}
