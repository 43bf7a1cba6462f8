//! SQLite-backed Proposal Store.
//!
//! A single connection guarded by a mutex. Multi-row mutations run inside
//! one transaction; tallies are incremented in SQL (`col = col + ?`), never
//! read-modify-written in Rust.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::lock_utils::lock_or_recover;
use crate::model::{
    Dao, DaoId, DaoMember, ExecutionState, MemberId, NewDao, NewMember, NewProposal, NewVote,
    Proposal, ProposalId, ProposalQuery, ProposalStatus, QueuedExecution, Vote, VoteType,
};
use crate::store::{CloseDecision, ProposalStore, RecordedVote};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS daos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        governance_token TEXT,
        voting_period_days INTEGER NOT NULL,
        quorum_threshold INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dao_members (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dao_id INTEGER NOT NULL REFERENCES daos(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        address TEXT NOT NULL,
        role TEXT NOT NULL,
        voting_power INTEGER,
        proposals_created INTEGER NOT NULL DEFAULT 0,
        votes_participated INTEGER NOT NULL DEFAULT 0,
        last_activity INTEGER,
        joined_at INTEGER NOT NULL,
        UNIQUE(dao_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS proposals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dao_id INTEGER NOT NULL REFERENCES daos(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        proposer TEXT NOT NULL,
        category TEXT NOT NULL,
        status TEXT NOT NULL,
        requested_amount INTEGER,
        quorum INTEGER NOT NULL,
        threshold INTEGER NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER NOT NULL,
        votes_for INTEGER NOT NULL DEFAULT 0,
        votes_against INTEGER NOT NULL DEFAULT 0,
        votes_abstain INTEGER NOT NULL DEFAULT 0,
        total_votes INTEGER NOT NULL DEFAULT 0,
        discussion TEXT,
        attachments TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (end_time >= start_time),
        CHECK (votes_for + votes_against + votes_abstain = total_votes)
    );

    CREATE INDEX IF NOT EXISTS idx_proposals_dao ON proposals(dao_id, created_at DESC);

    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        proposal_id INTEGER NOT NULL REFERENCES proposals(id),
        member_id INTEGER NOT NULL REFERENCES dao_members(id),
        vote_type TEXT NOT NULL,
        voting_power INTEGER NOT NULL,
        reason TEXT,
        timestamp INTEGER NOT NULL,
        UNIQUE(proposal_id, member_id)
    );

    CREATE TABLE IF NOT EXISTS execution_queue (
        proposal_id INTEGER PRIMARY KEY REFERENCES proposals(id) ON DELETE CASCADE,
        queued_at INTEGER NOT NULL,
        execute_after INTEGER NOT NULL,
        state TEXT NOT NULL,
        executed_at INTEGER,
        failure_reason TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_execution_due ON execution_queue(state, execute_after);
";

const DAO_COLUMNS: &str =
    "id, name, governance_token, voting_period_days, quorum_threshold, created_at";

const MEMBER_COLUMNS: &str = "id, dao_id, user_id, address, role, voting_power, \
     proposals_created, votes_participated, last_activity, joined_at";

const PROPOSAL_COLUMNS: &str = "id, dao_id, title, description, proposer, category, status, \
     requested_amount, quorum, threshold, start_time, end_time, votes_for, votes_against, \
     votes_abstain, total_votes, discussion, attachments, created_at, updated_at";

const VOTE_COLUMNS: &str =
    "id, proposal_id, member_id, vote_type, voting_power, reason, timestamp";

const EXECUTION_COLUMNS: &str =
    "proposal_id, queued_at, execute_after, state, executed_at, failure_reason";

/// Proposal Store persisted in SQLite
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the governance database
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self::with_connection(conn)?;
        info!("Opened governance database: {:?}", db_path.as_ref());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock_or_recover(&self.conn, "governance database")
    }
}

fn millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
            conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms))
        })
    })
    .transpose()
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

fn dao_from_row(row: &Row<'_>) -> rusqlite::Result<Dao> {
    Ok(Dao {
        id: row.get(0)?,
        name: row.get(1)?,
        governance_token: row.get(2)?,
        voting_period_days: row.get(3)?,
        quorum_threshold: row.get(4)?,
        created_at: time_column(row, 5)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<DaoMember> {
    Ok(DaoMember {
        id: row.get(0)?,
        dao_id: row.get(1)?,
        user_id: row.get(2)?,
        address: row.get(3)?,
        role: parsed_column(row, 4)?,
        voting_power: row.get(5)?,
        proposals_created: row.get(6)?,
        votes_participated: row.get(7)?,
        last_activity: optional_time_column(row, 8)?,
        joined_at: time_column(row, 9)?,
    })
}

fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    let attachments_json: String = row.get(17)?;
    let attachments: Vec<String> = serde_json::from_str(&attachments_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(17, Type::Text, Box::new(e)))?;

    Ok(Proposal {
        id: row.get(0)?,
        dao_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        proposer: row.get(4)?,
        category: row.get(5)?,
        status: parsed_column(row, 6)?,
        requested_amount: row.get(7)?,
        quorum: row.get(8)?,
        threshold: row.get(9)?,
        start_time: time_column(row, 10)?,
        end_time: time_column(row, 11)?,
        votes_for: row.get(12)?,
        votes_against: row.get(13)?,
        votes_abstain: row.get(14)?,
        total_votes: row.get(15)?,
        discussion: row.get(16)?,
        attachments,
        created_at: time_column(row, 18)?,
        updated_at: time_column(row, 19)?,
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: row.get(0)?,
        proposal_id: row.get(1)?,
        member_id: row.get(2)?,
        vote_type: parsed_column(row, 3)?,
        voting_power: row.get(4)?,
        reason: row.get(5)?,
        timestamp: time_column(row, 6)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<QueuedExecution> {
    Ok(QueuedExecution {
        proposal_id: row.get(0)?,
        queued_at: time_column(row, 1)?,
        execute_after: time_column(row, 2)?,
        state: parsed_column(row, 3)?,
        executed_at: optional_time_column(row, 4)?,
        failure_reason: row.get(5)?,
    })
}

fn select_proposal(conn: &Connection, proposal_id: ProposalId) -> rusqlite::Result<Option<Proposal>> {
    conn.query_row(
        &format!("SELECT {} FROM proposals WHERE id = ?1", PROPOSAL_COLUMNS),
        params![proposal_id],
        proposal_from_row,
    )
    .optional()
}

fn select_member(conn: &Connection, member_id: MemberId) -> rusqlite::Result<Option<DaoMember>> {
    conn.query_row(
        &format!("SELECT {} FROM dao_members WHERE id = ?1", MEMBER_COLUMNS),
        params![member_id],
        member_from_row,
    )
    .optional()
}

fn select_execution(
    conn: &Connection,
    proposal_id: ProposalId,
) -> rusqlite::Result<Option<QueuedExecution>> {
    conn.query_row(
        &format!("SELECT {} FROM execution_queue WHERE proposal_id = ?1", EXECUTION_COLUMNS),
        params![proposal_id],
        execution_from_row,
    )
    .optional()
}

fn tally_column(vote_type: VoteType) -> &'static str {
    match vote_type {
        VoteType::For => "votes_for",
        VoteType::Against => "votes_against",
        VoteType::Abstain => "votes_abstain",
    }
}

impl ProposalStore for SqliteStore {
    fn create_dao(&self, dao: &NewDao, now: DateTime<Utc>) -> Result<Dao, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO daos (name, governance_token, voting_period_days, quorum_threshold, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dao.name,
                dao.governance_token,
                dao.voting_period_days,
                dao.quorum_threshold,
                millis(now)
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Inserted DAO {} ({})", id, dao.name);

        conn.query_row(
            &format!("SELECT {} FROM daos WHERE id = ?1", DAO_COLUMNS),
            params![id],
            dao_from_row,
        )
        .map_err(StoreError::from)
    }

    fn get_dao(&self, dao_id: DaoId) -> Result<Option<Dao>, StoreError> {
        let conn = self.conn();
        let dao = conn
            .query_row(
                &format!("SELECT {} FROM daos WHERE id = ?1", DAO_COLUMNS),
                params![dao_id],
                dao_from_row,
            )
            .optional()?;
        Ok(dao)
    }

    fn add_member(&self, member: &NewMember, now: DateTime<Utc>) -> Result<DaoMember, StoreError> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO dao_members (dao_id, user_id, address, role, voting_power, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                member.dao_id,
                member.user_id,
                member.address,
                member.role.as_str(),
                member.voting_power,
                millis(now)
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Duplicate("membership")),
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        select_member(&conn, id)?
            .ok_or_else(|| StoreError::Corrupt(format!("member {} vanished after insert", id)))
    }

    fn find_member(&self, dao_id: DaoId, user_id: &str) -> Result<Option<DaoMember>, StoreError> {
        let conn = self.conn();
        let member = conn
            .query_row(
                &format!(
                    "SELECT {} FROM dao_members WHERE dao_id = ?1 AND user_id = ?2",
                    MEMBER_COLUMNS
                ),
                params![dao_id, user_id],
                member_from_row,
            )
            .optional()?;
        Ok(member)
    }

    fn create_proposal(
        &self,
        proposal: &NewProposal,
        proposer: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Proposal, StoreError> {
        let attachments = serde_json::to_string(&proposal.attachments)
            .map_err(|e| StoreError::Corrupt(format!("attachments not serializable: {}", e)))?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO proposals (dao_id, title, description, proposer, category, status,
                requested_amount, quorum, threshold, start_time, end_time, discussion,
                attachments, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                proposal.dao_id,
                proposal.title,
                proposal.description,
                proposal.proposer,
                proposal.category,
                proposal.status.as_str(),
                proposal.requested_amount,
                proposal.quorum,
                proposal.threshold,
                millis(proposal.start_time),
                millis(proposal.end_time),
                proposal.discussion,
                attachments,
                millis(now),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE dao_members
             SET proposals_created = proposals_created + 1, last_activity = ?1
             WHERE id = ?2",
            params![millis(now), proposer],
        )?;

        let created = select_proposal(&tx, id)?
            .ok_or_else(|| StoreError::Corrupt(format!("proposal {} vanished after insert", id)))?;
        tx.commit()?;

        Ok(created)
    }

    fn get_proposal(&self, proposal_id: ProposalId) -> Result<Option<Proposal>, StoreError> {
        let conn = self.conn();
        Ok(select_proposal(&conn, proposal_id)?)
    }

    fn list_proposals(&self, query: &ProposalQuery) -> Result<Vec<Proposal>, StoreError> {
        let mut sql = format!("SELECT {} FROM proposals WHERE dao_id = ?1", PROPOSAL_COLUMNS);
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(query.dao_id)];

        if let Some(status) = query.status {
            values.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(category) = &query.category {
            values.push(Box::new(category.to_ascii_uppercase()));
            sql.push_str(&format!(" AND category = ?{}", values.len()));
        }

        values.push(Box::new(query.limit));
        let limit_idx = values.len();
        values.push(Box::new(query.offset));
        let offset_idx = values.len();
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            limit_idx, offset_idx
        ));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let proposals = stmt
            .query_map(params_from_iter(values.iter()), proposal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(proposals)
    }

    fn transition_status(
        &self,
        proposal_id: ProposalId,
        from: &[ProposalStatus],
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>, StoreError> {
        let conn = self.conn();
        let current = match select_proposal(&conn, proposal_id)? {
            Some(proposal) => proposal,
            None => return Ok(None),
        };
        if !from.contains(&current.status) {
            return Ok(None);
        }

        // Guarded on the observed status so a concurrent transition wins cleanly
        let updated = conn.execute(
            "UPDATE proposals SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), millis(now), proposal_id, current.status.as_str()],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        debug!("Proposal {} {} -> {}", proposal_id, current.status, to);
        Ok(select_proposal(&conn, proposal_id)?)
    }

    fn delete_proposal(&self, proposal_id: ProposalId) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current = match select_proposal(&tx, proposal_id)? {
            Some(proposal) => proposal,
            None => return Ok(false),
        };
        let votes: u64 = tx.query_row(
            "SELECT COUNT(*) FROM votes WHERE proposal_id = ?1",
            params![proposal_id],
            |row| row.get(0),
        )?;
        if current.status == ProposalStatus::Executed || votes > 0 {
            return Err(StoreError::Stale("proposal"));
        }

        let deleted = tx.execute("DELETE FROM proposals WHERE id = ?1", params![proposal_id])?;
        tx.commit()?;

        Ok(deleted > 0)
    }

    fn count_votes(&self, proposal_id: ProposalId) -> Result<u64, StoreError> {
        let conn = self.conn();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM votes WHERE proposal_id = ?1",
            params![proposal_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn find_vote(
        &self,
        proposal_id: ProposalId,
        member_id: MemberId,
    ) -> Result<Option<Vote>, StoreError> {
        let conn = self.conn();
        let vote = conn
            .query_row(
                &format!(
                    "SELECT {} FROM votes WHERE proposal_id = ?1 AND member_id = ?2",
                    VOTE_COLUMNS
                ),
                params![proposal_id, member_id],
                vote_from_row,
            )
            .optional()?;
        Ok(vote)
    }

    fn list_votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM votes WHERE proposal_id = ?1 ORDER BY timestamp ASC, id ASC",
            VOTE_COLUMNS
        ))?;
        let votes = stmt
            .query_map(params![proposal_id], vote_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(votes)
    }

    fn record_vote(
        &self,
        vote: &NewVote,
        decide: CloseDecision<'_>,
    ) -> Result<RecordedVote, StoreError> {
        let at = millis(vote.timestamp);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO votes (proposal_id, member_id, vote_type, voting_power, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                vote.proposal_id,
                vote.member_id,
                vote.vote_type.as_str(),
                vote.voting_power,
                vote.reason,
                at
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Duplicate("vote")),
            Err(e) => return Err(e.into()),
        }
        let vote_id = tx.last_insert_rowid();

        let column = tally_column(vote.vote_type);
        let incremented = tx.execute(
            &format!(
                "UPDATE proposals
                 SET {col} = {col} + ?1, total_votes = total_votes + ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'ACTIVE' AND start_time <= ?2 AND end_time >= ?2",
                col = column
            ),
            params![vote.voting_power, at, vote.proposal_id],
        )?;
        if incremented == 0 {
            return Err(StoreError::Stale("proposal"));
        }

        let mut proposal = select_proposal(&tx, vote.proposal_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("proposal {} vanished", vote.proposal_id)))?;

        let closed_as = decide(&proposal);
        if let Some(status) = closed_as {
            tx.execute(
                "UPDATE proposals SET status = ?1, end_time = ?2, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), at, vote.proposal_id],
            )?;
            proposal.status = status;
            proposal.end_time = vote.timestamp;
            proposal.updated_at = vote.timestamp;
        }

        tx.execute(
            "UPDATE dao_members
             SET votes_participated = votes_participated + 1, last_activity = ?1
             WHERE id = ?2",
            params![at, vote.member_id],
        )?;

        tx.commit()?;

        Ok(RecordedVote {
            vote: Vote {
                id: vote_id,
                proposal_id: vote.proposal_id,
                member_id: vote.member_id,
                vote_type: vote.vote_type,
                voting_power: vote.voting_power,
                reason: vote.reason.clone(),
                timestamp: vote.timestamp,
            },
            proposal,
            closed_as,
        })
    }

    fn enqueue_execution(
        &self,
        proposal_id: ProposalId,
        queued_at: DateTime<Utc>,
        execute_after: DateTime<Utc>,
    ) -> Result<(QueuedExecution, bool), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO execution_queue (proposal_id, queued_at, execute_after, state)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                proposal_id,
                millis(queued_at),
                millis(execute_after),
                ExecutionState::Queued.as_str()
            ],
        )?;

        // A failed or aborted slot is re-armed with a fresh timelock
        let rearmed = if inserted == 0 {
            tx.execute(
                "UPDATE execution_queue
                 SET queued_at = ?1, execute_after = ?2, state = ?3,
                     executed_at = NULL, failure_reason = NULL
                 WHERE proposal_id = ?4 AND state IN (?5, ?6)",
                params![
                    millis(queued_at),
                    millis(execute_after),
                    ExecutionState::Queued.as_str(),
                    proposal_id,
                    ExecutionState::Failed.as_str(),
                    ExecutionState::Cancelled.as_str()
                ],
            )?
        } else {
            0
        };

        let entry = select_execution(&tx, proposal_id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("execution slot for proposal {} missing", proposal_id))
        })?;
        tx.commit()?;
        Ok((entry, inserted > 0 || rearmed > 0))
    }

    fn get_execution(
        &self,
        proposal_id: ProposalId,
    ) -> Result<Option<QueuedExecution>, StoreError> {
        let conn = self.conn();
        Ok(select_execution(&conn, proposal_id)?)
    }

    fn due_executions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedExecution>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM execution_queue
             WHERE state = ?1 AND execute_after <= ?2
             ORDER BY execute_after ASC",
            EXECUTION_COLUMNS
        ))?;
        let due = stmt
            .query_map(
                params![ExecutionState::Queued.as_str(), millis(now)],
                execution_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(due)
    }

    fn complete_execution(
        &self,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let at = millis(now);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let slot = tx.execute(
            "UPDATE execution_queue SET state = ?1, executed_at = ?2
             WHERE proposal_id = ?3 AND state = ?4 AND execute_after <= ?2",
            params![
                ExecutionState::Executed.as_str(),
                at,
                proposal_id,
                ExecutionState::Queued.as_str()
            ],
        )?;
        if slot == 0 {
            return Ok(false);
        }

        let executed = tx.execute(
            "UPDATE proposals SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                ProposalStatus::Executed.as_str(),
                at,
                proposal_id,
                ProposalStatus::Passed.as_str()
            ],
        )?;
        if executed == 0 {
            // Dropping the transaction rolls the slot update back
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    fn fail_execution(
        &self,
        proposal_id: ProposalId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE execution_queue SET state = ?1, executed_at = ?2, failure_reason = ?3
             WHERE proposal_id = ?4 AND state = ?5",
            params![
                ExecutionState::Failed.as_str(),
                millis(now),
                reason,
                proposal_id,
                ExecutionState::Queued.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    fn cancel_execution(&self, proposal_id: ProposalId) -> Result<bool, StoreError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE execution_queue SET state = ?1 WHERE proposal_id = ?2 AND state = ?3",
            params![
                ExecutionState::Cancelled.as_str(),
                proposal_id,
                ExecutionState::Queued.as_str()
            ],
        )?;
        Ok(updated > 0)
    }
}
