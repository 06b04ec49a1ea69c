//! Candidate persistence backends.
//!
//! Both backends share one commit discipline: optimistic versioning on the
//! candidate row, the invariant layer re-run inside the atomic commit
//! section, and the audit append in the same unit as the row write. The
//! memory backend is the default and backs the test suite; the Postgres
//! backend mirrors the invariant layer as constraints and triggers so no
//! write path can route around it.

use crate::error::LifecycleError;
use crate::invariants;
use crate::trail::{TransitionRecord, TransitionTrail};
use crate::types::{Candidate, CandidateStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

/// Candidate persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Keep candidate rows and the transition trail in process memory only.
    Memory,
    /// Persist in PostgreSQL with the invariant layer installed as
    /// constraints and triggers.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// A candidate row together with its store-managed version fingerprint.
///
/// The version is read with the row and must be handed back unchanged to
/// [`CandidateStore::commit_update`]; a mismatch at commit means another
/// writer got there first.
#[derive(Debug, Clone)]
pub struct StoredCandidate {
    pub candidate: Candidate,
    pub version: u64,
}

/// Storage seam for candidate rows and their transition trail.
///
/// `commit_update` is the single write path for existing rows and is atomic:
/// version check, invariant re-validation, audit append and row swap either
/// all happen or none do.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<StoredCandidate>, LifecycleError>;

    /// Seam for the (out-of-scope) ingestion pipeline and for tests.
    async fn insert(&self, candidate: Candidate) -> Result<StoredCandidate, LifecycleError>;

    /// Atomically commit an updated row plus, for status changes, its audit
    /// record. Fails with [`LifecycleError::ConcurrentModification`] when the
    /// row moved past `expected_version`, and with
    /// [`LifecycleError::ConstraintViolation`] when the commit-time invariant
    /// layer rejects the write.
    async fn commit_update(
        &self,
        expected_version: u64,
        updated: Candidate,
        audit: Option<TransitionRecord>,
    ) -> Result<StoredCandidate, LifecycleError>;

    /// Transition history for one candidate, newest first.
    async fn history(
        &self,
        candidate_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransitionRecord>, LifecycleError>;

    /// Tenant-scoped trail, newest first, for compliance export.
    async fn tenant_history(
        &self,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransitionRecord>, LifecycleError>;

    /// Has this candidate ever transitioned into `status`?
    async fn has_reached(
        &self,
        candidate_id: Uuid,
        status: CandidateStatus,
    ) -> Result<bool, LifecycleError>;
}

/// Build a store from configuration.
pub async fn bootstrap(config: StoreConfig) -> Result<Arc<dyn CandidateStore>, LifecycleError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryCandidateStore::new())),
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresCandidateStore::connect(&database_url, max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres { .. } => Err(LifecycleError::Storage(
            "postgres backend requires the 'postgres' feature".to_string(),
        )),
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<Uuid, StoredCandidate>,
    trail: TransitionTrail,
}

/// In-process store. One mutex section per commit gives the "repeatable read
/// or stronger" isolation the unit of work requires.
#[derive(Debug, Default)]
pub struct MemoryCandidateStore {
    state: Mutex<MemoryState>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LifecycleError> {
        self.state
            .lock()
            .map_err(|_| LifecycleError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn load(&self, id: Uuid) -> Result<Option<StoredCandidate>, LifecycleError> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    async fn insert(&self, candidate: Candidate) -> Result<StoredCandidate, LifecycleError> {
        let mut state = self.lock()?;
        if state.rows.contains_key(&candidate.id) {
            return Err(LifecycleError::Storage(format!(
                "candidate {} already exists",
                candidate.id
            )));
        }
        let stored = StoredCandidate {
            candidate,
            version: 1,
        };
        state.rows.insert(stored.candidate.id, stored.clone());
        Ok(stored)
    }

    async fn commit_update(
        &self,
        expected_version: u64,
        updated: Candidate,
        audit: Option<TransitionRecord>,
    ) -> Result<StoredCandidate, LifecycleError> {
        let mut state = self.lock()?;

        let current = state
            .rows
            .get(&updated.id)
            .cloned()
            .ok_or(LifecycleError::NotFound(updated.id))?;

        if current.version != expected_version {
            warn!(
                candidate_id = %updated.id,
                expected_version,
                actual_version = current.version,
                "optimistic version check failed"
            );
            return Err(LifecycleError::ConcurrentModification(updated.id));
        }

        // Commit-time re-validation, independent of whoever built `updated`.
        let reached_joined = state.trail.has_reached(updated.id, CandidateStatus::Joined);
        invariants::verify_commit(&current.candidate, &updated, audit.as_ref(), reached_joined)?;

        if let Some(record) = audit {
            state.trail.append(record);
        }
        let stored = StoredCandidate {
            candidate: updated,
            version: expected_version + 1,
        };
        state.rows.insert(stored.candidate.id, stored.clone());
        Ok(stored)
    }

    async fn history(
        &self,
        candidate_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransitionRecord>, LifecycleError> {
        Ok(self.lock()?.trail.history(candidate_id, limit))
    }

    async fn tenant_history(
        &self,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransitionRecord>, LifecycleError> {
        Ok(self.lock()?.trail.tenant_history(tenant_id, limit))
    }

    async fn has_reached(
        &self,
        candidate_id: Uuid,
        status: CandidateStatus,
    ) -> Result<bool, LifecycleError> {
        Ok(self.lock()?.trail.has_reached(candidate_id, status))
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresCandidateStore;

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::types::ActorKind;
    use sqlx::postgres::{PgPoolOptions, PgRow};
    use sqlx::{PgPool, Row};

    /// PostgreSQL-backed store.
    ///
    /// Writes run in one transaction: optimistic `UPDATE ... WHERE version`
    /// plus the audit insert, with the invariant triggers re-validating
    /// server-side at commit. Reads run outside any lock.
    #[derive(Debug, Clone)]
    pub struct PostgresCandidateStore {
        pool: PgPool,
    }

    impl PostgresCandidateStore {
        pub async fn connect(
            database_url: &str,
            max_connections: u32,
        ) -> Result<Self, LifecycleError> {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect(database_url)
                .await
                .map_err(|e| LifecycleError::Storage(format!("postgres connect failed: {e}")))?;
            Ok(Self { pool })
        }

        /// Create tables, indexes and the database-side invariant layer.
        pub async fn ensure_schema(&self) -> Result<(), LifecycleError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS candidates (
                    id UUID PRIMARY KEY,
                    tenant_id UUID NOT NULL,
                    name TEXT NOT NULL,
                    email TEXT NULL,
                    phone TEXT NULL,
                    skills JSONB NULL,
                    experience JSONB NULL,
                    ctc_current_minor BIGINT NULL,
                    ctc_expected_minor BIGINT NULL,
                    status TEXT NOT NULL,
                    blacklisted BOOLEAN NOT NULL DEFAULT FALSE,
                    version BIGINT NOT NULL DEFAULT 1,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres schema create failed: {e}")))?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS candidate_transitions (
                    id UUID PRIMARY KEY,
                    candidate_id UUID NOT NULL REFERENCES candidates(id),
                    old_status TEXT NOT NULL,
                    new_status TEXT NOT NULL,
                    actor_id UUID NULL,
                    actor_kind TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    terminal BOOLEAN NOT NULL DEFAULT FALSE,
                    tenant_id UUID NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres schema create failed: {e}")))?;

            for index in [
                "CREATE INDEX IF NOT EXISTS idx_candidate_transitions_candidate_id \
                 ON candidate_transitions (candidate_id)",
                "CREATE INDEX IF NOT EXISTS idx_candidate_transitions_tenant_id \
                 ON candidate_transitions (tenant_id)",
                "CREATE INDEX IF NOT EXISTS idx_candidate_transitions_created_at \
                 ON candidate_transitions (created_at)",
            ] {
                sqlx::query(index)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        LifecycleError::Storage(format!("postgres index create failed: {e}"))
                    })?;
            }

            for statement in invariants::POSTGRES_INVARIANT_DDL {
                sqlx::query(statement).execute(&self.pool).await.map_err(|e| {
                    LifecycleError::Storage(format!("postgres invariant install failed: {e}"))
                })?;
            }

            Ok(())
        }
    }

    #[async_trait]
    impl CandidateStore for PostgresCandidateStore {
        async fn load(&self, id: Uuid) -> Result<Option<StoredCandidate>, LifecycleError> {
            let row = sqlx::query(
                r#"
                SELECT id, tenant_id, name, email, phone, skills, experience,
                       ctc_current_minor, ctc_expected_minor, status, blacklisted,
                       version, created_at, updated_at
                FROM candidates
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres load failed: {e}")))?;

            row.map(|row| decode_candidate(&row)).transpose()
        }

        async fn insert(&self, candidate: Candidate) -> Result<StoredCandidate, LifecycleError> {
            sqlx::query(
                r#"
                INSERT INTO candidates (
                    id, tenant_id, name, email, phone, skills, experience,
                    ctc_current_minor, ctc_expected_minor, status, blacklisted,
                    version, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1, $12, $13)
                "#,
            )
            .bind(candidate.id)
            .bind(candidate.tenant_id)
            .bind(&candidate.name)
            .bind(&candidate.email)
            .bind(&candidate.phone)
            .bind(&candidate.skills)
            .bind(&candidate.experience)
            .bind(minor_to_db(candidate.ctc_current_minor)?)
            .bind(minor_to_db(candidate.ctc_expected_minor)?)
            .bind(candidate.status.as_str())
            .bind(candidate.blacklisted)
            .bind(candidate.created_at)
            .bind(candidate.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres insert failed: {e}")))?;

            Ok(StoredCandidate {
                candidate,
                version: 1,
            })
        }

        async fn commit_update(
            &self,
            expected_version: u64,
            updated: Candidate,
            audit: Option<TransitionRecord>,
        ) -> Result<StoredCandidate, LifecycleError> {
            let expected: i64 = expected_version.try_into().map_err(|_| {
                LifecycleError::Storage("version exceeds postgres BIGINT range".to_string())
            })?;

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LifecycleError::Storage(format!("postgres begin failed: {e}")))?;

            let result = sqlx::query(
                r#"
                UPDATE candidates
                SET name = $1, email = $2, phone = $3, skills = $4, experience = $5,
                    ctc_current_minor = $6, ctc_expected_minor = $7, status = $8,
                    blacklisted = $9, version = version + 1, updated_at = NOW()
                WHERE id = $10 AND version = $11
                "#,
            )
            .bind(&updated.name)
            .bind(&updated.email)
            .bind(&updated.phone)
            .bind(&updated.skills)
            .bind(&updated.experience)
            .bind(minor_to_db(updated.ctc_current_minor)?)
            .bind(minor_to_db(updated.ctc_expected_minor)?)
            .bind(updated.status.as_str())
            .bind(updated.blacklisted)
            .bind(updated.id)
            .bind(expected)
            .execute(&mut *tx)
            .await
            .map_err(map_commit_error)?;

            if result.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM candidates WHERE id = $1")
                    .bind(updated.id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        LifecycleError::Storage(format!("postgres existence check failed: {e}"))
                    })?
                    .is_some();
                return if exists {
                    warn!(candidate_id = %updated.id, "optimistic version check failed");
                    Err(LifecycleError::ConcurrentModification(updated.id))
                } else {
                    Err(LifecycleError::NotFound(updated.id))
                };
            }

            if let Some(record) = &audit {
                // created_at takes the DB default so the deferred audit
                // trigger can scope its check to this transaction.
                sqlx::query(
                    r#"
                    INSERT INTO candidate_transitions (
                        id, candidate_id, old_status, new_status, actor_id,
                        actor_kind, reason, terminal, tenant_id
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(record.id)
                .bind(record.candidate_id)
                .bind(record.old_status.as_str())
                .bind(record.new_status.as_str())
                .bind(record.actor_id)
                .bind(record.actor_kind.as_str())
                .bind(&record.reason)
                .bind(record.terminal)
                .bind(record.tenant_id)
                .execute(&mut *tx)
                .await
                .map_err(map_commit_error)?;
            }

            tx.commit().await.map_err(map_commit_error)?;

            Ok(StoredCandidate {
                candidate: updated,
                version: expected_version + 1,
            })
        }

        async fn history(
            &self,
            candidate_id: Uuid,
            limit: usize,
        ) -> Result<Vec<TransitionRecord>, LifecycleError> {
            let rows = sqlx::query(
                r#"
                SELECT id, candidate_id, old_status, new_status, actor_id,
                       actor_kind, reason, terminal, tenant_id, created_at
                FROM candidate_transitions
                WHERE candidate_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(candidate_id)
            .bind(limit_to_db(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres history failed: {e}")))?;

            rows.iter().map(decode_record).collect()
        }

        async fn tenant_history(
            &self,
            tenant_id: Uuid,
            limit: usize,
        ) -> Result<Vec<TransitionRecord>, LifecycleError> {
            let rows = sqlx::query(
                r#"
                SELECT id, candidate_id, old_status, new_status, actor_id,
                       actor_kind, reason, terminal, tenant_id, created_at
                FROM candidate_transitions
                WHERE tenant_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(tenant_id)
            .bind(limit_to_db(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres history failed: {e}")))?;

            rows.iter().map(decode_record).collect()
        }

        async fn has_reached(
            &self,
            candidate_id: Uuid,
            status: CandidateStatus,
        ) -> Result<bool, LifecycleError> {
            let row = sqlx::query(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM candidate_transitions
                    WHERE candidate_id = $1 AND new_status = $2
                ) AS reached
                "#,
            )
            .bind(candidate_id)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LifecycleError::Storage(format!("postgres query failed: {e}")))?;

            row.try_get("reached")
                .map_err(|e| LifecycleError::Storage(format!("postgres decode failed: {e}")))
        }
    }

    fn decode_candidate(row: &PgRow) -> Result<StoredCandidate, LifecycleError> {
        let status: String = get(row, "status")?;
        let version: i64 = get(row, "version")?;
        let ctc_current: Option<i64> = get(row, "ctc_current_minor")?;
        let ctc_expected: Option<i64> = get(row, "ctc_expected_minor")?;

        Ok(StoredCandidate {
            candidate: Candidate {
                id: get(row, "id")?,
                tenant_id: get(row, "tenant_id")?,
                name: get(row, "name")?,
                email: get(row, "email")?,
                phone: get(row, "phone")?,
                skills: get(row, "skills")?,
                experience: get(row, "experience")?,
                ctc_current_minor: minor_from_db(ctc_current)?,
                ctc_expected_minor: minor_from_db(ctc_expected)?,
                status: CandidateStatus::parse(&status)?,
                blacklisted: get(row, "blacklisted")?,
                created_at: get(row, "created_at")?,
                updated_at: get(row, "updated_at")?,
            },
            version: version.try_into().map_err(|_| {
                LifecycleError::Storage("negative version in storage".to_string())
            })?,
        })
    }

    fn decode_record(row: &PgRow) -> Result<TransitionRecord, LifecycleError> {
        let old_status: String = get(row, "old_status")?;
        let new_status: String = get(row, "new_status")?;
        let actor_kind: String = get(row, "actor_kind")?;

        Ok(TransitionRecord {
            id: get(row, "id")?,
            candidate_id: get(row, "candidate_id")?,
            old_status: CandidateStatus::parse(&old_status)?,
            new_status: CandidateStatus::parse(&new_status)?,
            actor_id: get(row, "actor_id")?,
            actor_kind: parse_actor_kind(&actor_kind)?,
            reason: get(row, "reason")?,
            terminal: get(row, "terminal")?,
            tenant_id: get(row, "tenant_id")?,
            created_at: get(row, "created_at")?,
        })
    }

    fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, LifecycleError>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get(column)
            .map_err(|e| LifecycleError::Storage(format!("postgres decode {column} failed: {e}")))
    }

    fn parse_actor_kind(value: &str) -> Result<ActorKind, LifecycleError> {
        match value {
            "USER" => Ok(ActorKind::User),
            "SYSTEM" => Ok(ActorKind::System),
            other => Err(LifecycleError::Storage(format!(
                "unknown actor kind '{other}' in postgres"
            ))),
        }
    }

    fn minor_to_db(minor: Option<u64>) -> Result<Option<i64>, LifecycleError> {
        minor
            .map(|value| {
                value.try_into().map_err(|_| {
                    LifecycleError::Storage("amount exceeds postgres BIGINT range".to_string())
                })
            })
            .transpose()
    }

    fn minor_from_db(minor: Option<i64>) -> Result<Option<u64>, LifecycleError> {
        minor
            .map(|value| {
                value.try_into().map_err(|_| {
                    LifecycleError::Storage("negative amount in storage".to_string())
                })
            })
            .transpose()
    }

    fn limit_to_db(limit: usize) -> i64 {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }

    fn map_commit_error(e: sqlx::Error) -> LifecycleError {
        if let sqlx::Error::Database(db) = &e {
            // 23514 = check_violation; raised by the CHECK constraint and by
            // every invariant trigger.
            if db.code().as_deref() == Some("23514") {
                return LifecycleError::ConstraintViolation(db.message().to_string());
            }
        }
        LifecycleError::Storage(format!("postgres commit failed: {e}"))
    }
}
