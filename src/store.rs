// =============================================================================
// Store — durable event log over SQLite
// =============================================================================
//
// Single-writer store backing the whole system: decisions, positions, account
// snapshots, status events, operator inputs, and settings. Paper and live
// modes use distinct database files so the two histories never mix.
//
// Every mutation runs in a transaction; on error the transaction rolls back
// and a typed `StoreError` surfaces. Schema creation is idempotent and
// missing columns are added in place so older databases keep their data.
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::ExecutionStatus;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted LLM decision with its execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: i64,
    pub timestamp: String,
    pub coin: String,
    pub signal: String,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub confidence: f64,
    pub profit_target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub invalidation_condition: Option<String>,
    pub justification: String,
    pub raw_response: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub execution_status: String,
    pub execution_error: Option<String>,
    pub execution_timestamp: Option<String>,
}

/// Fields for a new decision row. The store assigns the id and timestamp.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub coin: String,
    pub signal: String,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub confidence: f64,
    pub profit_target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub invalidation_condition: Option<String>,
    pub justification: String,
    pub raw_response: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// A position entry/exit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: i64,
    pub position_id: String,
    pub coin: String,
    pub side: String,
    pub entry_time: String,
    pub entry_price: f64,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub decision_id: Option<i64>,
    pub exit_time: Option<String>,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub status: String,
}

/// Trimmed position view attached to joined decision reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedPosition {
    pub position_id: String,
    pub side: String,
    pub entry_time: String,
    pub entry_price: f64,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub exit_time: Option<String>,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub status: String,
}

/// A decision left-joined with the position it produced or referred to.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionWithOutcome {
    #[serde(flatten)]
    pub decision: DecisionRecord,
    pub position: Option<LinkedPosition>,
}

/// A point-in-time account summary, appended once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshotRecord {
    pub id: i64,
    pub timestamp: String,
    pub balance_usd: f64,
    pub equity_usd: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub sharpe_ratio: Option<f64>,
    pub num_positions: i64,
}

/// One line on the operator timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: i64,
    pub timestamp: String,
    pub status: String,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Operator guidance or query. At most one row is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorInputRecord {
    pub id: i64,
    pub timestamp: String,
    pub message: String,
    pub message_type: String,
    pub image_path: Option<String>,
    pub is_active: bool,
}

/// Aggregate view for the database status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub path: String,
    pub size_bytes: u64,
    pub decisions: i64,
    pub positions: i64,
    pub open_positions: i64,
    pub account_snapshots: i64,
    pub status_events: i64,
    pub operator_inputs: i64,
    pub latest_decision_at: Option<String>,
    pub latest_snapshot_at: Option<String>,
}

/// Tables the debug endpoint may dump. Anything else is refused.
const DEBUG_TABLES: &[&str] = &[
    "decisions",
    "positions",
    "account_state",
    "bot_status",
    "user_inputs",
    "bot_settings",
];

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema current.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.clone()),
        };
        store.init_schema()?;

        info!(path = %path.display(), "store opened");
        Ok(Arc::new(store))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Arc<Self>, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(Arc::new(store))
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                coin TEXT NOT NULL,
                signal TEXT NOT NULL,
                quantity_usd REAL NOT NULL,
                leverage REAL NOT NULL,
                confidence REAL NOT NULL,
                profit_target REAL,
                stop_loss REAL,
                invalidation_condition TEXT,
                justification TEXT NOT NULL,
                raw_response TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                balance_usd REAL NOT NULL,
                equity_usd REAL NOT NULL,
                unrealized_pnl REAL DEFAULT 0,
                realized_pnl REAL DEFAULT 0,
                total_pnl REAL DEFAULT 0,
                sharpe_ratio REAL,
                num_positions INTEGER DEFAULT 0,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id TEXT UNIQUE NOT NULL,
                coin TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity_usd REAL NOT NULL,
                leverage REAL NOT NULL,
                exit_time TEXT,
                exit_price REAL,
                realized_pnl REAL,
                status TEXT DEFAULT 'open',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS bot_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                error TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS user_inputs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                message TEXT NOT NULL,
                is_active INTEGER DEFAULT 1,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS bot_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        // Additive migrations for databases created before these columns
        // existed. ALTER TABLE ADD COLUMN never touches existing rows.
        Self::add_column_if_missing(&tx, "positions", "decision_id", "INTEGER")?;
        Self::add_column_if_missing(&tx, "decisions", "system_prompt", "TEXT")?;
        Self::add_column_if_missing(&tx, "decisions", "user_prompt", "TEXT")?;
        Self::add_column_if_missing(
            &tx,
            "decisions",
            "execution_status",
            "TEXT DEFAULT 'pending'",
        )?;
        Self::add_column_if_missing(&tx, "decisions", "execution_error", "TEXT")?;
        Self::add_column_if_missing(&tx, "decisions", "execution_timestamp", "TEXT")?;
        Self::add_column_if_missing(
            &tx,
            "user_inputs",
            "message_type",
            "TEXT DEFAULT 'cycle'",
        )?;
        Self::add_column_if_missing(&tx, "user_inputs", "image_path", "TEXT")?;

        tx.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_decisions_timestamp
                 ON decisions(timestamp DESC);
             CREATE INDEX IF NOT EXISTS idx_account_timestamp
                 ON account_state(timestamp DESC);
             CREATE INDEX IF NOT EXISTS idx_positions_status
                 ON positions(status);",
        )?;

        // Seed default settings once; existing values win.
        tx.execute_batch(
            "INSERT OR IGNORE INTO bot_settings (key, value) VALUES
                ('prompt_preset', 'aggressive_small_account'),
                ('min_margin_usd', '1.0'),
                ('min_balance_threshold', '1.0'),
                ('max_margin_usd', '1000.0'),
                ('execution_interval_seconds', '600'),
                ('max_open_positions', '3');",
        )?;

        tx.commit()?;
        Ok(())
    }

    fn add_column_if_missing(
        tx: &rusqlite::Transaction<'_>,
        table: &str,
        column: &str,
        decl: &str,
    ) -> Result<(), StoreError> {
        let mut stmt = tx.prepare(&format!("PRAGMA table_info({table})"))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing.iter().any(|c| c == column) {
            tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
            debug!(table, column, "schema migration: column added");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    /// Insert a decision with status `pending` and return its monotonic id.
    pub fn append_decision(&self, decision: &NewDecision) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO decisions (
                timestamp, coin, signal, quantity_usd, leverage, confidence,
                profit_target, stop_loss, invalidation_condition, justification,
                raw_response, system_prompt, user_prompt, execution_status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                Utc::now().to_rfc3339(),
                decision.coin,
                decision.signal,
                decision.quantity_usd,
                decision.leverage,
                decision.confidence,
                decision.profit_target,
                decision.stop_loss,
                decision.invalidation_condition,
                decision.justification,
                decision.raw_response,
                decision.system_prompt,
                decision.user_prompt,
                ExecutionStatus::Pending.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Record the execution outcome of a decision. A decision transitions out
    /// of `pending` exactly once; repeating the same final status is a no-op,
    /// any other second transition is an error.
    pub fn set_decision_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT execution_status FROM decisions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match current.as_deref() {
            None => return Err(StoreError::PositionNotFound(format!("decision {id}"))),
            Some(s) if s == status.as_str() => {
                tx.commit()?;
                return Ok(());
            }
            Some("pending") => {}
            Some(_) => return Err(StoreError::DecisionFinalized(id)),
        }

        tx.execute(
            "UPDATE decisions
             SET execution_status = ?1, execution_error = ?2, execution_timestamp = ?3
             WHERE id = ?4",
            params![status.as_str(), error, Utc::now().to_rfc3339(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent decisions, each left-joined with its linked position.
    ///
    /// Entry decisions join the position they created (`decision_id`); hold
    /// and close decisions join the most recent position for the same coin
    /// entered at or before the decision's timestamp.
    pub fn recent_decisions(&self, limit: u32) -> Result<Vec<DecisionWithOutcome>, StoreError> {
        self.query_decisions(None, limit)
    }

    /// Like `recent_decisions` but restricted to a single coin.
    pub fn decisions_by_coin(
        &self,
        coin: &str,
        limit: u32,
    ) -> Result<Vec<DecisionWithOutcome>, StoreError> {
        self.query_decisions(Some(coin), limit)
    }

    fn query_decisions(
        &self,
        coin: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DecisionWithOutcome>, StoreError> {
        let conn = self.conn.lock();

        let filter = if coin.is_some() { "WHERE d.coin = ?2" } else { "" };
        let sql = format!(
            "SELECT
                d.id, d.timestamp, d.coin, d.signal, d.quantity_usd, d.leverage,
                d.confidence, d.profit_target, d.stop_loss, d.invalidation_condition,
                d.justification, d.raw_response, d.system_prompt, d.user_prompt,
                d.execution_status, d.execution_error, d.execution_timestamp,
                p.position_id, p.side, p.entry_time, p.entry_price, p.quantity_usd,
                p.leverage, p.exit_time, p.exit_price, p.realized_pnl, p.status
             FROM decisions d
             LEFT JOIN positions p ON p.id = (
                 CASE WHEN d.signal IN ('buy_to_enter', 'sell_to_enter')
                      THEN (SELECT p1.id FROM positions p1
                            WHERE p1.decision_id = d.id LIMIT 1)
                      ELSE (SELECT p2.id FROM positions p2
                            WHERE p2.coin = d.coin AND p2.entry_time <= d.timestamp
                            ORDER BY p2.entry_time DESC LIMIT 1)
                 END)
             {filter}
             ORDER BY d.id DESC
             LIMIT ?1"
        );

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &Row<'_>| -> rusqlite::Result<DecisionWithOutcome> {
            let decision = DecisionRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                coin: row.get(2)?,
                signal: row.get(3)?,
                quantity_usd: row.get(4)?,
                leverage: row.get(5)?,
                confidence: row.get(6)?,
                profit_target: row.get(7)?,
                stop_loss: row.get(8)?,
                invalidation_condition: row.get(9)?,
                justification: row.get(10)?,
                raw_response: row.get(11)?,
                system_prompt: row.get(12)?,
                user_prompt: row.get(13)?,
                execution_status: row
                    .get::<_, Option<String>>(14)?
                    .unwrap_or_else(|| "pending".to_string()),
                execution_error: row.get(15)?,
                execution_timestamp: row.get(16)?,
            };
            let position = match row.get::<_, Option<String>>(17)? {
                Some(position_id) => Some(LinkedPosition {
                    position_id,
                    side: row.get(18)?,
                    entry_time: row.get(19)?,
                    entry_price: row.get(20)?,
                    quantity_usd: row.get(21)?,
                    leverage: row.get(22)?,
                    exit_time: row.get(23)?,
                    exit_price: row.get(24)?,
                    realized_pnl: row.get(25)?,
                    status: row.get(26)?,
                }),
                None => None,
            };
            Ok(DecisionWithOutcome { decision, position })
        };

        let rows = match coin {
            Some(c) => stmt.query_map(params![limit, c], map_row)?,
            None => stmt.query_map(params![limit], map_row)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch a single decision by id.
    pub fn get_decision(&self, id: i64) -> Result<Option<DecisionRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, timestamp, coin, signal, quantity_usd, leverage, confidence,
                        profit_target, stop_loss, invalidation_condition, justification,
                        raw_response, system_prompt, user_prompt, execution_status,
                        execution_error, execution_timestamp
                 FROM decisions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DecisionRecord {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        coin: row.get(2)?,
                        signal: row.get(3)?,
                        quantity_usd: row.get(4)?,
                        leverage: row.get(5)?,
                        confidence: row.get(6)?,
                        profit_target: row.get(7)?,
                        stop_loss: row.get(8)?,
                        invalidation_condition: row.get(9)?,
                        justification: row.get(10)?,
                        raw_response: row.get(11)?,
                        system_prompt: row.get(12)?,
                        user_prompt: row.get(13)?,
                        execution_status: row
                            .get::<_, Option<String>>(14)?
                            .unwrap_or_else(|| "pending".to_string()),
                        execution_error: row.get(15)?,
                        execution_timestamp: row.get(16)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Total number of decisions, optionally filtered by coin.
    pub fn decisions_count(&self, coin: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count = match coin {
            Some(c) => conn.query_row(
                "SELECT COUNT(*) FROM decisions WHERE coin = ?1",
                params![c],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Record a new open position and return its row id.
    #[allow(clippy::too_many_arguments)]
    pub fn append_position_entry(
        &self,
        position_id: &str,
        coin: &str,
        side: &str,
        entry_price: f64,
        quantity_usd: f64,
        leverage: f64,
        decision_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO positions (
                position_id, coin, side, entry_time, entry_price,
                quantity_usd, leverage, decision_id, status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open')",
            params![
                position_id,
                coin,
                side,
                Utc::now().to_rfc3339(),
                entry_price,
                quantity_usd,
                leverage,
                decision_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Close a position: set exit fields and flip status. Fails if the
    /// position is missing or already closed.
    pub fn close_position(
        &self,
        position_id: &str,
        exit_price: f64,
        realized_pnl: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM positions WHERE position_id = ?1",
                params![position_id],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            None => return Err(StoreError::PositionNotFound(position_id.to_string())),
            Some("closed") => return Err(StoreError::AlreadyClosed(position_id.to_string())),
            Some(_) => {}
        }

        tx.execute(
            "UPDATE positions
             SET exit_time = ?1, exit_price = ?2, realized_pnl = ?3, status = 'closed'
             WHERE position_id = ?4",
            params![Utc::now().to_rfc3339(), exit_price, realized_pnl, position_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn open_positions(&self) -> Result<Vec<PositionRecord>, StoreError> {
        self.query_positions("WHERE status = 'open'", u32::MAX)
    }

    pub fn closed_positions(&self, limit: u32) -> Result<Vec<PositionRecord>, StoreError> {
        self.query_positions("WHERE status = 'closed'", limit)
    }

    pub fn all_positions(&self, limit: u32) -> Result<Vec<PositionRecord>, StoreError> {
        self.query_positions("", limit)
    }

    fn query_positions(
        &self,
        filter: &str,
        limit: u32,
    ) -> Result<Vec<PositionRecord>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT id, position_id, coin, side, entry_time, entry_price,
                    quantity_usd, leverage, decision_id, exit_time, exit_price,
                    realized_pnl, status
             FROM positions {filter}
             ORDER BY id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(PositionRecord {
                id: row.get(0)?,
                position_id: row.get(1)?,
                coin: row.get(2)?,
                side: row.get(3)?,
                entry_time: row.get(4)?,
                entry_price: row.get(5)?,
                quantity_usd: row.get(6)?,
                leverage: row.get(7)?,
                decision_id: row.get(8)?,
                exit_time: row.get(9)?,
                exit_price: row.get(10)?,
                realized_pnl: row.get(11)?,
                status: row.get(12)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sum of realized P&L across all closed positions.
    pub fn total_realized_pnl(&self) -> Result<f64, StoreError> {
        let conn = self.conn.lock();
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(realized_pnl), 0.0) FROM positions WHERE status = 'closed'",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Realized P&L of positions closed at or after `cutoff` (RFC 3339).
    /// Used by the risk gate's daily-loss check.
    pub fn realized_pnl_since(&self, cutoff: &str) -> Result<f64, StoreError> {
        let conn = self.conn.lock();
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(realized_pnl), 0.0)
             FROM positions
             WHERE status = 'closed' AND exit_time >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    // -------------------------------------------------------------------------
    // Account snapshots
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn append_account_snapshot(
        &self,
        balance_usd: f64,
        equity_usd: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        sharpe_ratio: Option<f64>,
        num_positions: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO account_state (
                timestamp, balance_usd, equity_usd, unrealized_pnl,
                realized_pnl, total_pnl, sharpe_ratio, num_positions
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                balance_usd,
                equity_usd,
                unrealized_pnl,
                realized_pnl,
                unrealized_pnl + realized_pnl,
                sharpe_ratio,
                num_positions,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn latest_account_snapshot(&self) -> Result<Option<AccountSnapshotRecord>, StoreError> {
        Ok(self.account_history(1)?.into_iter().next())
    }

    pub fn account_history(&self, limit: u32) -> Result<Vec<AccountSnapshotRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, balance_usd, equity_usd, unrealized_pnl,
                    realized_pnl, total_pnl, sharpe_ratio, num_positions
             FROM account_state ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(AccountSnapshotRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                balance_usd: row.get(2)?,
                equity_usd: row.get(3)?,
                unrealized_pnl: row.get(4)?,
                realized_pnl: row.get(5)?,
                total_pnl: row.get(6)?,
                sharpe_ratio: row.get(7)?,
                num_positions: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -------------------------------------------------------------------------
    // Status events
    // -------------------------------------------------------------------------

    pub fn append_status(
        &self,
        status: &str,
        message: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO bot_status (timestamp, status, message, error)
             VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().to_rfc3339(), status, message, error],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn recent_status(&self, limit: u32) -> Result<Vec<StatusRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, status, message, error
             FROM bot_status ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(StatusRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                status: row.get(2)?,
                message: row.get(3)?,
                error: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn latest_status(&self) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.recent_status(1)?.into_iter().next())
    }

    // -------------------------------------------------------------------------
    // Operator inputs
    // -------------------------------------------------------------------------

    /// Save a new operator input. In one transaction, every prior active row
    /// is archived and the new row inserted active, so at most one row is
    /// active at any instant.
    pub fn save_operator_input(
        &self,
        message: &str,
        message_type: &str,
        image_path: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE user_inputs SET is_active = 0 WHERE is_active = 1", [])?;
        tx.execute(
            "INSERT INTO user_inputs (timestamp, message, message_type, image_path, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![Utc::now().to_rfc3339(), message, message_type, image_path],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn get_active_operator_input(&self) -> Result<Option<OperatorInputRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, timestamp, message, message_type, image_path, is_active
                 FROM user_inputs WHERE is_active = 1 ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(OperatorInputRecord {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        message: row.get(2)?,
                        message_type: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "cycle".to_string()),
                        image_path: row.get(4)?,
                        is_active: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn archive_operator_input(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE user_inputs SET is_active = 0 WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM bot_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO bot_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Introspection & maintenance
    // -------------------------------------------------------------------------

    pub fn status(&self) -> Result<DatabaseStatus, StoreError> {
        let conn = self.conn.lock();

        let count = |table: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };

        let latest = |table: &str| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT MAX(timestamp) FROM {table}"),
                [],
                |row| row.get(0),
            )
        };

        let open_positions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM positions WHERE status = 'open'",
            [],
            |row| row.get(0),
        )?;

        let size_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(DatabaseStatus {
            path: self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            size_bytes,
            decisions: count("decisions")?,
            positions: count("positions")?,
            open_positions,
            account_snapshots: count("account_state")?,
            status_events: count("bot_status")?,
            operator_inputs: count("user_inputs")?,
            latest_decision_at: latest("decisions")?,
            latest_snapshot_at: latest("account_state")?,
        })
    }

    /// Wipe stored history. With `preserve_schema` the tables stay and rows
    /// are deleted (then the file is vacuumed to reclaim space); without it
    /// the tables are dropped and the schema rebuilt.
    pub fn reset(&self, preserve_schema: bool) -> Result<(), StoreError> {
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            if preserve_schema {
                tx.execute_batch(
                    "DELETE FROM decisions;
                     DELETE FROM positions;
                     DELETE FROM account_state;
                     DELETE FROM bot_status;
                     DELETE FROM user_inputs;",
                )?;
            } else {
                tx.execute_batch(
                    "DROP TABLE IF EXISTS decisions;
                     DROP TABLE IF EXISTS positions;
                     DROP TABLE IF EXISTS account_state;
                     DROP TABLE IF EXISTS bot_status;
                     DROP TABLE IF EXISTS user_inputs;
                     DROP TABLE IF EXISTS bot_settings;",
                )?;
            }
            tx.commit()?;

            // VACUUM must run outside a transaction.
            conn.execute_batch("VACUUM")?;
        }

        if !preserve_schema {
            self.init_schema()?;
        }

        info!(preserve_schema, "store reset");
        Ok(())
    }

    /// Dump up to `limit` rows of a whitelisted table as JSON objects, for
    /// the debug endpoint. Unknown tables are refused.
    pub fn debug_table(
        &self,
        table: &str,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        if !DEBUG_TABLES.contains(&table) {
            return Err(StoreError::TableNotAllowed(table.to_string()));
        }

        let conn = self.conn.lock();
        let order = if table == "bot_settings" { "key" } else { "id DESC" };
        let mut stmt =
            conn.prepare(&format!("SELECT * FROM {table} ORDER BY {order} LIMIT ?1"))?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|c| c.to_string()).collect();

        let rows = stmt.query_map(params![limit], |row| {
            let mut object = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => serde_json::Value::from(v),
                    rusqlite::types::ValueRef::Real(v) => serde_json::Value::from(v),
                    rusqlite::types::ValueRef::Text(v) => {
                        serde_json::Value::from(String::from_utf8_lossy(v).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(v) => {
                        serde_json::Value::from(format!("<{} bytes>", v.len()))
                    }
                };
                object.insert(name.clone(), value);
            }
            Ok(serde_json::Value::Object(object))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field(
                "path",
                &self
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| ":memory:".to_string()),
            )
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision(coin: &str, signal: &str) -> NewDecision {
        NewDecision {
            coin: coin.to_string(),
            signal: signal.to_string(),
            quantity_usd: 50.0,
            leverage: 2.0,
            confidence: 0.8,
            profit_target: Some(105_000.0),
            stop_loss: Some(99_000.0),
            invalidation_condition: Some("RSI<30".to_string()),
            justification: "trend up".to_string(),
            raw_response: "{}".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
        }
    }

    #[test]
    fn decision_ids_are_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let a = store.append_decision(&sample_decision("BTC/USDC:USDC", "hold")).unwrap();
        let b = store.append_decision(&sample_decision("BTC/USDC:USDC", "hold")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn execution_status_updates_once() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .append_decision(&sample_decision("BTC/USDC:USDC", "buy_to_enter"))
            .unwrap();

        store
            .set_decision_execution(id, ExecutionStatus::Success, None)
            .unwrap();
        // Same status again is idempotent.
        store
            .set_decision_execution(id, ExecutionStatus::Success, None)
            .unwrap();
        // A different status after finalization is an error.
        let err = store.set_decision_execution(id, ExecutionStatus::Failed, Some("late"));
        assert!(matches!(err, Err(StoreError::DecisionFinalized(_))));
    }

    #[test]
    fn entry_decision_joins_its_position() {
        let store = Store::open_in_memory().unwrap();
        let decision_id = store
            .append_decision(&sample_decision("BTC/USDC:USDC", "buy_to_enter"))
            .unwrap();
        store
            .append_position_entry(
                "BTC_1", "BTC/USDC:USDC", "long", 100_000.0, 50.0, 2.0,
                Some(decision_id),
            )
            .unwrap();

        let rows = store.recent_decisions(10).unwrap();
        assert_eq!(rows.len(), 1);
        let linked = rows[0].position.as_ref().expect("entry should join position");
        assert_eq!(linked.position_id, "BTC_1");
        assert_eq!(linked.status, "open");
        // The position must have been entered at or after the decision.
        assert!(linked.entry_time >= rows[0].decision.timestamp);
    }

    #[test]
    fn hold_decision_joins_latest_position_for_coin() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_position_entry("ETH_1", "ETH/USDC:USDC", "short", 3000.0, 30.0, 3.0, None)
            .unwrap();
        store
            .append_decision(&sample_decision("ETH/USDC:USDC", "hold"))
            .unwrap();

        let rows = store.decisions_by_coin("ETH/USDC:USDC", 5).unwrap();
        assert_eq!(rows.len(), 1);
        let linked = rows[0].position.as_ref().expect("hold should join existing position");
        assert_eq!(linked.position_id, "ETH_1");
    }

    #[test]
    fn hold_with_no_position_joins_nothing() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_decision(&sample_decision("SOL/USDC:USDC", "hold"))
            .unwrap();
        let rows = store.recent_decisions(5).unwrap();
        assert!(rows[0].position.is_none());
    }

    #[test]
    fn close_position_is_single_shot() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_position_entry("BTC_1", "BTC/USDC:USDC", "long", 100_000.0, 50.0, 2.0, None)
            .unwrap();

        store.close_position("BTC_1", 102_000.0, 2.0).unwrap();
        let err = store.close_position("BTC_1", 103_000.0, 3.0);
        assert!(matches!(err, Err(StoreError::AlreadyClosed(_))));

        let closed = store.closed_positions(10).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_price, Some(102_000.0));
        assert_eq!(closed[0].realized_pnl, Some(2.0));
    }

    #[test]
    fn close_missing_position_errors() {
        let store = Store::open_in_memory().unwrap();
        let err = store.close_position("NOPE_1", 1.0, 0.0);
        assert!(matches!(err, Err(StoreError::PositionNotFound(_))));
    }

    #[test]
    fn operator_input_keeps_single_active_row() {
        let store = Store::open_in_memory().unwrap();
        let first = store.save_operator_input("focus on BTC", "cycle", None).unwrap();
        let second = store.save_operator_input("focus on ETH", "cycle", None).unwrap();
        assert!(second > first);

        let active = store.get_active_operator_input().unwrap().unwrap();
        assert_eq!(active.id, second);
        assert_eq!(active.message, "focus on ETH");

        // Only one active row overall.
        let dump = store.debug_table("user_inputs", 10).unwrap();
        let active_count = dump
            .iter()
            .filter(|row| row.get("is_active").and_then(|v| v.as_i64()) == Some(1))
            .count();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn archive_clears_active_input() {
        let store = Store::open_in_memory().unwrap();
        let id = store.save_operator_input("hello", "cycle", None).unwrap();
        store.archive_operator_input(id).unwrap();
        assert!(store.get_active_operator_input().unwrap().is_none());
    }

    #[test]
    fn settings_round_trip_and_seed() {
        let store = Store::open_in_memory().unwrap();
        // Seeded defaults are present.
        assert_eq!(
            store.get_setting("prompt_preset").unwrap().as_deref(),
            Some("aggressive_small_account")
        );
        store.set_setting("prompt_preset", "conservative").unwrap();
        assert_eq!(
            store.get_setting("prompt_preset").unwrap().as_deref(),
            Some("conservative")
        );
        assert!(store.get_setting("no_such_key").unwrap().is_none());
    }

    #[test]
    fn realized_pnl_totals() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_position_entry("A_1", "BTC/USDC:USDC", "long", 100.0, 10.0, 2.0, None)
            .unwrap();
        store
            .append_position_entry("B_1", "ETH/USDC:USDC", "short", 100.0, 10.0, 2.0, None)
            .unwrap();
        store.close_position("A_1", 110.0, 2.0).unwrap();
        store.close_position("B_1", 90.0, 2.0).unwrap();

        assert!((store.total_realized_pnl().unwrap() - 4.0).abs() < 1e-9);

        let cutoff = "2000-01-01T00:00:00+00:00";
        assert!((store.realized_pnl_since(cutoff).unwrap() - 4.0).abs() < 1e-9);
        let future = "2999-01-01T00:00:00+00:00";
        assert!(store.realized_pnl_since(future).unwrap().abs() < 1e-9);
    }

    #[test]
    fn account_snapshots_append_only() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_account_snapshot(1000.0, 1000.0, 0.0, 0.0, None, 0)
            .unwrap();
        store
            .append_account_snapshot(950.0, 951.0, 1.0, 0.0, Some(1.2), 1)
            .unwrap();

        let latest = store.latest_account_snapshot().unwrap().unwrap();
        assert_eq!(latest.num_positions, 1);
        assert!((latest.equity_usd - 951.0).abs() < 1e-9);
        assert!((latest.total_pnl - 1.0).abs() < 1e-9);
        assert_eq!(store.account_history(10).unwrap().len(), 2);
    }

    #[test]
    fn reset_preserving_schema_zeroes_counts() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_decision(&sample_decision("BTC/USDC:USDC", "hold"))
            .unwrap();
        store.append_status("running", Some("hello"), None).unwrap();

        store.reset(true).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.decisions, 0);
        assert_eq!(status.status_events, 0);
        // Settings survive a schema-preserving reset.
        assert!(store.get_setting("prompt_preset").unwrap().is_some());
    }

    #[test]
    fn reset_full_rebuilds_schema() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting("prompt_preset", "standard").unwrap();
        store.reset(false).unwrap();
        // Schema rebuilt with reseeded defaults.
        assert_eq!(
            store.get_setting("prompt_preset").unwrap().as_deref(),
            Some("aggressive_small_account")
        );
        assert_eq!(store.status().unwrap().decisions, 0);
    }

    #[test]
    fn debug_table_refuses_unknown_tables() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.debug_table("sqlite_master", 5),
            Err(StoreError::TableNotAllowed(_))
        ));
        assert!(store.debug_table("decisions", 5).is_ok());
    }

    #[test]
    fn status_counts_reflect_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_decision(&sample_decision("BTC/USDC:USDC", "hold"))
            .unwrap();
        store
            .append_position_entry("P_1", "BTC/USDC:USDC", "long", 1.0, 1.0, 1.0, None)
            .unwrap();
        store.append_status("running", None, None).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.decisions, 1);
        assert_eq!(status.positions, 1);
        assert_eq!(status.open_positions, 1);
        assert_eq!(status.status_events, 1);
        assert!(status.latest_decision_at.is_some());
    }

    #[test]
    fn decisions_count_with_filter() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_decision(&sample_decision("BTC/USDC:USDC", "hold"))
            .unwrap();
        store
            .append_decision(&sample_decision("ETH/USDC:USDC", "hold"))
            .unwrap();
        assert_eq!(store.decisions_count(None).unwrap(), 2);
        assert_eq!(store.decisions_count(Some("BTC/USDC:USDC")).unwrap(), 1);
        assert_eq!(store.decisions_count(Some("DOGE/USDC:USDC")).unwrap(), 0);
    }
}
