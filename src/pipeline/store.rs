//! SQLite persistence for pools, candles, and signals
//!
//! Tables owned exclusively by this pipeline:
//! - `pools` - tracked tokens, UPSERT on mint (liq/fdv keep-existing)
//! - `candles` - OHLCV rows, UPSERT on (mint, bucket_ts) with merge
//! - `signals` - append-only until the single `notified` flip;
//!   dropped and recreated at startup (destructive migration)
//! - `reference_prices` - gap-fill price fetches, retention-bounded
//! - `notifications` - delivery log, retention-bounded
//!
//! All access goes through one connection behind a mutex, so candle merges
//! for the same (mint, bucket) are serialized and the ON CONFLICT upsert is
//! atomic with respect to concurrent trades.

use super::error::{PipelineError, PipelineResult};
use super::types::{BuySignal, Candle, PoolRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

/// Counts reported by a retention sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionReport {
    pub signals_deleted: usize,
    pub candles_deleted: usize,
    pub prices_deleted: usize,
    pub notifications_deleted: usize,
    pub pools_deleted: usize,
}

/// Retention horizons for the cleanup sweep
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub signal_retention_secs: i64,
    pub candle_retention_secs: i64,
    pub pool_idle_retention_secs: i64,
}

/// Shared handle to the SQLite store
pub struct TokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl TokenStore {
    /// Open (or create) the database and run schema setup.
    ///
    /// Schema creation is idempotent (`IF NOT EXISTS`) for every table
    /// except `signals`, which is unconditionally dropped and recreated:
    /// signals are short-lived operational state and the table layout is
    /// allowed to change between deploys.
    pub fn open(db_path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::info!("📊 Enabled WAL mode for SQLite database");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pools (
                mint            TEXT PRIMARY KEY,
                symbol          TEXT,
                first_seen_ts   INTEGER NOT NULL,
                liq_usd         REAL,
                fdv_usd         REAL,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS candles (
                mint        TEXT NOT NULL,
                bucket_ts   INTEGER NOT NULL,
                open        REAL NOT NULL,
                high        REAL NOT NULL,
                low         REAL NOT NULL,
                close       REAL NOT NULL,
                volume      REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (mint, bucket_ts)
            );

            CREATE TABLE IF NOT EXISTS reference_prices (
                symbol      TEXT NOT NULL,
                price_usd   REAL NOT NULL,
                fetched_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                signal_id   INTEGER NOT NULL,
                mint        TEXT NOT NULL,
                sent_at     INTEGER NOT NULL,
                delivered   INTEGER NOT NULL DEFAULT 0
            );

            DROP TABLE IF EXISTS signals;
            CREATE TABLE signals (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                mint        TEXT NOT NULL,
                signal_ts   INTEGER NOT NULL,
                ema_cross   INTEGER NOT NULL,
                vol_spike   REAL NOT NULL,
                rsi         REAL NOT NULL,
                notified    INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_candles_mint_bucket
                ON candles (mint, bucket_ts DESC);
            CREATE INDEX idx_signals_unnotified
                ON signals (notified, id);
            "#,
        )?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open with bounded retries for startup resilience.
    ///
    /// A store that cannot be opened after `attempts` tries is fatal; a
    /// steady-state write failure later is not (logged and skipped by the
    /// caller).
    pub async fn open_with_retries(db_path: &str, attempts: u32) -> PipelineResult<Self> {
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::open(db_path) {
                Ok(store) => return Ok(store),
                Err(e) => {
                    log::warn!("⚠️  Store open attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::Persistence("store open failed".to_string())))
    }

    // ─── Candles ────────────────────────────────────────────────────────

    /// Merge one trade into its candle row.
    ///
    /// Insert if absent, else merge: high/low widen, close takes the latest
    /// trade's price (arrival order), volume adds. One SQL statement, so
    /// interleaved trades on the same (mint, bucket) cannot lose an update.
    pub fn upsert_trade(
        &self,
        mint: &str,
        bucket_ts: i64,
        price: f64,
        volume_usd: f64,
    ) -> PipelineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO candles (mint, bucket_ts, open, high, low, close, volume)
            VALUES (?1, ?2, ?3, ?3, ?3, ?3, ?4)
            ON CONFLICT(mint, bucket_ts) DO UPDATE SET
                high   = MAX(high, excluded.close),
                low    = MIN(low, excluded.close),
                close  = excluded.close,
                volume = volume + excluded.volume
            "#,
            params![mint, bucket_ts, price, volume_usd],
        )?;
        Ok(())
    }

    /// Insert a zero-volume gap candle if and only if the bucket is empty.
    ///
    /// Returns true when a candle was inserted. `OR IGNORE` makes the gap
    /// filler idempotent: a second run in the same bucket is a no-op and a
    /// real trade that raced us wins.
    pub fn insert_gap_candle(&self, mint: &str, bucket_ts: i64, price: f64) -> PipelineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO candles (mint, bucket_ts, open, high, low, close, volume)
            VALUES (?1, ?2, ?3, ?3, ?3, ?3, 0)
            "#,
            params![mint, bucket_ts, price],
        )?;
        Ok(inserted > 0)
    }

    pub fn candle_exists(&self, mint: &str, bucket_ts: i64) -> PipelineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT 1 FROM candles WHERE mint = ?1 AND bucket_ts = ?2")?;
        Ok(stmt.exists(params![mint, bucket_ts])?)
    }

    pub fn get_candle(&self, mint: &str, bucket_ts: i64) -> PipelineResult<Option<Candle>> {
        let conn = self.conn.lock().unwrap();
        let candle = conn
            .query_row(
                "SELECT mint, bucket_ts, open, high, low, close, volume
                 FROM candles WHERE mint = ?1 AND bucket_ts = ?2",
                params![mint, bucket_ts],
                Self::row_to_candle,
            )
            .optional()?;
        Ok(candle)
    }

    /// Close of the most recent candle for this token, regardless of age
    pub fn latest_close(&self, mint: &str) -> PipelineResult<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let close = conn
            .query_row(
                "SELECT close FROM candles WHERE mint = ?1
                 ORDER BY bucket_ts DESC LIMIT 1",
                params![mint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(close)
    }

    /// The most recent `limit` candles, returned oldest → newest as the
    /// indicator engine expects
    pub fn recent_candles(&self, mint: &str, limit: usize) -> PipelineResult<Vec<Candle>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT mint, bucket_ts, open, high, low, close, volume
             FROM candles WHERE mint = ?1
             ORDER BY bucket_ts DESC LIMIT ?2",
        )?;
        let mut candles: Vec<Candle> = stmt
            .query_map(params![mint, limit as i64], Self::row_to_candle)?
            .collect::<Result<_, _>>()?;
        candles.reverse();
        Ok(candles)
    }

    fn row_to_candle(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candle> {
        Ok(Candle {
            mint: row.get(0)?,
            bucket_ts: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
        })
    }

    // ─── Pools ──────────────────────────────────────────────────────────

    /// Create or refresh a pool row.
    ///
    /// `first_seen_ts` is written once and never updated; symbol/liq/fdv
    /// keep their existing value when the incoming one is NULL.
    pub fn upsert_pool(
        &self,
        mint: &str,
        symbol: Option<&str>,
        liq_usd: Option<f64>,
        fdv_usd: Option<f64>,
        now: i64,
    ) -> PipelineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO pools (mint, symbol, first_seen_ts, liq_usd, fdv_usd, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?3)
            ON CONFLICT(mint) DO UPDATE SET
                symbol     = COALESCE(excluded.symbol, symbol),
                liq_usd    = COALESCE(excluded.liq_usd, liq_usd),
                fdv_usd    = COALESCE(excluded.fdv_usd, fdv_usd),
                updated_at = excluded.updated_at
            "#,
            params![mint, symbol, now, liq_usd, fdv_usd],
        )?;
        Ok(())
    }

    pub fn get_pool(&self, mint: &str) -> PipelineResult<Option<PoolRecord>> {
        let conn = self.conn.lock().unwrap();
        let pool = conn
            .query_row(
                "SELECT mint, symbol, first_seen_ts, liq_usd, fdv_usd
                 FROM pools WHERE mint = ?1",
                params![mint],
                |row| {
                    Ok(PoolRecord {
                        mint: row.get(0)?,
                        symbol: row.get(1)?,
                        first_seen_ts: row.get(2)?,
                        liq_usd: row.get(3)?,
                        fdv_usd: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(pool)
    }

    /// All tracked mints (gap filler and Stage A iterate over these)
    pub fn tracked_mints(&self) -> PipelineResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT mint FROM pools ORDER BY mint")?;
        let mints = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(mints)
    }

    // ─── Signals ────────────────────────────────────────────────────────

    pub fn insert_signal(
        &self,
        mint: &str,
        signal_ts: i64,
        ema_cross: bool,
        vol_spike: f64,
        rsi: f64,
    ) -> PipelineResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signals (mint, signal_ts, ema_cross, vol_spike, rsi, notified)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![mint, signal_ts, ema_cross as i64, vol_spike, rsi],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// True if the token produced any signal at or after `since_ts`
    /// (notified or not) - Stage A's re-signal cooldown
    pub fn recent_signal_exists(&self, mint: &str, since_ts: i64) -> PipelineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT 1 FROM signals WHERE mint = ?1 AND signal_ts >= ?2")?;
        Ok(stmt.exists(params![mint, since_ts])?)
    }

    /// Unnotified signals, oldest first (FIFO delivery order)
    pub fn unnotified_signals(&self) -> PipelineResult<Vec<BuySignal>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, mint, signal_ts, ema_cross, vol_spike, rsi, notified
             FROM signals WHERE notified = 0 ORDER BY id ASC",
        )?;
        let signals = stmt
            .query_map([], |row| {
                Ok(BuySignal {
                    id: row.get(0)?,
                    mint: row.get(1)?,
                    signal_ts: row.get(2)?,
                    ema_cross: row.get::<_, i64>(3)? != 0,
                    vol_spike: row.get(4)?,
                    rsi: row.get(5)?,
                    notified: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(signals)
    }

    /// Flip `notified` false → true. Returns true when this call did the
    /// flip (guards the exactly-once mark; a second call is a no-op).
    pub fn mark_notified(&self, signal_id: i64) -> PipelineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE signals SET notified = 1 WHERE id = ?1 AND notified = 0",
            params![signal_id],
        )?;
        Ok(updated > 0)
    }

    // ─── Derived tables ─────────────────────────────────────────────────

    pub fn record_reference_price(&self, symbol: &str, price_usd: f64, now: i64) -> PipelineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reference_prices (symbol, price_usd, fetched_at) VALUES (?1, ?2, ?3)",
            params![symbol, price_usd, now],
        )?;
        Ok(())
    }

    pub fn record_notification(&self, signal_id: i64, mint: &str, sent_at: i64, delivered: bool) -> PipelineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (signal_id, mint, sent_at, delivered) VALUES (?1, ?2, ?3, ?4)",
            params![signal_id, mint, sent_at, delivered as i64],
        )?;
        Ok(())
    }

    // ─── Retention ──────────────────────────────────────────────────────

    /// Delete aged rows across all retention-bounded tables.
    ///
    /// Signals age out regardless of notified state; pools go when idle
    /// past the horizon.
    pub fn run_retention(&self, now: i64, policy: &RetentionPolicy) -> PipelineResult<RetentionReport> {
        let conn = self.conn.lock().unwrap();
        let mut report = RetentionReport::default();

        report.signals_deleted = conn.execute(
            "DELETE FROM signals WHERE signal_ts < ?1",
            params![now - policy.signal_retention_secs],
        )?;
        report.candles_deleted = conn.execute(
            "DELETE FROM candles WHERE bucket_ts < ?1",
            params![now - policy.candle_retention_secs],
        )?;
        report.prices_deleted = conn.execute(
            "DELETE FROM reference_prices WHERE fetched_at < ?1",
            params![now - policy.signal_retention_secs],
        )?;
        report.notifications_deleted = conn.execute(
            "DELETE FROM notifications WHERE sent_at < ?1",
            params![now - policy.signal_retention_secs],
        )?;
        report.pools_deleted = conn.execute(
            "DELETE FROM pools WHERE updated_at < ?1",
            params![now - policy.pool_idle_retention_secs],
        )?;

        Ok(report)
    }
}

/// Periodic retention sweep. A failed sweep is logged and the next one
/// proceeds normally.
pub async fn retention_task(store: Arc<TokenStore>, period_secs: u64, policy: RetentionPolicy) {
    log::info!("🧹 Starting retention task (period: {}s)", period_secs);
    let mut timer = interval(Duration::from_secs(period_secs));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();

        match store.run_retention(now, &policy) {
            Ok(report) => {
                log::info!(
                    "🧹 Retention: {} signals, {} candles, {} prices, {} notifications, {} pools deleted",
                    report.signals_deleted,
                    report.candles_deleted,
                    report.prices_deleted,
                    report.notifications_deleted,
                    report.pools_deleted
                );
            }
            Err(e) => {
                log::error!("❌ Retention sweep failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_test_store() -> (NamedTempFile, TokenStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = TokenStore::open(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, store)
    }

    #[test]
    fn test_first_trade_inserts_candle() {
        let (_temp, store) = open_test_store();

        store.upsert_trade("mint_a", 1_700_000_040, 1.5, 100.0).unwrap();

        let candle = store.get_candle("mint_a", 1_700_000_040).unwrap().unwrap();
        assert_eq!(candle.open, 1.5);
        assert_eq!(candle.high, 1.5);
        assert_eq!(candle.low, 1.5);
        assert_eq!(candle.close, 1.5);
        assert_eq!(candle.volume, 100.0);
    }

    #[test]
    fn test_merge_sequence_matches_reduction() {
        // o = first price, c = last price, h = max, l = min, v = sum -
        // independent of interleaving
        let (_temp, store) = open_test_store();
        let bucket = 1_700_000_040;

        let trades = [(1.0, 10.0), (1.8, 20.0), (0.7, 5.0), (1.2, 15.0)];
        for (price, volume) in trades {
            store.upsert_trade("mint_a", bucket, price, volume).unwrap();
        }

        let candle = store.get_candle("mint_a", bucket).unwrap().unwrap();
        assert_eq!(candle.open, 1.0);
        assert_eq!(candle.close, 1.2);
        assert_eq!(candle.high, 1.8);
        assert_eq!(candle.low, 0.7);
        assert_eq!(candle.volume, 50.0);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_gap_candle_does_not_clobber_trades() {
        let (_temp, store) = open_test_store();
        let bucket = 1_700_000_100;

        store.upsert_trade("mint_a", bucket, 2.0, 50.0).unwrap();
        let inserted = store.insert_gap_candle("mint_a", bucket, 9.9).unwrap();
        assert!(!inserted);

        let candle = store.get_candle("mint_a", bucket).unwrap().unwrap();
        assert_eq!(candle.close, 2.0);
        assert_eq!(candle.volume, 50.0);
    }

    #[test]
    fn test_gap_candle_idempotent() {
        let (_temp, store) = open_test_store();
        let bucket = 1_700_000_160;

        assert!(store.insert_gap_candle("mint_a", bucket, 1.1).unwrap());
        assert!(!store.insert_gap_candle("mint_a", bucket, 1.1).unwrap());

        let candles = store.recent_candles("mint_a", 10).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].volume, 0.0);
    }

    #[test]
    fn test_recent_candles_ordered_oldest_first() {
        let (_temp, store) = open_test_store();
        for i in 0..5 {
            store.upsert_trade("mint_a", 1_700_000_000 + i * 60, 1.0 + i as f64, 10.0).unwrap();
        }

        let candles = store.recent_candles("mint_a", 3).unwrap();
        assert_eq!(candles.len(), 3);
        assert!(candles[0].bucket_ts < candles[1].bucket_ts);
        assert!(candles[1].bucket_ts < candles[2].bucket_ts);
        // last three buckets, latest price 5.0
        assert_eq!(candles[2].close, 5.0);
    }

    #[test]
    fn test_pool_first_seen_immutable_and_keep_existing() {
        let (_temp, store) = open_test_store();

        store.upsert_pool("mint_a", Some("WIF"), Some(12_000.0), None, 1_000).unwrap();
        // Later observation: no symbol, no liq, new fdv
        store.upsert_pool("mint_a", None, None, Some(900_000.0), 2_000).unwrap();

        let pool = store.get_pool("mint_a").unwrap().unwrap();
        assert_eq!(pool.first_seen_ts, 1_000); // set once
        assert_eq!(pool.symbol.as_deref(), Some("WIF")); // kept
        assert_eq!(pool.liq_usd, Some(12_000.0)); // kept
        assert_eq!(pool.fdv_usd, Some(900_000.0)); // updated
    }

    #[test]
    fn test_signal_fifo_and_notified_flip() {
        let (_temp, store) = open_test_store();

        let id1 = store.insert_signal("mint_a", 100, true, 4.0, 28.0).unwrap();
        let id2 = store.insert_signal("mint_b", 200, true, 3.5, 31.0).unwrap();

        let pending = store.unnotified_signals().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, id1); // oldest first
        assert_eq!(pending[1].id, id2);

        assert!(store.mark_notified(id1).unwrap());
        // Second flip is a no-op
        assert!(!store.mark_notified(id1).unwrap());

        let pending = store.unnotified_signals().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id2);
    }

    #[test]
    fn test_signals_table_recreated_on_open() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap().to_string();

        {
            let store = TokenStore::open(&path).unwrap();
            store.insert_signal("mint_a", 100, true, 4.0, 28.0).unwrap();
            store.upsert_pool("mint_a", None, None, None, 100).unwrap();
        }

        // Reopen: signals wiped, pools survive
        let store = TokenStore::open(&path).unwrap();
        assert!(store.unnotified_signals().unwrap().is_empty());
        assert!(store.get_pool("mint_a").unwrap().is_some());
    }

    #[test]
    fn test_recent_signal_cooldown_lookup() {
        let (_temp, store) = open_test_store();
        store.insert_signal("mint_a", 5_000, true, 4.0, 30.0).unwrap();

        assert!(store.recent_signal_exists("mint_a", 4_000).unwrap());
        assert!(!store.recent_signal_exists("mint_a", 6_000).unwrap());
        assert!(!store.recent_signal_exists("mint_b", 0).unwrap());
    }

    #[test]
    fn test_retention_deletes_aged_rows() {
        let (_temp, store) = open_test_store();
        let now = 1_700_000_000;
        let policy = RetentionPolicy {
            signal_retention_secs: 86_400,
            candle_retention_secs: 86_400,
            pool_idle_retention_secs: 604_800,
        };

        // Aged rows
        store.insert_signal("mint_old", now - 90_000, true, 3.0, 20.0).unwrap();
        store.upsert_trade("mint_old", now - 90_000, 1.0, 5.0).unwrap();
        store.record_reference_price("OLD", 1.0, now - 90_000).unwrap();
        // Fresh rows
        store.insert_signal("mint_new", now - 100, true, 3.0, 20.0).unwrap();
        store.upsert_trade("mint_new", now - 100, 1.0, 5.0).unwrap();

        let report = store.run_retention(now, &policy).unwrap();
        assert_eq!(report.signals_deleted, 1);
        assert_eq!(report.candles_deleted, 1);
        assert_eq!(report.prices_deleted, 1);

        // Notified state does not exempt a signal from retention
        let id = store.insert_signal("mint_notified", now - 90_000, true, 3.0, 20.0).unwrap();
        store.mark_notified(id).unwrap();
        let report = store.run_retention(now, &policy).unwrap();
        assert_eq!(report.signals_deleted, 1);
    }
}
