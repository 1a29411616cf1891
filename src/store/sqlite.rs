// =============================================================================
// SQLite store — rusqlite implementation of the Store port
// =============================================================================
//
// WAL mode, one connection behind a mutex. The 35 feature columns of
// `signal_features` are generated from the schema constant so the table and
// the vector can never drift apart.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::engine::{FeatureVector, FEATURE_NAMES};
use crate::types::Outcome;

use super::{AlertRow, ModelMetricsRow, OpportunityRow, SignalFeaturesRow, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database at {}", path.as_ref().display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL")?;
        Self::init_schema(&conn)?;
        info!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                type TEXT NOT NULL,
                score REAL NOT NULL,
                direction TEXT NOT NULL,
                change_24h REAL,
                vol_mult REAL,
                velocity REAL,
                range_pct REAL,
                is_new INTEGER NOT NULL DEFAULT 0,
                last_price REAL NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(symbol, type, created_at)
            );
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                level TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                total_opportunities INTEGER NOT NULL DEFAULT 0,
                total_alerts INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS ml_model_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_version TEXT NOT NULL,
                training_date INTEGER NOT NULL,
                training_samples INTEGER NOT NULL,
                validation_auc REAL NOT NULL,
                validation_accuracy REAL NOT NULL,
                win_rate_predicted REAL NOT NULL,
                win_rate_actual REAL NOT NULL,
                feature_importance_json TEXT NOT NULL
            );",
        )
        .context("failed to create base tables")?;

        let feature_columns: String = FEATURE_NAMES
            .iter()
            .map(|name| format!("{name} REAL NOT NULL DEFAULT 0"))
            .collect::<Vec<_>>()
            .join(",\n                ");

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS signal_features (
                signal_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                ts INTEGER NOT NULL,
                entry_price REAL NOT NULL DEFAULT 0,
                {feature_columns},
                outcome TEXT NOT NULL DEFAULT 'PENDING',
                pnl_percent REAL,
                ml_win_probability REAL,
                ml_quality_tier TEXT,
                ml_model_version TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_signal_features_symbol
                ON signal_features(symbol);
            CREATE INDEX IF NOT EXISTS idx_signal_features_ts
                ON signal_features(ts);
            CREATE INDEX IF NOT EXISTS idx_signal_features_outcome
                ON signal_features(outcome);"
        ))
        .context("failed to create signal_features table")?;

        Ok(())
    }

    fn row_to_features(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalFeaturesRow> {
        let mut values = Vec::with_capacity(FEATURE_NAMES.len());
        for i in 0..FEATURE_NAMES.len() {
            values.push(row.get::<_, f64>(4 + i)?);
        }
        let outcome_col = 4 + FEATURE_NAMES.len();

        Ok(SignalFeaturesRow {
            signal_id: row.get(0)?,
            symbol: row.get(1)?,
            ts: row.get(2)?,
            entry_price: row.get(3)?,
            features: FeatureVector::from_values(values).expect("column count matches schema"),
            outcome: Outcome::parse(&row.get::<_, String>(outcome_col)?)
                .unwrap_or(Outcome::Pending),
            pnl_percent: row.get(outcome_col + 1)?,
            ml_win_probability: row.get(outcome_col + 2)?,
            ml_quality_tier: row.get(outcome_col + 3)?,
            ml_model_version: row.get(outcome_col + 4)?,
        })
    }

    fn select_columns() -> String {
        format!(
            "signal_id, symbol, ts, entry_price, {}, outcome, pnl_percent, \
             ml_win_probability, ml_quality_tier, ml_model_version",
            FEATURE_NAMES.join(", ")
        )
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn record_opportunity(&self, row: &OpportunityRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO opportunities
             (symbol, type, score, direction, change_24h, vol_mult, velocity, range_pct,
              is_new, last_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.symbol,
                row.kind,
                row.score,
                row.direction,
                row.change_24h,
                row.vol_mult,
                row.velocity,
                row.range_pct,
                row.is_new as i64,
                row.last_price,
                row.created_at,
            ],
        )
        .context("failed to insert opportunity")?;
        Ok(())
    }

    async fn record_alert(&self, row: &AlertRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alerts (symbol, kind, message, level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.symbol, row.kind, row.message, row.level, row.created_at],
        )
        .context("failed to insert alert")?;
        Ok(())
    }

    async fn open_session(&self, started_at: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (started_at) VALUES (?1)",
            params![started_at],
        )
        .context("failed to open session")?;
        Ok(conn.last_insert_rowid())
    }

    async fn close_session(
        &self,
        session_id: i64,
        ended_at: i64,
        total_opportunities: i64,
        total_alerts: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions
             SET ended_at = ?2, total_opportunities = ?3, total_alerts = ?4
             WHERE id = ?1",
            params![session_id, ended_at, total_opportunities, total_alerts],
        )
        .context("failed to close session")?;
        Ok(())
    }

    async fn upsert_signal_features(&self, row: &SignalFeaturesRow) -> Result<()> {
        let placeholders: Vec<String> = (1..=FEATURE_NAMES.len() + 9)
            .map(|i| format!("?{i}"))
            .collect();
        let update_set: String = FEATURE_NAMES
            .iter()
            .map(|name| format!("{name} = excluded.{name}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO signal_features
             (signal_id, symbol, ts, entry_price, {}, outcome, pnl_percent,
              ml_win_probability, ml_quality_tier, ml_model_version)
             VALUES ({})
             ON CONFLICT(signal_id) DO UPDATE SET
               symbol = excluded.symbol,
               ts = excluded.ts,
               entry_price = excluded.entry_price,
               {update_set},
               outcome = excluded.outcome,
               pnl_percent = excluded.pnl_percent,
               ml_win_probability = excluded.ml_win_probability,
               ml_quality_tier = excluded.ml_quality_tier,
               ml_model_version = excluded.ml_model_version",
            FEATURE_NAMES.join(", "),
            placeholders.join(", "),
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(FEATURE_NAMES.len() + 9);
        values.push(row.signal_id.clone().into());
        values.push(row.symbol.clone().into());
        values.push(row.ts.into());
        values.push(row.entry_price.into());
        for &v in row.features.values() {
            values.push(v.into());
        }
        values.push(row.outcome.as_str().to_string().into());
        values.push(match row.pnl_percent {
            Some(v) => v.into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match row.ml_win_probability {
            Some(v) => v.into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match &row.ml_quality_tier {
            Some(v) => v.clone().into(),
            None => rusqlite::types::Value::Null,
        });
        values.push(match &row.ml_model_version {
            Some(v) => v.clone().into(),
            None => rusqlite::types::Value::Null,
        });

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(values))
            .context("failed to upsert signal features")?;
        debug!(signal_id = %row.signal_id, "signal features upserted");
        Ok(())
    }

    async fn update_outcome(
        &self,
        signal_id: &str,
        outcome: Outcome,
        pnl_percent: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE signal_features SET outcome = ?2, pnl_percent = ?3 WHERE signal_id = ?1",
            params![signal_id, outcome.as_str(), pnl_percent],
        )
        .context("failed to update outcome")?;
        Ok(())
    }

    async fn pending_signals(&self) -> Result<Vec<SignalFeaturesRow>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM signal_features WHERE outcome = 'PENDING' ORDER BY ts ASC",
            Self::select_columns()
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare pending query")?;
        let rows = stmt
            .query_map([], Self::row_to_features)
            .context("failed to query pending signals")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read pending signal rows")
    }

    async fn completed_signals(&self, limit: usize) -> Result<Vec<SignalFeaturesRow>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM signal_features
             WHERE outcome IN ('WIN', 'LOSS') ORDER BY ts DESC LIMIT ?1",
            Self::select_columns()
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare completed query")?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_features)
            .context("failed to query completed signals")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read completed signal rows")
    }

    async fn export_completed_csv(&self) -> Result<String> {
        let rows = {
            let conn = self.conn.lock();
            let sql = format!(
                "SELECT {} FROM signal_features
                 WHERE outcome IN ('WIN', 'LOSS') ORDER BY ts ASC",
                Self::select_columns()
            );
            let mut stmt = conn.prepare(&sql).context("failed to prepare export query")?;
            let rows = stmt
                .query_map([], Self::row_to_features)
                .context("failed to query export rows")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read export rows")?
        };

        let mut csv = String::from("signal_id,symbol,ts,");
        csv.push_str(&FEATURE_NAMES.join(","));
        csv.push_str(",outcome,pnl_percent\n");

        for row in rows {
            csv.push_str(&row.signal_id);
            csv.push(',');
            csv.push_str(&row.symbol);
            csv.push(',');
            csv.push_str(&row.ts.to_string());
            for &v in row.features.values() {
                csv.push(',');
                csv.push_str(&v.to_string());
            }
            csv.push(',');
            csv.push_str(row.outcome.as_str());
            csv.push(',');
            if let Some(pnl) = row.pnl_percent {
                csv.push_str(&pnl.to_string());
            }
            csv.push('\n');
        }

        Ok(csv)
    }

    async fn import_csv(&self, csv: &str) -> Result<usize> {
        let mut lines = csv.lines();
        let header = lines.next().context("empty CSV")?;
        let expected_cols = 3 + FEATURE_NAMES.len() + 2;
        if header.split(',').count() != expected_cols {
            anyhow::bail!("CSV header has unexpected column count");
        }

        let mut imported = 0usize;
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != expected_cols {
                anyhow::bail!("CSV row has {} columns, expected {expected_cols}", fields.len());
            }

            let mut values = Vec::with_capacity(FEATURE_NAMES.len());
            for raw in &fields[3..3 + FEATURE_NAMES.len()] {
                values.push(
                    raw.parse::<f64>()
                        .with_context(|| format!("bad feature value '{raw}'"))?,
                );
            }

            let outcome_idx = 3 + FEATURE_NAMES.len();
            let row = SignalFeaturesRow {
                signal_id: fields[0].to_string(),
                symbol: fields[1].to_string(),
                ts: fields[2].parse().context("bad ts")?,
                entry_price: 0.0,
                features: FeatureVector::from_values(values)
                    .context("feature count mismatch")?,
                outcome: Outcome::parse(fields[outcome_idx]).context("bad outcome")?,
                pnl_percent: if fields[outcome_idx + 1].is_empty() {
                    None
                } else {
                    Some(fields[outcome_idx + 1].parse().context("bad pnl")?)
                },
                ml_win_probability: None,
                ml_quality_tier: None,
                ml_model_version: None,
            };
            self.upsert_signal_features(&row).await?;
            imported += 1;
        }

        Ok(imported)
    }

    async fn record_model_metrics(&self, row: &ModelMetricsRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ml_model_metrics
             (model_version, training_date, training_samples, validation_auc,
              validation_accuracy, win_rate_predicted, win_rate_actual,
              feature_importance_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.model_version,
                row.training_date,
                row.training_samples,
                row.validation_auc,
                row.validation_accuracy,
                row.win_rate_predicted,
                row.win_rate_actual,
                row.feature_importance_json,
            ],
        )
        .context("failed to insert model metrics")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features_row(id: &str, symbol: &str, ts: i64, outcome: Outcome) -> SignalFeaturesRow {
        let mut features = FeatureVector::zeroed();
        features.set("price_change_24h", 11.0);
        features.set("smart_confidence", 70.123456789);
        features.set("btc_correlation", -0.333333333333);
        features.set("direction", 1.0);
        SignalFeaturesRow {
            signal_id: id.to_string(),
            symbol: symbol.to_string(),
            ts,
            entry_price: 100.0,
            features,
            outcome,
            pnl_percent: match outcome {
                Outcome::Pending => None,
                _ => Some(2.0),
            },
            ml_win_probability: Some(0.7),
            ml_quality_tier: Some("HIGH".to_string()),
            ml_model_version: Some("v1".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_signal_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let row = features_row("sig-1", "AAAUSDT", 100, Outcome::Pending);

        store.upsert_signal_features(&row).await.unwrap();
        store.upsert_signal_features(&row).await.unwrap();

        let pending = store.pending_signals().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].signal_id, "sig-1");
        assert_eq!(pending[0].features.get("price_change_24h"), Some(11.0));
    }

    #[tokio::test]
    async fn outcome_update_moves_row_out_of_pending() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_signal_features(&features_row("sig-1", "AAAUSDT", 100, Outcome::Pending))
            .await
            .unwrap();

        store
            .update_outcome("sig-1", Outcome::Win, Some(2.5))
            .await
            .unwrap();

        assert!(store.pending_signals().await.unwrap().is_empty());
        let completed = store.completed_signals(10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].outcome, Outcome::Win);
        assert_eq!(completed[0].pnl_percent, Some(2.5));
    }

    #[tokio::test]
    async fn csv_roundtrip_is_exact() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_signal_features(&features_row("sig-1", "AAAUSDT", 200, Outcome::Win))
            .await
            .unwrap();
        store
            .upsert_signal_features(&features_row("sig-2", "BBBUSDT", 100, Outcome::Loss))
            .await
            .unwrap();
        store
            .upsert_signal_features(&features_row("sig-3", "CCCUSDT", 300, Outcome::Pending))
            .await
            .unwrap();

        let csv = store.export_completed_csv().await.unwrap();
        // Ascending ts: sig-2 before sig-1; pending rows excluded.
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("sig-2"));
        assert!(lines[2].starts_with("sig-1"));

        // Re-ingest into a fresh store and compare rows.
        let other = SqliteStore::open_in_memory().unwrap();
        let imported = other.import_csv(&csv).await.unwrap();
        assert_eq!(imported, 2);

        let reexported = other.export_completed_csv().await.unwrap();
        let orig_rows = store.completed_signals(10).await.unwrap();
        let back_rows = other.completed_signals(10).await.unwrap();
        assert_eq!(orig_rows.len(), back_rows.len());
        for (a, b) in orig_rows.iter().zip(back_rows.iter()) {
            assert_eq!(a.signal_id, b.signal_id);
            assert_eq!(a.ts, b.ts);
            for (x, y) in a.features.values().iter().zip(b.features.values()) {
                assert!((x - y).abs() < 1e-9, "feature drift: {x} vs {y}");
            }
        }
        assert_eq!(csv, reexported);
    }

    #[tokio::test]
    async fn opportunities_are_unique_per_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let row = OpportunityRow {
            symbol: "AAAUSDT".to_string(),
            kind: "TOP_PICK".to_string(),
            score: 42.0,
            direction: "LONG".to_string(),
            change_24h: Some(11.0),
            vol_mult: None,
            velocity: None,
            range_pct: None,
            is_new: false,
            last_price: 111.0,
            created_at: 1_000,
        };
        store.record_opportunity(&row).await.unwrap();
        store.record_opportunity(&row).await.unwrap();

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM opportunities", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.open_session(1_000).await.unwrap();
        store.close_session(id, 2_000, 12, 3).await.unwrap();

        let conn = store.conn.lock();
        let (ended, opps, alerts): (i64, i64, i64) = conn
            .query_row(
                "SELECT ended_at, total_opportunities, total_alerts FROM sessions WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(ended, 2_000);
        assert_eq!(opps, 12);
        assert_eq!(alerts, 3);
    }

    #[tokio::test]
    async fn model_metrics_insert() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record_model_metrics(&ModelMetricsRow {
                model_version: "v2".to_string(),
                training_date: 1_700_000_000_000,
                training_samples: 500,
                validation_auc: 0.71,
                validation_accuracy: 0.66,
                win_rate_predicted: 0.58,
                win_rate_actual: 0.55,
                feature_importance_json: "{}".to_string(),
            })
            .await
            .unwrap();

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ml_model_metrics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
