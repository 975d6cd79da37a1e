//! Audit sink: append-only log of every domain event, buffered in memory
//! and flushed periodically to persistent storage.
//!
//! Grounded on
//! `examples/original_source/trading-system/persistence/audit_logger.py`
//! for the buffer size (100), flush cadence (30s), and the six logical
//! tables/indexes; the on-disk backend follows this crate's own
//! `signals::db_storage` rusqlite/WAL idiom rather than the original's
//! asyncpg/Postgres target.

use crate::domain::DomainEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const BUFFER_SIZE: usize = 100;
const FLUSH_INTERVAL_SECS: u64 = 30;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_timestamp TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    payload_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_type_ts ON audit_events(event_type, event_timestamp);

CREATE TABLE IF NOT EXISTS trade_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    qty INTEGER NOT NULL,
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trade_signals_symbol_created ON trade_signals(symbol, created_at);

CREATE TABLE IF NOT EXISTS risk_decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id TEXT NOT NULL,
    approved INTEGER NOT NULL,
    reason TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_risk_decisions_signal ON risk_decisions(signal_id);
CREATE INDEX IF NOT EXISTS idx_risk_decisions_approved_created ON risk_decisions(approved, created_at);

CREATE TABLE IF NOT EXISTS order_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL,
    signal_id TEXT NOT NULL,
    status TEXT NOT NULL,
    filled_qty INTEGER NOT NULL,
    filled_avg_price REAL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_order_events_signal ON order_events(signal_id);

CREATE TABLE IF NOT EXISTS ai_trade_ideas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id TEXT NOT NULL,
    description TEXT NOT NULL,
    confidence REAL NOT NULL,
    approved INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS performance_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_type TEXT NOT NULL,
    value REAL NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_performance_metrics_type_ts ON performance_metrics(metric_type, created_at);
"#;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: DomainEvent);
    async fn shutdown(&self);
}

#[derive(Debug, Clone)]
pub struct AuditTrailEntry {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceSummary {
    pub signals_by_source: std::collections::HashMap<String, u64>,
    pub risk_decisions_by_outcome: std::collections::HashMap<String, u64>,
    pub orders_by_status: std::collections::HashMap<String, u64>,
}

/// In-memory sink for tests: no buffering semantics to verify, just an
/// unbounded append-only `Vec` guarded by a lock.
pub struct InMemoryAuditSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }

    async fn shutdown(&self) {}
}

/// Buffered, periodically-flushed sink backed by SQLite.
pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
    buffer: Arc<Mutex<Vec<DomainEvent>>>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteAuditSink {
    pub fn new(db_path: &str) -> anyhow::Result<Arc<Self>> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let sink = Arc::new(Self {
            conn: Arc::new(Mutex::new(conn)),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(BUFFER_SIZE))),
            flush_handle: Mutex::new(None),
        });

        let bg = Arc::clone(&sink);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(FLUSH_INTERVAL_SECS));
            loop {
                interval.tick().await;
                bg.flush();
            }
        });
        *sink.flush_handle.lock() = Some(handle);

        Ok(sink)
    }

    fn flush(&self) {
        let pending: Vec<DomainEvent> = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let conn = self.conn.lock();
        for event in &pending {
            if let Err(e) = write_event(&conn, event) {
                error!(error = %e, "audit flush: failed to persist event");
            }
        }
        info!(count = pending.len(), "audit buffer flushed");
    }

    pub fn query_trail(&self, limit: usize) -> Vec<AuditTrailEntry> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(
            "SELECT event_type, event_timestamp FROM audit_events ORDER BY id DESC LIMIT ?1",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt.query_map(params![limit as i64], |row| {
            let event_type: String = row.get(0)?;
            let ts: String = row.get(1)?;
            Ok(AuditTrailEntry {
                event_type,
                timestamp: DateTime::parse_from_rfc3339(&ts)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        });
        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let conn = self.conn.lock();
        let mut summary = PerformanceSummary::default();

        if let Ok(mut stmt) =
            conn.prepare("SELECT source, COUNT(*) FROM trade_signals GROUP BY source")
        {
            if let Ok(rows) = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))) {
                for row in rows.flatten() {
                    summary.signals_by_source.insert(row.0, row.1);
                }
            }
        }

        if let Ok(mut stmt) =
            conn.prepare("SELECT approved, COUNT(*) FROM risk_decisions GROUP BY approved")
        {
            if let Ok(rows) = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))) {
                for row in rows.flatten() {
                    let key = if row.0 != 0 { "approved" } else { "rejected" };
                    summary.risk_decisions_by_outcome.insert(key.to_string(), row.1);
                }
            }
        }

        if let Ok(mut stmt) =
            conn.prepare("SELECT status, COUNT(*) FROM order_events GROUP BY status")
        {
            if let Ok(rows) = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))) {
                for row in rows.flatten() {
                    summary.orders_by_status.insert(row.0, row.1);
                }
            }
        }

        summary
    }
}

fn write_event(conn: &Connection, event: &DomainEvent) -> anyhow::Result<()> {
    let payload_json = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO audit_events (event_id, event_type, event_timestamp, ingested_at, payload_json) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            uuid::Uuid::new_v4().to_string(),
            event.kind(),
            event.timestamp().to_rfc3339(),
            Utc::now().to_rfc3339(),
            payload_json,
        ],
    )?;

    match event {
        DomainEvent::SignalGenerated { signal, .. } => {
            conn.execute(
                "INSERT INTO trade_signals (signal_id, symbol, side, qty, confidence, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    signal.id.to_string(),
                    signal.symbol,
                    format!("{:?}", signal.side),
                    signal.qty,
                    signal.confidence,
                    format!("{:?}", signal.source),
                    signal.created_at.to_rfc3339(),
                ],
            )?;
        }
        DomainEvent::SignalApproved { trade, timestamp, .. } => {
            conn.execute(
                "INSERT INTO risk_decisions (signal_id, approved, reason, created_at) VALUES (?1, 1, NULL, ?2)",
                params![trade.signal.id.to_string(), timestamp.to_rfc3339()],
            )?;
        }
        DomainEvent::SignalRejected { trade, timestamp, .. } => {
            conn.execute(
                "INSERT INTO risk_decisions (signal_id, approved, reason, created_at) VALUES (?1, 0, ?2, ?3)",
                params![trade.signal.id.to_string(), trade.rejection_reason, timestamp.to_rfc3339()],
            )?;
        }
        DomainEvent::OrderSubmitted { order, .. }
        | DomainEvent::OrderFilled { order, .. }
        | DomainEvent::OrderCancelled { order, .. }
        | DomainEvent::OrderRejected { order, .. } => {
            conn.execute(
                "INSERT INTO order_events (order_id, signal_id, status, filled_qty, filled_avg_price, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    order.order_id.to_string(),
                    order.signal_id.to_string(),
                    format!("{:?}", order.status),
                    order.filled_qty,
                    order.filled_avg_price,
                    order.timestamp.to_rfc3339(),
                ],
            )?;
        }
        DomainEvent::TradeIdeaGenerated { idea, .. } => {
            conn.execute(
                "INSERT INTO ai_trade_ideas (idea_id, description, confidence, approved, created_at) VALUES (?1, ?2, ?3, NULL, ?4)",
                params![
                    idea.id.to_string(),
                    idea.description,
                    idea.confidence,
                    idea.created_at.to_rfc3339(),
                ],
            )?;
        }
        DomainEvent::PerformanceMetricRecorded {
            metric_type,
            value,
            metadata,
            timestamp,
            ..
        } => {
            conn.execute(
                "INSERT INTO performance_metrics (metric_type, value, metadata_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    metric_type,
                    value,
                    serde_json::to_string(metadata)?,
                    timestamp.to_rfc3339(),
                ],
            )?;
        }
        _ => {}
    }

    Ok(())
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: DomainEvent) {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(event);
            buffer.len() >= BUFFER_SIZE
        };
        if should_flush {
            self.flush();
        }
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.flush_handle.lock().take() {
            handle.abort();
        }
        self.flush();
        warn!("audit sink shut down, final flush complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side, SignalSource, TradeSignal};

    #[tokio::test]
    async fn sqlite_sink_persists_after_shutdown_flush() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("audit.db");
        let sink = SqliteAuditSink::new(db_path.to_str().unwrap()).unwrap();

        let signal = TradeSignal::new(
            "AAPL",
            Side::Buy,
            10,
            OrderType::Market,
            0.8,
            SignalSource::Strategy,
            None,
            None,
            None,
            std::collections::HashMap::new(),
        )
        .unwrap();

        sink.record(DomainEvent::SignalGenerated {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            signal,
        })
        .await;

        sink.shutdown().await;

        let trail = sink.query_trail(10);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].event_type, "signal_generated");
    }

    #[tokio::test]
    async fn in_memory_sink_records_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(DomainEvent::RiskLimitBreached {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            rule: "max_position_size".to_string(),
            reason: "too big".to_string(),
        })
        .await;
        assert_eq!(sink.events().len(), 1);
    }
}
