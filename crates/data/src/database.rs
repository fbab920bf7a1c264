use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use daytrader_core::DatabaseConfig;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS alerts (
    id BIGSERIAL PRIMARY KEY,
    received_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    raw_payload TEXT NOT NULL,
    ticker VARCHAR(10) NOT NULL,
    direction VARCHAR(4),
    signal_price NUMERIC,
    source VARCHAR(20) NOT NULL,
    status VARCHAR(10) NOT NULL DEFAULT 'RECEIVED',
    rejection_reason VARCHAR(255),
    trade_id BIGINT
);
CREATE INDEX IF NOT EXISTS ix_alerts_received_at ON alerts (received_at);

CREATE TABLE IF NOT EXISTS trades (
    id BIGSERIAL PRIMARY KEY,
    trade_date DATE NOT NULL,
    ticker VARCHAR(10) NOT NULL,
    direction VARCHAR(4) NOT NULL,
    option_symbol VARCHAR(30) NOT NULL,
    strike_price NUMERIC NOT NULL,
    expiration_date DATE NOT NULL,
    quantity INT NOT NULL DEFAULT 1,
    status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
    source VARCHAR(20) NOT NULL,
    entry_order_id VARCHAR(50) UNIQUE,
    entry_price NUMERIC,
    entry_filled_at TIMESTAMP,
    stop_order_id VARCHAR(50),
    stop_loss_price NUMERIC,
    stop_active BOOLEAN NOT NULL DEFAULT FALSE,
    trailing_stop_price NUMERIC,
    highest_price_seen NUMERIC,
    exit_order_id VARCHAR(50),
    exit_price NUMERIC,
    exit_filled_at TIMESTAMP,
    exit_reason VARCHAR(20),
    pnl_dollars NUMERIC,
    pnl_percent NUMERIC,
    entry_atr NUMERIC,
    param_stop_loss_percent NUMERIC,
    param_profit_target_percent NUMERIC,
    param_trailing_stop_percent NUMERIC,
    param_max_hold_minutes BIGINT,
    param_atr_stop_mult NUMERIC,
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    updated_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
);
CREATE INDEX IF NOT EXISTS ix_trades_date_status ON trades (trade_date, status);

CREATE TABLE IF NOT EXISTS trade_events (
    id BIGSERIAL PRIMARY KEY,
    trade_id BIGINT NOT NULL REFERENCES trades(id),
    timestamp TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    event_type VARCHAR(30) NOT NULL,
    message VARCHAR(500) NOT NULL,
    details JSONB
);
CREATE INDEX IF NOT EXISTS ix_trade_events_trade ON trade_events (trade_id, timestamp);

CREATE TABLE IF NOT EXISTS trade_price_snapshots (
    id BIGSERIAL PRIMARY KEY,
    trade_id BIGINT NOT NULL REFERENCES trades(id),
    timestamp TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    price NUMERIC NOT NULL,
    highest_price_seen NUMERIC NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_price_snap_trade_time ON trade_price_snapshots (trade_id, timestamp);

CREATE TABLE IF NOT EXISTS daily_summaries (
    id BIGSERIAL PRIMARY KEY,
    trade_date DATE UNIQUE NOT NULL,
    total_trades INT NOT NULL DEFAULT 0,
    winning_trades INT NOT NULL DEFAULT 0,
    losing_trades INT NOT NULL DEFAULT 0,
    total_pnl NUMERIC NOT NULL DEFAULT 0,
    largest_win NUMERIC NOT NULL DEFAULT 0,
    largest_loss NUMERIC NOT NULL DEFAULT 0,
    win_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    avg_hold_time_minutes DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS enabled_strategies (
    ticker VARCHAR(10) NOT NULL,
    timeframe VARCHAR(5) NOT NULL,
    signal_type VARCHAR(20) NOT NULL,
    params JSONB NOT NULL,
    enabled_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    PRIMARY KEY (ticker, timeframe, signal_type)
);

CREATE TABLE IF NOT EXISTS favorites (
    id BIGSERIAL PRIMARY KEY,
    ticker VARCHAR(10) NOT NULL,
    timeframe VARCHAR(5) NOT NULL,
    signal_type VARCHAR(20) NOT NULL,
    params JSONB NOT NULL,
    label VARCHAR(100),
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
);
";

#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to Postgres and applies the schema.
    ///
    /// # Errors
    /// Returns an error if the connection or migration fails.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Applies the embedded schema. Statements are idempotent.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema up to date");
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
