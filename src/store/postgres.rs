//! PostgreSQL store

use super::{Store, StoreStats};
use crate::config::DatabaseConfig;
use crate::error::{SwapperError, SwapperResult};
use crate::model::{AtomicSwap, Chain, Order};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

const SWAP_COLUMNS: &str = "id, chain, initiator_address, redeemer_address, asset, amount, \
     timelock, secret_hash, on_chain_identifier, initiate_tx_hash, redeem_tx_hash, \
     refund_tx_hash, secret, current_confirmations, minimum_confirmations, filled_amount, \
     initiate_block_number, status";

const TERMINAL_ORDER_STATUSES: &str = "('executed', 'failed_soft', 'failed_hard', 'cancelled')";

/// Store backed by PostgreSQL
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(config: &DatabaseConfig) -> SwapperResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if missing
    pub async fn run_migrations(&self) -> SwapperResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atomic_swaps (
                id BIGSERIAL PRIMARY KEY,
                chain VARCHAR(32) NOT NULL,
                initiator_address TEXT NOT NULL,
                redeemer_address TEXT NOT NULL,
                asset TEXT NOT NULL DEFAULT 'primary',
                amount TEXT NOT NULL,
                timelock TEXT NOT NULL,
                secret_hash VARCHAR(66) NOT NULL,
                on_chain_identifier TEXT NOT NULL DEFAULT '',
                initiate_tx_hash TEXT NOT NULL DEFAULT '',
                redeem_tx_hash TEXT NOT NULL DEFAULT '',
                refund_tx_hash TEXT NOT NULL DEFAULT '',
                secret TEXT NOT NULL DEFAULT '',
                current_confirmations BIGINT NOT NULL DEFAULT 0,
                minimum_confirmations BIGINT NOT NULL DEFAULT 0,
                filled_amount TEXT NOT NULL DEFAULT '',
                initiate_block_number BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'not_started',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_chain_status
            ON atomic_swaps (chain, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_on_chain_identifier
            ON atomic_swaps (on_chain_identifier)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                maker TEXT NOT NULL,
                taker TEXT NOT NULL DEFAULT '',
                initiator_atomic_swap_id BIGINT NOT NULL REFERENCES atomic_swaps (id),
                follower_atomic_swap_id BIGINT NOT NULL REFERENCES atomic_swaps (id),
                secret_hash VARCHAR(66) NOT NULL,
                secret TEXT NOT NULL DEFAULT '',
                status VARCHAR(20) NOT NULL DEFAULT 'created',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_status
            ON orders (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn swaps_by_id(&self, ids: &[i64]) -> SwapperResult<HashMap<i64, AtomicSwap>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM atomic_swaps WHERE id = ANY($1)",
            SWAP_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| swap_from_row(row).map(|swap| (swap.id, swap)))
            .collect()
    }

    /// Attach the current leg rows to order rows
    async fn assemble(&self, rows: Vec<PgRow>) -> SwapperResult<Vec<Order>> {
        let ids: Vec<i64> = rows
            .iter()
            .flat_map(|row| {
                [
                    row.get::<i64, _>("initiator_atomic_swap_id"),
                    row.get::<i64, _>("follower_atomic_swap_id"),
                ]
            })
            .collect();
        let swaps = self.swaps_by_id(&ids).await?;

        let take = |id: i64| {
            swaps.get(&id).cloned().ok_or_else(|| SwapperError::NotFound {
                kind: "swap",
                id: id.to_string(),
            })
        };

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(Order {
                    id: row.get("id"),
                    maker: row.get("maker"),
                    taker: row.get("taker"),
                    initiator_atomic_swap: take(row.get("initiator_atomic_swap_id"))?,
                    follower_atomic_swap: take(row.get("follower_atomic_swap_id"))?,
                    secret_hash: row.get("secret_hash"),
                    secret: row.get("secret"),
                    created_at: row.get::<DateTime<Utc>, _>("created_at"),
                    status: status.parse()?,
                })
            })
            .collect()
    }
}

fn swap_from_row(row: &PgRow) -> SwapperResult<AtomicSwap> {
    let chain: String = row.get("chain");
    let status: String = row.get("status");
    Ok(AtomicSwap {
        id: row.get("id"),
        chain: chain.parse()?,
        initiator_address: row.get("initiator_address"),
        redeemer_address: row.get("redeemer_address"),
        asset: row.get("asset"),
        amount: row.get("amount"),
        timelock: row.get("timelock"),
        secret_hash: row.get("secret_hash"),
        on_chain_identifier: row.get("on_chain_identifier"),
        initiate_tx_hash: row.get("initiate_tx_hash"),
        redeem_tx_hash: row.get("redeem_tx_hash"),
        refund_tx_hash: row.get("refund_tx_hash"),
        secret: row.get("secret"),
        current_confirmations: row.get::<i64, _>("current_confirmations") as u64,
        minimum_confirmations: row.get::<i64, _>("minimum_confirmations") as u64,
        filled_amount: row.get("filled_amount"),
        initiate_block_number: row.get::<i64, _>("initiate_block_number") as u64,
        status: status.parse()?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get_active_swaps(&self, chain: Chain) -> SwapperResult<Vec<AtomicSwap>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.chain, s.initiator_address, s.redeemer_address, s.asset, s.amount,
                   s.timelock, s.secret_hash, s.on_chain_identifier, s.initiate_tx_hash,
                   s.redeem_tx_hash, s.refund_tx_hash, s.secret, s.current_confirmations,
                   s.minimum_confirmations, s.filled_amount, s.initiate_block_number, s.status
            FROM atomic_swaps s
            JOIN orders o
              ON s.id IN (o.initiator_atomic_swap_id, o.follower_atomic_swap_id)
            WHERE s.chain = $1
              AND s.status NOT IN ('redeemed', 'refunded')
              AND o.status = 'filled'
            "#,
        )
        .bind(chain.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(swap_from_row).collect()
    }

    async fn update_swap(&self, swap: &AtomicSwap) -> SwapperResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE atomic_swaps
            SET on_chain_identifier = $2,
                initiate_tx_hash = $3,
                redeem_tx_hash = $4,
                refund_tx_hash = $5,
                secret = $6,
                current_confirmations = $7,
                filled_amount = $8,
                initiate_block_number = $9,
                status = $10,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(swap.id)
        .bind(&swap.on_chain_identifier)
        .bind(&swap.initiate_tx_hash)
        .bind(&swap.redeem_tx_hash)
        .bind(&swap.refund_tx_hash)
        .bind(&swap.secret)
        .bind(swap.current_confirmations as i64)
        .bind(&swap.filled_amount)
        .bind(swap.initiate_block_number as i64)
        .bind(swap.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SwapperError::NotFound {
                kind: "swap",
                id: swap.id.to_string(),
            });
        }
        debug!("Saved swap {} on {}: {}", swap.id, swap.chain, swap.status);
        Ok(())
    }

    async fn swap_by_on_chain_identifier(&self, identifier: &str) -> SwapperResult<AtomicSwap> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM atomic_swaps WHERE on_chain_identifier = $1",
            SWAP_COLUMNS
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SwapperError::NotFound {
            kind: "swap",
            id: identifier.to_string(),
        })?;

        swap_from_row(&row)
    }

    async fn get_active_orders(&self) -> SwapperResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, maker, taker, initiator_atomic_swap_id, follower_atomic_swap_id,
                   secret_hash, secret, status, created_at
            FROM orders
            WHERE status NOT IN {}
            ORDER BY id
            "#,
            TERMINAL_ORDER_STATUSES
        ))
        .fetch_all(&self.pool)
        .await?;

        self.assemble(rows).await
    }

    async fn update_order(&self, order: &Order) -> SwapperResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, secret = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(&order.secret)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SwapperError::NotFound {
                kind: "order",
                id: order.id.to_string(),
            });
        }
        debug!("Saved order {}: {}", order.id, order.status);
        Ok(())
    }

    async fn order_by_id(&self, id: i64) -> SwapperResult<Order> {
        let row = sqlx::query(
            r#"
            SELECT id, maker, taker, initiator_atomic_swap_id, follower_atomic_swap_id,
                   secret_hash, secret, status, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SwapperError::NotFound {
            kind: "order",
            id: id.to_string(),
        })?;

        self.assemble(vec![row])
            .await?
            .pop()
            .ok_or_else(|| SwapperError::Internal(format!("order {} vanished", id)))
    }

    async fn health_check(&self) -> SwapperResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> SwapperResult<StoreStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let orders_by_status = rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("status"),
                    row.get::<i64, _>("count") as u64,
                )
            })
            .collect();

        let active = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT s.id) AS count
            FROM atomic_swaps s
            JOIN orders o
              ON s.id IN (o.initiator_atomic_swap_id, o.follower_atomic_swap_id)
            WHERE s.status NOT IN ('redeemed', 'refunded')
              AND o.status = 'filled'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            orders_by_status,
            active_swaps: active.get::<i64, _>("count") as u64,
        })
    }
}
