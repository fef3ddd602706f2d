//! Merchant settlement engine
//!
//! Every debit adds its amount to the store's pending pool
//! (`store_settlements.pending_amount`). A merchant draws on that pool by
//! requesting a settlement; the requested amount is earmarked immediately, so
//! the pool only ever holds earnings not yet claimed by any settlement:
//!
//! ```text
//! request(amount)      pool -= amount
//! amend(old -> new)    pool -= new - old      (new <= old + pool)
//! payment(amount)      pool unchanged
//! ```
//!
//! Every action appends a row to `settlement_logs` in the same transaction.

use rust_decimal::Decimal;
use sqlx::{FromRow, SqliteConnection};

use super::context::{LedgerContext, Staged};
use crate::db::rows::{SettlementLogRow, SettlementRow, StoreRow, SETTLEMENT_COLUMNS};
use crate::db::{is_unique_violation_on, now_millis};
use crate::types::ledger::validate_actor;
use crate::types::{
    from_minor, to_minor, LedgerError, LedgerEvent, LedgerResult, Minor, RegisterStoreRequest,
    Settlement, SettlementAction, SettlementId, SettlementLog, SettlementStatus, Store, StoreId,
    StoreSettlement, StoreSummary,
};

/// Settlement joined with its store's pool, read under the write lock
#[derive(Debug, FromRow)]
struct SettlementPosition {
    store_id: StoreId,
    total_transaction_amount: i64,
    settled_amount: i64,
    status: String,
    store_pending: i64,
}

impl SettlementPosition {
    fn status(&self) -> LedgerResult<SettlementStatus> {
        self.status.parse()
    }
}

async fn append_log(
    conn: &mut SqliteConnection,
    settlement_id: SettlementId,
    action: SettlementAction,
    amount: Minor,
    notes: Option<String>,
    actor: &str,
    now: i64,
) -> LedgerResult<()> {
    sqlx::query(
        "INSERT INTO settlement_logs (settlement_id, action, amount, notes, created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(settlement_id)
    .bind(action.as_str())
    .bind(amount)
    .bind(notes)
    .bind(actor.trim())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_settlement(
    conn: &mut SqliteConnection,
    settlement_id: SettlementId,
) -> LedgerResult<Settlement> {
    let sql = format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE settlement_id = ?1");
    sqlx::query_as::<_, SettlementRow>(&sql)
        .bind(settlement_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::SettlementNotFound { settlement_id })?
        .try_into()
}

async fn store_pending(conn: &mut SqliteConnection, store_id: StoreId) -> LedgerResult<Minor> {
    let pending: Option<i64> =
        sqlx::query_scalar("SELECT pending_amount FROM store_settlements WHERE store_id = ?1")
            .bind(store_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(pending.unwrap_or_default())
}

/// Lock a settlement row; false when it does not exist
async fn lock_settlement(
    conn: &mut SqliteConnection,
    settlement_id: SettlementId,
    now: i64,
) -> LedgerResult<bool> {
    let locked = sqlx::query("UPDATE settlements SET updated_at = ?1 WHERE settlement_id = ?2")
        .bind(now)
        .bind(settlement_id)
        .execute(&mut *conn)
        .await?;
    Ok(locked.rows_affected() > 0)
}

async fn read_position(
    conn: &mut SqliteConnection,
    settlement_id: SettlementId,
) -> LedgerResult<SettlementPosition> {
    Ok(sqlx::query_as(
        "SELECT s.store_id, s.total_transaction_amount, s.settled_amount, s.status, \
         COALESCE(ss.pending_amount, 0) AS store_pending \
         FROM settlements s LEFT JOIN store_settlements ss ON ss.store_id = s.store_id \
         WHERE s.settlement_id = ?1",
    )
    .bind(settlement_id)
    .fetch_one(&mut *conn)
    .await?)
}

/// Settlement Engine
#[derive(Debug, Clone)]
pub struct Settlements {
    ctx: LedgerContext,
}

impl Settlements {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Register a store together with its empty pending pool
    ///
    /// # Errors
    ///
    /// * `LedgerError::DuplicateStore` - name, email or mobile number already taken
    pub async fn register_store(&self, request: RegisterStoreRequest) -> LedgerResult<Store> {
        request.validate()?;
        let store = self
            .ctx
            .bounded("register_store", self.register_store_tx(&request))
            .await?;
        tracing::info!(store_id = store.store_id, store_name = %store.store_name, "Registered store");
        Ok(store)
    }

    async fn register_store_tx(&self, request: &RegisterStoreRequest) -> LedgerResult<Staged<Store>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        let inserted = sqlx::query_as::<_, StoreRow>(
            "INSERT INTO stores (store_name, store_type, owner_name, mobile_number, email, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             RETURNING store_id, store_name, store_type, owner_name, mobile_number, email",
        )
        .bind(request.store_name.trim())
        .bind(request.store_type.trim())
        .bind(request.owner_name.trim())
        .bind(request.mobile_number.trim())
        .bind(request.email.trim())
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let store = match inserted {
            Ok(row) => Store::from(row),
            Err(e) => {
                let duplicate = [
                    ("store_name", &request.store_name),
                    ("email", &request.email),
                    ("mobile_number", &request.mobile_number),
                ]
                .into_iter()
                .find(|(column, _)| is_unique_violation_on(&e, column));
                return Err(match duplicate {
                    Some((field, value)) => LedgerError::DuplicateStore {
                        field: field.to_string(),
                        value: value.trim().to_string(),
                    },
                    None => e.into(),
                });
            }
        };

        sqlx::query(
            "INSERT INTO store_settlements (store_id, pending_amount, created_at, updated_at) \
             VALUES (?1, 0, ?2, ?2)",
        )
        .bind(store.store_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Ok((tx, store))
    }

    /// Request a settlement of `amount` from the store's pending pool
    ///
    /// The amount is earmarked at once: the pool shrinks by `amount` and the
    /// new settlement starts as `requested` with nothing settled.
    ///
    /// # Errors
    ///
    /// * `LedgerError::StoreNotFound`
    /// * `LedgerError::ExceedsPending` - amount above the pool
    pub async fn request_settlement(
        &self,
        store_id: StoreId,
        amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        let amount_minor = to_minor("amount", amount)?;
        validate_actor(actor)?;
        let (settlement, pool) = self
            .ctx
            .bounded("request_settlement", self.request_settlement_tx(store_id, amount_minor, actor))
            .await?;

        tracing::info!(
            store_id,
            settlement_id = settlement.settlement_id,
            %amount,
            store_pending = %from_minor(pool),
            "Settlement requested"
        );
        self.ctx.events.publish(LedgerEvent::SettlementCreated {
            settlement: settlement.clone(),
            store_pending_amount: from_minor(pool),
        });
        Ok(settlement)
    }

    async fn request_settlement_tx(
        &self,
        store_id: StoreId,
        amount: Minor,
        actor: &str,
    ) -> LedgerResult<Staged<(Settlement, Minor)>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        let locked = sqlx::query("UPDATE store_settlements SET updated_at = ?1 WHERE store_id = ?2")
            .bind(now)
            .bind(store_id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            let exists: Option<StoreId> =
                sqlx::query_scalar("SELECT store_id FROM stores WHERE store_id = ?1")
                    .bind(store_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                return Err(LedgerError::StoreNotFound { store_id });
            }
        }

        let pending = store_pending(&mut tx, store_id).await?;
        if amount > pending {
            return Err(LedgerError::ExceedsPending {
                store_id,
                requested: from_minor(amount),
                max_allowed: from_minor(pending),
            });
        }

        sqlx::query("UPDATE store_settlements SET pending_amount = pending_amount - ?1 WHERE store_id = ?2")
            .bind(amount)
            .bind(store_id)
            .execute(&mut *tx)
            .await?;

        let settlement_id: SettlementId = sqlx::query_scalar(
            "INSERT INTO settlements (store_id, total_transaction_amount, settled_amount, pending_amount, status, created_at, updated_at) \
             VALUES (?1, ?2, 0, ?2, ?3, ?4, ?4) RETURNING settlement_id",
        )
        .bind(store_id)
        .bind(amount)
        .bind(SettlementStatus::Requested.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        append_log(&mut tx, settlement_id, SettlementAction::Create, amount, None, actor, now).await?;

        let settlement = fetch_settlement(&mut tx, settlement_id).await?;
        Ok((tx, (settlement, pending - amount)))
    }

    /// Change the amount of a settlement that is still `requested`
    ///
    /// The difference moves between the settlement and the store's pool, so
    /// the new amount may be at most the old amount plus the pool.
    ///
    /// # Errors
    ///
    /// * `LedgerError::SettlementNotFound`
    /// * `LedgerError::InvalidState` - settlement is `pending` or `completed`
    /// * `LedgerError::ExceedsPending` - new amount above old amount plus pool
    pub async fn amend_amount(
        &self,
        settlement_id: SettlementId,
        new_amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        let new_minor = to_minor("amount", new_amount)?;
        validate_actor(actor)?;
        let (settlement, pool) = self
            .ctx
            .bounded("amend_settlement", self.amend_amount_tx(settlement_id, new_minor, actor))
            .await?;

        tracing::info!(
            settlement_id,
            store_id = settlement.store_id,
            %new_amount,
            store_pending = %from_minor(pool),
            "Settlement amended"
        );
        self.ctx.events.publish(LedgerEvent::SettlementUpdated {
            settlement: settlement.clone(),
            store_pending_amount: Some(from_minor(pool)),
        });
        Ok(settlement)
    }

    async fn amend_amount_tx(
        &self,
        settlement_id: SettlementId,
        new_amount: Minor,
        actor: &str,
    ) -> LedgerResult<Staged<(Settlement, Minor)>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        if !lock_settlement(&mut tx, settlement_id, now).await? {
            return Err(LedgerError::SettlementNotFound { settlement_id });
        }
        let position = read_position(&mut tx, settlement_id).await?;
        let status = position.status()?;
        if !status.is_amendable() {
            return Err(LedgerError::invalid_state(settlement_id, status, "amended"));
        }

        let old_amount = position.total_transaction_amount;
        let max_allowed = old_amount + position.store_pending;
        if new_amount > max_allowed {
            return Err(LedgerError::ExceedsPending {
                store_id: position.store_id,
                requested: from_minor(new_amount),
                max_allowed: from_minor(max_allowed),
            });
        }

        let delta = new_amount - old_amount;
        sqlx::query(
            "INSERT INTO store_settlements (store_id, pending_amount, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(store_id) DO UPDATE SET pending_amount = pending_amount + excluded.pending_amount, \
             updated_at = excluded.updated_at",
        )
        .bind(position.store_id)
        .bind(-delta)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE settlements SET total_transaction_amount = ?1, pending_amount = ?1 - settled_amount \
             WHERE settlement_id = ?2",
        )
        .bind(new_amount)
        .bind(settlement_id)
        .execute(&mut *tx)
        .await?;

        append_log(
            &mut tx,
            settlement_id,
            SettlementAction::Amend,
            new_amount,
            Some(format!("amount changed from {} to {}", from_minor(old_amount), from_minor(new_amount))),
            actor,
            now,
        )
        .await?;

        let settlement = fetch_settlement(&mut tx, settlement_id).await?;
        Ok((tx, (settlement, position.store_pending - delta)))
    }

    /// Record a payment made to the merchant against a settlement
    ///
    /// The settlement becomes `completed` once fully settled, `pending`
    /// otherwise. The store's pool is not touched: the amount was earmarked
    /// when the settlement was requested.
    ///
    /// # Errors
    ///
    /// * `LedgerError::SettlementNotFound`
    /// * `LedgerError::AlreadyCompleted`
    /// * `LedgerError::ExceedsRemaining` - payment above what is still owed
    pub async fn record_payment(
        &self,
        settlement_id: SettlementId,
        amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        let amount_minor = to_minor("amount", amount)?;
        validate_actor(actor)?;
        let settlement = self
            .ctx
            .bounded("record_payment", self.record_payment_tx(settlement_id, amount_minor, actor))
            .await?;

        tracing::info!(
            settlement_id,
            store_id = settlement.store_id,
            %amount,
            status = %settlement.status,
            "Settlement payment recorded"
        );
        let event = if settlement.status == SettlementStatus::Completed {
            LedgerEvent::SettlementCompleted {
                settlement: settlement.clone(),
            }
        } else {
            LedgerEvent::SettlementUpdated {
                settlement: settlement.clone(),
                store_pending_amount: None,
            }
        };
        self.ctx.events.publish(event);
        Ok(settlement)
    }

    async fn record_payment_tx(
        &self,
        settlement_id: SettlementId,
        amount: Minor,
        actor: &str,
    ) -> LedgerResult<Staged<Settlement>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        if !lock_settlement(&mut tx, settlement_id, now).await? {
            return Err(LedgerError::SettlementNotFound { settlement_id });
        }
        let position = read_position(&mut tx, settlement_id).await?;
        if position.status()? == SettlementStatus::Completed {
            return Err(LedgerError::AlreadyCompleted { settlement_id });
        }

        let remaining = position.total_transaction_amount - position.settled_amount;
        if amount > remaining {
            return Err(LedgerError::ExceedsRemaining {
                settlement_id,
                requested: from_minor(amount),
                remaining: from_minor(remaining),
            });
        }

        let settled = position.settled_amount + amount;
        let status = SettlementStatus::after_payment(settled, position.total_transaction_amount);
        sqlx::query(
            "UPDATE settlements SET settled_amount = ?1, pending_amount = total_transaction_amount - ?1, status = ?2 \
             WHERE settlement_id = ?3",
        )
        .bind(settled)
        .bind(status.as_str())
        .bind(settlement_id)
        .execute(&mut *tx)
        .await?;

        append_log(&mut tx, settlement_id, SettlementAction::Payment, amount, None, actor, now).await?;

        let settlement = fetch_settlement(&mut tx, settlement_id).await?;
        Ok((tx, settlement))
    }

    pub async fn store(&self, store_id: StoreId) -> LedgerResult<Store> {
        sqlx::query_as::<_, StoreRow>(
            "SELECT store_id, store_name, store_type, owner_name, mobile_number, email \
             FROM stores WHERE store_id = ?1",
        )
        .bind(store_id)
        .fetch_optional(&self.ctx.pool)
        .await?
        .map(Store::from)
        .ok_or(LedgerError::StoreNotFound { store_id })
    }

    pub async fn stores(&self) -> LedgerResult<Vec<Store>> {
        Ok(sqlx::query_as::<_, StoreRow>(
            "SELECT store_id, store_name, store_type, owner_name, mobile_number, email \
             FROM stores ORDER BY store_name",
        )
        .fetch_all(&self.ctx.pool)
        .await?
        .into_iter()
        .map(Store::from)
        .collect())
    }

    /// The store's unearmarked earnings
    pub async fn store_settlement(&self, store_id: StoreId) -> LedgerResult<StoreSettlement> {
        self.store(store_id).await?;
        let mut conn = self.ctx.pool.acquire().await?;
        let pending = store_pending(&mut conn, store_id).await?;
        Ok(StoreSettlement {
            store_id,
            pending_amount: from_minor(pending),
        })
    }

    /// Pool, open settlements and lifetime earnings of a store
    pub async fn store_summary(&self, store_id: StoreId) -> LedgerResult<StoreSummary> {
        self.store(store_id).await?;
        let (pending, open_settlements, owed, earned): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT \
             COALESCE((SELECT pending_amount FROM store_settlements WHERE store_id = ?1), 0), \
             (SELECT COUNT(*) FROM settlements WHERE store_id = ?1 AND status != 'completed'), \
             COALESCE((SELECT SUM(pending_amount) FROM settlements WHERE store_id = ?1 AND status != 'completed'), 0), \
             COALESCE((SELECT SUM(amount) FROM transactions WHERE store_id = ?1 AND status = 'completed'), 0)",
        )
        .bind(store_id)
        .fetch_one(&self.ctx.pool)
        .await?;
        Ok(StoreSummary {
            store_id,
            pending_amount: from_minor(pending),
            open_settlements,
            owed_on_settlements: from_minor(owed),
            total_earned: from_minor(earned),
        })
    }

    pub async fn settlement(&self, settlement_id: SettlementId) -> LedgerResult<Settlement> {
        let mut conn = self.ctx.pool.acquire().await?;
        fetch_settlement(&mut conn, settlement_id).await
    }

    /// Settlements, newest first, optionally for one store
    pub async fn settlements(&self, store_id: Option<StoreId>) -> LedgerResult<Vec<Settlement>> {
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements \
             WHERE ?1 IS NULL OR store_id = ?1 ORDER BY settlement_id DESC"
        );
        sqlx::query_as::<_, SettlementRow>(&sql)
            .bind(store_id)
            .fetch_all(&self.ctx.pool)
            .await?
            .into_iter()
            .map(Settlement::try_from)
            .collect()
    }

    /// Audit trail of a settlement, oldest first
    pub async fn settlement_logs(&self, settlement_id: SettlementId) -> LedgerResult<Vec<SettlementLog>> {
        sqlx::query_as::<_, SettlementLogRow>(
            "SELECT log_id, settlement_id, action, amount, notes, created_by, created_at \
             FROM settlement_logs WHERE settlement_id = ?1 ORDER BY log_id",
        )
        .bind(settlement_id)
        .fetch_all(&self.ctx.pool)
        .await?
        .into_iter()
        .map(SettlementLog::try_from)
        .collect()
    }
}
