//! Ledger engine
//!
//! This module provides the `LedgerEngine` that wires the ledger components to
//! one database, configuration, clock and event bus, and exposes every
//! inbound operation in one place.
//!
//! The components can also be used on their own through the accessors
//! ([`LedgerEngine::cards`], [`LedgerEngine::ledger`], ...); they share the
//! same context, so an operation through either path behaves identically.

use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::cards::CardManager;
use super::clock::{Clock, SystemClock};
use super::context::LedgerContext;
use super::daily_limit::DailyLimits;
use super::ledger::BalanceLedger;
use super::maintenance::{Maintenance, MaintenanceScheduler};
use super::settlement::Settlements;
use crate::config::LedgerConfig;
use crate::db;
use crate::types::{
    Card, CardId, CardNumber, DebitOutcome, DebitRequest, IssueCardRequest, LedgerError,
    LedgerEvent, LedgerOperation, LedgerResult, RechargeRequest, RegisterStoreRequest, Settlement,
    SettlementId, Store, StoreId,
};

/// Campus card ledger engine
///
/// Cheap to clone; clones share the connection pool and event bus.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    ctx: LedgerContext,
    cards: CardManager,
    ledger: BalanceLedger,
    limits: DailyLimits,
    settlements: Settlements,
    maintenance: Maintenance,
}

impl LedgerEngine {
    /// Open the ledger database at `path` using the system clock
    ///
    /// # Arguments
    ///
    /// * `path` - SQLite database file, created and migrated if needed
    /// * `config` - Engine configuration, validated before anything is opened
    pub async fn open(path: &Path, config: LedgerConfig) -> LedgerResult<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock)).await
    }

    /// Open the ledger database with an explicit clock
    pub async fn open_with_clock(
        path: &Path,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let pool = db::connect(path).await?;
        Ok(Self::from_pool(pool, config, clock))
    }

    /// Build an engine over an already migrated pool
    pub fn from_pool(pool: SqlitePool, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let ctx = LedgerContext::new(pool, config, clock);
        LedgerEngine {
            cards: CardManager::new(ctx.clone()),
            ledger: BalanceLedger::new(ctx.clone()),
            limits: DailyLimits::new(ctx.clone()),
            settlements: Settlements::new(ctx.clone()),
            maintenance: Maintenance::new(ctx.clone()),
            ctx,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        self.ctx.config()
    }

    pub fn cards(&self) -> &CardManager {
        &self.cards
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn limits(&self) -> &DailyLimits {
        &self.limits
    }

    pub fn settlements(&self) -> &Settlements {
        &self.settlements
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ctx.events().subscribe()
    }

    /// Scheduler running the maintenance jobs until `shutdown` is cancelled
    pub fn scheduler(&self, shutdown: CancellationToken) -> MaintenanceScheduler {
        MaintenanceScheduler::new(self.ctx.clone(), shutdown)
    }

    pub async fn issue_card(&self, request: IssueCardRequest) -> LedgerResult<Card> {
        self.cards.issue_card(request).await
    }

    pub async fn toggle_active(&self, card_id: CardId, desired_active: bool) -> LedgerResult<Card> {
        self.cards.toggle_active(card_id, desired_active).await
    }

    pub async fn resolve_active_card(
        &self,
        member_ref: &str,
        card_number: CardNumber,
    ) -> LedgerResult<Card> {
        self.cards.resolve_active_card(member_ref, card_number).await
    }

    pub async fn recharge(&self, request: RechargeRequest) -> LedgerResult<Decimal> {
        self.ledger.recharge(request).await
    }

    pub async fn debit(&self, request: DebitRequest) -> LedgerResult<DebitOutcome> {
        self.ledger.debit(request).await
    }

    pub async fn set_daily_limit(
        &self,
        member_ref: &str,
        limit: Option<Decimal>,
        actor: &str,
    ) -> LedgerResult<Option<Decimal>> {
        self.limits.set_daily_limit(member_ref, limit, actor).await
    }

    pub async fn register_store(&self, request: RegisterStoreRequest) -> LedgerResult<Store> {
        self.settlements.register_store(request).await
    }

    pub async fn request_settlement(
        &self,
        store_id: StoreId,
        amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        self.settlements.request_settlement(store_id, amount, actor).await
    }

    pub async fn amend_amount(
        &self,
        settlement_id: SettlementId,
        new_amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        self.settlements.amend_amount(settlement_id, new_amount, actor).await
    }

    pub async fn record_payment(
        &self,
        settlement_id: SettlementId,
        amount: Decimal,
        actor: &str,
    ) -> LedgerResult<Settlement> {
        self.settlements.record_payment(settlement_id, amount, actor).await
    }

    /// Apply a single replayed operation
    ///
    /// Routes the operation to the component that owns it. Card activation
    /// and deactivation are addressed by member and card number here and
    /// resolved to the card id first.
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation returns; the engine state is
    /// unchanged by a failed operation.
    pub async fn apply(&self, operation: LedgerOperation) -> LedgerResult<()> {
        match operation {
            LedgerOperation::IssueCard(request) => {
                self.issue_card(request).await?;
            }
            LedgerOperation::ActivateCard {
                member_ref,
                card_number,
            } => {
                let card = self.find_card(&member_ref, Some(card_number)).await?;
                self.toggle_active(card.card_id, true).await?;
            }
            LedgerOperation::DeactivateCard {
                member_ref,
                card_number,
            } => {
                let card = self.find_card(&member_ref, card_number).await?;
                self.toggle_active(card.card_id, false).await?;
            }
            LedgerOperation::Recharge(request) => {
                self.recharge(request).await?;
            }
            LedgerOperation::SetDailyLimit {
                member_ref,
                limit,
                actor,
            } => {
                self.set_daily_limit(&member_ref, limit, &actor).await?;
            }
            LedgerOperation::RegisterStore(request) => {
                self.register_store(request).await?;
            }
            LedgerOperation::Debit(request) => {
                self.debit(request).await?;
            }
            LedgerOperation::RequestSettlement {
                store_id,
                amount,
                actor,
            } => {
                self.request_settlement(store_id, amount, &actor).await?;
            }
            LedgerOperation::AmendSettlement {
                settlement_id,
                amount,
                actor,
            } => {
                self.amend_amount(settlement_id, amount, &actor).await?;
            }
            LedgerOperation::RecordPayment {
                settlement_id,
                amount,
                actor,
            } => {
                self.record_payment(settlement_id, amount, &actor).await?;
            }
            LedgerOperation::DailyReset => {
                self.maintenance.run_daily_reset().await?;
            }
            LedgerOperation::RetentionPurge => {
                self.maintenance.run_retention_purge().await?;
            }
        }
        Ok(())
    }

    /// The member's card with `card_number`, or their active card
    async fn find_card(&self, member_ref: &str, card_number: Option<CardNumber>) -> LedgerResult<Card> {
        let cards = self.cards.cards(member_ref).await?;
        let found = match card_number {
            Some(number) => cards.into_iter().find(|card| card.card_number == number),
            None => cards.into_iter().find(|card| card.is_active),
        };
        found.ok_or_else(|| match card_number {
            Some(number) => LedgerError::card_not_found(member_ref, number),
            None => LedgerError::card_not_found(member_ref, "(active)"),
        })
    }

    /// Close the connection pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.ctx.pool.close().await;
    }
}
