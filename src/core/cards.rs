//! Card lifecycle management
//!
//! Issues cards, flips their active flag and resolves the card presented at a
//! scan. Two store-level constraints are the final arbiters here:
//!
//! - `cards.card_number UNIQUE` decides card-number collisions, so the random
//!   draw simply retries on a violation (bounded by `card_retry_cap`).
//! - the partial unique index `cards(member_id) WHERE is_active = 1` keeps at
//!   most one active card per member, even if two activations race past the
//!   application-side check.

use rand::Rng;
use sqlx::SqliteConnection;
use std::ops::Range;

use super::context::{LedgerContext, Staged};
use crate::db::rows::{CardRow, MemberRow, CARD_COLUMNS};
use crate::db::{is_unique_violation_on, now_millis};
use crate::types::member::validate_member_ref;
use crate::types::{
    Card, CardId, CardNumber, IssueCardRequest, LedgerError, LedgerResult, Member, MemberId,
};

/// Card Lifecycle Manager
#[derive(Debug, Clone)]
pub struct CardManager {
    ctx: LedgerContext,
}

impl CardManager {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Issue a new active card, registering the member on first issue
    ///
    /// The member row is upserted with the supplied identity fields and the
    /// member's account is created with a zero balance if it does not exist
    /// yet; a re-issued card keeps the member's existing balance.
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` - malformed reference or empty identity fields
    /// * `LedgerError::DuplicateActiveCard` - the member already holds an active card
    /// * `LedgerError::CardSpaceExhausted` - every drawn card number collided
    pub async fn issue_card(&self, request: IssueCardRequest) -> LedgerResult<Card> {
        request.validate()?;
        let card = self
            .ctx
            .bounded("issue_card", self.issue_card_tx(&request))
            .await?;
        tracing::info!(
            member_ref = %card.member_ref,
            card_id = card.card_id,
            card_number = card.card_number,
            "Issued card"
        );
        Ok(card)
    }

    async fn issue_card_tx(&self, request: &IssueCardRequest) -> LedgerResult<Staged<Card>> {
        let now = now_millis(self.ctx.now());
        let today = self.ctx.today();
        let mut tx = self.ctx.pool.begin().await?;

        // Write lock first; a new member touches no row here
        sqlx::query("UPDATE members SET updated_at = updated_at WHERE member_ref = ?1")
            .bind(&request.member_ref)
            .execute(&mut *tx)
            .await?;
        let existing: Option<CardId> = sqlx::query_scalar(
            "SELECT c.card_id FROM cards c JOIN members m ON m.member_id = c.member_id \
             WHERE m.member_ref = ?1 AND c.is_active = 1",
        )
        .bind(&request.member_ref)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(LedgerError::DuplicateActiveCard {
                member_ref: request.member_ref.clone(),
            });
        }

        let member_id: MemberId = sqlx::query_scalar(
            "INSERT INTO members (member_ref, name, group_name, guardian, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT(member_ref) DO UPDATE SET name = excluded.name, group_name = excluded.group_name, \
             guardian = COALESCE(excluded.guardian, members.guardian), updated_at = excluded.updated_at \
             RETURNING member_id",
        )
        .bind(&request.member_ref)
        .bind(request.name.trim())
        .bind(request.group_name.trim())
        .bind(&request.guardian)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let range = self.ctx.config.card_number_range();
        let cap = self.ctx.config.card_retry_cap;
        let mut issued = None;
        for attempt in 1..=cap {
            let candidate = draw_card_number(&range);
            let inserted = sqlx::query_scalar::<_, CardId>(
                "INSERT INTO cards (member_id, card_number, photo_ref, is_active, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 1, ?4, ?4) RETURNING card_id",
            )
            .bind(member_id)
            .bind(i64::from(candidate))
            .bind(&request.photo_ref)
            .bind(now)
            .fetch_one(&mut *tx)
            .await;

            match inserted {
                Ok(card_id) => {
                    issued = Some((card_id, candidate));
                    break;
                }
                Err(e) if is_unique_violation_on(&e, "card_number") => {
                    tracing::debug!(attempt, candidate, "Card number collision, drawing again");
                }
                Err(e) if is_unique_violation_on(&e, "member_id") => {
                    return Err(LedgerError::DuplicateActiveCard {
                        member_ref: request.member_ref.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some((card_id, card_number)) = issued else {
            tracing::warn!(attempts = cap, digits = self.ctx.config.card_digits, "Card number space exhausted");
            return Err(LedgerError::CardSpaceExhausted { attempts: cap });
        };

        sqlx::query(
            "INSERT INTO accounts (member_id, balance, opening_balance, daily_spent, last_spent_reset, updated_at) \
             VALUES (?1, 0, 0, 0, ?2, ?3) ON CONFLICT(member_id) DO NOTHING",
        )
        .bind(member_id)
        .bind(today)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let card = Card {
            card_id,
            member_id,
            member_ref: request.member_ref.clone(),
            card_number,
            photo_ref: request.photo_ref.clone(),
            is_active: true,
        };
        Ok((tx, card))
    }

    /// Activate or deactivate a card
    ///
    /// Deactivation never deletes the card. Activation is refused while another
    /// card of the same member is active; the check and the update run in one
    /// transaction that holds the write lock from its first statement.
    ///
    /// # Errors
    ///
    /// * `LedgerError::CardIdNotFound` - no card with this id
    /// * `LedgerError::ConflictingActiveCard` - a sibling card is already active
    pub async fn toggle_active(&self, card_id: CardId, desired_active: bool) -> LedgerResult<Card> {
        let card = self
            .ctx
            .bounded("toggle_active", self.toggle_active_tx(card_id, desired_active))
            .await?;
        tracing::info!(
            card_id,
            member_ref = %card.member_ref,
            active = card.is_active,
            "Card {}",
            if card.is_active { "activated" } else { "deactivated" }
        );
        Ok(card)
    }

    async fn toggle_active_tx(&self, card_id: CardId, desired_active: bool) -> LedgerResult<Staged<Card>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        let touched = sqlx::query("UPDATE cards SET updated_at = ?1 WHERE card_id = ?2")
            .bind(now)
            .bind(card_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(LedgerError::CardIdNotFound { card_id });
        }

        if desired_active {
            if let Some(active_card_id) = sibling_active_card_id(&mut tx, card_id).await? {
                return Err(LedgerError::ConflictingActiveCard {
                    card_id,
                    active_card_id,
                });
            }
        }

        let updated = sqlx::query("UPDATE cards SET is_active = ?1 WHERE card_id = ?2")
            .bind(desired_active)
            .bind(card_id)
            .execute(&mut *tx)
            .await;
        match updated {
            Ok(_) => {}
            Err(e) if is_unique_violation_on(&e, "member_id") => {
                let active_card_id = sibling_active_card_id(&mut tx, card_id)
                    .await?
                    .unwrap_or_default();
                return Err(LedgerError::ConflictingActiveCard {
                    card_id,
                    active_card_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let card = fetch_card(&mut tx, card_id)
            .await?
            .ok_or(LedgerError::CardIdNotFound { card_id })?;
        Ok((tx, card))
    }

    /// Resolve the card presented at a scan
    ///
    /// Succeeds only when the card number belongs to the member and is the
    /// active card. A stale (deactivated) card is rejected even when the member
    /// holds a different active card.
    pub async fn resolve_active_card(
        &self,
        member_ref: &str,
        card_number: CardNumber,
    ) -> LedgerResult<Card> {
        validate_member_ref(member_ref)?;
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards c JOIN members m ON m.member_id = c.member_id \
             WHERE m.member_ref = ?1 AND c.card_number = ?2 AND c.is_active = 1"
        );
        let row = sqlx::query_as::<_, CardRow>(&sql)
            .bind(member_ref)
            .bind(i64::from(card_number))
            .fetch_optional(&self.ctx.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => {
                tracing::warn!(member_ref, card_number, "Rejected scan of unknown or inactive card");
                Err(LedgerError::card_not_found(member_ref, card_number))
            }
        }
    }

    pub async fn member(&self, member_ref: &str) -> LedgerResult<Member> {
        validate_member_ref(member_ref)?;
        sqlx::query_as::<_, MemberRow>(
            "SELECT member_id, member_ref, name, group_name, guardian, daily_limit \
             FROM members WHERE member_ref = ?1",
        )
        .bind(member_ref)
        .fetch_optional(&self.ctx.pool)
        .await?
        .map(Member::from)
        .ok_or_else(|| LedgerError::member_not_found(member_ref))
    }

    /// The member's active card, if any
    pub async fn active_card(&self, member_ref: &str) -> LedgerResult<Option<Card>> {
        Ok(self
            .cards(member_ref)
            .await?
            .into_iter()
            .find(|card| card.is_active))
    }

    /// Every card ever issued to the member, active first, newest first
    pub async fn cards(&self, member_ref: &str) -> LedgerResult<Vec<Card>> {
        let member = self.member(member_ref).await?;
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards c JOIN members m ON m.member_id = c.member_id \
             WHERE c.member_id = ?1 ORDER BY c.is_active DESC, c.card_id DESC"
        );
        sqlx::query_as::<_, CardRow>(&sql)
            .bind(member.member_id)
            .fetch_all(&self.ctx.pool)
            .await?
            .into_iter()
            .map(Card::try_from)
            .collect()
    }
}

fn draw_card_number(range: &Range<u32>) -> CardNumber {
    rand::thread_rng().gen_range(range.clone())
}

pub(crate) async fn active_card_id(
    conn: &mut SqliteConnection,
    member_id: MemberId,
) -> LedgerResult<Option<CardId>> {
    Ok(
        sqlx::query_scalar("SELECT card_id FROM cards WHERE member_id = ?1 AND is_active = 1")
            .bind(member_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

async fn sibling_active_card_id(
    conn: &mut SqliteConnection,
    card_id: CardId,
) -> LedgerResult<Option<CardId>> {
    Ok(sqlx::query_scalar(
        "SELECT card_id FROM cards \
         WHERE member_id = (SELECT member_id FROM cards WHERE card_id = ?1) \
         AND is_active = 1 AND card_id != ?1",
    )
    .bind(card_id)
    .fetch_optional(&mut *conn)
    .await?)
}

async fn fetch_card(conn: &mut SqliteConnection, card_id: CardId) -> LedgerResult<Option<Card>> {
    let sql = format!(
        "SELECT {CARD_COLUMNS} FROM cards c JOIN members m ON m.member_id = c.member_id WHERE c.card_id = ?1"
    );
    sqlx::query_as::<_, CardRow>(&sql)
        .bind(card_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Card::try_from)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_stays_in_range() {
        let range = 10_000..100_000;
        for _ in 0..1_000 {
            assert!(range.contains(&draw_card_number(&range)));
        }
    }

    #[test]
    fn test_single_digit_range_has_nine_numbers() {
        let range = 1..10;
        let drawn: std::collections::HashSet<_> =
            (0..2_000).map(|_| draw_card_number(&range)).collect();
        assert!(drawn.iter().all(|n| (1..=9).contains(n)));
    }
}
