//! PostgreSQL store
//!
//! Runtime queries (no compile-time database connection). Every mutation is
//! one database transaction; commit-time checks run after `FOR UPDATE` locks
//! on the affected account and pool rows, so concurrent transfers from the
//! same sender (or into the same pool) serialize at the row lock and each
//! sees the previous one's committed rows under READ COMMITTED.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};

use super::{
    AccountStore, FeeStore, LedgerStore, LimitStore, PoolStore, Rejection, StoreError,
    TransferCommit,
};
use crate::account::{Account, AccountKind, OwnerChange};
use crate::cashpool::{CashPool, PoolStatus, PoolTerms};
use crate::core_types::{AccountAddress, OwnerId, TransactionId};
use crate::fee::FeeTier;
use crate::limit::{Period, SpendingLimit};
use crate::money::Amount;
use crate::transfer::{FundRequest, Transaction};

const ACCOUNT_COLUMNS: &str =
    "address, name, kind, quorum, total_owners, active, initial_deposit, created_at";

const TX_COLUMNS: &str = "id, sender, receiver, amount, fee, created_at, signature, \
     signer_fingerprint, reverses, committed_at";

const BALANCE_SQL: &str = r#"
SELECT a.initial_deposit
     + COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.receiver = a.address), 0)
     - COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.sender = a.address), 0)
       AS balance
FROM accounts a
WHERE a.address = $1
"#;

const COLLECTED_SQL: &str =
    "SELECT COALESCE(SUM(amount), 0) AS collected FROM transactions WHERE receiver = $1";

/// Window resolved by the database: `date_trunc` in UTC
const SPENT_SQL: &str = r#"
SELECT COALESCE(SUM(amount), 0) AS spent
FROM transactions
WHERE sender = $1
  AND committed_at >= (date_trunc($2, $3::timestamptz AT TIME ZONE 'UTC') AT TIME ZONE 'UTC')
"#;

/// Conditional `OPEN → FUNDED`; `$5` records the completing contribution
const FUND_POOL_SQL: &str = r#"
UPDATE cash_pools p
SET status = $2, updated_at = $3, funded_by = COALESCE($5, p.funded_by)
WHERE p.address = $1
  AND p.status = $4
  AND (SELECT COALESCE(SUM(t.amount), 0) FROM transactions t WHERE t.receiver = p.address)
      >= p.target_amount
"#;

/// Unique constraint backing the refund marker
const REVERSES_CONSTRAINT: &str = "transactions_reverses_key";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn owners_of<'e, E>(executor: E, address: &AccountAddress) -> Result<Vec<OwnerId>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let owners = sqlx::query_scalar::<_, i64>(
            "SELECT owner_id FROM account_owners WHERE address = $1 ORDER BY added_at, owner_id",
        )
        .bind(address.as_str())
        .fetch_all(executor)
        .await?;
        Ok(owners)
    }

    async fn insert_account_rows(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        account: &Account,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (address, name, kind, quorum, total_owners, active, initial_deposit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.address.as_str())
        .bind(&account.name)
        .bind(account.kind.id())
        .bind(account.quorum)
        .bind(account.total_owners)
        .bind(account.active)
        .bind(account.initial_deposit.as_decimal())
        .bind(account.created_at)
        .execute(&mut **tx)
        .await?;

        for owner in &account.owners {
            sqlx::query("INSERT INTO account_owners (address, owner_id) VALUES ($1, $2)")
                .bind(account.address.as_str())
                .bind(owner)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn load_account(&self, row: &PgRow) -> Result<Account, StoreError> {
        let mut account = row_to_account(row)?;
        account.owners = Self::owners_of(&self.pool, &account.address).await?;
        Ok(account)
    }
}

// === Row mapping ===

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Database(format!("corrupt {}: {}", what, detail))
}

fn amount_col(row: &PgRow, column: &str) -> Result<Amount, StoreError> {
    let value: Decimal = row.try_get(column)?;
    Amount::new(value).map_err(|e| corrupt(column, e))
}

fn address_col(row: &PgRow, column: &str) -> Result<AccountAddress, StoreError> {
    let value: String = row.try_get(column)?;
    AccountAddress::parse(&value).map_err(|e| corrupt(column, e))
}

fn tx_id_col(row: &PgRow, column: &str) -> Result<Option<TransactionId>, StoreError> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| s.parse::<TransactionId>().map_err(|e| corrupt(column, e)))
        .transpose()
}

fn row_to_account(row: &PgRow) -> Result<Account, StoreError> {
    let kind_id: i16 = row.try_get("kind")?;
    Ok(Account {
        address: address_col(row, "address")?,
        name: row.try_get("name")?,
        kind: AccountKind::from_id(kind_id).ok_or_else(|| corrupt("kind", kind_id))?,
        owners: Vec::new(),
        quorum: row.try_get("quorum")?,
        total_owners: row.try_get("total_owners")?,
        active: row.try_get("active")?,
        initial_deposit: amount_col(row, "initial_deposit")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        id: tx_id_col(row, "id")?.ok_or_else(|| corrupt("id", "null"))?,
        sender: address_col(row, "sender")?,
        receiver: address_col(row, "receiver")?,
        amount: amount_col(row, "amount")?,
        fee: amount_col(row, "fee")?,
        created_at: row.try_get("created_at")?,
        signature: row.try_get("signature")?,
        signer_fingerprint: row.try_get("signer_fingerprint")?,
        reverses: tx_id_col(row, "reverses")?,
        committed_at: row.try_get("committed_at")?,
    })
}

fn row_to_fee_tier(row: &PgRow) -> Result<FeeTier, StoreError> {
    Ok(FeeTier {
        min_amount: amount_col(row, "min_amount")?,
        max_amount: amount_col(row, "max_amount")?,
        fee: amount_col(row, "fee")?,
        effective_from: row.try_get("effective_from")?,
        effective_to: row.try_get("effective_to")?,
    })
}

fn row_to_fund_request(row: &PgRow) -> Result<FundRequest, StoreError> {
    Ok(FundRequest {
        id: tx_id_col(row, "id")?.ok_or_else(|| corrupt("id", "null"))?,
        requester: address_col(row, "requester")?,
        payer: address_col(row, "payer")?,
        amount: amount_col(row, "amount")?,
        created_at: row.try_get("created_at")?,
        signature: row.try_get("signature")?,
    })
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_account_rows(&mut tx, account).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE address = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_account(&row).await?)),
            None => Ok(None),
        }
    }

    async fn system_account(&self) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE kind = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(AccountKind::System.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_account(&row).await?)),
            None => Ok(None),
        }
    }

    async fn add_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError> {
        let mut tx = self.pool.begin().await?;

        let total_owners: i16 = sqlx::query_scalar(
            "SELECT total_owners FROM accounts WHERE address = $1 FOR UPDATE",
        )
        .bind(address.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(address.to_string()))?;

        let owners = Self::owners_of(&mut *tx, address).await?;
        if owners.contains(&owner) {
            return Ok(OwnerChange::Unchanged);
        }
        if owners.len() >= total_owners as usize {
            return Ok(OwnerChange::SeatsFull);
        }

        sqlx::query("INSERT INTO account_owners (address, owner_id) VALUES ($1, $2)")
            .bind(address.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(OwnerChange::Applied)
    }

    async fn remove_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<OwnerChange, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT address FROM accounts WHERE address = $1 FOR UPDATE")
            .bind(address.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;

        let owners = Self::owners_of(&mut *tx, address).await?;
        if !owners.contains(&owner) {
            return Ok(OwnerChange::Unchanged);
        }
        if owners.len() == 1 {
            return Ok(OwnerChange::LastOwner);
        }

        sqlx::query("DELETE FROM account_owners WHERE address = $1 AND owner_id = $2")
            .bind(address.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(OwnerChange::Applied)
    }

    async fn is_owner(
        &self,
        address: &AccountAddress,
        owner: OwnerId,
    ) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM account_owners WHERE address = $1 AND owner_id = $2)",
        )
        .bind(address.as_str())
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn set_active(
        &self,
        address: &AccountAddress,
        active: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE accounts SET active = $2 WHERE address = $1")
            .bind(address.as_str())
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn balance(&self, address: &AccountAddress) -> Result<Amount, StoreError> {
        let row = sqlx::query(BALANCE_SQL)
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        amount_col(&row, "balance")
    }

    async fn register_key(&self, owner: OwnerId, public_key: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO identities (owner_id, public_key, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (owner_id) DO UPDATE
                SET public_key = EXCLUDED.public_key, updated_at = NOW()
            "#,
        )
        .bind(owner)
        .bind(public_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn public_key(&self, owner: OwnerId) -> Result<Option<Vec<u8>>, StoreError> {
        let key = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT public_key FROM identities WHERE owner_id = $1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn commit_transfer(&self, commit: &TransferCommit) -> Result<Transaction, StoreError> {
        let t = &commit.transaction;
        let mut tx = self.pool.begin().await?;

        // Lock both accounts in address order (one statement, deterministic order)
        let rows = sqlx::query(
            "SELECT address, active FROM accounts WHERE address = ANY($1) ORDER BY address FOR UPDATE",
        )
        .bind(vec![t.sender.to_string(), t.receiver.to_string()])
        .fetch_all(&mut *tx)
        .await?;

        let mut active = HashMap::with_capacity(2);
        for row in &rows {
            active.insert(row.try_get::<String, _>("address")?, row.try_get::<bool, _>("active")?);
        }
        for address in [&t.sender, &t.receiver] {
            match active.get(address.as_str()) {
                None => return Err(Rejection::AccountNotFound(address.clone()).into()),
                Some(false) => return Err(Rejection::AccountFrozen(address.clone()).into()),
                Some(true) => {}
            }
        }

        if let Some(original) = t.reverses {
            let already = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM transactions WHERE reverses = $1)",
            )
            .bind(original.to_string())
            .fetch_one(&mut *tx)
            .await?;
            if already {
                return Err(Rejection::AlreadyReversed.into());
            }
        }

        let balance_row = sqlx::query(BALANCE_SQL)
            .bind(t.sender.as_str())
            .fetch_one(&mut *tx)
            .await?;
        if amount_col(&balance_row, "balance")? < t.amount {
            return Err(Rejection::InsufficientFunds.into());
        }

        if let Some(limit) = commit.limit {
            let spent_row = sqlx::query(SPENT_SQL)
                .bind(t.sender.as_str())
                .bind(limit.period.as_str())
                .bind(t.committed_at)
                .fetch_one(&mut *tx)
                .await?;
            let spent: Decimal = spent_row.try_get("spent")?;
            if spent + t.amount.as_decimal() > limit.cap.as_decimal() {
                return Err(Rejection::LimitExceeded.into());
            }
        }

        // Pool funds leave only as refunds (while open) or as payout (once funded)
        let sender_pool = sqlx::query(
            "SELECT status, receiver FROM cash_pools WHERE address = $1 FOR UPDATE",
        )
        .bind(t.sender.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = sender_pool {
            let status_id: i16 = row.try_get("status")?;
            let status = PoolStatus::from_id(status_id).ok_or_else(|| corrupt("status", status_id))?;
            let payout_to = address_col(&row, "receiver")?;
            let allowed = match t.reverses {
                Some(_) => status == PoolStatus::Open,
                None => status == PoolStatus::Funded && t.receiver == payout_to,
            };
            if !allowed {
                return Err(Rejection::PoolLocked.into());
            }
        }

        if t.reverses.is_none() {
            let receiver_pool = sqlx::query(
                "SELECT status, target_amount, expires_at FROM cash_pools WHERE address = $1 FOR UPDATE",
            )
            .bind(t.receiver.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = receiver_pool {
                let status_id: i16 = row.try_get("status")?;
                let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
                if status_id != PoolStatus::Open.id() || t.committed_at > expires_at {
                    return Err(Rejection::PoolClosed.into());
                }
                let target = amount_col(&row, "target_amount")?;
                let collected_row = sqlx::query(COLLECTED_SQL)
                    .bind(t.receiver.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
                let collected: Decimal = collected_row.try_get("collected")?;
                if collected + t.amount.as_decimal() > target.as_decimal() {
                    return Err(Rejection::PoolTargetExceeded.into());
                }
            }
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            TX_COLUMNS
        ))
        .bind(t.id.to_string())
        .bind(t.sender.as_str())
        .bind(t.receiver.as_str())
        .bind(t.amount.as_decimal())
        .bind(t.fee.as_decimal())
        .bind(t.created_at)
        .bind(&t.signature)
        .bind(&t.signer_fingerprint)
        .bind(t.reverses.map(|id| id.to_string()))
        .bind(t.committed_at)
        .execute(&mut *tx)
        .await;

        match inserted.map_err(StoreError::from) {
            Err(StoreError::Duplicate(constraint)) if constraint == REVERSES_CONSTRAINT => {
                return Err(Rejection::AlreadyReversed.into());
            }
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        // Funded flip in the same database transaction as the deposit; the
        // pool row is already locked above
        if t.reverses.is_none() {
            let flipped = sqlx::query(FUND_POOL_SQL)
                .bind(t.receiver.as_str())
                .bind(PoolStatus::Funded.id())
                .bind(t.committed_at)
                .bind(PoolStatus::Open.id())
                .bind(Some(t.id.to_string()))
                .execute(&mut *tx)
                .await?;
            if flipped.rows_affected() > 0 {
                tracing::info!(pool = %t.receiver, transaction_id = %t.id, "Cash pool funded");
            }
        }

        tx.commit().await?;
        Ok(t.clone())
    }

    async fn transactions_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE sender = $1 OR receiver = $1 ORDER BY committed_at, id",
            TX_COLUMNS
        ))
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn insert_fund_request(&self, request: &FundRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fund_requests (id, requester, payer, amount, created_at, signature)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.requester.as_str())
        .bind(request.payer.as_str())
        .bind(request.amount.as_decimal())
        .bind(request.created_at)
        .bind(&request.signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fund_requests_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<FundRequest>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, requester, payer, amount, created_at, signature
            FROM fund_requests
            WHERE requester = $1 OR payer = $1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fund_request).collect()
    }
}

#[async_trait]
impl PoolStore for PgStore {
    async fn insert_pool(&self, account: &Account, terms: &PoolTerms) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_account_rows(&mut tx, account).await?;

        sqlx::query(
            r#"
            INSERT INTO cash_pools (address, description, target_amount, receiver, expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.address.as_str())
        .bind(&terms.description)
        .bind(terms.target_amount.as_decimal())
        .bind(terms.receiver.as_str())
        .bind(terms.expires_at)
        .bind(PoolStatus::Open.id())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_pool(&self, address: &AccountAddress) -> Result<Option<CashPool>, StoreError> {
        let Some(account) = self.get_account(address).await? else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT p.description, p.target_amount, p.receiver, p.expires_at, p.status, p.funded_by,
                   COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.receiver = p.address), 0)
                       AS collected
            FROM cash_pools p
            WHERE p.address = $1
            "#,
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status_id: i16 = row.try_get("status")?;

        Ok(Some(CashPool {
            account,
            terms: PoolTerms {
                description: row.try_get("description")?,
                target_amount: amount_col(&row, "target_amount")?,
                receiver: address_col(&row, "receiver")?,
                expires_at: row.try_get("expires_at")?,
            },
            status: PoolStatus::from_id(status_id).ok_or_else(|| corrupt("status", status_id))?,
            collected: amount_col(&row, "collected")?,
            funded_by: tx_id_col(&row, "funded_by")?,
        }))
    }

    async fn mark_pool_funded(
        &self,
        address: &AccountAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(FUND_POOL_SQL)
            .bind(address.as_str())
            .bind(PoolStatus::Funded.id())
            .bind(now)
            .bind(PoolStatus::Open.id())
            .bind(None::<String>)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_open_pools(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AccountAddress>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.address
            FROM cash_pools p
            WHERE p.status = $1
              AND p.expires_at < $2
              AND (SELECT COALESCE(SUM(t.amount), 0) FROM transactions t WHERE t.receiver = p.address)
                  < p.target_amount
            ORDER BY p.expires_at, p.address
            LIMIT $3
            "#,
        )
        .bind(PoolStatus::Open.id())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| address_col(r, "address")).collect()
    }

    async fn unreversed_contributions(
        &self,
        address: &AccountAddress,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transactions t
            WHERE t.receiver = $1
              AND t.reverses IS NULL
              AND NOT EXISTS (SELECT 1 FROM transactions r WHERE r.reverses = t.id)
            ORDER BY t.committed_at, t.id
            "#,
            TX_COLUMNS
        ))
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn mark_pool_refunded(
        &self,
        address: &AccountAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cash_pools p
            SET status = $2, updated_at = $3
            WHERE p.address = $1
              AND p.status = $4
              AND p.expires_at < $3
              AND NOT EXISTS (
                  SELECT 1 FROM transactions t
                  WHERE t.receiver = p.address
                    AND t.reverses IS NULL
                    AND NOT EXISTS (SELECT 1 FROM transactions r WHERE r.reverses = t.id)
              )
            "#,
        )
        .bind(address.as_str())
        .bind(PoolStatus::Refunded.id())
        .bind(now)
        .bind(PoolStatus::Open.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LimitStore for PgStore {
    async fn get_limit(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<SpendingLimit>, StoreError> {
        let row = sqlx::query("SELECT address, period, cap FROM spending_limits WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let period_id: i16 = row.try_get("period")?;
        Ok(Some(SpendingLimit {
            address: address_col(&row, "address")?,
            period: Period::from_id(period_id).ok_or_else(|| corrupt("period", period_id))?,
            cap: amount_col(&row, "cap")?,
        }))
    }

    async fn upsert_limit(&self, limit: &SpendingLimit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO spending_limits (address, period, cap, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (address) DO UPDATE
                SET period = EXCLUDED.period, cap = EXCLUDED.cap, updated_at = NOW()
            "#,
        )
        .bind(limit.address.as_str())
        .bind(limit.period.id())
        .bind(limit.cap.as_decimal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn spent_in_period(
        &self,
        address: &AccountAddress,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Amount, StoreError> {
        let row = sqlx::query(SPENT_SQL)
            .bind(address.as_str())
            .bind(period.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        amount_col(&row, "spent")
    }
}

#[async_trait]
impl FeeStore for PgStore {
    async fn fee_tier_for(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<FeeTier>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT min_amount, max_amount, fee, effective_from, effective_to
            FROM fee_tiers
            WHERE min_amount <= $1 AND $1 < max_amount
              AND effective_from <= $2 AND $2 < effective_to
            ORDER BY tier_id
            LIMIT 1
            "#,
        )
        .bind(amount.as_decimal())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_fee_tier).transpose()
    }

    async fn active_fee_tiers(&self, now: DateTime<Utc>) -> Result<Vec<FeeTier>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT min_amount, max_amount, fee, effective_from, effective_to
            FROM fee_tiers
            WHERE effective_from <= $1 AND $1 < effective_to
            ORDER BY tier_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fee_tier).collect()
    }

    async fn insert_fee_tier(&self, tier: &FeeTier) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fee_tiers (min_amount, max_amount, fee, effective_from, effective_to)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tier.min_amount.as_decimal())
        .bind(tier.max_amount.as_decimal())
        .bind(tier.fee.as_decimal())
        .bind(tier.effective_from)
        .bind(tier.effective_to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
