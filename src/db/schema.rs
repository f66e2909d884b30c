//! Ledger schema
//!
//! Every statement is idempotent. Amounts are NUMERIC(30, 8); timestamps are
//! TIMESTAMPTZ. Balances and pool collected amounts are never stored.

use sqlx::PgPool;

const CREATE_IDENTITIES: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    owner_id    BIGINT PRIMARY KEY,
    public_key  BYTEA NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    address          VARCHAR(37) PRIMARY KEY,
    name             TEXT NOT NULL,
    kind             SMALLINT NOT NULL,
    quorum           SMALLINT NOT NULL CHECK (quorum >= 1),
    total_owners     SMALLINT NOT NULL CHECK (total_owners >= quorum),
    active           BOOLEAN NOT NULL DEFAULT TRUE,
    initial_deposit  NUMERIC(30, 8) NOT NULL DEFAULT 0 CHECK (initial_deposit >= 0),
    created_at       TIMESTAMPTZ NOT NULL
)"#;

/// Exactly one system identity
const CREATE_SINGLE_SYSTEM_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS accounts_single_system ON accounts (kind) WHERE kind = 9
"#;

const CREATE_ACCOUNT_OWNERS: &str = r#"
CREATE TABLE IF NOT EXISTS account_owners (
    address   VARCHAR(37) NOT NULL REFERENCES accounts (address),
    owner_id  BIGINT NOT NULL,
    added_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (address, owner_id)
)"#;

const CREATE_CASH_POOLS: &str = r#"
CREATE TABLE IF NOT EXISTS cash_pools (
    address        VARCHAR(37) PRIMARY KEY REFERENCES accounts (address),
    description    TEXT NOT NULL DEFAULT '',
    target_amount  NUMERIC(30, 8) NOT NULL CHECK (target_amount > 0),
    receiver       VARCHAR(37) NOT NULL REFERENCES accounts (address),
    expires_at     TIMESTAMPTZ NOT NULL,
    status         SMALLINT NOT NULL DEFAULT 0,
    funded_by      VARCHAR(26),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                  VARCHAR(26) PRIMARY KEY,
    sender              VARCHAR(37) NOT NULL REFERENCES accounts (address),
    receiver            VARCHAR(37) NOT NULL REFERENCES accounts (address),
    amount              NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    fee                 NUMERIC(30, 8) NOT NULL DEFAULT 0,
    created_at          TIMESTAMPTZ NOT NULL,
    signature           BYTEA NOT NULL,
    signer_fingerprint  VARCHAR(64),
    reverses            VARCHAR(26) UNIQUE REFERENCES transactions (id),
    committed_at        TIMESTAMPTZ NOT NULL,
    CHECK (sender <> receiver)
)"#;

const CREATE_TRANSACTION_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS transactions_sender_committed ON transactions (sender, committed_at)",
    "CREATE INDEX IF NOT EXISTS transactions_receiver ON transactions (receiver)",
];

const CREATE_FUND_REQUESTS: &str = r#"
CREATE TABLE IF NOT EXISTS fund_requests (
    id           VARCHAR(26) PRIMARY KEY,
    requester    VARCHAR(37) NOT NULL REFERENCES accounts (address),
    payer        VARCHAR(37) NOT NULL REFERENCES accounts (address),
    amount       NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    created_at   TIMESTAMPTZ NOT NULL,
    signature    BYTEA NOT NULL,
    recorded_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_SPENDING_LIMITS: &str = r#"
CREATE TABLE IF NOT EXISTS spending_limits (
    address     VARCHAR(37) PRIMARY KEY REFERENCES accounts (address),
    period      SMALLINT NOT NULL,
    cap         NUMERIC(30, 8) NOT NULL CHECK (cap >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_FEE_TIERS: &str = r#"
CREATE TABLE IF NOT EXISTS fee_tiers (
    tier_id         BIGSERIAL PRIMARY KEY,
    min_amount      NUMERIC(30, 8) NOT NULL,
    max_amount      NUMERIC(30, 8) NOT NULL,
    fee             NUMERIC(30, 8) NOT NULL CHECK (fee >= 0),
    effective_from  TIMESTAMPTZ NOT NULL,
    effective_to    TIMESTAMPTZ NOT NULL,
    CHECK (min_amount < max_amount),
    CHECK (effective_from < effective_to)
)"#;

/// Statements in dependency order
pub fn statements() -> Vec<&'static str> {
    let mut all = vec![
        CREATE_IDENTITIES,
        CREATE_ACCOUNTS,
        CREATE_SINGLE_SYSTEM_INDEX,
        CREATE_ACCOUNT_OWNERS,
        CREATE_CASH_POOLS,
        CREATE_TRANSACTIONS,
    ];
    all.extend(CREATE_TRANSACTION_INDEXES);
    all.extend([CREATE_FUND_REQUESTS, CREATE_SPENDING_LIMITS, CREATE_FEE_TIERS]);
    all
}

/// Apply the schema inside one transaction
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Applying ledger schema");
    let mut tx = pool.begin().await?;
    for stmt in statements() {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}
