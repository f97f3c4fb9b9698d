pub const SCHEMA: &str = r#"
-- Users are created on first account link and never hard-deleted
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    hosting_token_encrypted TEXT,     -- AES-256-GCM, base64(nonce || ciphertext)
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Listed repositories, both original uploads and transferred copies
CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source_url TEXT NOT NULL,
    branch TEXT NOT NULL DEFAULT 'main',
    price_cents INTEGER NOT NULL DEFAULT 0 CHECK (price_cents >= 0),
    owner_id TEXT NOT NULL REFERENCES users(id),

    -- Transfer provenance (set only when is_transfer = 1)
    is_transfer INTEGER NOT NULL DEFAULT 0,
    seller_id TEXT REFERENCES users(id),
    seller_repository_id TEXT,        -- not a foreign key: the seller may later delete the listing
    transfer_intent_id TEXT UNIQUE,

    created_at TEXT DEFAULT (datetime('now')),

    CHECK (is_transfer = 0 OR (seller_id IS NOT NULL AND seller_repository_id IS NOT NULL))
);

-- Settlement saga; written before funds are captured
CREATE TABLE IF NOT EXISTS transfer_intents (
    id TEXT PRIMARY KEY,
    buyer_id TEXT NOT NULL REFERENCES users(id),
    seller_id TEXT NOT NULL REFERENCES users(id),
    seller_repository_id TEXT NOT NULL,
    source_url TEXT NOT NULL,
    branch TEXT NOT NULL,
    destination_name TEXT NOT NULL,
    amount_cents INTEGER NOT NULL DEFAULT 0 CHECK (amount_cents >= 0),
    order_id TEXT UNIQUE,             -- NULL for free transfers
    authorization_id TEXT UNIQUE,     -- set once the buyer approves the order
    capture_id TEXT,
    destination_url TEXT,
    transfer_repository_id TEXT,
    status TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- API tokens; non-admin tokens belong to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of ID for fast lookup
    is_admin INTEGER NOT NULL DEFAULT 0,
    user_id TEXT REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    last_used_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_repositories_owner ON repositories(owner_id);
CREATE INDEX IF NOT EXISTS idx_repositories_seller_repo ON repositories(seller_repository_id);
CREATE INDEX IF NOT EXISTS idx_intents_status ON transfer_intents(status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
"#;
