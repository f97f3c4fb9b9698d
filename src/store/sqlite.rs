use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "id, username, email, hosting_token_encrypted, created_at, updated_at";

const REPOSITORY_COLUMNS: &str = "id, name, source_url, branch, price_cents, owner_id, is_transfer, \
     seller_id, seller_repository_id, transfer_intent_id, created_at";

const INTENT_COLUMNS: &str = "id, buyer_id, seller_id, seller_repository_id, source_url, branch, \
     destination_name, amount_cents, order_id, authorization_id, capture_id, destination_url, \
     transfer_repository_id, status, last_error, created_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        encrypted_hosting_token: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        source_url: row.get(2)?,
        branch: row.get(3)?,
        price_cents: row.get(4)?,
        owner_id: row.get(5)?,
        is_transfer: row.get(6)?,
        seller_id: row.get(7)?,
        seller_repository_id: row.get(8)?,
        transfer_intent_id: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn intent_from_row(row: &Row<'_>) -> rusqlite::Result<TransferIntent> {
    let status: String = row.get(13)?;
    let status = status.parse::<IntentStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(TransferIntent {
        id: row.get(0)?,
        buyer_id: row.get(1)?,
        seller_id: row.get(2)?,
        seller_repository_id: row.get(3)?,
        source_url: row.get(4)?,
        branch: row.get(5)?,
        destination_name: row.get(6)?,
        amount_cents: row.get(7)?,
        order_id: row.get(8)?,
        authorization_id: row.get(9)?,
        capture_id: row.get(10)?,
        destination_url: row.get(11)?,
        transfer_repository_id: row.get(12)?,
        status,
        last_error: row.get(14)?,
        created_at: parse_datetime(&row.get::<_, String>(15)?),
        updated_at: parse_datetime(&row.get::<_, String>(16)?),
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

fn insert_repository(conn: &Connection, repo: &Repository) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("INSERT INTO repositories ({REPOSITORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            repo.id,
            repo.name,
            repo.source_url,
            repo.branch,
            repo.price_cents,
            repo.owner_id,
            repo.is_transfer,
            repo.seller_id,
            repo.seller_repository_id,
            repo.transfer_intent_id,
            format_datetime(&repo.created_at),
        ],
    )
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                user.id,
                user.username,
                user.email,
                user.encrypted_hosting_token,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_user_token(&self, id: &str, encrypted_token: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET hosting_token_encrypted = ?1, updated_at = ?2 WHERE id = ?3",
            params![encrypted_token, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Repository operations

    fn create_repository(&self, repo: &Repository) -> Result<()> {
        match insert_repository(&self.conn(), repo) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::Conflict(e.to_string())),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
            params![id],
            repository_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_repository_by_url(
        &self,
        owner_id: &str,
        source_url: &str,
    ) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories
                 WHERE owner_id = ?1 AND source_url = ?2
                 ORDER BY created_at LIMIT 1"
            ),
            params![owner_id, source_url],
            repository_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_repositories(&self, owner_id: &str) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE owner_id = ?1 ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map(params![owner_id], repository_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_transfers_of(&self, seller_repository_id: &str) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories
             WHERE is_transfer = 1 AND seller_repository_id = ?1 ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map(params![seller_repository_id], repository_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_repository(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn record_transfer(&self, repo: &Repository, intent_id: Option<&str>) -> Result<Repository> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if let Some(intent_id) = intent_id {
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE transfer_intent_id = ?1"
                    ),
                    params![intent_id],
                    repository_from_row,
                )
                .optional()?;

            if let Some(existing) = existing {
                tx.commit()?;
                return Ok(existing);
            }
        }

        let buyer_exists = tx
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![repo.owner_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if !buyer_exists {
            return Err(Error::NotFound);
        }

        let mut row = repo.clone();
        row.transfer_intent_id = intent_id.map(str::to_string);
        insert_repository(&tx, &row)?;

        if let Some(intent_id) = intent_id {
            tx.execute(
                "UPDATE transfer_intents
                 SET status = ?1, transfer_repository_id = ?2, last_error = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![
                    IntentStatus::Recorded.as_str(),
                    row.id,
                    format_datetime(&Utc::now()),
                    intent_id
                ],
            )?;
        }

        tx.commit()?;
        Ok(row)
    }

    // Transfer intent operations

    fn create_intent(&self, intent: &TransferIntent) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO transfer_intents ({INTENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                intent.id,
                intent.buyer_id,
                intent.seller_id,
                intent.seller_repository_id,
                intent.source_url,
                intent.branch,
                intent.destination_name,
                intent.amount_cents,
                intent.order_id,
                intent.authorization_id,
                intent.capture_id,
                intent.destination_url,
                intent.transfer_repository_id,
                intent.status.as_str(),
                intent.last_error,
                format_datetime(&intent.created_at),
                format_datetime(&intent.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_intent(&self, id: &str) -> Result<Option<TransferIntent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {INTENT_COLUMNS} FROM transfer_intents WHERE id = ?1"),
            params![id],
            intent_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_intent_by_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<Option<TransferIntent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {INTENT_COLUMNS} FROM transfer_intents WHERE authorization_id = ?1"),
            params![authorization_id],
            intent_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_intent_by_order(&self, order_id: &str) -> Result<Option<TransferIntent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {INTENT_COLUMNS} FROM transfer_intents WHERE order_id = ?1"),
            params![order_id],
            intent_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_intent(&self, intent: &TransferIntent) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE transfer_intents
             SET destination_name = ?1, authorization_id = ?2, capture_id = ?3,
                 destination_url = ?4, transfer_repository_id = ?5, status = ?6,
                 last_error = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                intent.destination_name,
                intent.authorization_id,
                intent.capture_id,
                intent.destination_url,
                intent.transfer_repository_id,
                intent.status.as_str(),
                intent.last_error,
                format_datetime(&intent.updated_at),
                intent.id,
            ],
        );

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_constraint_violation(&e) => return Err(Error::AlreadyExists),
            Err(e) => return Err(Error::from(e)),
        };
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn list_intents_by_status(&self, status: IntentStatus) -> Result<Vec<TransferIntent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INTENT_COLUMNS} FROM transfer_intents WHERE status = ?1 ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map(params![status.as_str()], intent_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            &format!("INSERT INTO tokens ({TOKEN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.is_admin,
                token.user_id,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
                token.last_used_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn has_admin_token(&self) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
