//! SQLite-backed message store.

use crate::store::{HistoryPage, MessageStore, SoftDeleted};
use crate::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parley_core::error::ValidationError;
use parley_core::{
    GroupId, GroupRole, Identity, Message, MessageId, NewMessage, Reaction, ReactionOutcome,
    UserId, UserStatus, TOMBSTONE,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        online INTEGER NOT NULL DEFAULT 0,
        last_seen INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('admin', 'member')),
        PRIMARY KEY (group_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id INTEGER NOT NULL REFERENCES users(id),
        receiver_id INTEGER REFERENCES users(id),
        group_id INTEGER REFERENCES chat_groups(id),
        body TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'text',
        reply_to_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL,
        edited_at INTEGER,
        deleted_at INTEGER,
        is_read INTEGER NOT NULL DEFAULT 0,
        CHECK ((receiver_id IS NULL) <> (group_id IS NULL))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(group_id, id)",
    r#"
    CREATE TABLE IF NOT EXISTS message_reactions (
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (message_id, user_id)
    )
    "#,
];

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, group_id, body, kind, reply_to_id, \
     created_at, edited_at, deleted_at, is_read";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: i64,
    receiver_id: Option<i64>,
    group_id: Option<i64>,
    body: String,
    kind: String,
    reply_to_id: Option<i64>,
    created_at: i64,
    edited_at: Option<i64>,
    deleted_at: Option<i64>,
    is_read: bool,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(Message {
            id: MessageId::new(r.id),
            sender_id: UserId::new(r.sender_id),
            receiver_id: r.receiver_id.map(UserId::new),
            group_id: r.group_id.map(GroupId::new),
            body: r.body,
            kind: r
                .kind
                .parse()
                .map_err(|e: ValidationError| StoreError::Corrupt(e.to_string()))?,
            reply_to_id: r.reply_to_id.map(MessageId::new),
            created_at: from_millis(r.created_at)?,
            edited_at: r.edited_at.map(from_millis).transpose()?,
            deleted_at: r.deleted_at.map(from_millis).transpose()?,
            is_read: r.is_read,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReactionRow {
    message_id: i64,
    user_id: i64,
    user_name: String,
    kind: String,
    created_at: i64,
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = StoreError;

    fn try_from(r: ReactionRow) -> Result<Self> {
        Ok(Reaction {
            message_id: MessageId::new(r.message_id),
            user_id: UserId::new(r.user_id),
            user_name: r.user_name,
            kind: r.kind,
            created_at: from_millis(r.created_at)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn collect_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

/// Turn constraint violations into domain errors; everything else is a
/// backend failure.
fn constraint_error(e: sqlx::Error, what: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::NotFound(what.to_string())
        }
        sqlx::Error::Database(db) if db.is_check_violation() => {
            StoreError::Invalid(ValidationError::AmbiguousTarget)
        }
        _ => StoreError::Database(e),
    }
}

/// Message store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        info!("Opening message store at {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// A private in-memory database, mainly for tests.
    ///
    /// Uses a single pooled connection that is never recycled, since every
    /// SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist, and add the
    /// presence columns to a `users` table created before they existed.
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Applying message store schema");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        let has_last_seen: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('users') WHERE name = 'last_seen'",
        )
        .fetch_one(&self.pool)
        .await?;
        if has_last_seen == 0 {
            info!("Adding presence columns to users");
            sqlx::query("ALTER TABLE users ADD COLUMN online INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
            sqlx::query("ALTER TABLE users ADD COLUMN last_seen INTEGER")
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_message(&self, id: MessageId) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .map(Message::try_from)
            .transpose()
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_user(&self, id: UserId) -> Result<Option<Identity>> {
        let row: Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM users WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| Identity::new(id, name)))
    }

    async fn group_role(&self, group: GroupId, user: UserId) -> Result<Option<GroupRole>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM group_members WHERE group_id = ? AND user_id = ?")
                .bind(group.get())
                .bind(user.get())
                .fetch_optional(&self.pool)
                .await?;
        role.map(|r| {
            r.parse::<GroupRole>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let sql = format!(
            "INSERT INTO messages (sender_id, receiver_id, group_id, body, kind, reply_to_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {}",
            MESSAGE_COLUMNS
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message.sender_id.get())
            .bind(message.conversation.receiver_id().map(UserId::get))
            .bind(message.conversation.group_id().map(GroupId::get))
            .bind(&message.body)
            .bind(message.kind.as_str())
            .bind(message.reply_to_id.map(MessageId::get))
            .bind(message.created_at.timestamp_millis())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "message target"))?;
        row.try_into()
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.fetch_message(id).await
    }

    async fn edit_message(
        &self,
        id: MessageId,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let sql = format!(
            "UPDATE messages SET body = ?, edited_at = ? \
             WHERE id = ? AND deleted_at IS NULL AND edited_at IS NULL RETURNING {}",
            MESSAGE_COLUMNS
        );
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(body)
            .bind(edited_at.timestamp_millis())
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .map(Message::try_from)
            .transpose()
    }

    async fn soft_delete(
        &self,
        id: MessageId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<SoftDeleted>> {
        let sql = format!(
            "UPDATE messages SET body = ?, deleted_at = ? \
             WHERE id = ? AND deleted_at IS NULL RETURNING {}",
            MESSAGE_COLUMNS
        );
        let updated = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(TOMBSTONE)
            .bind(deleted_at.timestamp_millis())
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = updated {
            return Ok(Some(SoftDeleted {
                message: row.try_into()?,
                changed: true,
            }));
        }
        Ok(self.fetch_message(id).await?.map(|message| SoftDeleted {
            message,
            changed: false,
        }))
    }

    async fn conversation_history(
        &self,
        a: UserId,
        b: UserId,
        page: HistoryPage,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM messages \
             WHERE ((sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)) \
             AND (? IS NULL OR id < ?) ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            MESSAGE_COLUMNS
        );
        let before = page.before.map(MessageId::get);
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(a.get())
            .bind(b.get())
            .bind(b.get())
            .bind(a.get())
            .bind(before)
            .bind(before)
            .bind(i64::from(page.limit))
            .fetch_all(&self.pool)
            .await?;
        collect_messages(rows)
    }

    async fn group_history(&self, group: GroupId, page: HistoryPage) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM messages WHERE group_id = ? \
             AND (? IS NULL OR id < ?) ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            MESSAGE_COLUMNS
        );
        let before = page.before.map(MessageId::get);
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(group.get())
            .bind(before)
            .bind(before)
            .bind(i64::from(page.limit))
            .fetch_all(&self.pool)
            .await?;
        collect_messages(rows)
    }

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
        )
        .bind(sender.get())
        .bind(reader.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn toggle_reaction(
        &self,
        message: MessageId,
        user: UserId,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<ReactionOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT kind FROM message_reactions WHERE message_id = ? AND user_id = ?",
        )
        .bind(message.get())
        .bind(user.get())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(previous) if previous == kind => {
                sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
                    .bind(message.get())
                    .bind(user.get())
                    .execute(&mut *tx)
                    .await?;
                ReactionOutcome::Removed
            }
            previous => {
                // Upsert keeps one row per (message, user) even if another
                // writer slipped in between the read and this statement.
                sqlx::query(
                    "INSERT INTO message_reactions (message_id, user_id, kind, created_at) \
                     VALUES (?, ?, ?, ?) \
                     ON CONFLICT (message_id, user_id) \
                     DO UPDATE SET kind = excluded.kind, created_at = excluded.created_at",
                )
                .bind(message.get())
                .bind(user.get())
                .bind(kind)
                .bind(at.timestamp_millis())
                .execute(&mut *tx)
                .await
                .map_err(|e| constraint_error(e, "message"))?;
                match previous {
                    Some(previous) => ReactionOutcome::Replaced { previous },
                    None => ReactionOutcome::Added,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn reactions(&self, message: MessageId) -> Result<Vec<Reaction>> {
        let rows = sqlx::query_as::<_, ReactionRow>(
            "SELECT r.message_id, r.user_id, u.name AS user_name, r.kind, r.created_at \
             FROM message_reactions r JOIN users u ON u.id = r.user_id \
             WHERE r.message_id = ? ORDER BY r.created_at ASC, r.user_id ASC",
        )
        .bind(message.get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Reaction::try_from).collect()
    }

    async fn touch_presence(&self, user: UserId, online: bool, at: DateTime<Utc>) -> Result<()> {
        let at = at.timestamp_millis();
        let result = sqlx::query(
            "UPDATE users SET online = ?, last_seen = ? \
             WHERE id = ? AND (last_seen IS NULL OR last_seen <= ?)",
        )
        .bind(online)
        .bind(at)
        .bind(user.get())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && self.find_user(user).await?.is_none() {
            return Err(StoreError::NotFound(format!("user {}", user)));
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserStatus>> {
        let rows: Vec<(i64, String, bool, Option<i64>)> =
            sqlx::query_as("SELECT id, name, online, last_seen FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(id, name, online, last_seen)| {
                Ok(UserStatus {
                    identity: Identity::new(id, name),
                    online,
                    last_seen: last_seen.map(from_millis).transpose()?,
                })
            })
            .collect()
    }

    async fn create_user(&self, name: &str) -> Result<Identity> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO users (name, created_at) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(Utc::now().timestamp_millis())
                .fetch_one(&self.pool)
                .await?;
        Ok(Identity::new(id, name))
    }

    async fn create_group(&self, name: &str, creator: UserId) -> Result<GroupId> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_groups (name, created_by, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(creator.get())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| constraint_error(e, "group creator"))?;

        sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES (?, ?, ?)")
            .bind(id)
            .bind(creator.get())
            .bind(GroupRole::Admin.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(GroupId::new(id))
    }

    async fn add_group_member(
        &self,
        group: GroupId,
        user: UserId,
        role: GroupRole,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, role) VALUES (?, ?, ?) \
             ON CONFLICT (group_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(group.get())
        .bind(user.get())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "group or user"))?;
        Ok(())
    }
}
