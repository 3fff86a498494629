use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0} not found!")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                api_key TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS followers (
                follower_id INTEGER NOT NULL,
                followed_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (follower_id, followed_id),
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (followed_id) REFERENCES users(id) ON DELETE CASCADE,
                CHECK (follower_id != followed_id)
            );

            CREATE TABLE IF NOT EXISTS tweets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS likes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tweet_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (tweet_id) REFERENCES tweets(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE(tweet_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS medias (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                tweet_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (tweet_id) REFERENCES tweets(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tweets_user_id ON tweets(user_id);
            CREATE INDEX IF NOT EXISTS idx_likes_tweet_id ON likes(tweet_id);
            CREATE INDEX IF NOT EXISTS idx_medias_tweet_id ON medias(tweet_id);
            CREATE INDEX IF NOT EXISTS idx_followers_followed_id ON followers(followed_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.lock()?;
        user.created_at = Utc::now();

        conn.execute(
            "INSERT INTO users (name, api_key, created_at) VALUES (?1, ?2, ?3)",
            params![&user.name, &user.api_key, user.created_at.to_rfc3339()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("API key is already taken".to_string())
            } else {
                StoreError::Database(e)
            }
        })?;
        user.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_user_by_api_key(&self, api_key: &str) -> StoreResult<User> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM users WHERE api_key = ?1",
            params![api_key],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("API key".to_string()),
            _ => StoreError::Database(e),
        })
    }

    pub fn count_users(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Load a user together with who follows them and whom they follow
    pub fn get_user_profile(&self, id: i64) -> StoreResult<UserProfile> {
        let conn = self.lock()?;
        let user = fetch_user(&conn, id)?;

        let followers = query_summaries(
            &conn,
            r#"SELECT u.id, u.name FROM followers f JOIN users u ON u.id = f.follower_id
               WHERE f.followed_id = ?1 ORDER BY u.id ASC"#,
            id,
        )?;
        let following = query_summaries(
            &conn,
            r#"SELECT u.id, u.name FROM followers f JOIN users u ON u.id = f.followed_id
               WHERE f.follower_id = ?1 ORDER BY u.id ASC"#,
            id,
        )?;

        Ok(UserProfile {
            id: user.id,
            name: user.name,
            followers,
            following,
        })
    }

    /// Delete a user with their tweets, the likes they placed and their follow
    /// edges. Returns the file names of media rows removed with the tweets.
    pub fn delete_user(&self, id: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let file_names = {
            let mut stmt = tx.prepare(
                r#"SELECT m.file_name FROM medias m JOIN tweets t ON t.id = m.tweet_id
                   WHERE t.user_id = ?1 ORDER BY m.id ASC"#,
            )?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let rows = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User '{}'", id)));
        }

        tx.commit()?;
        Ok(file_names)
    }

    // ==================== Follow Operations ====================

    pub fn create_follow(&self, follower_id: i64, followed_id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        fetch_user(&conn, followed_id)?;

        if follower_id == followed_id {
            return Err(StoreError::InvalidInput("You can't follow yourself!".to_string()));
        }

        conn.execute(
            "INSERT INTO followers (follower_id, followed_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower_id, followed_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("You already follow user '{}'!", followed_id))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    /// Remove a follow edge. Absent edges are not an error.
    pub fn delete_follow(&self, follower_id: i64, followed_id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
        )?;
        Ok(())
    }

    // ==================== Tweet Operations ====================

    /// Insert a tweet and claim the given unattached media in one transaction.
    /// Any unknown or already attached media id rolls the whole insert back.
    /// Repeated ids in `media_ids` count once.
    pub fn create_tweet(&self, tweet: &mut Tweet, media_ids: &[i64]) -> StoreResult<()> {
        let media_ids: BTreeSet<i64> = media_ids.iter().copied().collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tweet.created_at = Utc::now();

        tx.execute(
            "INSERT INTO tweets (user_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![tweet.user_id, &tweet.content, tweet.created_at.to_rfc3339()],
        )?;
        tweet.id = tx.last_insert_rowid();

        for media_id in &media_ids {
            let rows = tx.execute(
                "UPDATE medias SET tweet_id = ?1 WHERE id = ?2 AND tweet_id IS NULL",
                params![tweet.id, media_id],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("Media '{}'", media_id)));
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_tweet(&self, id: i64) -> StoreResult<Tweet> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM tweets WHERE id = ?1", params![id], row_to_tweet)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Tweet '{}'", id))
                }
                _ => StoreError::Database(e),
            })
    }

    /// Delete a tweet row. Likes and media rows go with it.
    pub fn delete_tweet(&self, id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM tweets WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Tweet '{}'", id)));
        }
        Ok(())
    }

    /// Tweets by the user and everyone they follow, most liked first.
    /// Ties fall back to ascending tweet id.
    pub fn get_feed(&self, user_id: i64, offset: i64, limit: i64) -> StoreResult<Vec<FeedTweet>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT t.id, t.content, u.id AS author_id, u.name AS author_name,
                      COUNT(l.id) AS like_count
               FROM tweets t
               JOIN users u ON u.id = t.user_id
               LEFT JOIN likes l ON l.tweet_id = t.id
               WHERE t.user_id = ?1
                  OR t.user_id IN (SELECT followed_id FROM followers WHERE follower_id = ?1)
               GROUP BY t.id
               ORDER BY like_count DESC, t.id ASC
               LIMIT ?2 OFFSET ?3"#,
        )?;

        let rows = stmt.query_map(params![user_id, limit, offset], |row| {
            Ok(FeedTweet {
                id: row.get("id")?,
                content: row.get("content")?,
                attachments: Vec::new(),
                author: UserSummary {
                    id: row.get("author_id")?,
                    name: row.get("author_name")?,
                },
                likes: Vec::new(),
                like_count: row.get("like_count")?,
            })
        })?;

        let mut tweets = Vec::new();
        for row in rows {
            tweets.push(row?);
        }

        for tweet in &mut tweets {
            tweet.likes = fetch_like_authors(&conn, tweet.id)?;
            tweet.attachments = fetch_media_for_tweet(&conn, tweet.id)?
                .into_iter()
                .map(|media| media.file_name)
                .collect();
        }

        Ok(tweets)
    }

    // ==================== Like Operations ====================

    pub fn create_like(&self, tweet_id: i64, user_id: i64) -> StoreResult<Like> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tweets WHERE id = ?1)",
            params![tweet_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound(format!("Tweet '{}'", tweet_id)));
        }

        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO likes (tweet_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![tweet_id, user_id, created_at.to_rfc3339()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("You already like the tweet '{}'!", tweet_id))
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(Like {
            id: conn.last_insert_rowid(),
            tweet_id,
            user_id,
            created_at,
        })
    }

    pub fn delete_like(&self, tweet_id: i64, user_id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM likes WHERE tweet_id = ?1 AND user_id = ?2",
            params![tweet_id, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Like on tweet '{}'", tweet_id)));
        }
        Ok(())
    }

    // ==================== Media Operations ====================

    pub fn create_media(&self, media: &mut Media) -> StoreResult<()> {
        let conn = self.lock()?;
        media.created_at = Utc::now();

        conn.execute(
            "INSERT INTO medias (file_name, tweet_id, created_at) VALUES (?1, ?2, ?3)",
            params![&media.file_name, media.tweet_id, media.created_at.to_rfc3339()],
        )?;
        media.id = conn.last_insert_rowid();
        Ok(())
    }

    /// Single media row by id, whether attached or not. Only the
    /// attachment checks in the test suites read media this way.
    pub fn get_media(&self, id: i64) -> StoreResult<Media> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM medias WHERE id = ?1", params![id], row_to_media)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Media '{}'", id))
                }
                _ => StoreError::Database(e),
            })
    }

    pub fn get_media_by_tweet_id(&self, tweet_id: i64) -> StoreResult<Vec<Media>> {
        let conn = self.lock()?;
        fetch_media_for_tweet(&conn, tweet_id)
    }
}

fn fetch_user(conn: &Connection, id: i64) -> StoreResult<User> {
    conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User '{}'", id)),
            _ => StoreError::Database(e),
        })
}

fn query_summaries(conn: &Connection, sql: &str, id: i64) -> StoreResult<Vec<UserSummary>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(UserSummary {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;

    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

fn fetch_like_authors(conn: &Connection, tweet_id: i64) -> StoreResult<Vec<LikeAuthor>> {
    let mut stmt = conn.prepare(
        r#"SELECT u.id, u.name FROM likes l JOIN users u ON u.id = l.user_id
           WHERE l.tweet_id = ?1 ORDER BY l.id ASC"#,
    )?;
    let likes = stmt
        .query_map(params![tweet_id], |row| {
            Ok(LikeAuthor {
                user_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(likes)
}

fn fetch_media_for_tweet(conn: &Connection, tweet_id: i64) -> StoreResult<Vec<Media>> {
    let mut stmt = conn.prepare("SELECT * FROM medias WHERE tweet_id = ?1 ORDER BY id ASC")?;
    let rows = stmt.query_map(params![tweet_id], row_to_media)?;

    let mut medias = Vec::new();
    for row in rows {
        medias.push(row?);
    }
    Ok(medias)
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        api_key: row.get("api_key")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_tweet(row: &rusqlite::Row) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_media(row: &rusqlite::Row) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get("id")?,
        file_name: row.get("file_name")?,
        tweet_id: row.get("tweet_id")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
