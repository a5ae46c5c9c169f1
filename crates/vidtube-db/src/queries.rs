use crate::models::{
    NewUser, NewVideo, OrphanedMediaRow, USER_COLUMNS, UserRow, timestamp_column, uuid_column,
};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

use vidtube_types::models::{ChannelProfile, Comment, OwnerSummary, WatchedVideo};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

impl Database {
    // -- Users --

    /// Insert a user. A duplicate username or email surfaces as a UNIQUE
    /// violation, see [`crate::is_unique_violation`].
    pub fn create_user(&self, user: &NewUser) -> Result<UserRow> {
        let id = user.id.to_string();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, full_name, password, avatar, cover_image)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    &id,
                    &user.username,
                    &user.email,
                    &user.full_name,
                    &user.password_hash,
                    &user.avatar,
                    &user.cover_image,
                ),
            )?;
            query_user(conn, "id = ?1", &id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Match on username OR email. Absent identifiers never match.
    pub fn find_user_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE username = ?1 OR email = ?2 ORDER BY created_at LIMIT 1",
                USER_COLUMNS
            );
            conn.query_row(&sql, (username, email), UserRow::from_row)
                .optional()
        })
    }

    /// Overwrite (or clear, with `None`) the single stored refresh token.
    pub fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                &format!("UPDATE users SET refresh_token = ?2, updated_at = {} WHERE id = ?1", NOW),
                (id, token),
            )?;
            Ok(updated == 1)
        })
    }

    /// Compare-and-swap on the stored refresh token.
    pub fn rotate_refresh_token(&self, id: &str, expected: &str, replacement: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                &format!(
                    "UPDATE users SET refresh_token = ?3, updated_at = {}
                     WHERE id = ?1 AND refresh_token = ?2",
                    NOW
                ),
                (id, expected, replacement),
            )?;
            Ok(updated == 1)
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                &format!("UPDATE users SET password = ?2, updated_at = {} WHERE id = ?1", NOW),
                (id, password_hash),
            )?;
            Ok(updated == 1)
        })
    }

    pub fn update_account(&self, id: &str, full_name: &str, email: &str) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                &format!(
                    "UPDATE users SET full_name = ?2, email = ?3, updated_at = {} WHERE id = ?1",
                    NOW
                ),
                (id, full_name, email),
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(conn, "id = ?1", id)
        })
    }

    /// Swap the avatar URL in one transaction.
    /// Returns the updated user and the URL it replaced.
    pub fn replace_avatar(&self, id: &str, url: &str) -> Result<Option<(UserRow, String)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let previous: Option<String> = tx
                .query_row("SELECT avatar FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(previous) = previous else {
                return Ok(None);
            };

            tx.execute(
                &format!("UPDATE users SET avatar = ?2, updated_at = {} WHERE id = ?1", NOW),
                (id, url),
            )?;
            let user = query_user(&tx, "id = ?1", id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished during avatar swap", id))?;
            tx.commit()?;

            Ok(Some((user, previous)))
        })
    }

    pub fn update_cover_image(&self, id: &str, url: &str) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                &format!("UPDATE users SET cover_image = ?2, updated_at = {} WHERE id = ?1", NOW),
                (id, url),
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(conn, "id = ?1", id)
        })
    }

    // -- Subscriptions --

    /// Toggle a subscription edge: removes if exists, inserts if not.
    /// Returns true when the edge was inserted.
    pub fn toggle_subscription(&self, id: &str, subscriber_id: &str, channel_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
                (subscriber_id, channel_id),
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO subscriptions (id, subscriber_id, channel_id) VALUES (?1, ?2, ?3)",
                    (id, subscriber_id, channel_id),
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    /// Channel statistics for `channel_username`, as seen by `viewer_id`.
    pub fn get_channel_profile(
        &self,
        channel_username: &str,
        viewer_id: &str,
    ) -> Result<Option<ChannelProfile>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT u.id, u.full_name, u.username, u.email, u.avatar, u.cover_image,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                        EXISTS (SELECT 1 FROM subscriptions s
                                WHERE s.channel_id = u.id AND s.subscriber_id = ?2)
                 FROM users u
                 WHERE u.username = lower(?1)",
                (channel_username, viewer_id),
                |row| {
                    Ok(ChannelProfile {
                        id: uuid_column(row, 0)?,
                        full_name: row.get(1)?,
                        username: row.get(2)?,
                        email: row.get(3)?,
                        avatar: row.get(4)?,
                        cover_image: row
                            .get::<_, Option<String>>(5)?
                            .filter(|c| !c.is_empty()),
                        subscribers_count: row.get::<_, i64>(6)? as u64,
                        channels_subscribed_to_count: row.get::<_, i64>(7)? as u64,
                        is_subscribed: row.get(8)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Videos & watch history --

    pub fn insert_video(&self, video: &NewVideo) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO videos (id, owner_id, video_file, thumbnail, title, description, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    video.id.to_string(),
                    video.owner_id.to_string(),
                    &video.video_file,
                    &video.thumbnail,
                    &video.title,
                    &video.description,
                    video.duration,
                ),
            )?;
            Ok(())
        })
    }

    /// Append a video to the end of a user's watch history. A video already
    /// present is moved to the end. Returns false if the video does not exist.
    pub fn push_watch_history(&self, user_id: &str, video_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM videos WHERE id = ?1)",
                [video_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(false);
            }

            tx.execute(
                "DELETE FROM watch_history WHERE user_id = ?1 AND video_id = ?2",
                (user_id, video_id),
            )?;
            tx.execute(
                "INSERT INTO watch_history (user_id, video_id, position)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1
                                  FROM watch_history WHERE user_id = ?1))",
                (user_id, video_id),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Resolve a user's watch history into full video records, oldest first,
    /// each joined with its owner summary.
    pub fn get_watch_history(&self, user_id: &str) -> Result<Vec<WatchedVideo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.video_file, v.thumbnail, v.title, v.description, v.duration,
                        v.views, v.is_published, v.created_at,
                        o.full_name, o.username, o.avatar
                 FROM watch_history w
                 JOIN videos v ON v.id = w.video_id
                 LEFT JOIN users o ON o.id = v.owner_id
                 WHERE w.user_id = ?1
                 ORDER BY w.position ASC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(WatchedVideo {
                        id: uuid_column(row, 0)?,
                        video_file: row.get(1)?,
                        thumbnail: row.get(2)?,
                        title: row.get(3)?,
                        description: row.get(4)?,
                        duration: row.get(5)?,
                        views: row.get::<_, i64>(6)? as u64,
                        is_published: row.get(7)?,
                        created_at: timestamp_column(row, 8)?,
                        owner: owner_summary(row, 9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, id: &str, video_id: &str, owner_id: &str, content: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO comments (id, video_id, owner_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, video_id, owner_id, content),
            )?;
            Ok(())
        })
    }

    pub fn get_comments_for_video(&self, video_id: &str) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.content, c.video_id, c.owner_id, c.created_at,
                        o.full_name, o.username, o.avatar
                 FROM comments c
                 LEFT JOIN users o ON o.id = c.owner_id
                 WHERE c.video_id = ?1
                 ORDER BY c.created_at ASC",
            )?;

            let rows = stmt
                .query_map([video_id], |row| {
                    Ok(Comment {
                        id: uuid_column(row, 0)?,
                        content: row.get(1)?,
                        video_id: uuid_column(row, 2)?,
                        owner_id: uuid_column(row, 3)?,
                        created_at: timestamp_column(row, 4)?,
                        owner: owner_summary(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Orphaned media --

    /// Remember a media URL whose deletion failed.
    pub fn record_orphaned_media(&self, url: &str, error: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO orphaned_media (url, last_error) VALUES (?1, ?2)
                 ON CONFLICT(url) DO UPDATE SET attempts = attempts + 1, last_error = excluded.last_error",
                (url, error),
            )?;
            Ok(())
        })
    }

    /// Orphans that have failed fewer than `max_attempts` times.
    pub fn list_orphaned_media(&self, max_attempts: u32) -> Result<Vec<OrphanedMediaRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, attempts, last_error, created_at FROM orphaned_media
                 WHERE attempts < ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([max_attempts], |row| {
                    Ok(OrphanedMediaRow {
                        url: row.get(0)?,
                        attempts: row.get(1)?,
                        last_error: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn clear_orphaned_media(&self, url: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM orphaned_media WHERE url = ?1", [url])?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, predicate: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], UserRow::from_row).optional()
}

fn owner_summary(row: &rusqlite::Row, start: usize) -> rusqlite::Result<Option<OwnerSummary>> {
    let username: Option<String> = row.get(start + 1)?;
    let Some(username) = username else {
        return Ok(None);
    };
    Ok(Some(OwnerSummary {
        full_name: row.get(start)?,
        username,
        avatar: row.get(start + 2)?,
    }))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            full_name: format!("{} Person", username),
            password_hash: "hash".to_string(),
            avatar: format!("https://media.test/{}.png", username),
            cover_image: None,
        }
    }

    fn new_video(owner: &UserRow, title: &str) -> NewVideo {
        NewVideo {
            id: Uuid::new_v4(),
            owner_id: owner.id.parse().unwrap(),
            video_file: format!("https://media.test/{}.mp4", title),
            thumbnail: format!("https://media.test/{}.jpg", title),
            title: title.to_string(),
            description: String::new(),
            duration: 12.5,
        }
    }

    #[test]
    fn create_user_rejects_duplicate_username_and_email() {
        let (_dir, db) = open();
        db.create_user(&new_user("alice", "alice@x.com")).unwrap();

        let err = db.create_user(&new_user("alice", "other@x.com")).unwrap_err();
        assert!(is_unique_violation(&err));

        // email uniqueness ignores case
        let err = db.create_user(&new_user("bob", "ALICE@x.com")).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn find_user_by_login_matches_either_identifier() {
        let (_dir, db) = open();
        let created = db.create_user(&new_user("alice", "alice@x.com")).unwrap();

        let by_name = db.find_user_by_login(Some("alice"), None).unwrap().unwrap();
        assert_eq!(by_name.id, created.id);

        let by_email = db.find_user_by_login(None, Some("Alice@X.com")).unwrap().unwrap();
        assert_eq!(by_email.id, created.id);

        assert!(db.find_user_by_login(Some("nobody"), None).unwrap().is_none());
        assert!(db.find_user_by_login(None, None).unwrap().is_none());
    }

    #[test]
    fn refresh_token_is_overwritten_and_cleared() {
        let (_dir, db) = open();
        let user = db.create_user(&new_user("alice", "alice@x.com")).unwrap();
        assert!(user.refresh_token.is_none());

        db.set_refresh_token(&user.id, Some("first")).unwrap();
        db.set_refresh_token(&user.id, Some("second")).unwrap();
        let stored = db.get_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("second"));

        db.set_refresh_token(&user.id, None).unwrap();
        let stored = db.get_user_by_id(&user.id).unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[test]
    fn rotate_refresh_token_requires_current_value() {
        let (_dir, db) = open();
        let user = db.create_user(&new_user("alice", "alice@x.com")).unwrap();
        db.set_refresh_token(&user.id, Some("current")).unwrap();

        assert!(!db.rotate_refresh_token(&user.id, "stale", "next").unwrap());
        assert!(db.rotate_refresh_token(&user.id, "current", "next").unwrap());
        assert!(!db.rotate_refresh_token(&user.id, "current", "again").unwrap());

        let stored = db.get_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("next"));
    }

    #[test]
    fn replace_avatar_returns_previous_url() {
        let (_dir, db) = open();
        let user = db.create_user(&new_user("alice", "alice@x.com")).unwrap();

        let (updated, previous) = db
            .replace_avatar(&user.id, "https://media.test/new.png")
            .unwrap()
            .unwrap();
        assert_eq!(previous, "https://media.test/alice.png");
        assert_eq!(updated.avatar, "https://media.test/new.png");

        assert!(db.replace_avatar(&Uuid::new_v4().to_string(), "x").unwrap().is_none());
    }

    #[test]
    fn channel_profile_counts_edges_and_viewer_membership() {
        let (_dir, db) = open();
        let channel = db.create_user(&new_user("chan", "chan@x.com")).unwrap();
        let a = db.create_user(&new_user("a", "a@x.com")).unwrap();
        let b = db.create_user(&new_user("b", "b@x.com")).unwrap();
        let z = db.create_user(&new_user("z", "z@x.com")).unwrap();

        for sub in [&a, &b] {
            assert!(db
                .toggle_subscription(&Uuid::new_v4().to_string(), &sub.id, &channel.id)
                .unwrap());
        }
        db.toggle_subscription(&Uuid::new_v4().to_string(), &channel.id, &a.id)
            .unwrap();

        let seen_by_a = db.get_channel_profile("CHAN", &a.id).unwrap().unwrap();
        assert_eq!(seen_by_a.subscribers_count, 2);
        assert_eq!(seen_by_a.channels_subscribed_to_count, 1);
        assert!(seen_by_a.is_subscribed);

        let seen_by_z = db.get_channel_profile("chan", &z.id).unwrap().unwrap();
        assert!(!seen_by_z.is_subscribed);

        assert!(db.get_channel_profile("ghost", &a.id).unwrap().is_none());
    }

    #[test]
    fn toggle_subscription_removes_existing_edge() {
        let (_dir, db) = open();
        let channel = db.create_user(&new_user("chan", "chan@x.com")).unwrap();
        let a = db.create_user(&new_user("a", "a@x.com")).unwrap();

        assert!(db.toggle_subscription("s1", &a.id, &channel.id).unwrap());
        assert!(!db.toggle_subscription("s2", &a.id, &channel.id).unwrap());

        let profile = db.get_channel_profile("chan", &a.id).unwrap().unwrap();
        assert_eq!(profile.subscribers_count, 0);
        assert!(!profile.is_subscribed);
    }

    #[test]
    fn watch_history_keeps_order_and_joins_owner() {
        let (_dir, db) = open();
        let owner = db.create_user(&new_user("owner", "owner@x.com")).unwrap();
        let viewer = db.create_user(&new_user("viewer", "viewer@x.com")).unwrap();
        let first = new_video(&owner, "first");
        let second = new_video(&owner, "second");
        db.insert_video(&first).unwrap();
        db.insert_video(&second).unwrap();

        assert!(db.push_watch_history(&viewer.id, &second.id.to_string()).unwrap());
        assert!(db.push_watch_history(&viewer.id, &first.id.to_string()).unwrap());
        assert!(!db.push_watch_history(&viewer.id, &Uuid::new_v4().to_string()).unwrap());

        let history = db.get_watch_history(&viewer.id).unwrap();
        let titles: Vec<_> = history.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, ["second", "first"]);

        let owner_summary = history[0].owner.as_ref().unwrap();
        assert_eq!(owner_summary.username, "owner");
        assert_eq!(owner_summary.full_name, "owner Person");
        assert_eq!(owner_summary.avatar, "https://media.test/owner.png");

        // re-watching moves the video to the end
        db.push_watch_history(&viewer.id, &second.id.to_string()).unwrap();
        let history = db.get_watch_history(&viewer.id).unwrap();
        let titles: Vec<_> = history.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, ["first", "second"]);
    }

    #[test]
    fn comments_reference_their_owner() {
        let (_dir, db) = open();
        let owner = db.create_user(&new_user("owner", "owner@x.com")).unwrap();
        let video = new_video(&owner, "clip");
        db.insert_video(&video).unwrap();

        db.insert_comment("c1", &video.id.to_string(), &owner.id, "nice").unwrap();
        assert!(db
            .insert_comment("c2", &video.id.to_string(), "no-such-user", "spam")
            .is_err());

        let comments = db.get_comments_for_video(&video.id.to_string()).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].content, "nice");
        assert_eq!(comments[0].owner.as_ref().unwrap().username, "owner");
    }

    #[test]
    fn orphaned_media_counts_attempts() {
        let (_dir, db) = open();
        db.record_orphaned_media("https://media.test/old.png", "timeout").unwrap();
        db.record_orphaned_media("https://media.test/old.png", "503").unwrap();

        let pending = db.list_orphaned_media(5).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].last_error, "503");
        assert!(db.list_orphaned_media(2).unwrap().is_empty());

        db.clear_orphaned_media("https://media.test/old.png").unwrap();
        assert!(db.list_orphaned_media(5).unwrap().is_empty());
    }
}
