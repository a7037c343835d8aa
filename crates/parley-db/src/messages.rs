use anyhow::Result;

use crate::models::{MessageRow, ReactionRow, ReadRow};
use crate::{Database, OptionalExt};

impl Database {
    /// Append a message and, in the same transaction, seed the sender into
    /// its reader set and bump the parent chat's last-message marker.
    pub fn insert_message(
        &self,
        id: &str,
        chat_kind: &str,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (id, chat_kind, chat_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, chat_kind, chat_id, sender_id, content],
            )?;

            // The sender has already read their own message
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![id, sender_id],
            )?;

            let parent_table = if chat_kind == "group" { "groups" } else { "conversations" };
            tx.execute(
                &format!(
                    "UPDATE {parent_table} SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3"
                ),
                rusqlite::params![id, now_ms, chat_id],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    /// All messages in a chat, oldest first.
    pub fn list_messages(&self, chat_kind: &str, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_kind, chat_id, sender_id, content, is_deleted, created_at
                 FROM messages
                 WHERE chat_kind = ?1 AND chat_id = ?2
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([chat_kind, chat_id], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, chat_kind, chat_id, sender_id, content, is_deleted, created_at
                 FROM messages WHERE id = ?1",
                [id],
                row_to_message,
            )
            .optional()
        })
    }

    /// Soft delete: clear the content and set the permanent flag. The row
    /// and its id survive.
    pub fn soft_delete_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET is_deleted = 1, content = '' WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    /// Add the user to the reader set of every message in the chat. A
    /// single INSERT OR IGNORE over the UNIQUE(message_id, user_id) pair
    /// makes this idempotent and safe under concurrent repeats. Returns the
    /// number of newly-read messages.
    pub fn mark_chat_read(&self, chat_kind: &str, chat_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                 SELECT id, ?1 FROM messages WHERE chat_kind = ?2 AND chat_id = ?3",
                rusqlite::params![user_id, chat_kind, chat_id],
            )?;
            Ok(changed)
        })
    }

    /// A message is unread by U when U is not in its reader set and U did
    /// not send it.
    pub fn unread_count(&self, chat_kind: &str, chat_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.chat_kind = ?1 AND m.chat_id = ?2 AND m.sender_id != ?3
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = ?3
                   )",
                rusqlite::params![chat_kind, chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Toggle a reaction: removes if exists, inserts if not. The find and
    /// the write run under one lock, so the pair never duplicates.
    /// Returns true when the reaction was added, false when removed.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, emoji) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, message_id, user_id, emoji],
                )?;
                Ok(true)
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})
                 ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reader sets for a set of message IDs.
    pub fn get_reads_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReadRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id FROM message_reads WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReadRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_kind: row.get(1)?,
        chat_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        is_deleted: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::Database;
    use crate::test_util::{seed_user, test_db};

    fn send(db: &Database, chat_id: &str, sender: &str, content: &str, now: i64) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, "dm", chat_id, sender, content, now).unwrap();
        id
    }

    #[test]
    fn test_sender_counts_as_reader() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();

        let mid = send(&db, &conv, &ada, "hi bob", 200);

        let reads = db.get_reads_for_messages(&[mid]).unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].user_id, ada);

        assert_eq!(db.unread_count("dm", &conv, &ada).unwrap(), 0);
        assert_eq!(db.unread_count("dm", &conv, &bob).unwrap(), 1);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();

        let mid = send(&db, &conv, &ada, "hi", 200);
        send(&db, &conv, &ada, "you there?", 300);

        assert_eq!(db.unread_count("dm", &conv, &bob).unwrap(), 2);

        let newly = db.mark_chat_read("dm", &conv, &bob).unwrap();
        assert_eq!(newly, 2);
        assert_eq!(db.unread_count("dm", &conv, &bob).unwrap(), 0);

        // calling again changes nothing and duplicates nothing
        let newly = db.mark_chat_read("dm", &conv, &bob).unwrap();
        assert_eq!(newly, 0);
        let reads = db.get_reads_for_messages(&[mid]).unwrap();
        assert_eq!(reads.len(), 2);
    }

    #[test]
    fn test_toggle_reaction_is_an_involution() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();
        let mid = send(&db, &conv, &ada, "hi", 200);

        let r1 = Uuid::new_v4().to_string();
        assert!(db.toggle_reaction(&r1, &mid, &bob, "👍").unwrap());
        // same user, different emoji coexists
        let r2 = Uuid::new_v4().to_string();
        assert!(db.toggle_reaction(&r2, &mid, &bob, "🎉").unwrap());
        assert_eq!(db.get_reactions_for_messages(&[mid.clone()]).unwrap().len(), 2);

        // second toggle removes, returning to the original state
        let r3 = Uuid::new_v4().to_string();
        assert!(!db.toggle_reaction(&r3, &mid, &bob, "👍").unwrap());
        let remaining = db.get_reactions_for_messages(&[mid]).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].emoji, "🎉");
    }

    #[test]
    fn test_soft_delete_clears_content() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();
        let mid = send(&db, &conv, &ada, "oops wrong chat", 200);

        db.soft_delete_message(&mid).unwrap();

        let msg = db.get_message(&mid).unwrap().unwrap();
        assert!(msg.is_deleted);
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_insert_bumps_parent_last_message() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();

        let mid = send(&db, &conv, &ada, "hi", 5_000);

        let row = db.get_conversation(&conv).unwrap().unwrap();
        assert_eq!(row.last_message_id.as_deref(), Some(mid.as_str()));
        assert_eq!(row.last_message_at, Some(5_000));
    }

    #[test]
    fn test_messages_listed_oldest_first() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();

        send(&db, &conv, &ada, "one", 200);
        send(&db, &conv, &bob, "two", 300);
        send(&db, &conv, &ada, "three", 400);

        let rows = db.list_messages("dm", &conv).unwrap();
        let contents: Vec<&str> = rows.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }
}
