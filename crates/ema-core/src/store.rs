//! External collaborator interfaces.
//!
//! These mirror the four persistence seams the worker depends on without
//! committing to a concrete store, the way `messenger.rs`'s `Messenger`
//! trait gives `sage` a provider-agnostic sending surface. Row shapes
//! follow `schema.rs`/`storage.rs`'s Diesel tables, trimmed to what the
//! traits below actually need; no concrete Diesel implementation ships
//! here; `InMemory*` test doubles back the integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::BufferMessage;

/// Durable record of which actor belongs to which user, and the
/// long-lived agent state (system prompt template, tool set name) it
/// should be constructed with.
#[async_trait]
pub trait ActorDb: Send + Sync {
    async fn get_or_create_actor(&self, user_id: &str, actor_name: &str) -> anyhow::Result<Uuid>;
}

/// Append-only per-actor buffer: every user input and every reply the
/// actor produced, in order. The worker's buffer chain is the only
/// writer; reads are used to seed the system prompt with recent history.
#[async_trait]
pub trait ShortTermMemoryDb: Send + Sync {
    async fn append(&self, actor_id: Uuid, message: BufferMessage) -> anyhow::Result<()>;

    async fn recent(&self, actor_id: Uuid, limit: usize) -> anyhow::Result<Vec<BufferMessage>>;
}

/// Durable store for round summaries produced by the context manager's
/// compaction protocol, keyed by actor.
#[async_trait]
pub trait LongTermMemoryDb: Send + Sync {
    async fn store_summary(&self, actor_id: Uuid, summary: String) -> anyhow::Result<Uuid>;

    async fn list_summaries(&self, actor_id: Uuid) -> anyhow::Result<Vec<String>>;
}

/// Semantic lookup over long-term memory, separated from `LongTermMemoryDb`
/// because a production implementation backs it with a different index
/// (e.g. `pgvector`) than the row store itself.
#[async_trait]
pub trait LongTermMemorySearcher: Send + Sync {
    async fn search(&self, actor_id: Uuid, query: &str, limit: usize)
        -> anyhow::Result<Vec<String>>;
}

/// In-memory `ShortTermMemoryDb` used by tests and by any caller that
/// doesn't need durability across process restarts.
#[derive(Default)]
pub struct InMemoryShortTermMemoryDb {
    buffers: Mutex<HashMap<Uuid, Vec<BufferMessage>>>,
}

impl InMemoryShortTermMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShortTermMemoryDb for InMemoryShortTermMemoryDb {
    async fn append(&self, actor_id: Uuid, message: BufferMessage) -> anyhow::Result<()> {
        self.buffers
            .lock()
            .unwrap()
            .entry(actor_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn recent(&self, actor_id: Uuid, limit: usize) -> anyhow::Result<Vec<BufferMessage>> {
        let buffers = self.buffers.lock().unwrap();
        let Some(all) = buffers.get(&actor_id) else {
            return Ok(Vec::new());
        };
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BufferKind, Content};
    use chrono::Utc;

    #[tokio::test]
    async fn in_memory_buffer_appends_in_order_and_respects_limit() {
        let db = InMemoryShortTermMemoryDb::new();
        let actor = Uuid::new_v4();
        for i in 0..5 {
            db.append(
                actor,
                BufferMessage {
                    kind: BufferKind::User,
                    id: Uuid::new_v4(),
                    name: format!("msg-{i}"),
                    contents: vec![Content::text(format!("{i}"))],
                    time: Utc::now(),
                },
            )
            .await
            .unwrap();
        }
        let recent = db.recent(actor, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].name, "msg-3");
        assert_eq!(recent[1].name, "msg-4");
    }
}
