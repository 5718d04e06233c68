//! Queue of writes that could not reach the API.
//!
//! Each queued write targets one entity and is stored under
//! `pending:{entity}`. Queuing a second write for the same entity merges the
//! payloads with a shallow JSON object merge (later fields win), so the queue
//! never holds more than one write per entity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roombook_providers::{JsonObject, KeyValueStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineResult;

/// Key prefix of queued writes.
pub const PENDING_PREFIX: &str = "pending:";

/// The operation a queued write replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    /// PATCH of the user's notification preferences.
    PatchPreferences { user_id: String },
    /// Mark one notification read.
    MarkRead { notification_id: String },
    /// Mark every notification of the user read.
    MarkAllRead { user_id: String },
}

impl PendingOp {
    /// Identifies the entity the write targets.
    pub fn entity(&self) -> String {
        match self {
            Self::PatchPreferences { user_id } => format!("preferences:{}", user_id),
            Self::MarkRead { notification_id } => format!("notification-read:{}", notification_id),
            Self::MarkAllRead { user_id } => format!("notifications-read-all:{}", user_id),
        }
    }

    fn key(&self) -> String {
        format!("{}{}", PENDING_PREFIX, self.entity())
    }
}

/// One queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub op: PendingOp,
    pub payload: JsonObject,
    /// When the first write for this entity was queued.
    pub queued_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

/// The persistent queue of pending writes.
#[derive(Clone)]
pub struct PendingWrites {
    store: Arc<dyn KeyValueStore>,
}

impl PendingWrites {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn load(&self, key: &str) -> EngineResult<Option<PendingWrite>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(write) => Ok(Some(write)),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping undecodable pending write");
                self.store.remove(key).await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, write: &PendingWrite) -> EngineResult<()> {
        let raw = serde_json::to_string(write)?;
        self.store.set(&write.op.key(), raw).await?;
        Ok(())
    }

    /// Queues `payload` for `op`, merging into an existing write for the same
    /// entity.
    pub async fn enqueue(
        &self,
        op: PendingOp,
        payload: JsonObject,
        now: DateTime<Utc>,
    ) -> EngineResult<PendingWrite> {
        let key = op.key();
        let write = match self.load(&key).await? {
            Some(mut existing) => {
                existing.payload.extend(payload);
                existing
            }
            None => PendingWrite {
                op,
                payload,
                queued_at: now,
                attempts: 0,
            },
        };
        self.save(&write).await?;
        debug!(entity = %write.op.entity(), "Queued pending write");
        Ok(write)
    }

    /// Returns the queued write for `op`'s entity, if any.
    pub async fn get(&self, op: &PendingOp) -> EngineResult<Option<PendingWrite>> {
        self.load(&op.key()).await
    }

    /// Every queued write, oldest first.
    pub async fn list(&self) -> EngineResult<Vec<PendingWrite>> {
        let keys = self.store.keys_with_prefix(PENDING_PREFIX).await?;
        let mut writes = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(write) = self.load(&key).await? {
                writes.push(write);
            }
        }
        writes.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(writes)
    }

    pub async fn len(&self) -> EngineResult<usize> {
        Ok(self.store.keys_with_prefix(PENDING_PREFIX).await?.len())
    }

    pub async fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn remove(&self, op: &PendingOp) -> EngineResult<()> {
        self.store.remove(&op.key()).await?;
        Ok(())
    }

    /// Records a failed replay attempt.
    pub async fn record_attempt(&self, op: &PendingOp) -> EngineResult<()> {
        if let Some(mut write) = self.load(&op.key()).await? {
            write.attempts += 1;
            self.save(&write).await?;
        }
        Ok(())
    }

    /// Drops every queued write.
    pub async fn clear(&self) -> EngineResult<()> {
        let keys = self.store.keys_with_prefix(PENDING_PREFIX).await?;
        self.store.remove_many(&keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use roombook_providers::MemoryStore;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> JsonObject {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, min, 0).unwrap()
    }

    #[tokio::test]
    async fn writes_to_same_entity_merge_shallowly() {
        let queue = PendingWrites::new(Arc::new(MemoryStore::new()));
        let op = PendingOp::PatchPreferences {
            user_id: "alice".into(),
        };

        queue
            .enqueue(op.clone(), obj(json!({"push_enabled": false, "reminder_minutes": 10})), at(0))
            .await
            .unwrap();
        let merged = queue
            .enqueue(op.clone(), obj(json!({"reminder_minutes": 30})), at(5))
            .await
            .unwrap();

        assert_eq!(
            serde_json::Value::Object(merged.payload),
            json!({"push_enabled": false, "reminder_minutes": 30})
        );
        assert_eq!(merged.queued_at, at(0));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let queue = PendingWrites::new(Arc::new(MemoryStore::new()));
        queue
            .enqueue(
                PendingOp::MarkRead {
                    notification_id: "n2".into(),
                },
                obj(json!({"read": true})),
                at(10),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                PendingOp::MarkAllRead {
                    user_id: "alice".into(),
                },
                obj(json!({"read": true})),
                at(1),
            )
            .await
            .unwrap();

        let ops: Vec<_> = queue.list().await.unwrap().into_iter().map(|w| w.op).collect();
        assert_eq!(
            ops,
            vec![
                PendingOp::MarkAllRead {
                    user_id: "alice".into()
                },
                PendingOp::MarkRead {
                    notification_id: "n2".into()
                },
            ]
        );
    }

    #[test]
    fn op_wire_shape() {
        let op = PendingOp::MarkRead {
            notification_id: "n1".into(),
        };
        insta::assert_json_snapshot!(op, @r###"
        {
          "op": "mark_read",
          "notification_id": "n1"
        }
        "###);
    }
}
