//! Inter-agent messages.
//!
//! Messages observed by any receiver are FIFO per `(from, to)` pair:
//! delivery is awaited inline by the sender, so a sender's messages to one
//! receiver arrive in the order they were sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message kinds understood by the collaboration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Free-form text.
    Text,
    /// Request to take over a task; accepted only by idle agents.
    TaskRequest,
    /// Result of an accepted task request.
    TaskResponse,
    /// Shared data payload.
    DataShare,
    /// Coordination traffic.
    Coordination,
    /// One-to-all announcement.
    Broadcast,
}

/// Delivery state of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created, delivery not yet attempted or still in flight.
    Sent,
    /// The receiver's handler returned successfully.
    Delivered,
    /// The receiver's handler failed.
    Failed,
}

/// One inter-agent message.
///
/// `to_agent` of `None` addresses every registered agent (a broadcast).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: Uuid,
    /// Sender agent id.
    pub from_agent: Uuid,
    /// Receiver agent id, or `None` for all agents.
    pub to_agent: Option<Uuid>,
    /// Message kind.
    pub kind: MessageKind,
    /// Opaque content.
    pub content: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Delivery state.
    pub status: MessageStatus,
}

impl Message {
    /// Create a direct message in the `Sent` state.
    pub fn direct(from: Uuid, to: Uuid, kind: MessageKind, content: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from,
            to_agent: Some(to),
            kind,
            content,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    /// Create a broadcast message in the `Sent` state.
    pub fn broadcast(from: Uuid, kind: MessageKind, content: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from,
            to_agent: None,
            kind,
            content,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    /// Content as text, serializing non-string payloads.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_message() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let msg = Message::direct(from, to, MessageKind::Text, json!("hello"));
        assert_eq!(msg.from_agent, from);
        assert_eq!(msg.to_agent, Some(to));
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.content_text(), "hello");
    }

    #[test]
    fn test_broadcast_has_no_receiver() {
        let msg = Message::broadcast(Uuid::new_v4(), MessageKind::Broadcast, json!("all hands"));
        assert!(msg.to_agent.is_none());
    }

    #[test]
    fn test_content_text_serializes_objects() {
        let msg = Message::broadcast(
            Uuid::new_v4(),
            MessageKind::DataShare,
            json!({"rows": 3}),
        );
        assert!(msg.content_text().contains("rows"));
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageKind::TaskRequest).unwrap(),
            "\"task_request\""
        );
    }
}
