//! Conversation messages per step, with store-assigned sequence numbers.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use shaman_domain::message::{MessageRole, StepMessage};
use shaman_domain::{Error, Result};

pub struct MessageStore {
    /// step_id → ordered messages.
    messages: RwLock<HashMap<Uuid, Vec<StepMessage>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
        }
    }

    /// Append a message; the store assigns the next sequence number.
    ///
    /// A TOOL message must answer a tool call announced by an earlier
    /// assistant message of the same step.
    pub fn append(&self, org_id: Uuid, mut message: StepMessage) -> Result<StepMessage> {
        if message.org_id != org_id {
            return Err(Error::TenantMismatch(format!(
                "message for step {} belongs to another organization",
                message.step_id
            )));
        }
        let mut messages = self.messages.write();
        let entries = messages.entry(message.step_id).or_default();

        if message.role == MessageRole::Tool {
            let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                Error::Conflict("TOOL message missing tool_call_id".into())
            })?;
            let announced = entries.iter().any(|m| {
                m.role == MessageRole::Assistant
                    && m.tool_calls.iter().any(|tc| tc.id == call_id)
            });
            if !announced {
                return Err(Error::Conflict(format!(
                    "TOOL message references unknown tool_call_id {call_id}"
                )));
            }
        }

        message.sequence_number = entries.len() as u64;
        entries.push(message.clone());
        Ok(message)
    }

    /// All messages of a step in sequence order.
    pub fn for_step(&self, org_id: Uuid, step_id: Uuid) -> Vec<StepMessage> {
        self.messages
            .read()
            .get(&step_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.org_id == org_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaman_domain::chat::ToolCall;
    use serde_json::json;

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let store = MessageStore::new();
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();
        for i in 0..3 {
            let msg = store
                .append(
                    org,
                    StepMessage::new(step, org, MessageRole::User, format!("m{i}")),
                )
                .unwrap();
            assert_eq!(msg.sequence_number, i);
        }
    }

    #[test]
    fn tool_message_requires_announced_call_id() {
        let store = MessageStore::new();
        let org = Uuid::new_v4();
        let step = Uuid::new_v4();

        // Unannounced tool_call_id is rejected.
        let orphan = StepMessage::tool_result(step, org, "call_1", "out");
        assert!(matches!(
            store.append(org, orphan),
            Err(Error::Conflict(_))
        ));

        // After the assistant announces it, the TOOL message lands.
        let assistant = StepMessage::new(step, org, MessageRole::Assistant, "")
            .with_tool_calls(vec![ToolCall {
                id: "call_1".into(),
                name: "run_data_read".into(),
                arguments: json!({ "key": "x" }),
            }]);
        store.append(org, assistant).unwrap();
        store
            .append(org, StepMessage::tool_result(step, org, "call_1", "out"))
            .unwrap();

        let msgs = store.for_step(org, step);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].sequence_number, 1);
    }

    #[test]
    fn cross_tenant_append_rejected() {
        let store = MessageStore::new();
        let step = Uuid::new_v4();
        let msg = StepMessage::new(step, Uuid::new_v4(), MessageRole::User, "hi");
        assert!(matches!(
            store.append(Uuid::new_v4(), msg),
            Err(Error::TenantMismatch(_))
        ));
    }

    #[test]
    fn for_step_on_unknown_step_is_empty() {
        let store = MessageStore::new();
        assert!(store.for_step(Uuid::new_v4(), Uuid::new_v4()).is_empty());
    }
}
