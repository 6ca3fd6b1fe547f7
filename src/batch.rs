//! Batch grouping
//!
//! Conversation writes (role present) are grouped by target: an existing
//! conversation id, or a new conversation per collection. Each group becomes
//! one batched append, preceded by one create for new conversations. Every
//! other request is planned on its own through [`plan_write`].
//!
//! Planning happens up front, so malformed content fails the whole batch
//! before any request is sent.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::error::{NebulaError, Result};
use crate::memory::{Memory, MemoryContent};
use crate::normalizer::{messages_for, plan_conversation, plan_write, WritePlan};

/// Name given to conversations created for a batch
pub const BATCH_CONVERSATION_NAME: &str = "Conversation";

/// Placeholder role used to create an empty conversation
const PLACEHOLDER_ROLE: &str = "assistant";

/// Identity of a conversation group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Append to an existing conversation
    Existing(String),
    /// Create a new conversation in this collection
    New { collection_id: String },
}

impl GroupKey {
    fn of(memory: &Memory) -> Self {
        match memory.target_id() {
            Some(id) => GroupKey::Existing(id.to_string()),
            None => GroupKey::New {
                collection_id: memory.collection_id.clone(),
            },
        }
    }
}

/// Messages headed for one conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationGroup {
    pub key: GroupKey,
    /// Input positions of the members, ascending
    pub positions: Vec<usize>,
    /// Create payload for new conversations
    pub create: Option<Value>,
    /// Batched append payload carrying every member's messages in input order
    pub append: Value,
}

impl ConversationGroup {
    /// Existing conversation id, if the group does not create one
    pub fn existing_id(&self) -> Option<&str> {
        match &self.key {
            GroupKey::Existing(id) => Some(id),
            GroupKey::New { .. } => None,
        }
    }

    pub fn call_count(&self) -> usize {
        1 + usize::from(self.create.is_some())
    }
}

/// Planned batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    /// Conversation groups in order of first appearance
    pub groups: Vec<ConversationGroup>,
    /// Independent requests with their input positions, in input order
    pub others: Vec<(usize, WritePlan)>,
    /// Number of input requests
    pub len: usize,
}

impl BatchPlan {
    /// Number of HTTP calls issued when every call succeeds
    pub fn call_count(&self) -> usize {
        self.groups.iter().map(ConversationGroup::call_count).sum::<usize>()
            + self.others.iter().map(|(_, plan)| plan.call_count()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Accumulates members of one group while planning
struct Pending<'a> {
    key: GroupKey,
    positions: Vec<usize>,
    members: Vec<&'a Memory>,
}

/// Partition a batch into conversation groups and independent requests
pub fn plan_batch(memories: &[Memory]) -> Result<BatchPlan> {
    let mut order: Vec<Pending<'_>> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut others = Vec::new();

    for (position, memory) in memories.iter().enumerate() {
        if !memory.is_conversation() {
            others.push((position, plan_write(memory)?));
            continue;
        }

        let key = GroupKey::of(memory);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            order.push(Pending {
                key,
                positions: Vec::new(),
                members: Vec::new(),
            });
            order.len() - 1
        });
        order[slot].positions.push(position);
        order[slot].members.push(memory);
    }

    let groups = order
        .into_iter()
        .map(build_group)
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        "Planned batch of {}: {} conversation groups, {} independent",
        memories.len(),
        groups.len(),
        others.len()
    );

    Ok(BatchPlan {
        groups,
        others,
        len: memories.len(),
    })
}

fn build_group(pending: Pending<'_>) -> Result<ConversationGroup> {
    let Some(first) = pending.members.first() else {
        return Err(NebulaError::client("Empty conversation group"));
    };
    let collection_id = first.collection_id.clone();

    let mut messages = Vec::new();
    for member in &pending.members {
        messages.extend(messages_for(member)?);
    }

    // First override found in the group wins
    let vision_model = pending.members.iter().find_map(|m| m.vision_model.clone());
    let audio_model = pending.members.iter().find_map(|m| m.audio_model.clone());
    let fast_mode = pending.members.iter().find_map(|m| m.fast_mode);
    let multimodal = pending.members.iter().any(|m| m.content.is_multimodal());

    let mut append = Map::new();
    append.insert("collection_id".to_string(), json!(collection_id));
    append.insert("messages".to_string(), Value::Array(messages));
    if multimodal {
        if let Some(model) = &vision_model {
            append.insert("vision_model".to_string(), json!(model));
        }
        if let Some(model) = &audio_model {
            append.insert("audio_model".to_string(), json!(model));
        }
        if let Some(fast_mode) = fast_mode {
            append.insert("fast_mode".to_string(), json!(fast_mode));
        }
    }

    let create = match &pending.key {
        GroupKey::Existing(_) => None,
        GroupKey::New { collection_id } => {
            let placeholder = Memory {
                collection_id: collection_id.clone(),
                content: MemoryContent::default(),
                role: Some(PLACEHOLDER_ROLE.to_string()),
                ..Default::default()
            };
            Some(plan_conversation(&placeholder, Some(BATCH_CONVERSATION_NAME))?.create)
        }
    };

    Ok(ConversationGroup {
        key: pending.key,
        positions: pending.positions,
        create,
        append: Value::Object(append),
    })
}

/// One failed group or request in a best-effort batch
#[derive(Debug)]
pub struct BatchFailure {
    /// Input positions left without an id
    pub positions: Vec<usize>,
    pub error: NebulaError,
}

/// Outcome of a best-effort batch
///
/// `ids` has one slot per input request; a slot is `None` when its group or
/// request failed. A document created without an id in the response gets
/// `Some("")`.
#[derive(Debug)]
pub struct BatchReport {
    pub ids: Vec<Option<String>>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn new(len: usize) -> Self {
        Self {
            ids: vec![None; len],
            failures: Vec::new(),
        }
    }

    /// Assign `id` to every position
    pub fn record_success(&mut self, positions: &[usize], id: &str) {
        for &position in positions {
            if let Some(slot) = self.ids.get_mut(position) {
                *slot = Some(id.to_string());
            }
        }
    }

    pub fn record_failure(&mut self, positions: Vec<usize>, error: NebulaError) {
        tracing::warn!("Batch positions {:?} failed: {}", positions, error);
        self.failures.push(BatchFailure { positions, error });
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids in input order, empty for failed positions
    pub fn into_ids(self) -> Vec<String> {
        self.ids.into_iter().map(Option::unwrap_or_default).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentPart;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_groups_by_existing_id() {
        let batch = vec![
            Memory::new("c1", "q1").with_role("user").with_memory_id("conv-1"),
            Memory::new("c1", "doc"),
            Memory::new("c1", "a1").with_role("assistant").with_memory_id("conv-1"),
        ];
        let plan = plan_batch(&batch).unwrap();

        assert_eq!(plan.len, 3);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].positions, vec![0, 2]);
        assert_eq!(plan.groups[0].existing_id(), Some("conv-1"));
        assert!(plan.groups[0].create.is_none());
        assert_eq!(
            plan.groups[0].append["messages"],
            json!([
                {"content": "q1", "role": "user"},
                {"content": "a1", "role": "assistant"}
            ])
        );
        assert_eq!(plan.others.len(), 1);
        assert_eq!(plan.others[0].0, 1);
        assert_eq!(plan.call_count(), 2);
    }

    #[test]
    fn test_new_conversation_per_collection() {
        let batch = vec![
            Memory::new("c1", "hi").with_role("user"),
            Memory::new("c2", "other").with_role("user"),
            Memory::new("c1", "there").with_role("assistant"),
        ];
        let plan = plan_batch(&batch).unwrap();

        assert_eq!(plan.groups.len(), 2);
        let first = &plan.groups[0];
        assert_eq!(
            first.key,
            GroupKey::New {
                collection_id: "c1".to_string()
            }
        );
        assert_eq!(first.positions, vec![0, 2]);
        let create = first.create.as_ref().unwrap();
        assert_eq!(create["engram_type"], "conversation");
        assert_eq!(create["name"], BATCH_CONVERSATION_NAME);
        assert_eq!(create["collection_ref"], "c1");
        assert_eq!(first.append["messages"].as_array().unwrap().len(), 2);

        assert_eq!(plan.groups[1].positions, vec![1]);
        assert_eq!(plan.call_count(), 4);
    }

    #[test]
    fn test_group_overrides_first_found() {
        let image = ContentPart::image_from_bytes(b"png", Some("a.png"), None);
        let batch = vec![
            Memory::new("c1", "plain").with_role("user").with_memory_id("m"),
            Memory::new("c1", vec![image])
                .with_role("user")
                .with_memory_id("m")
                .with_vision_model("vlm-a"),
            Memory::new("c1", "late")
                .with_role("user")
                .with_memory_id("m")
                .with_vision_model("vlm-b"),
        ];
        let plan = plan_batch(&batch).unwrap();
        assert_eq!(plan.groups[0].append["vision_model"], "vlm-a");
    }

    #[test]
    fn test_invalid_member_fails_planning() {
        let batch = vec![
            Memory::new("c1", "ok"),
            Memory::new("c1", json!(12)).with_role("user"),
        ];
        assert!(plan_batch(&batch).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let plan = plan_batch(&[]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.call_count(), 0);
    }

    #[test]
    fn test_report_positions() {
        let mut report = BatchReport::new(4);
        report.record_success(&[0, 2], "conv-1");
        report.record_failure(vec![1], NebulaError::client("boom"));
        report.record_success(&[3], "");

        assert!(!report.is_complete());
        assert_eq!(report.failures[0].positions, vec![1]);
        assert_eq!(
            report.into_ids(),
            vec!["conv-1".to_string(), String::new(), "conv-1".to_string(), String::new()]
        );
    }
}
