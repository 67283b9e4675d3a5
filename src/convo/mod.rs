//! Per-chat conversation state.
//!
//! Each chat has at most one active conversation: a state label drawn
//! from the owning flow's declared set, plus a context map of collected
//! values. Handlers return a [`Step`]; the runtime validates and applies
//! it. Losing the conversation store only abandons in-progress flows;
//! bookings are written at transaction points, never from intermediate
//! state.

pub mod memory;
pub mod redis;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A conversation snapshot, serializable for the shared KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Owning flow id; cross-flow callbacks do not leak.
    pub flow: String,
    pub state: String,
    pub context: Map<String, Value>,
}

impl Conversation {
    pub fn new(flow: &str, state: &str) -> Self {
        Self {
            flow: flow.to_string(),
            state: state.to_string(),
            context: Map::new(),
        }
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    pub fn i64_value(&self, key: &str) -> Option<i64> {
        self.context.get(key).and_then(Value::as_i64)
    }

    pub fn f64_value(&self, key: &str) -> Option<f64> {
        self.context.get(key).and_then(Value::as_f64)
    }

    pub fn str_list(&self, key: &str) -> Vec<String> {
        self.context
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What a handler decided.
#[derive(Debug)]
pub enum Step {
    /// Move to another state of the same flow, merging collected values.
    Advance {
        state: &'static str,
        merge: Map<String, Value>,
    },
    /// Remain in the current state (validation failed, or the handler
    /// re-prompted).
    Stay,
    /// The flow finished or was abandoned.
    Clear,
    /// Hand the chat over to another flow at its entry point.
    Replace { flow: &'static str },
}

impl Step {
    pub fn advance(state: &'static str) -> Self {
        Step::Advance {
            state,
            merge: Map::new(),
        }
    }

    pub fn advance_with(state: &'static str, merge: Map<String, Value>) -> Self {
        Step::Advance { state, merge }
    }
}

/// Builder for the merge map, keeps handlers terse.
pub fn merge1(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// Conversation persistence. In-process map for single workers, Redis
/// for a fleet; both expose the same interface.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, chat_id: i64) -> Result<Option<Conversation>>;
    async fn save(&self, chat_id: i64, convo: &Conversation) -> Result<()>;
    async fn clear(&self, chat_id: i64) -> Result<()>;
}

/// Apply a handler's step. Advance targets are validated against the
/// owning flow's declared state set; an unknown target is a programming
/// error surfaced loudly rather than silently corrupting the chat.
pub async fn apply_step(
    store: &dyn ConversationStore,
    chat_id: i64,
    mut convo: Conversation,
    step: Step,
    flow_states: &[&str],
) -> Result<Option<Conversation>> {
    match step {
        Step::Stay => Ok(Some(convo)),
        Step::Clear => {
            store.clear(chat_id).await?;
            Ok(None)
        }
        Step::Advance { state, merge } => {
            if !flow_states.contains(&state) {
                bail!("flow {} has no state {state}", convo.flow);
            }
            convo.state = state.to_string();
            for (k, v) in merge {
                convo.context.insert(k, v);
            }
            store.save(chat_id, &convo).await?;
            Ok(Some(convo))
        }
        Step::Replace { .. } => {
            // Drop the old state; the router re-enters the new flow.
            store.clear(chat_id).await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use serde_json::json;

    const STATES: &[&str] = &["one", "two"];

    #[tokio::test]
    async fn advance_merges_and_persists() {
        let store = MemoryStore::new();
        let convo = Conversation::new("f", "one");
        store.save(7, &convo).await.unwrap();

        let step = Step::advance_with("two", merge1("phone", json!("+998901112233")));
        let next = apply_step(&store, 7, convo, step, STATES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.state, "two");
        assert_eq!(next.str_value("phone"), Some("+998901112233"));

        let loaded = store.load(7).await.unwrap().unwrap();
        assert_eq!(loaded.state, "two");
        assert_eq!(loaded.str_value("phone"), Some("+998901112233"));
    }

    #[tokio::test]
    async fn advance_to_undeclared_state_fails() {
        let store = MemoryStore::new();
        let convo = Conversation::new("f", "one");
        let result = apply_step(&store, 7, convo, Step::advance("nope"), STATES).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clear_removes_conversation() {
        let store = MemoryStore::new();
        let convo = Conversation::new("f", "one");
        store.save(7, &convo).await.unwrap();
        apply_step(&store, 7, convo, Step::Clear, STATES)
            .await
            .unwrap();
        assert!(store.load(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stay_keeps_state() {
        let store = MemoryStore::new();
        let mut convo = Conversation::new("f", "one");
        convo.context.insert("k".into(), json!(1));
        store.save(7, &convo).await.unwrap();
        let next = apply_step(&store, 7, convo, Step::Stay, STATES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.state, "one");
        assert_eq!(next.i64_value("k"), Some(1));
    }

    #[test]
    fn typed_context_accessors() {
        let mut convo = Conversation::new("f", "s");
        convo.context.insert("names".into(), json!(["a", "b"]));
        convo.context.insert("n".into(), json!(3));
        convo.context.insert("lat".into(), json!(41.3));
        assert_eq!(convo.str_list("names"), vec!["a", "b"]);
        assert_eq!(convo.i64_value("n"), Some(3));
        assert_eq!(convo.f64_value("lat"), Some(41.3));
        assert_eq!(convo.str_value("missing"), None);
    }
}
