// crates/core/src/jobs/state.rs
//! Accumulated pipeline state and the merge contract between stages.
//!
//! Stages read an [`AccumulatedState`] and return a [`StatePatch`]. The
//! executor merges patches key by key, last writer wins. Two reserved keys
//! carry collaborators rather than data and are never serialized:
//! [`PUBLISHER_KEY`] (the job's broadcast handle) and [`JOB_ID_KEY`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::broadcast::JobPublisher;
use super::types::{JobId, ResearchParams};

/// Reserved key holding the job's [`JobPublisher`].
pub const PUBLISHER_KEY: &str = "publisher";
/// Reserved key holding the job id.
pub const JOB_ID_KEY: &str = "job_id";
pub const RESERVED_KEYS: [&str; 2] = [PUBLISHER_KEY, JOB_ID_KEY];

/// Top-level key of the primary artifact (the research report).
pub const ARTIFACT_KEY: &str = "report";
/// Sub-tree that may hold the artifact when the top-level key is absent.
pub const ARTIFACT_PARENT_KEY: &str = "editor";

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A non-data value placed into state (handles, clients, ...).
///
/// The sanitizer replaces these with [`OpaqueValue::describe`].
pub trait OpaqueValue: fmt::Debug + Send + Sync + 'static {
    fn describe(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

/// One node of the accumulated state tree.
#[derive(Debug, Clone)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
    Opaque(Arc<dyn OpaqueValue>),
}

impl StateValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this value counts as "present" when locating an artifact:
    /// null and blank text do not.
    pub fn is_present(&self) -> bool {
        match self {
            StateValue::Null => false,
            StateValue::Text(s) => !s.trim().is_empty(),
            _ => true,
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Int(v.into())
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<u64> for StateValue {
    fn from(v: u64) -> Self {
        StateValue::UInt(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(v: DateTime<Utc>) -> Self {
        StateValue::Timestamp(v)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(v: Vec<T>) -> Self {
        StateValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(StateValue::Null, Into::into)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(v: BTreeMap<String, StateValue>) -> Self {
        StateValue::Map(v)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StateValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    StateValue::UInt(u)
                } else {
                    StateValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => StateValue::Text(s),
            Value::Array(items) => StateValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                StateValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Partial state returned by one stage.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    values: BTreeMap<String, StateValue>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<StateValue>> FromIterator<(K, V)> for StatePatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for StatePatch {
    type Item = (String, StateValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, StateValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// The growing key/value result of folding every stage's patch for one job.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedState {
    params: Arc<ResearchParams>,
    values: BTreeMap<String, StateValue>,
}

impl AccumulatedState {
    /// Empty state with no collaborators attached.
    pub fn new(params: ResearchParams) -> Self {
        Self {
            params: Arc::new(params),
            values: BTreeMap::new(),
        }
    }

    /// State seeded with the reserved collaborator keys for `publisher`'s job.
    pub fn for_job(params: ResearchParams, publisher: JobPublisher) -> Self {
        let mut state = Self::new(params);
        state
            .values
            .insert(JOB_ID_KEY.to_string(), publisher.job_id().to_string().into());
        state
            .values
            .insert(PUBLISHER_KEY.to_string(), StateValue::Opaque(Arc::new(publisher)));
        state
    }

    /// The task's input parameters.
    pub fn params(&self) -> &ResearchParams {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    /// Follow `path` through nested maps.
    pub fn get_path(&self, path: &[&str]) -> Option<&StateValue> {
        let (first, rest) = path.split_first()?;
        let mut node = self.values.get(*first)?;
        for key in rest {
            node = node.as_map()?.get(*key)?;
        }
        Some(node)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StateValue::as_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Data keys, excluding the reserved collaborator keys.
    pub fn data_keys(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|k| !is_reserved_key(k))
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.get_text(JOB_ID_KEY)?.parse().ok()
    }

    pub fn publisher(&self) -> Option<&JobPublisher> {
        match self.values.get(PUBLISHER_KEY)? {
            StateValue::Opaque(value) => value.as_any().downcast_ref::<JobPublisher>(),
            _ => None,
        }
    }

    /// Value for `key` as a map with `child` set to `value`, keeping the
    /// existing children. Lets a stage extend a sub-tree while still
    /// declaring the whole key in its patch.
    pub fn extended_map(
        &self,
        key: &str,
        child: impl Into<String>,
        value: impl Into<StateValue>,
    ) -> StateValue {
        let mut map = self
            .get(key)
            .and_then(StateValue::as_map)
            .cloned()
            .unwrap_or_default();
        map.insert(child.into(), value.into());
        StateValue::Map(map)
    }

    /// Merge `patch` with last-writer-wins per key. Returns how many keys
    /// were written; reserved keys in the patch are ignored.
    pub fn merge(&mut self, patch: StatePatch) -> usize {
        let mut written = 0;
        for (key, value) in patch {
            if is_reserved_key(&key) {
                tracing::warn!(key = %key, "stage tried to overwrite a reserved state key; ignored");
                continue;
            }
            self.values.insert(key, value);
            written += 1;
        }
        written
    }

    /// The primary artifact: top-level [`ARTIFACT_KEY`] first, then
    /// `ARTIFACT_PARENT_KEY.ARTIFACT_KEY`.
    pub fn locate_artifact(&self) -> Option<&StateValue> {
        self.get(ARTIFACT_KEY)
            .filter(|v| v.is_present())
            .or_else(|| {
                self.get_path(&[ARTIFACT_PARENT_KEY, ARTIFACT_KEY])
                    .filter(|v| v.is_present())
            })
    }

    /// The whole tree, reserved keys included.
    pub fn to_value(&self) -> StateValue {
        StateValue::Map(self.values.clone())
    }
}
