use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque resume token identifying an event's position in the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    #[serde(rename = "_data")]
    pub data: String,
}

/// Identity of the document affected by a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKey<K> {
    #[serde(rename = "_id")]
    pub id: K,
}

/// Namespace (database and collection) a change happened in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

/// Kind of mutation described by a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    Invalidate,
    Other(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Replace => "replace",
            OperationType::Delete => "delete",
            OperationType::Drop => "drop",
            OperationType::Rename => "rename",
            OperationType::DropDatabase => "dropDatabase",
            OperationType::Invalidate => "invalidate",
            OperationType::Other(s) => s,
        }
    }

    /// Whether events of this kind carry a post-image in `full_document`.
    pub fn carries_full_document(&self) -> bool {
        matches!(
            self,
            OperationType::Insert | OperationType::Update | OperationType::Replace
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for OperationType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "insert" => OperationType::Insert,
            "update" => OperationType::Update,
            "replace" => OperationType::Replace,
            "delete" => OperationType::Delete,
            "drop" => OperationType::Drop,
            "rename" => OperationType::Rename,
            "dropDatabase" => OperationType::DropDatabase,
            "invalidate" => OperationType::Invalidate,
            _ => OperationType::Other(s),
        }
    }
}

impl From<OperationType> for String {
    fn from(op: OperationType) -> Self {
        op.as_str().to_string()
    }
}

/// Array field that was shrunk by an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncatedArray {
    pub field: String,
    pub new_size: u32,
}

/// Field-level diff attached to update events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    #[serde(default)]
    pub updated_fields: Map<String, Value>,
    #[serde(default)]
    pub removed_fields: Vec<String>,
    #[serde(default)]
    pub truncated_arrays: Vec<TruncatedArray>,
}

impl UpdateDescription {
    /// Decode the updated fields into a typed partial document.
    ///
    /// `U` should tolerate missing fields (`Option` or `#[serde(default)]`),
    /// since an update only lists what changed.
    pub fn updated_as<U: DeserializeOwned>(&self) -> serde_json::Result<U> {
        serde_json::from_value(Value::Object(self.updated_fields.clone()))
    }

    pub fn is_removed(&self, field: &str) -> bool {
        self.removed_fields.iter().any(|f| f == field)
    }
}

/// One change notification emitted by the upstream feed.
///
/// `T` is the document shape, `K` the document key shape. Serialized names
/// follow the feed's wire format so outbox readers see the same layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent<T, K> {
    #[serde(rename = "_id")]
    pub id: EventId,
    pub document_key: DocumentKey<K>,
    pub operation_type: OperationType,
    pub full_document: Option<T>,
    /// Requires pre-image capture to be enabled on the collection
    pub full_document_before_change: Option<T>,
    #[serde(default)]
    pub update_description: Option<UpdateDescription>,
    pub cluster_time: DateTime<Utc>,
    pub ns: Namespace,
}

impl<T, K> ChangeEvent<T, K> {
    pub fn resume_token(&self) -> &str {
        &self.id.data
    }

    /// Checkpoint that marks this event as consumed.
    pub fn stream_offset(&self) -> StreamOffset {
        StreamOffset {
            resume_token: self.id.data.clone(),
            timestamp: Some(self.cluster_time),
        }
    }
}

/// Durable consumption progress: the last handled event's resume token and
/// cluster time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOffset {
    #[serde(rename = "token")]
    pub resume_token: String,
    #[serde(rename = "ts", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StreamOffset {
    pub fn new(resume_token: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            resume_token: resume_token.into(),
            timestamp: Some(timestamp),
        }
    }

    /// Checkpoint with only a timestamp, as written by tools that reposition
    /// a consumer to a point in time.
    pub fn at_time(timestamp: DateTime<Utc>) -> Self {
        Self {
            resume_token: String::new(),
            timestamp: Some(timestamp),
        }
    }

    pub fn has_resume_token(&self) -> bool {
        !self.resume_token.is_empty()
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// The cleared checkpoint: no token and no timestamp.
    pub fn is_empty(&self) -> bool {
        !self.has_resume_token() && !self.has_timestamp()
    }
}
