use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::subject::SubjectId;

/// Hard cap on items in one pending attachment. Reaching it forces the
/// wizard's forward transition.
pub const ATTACHMENT_CAP: usize = 6;

/// Age after which an unfinished attachment is eligible for the external
/// sweep, matching the session timeout.
pub const ATTACHMENT_TTL_MINUTES: i64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentCategory {
    Prescription,
}

impl AttachmentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prescription => "prescription",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "prescription" => Some(Self::Prescription),
            _ => None,
        }
    }
}

/// One fetched media payload. Bytes are held verbatim; content type is the
/// value reported by the media endpoint, not the inbound event.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for MediaItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaItem")
            .field("content_type", &self.content_type)
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { count: usize },
    Rejected,
}

/// Flow-scoped accumulation of uploads for one (subject, category) pair.
/// Deleted on wizard commit or cancellation; independently swept once
/// older than the TTL, so consumers must treat a missing aggregate as empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAttachment {
    pub subject_id: SubjectId,
    pub category: AttachmentCategory,
    pub items: Vec<MediaItem>,
    pub created_at: DateTime<Utc>,
}

impl PendingAttachment {
    pub fn new(subject_id: SubjectId, category: AttachmentCategory, created_at: DateTime<Utc>) -> Self {
        Self { subject_id, category, items: Vec::new(), created_at }
    }

    pub fn append(&mut self, item: MediaItem) -> AppendOutcome {
        if self.items.len() >= ATTACHMENT_CAP {
            return AppendOutcome::Rejected;
        }
        self.items.push(item);
        AppendOutcome::Appended { count: self.items.len() }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= ATTACHMENT_CAP
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
