use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Which horoscope table a change-feed subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Daily,
    Weekly,
    Monthly,
}

impl ResourceClass {
    /// Every watched class, in the order subscriptions are opened.
    pub const ALL: [ResourceClass; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Backend table holding rows of this class.
    pub fn table(self) -> &'static str {
        match self {
            Self::Daily => "daily_horoscopes",
            Self::Weekly => "weekly_horoscopes",
            Self::Monthly => "monthly_horoscopes",
        }
    }

    /// Realtime channel name used when subscribing to the table.
    pub fn channel_name(self) -> String {
        format!("{}_changes", self.table())
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rc| rc.table() == table)
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceClass {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ParseError::new("resource class", s)),
        }
    }
}

/// Row-level operation reported by the change feed.
///
/// Only `Inserted` and `Updated` produce notifications. Anything else the
/// backend might send is kept so it can be logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Inserted,
    Updated,
    Deleted,
    Unknown,
}

impl<'de> Deserialize<'de> for ChangeOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Self::Unknown))
    }
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ChangeOperation {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inserted" | "insert" => Ok(Self::Inserted),
            "updated" | "update" => Ok(Self::Updated),
            "deleted" | "delete" => Ok(Self::Deleted),
            _ => Err(anyhow::anyhow!("unknown change operation: {}", s)),
        }
    }
}

/// A raw event as emitted by one change-feed subscription. The resource
/// class is implied by the subscription it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub operation: ChangeOperation,
    pub payload: Value,
}

/// A feed event with the resource class of its subscription attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub resource_class: ResourceClass,
    pub operation: ChangeOperation,
    pub payload: Value,
}

impl ChangeEvent {
    pub fn new(resource_class: ResourceClass, event: FeedEvent) -> Self {
        Self {
            resource_class,
            operation: event.operation,
            payload: event.payload,
        }
    }
}
