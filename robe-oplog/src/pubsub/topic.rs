use crate::core::{OperationKind, WatchError, WatchResult};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Separator between the collection and operation segments
pub const TOPIC_DELIMITER: char = ':';

/// Segment value matching anything
pub const WILDCARD: &str = "*";

/// One segment of a topic pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment<T> {
    /// `*` wildcard
    Any,
    /// Literal value
    Exact(T),
}

impl<T> Segment<T> {
    pub fn matches<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected.borrow() == value,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

/// Subscription key `<collection>:<operation>`, either segment may be `*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    pub collection: Segment<String>,
    pub operation: Segment<OperationKind>,
}

impl TopicPattern {
    /// `<collection>:<kind>`
    pub fn exact(collection: &str, kind: OperationKind) -> WatchResult<Self> {
        Ok(Self {
            collection: Segment::Exact(validate_collection(collection)?),
            operation: Segment::Exact(kind),
        })
    }

    /// `<collection>:*`
    pub fn collection(collection: &str) -> WatchResult<Self> {
        Ok(Self {
            collection: Segment::Exact(validate_collection(collection)?),
            operation: Segment::Any,
        })
    }

    /// `*:*`
    pub fn any() -> Self {
        Self {
            collection: Segment::Any,
            operation: Segment::Any,
        }
    }

    /// Parse a `<collection>:<operation>` pattern
    pub fn parse(pattern: &str) -> WatchResult<Self> {
        let (collection, operation) = pattern
            .split_once(TOPIC_DELIMITER)
            .ok_or_else(|| WatchError::InvalidTopic(format!("missing ':' in '{}'", pattern)))?;

        let collection = if collection == WILDCARD {
            Segment::Any
        } else {
            Segment::Exact(validate_collection(collection)?)
        };

        let operation = if operation == WILDCARD {
            Segment::Any
        } else {
            Segment::Exact(
                operation
                    .parse::<OperationKind>()
                    .map_err(|e| WatchError::InvalidTopic(format!("{} in '{}'", e, pattern)))?,
            )
        };

        Ok(Self {
            collection,
            operation,
        })
    }

    /// Pattern contains at least one wildcard segment
    pub fn is_wildcard(&self) -> bool {
        self.collection.is_any() || self.operation.is_any()
    }

    pub fn matches(&self, collection: &str, kind: OperationKind) -> bool {
        self.collection.matches(collection) && self.operation.matches(&kind)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.collection {
            Segment::Any => f.write_str(WILDCARD)?,
            Segment::Exact(name) => f.write_str(name)?,
        }
        write!(f, "{}", TOPIC_DELIMITER)?;
        match &self.operation {
            Segment::Any => f.write_str(WILDCARD),
            Segment::Exact(kind) => f.write_str(kind.as_str()),
        }
    }
}

impl FromStr for TopicPattern {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_collection(name: &str) -> WatchResult<String> {
    if name.is_empty() {
        return Err(WatchError::InvalidTopic(
            "collection name cannot be empty".to_string(),
        ));
    }
    if name.contains(TOPIC_DELIMITER) {
        return Err(WatchError::InvalidTopic(format!(
            "collection name '{}' contains '{}'",
            name, TOPIC_DELIMITER
        )));
    }
    Ok(name.to_string())
}
