//! Raw log entry -> change event translation
//!
//! Total over its input: anything that cannot be turned into an event is
//! reported as a [`SkipReason`] and never as an error, so one odd entry can't
//! tear down a healthy cursor.

use crate::core::{ChangeEvent, OperationKind, RawLogEntry};
use std::fmt;
use tracing::debug;

/// Why an entry produced no event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Operation code outside insert/update/delete
    UnknownOperation(String),
    /// Namespace not in `database.collection` form
    MalformedNamespace(String),
    /// Entry belongs to a database other than the target
    ForeignDatabase(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOperation(op) => write!(f, "unknown operation '{}'", op),
            Self::MalformedNamespace(ns) => write!(f, "malformed namespace '{}'", ns),
            Self::ForeignDatabase(db) => write!(f, "foreign database '{}'", db),
        }
    }
}

/// Translate `entry`, keeping only events for `target_db` when one is set
pub fn classify(entry: &RawLogEntry, target_db: Option<&str>) -> Result<ChangeEvent, SkipReason> {
    let kind = OperationKind::from_code(&entry.op)
        .ok_or_else(|| SkipReason::UnknownOperation(entry.op.clone()))?;

    let (database, collection) = split_namespace(&entry.ns)
        .ok_or_else(|| SkipReason::MalformedNamespace(entry.ns.clone()))?;

    if target_db.is_some_and(|target| target != database) {
        return Err(SkipReason::ForeignDatabase(database.to_string()));
    }

    Ok(ChangeEvent {
        database: database.to_string(),
        collection: collection.to_string(),
        kind,
        payload: entry.payload.clone(),
        position: entry.position,
    })
}

/// Translate `entry`, `None` when it is not relevant
pub fn translate(entry: &RawLogEntry, target_db: Option<&str>) -> Option<ChangeEvent> {
    match classify(entry, target_db) {
        Ok(event) => Some(event),
        Err(reason) => {
            debug!("Ignoring oplog entry at {}: {}", entry.position, reason);
            None
        }
    }
}

/// Split on the first `.`; collection names may themselves contain dots
fn split_namespace(ns: &str) -> Option<(&str, &str)> {
    let (database, collection) = ns.split_once('.')?;
    if database.is_empty() || collection.is_empty() {
        return None;
    }
    Some((database, collection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResumePosition;
    use serde_json::json;

    fn entry(op: &str, ns: &str) -> RawLogEntry {
        RawLogEntry::new(ResumePosition::new(1, 1), op, ns, json!({"a": 123}))
    }

    #[test]
    fn test_translate_known_operations() {
        let event = translate(&entry("i", "shop.orders"), None).unwrap();
        assert_eq!(event.database, "shop");
        assert_eq!(event.collection, "orders");
        assert_eq!(event.kind, OperationKind::Insert);
        assert_eq!(event.payload["a"], 123);

        assert_eq!(
            translate(&entry("u", "shop.orders"), None).unwrap().kind,
            OperationKind::Update
        );
        assert_eq!(
            translate(&entry("d", "shop.orders"), None).unwrap().kind,
            OperationKind::Delete
        );
    }

    #[test]
    fn test_unknown_operation_is_skipped() {
        assert_eq!(
            classify(&entry("c", "shop.$cmd"), None),
            Err(SkipReason::UnknownOperation("c".to_string()))
        );
        assert!(translate(&entry("n", ""), None).is_none());
    }

    #[test]
    fn test_database_filter() {
        assert!(translate(&entry("i", "shop.orders"), Some("shop")).is_some());
        assert_eq!(
            classify(&entry("i", "other.orders"), Some("shop")),
            Err(SkipReason::ForeignDatabase("other".to_string()))
        );
    }

    #[test]
    fn test_dotted_collection_name() {
        let event = translate(&entry("i", "shop.orders.archive"), Some("shop")).unwrap();
        assert_eq!(event.collection, "orders.archive");
    }

    #[test]
    fn test_malformed_namespace() {
        for ns in ["orders", ".orders", "shop.", ""] {
            assert!(
                matches!(
                    classify(&entry("i", ns), None),
                    Err(SkipReason::MalformedNamespace(_))
                ),
                "namespace {:?} should be rejected",
                ns
            );
        }
    }
}
