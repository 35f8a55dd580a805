//! Degrade-to-local helpers for outbound notifications
//!
//! Calls to the coordinating hub are not allowed to fail a task. When the
//! network is unavailable the caller gets a [`Delivery::Local`] value
//! carrying the error text and treats the notification as unconfirmed.
//!
//! Do not use this for model calls or tool execution; those failures must
//! be visible to the loop.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

use crate::Result;

/// Outcome of a call that may degrade instead of failing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Delivery<T> {
    /// Local variant first: `{error, local: true}` must not match a `T` that
    /// happens to accept arbitrary objects.
    Local { error: String, local: LocalMarker },
    Delivered(T),
}

/// Always serializes as `true`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMarker;

impl Serialize for LocalMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for LocalMarker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(LocalMarker)
        } else {
            Err(serde::de::Error::custom("local marker must be true"))
        }
    }
}

impl<T> Delivery<T> {
    pub fn local(error: impl Into<String>) -> Self {
        Delivery::Local {
            error: error.into(),
            local: LocalMarker,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }

    pub fn delivered(self) -> Option<T> {
        match self {
            Delivery::Delivered(value) => Some(value),
            Delivery::Local { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Delivery::Delivered(_) => None,
            Delivery::Local { error, .. } => Some(error),
        }
    }
}

/// Await `fut`, turning an error into [`Delivery::Local`] and logging it
pub async fn deliver_or_degrade<F, T>(operation_name: &str, fut: F) -> Delivery<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Delivery::Delivered(value),
        Err(e) => {
            warn!("{} failed (degraded to local): {}", operation_name, e);
            Delivery::local(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DroverError;

    #[tokio::test]
    async fn test_delivered() {
        let result = deliver_or_degrade("ok", async { Ok::<_, DroverError>(7) }).await;
        assert!(result.is_delivered());
        assert_eq!(result.delivered(), Some(7));
    }

    #[tokio::test]
    async fn test_degraded_on_error() {
        let result: Delivery<()> = deliver_or_degrade("hub_progress", async {
            Err(DroverError::Network("connection refused".to_string()))
        })
        .await;

        assert!(!result.is_delivered());
        assert!(result.error().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_local_serializes_with_marker() {
        let local: Delivery<serde_json::Value> = Delivery::local("offline");
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json, serde_json::json!({"error": "offline", "local": true}));

        let back: Delivery<serde_json::Value> = serde_json::from_value(json).unwrap();
        assert_eq!(back, local);
    }

    #[test]
    fn test_delivered_object_is_not_local() {
        let parsed: Delivery<serde_json::Value> =
            serde_json::from_value(serde_json::json!({"ok": true})).unwrap();
        assert!(parsed.is_delivered());
    }
}
