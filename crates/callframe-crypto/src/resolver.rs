//! Mapping from media source ids to participant identities.
//!
//! The decryptor only sees the numeric source id carried in the frame header
//! or by the transport. Conference membership knows which participant owns
//! that source; the participant id hash feeds the IV seed derivation.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;

use crate::media::MediaType;

/// Failure to map a source id to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Membership has not caught up with this source yet
    #[error("source {source_id} is not known yet")]
    NotReady {
        /// Unresolved source id
        source_id: u32,
    },
}

/// Resolves the participant behind a media source.
pub trait UserResolver: Send + Sync {
    /// Participant id hash owning `source_id`.
    ///
    /// # Errors
    ///
    /// - `ResolveError::NotReady` while membership is still syncing
    fn resolve(&self, source_id: u32, is_video: bool) -> Result<String, ResolveError>;
}

impl<F> UserResolver for F
where
    F: Fn(u32, bool) -> Result<String, ResolveError> + Send + Sync,
{
    fn resolve(&self, source_id: u32, is_video: bool) -> Result<String, ResolveError> {
        self(source_id, is_video)
    }
}

impl<R: UserResolver + ?Sized> UserResolver for Arc<R> {
    fn resolve(&self, source_id: u32, is_video: bool) -> Result<String, ResolveError> {
        (**self).resolve(source_id, is_video)
    }
}

/// In-memory source table, updated as membership changes.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<(u32, MediaType), String>>,
}

impl StaticResolver {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `source_id` of the given media type to a participant.
    pub fn insert(&self, source_id: u32, media: MediaType, participant_id: impl Into<String>) {
        self.entries.write().insert((source_id, media), participant_id.into());
    }

    /// Forget a source. Returns true if it was mapped.
    pub fn remove(&self, source_id: u32, media: MediaType) -> bool {
        self.entries.write().remove(&(source_id, media)).is_some()
    }
}

impl UserResolver for StaticResolver {
    fn resolve(&self, source_id: u32, is_video: bool) -> Result<String, ResolveError> {
        let media = if is_video { MediaType::Video } else { MediaType::Audio };
        self.entries
            .read()
            .get(&(source_id, media))
            .cloned()
            .ok_or(ResolveError::NotReady { source_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_separates_media_types() {
        let resolver = StaticResolver::new();
        resolver.insert(7, MediaType::Audio, "alice");

        assert_eq!(resolver.resolve(7, false), Ok("alice".to_string()));
        assert_eq!(resolver.resolve(7, true), Err(ResolveError::NotReady { source_id: 7 }));
    }

    #[test]
    fn static_resolver_remove() {
        let resolver = StaticResolver::new();
        resolver.insert(1, MediaType::Video, "bob");

        assert!(resolver.remove(1, MediaType::Video));
        assert!(!resolver.remove(1, MediaType::Video));
        assert!(resolver.resolve(1, true).is_err());
    }

    #[test]
    fn closures_resolve() {
        let resolver = |source_id: u32, _is_video: bool| -> Result<String, ResolveError> {
            Ok(format!("user-{source_id}"))
        };
        assert_eq!(resolver.resolve(3, false), Ok("user-3".to_string()));
    }

    #[test]
    fn shared_resolver_sees_updates() {
        let table = Arc::new(StaticResolver::new());
        let shared: Arc<StaticResolver> = Arc::clone(&table);

        assert!(shared.resolve(9, false).is_err());
        table.insert(9, MediaType::Audio, "carol");
        assert_eq!(shared.resolve(9, false), Ok("carol".to_string()));
    }
}
