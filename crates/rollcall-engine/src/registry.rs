//! Identity registry: the single source of truth for who is enrolled.
//!
//! Identities and their durable store sit behind one lock. Registration
//! holds the write lock across re-check, duplicate scan and append, so two
//! near-identical faces cannot both slip past the duplicate check.
//! Attendance works from read-locked snapshots.

use rollcall_core::{CosineMatcher, DuplicateHit, Embedding, Identity, IdentitySummary, Matcher, Thresholds};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::store::{IdentityStore, StoreError};

struct RegistryInner {
    identities: Vec<Identity>,
    store: Box<dyn IdentityStore>,
}

/// Registered identities plus their backing store.
pub struct Registry<M: Matcher = CosineMatcher> {
    inner: RwLock<RegistryInner>,
    matcher: M,
    thresholds: Thresholds,
    load_error: Option<String>,
}

impl Registry<CosineMatcher> {
    /// Load every identity from `store`.
    ///
    /// An unreadable store degrades to an empty registry; the failure is
    /// logged and kept in [`load_error`](Self::load_error).
    pub fn open(store: Box<dyn IdentityStore>, thresholds: Thresholds) -> Self {
        Self::with_matcher(store, thresholds, CosineMatcher)
    }
}

impl<M: Matcher> Registry<M> {
    pub fn with_matcher(store: Box<dyn IdentityStore>, thresholds: Thresholds, matcher: M) -> Self {
        let (identities, load_error) = match store.load_all() {
            Ok(identities) => {
                tracing::info!(count = identities.len(), "identity registry loaded");
                (identities, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not load identity store; no identities are available");
                (Vec::new(), Some(format!("Could not load registered students: {e}")))
            }
        };

        Self {
            inner: RwLock::new(RegistryInner { identities, store }),
            matcher,
            thresholds,
            load_error,
        }
    }

    /// Why the store failed to load, if it did.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn len(&self) -> usize {
        self.read().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().identities.iter().any(|i| i.id == id)
    }

    pub fn get(&self, id: &str) -> Option<Identity> {
        self.read().identities.iter().find(|i| i.id == id).cloned()
    }

    /// Consistent copy of the roster, in registration order.
    pub fn roster(&self) -> Vec<Identity> {
        self.read().identities.clone()
    }

    /// `{id, name}` for every identity, in registration order.
    pub fn list(&self) -> Vec<IdentitySummary> {
        self.read().identities.iter().map(IdentitySummary::from).collect()
    }

    /// First identity, in registration order, whose similarity to `candidate`
    /// exceeds the duplicate threshold.
    pub fn is_duplicate(&self, candidate: &Embedding) -> Option<DuplicateHit> {
        let inner = self.read();
        self.matcher
            .first_duplicate(candidate, &inner.identities, self.thresholds.duplicate)
    }

    /// Validate and persist a new identity whose embedding is already known.
    ///
    /// The durable append happens before the in-memory insert; if it fails
    /// the registry is unchanged. A registry whose store failed to load
    /// refuses new identities, since uniqueness cannot be checked.
    pub fn register(&self, id: &str, name: &str, embedding: Embedding) -> Result<Identity> {
        validate_identifier(id)?;
        if let Some(reason) = &self.load_error {
            return Err(Error::StoreUnavailable(StoreError::NotLoaded(reason.clone())));
        }

        let mut inner = self.write();
        if inner.identities.iter().any(|i| i.id == id) {
            return Err(Error::AlreadyRegistered(id.to_string()));
        }
        if let Some(first) = inner.identities.first() {
            if first.embedding.dim() != embedding.dim() {
                return Err(Error::Unexpected(format!(
                    "embedding has {} values, registered identities have {}",
                    embedding.dim(),
                    first.embedding.dim()
                )));
            }
        }

        tracing::debug!(stage = "duplicate_checking", id, "registration");
        if let Some(hit) = self
            .matcher
            .first_duplicate(&embedding, &inner.identities, self.thresholds.duplicate)
        {
            tracing::info!(id, existing = %hit.id, similarity = hit.similarity, "duplicate face rejected");
            return Err(Error::DuplicateFace {
                id: hit.id,
                name: hit.name,
                similarity: hit.similarity,
            });
        }

        let identity = Identity {
            id: id.to_string(),
            display_name: name.to_string(),
            embedding,
        };

        tracing::debug!(stage = "persisting", id, "registration");
        inner.store.append(&identity)?;
        inner.identities.push(identity.clone());

        tracing::info!(id, total = inner.identities.len(), "identity registered");
        Ok(identity)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// IDs must be non-empty and purely alphanumeric.
pub fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(char::is_alphanumeric) {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}
