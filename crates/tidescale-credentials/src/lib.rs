//! tidescale-credentials — shared credential cache for scalers.
//!
//! Scalers that talk to cloud APIs need an SDK configuration built from a
//! region and an identity. Building one can be slow (token exchange, file
//! reads), and many triggers usually share the same identity, so the cache
//! hands out one `Arc<C>` per (region, identity) and tracks which scalers
//! hold it.
//!
//! # Lifecycle
//!
//! ```text
//! acquire(region, identity, consumer)
//!   ├── miss → insert entry, resolve once via CredentialProvider
//!   │          (concurrent misses wait on the same resolution)
//!   └── hit  → add consumer to usages, return cached Arc
//!
//! release(region, identity, consumer)
//!   └── remove consumer; evict entry when no usages remain
//! ```

pub mod cache;
pub mod error;
pub mod identity;

pub use cache::{CacheStats, CredentialCache, CredentialProvider};
pub use error::{CredentialError, CredentialResult};
pub use identity::{AuthorizationIdentity, cache_key};
