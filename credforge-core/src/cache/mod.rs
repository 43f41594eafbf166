//! Credential cache.
//!
//! This module provides:
//! - [`entities`] - Account, credential and bookkeeping records with their key formats
//! - [`CacheManager`] - Writes, reads, filters and removes entities over a
//!   [`CacheStorage`](crate::store::CacheStorage) backend

pub mod entities;
mod manager;

pub use entities::{
    AccessTokenEntity, AccountEntity, AppMetadataEntity, AuthorityMetadataEntity, CacheRecord,
    CredentialEntity, IdTokenEntity, RefreshTokenEntity, RequestThumbprint, ServerTelemetryEntity,
    ThrottlingEntity,
};
pub use manager::{AccountFilter, CacheManager, CredentialCache, CredentialFilter};
