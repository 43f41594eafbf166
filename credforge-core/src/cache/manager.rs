//! Schema-aware access to the credential cache.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entities::{
    AccessTokenEntity, AccountEntity, AppMetadataEntity, AuthorityMetadataEntity, CacheKeyKind,
    CacheRecord, CredentialEntity, IdTokenEntity, RefreshTokenEntity, ServerTelemetryEntity,
    ThrottlingEntity,
};
use crate::authority::TrustedHostRegistry;
use crate::error::{AuthError, ClientAuthError};
use crate::model::{AccountInfo, CredentialType, THE_FAMILY_ID};
use crate::scope::{OFFLINE_ACCESS_SCOPE, ScopeSet};
use crate::store::{CacheStorage, StoreError};

/// Predicates for account lookups. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub home_account_id: Option<String>,
    pub environment: Option<String>,
    pub realm: Option<String>,
}

/// Predicates for credential lookups. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct CredentialFilter {
    pub home_account_id: Option<String>,
    pub environment: Option<String>,
    pub credential_type: Option<CredentialType>,
    pub client_id: Option<String>,
    pub family_id: Option<String>,
    pub realm: Option<String>,
    pub target: Option<ScopeSet>,
    pub obo_assertion: Option<String>,
}

impl CredentialFilter {
    /// Filter for the credentials of one account.
    pub fn for_account(account: &AccountInfo, credential_type: CredentialType) -> Self {
        Self {
            home_account_id: Some(account.home_account_id.clone()),
            environment: Some(account.environment.clone()),
            credential_type: Some(credential_type),
            ..Default::default()
        }
    }
}

/// Credentials returned by a filtered lookup, keyed by cache key.
#[derive(Debug, Clone, Default)]
pub struct CredentialCache {
    pub id_tokens: HashMap<String, IdTokenEntity>,
    pub access_tokens: HashMap<String, AccessTokenEntity>,
    pub refresh_tokens: HashMap<String, RefreshTokenEntity>,
}

impl CredentialCache {
    pub fn len(&self) -> usize {
        self.id_tokens.len() + self.access_tokens.len() + self.refresh_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads, writes and matches cache entities over a [`CacheStorage`].
///
/// Cloning is cheap; clones share the same storage and host registry.
#[derive(Clone)]
pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    registry: Arc<TrustedHostRegistry>,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn CacheStorage>, registry: Arc<TrustedHostRegistry>) -> Self {
        Self { storage, registry }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<TrustedHostRegistry> {
        &self.registry
    }

    async fn get_entity<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.storage.get_item(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entity) => Ok(Some(entity)),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring malformed cache entry");
                Ok(None)
            }
        }
    }

    async fn set_entity<T: Serialize>(&self, key: &str, entity: &T) -> Result<(), StoreError> {
        let value = serde_json::to_string(entity)?;
        self.storage.set_item(key, &value).await
    }

    /// Write every entity of a record.
    pub async fn save_cache_record(&self, record: &CacheRecord) -> Result<(), AuthError> {
        if let Some(account) = &record.account {
            self.set_entity(&account.cache_key(), account).await?;
        }
        if let Some(id_token) = &record.id_token {
            self.set_entity(&id_token.cache_key(), id_token).await?;
        }
        if let Some(access_token) = &record.access_token {
            self.save_access_token(access_token).await?;
        }
        if let Some(refresh_token) = &record.refresh_token {
            self.set_entity(&refresh_token.cache_key(), refresh_token)
                .await?;
        }
        if let Some(app_metadata) = &record.app_metadata {
            self.set_entity(&app_metadata.cache_key(), app_metadata)
                .await?;
        }
        Ok(())
    }

    /// Write an access token, evicting cached tokens whose scopes it supersedes.
    pub async fn save_access_token(&self, access_token: &AccessTokenEntity) -> Result<(), AuthError> {
        let new_scopes = access_token
            .target
            .as_deref()
            .and_then(|t| ScopeSet::from_scope_string(t).ok());

        if let Some(new_scopes) = new_scopes {
            // Target is left out on purpose: any overlapping token must go
            let filter = CredentialFilter {
                home_account_id: Some(access_token.home_account_id.clone()),
                environment: Some(access_token.environment.clone()),
                credential_type: Some(CredentialType::AccessToken),
                client_id: Some(access_token.client_id.clone()),
                realm: Some(access_token.realm.clone()),
                ..Default::default()
            };
            let existing = self.get_credentials_filtered_by(&filter).await?;

            for (key, cached) in existing.access_tokens {
                let Some(cached_scopes) = cached
                    .target
                    .as_deref()
                    .and_then(|t| ScopeSet::from_scope_string(t).ok())
                else {
                    continue;
                };
                if cached_scopes.intersecting_scope_sets(&new_scopes) {
                    debug!(key = %key, "Evicting superseded access token");
                    self.storage.remove_item(&key).await?;
                }
            }
        }

        self.set_entity(&access_token.cache_key(), access_token)
            .await?;
        Ok(())
    }

    /// Accounts matching every set predicate, keyed by cache key.
    pub async fn get_accounts_filtered_by(
        &self,
        filter: &AccountFilter,
    ) -> Result<HashMap<String, AccountEntity>, AuthError> {
        let mut matches = HashMap::new();

        for key in self.storage.get_keys().await? {
            if CacheKeyKind::classify(&key) != CacheKeyKind::Other {
                continue;
            }
            let Some(account) = self.get_entity::<AccountEntity>(&key).await? else {
                continue;
            };
            if self.account_matches(&account, filter) {
                matches.insert(key, account);
            }
        }

        Ok(matches)
    }

    fn account_matches(&self, account: &AccountEntity, filter: &AccountFilter) -> bool {
        if let Some(home_account_id) = &filter.home_account_id {
            if !account.home_account_id.eq_ignore_ascii_case(home_account_id) {
                return false;
            }
        }
        if let Some(environment) = &filter.environment {
            if !self
                .registry
                .matches_environment(environment, &account.environment)
            {
                return false;
            }
        }
        if let Some(realm) = &filter.realm {
            if !account.realm.eq_ignore_ascii_case(realm) {
                return false;
            }
        }
        true
    }

    /// Credentials matching every set predicate.
    ///
    /// Keys are classified by the credential type they contain and skipped
    /// before deserializing when the type cannot match.
    pub async fn get_credentials_filtered_by(
        &self,
        filter: &CredentialFilter,
    ) -> Result<CredentialCache, AuthError> {
        let mut cache = CredentialCache::default();

        for key in self.storage.get_keys().await? {
            let CacheKeyKind::Credential(credential_type) = CacheKeyKind::classify(&key) else {
                continue;
            };
            if filter
                .credential_type
                .is_some_and(|wanted| wanted != credential_type)
            {
                continue;
            }

            match credential_type {
                CredentialType::IdToken => {
                    if let Some(entity) = self.get_entity::<IdTokenEntity>(&key).await? {
                        if self.credential_matches(&entity, filter) {
                            cache.id_tokens.insert(key, entity);
                        }
                    }
                }
                CredentialType::AccessToken => {
                    if let Some(entity) = self.get_entity::<AccessTokenEntity>(&key).await? {
                        if self.credential_matches(&entity, filter) {
                            cache.access_tokens.insert(key, entity);
                        }
                    }
                }
                CredentialType::RefreshToken => {
                    if let Some(entity) = self.get_entity::<RefreshTokenEntity>(&key).await? {
                        if self.credential_matches(&entity, filter) {
                            cache.refresh_tokens.insert(key, entity);
                        }
                    }
                }
            }
        }

        Ok(cache)
    }

    fn credential_matches(&self, entity: &CredentialEntity, filter: &CredentialFilter) -> bool {
        if let Some(obo_assertion) = &filter.obo_assertion {
            if entity.obo_assertion.as_deref() != Some(obo_assertion.as_str()) {
                return false;
            }
        }
        if let Some(home_account_id) = &filter.home_account_id {
            if !entity.home_account_id.eq_ignore_ascii_case(home_account_id) {
                return false;
            }
        }
        if let Some(environment) = &filter.environment {
            if !self
                .registry
                .matches_environment(environment, &entity.environment)
            {
                return false;
            }
        }
        if let Some(realm) = &filter.realm {
            if !entity.realm.eq_ignore_ascii_case(realm) {
                return false;
            }
        }
        if let Some(credential_type) = filter.credential_type {
            if entity.credential_type != credential_type {
                return false;
            }
        }
        if let Some(client_id) = &filter.client_id {
            if !entity.client_id.eq_ignore_ascii_case(client_id) {
                return false;
            }
        }
        if let Some(family_id) = &filter.family_id {
            if entity.family_id.as_deref() != Some(family_id.as_str()) {
                return false;
            }
        }
        if let Some(target) = &filter.target {
            if !Self::target_matches(entity, target) {
                return false;
            }
        }
        true
    }

    fn target_matches(entity: &CredentialEntity, wanted: &ScopeSet) -> bool {
        if entity.credential_type != CredentialType::AccessToken {
            return false;
        }
        let Some(cached) = entity
            .target
            .as_deref()
            .and_then(|t| ScopeSet::from_scope_string(t).ok())
        else {
            return false;
        };

        let mut wanted = wanted.clone();
        if wanted.contains_only_oidc_scopes() {
            wanted.remove_scope(OFFLINE_ACCESS_SCOPE);
        } else {
            wanted.remove_oidc_scopes();
        }
        cached.contains_scope_set(&wanted)
    }

    /// Every cached account, ordered by cache key.
    pub async fn get_all_accounts(&self) -> Result<Vec<AccountInfo>, AuthError> {
        let accounts = self
            .get_accounts_filtered_by(&AccountFilter::default())
            .await?;
        let mut accounts: Vec<(String, AccountEntity)> = accounts.into_iter().collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(accounts
            .into_iter()
            .map(|(_, account)| account.account_info())
            .collect())
    }

    pub async fn get_account(&self, key: &str) -> Result<Option<AccountEntity>, AuthError> {
        Ok(self.get_entity(&key.to_lowercase()).await?)
    }

    pub async fn read_account_from_cache(
        &self,
        account: &AccountInfo,
    ) -> Result<Option<AccountEntity>, AuthError> {
        self.get_account(&account.cache_key()).await
    }

    /// Remove an account together with every credential it owns.
    pub async fn remove_account(&self, key: &str) -> Result<(), AuthError> {
        let key = key.to_lowercase();
        let account = self
            .get_account(&key)
            .await?
            .ok_or_else(|| ClientAuthError::NoAccountFound { key: key.clone() })?;

        let account_id = account.account_id();
        let credentials = self
            .get_credentials_filtered_by(&CredentialFilter::default())
            .await?;

        let owned_keys = credentials
            .id_tokens
            .iter()
            .filter(|(_, c)| c.account_id() == account_id)
            .map(|(k, _)| k)
            .chain(
                credentials
                    .access_tokens
                    .iter()
                    .filter(|(_, c)| c.account_id() == account_id)
                    .map(|(k, _)| k),
            )
            .chain(
                credentials
                    .refresh_tokens
                    .iter()
                    .filter(|(_, c)| c.account_id() == account_id)
                    .map(|(k, _)| k),
            );

        for credential_key in owned_keys {
            self.storage.remove_item(credential_key).await?;
        }
        self.storage.remove_item(&key).await?;

        debug!(account = %key, "Removed account and its credentials");
        Ok(())
    }

    pub async fn remove_all_accounts(&self) -> Result<(), AuthError> {
        let accounts = self
            .get_accounts_filtered_by(&AccountFilter::default())
            .await?;
        for key in accounts.keys() {
            self.remove_account(key).await?;
        }
        Ok(())
    }

    pub async fn remove_credential(&self, credential: &CredentialEntity) -> Result<(), AuthError> {
        self.storage.remove_item(&credential.cache_key()).await?;
        Ok(())
    }

    /// Read everything cached for an account and request.
    pub async fn read_cache_record(
        &self,
        account: &AccountInfo,
        client_id: &str,
        scopes: &ScopeSet,
        environment: &str,
    ) -> Result<CacheRecord, AuthError> {
        Ok(CacheRecord {
            account: self.read_account_from_cache(account).await?,
            id_token: self.read_id_token_from_cache(client_id, account).await?,
            access_token: self
                .read_access_token_from_cache(client_id, account, scopes)
                .await?,
            refresh_token: self
                .read_refresh_token_from_cache(client_id, account, false)
                .await?,
            app_metadata: self
                .read_app_metadata_from_cache(environment, client_id)
                .await?,
        })
    }

    pub async fn read_id_token_from_cache(
        &self,
        client_id: &str,
        account: &AccountInfo,
    ) -> Result<Option<IdTokenEntity>, AuthError> {
        let filter = CredentialFilter {
            client_id: Some(client_id.to_string()),
            realm: Some(account.tenant_id.clone()),
            ..CredentialFilter::for_account(account, CredentialType::IdToken)
        };
        let tokens = self.get_credentials_filtered_by(&filter).await?.id_tokens;
        single(tokens, "id token")
    }

    pub async fn read_access_token_from_cache(
        &self,
        client_id: &str,
        account: &AccountInfo,
        scopes: &ScopeSet,
    ) -> Result<Option<AccessTokenEntity>, AuthError> {
        let filter = CredentialFilter {
            client_id: Some(client_id.to_string()),
            realm: Some(account.tenant_id.clone()),
            target: Some(scopes.clone()),
            ..CredentialFilter::for_account(account, CredentialType::AccessToken)
        };
        self.read_access_token_by_filter(&filter).await
    }

    /// Read the single access token matching a filter.
    pub async fn read_access_token_by_filter(
        &self,
        filter: &CredentialFilter,
    ) -> Result<Option<AccessTokenEntity>, AuthError> {
        let filter = CredentialFilter {
            credential_type: Some(CredentialType::AccessToken),
            ..filter.clone()
        };
        let tokens = self.get_credentials_filtered_by(&filter).await?.access_tokens;
        single(tokens, "access token")
    }

    /// Read a refresh token for the account.
    ///
    /// With `family` set only family refresh tokens match and the client id
    /// is ignored, so a sibling application's token can be used.
    pub async fn read_refresh_token_from_cache(
        &self,
        client_id: &str,
        account: &AccountInfo,
        family: bool,
    ) -> Result<Option<RefreshTokenEntity>, AuthError> {
        let mut filter = CredentialFilter::for_account(account, CredentialType::RefreshToken);
        if family {
            filter.family_id = Some(THE_FAMILY_ID.to_string());
        } else {
            filter.client_id = Some(client_id.to_string());
        }

        let tokens = self
            .get_credentials_filtered_by(&filter)
            .await?
            .refresh_tokens;
        let mut tokens: Vec<(String, RefreshTokenEntity)> = tokens.into_iter().collect();
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(tokens.into_iter().next().map(|(_, token)| token))
    }

    pub async fn read_app_metadata_from_cache(
        &self,
        environment: &str,
        client_id: &str,
    ) -> Result<Option<AppMetadataEntity>, AuthError> {
        let mut matches = HashMap::new();
        for key in self.storage.get_keys().await? {
            if CacheKeyKind::classify(&key) != CacheKeyKind::AppMetadata {
                continue;
            }
            let Some(entity) = self.get_entity::<AppMetadataEntity>(&key).await? else {
                continue;
            };
            if entity.client_id.eq_ignore_ascii_case(client_id)
                && self
                    .registry
                    .matches_environment(environment, &entity.environment)
            {
                matches.insert(key, entity);
            }
        }
        single(matches, "app metadata")
    }

    /// Returns true if the application is known to be part of the family.
    pub async fn is_app_metadata_foci(
        &self,
        environment: &str,
        client_id: &str,
    ) -> Result<bool, AuthError> {
        Ok(self
            .read_app_metadata_from_cache(environment, client_id)
            .await?
            .is_some_and(|meta| meta.is_foci()))
    }

    pub async fn get_throttling_entity(
        &self,
        key: &str,
    ) -> Result<Option<ThrottlingEntity>, StoreError> {
        self.get_entity(key).await
    }

    pub async fn set_throttling_entity(
        &self,
        key: &str,
        entity: &ThrottlingEntity,
    ) -> Result<(), StoreError> {
        self.set_entity(key, entity).await
    }

    pub async fn get_server_telemetry(
        &self,
        key: &str,
    ) -> Result<Option<ServerTelemetryEntity>, StoreError> {
        self.get_entity(key).await
    }

    pub async fn set_server_telemetry(
        &self,
        key: &str,
        entity: &ServerTelemetryEntity,
    ) -> Result<(), StoreError> {
        self.set_entity(key, entity).await
    }

    pub async fn get_authority_metadata(
        &self,
        key: &str,
    ) -> Result<Option<AuthorityMetadataEntity>, StoreError> {
        self.get_entity(key).await
    }

    pub async fn set_authority_metadata(
        &self,
        key: &str,
        entity: &AuthorityMetadataEntity,
    ) -> Result<(), StoreError> {
        self.set_entity(key, entity).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.storage.remove_item(key).await
    }

    pub async fn get_keys(&self) -> Result<Vec<String>, StoreError> {
        self.storage.get_keys().await
    }

    /// Remove everything, including non-credential entries.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.storage.clear().await
    }
}

fn single<T>(matches: HashMap<String, T>, kind: &str) -> Result<Option<T>, AuthError> {
    if matches.len() > 1 {
        return Err(ClientAuthError::MultipleMatchingTokens {
            kind: kind.to_string(),
        }
        .into());
    }
    Ok(matches.into_values().next())
}
