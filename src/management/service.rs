//! Management operations on the policy repositories and on diverts.

use std::sync::Arc;

use thiserror::Error;

use crate::config::validation::{validate_settings, ValidationError};
use crate::reload::ReloadManager;
use crate::settings::{
    AddressSettings, ResolvedAddressSettings, Role, RoleSet, SecurityRepository,
    SettingsRepository,
};
use crate::topology::{DivertSpec, EntityKey, EntitySpec, RegistryError};
use crate::wildcard::MatcherError;

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("invalid pattern: {0}")]
    Matcher(#[from] MatcherError),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct ManagementService {
    settings: Arc<SettingsRepository>,
    security: Arc<SecurityRepository>,
    reload: Arc<ReloadManager>,
}

impl ManagementService {
    pub fn new(
        settings: Arc<SettingsRepository>,
        security: Arc<SecurityRepository>,
        reload: Arc<ReloadManager>,
    ) -> Self {
        Self {
            settings,
            security,
            reload,
        }
    }

    /// Register a settings fragment given as JSON. Unset fields are omitted.
    pub fn add_address_settings(&self, pattern: &str, json: &str) -> Result<(), ManagementError> {
        let fragment = AddressSettings::from_json(json)?;
        self.add_address_settings_fragment(pattern, fragment)
    }

    pub fn add_address_settings_fragment(
        &self,
        pattern: &str,
        fragment: AddressSettings,
    ) -> Result<(), ManagementError> {
        let mut errors = Vec::new();
        validate_settings(pattern, &fragment, &mut errors);
        if !errors.is_empty() {
            return Err(ManagementError::Validation(errors));
        }
        self.settings.register(pattern, fragment)?;
        tracing::info!(pattern = %pattern, "Address settings registered through management");
        Ok(())
    }

    pub fn remove_address_settings(&self, pattern: &str) -> bool {
        let removed = self.settings.unregister(pattern);
        if removed {
            tracing::info!(pattern = %pattern, "Address settings removed through management");
        }
        removed
    }

    pub fn add_security_settings(
        &self,
        pattern: &str,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<(), ManagementError> {
        let roles: RoleSet = roles.into_iter().collect();
        let count = roles.len();
        self.security.register(pattern, roles)?;
        tracing::info!(pattern = %pattern, roles = count, "Security settings registered through management");
        Ok(())
    }

    pub fn remove_security_settings(&self, pattern: &str) -> bool {
        let removed = self.security.unregister(pattern);
        if removed {
            tracing::info!(pattern = %pattern, "Security settings removed through management");
        }
        removed
    }

    /// Effective settings for a concrete address.
    pub fn address_settings(&self, address: &str) -> Arc<ResolvedAddressSettings> {
        self.settings.resolve(address)
    }

    /// The fragment registered for an exact pattern, from either layer.
    pub fn address_settings_fragment(&self, pattern: &str) -> Option<AddressSettings> {
        self.settings.fragment(pattern)
    }

    /// The fragment registered for an exact pattern, as JSON.
    pub fn address_settings_fragment_json(
        &self,
        pattern: &str,
    ) -> Result<Option<String>, ManagementError> {
        self.address_settings_fragment(pattern)
            .map(|f| f.to_json())
            .transpose()
            .map_err(ManagementError::from)
    }

    /// Effective roles for a concrete address.
    pub fn security_roles(&self, address: &str) -> Arc<RoleSet> {
        self.security.resolve(address)
    }

    /// Create a divert that no configuration document owns. It survives
    /// reloads until a document declares a divert of the same name.
    pub fn create_divert(&self, spec: DivertSpec) -> Result<(), ManagementError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("name", &spec.name),
            ("address", &spec.address),
            ("forwarding_address", &spec.forwarding_address),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::new(format!("divert.{field}"), "must not be empty"));
            }
        }
        if !errors.is_empty() {
            return Err(ManagementError::Validation(errors));
        }

        let name = spec.name.clone();
        self.reload.create_unmanaged(EntitySpec::Divert(spec))?;
        tracing::info!(divert = %name, "Divert created through management");
        Ok(())
    }

    /// Returns false if no divert of that name exists.
    pub fn destroy_divert(&self, name: &str) -> Result<bool, ManagementError> {
        match self.reload.destroy_unmanaged(&EntityKey::divert(name)) {
            Ok(removed) => {
                if removed {
                    tracing::info!(divert = %name, "Divert destroyed through management");
                }
                Ok(removed)
            }
            Err(RegistryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
