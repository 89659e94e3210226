use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::AdminState;
use crate::config::DivertConfig;
use crate::management::ManagementError;
use crate::reload::{ReloadStatus, TickOutcome};
use crate::settings::{AddressSettings, ResolvedAddressSettings, Role, RoleSet};
use crate::topology::{Binding, Provenance, RegistryError, ReportSummary};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub reload: ReloadStatus,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub outcome: &'static str,
    pub report: Option<ReportSummary>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct BindingView {
    pub binding: Binding,
    pub provenance: Provenance,
}

/// Error body returned by every failing route.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: what.into(),
        }
    }
}

impl From<ManagementError> for ApiError {
    fn from(e: ManagementError) -> Self {
        let status = match &e {
            ManagementError::Registry(RegistryError::AlreadyExists(_)) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        reload: state.broker.reload_manager().status(),
    })
}

pub async fn post_reload(
    State(state): State<AdminState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let broker = state.broker.clone();
    let outcome = blocking(move || broker.reload()).await?;

    Ok(Json(ReloadResponse {
        outcome: outcome.label(),
        report: outcome.report().map(|r| r.summary()),
        error: match &outcome {
            TickOutcome::Failed(e) => Some(e.to_string()),
            _ => None,
        },
    }))
}

pub async fn get_bindings(State(state): State<AdminState>) -> Json<Vec<BindingView>> {
    let views = state
        .broker
        .bindings()
        .into_iter()
        .map(|binding| BindingView {
            provenance: state.broker.provenance(&binding.key()),
            binding,
        })
        .collect();
    Json(views)
}

pub async fn get_resolved_settings(
    State(state): State<AdminState>,
    Path(address): Path<String>,
) -> Json<ResolvedAddressSettings> {
    Json(ResolvedAddressSettings::clone(&state.broker.settings_for(&address)))
}

pub async fn get_settings_fragment(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
) -> Result<Json<AddressSettings>, ApiError> {
    state
        .broker
        .management()
        .address_settings_fragment(&pattern)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no settings registered for '{pattern}'")))
}

/// The body is taken as a raw string so malformed JSON reports the same
/// error as the management call itself.
pub async fn put_settings_fragment(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    state
        .broker
        .management()
        .add_address_settings(&pattern, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_settings_fragment(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.broker.management().remove_address_settings(&pattern) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "no management settings registered for '{pattern}'"
        )))
    }
}

pub async fn get_resolved_roles(
    State(state): State<AdminState>,
    Path(address): Path<String>,
) -> Json<RoleSet> {
    Json(RoleSet::clone(&state.broker.roles_for(&address)))
}

pub async fn put_security_roles(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
    Json(roles): Json<Vec<Role>>,
) -> Result<StatusCode, ApiError> {
    state
        .broker
        .management()
        .add_security_settings(&pattern, roles)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_security_roles(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.broker.management().remove_security_settings(&pattern) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "no management roles registered for '{pattern}'"
        )))
    }
}

/// Divert changes wait for a running reload pass, so they run on the
/// blocking pool.
pub async fn post_divert(
    State(state): State<AdminState>,
    Json(divert): Json<DivertConfig>,
) -> Result<StatusCode, ApiError> {
    let broker = state.broker.clone();
    blocking(move || broker.management().create_divert(divert.to_spec())).await??;
    Ok(StatusCode::CREATED)
}

pub async fn delete_divert(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let broker = state.broker.clone();
    let target = name.clone();
    if blocking(move || broker.management().destroy_divert(&target)).await?? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no divert named '{name}'")))
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<T, ApiError> {
    tokio::task::spawn_blocking(f).await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })
}
