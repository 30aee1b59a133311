//! VM status routes.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use vmwatch_core::error::CoreError;
use vmwatch_core::types::DbId;

use crate::auth::session::Session;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    pub vm_id: DbId,
    /// Whether the VM's agent currently holds an open link.
    pub online: bool,
}

/// GET /vms/{id}/status
async fn vm_status(
    _session: Session,
    State(state): State<AppState>,
    Path(vm_id): Path<DbId>,
) -> AppResult<Json<DataResponse<VmStatus>>> {
    state
        .store
        .find_vm_by_id(vm_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Vm",
            id: vm_id,
        }))?;

    let online = state.fabric.links.is_live(vm_id).await;
    Ok(Json(DataResponse {
        data: VmStatus { vm_id, online },
    }))
}

/// Routes mounted at `/vms`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/status", get(vm_status))
}
