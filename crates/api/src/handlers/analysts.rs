use axum::extract::State;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 获取全部Analyst
pub async fn list_analysts(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let analysts = state.analyst_repo.list().await?;
    Ok(success(analysts))
}
