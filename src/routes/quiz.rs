use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::quiz_dto::{SubmitAnswerRequest, SubmitAnswerResponse};
use crate::error::Result;
use crate::services::quiz_service::question_list;
use crate::AppState;

/// Sidebar list without session markers.
#[axum::debug_handler]
pub async fn list_questions(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(question_list(state.quiz_service.bank(), None)))
}

#[axum::debug_handler]
pub async fn create_session(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let session = state.quiz_service.create_session().await;
    Ok((StatusCode::CREATED, Json(session)))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.get_session(id).await?))
}

/// Drops the session; answers it held are gone.
#[axum::debug_handler]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.quiz_service.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn session_questions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.question_list(id).await?))
}

#[axum::debug_handler]
pub async fn begin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.begin(id).await?))
}

#[axum::debug_handler]
pub async fn next(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.next(id).await?))
}

#[axum::debug_handler]
pub async fn previous(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.previous(id).await?))
}

#[axum::debug_handler]
pub async fn review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.review(id).await?))
}

#[axum::debug_handler]
pub async fn jump(
    State(state): State<AppState>,
    Path((id, question_id)): Path<(Uuid, i64)>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.quiz_service.jump(id, question_id).await?))
}

#[axum::debug_handler]
pub async fn answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let (is_correct, session) = state.quiz_service.answer(id, &payload.selections).await?;
    Ok(Json(SubmitAnswerResponse { is_correct, session }))
}
