use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lore_service::{
	AskRequest, AskResponse, CancelToken, PlanContext, PlanPair, PostSearchRequest, ServiceError,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/ask", post(ask))
		.route("/v1/ask/plan", post(plan_preview))
		.route("/v1/search/posts", post(search_posts))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn ask(
	State(state): State<AppState>,
	Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
	let response = state.service.ask(payload, CancelToken::never()).await?;

	Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PlanPreviewRequest {
	question: String,
	owner_user_id: String,
	#[serde(default)]
	category_id: Option<i64>,
	#[serde(default)]
	post_id: Option<i64>,
	#[serde(default)]
	timezone_offset_minutes: Option<i32>,
}

async fn plan_preview(
	State(state): State<AppState>,
	Json(payload): Json<PlanPreviewRequest>,
) -> Result<Json<Option<PlanPair>>, ApiError> {
	let ctx = PlanContext {
		owner_user_id: payload.owner_user_id,
		category_id: payload.category_id,
		post_id: payload.post_id,
		timezone_offset_minutes: payload.timezone_offset_minutes,
	};
	let pair = state.service.generate_plan(&payload.question, &ctx).await;

	Ok(Json(pair))
}

async fn search_posts(
	State(state): State<AppState>,
	Json(payload): Json<PostSearchRequest>,
) -> Result<Json<lore_service::PostPage>, ApiError> {
	let page = state.service.search_posts(payload).await?;

	Ok(Json(page))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match &err {
			ServiceError::InvalidRequest { message } =>
				ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", message),
			ServiceError::NotFound { message } =>
				ApiError::new(StatusCode::NOT_FOUND, "not_found", message),
			ServiceError::Provider { message } =>
				ApiError::new(StatusCode::BAD_GATEWAY, "provider_error", message),
			ServiceError::Storage { message } =>
				ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message),
			ServiceError::Cancelled =>
				ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "cancelled", err.to_string()),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
