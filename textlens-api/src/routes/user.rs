//! User REST API Routes
//!
//! Sign-up, sign-in and logout are open to anyone and only rate limited.
//! The profile routes run behind auth and act on the caller's own account
//! unless the caller is an admin.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use super::artifact::json_body;
use crate::{
    auth::{access_cookie, cleared_cookie, generate_jwt_token, AuthConfig},
    error::ApiResult,
    extractors::ValidQuery,
    middleware::{
        auth_middleware, rate_limit_middleware, AuthMiddlewareState, RateLimitState,
        RequesterExtractor,
    },
    services::UserService,
    state::AppState,
    types::{
        MessageResponse, SignInRequest, SignUpRequest, TokenResponse, UpdateUserQuery,
        UpdateUserRequest, UserFilterRequest, UserPublic,
    },
};

// ============================================================================
// SHARED STATE
// ============================================================================

/// Shared state for user routes.
#[derive(Debug, Clone)]
pub struct UserRouteState {
    pub users: Arc<UserService>,
    /// Signs the tokens handed out at sign-in.
    pub auth_config: Arc<AuthConfig>,
}

impl UserRouteState {
    pub fn new(users: Arc<UserService>, auth_config: Arc<AuthConfig>) -> Self {
        Self { users, auth_config }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /user/signup - Register an account
pub async fn signup(
    State(state): State<Arc<UserRouteState>>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let req = json_body(payload)?;
    req.validate()?;

    state
        .users
        .signup(req.username, req.email, req.password)
        .await?;
    Ok(Json(MessageResponse::new("User was successfully signed up")))
}

/// POST /user/signin - Exchange credentials for an access token
///
/// The token is returned in the body and set as an http-only cookie.
pub async fn signin(
    State(state): State<Arc<UserRouteState>>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = json_body(payload)?;
    req.validate()?;

    let user = state.users.authenticate(&req.email, req.password).await?;
    let access_token = generate_jwt_token(&state.auth_config, user.id)?;
    let cookie = access_cookie(&state.auth_config, &access_token);

    tracing::info!(user = %user.id, "User signed in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(TokenResponse {
            access_token,
            refresh_token: None,
        }),
    ))
}

/// POST /user/logout - Clear the session cookie
pub async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, cleared_cookie())],
        Json(MessageResponse::new("User was logged out")),
    )
}

/// POST /user/find - Look users up by id, username or email
pub async fn find_users(
    State(state): State<Arc<UserRouteState>>,
    RequesterExtractor(requester): RequesterExtractor,
    payload: Result<Json<UserFilterRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<UserPublic>>> {
    let filter = json_body(payload)?;
    let users = state.users.find(requester, filter.into()).await?;
    Ok(Json(users.into_iter().map(UserPublic::from).collect()))
}

/// GET /user - The caller's profile
pub async fn get_profile(
    State(state): State<Arc<UserRouteState>>,
    RequesterExtractor(requester): RequesterExtractor,
) -> ApiResult<Json<UserPublic>> {
    let user = state.users.profile(requester).await?;
    Ok(Json(user.into()))
}

/// PUT /user - Change username or email
///
/// `?user_id=` targets another account, which only admins may do.
pub async fn update_user(
    State(state): State<Arc<UserRouteState>>,
    RequesterExtractor(requester): RequesterExtractor,
    ValidQuery(query): ValidQuery<UpdateUserQuery>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserPublic>> {
    let req = json_body(payload)?;
    req.validate()?;

    let user = state
        .users
        .update(requester, query.user_id, req.into())
        .await?;
    Ok(Json(user.into()))
}

/// DELETE /user - Remove an account and everything it owns
///
/// An empty body object removes the caller's own account.
pub async fn delete_user(
    State(state): State<Arc<UserRouteState>>,
    RequesterExtractor(requester): RequesterExtractor,
    payload: Result<Json<UserFilterRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let filter = json_body(payload)?;
    state.users.delete(requester, filter.into()).await?;
    Ok(Json(MessageResponse::new("User was successfully deleted")))
}

// ============================================================================
// ROUTER
// ============================================================================

/// User routes, relative to `/user`.
///
/// Both halves share `limits` with the rest of the API, so a caller has one
/// budget across all mutating routes.
pub fn create_router(
    state: UserRouteState,
    auth: AuthMiddlewareState,
    limits: RateLimitState,
) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/logout", post(logout))
        .layer(from_fn_with_state(limits.clone(), rate_limit_middleware));

    let private = Router::new()
        .route("/", get(get_profile).put(update_user).delete(delete_user))
        .route("/find", post(find_users))
        .layer(from_fn_with_state(limits, rate_limit_middleware))
        .layer(from_fn_with_state(auth, auth_middleware));

    public.merge(private).with_state(Arc::new(state))
}
