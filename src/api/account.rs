use axum::{
    Extension, Form,
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::flash::{self, Flash};
use super::views::{self, LoginForm, RegisterForm};
use super::{ApiError, AppState};
use crate::domain::{BulkAction, CurrentUser, UserId};
use crate::services::{AccountError, Credentials, FieldErrors, Registration};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Name of the repeated form field carrying the selected ids.
const USER_IDS_FIELD: &str = "user_ids";

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the session against live user state and makes the result
/// available to handlers as `Extension<CurrentUser>`. The response carries
/// the same value for request logging. Requests without a usable session are
/// redirected to the login page.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let current = state.accounts().authorize(&session).await?;

    request.extensions_mut().insert(current.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(current);
    Ok(response)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
pub async fn index() -> Redirect {
    Redirect::to("/users")
}

/// GET /register
pub async fn register_form() -> Html<String> {
    views::register_page(&RegisterForm::default())
}

/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(payload): Form<RegisterRequest>,
) -> Result<Response, ApiError> {
    let registration = Registration::new(&payload.name, &payload.email, &payload.password);

    let redisplay = |status: StatusCode, errors: FieldErrors, message: Option<String>| {
        let form = RegisterForm {
            name: payload.name.trim(),
            email: payload.email.trim(),
            errors,
            message,
        };
        (status, views::register_page(&form)).into_response()
    };

    match state.accounts().register(registration).await {
        Ok(_) => {
            flash::set(
                &session,
                Flash::success("Registration successful. You can now log in."),
            )
            .await;
            Ok(Redirect::to("/login").into_response())
        }
        Err(AccountError::Validation(errors)) => Ok(redisplay(
            StatusCode::UNPROCESSABLE_ENTITY,
            errors,
            None,
        )),
        Err(err @ AccountError::EmailTaken) => Ok(redisplay(
            StatusCode::CONFLICT,
            FieldErrors::default(),
            Some(err.to_string()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// GET /login
pub async fn login_form(session: Session) -> Html<String> {
    let flash = flash::take(&session).await;
    views::login_page(&LoginForm {
        flash,
        ..LoginForm::default()
    })
}

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(payload): Form<LoginRequest>,
) -> Result<Response, ApiError> {
    let credentials = Credentials::new(&payload.email, &payload.password);

    let redisplay = |status: StatusCode, errors: FieldErrors, flash: Option<Flash>| {
        let form = LoginForm {
            email: payload.email.trim(),
            errors,
            flash,
        };
        (status, views::login_page(&form)).into_response()
    };

    match state.accounts().login(credentials, &session).await {
        Ok(_) => Ok(Redirect::to("/").into_response()),
        Err(AccountError::Validation(errors)) => Ok(redisplay(
            StatusCode::UNPROCESSABLE_ENTITY,
            errors,
            None,
        )),
        Err(err @ AccountError::InvalidCredentials) => Ok(redisplay(
            StatusCode::UNAUTHORIZED,
            FieldErrors::default(),
            Some(Flash::error(err.to_string())),
        )),
        Err(err @ AccountError::Blocked) => Ok(redisplay(
            StatusCode::FORBIDDEN,
            FieldErrors::default(),
            Some(Flash::error(err.to_string())),
        )),
        Err(e) => Err(e.into()),
    }
}

/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Redirect, ApiError> {
    state.accounts().logout(&session).await?;
    Ok(Redirect::to("/login"))
}

/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    session: Session,
) -> Result<Html<String>, ApiError> {
    let users = state.accounts().list_users(&current).await?;
    let flash = flash::take(&session).await;

    Ok(views::users_page(&current, &users, flash.as_ref()))
}

/// POST /users/block
pub async fn block_users(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    session: Session,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    apply_bulk(&state, BulkAction::Block, &fields, &current, &session).await
}

/// POST /users/unblock
pub async fn unblock_users(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    session: Session,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    apply_bulk(&state, BulkAction::Unblock, &fields, &current, &session).await
}

/// POST /users/delete
pub async fn delete_users(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    session: Session,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    apply_bulk(&state, BulkAction::Delete, &fields, &current, &session).await
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found("Page", uri.path())
}

// ============================================================================
// Helpers
// ============================================================================

async fn apply_bulk(
    state: &AppState,
    action: BulkAction,
    fields: &[(String, String)],
    current: &CurrentUser,
    session: &Session,
) -> Result<Response, ApiError> {
    let ids = parse_user_ids(fields)
        .map_err(|raw| ApiError::validation(format!("Invalid user id: '{raw}'")))?;

    match state
        .accounts()
        .apply_bulk(action, &ids, current, session)
        .await
    {
        Ok(outcome) if outcome.signed_out => Ok(Redirect::to("/login").into_response()),
        Ok(outcome) => {
            flash::set(session, Flash::success(outcome.message())).await;
            Ok(Redirect::to("/users").into_response())
        }
        Err(err @ AccountError::NoSelection(_)) => {
            flash::set(session, Flash::error(err.to_string())).await;
            Ok(Redirect::to("/users").into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// Collects every `user_ids` value. The first value that is not an integer
/// is returned as the error.
fn parse_user_ids(fields: &[(String, String)]) -> Result<Vec<UserId>, String> {
    fields
        .iter()
        .filter(|(key, _)| key == USER_IDS_FIELD)
        .map(|(_, value)| value.parse::<UserId>().map_err(|_| value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_repeated_user_ids() {
        let ids = parse_user_ids(&fields(&[
            ("user_ids", "3"),
            ("other", "x"),
            ("user_ids", " 7"),
        ]))
        .unwrap();

        assert_eq!(ids, vec![UserId::new(3), UserId::new(7)]);
    }

    #[test]
    fn no_user_ids_is_an_empty_selection() {
        assert!(parse_user_ids(&fields(&[])).unwrap().is_empty());
    }

    #[test]
    fn non_integer_id_is_rejected() {
        assert_eq!(
            parse_user_ids(&fields(&[("user_ids", "1"), ("user_ids", "abc")])),
            Err("abc".to_string())
        );
    }
}
