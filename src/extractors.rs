use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::Form;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::auth;
use crate::error::AppError;
use crate::market::validation::FieldError;
use crate::market::UserId;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
}

/// Extractor that requires authentication.
/// Returns 401 if no valid session found.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?;

        let (id, username) =
            auth::lookup_session(&state.db, token)?.ok_or(AppError::Unauthorized)?;
        Ok(CurrentUser { id, username })
    }
}

fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name {
                Some(val)
            } else {
                None
            }
        })
}

/// Urlencoded form whose unparseable values are reported per field, in the
/// same shape as constraint failures, instead of failing the whole body.
#[derive(Debug, Clone)]
pub struct TypedForm<T>(pub T);

impl<T, S> FromRequest<S> for TypedForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        let fields: Map<String, Value> = pairs
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        decode_fields(fields).map(TypedForm)
    }
}

fn decode_fields<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, AppError> {
    match serde_json::from_value(Value::Object(fields.clone())) {
        Ok(form) => Ok(form),
        Err(err) => {
            // Every form field has a default, so each value can be tried alone
            // to find the ones that fail.
            let mut malformed: Vec<FieldError> = fields
                .into_iter()
                .filter_map(|(name, value)| {
                    let single = Map::from_iter([(name.clone(), value)]);
                    serde_json::from_value::<T>(Value::Object(single))
                        .err()
                        .map(|e| FieldError::malformed(name, e.to_string()))
                })
                .collect();
            if malformed.is_empty() {
                malformed.push(FieldError::malformed("form", err.to_string()));
            }
            tracing::debug!(fields = malformed.len(), "Malformed form input");
            Err(AppError::Validation(malformed))
        }
    }
}
