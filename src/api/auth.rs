// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use actix_web::{get, post, web, HttpMessage, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::error::AppError;
use crate::ledger::USAGE_PERIOD_DAYS;
use crate::models::{NewUser, SubscriptionPlan, SubscriptionStatus, User};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 6;
const BAD_CREDENTIALS: &str = "Incorrect email or password";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub credits: i32,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    pub monthly_credits_used: i32,
    pub monthly_reset_date: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            credits: user.credits,
            subscription_plan: user.subscription_plan,
            subscription_status: user.subscription_status,
            monthly_credits_used: user.monthly_credits_used,
            monthly_reset_date: user.monthly_reset_date,
        }
    }
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let email = req.email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if req.username.trim().is_empty() {
        return Err(AppError::Validation("Username must not be empty".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Success", body = TokenResponse),
        (status = 400, description = "Invalid input or email/username taken")
    )
)]
#[post("/api/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    validate_registration(&payload)?;
    let RegisterRequest {
        email,
        username,
        password,
    } = payload.into_inner();
    let email = email.trim().to_string();
    let username = username.trim().to_string();

    if state.users.find_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }
    if state.users.find_by_username(&username).await?.is_some() {
        return Err(AppError::Conflict("Username already taken".to_string()));
    }

    let cost = state.auth.bcrypt_cost;
    let password_hash = web::block(move || hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("bcrypt task: {e}")))?
        .map_err(|e| AppError::Internal(format!("bcrypt hash: {e}")))?;

    let user = state
        .users
        .create(NewUser {
            email,
            username,
            password_hash,
            credits: state.auth.signup_credits,
            monthly_reset_date: Utc::now() + Duration::days(USAGE_PERIOD_DAYS),
        })
        .await?;
    log::info!("registered user_id={} credits={}", user.id, user.credits);

    let token = issue_token(&state.auth, user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse::bearer(token)))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Success", body = TokenResponse),
        (status = 401, description = "Incorrect email or password")
    )
)]
#[post("/api/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let LoginRequest { email, password } = payload.into_inner();

    let Some(user) = state.users.find_by_email(email.trim()).await? else {
        return Err(AppError::Unauthorized(BAD_CREDENTIALS));
    };

    let password_hash = user.password_hash.clone();
    let matches = web::block(move || verify(password, &password_hash))
        .await
        .map_err(|e| AppError::Internal(format!("bcrypt task: {e}")))?
        .map_err(|e| {
            log::warn!("bcrypt verify failed user_id={}: {e}", user.id);
            AppError::Unauthorized(BAD_CREDENTIALS)
        })?;
    if !matches {
        return Err(AppError::Unauthorized(BAD_CREDENTIALS));
    }

    let token = issue_token(&state.auth, user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse::bearer(token)))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses((status = 200, description = "Success", body = UserProfile)),
    security(("bearer" = []))
)]
#[get("/auth/me")]
pub async fn me(
    user_id: web::ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id.into_inner();
    state.ledger.roll_usage_period(user_id, Utc::now()).await?;
    let user = state
        .users
        .get(user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

pub fn issue_token(settings: &AuthSettings, user_id: Uuid) -> Result<String, AppError> {
    let expiration = (Utc::now() + settings.token_ttl).timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("jwt encode: {e}")))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Could not validate credentials"))?;

    Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Unauthorized("Could not validate credentials"))
}

/// Middleware, который:
/// - берет `Authorization: Bearer <jwt>`
/// - валидирует JWT
/// - кладет `Uuid` пользователя в `req.extensions_mut()`
pub struct JwtMiddleware {
    secret: String,
}

impl JwtMiddleware {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner {
            service,
            secret: self.secret.clone(),
        }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let verified = match token {
            Some(token) => verify_token(&self.secret, token),
            None => Err(AppError::Unauthorized(
                "Missing or invalid Authorization header",
            )),
        };

        match verified {
            Ok(user_id) => {
                req.extensions_mut().insert(user_id);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(e) => {
                let err = Error::from(e);
                Box::pin(async move { Err::<ServiceResponse<B>, Error>(err) })
            }
        }
    }
}
