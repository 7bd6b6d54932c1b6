use mongodb::Database;
use rocket::http::{Cookie, CookieJar, Status};
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{
    ProfileUpdate, UserCreatedResponse, UserDbExt, UserLoginData, UserSignupData,
};
use crate::data::user::{PasswordHash, User, UserResponse};
use crate::resp::jwt::{PasswordResetToken, UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::role::{dashboard_for, Dashboard, MentorStatus};
use crate::security::Security;

#[utoipa::path(
    request_body = UserSignupData,
    responses(
        (status = 200, description = "Account created, session cookie set", body = UserCreatedResponse),
        (status = 400, description = "Signup data didn't validate", body = Problem),
    )
)]
#[post("/signup", format = "application/json", data = "<signup>")]
#[tracing::instrument(skip(security))]
pub async fn user_create<'a>(
    signup: Json<UserSignupData>,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
) -> Result<Json<UserCreatedResponse>, Problem> {
    signup.validate()?;

    let (token, user) = db
        .create_user(signup.into_inner(), &c.admin_emails, &security.salt)
        .await?;
    cookies.add(token.cookie(&security.jwt_keys.private)?);

    Ok(Json(UserCreatedResponse::from(user)))
}

#[utoipa::path(
    request_body = UserLoginData,
    responses(
        (status = 200, description = "Logged in, session cookie set"),
        (status = 401, description = "Bad email or password", body = Problem),
    )
)]
#[post("/login", format = "application/json", data = "<login>")]
#[tracing::instrument(skip(security))]
pub async fn login_submit<'a>(
    login: Json<UserLoginData>,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<User, Problem> {
    login.validate()?;

    let user = db
        .find_user_by_email(&login.email)
        .await?
        .ok_or_else(user_problem::bad_login)?;

    if user.pw_hash != PasswordHash::new(&login.password, &security.salt) {
        return Err(user_problem::bad_login());
    }

    let urt = UserRoleToken::new(&user);
    cookies.add(urt.cookie(&security.jwt_keys.private)?);

    Ok(user)
}

#[utoipa::path()]
#[post("/logout")]
pub async fn logout(cookies: &CookieJar<'_>) -> Status {
    cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build());
    Status::Ok
}

/// Which dashboard this session lands on. Looked up fresh so a mentor
/// approved since login is routed correctly without a new session.
#[utoipa::path(
    responses(
        (status = 200, description = "Dashboard for the session", body = Dashboard),
    ),
    security(("jwt" = []))
)]
#[get("/dashboard")]
#[tracing::instrument]
pub async fn dashboard(auth: UserRoleToken, db: &State<Database>) -> Result<Json<Dashboard>, Problem> {
    let user = db
        .get_user(auth.user)
        .await?
        .ok_or_else(|| user_problem::not_found(auth.user))?;

    Ok(Json(dashboard_for(user.role, user.status)))
}

#[utoipa::path(
    params(("id", description = "user ID")),
    responses(
        (status = 200, description = "Public profile", body = UserResponse),
        (status = 404, description = "User doesn't exist", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/user/<id>")]
#[tracing::instrument]
pub async fn user_get(
    id: Uuid,
    _auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    let user = db
        .get_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(request_body = ProfileUpdate, security(("jwt" = [])))]
#[put("/user/profile", format = "application/json", data = "<update>")]
#[tracing::instrument]
pub async fn profile_update(
    update: Json<ProfileUpdate>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(), Problem> {
    db.update_profile(auth.user, update.into_inner()).await
}

#[utoipa::path(
    params(("id", description = "user ID")),
    responses(
        (status = 200, description = "ID of the removed user"),
        (status = 401, description = "Not the user themselves or an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/user/<id>")]
#[tracing::instrument]
pub async fn user_delete<'a>(
    id: Uuid,
    auth: UserRoleToken,
    cookies: &'a CookieJar<'_>,
    db: &State<Database>,
) -> Result<String, Problem> {
    if auth.user != id && !auth.role.is_admin() {
        return Err(Problem::new_untyped(
            Status::Unauthorized,
            "only admins can delete other users",
        ));
    }

    let removed = db.delete_user(id).await?;

    if let Some(removed) = removed {
        if auth.user == id {
            cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build());
        }
        Ok(removed.id.to_string())
    } else {
        Err(user_problem::not_found(id))
    }
}

#[utoipa::path(
    responses(
        (status = 200, description = "All user accounts", body = Vec<UserResponse>),
        (status = 401, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users")]
#[tracing::instrument]
pub async fn users_list(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    if !auth.role.is_admin() {
        return Err(Problem::new_untyped(
            Status::Unauthorized,
            "only admins can list all users",
        ));
    }

    let users = db.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Mentors awaiting an admin decision", body = Vec<UserResponse>),
    ),
    security(("jwt" = []))
)]
#[get("/mentors/waitlist")]
#[tracing::instrument]
pub async fn mentor_waitlist(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    if !auth.role.is_admin() {
        return Err(Problem::new_untyped(
            Status::Unauthorized,
            "only admins can review the mentor waitlist",
        ));
    }

    let mentors = db.list_waitlisted_mentors().await?;
    Ok(Json(mentors.into_iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct MentorStatusUpdate {
    pub status: MentorStatus,
}

#[utoipa::path(
    request_body = MentorStatusUpdate,
    params(("id", description = "mentor user ID")),
    security(("jwt" = []))
)]
#[put("/mentor/<id>/status", format = "application/json", data = "<update>")]
#[tracing::instrument]
pub async fn mentor_status_update(
    id: Uuid,
    update: Json<MentorStatusUpdate>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    if !auth.role.is_admin() {
        return Err(Problem::new_untyped(
            Status::Unauthorized,
            "only admins can decide mentor approvals",
        ));
    }

    let updated = db.set_mentor_status(id, update.status).await?;
    tracing::info!(mentor = %id, status = %update.status, "mentor status changed");

    Ok(Json(UserResponse::from(updated)))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    #[schema(format = "email")]
    pub email: String,
}

/// Issue a reset token. The response never reveals whether the address is
/// registered; delivery is handled outside this service.
#[utoipa::path(request_body = PasswordResetRequest)]
#[post("/password-reset", format = "application/json", data = "<request>")]
pub async fn password_reset_request(
    request: Json<PasswordResetRequest>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Status, Problem> {
    if let Some(user) = db.find_user_by_email(&request.email).await? {
        let token = PasswordResetToken::new(user.id).encode_jwt(&security.jwt_keys.private)?;
        tracing::info!(user = %user.id, %token, "password reset token issued");
    }

    Ok(Status::Accepted)
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct PasswordResetSubmit {
    pub token: String,
    #[schema(format = "password")]
    pub password: String,
}

#[utoipa::path(request_body = PasswordResetSubmit)]
#[post("/password-reset/confirm", format = "application/json", data = "<submit>")]
pub async fn password_reset_submit(
    submit: Json<PasswordResetSubmit>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<(), Problem> {
    if submit.password.len() <= 8 || submit.password.len() > 1024 {
        return Err(user_problem::bad_password(
            "Password must be between 9 and 1024 characters (bytes) long.",
        ));
    }

    let claims = PasswordResetToken::decode_jwt(&submit.token, &security.jwt_keys.public)?;
    let pw_hash = PasswordHash::new(&submit.password, &security.salt);

    db.set_password_hash(claims.user, pw_hash).await
}
