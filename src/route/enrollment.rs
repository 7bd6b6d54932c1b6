use chrono::Utc;
use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::data::course::db::problem as course_problem;
use crate::data::course::db::CourseDbExt;
use crate::data::course::Course;
use crate::data::user::db::{problem as user_problem, UserDbExt};
use crate::data::user::{User, UserResponse};
use crate::enrollment::db::{EnrollmentDbExt, WriteResult};
use crate::enrollment::{
    evaluate, status_for, Actor, CourseContext, CourseTallies, Decision, Enrollment,
    EnrollmentAction, EnrollmentStatus, Tally, ViewStatus,
};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::problems;
use crate::resp::problem::Problem;
use crate::role::MentorStatus;

/// Fetch the course and the facts the transition guards need about it. A
/// missing owner account counts as an unapproved mentor.
async fn course_context(db: &Database, id: Uuid) -> Result<(Course, CourseContext), Problem> {
    let course = db
        .get_course(id)
        .await?
        .ok_or_else(|| course_problem::not_found(id))?;

    let mentor_status = db
        .get_user(course.mentor)
        .await?
        .map(|owner| owner.status)
        .unwrap_or(MentorStatus::Disapproved);

    let context = CourseContext {
        id: course.id,
        mentor: course.mentor,
        mentor_status,
    };

    Ok((course, context))
}

/// Persist an allowed decision with the matching guarded write. The write
/// restates the state the decision was made against, so a race with another
/// actor comes back as a conflict instead of clobbering their change.
async fn apply_decision(
    db: &Database,
    subject: Uuid,
    course: &Course,
    decision: Decision,
) -> Result<ViewStatus, Problem> {
    let now = Utc::now();

    let write = match decision.action {
        EnrollmentAction::Request => {
            let entry = Enrollment::request(course.id, &course.title, now);
            db.push_request(subject, &entry).await?
        }
        EnrollmentAction::Withdraw => db.withdraw_request(subject, course.id).await?,
        EnrollmentAction::Reapply => {
            db.transition_record(
                subject,
                course.id,
                EnrollmentStatus::Rejected,
                EnrollmentStatus::Requested,
                now,
            )
            .await?
        }
        EnrollmentAction::Approve => {
            db.transition_record(
                subject,
                course.id,
                EnrollmentStatus::Requested,
                EnrollmentStatus::Enrolled,
                now,
            )
            .await?
        }
        EnrollmentAction::Reject => {
            db.transition_record(
                subject,
                course.id,
                EnrollmentStatus::Requested,
                EnrollmentStatus::Rejected,
                now,
            )
            .await?
        }
    };

    match write {
        WriteResult::Applied => Ok(decision
            .next
            .map(ViewStatus::from)
            .unwrap_or(ViewStatus::Absent)),
        WriteResult::Conflict(current) => Err(problems::already_handled(current)),
    }
}

/// Evaluate and persist one action of `actor` against `subject`'s record.
async fn act(
    db: &Database,
    config: &Config,
    actor: Actor,
    subject: Uuid,
    course_id: Uuid,
    action: EnrollmentAction,
) -> Result<ViewStatus, Problem> {
    let (course, context) = course_context(db, course_id).await?;

    let subject_user = db
        .get_user(subject)
        .await?
        .ok_or_else(|| user_problem::not_found(subject))?;
    let record = subject_user.enrolled.iter().find(|e| e.course == course_id);

    let decision = evaluate(
        subject,
        record,
        action,
        &actor,
        &context,
        Utc::now(),
        &config.reapply_policy(),
    )?;

    let status = apply_decision(db, subject, &course, decision).await?;
    tracing::info!(%subject, course = %course_id, %action, %status, "enrollment action applied");

    Ok(status)
}

#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Resulting enrollment status", body = ViewStatus),
        (status = 401, description = "Not allowed to request this course", body = Problem),
        (status = 409, description = "A record for this course already exists", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<id>/enrollment")]
#[tracing::instrument]
pub async fn enrollment_request(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    c: &State<Config>,
) -> Result<Json<ViewStatus>, Problem> {
    let actor = Actor {
        user: auth.user,
        role: auth.role,
    };
    Ok(Json(
        act(db, c, actor, auth.user, id, EnrollmentAction::Request).await?,
    ))
}

#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Request withdrawn, record removed", body = ViewStatus),
        (status = 409, description = "Request was already decided", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<id>/enrollment")]
#[tracing::instrument]
pub async fn enrollment_withdraw(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    c: &State<Config>,
) -> Result<Json<ViewStatus>, Problem> {
    let actor = Actor {
        user: auth.user,
        role: auth.role,
    };
    Ok(Json(
        act(db, c, actor, auth.user, id, EnrollmentAction::Withdraw).await?,
    ))
}

#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Record moved back to requested", body = ViewStatus),
        (status = 409, description = "Cooldown still active or record not rejected", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course/<id>/enrollment/reapply")]
#[tracing::instrument]
pub async fn enrollment_reapply(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    c: &State<Config>,
) -> Result<Json<ViewStatus>, Problem> {
    let actor = Actor {
        user: auth.user,
        role: auth.role,
    };
    Ok(Json(
        act(db, c, actor, auth.user, id, EnrollmentAction::Reapply).await?,
    ))
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DecideAction {
    Approve,
    Reject,
}

impl From<DecideAction> for EnrollmentAction {
    fn from(action: DecideAction) -> Self {
        match action {
            DecideAction::Approve => EnrollmentAction::Approve,
            DecideAction::Reject => EnrollmentAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct DecideData {
    pub action: DecideAction,
}

/// Decide a pending request. Only the mentor owning the course may call
/// this; a request decided twice comes back as a conflict, not a rewrite.
#[utoipa::path(
    request_body = DecideData,
    params(
        ("id", description = "course ID"),
        ("user", description = "requesting student's user ID"),
    ),
    responses(
        (status = 200, description = "Resulting enrollment status", body = ViewStatus),
        (status = 401, description = "Not the owning mentor", body = Problem),
        (status = 409, description = "Request was already handled", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/course/<id>/enrollment/<user>", format = "application/json", data = "<decide>")]
#[tracing::instrument]
pub async fn enrollment_decide(
    id: Uuid,
    user: Uuid,
    decide: Json<DecideData>,
    auth: UserRoleToken,
    db: &State<Database>,
    c: &State<Config>,
) -> Result<Json<ViewStatus>, Problem> {
    let actor = Actor {
        user: auth.user,
        role: auth.role,
    };
    Ok(Json(
        act(db, c, actor, user, id, decide.action.into()).await?,
    ))
}

#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Session's status for the course", body = ViewStatus),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/enrollment")]
#[tracing::instrument]
pub async fn enrollment_status(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<ViewStatus>, Problem> {
    Ok(Json(db.current_status(auth.user, id).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Session's enrollment records", body = Vec<Enrollment>),
    ),
    security(("jwt" = []))
)]
#[get("/enrollments")]
#[tracing::instrument]
pub async fn enrollments_mine(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<Enrollment>>, Problem> {
    let user = db
        .get_user(auth.user)
        .await?
        .ok_or_else(|| user_problem::not_found(auth.user))?;

    Ok(Json(user.enrolled))
}

fn not_request_reviewer() -> Problem {
    Problem::new_untyped(
        Status::Unauthorized,
        "only the owning mentor or an admin can review course requests",
    )
}

/// Users whose record for `course` is in `status`, as public profiles.
fn roster(users: Vec<User>, course: Uuid, status: ViewStatus) -> Vec<UserResponse> {
    users
        .into_iter()
        .filter(|u| status_for(&u.enrolled, course) == status)
        .map(UserResponse::from)
        .collect()
}

/// Students with a pending request for the course, for the owner's review
/// queue.
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Students with pending requests", body = Vec<UserResponse>),
        (status = 401, description = "Not the owning mentor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/requests")]
#[tracing::instrument]
pub async fn request_list(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    let (course, _) = course_context(db, id).await?;
    if auth.user != course.mentor && !auth.role.is_admin() {
        return Err(not_request_reviewer());
    }

    let users = db.list_users().await?;
    Ok(Json(roster(users, id, ViewStatus::Requested)))
}

/// Students enrolled in the course, for the owner's roster view.
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Enrolled students", body = Vec<UserResponse>),
        (status = 401, description = "Not the owning mentor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/enrolled")]
#[tracing::instrument]
pub async fn enrolled_list(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    let (course, _) = course_context(db, id).await?;
    if auth.user != course.mentor && !auth.role.is_admin() {
        return Err(not_request_reviewer());
    }

    let users = db.list_users().await?;
    Ok(Json(roster(users, id, ViewStatus::Enrolled)))
}

/// Request/enrollment counts for one course. Derived from a single pass
/// over all users, never by per-course rescans.
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Counts for the course", body = Tally),
        (status = 401, description = "Not the owning mentor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>/stats")]
#[tracing::instrument]
pub async fn course_stats(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Tally>, Problem> {
    let (course, _) = course_context(db, id).await?;
    if auth.user != course.mentor && !auth.role.is_admin() {
        return Err(not_request_reviewer());
    }

    let users = db.list_users().await?;
    let tallies = CourseTallies::collect(users.iter().map(|u| u.enrolled.as_slice()));

    Ok(Json(tallies.for_course(id)))
}
