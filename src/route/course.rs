use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use uuid::Uuid;

use crate::data::course::db::problem as course_problem;
use crate::data::course::db::{CourseCreateData, CourseDbExt, CourseUpdateData};
use crate::data::course::Course;
use crate::data::user::db::{problem as user_problem, UserDbExt};
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::can_manage_courses;

fn not_course_manager() -> Problem {
    Problem::new_untyped(
        Status::Unauthorized,
        "only approved mentors can manage courses",
    )
}

fn not_course_owner() -> Problem {
    Problem::new_untyped(
        Status::Unauthorized,
        "only the owning mentor or an admin can change a course",
    )
}

/// Catalog page. Search and paging happen here, after the fetch; the
/// store only ever serves the full active catalog.
#[utoipa::path(
    params(
        ("search" = Option<String>, Query, description = "case-insensitive title substring"),
        ("page" = Option<u32>, Query, description = "page number, 0-based"),
        ("len" = Option<u32>, Query, description = "page length, default 20"),
    ),
    responses(
        (status = 200, description = "One catalog page", body = Vec<Course>),
    ),
    security(("jwt" = []))
)]
#[get("/courses?<search>")]
#[tracing::instrument]
pub async fn course_list(
    search: Option<String>,
    pages: PageState,
    _auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<Course>>, Problem> {
    let search = search.unwrap_or_default();

    let matching: Vec<Course> = db
        .list_courses()
        .await?
        .into_iter()
        .filter(|c| c.title_matches(&search))
        .collect();

    Ok(Json(pages.slice(&matching).to_vec()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Courses owned by the session's mentor", body = Vec<Course>),
    ),
    security(("jwt" = []))
)]
#[get("/courses/mine")]
#[tracing::instrument]
pub async fn course_mine(
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<Course>>, Problem> {
    Ok(Json(db.courses_by_mentor(auth.user).await?))
}

#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Course details", body = Course),
        (status = 404, description = "Course is gone", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course/<id>")]
#[tracing::instrument]
pub async fn course_get(
    id: Uuid,
    _auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Course>, Problem> {
    let course = db
        .get_course(id)
        .await?
        .ok_or_else(|| course_problem::not_found(id))?;

    Ok(Json(course))
}

#[utoipa::path(
    request_body = CourseCreateData,
    responses(
        (status = 200, description = "Created course", body = Course),
        (status = 401, description = "Not an approved mentor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course", format = "application/json", data = "<create>")]
#[tracing::instrument]
pub async fn course_create(
    create: Json<CourseCreateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Course>, Problem> {
    // Approval can be revoked after login, so the stored status decides.
    let user = db
        .get_user(auth.user)
        .await?
        .ok_or_else(|| user_problem::not_found(auth.user))?;
    if !can_manage_courses(user.role, user.status) {
        return Err(not_course_manager());
    }

    create.validate()?;
    let course = create.into_inner().into_course(auth.user);
    db.create_course(&course).await?;

    tracing::info!(course = %course.id, mentor = %course.mentor, "course created");

    Ok(Json(course))
}

#[utoipa::path(
    request_body = CourseUpdateData,
    params(("id", description = "course ID")),
    security(("jwt" = []))
)]
#[put("/course/<id>", format = "application/json", data = "<update>")]
#[tracing::instrument]
pub async fn course_update(
    id: Uuid,
    update: Json<CourseUpdateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(), Problem> {
    let course = db
        .get_course(id)
        .await?
        .ok_or_else(|| course_problem::not_found(id))?;

    if auth.user != course.mentor && !auth.role.is_admin() {
        return Err(not_course_owner());
    }

    db.update_course(id, update.into_inner()).await
}

/// Remove a course. Enrollment entries referencing it are scrubbed in the
/// same operation so no dashboard is left pointing at a dead course.
#[utoipa::path(
    params(("id", description = "course ID")),
    responses(
        (status = 200, description = "Course and all references removed"),
        (status = 401, description = "Not the owner or an admin", body = Problem),
        (status = 404, description = "Course is gone", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course/<id>")]
#[tracing::instrument]
pub async fn course_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(), Problem> {
    let course = db
        .get_course(id)
        .await?
        .ok_or_else(|| course_problem::not_found(id))?;

    if auth.user != course.mentor && !auth.role.is_admin() {
        return Err(not_course_owner());
    }

    db.delete_course(id).await?;
    tracing::info!(course = %id, "course deleted");

    Ok(())
}
