use std::collections::BTreeMap;

use rocket::{routes, Build, Rocket, Route};

pub mod course;
pub mod enrollment;
pub mod users;

use course::*;
use enrollment::*;
use users::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data::course::db::{CourseCreateData, CourseUpdateData},
    data::course::Course as CourseSchema,
    data::user::db::{SignupRole, UserCreatedResponse, UserLoginData, UserSignupData},
    data::user::UserResponse,
    enrollment as enr,
    resp::{jwt::doc::JWTAuth, problem::Problem},
    role::{Dashboard, MentorStatus, Role},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        user_create,
        login_submit,
        logout,
        dashboard,
        user_get,
        profile_update,
        user_delete,
        users_list,
        mentor_waitlist,
        mentor_status_update,
        password_reset_request,
        password_reset_submit,
        course_list,
        course_mine,
        course_get,
        course_create,
        course_update,
        course_delete,
        enrollment_request,
        enrollment_withdraw,
        enrollment_reapply,
        enrollment_decide,
        enrollment_status,
        enrollments_mine,
        request_list,
        enrolled_list,
        course_stats
    ),
    components(schemas(
        Role,
        MentorStatus,
        Dashboard,
        SignupRole,
        UserSignupData,
        UserLoginData,
        UserCreatedResponse,
        UserResponse,
        users::MentorStatusUpdate,
        users::PasswordResetRequest,
        users::PasswordResetSubmit,
        crate::data::user::db::ProfileUpdate,
        CourseSchema,
        CourseCreateData,
        CourseUpdateData,
        enr::Enrollment,
        enr::EnrollmentStatus,
        enr::EnrollmentAction,
        enr::ViewStatus,
        enr::Tally,
        enrollment::DecideAction,
        enrollment::DecideData,
        Problem
    )),
    modifiers(&JWTAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api_v1() -> Vec<Route> {
    routes![
        user_create,
        login_submit,
        logout,
        dashboard,
        user_get,
        profile_update,
        user_delete,
        users_list,
        mentor_waitlist,
        mentor_status_update,
        password_reset_request,
        password_reset_submit,
        course_list,
        course_mine,
        course_get,
        course_create,
        course_update,
        course_delete,
        enrollment_request,
        enrollment_withdraw,
        enrollment_reapply,
        enrollment_decide,
        enrollment_status,
        enrollments_mine,
        request_list,
        enrolled_list,
        course_stats
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/api/v1", api_v1()).mount(
        "/",
        SwaggerUi::new("/swagger/<_..>").url("/api/v1/openapi.json", ApiDocV1::openapi()),
    )
}
