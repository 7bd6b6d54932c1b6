use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    /// Indicates whether a user with this role may submit enrollment requests.
    pub fn can_request_enrollment(self) -> bool {
        self == Role::Student
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Student
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Mentor => write!(f, "mentor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Approval state of a mentor account. Students and admins are approved at
/// creation; mentors start out waitlisted until an admin decides.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MentorStatus {
    Approved,
    Waitlisted,
    Disapproved,
}

impl Default for MentorStatus {
    fn default() -> Self {
        MentorStatus::Approved
    }
}

impl std::fmt::Display for MentorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MentorStatus::Approved => write!(f, "approved"),
            MentorStatus::Waitlisted => write!(f, "waitlisted"),
            MentorStatus::Disapproved => write!(f, "disapproved"),
        }
    }
}

/// The dashboard a session is entitled to. Waitlisted and disapproved
/// mentors get a restricted read-only view of their own courses.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Dashboard {
    Student,
    Mentor,
    MentorPending,
    Admin,
}

pub fn dashboard_for(role: Role, status: MentorStatus) -> Dashboard {
    match role {
        Role::Admin => Dashboard::Admin,
        Role::Student => Dashboard::Student,
        Role::Mentor if status == MentorStatus::Approved => Dashboard::Mentor,
        Role::Mentor => Dashboard::MentorPending,
    }
}

/// Course create/update/delete is reserved for approved mentors.
pub fn can_manage_courses(role: Role, status: MentorStatus) -> bool {
    role == Role::Mentor && status == MentorStatus::Approved
}
