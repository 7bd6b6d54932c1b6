use std::convert::{TryFrom, TryInto};
use std::io::Cursor;

use bson::spec::BinarySubtype;
use bson::{Binary, Bson};
use crypto::bcrypt::bcrypt;
use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{response, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::enrollment::Enrollment;
use crate::resp::problem::Problem;
use crate::role::{MentorStatus, Role};
use crate::security::Salt;

pub mod db;
pub mod filter;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PasswordHash([u8; 24]);

impl PasswordHash {
    pub fn new(password: impl AsRef<str>, salt: &Salt) -> PasswordHash {
        let mut pw_hash: [u8; 24] = [0; 24];

        let mut sha = Sha256::new();
        sha2::Digest::update(&mut sha, password.as_ref().as_bytes());

        bcrypt(15, salt, sha.finalize().as_slice(), &mut pw_hash);

        PasswordHash(pw_hash)
    }
}

impl From<PasswordHash> for Bson {
    fn from(pw_hash: PasswordHash) -> Self {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: pw_hash.0.to_vec(),
        })
    }
}

impl TryFrom<Bson> for PasswordHash {
    type Error = Problem;

    fn try_from(bson: Bson) -> Result<Self, Self::Error> {
        match bson {
            Bson::Binary(bin) => {
                if let Ok(array) = bin.bytes.try_into() {
                    Ok(PasswordHash(array))
                } else {
                    Err(password_lost_err())
                }
            }
            _ => Err(password_lost_err()),
        }
    }
}

fn password_lost_err() -> Problem {
    Problem::new_untyped(Status::InternalServerError, "Unable to check password.")
}

/// A `users` document. The `enrolled` sequence is the single source of
/// truth for every (user, course) enrollment pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub organization: String,
    pub pw_hash: PasswordHash,
    pub role: Role,
    #[serde(default)]
    pub status: MentorStatus,
    #[serde(default)]
    pub enrolled: Vec<Enrollment>,
}

impl User {
    pub fn new(
        email: impl ToString,
        name: impl ToString,
        password: impl ToString,
        role: Role,
        salt: &Salt,
    ) -> User {
        let pw_hash = PasswordHash::new(password.to_string(), salt);

        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, email.to_string().as_bytes());
        tracing::info!("Creating a new {} with UUID: {}", role, id);

        User {
            id,
            email: email.to_string(),
            name: name.to_string(),
            phone: String::new(),
            bio: String::new(),
            organization: String::new(),
            pw_hash,
            role,
            // Mentors wait for an admin decision; everyone else is usable
            // right away.
            status: match role {
                Role::Mentor => MentorStatus::Waitlisted,
                _ => MentorStatus::Approved,
            },
            enrolled: vec![],
        }
    }

    pub fn response_json(&self) -> String {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "role": self.role,
            "status": self.status,
        })
        .to_string()
    }
}

impl<'r> Responder<'r, 'static> for User {
    fn respond_to(self, _: &Request) -> response::Result<'static> {
        let body: String = self.response_json();

        Response::build()
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

/// Public projection of a user, safe to hand to any authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub organization: String,
    pub role: Role,
    pub status: MentorStatus,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            organization: user.organization,
            role: user.role,
            status: user.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::EnrollmentStatus;
    use chrono::Utc;

    const SALT: Salt = [7u8; 16];

    #[test]
    fn users_round_trip_through_bson() {
        let mut user = User::new("ada@example.com", "Ada", "correct-horse", Role::Student, &SALT);
        user.enrolled.push(Enrollment::request(
            Uuid::new_v4(),
            "Intro to Mentoring",
            Utc::now(),
        ));

        let doc = bson::to_document(&user).expect("user serializes");
        let restored: User = bson::from_document(doc).expect("user deserializes");

        assert_eq!(restored.id, user.id);
        assert_eq!(restored.email, user.email);
        assert_eq!(restored.role, Role::Student);
        assert_eq!(restored.status, MentorStatus::Approved);
        assert_eq!(restored.pw_hash, user.pw_hash);
        assert_eq!(restored.enrolled.len(), 1);
        assert_eq!(restored.enrolled[0].status, EnrollmentStatus::Requested);
    }

    #[test]
    fn new_mentors_start_waitlisted() {
        let mentor = User::new("m@example.com", "Mel", "hunter2hunter2", Role::Mentor, &SALT);
        assert_eq!(mentor.status, MentorStatus::Waitlisted);

        let student = User::new("s@example.com", "Sam", "hunter2hunter2", Role::Student, &SALT);
        assert_eq!(student.status, MentorStatus::Approved);
    }

    #[test]
    fn password_hash_is_salted_and_stable() {
        let a = PasswordHash::new("open sesame", &SALT);
        let b = PasswordHash::new("open sesame", &SALT);
        let other_salt: Salt = [9u8; 16];
        let c = PasswordHash::new("open sesame", &other_salt);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, PasswordHash::new("open sesam", &SALT));
    }
}
