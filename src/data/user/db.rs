use std::time::Duration;

use bson::{doc, from_bson, Bson, Document};
use mongodb::Database;
use rocket::futures::StreamExt;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{filter, PasswordHash, User};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::{MentorStatus, Role};
use crate::security::Salt;
use crate::util::with_retries;

pub static USER_COLLECTION_NAME: &str = "users";

// Listing reads tolerate a couple of transient failures before surfacing.
const LIST_RETRIES: u32 = 3;
const LIST_BACKOFF: Duration = Duration::from_millis(250);

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_name(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad name.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_signup(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad signup data.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_login() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Bad email or password.")
    }
}

/// Signup roles are limited to what the form offers; admin accounts are
/// provisioned from configuration, never self-selected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SignupRole {
    Student,
    Mentor,
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct UserSignupData {
    #[schema(format = "email")]
    pub email: String,
    pub name: String,
    #[schema(format = "password")]
    pub password: String,
    pub role: SignupRole,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub phone: String,
}

impl std::fmt::Debug for UserSignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserSignupData:{}", self.email)
    }
}

impl UserSignupData {
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.email.as_bytes())
    }

    pub fn validate(&self) -> Result<(), Problem> {
        if !self.email.contains('@') {
            return Err(problem::bad_email(
                self.email.to_string(),
                "Not a valid e-mail address.",
            ));
        }

        if self.name.trim().is_empty() {
            return Err(problem::bad_name("Name can't be empty."));
        }

        if self.name.len() > 64 {
            return Err(problem::bad_name(
                "Name can't be longer than 64 characters (bytes).",
            ));
        }

        if self.password.len() <= 8 {
            return Err(problem::bad_password(
                "Password must be at least 8 characters (bytes) long.",
            ));
        }

        if self.password.len() > 1024 {
            return Err(problem::bad_password(
                "Passwords longer than 1024 characters aren't supported.",
            ));
        }

        if self.role == SignupRole::Mentor && self.organization.trim().is_empty() {
            return Err(problem::bad_signup(
                "Mentor accounts must name their organization.",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct UserLoginData {
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserLoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserLoginData:{}", self.email)
    }
}

impl UserLoginData {
    pub fn validate(&self) -> Result<(), Problem> {
        if !self.email.contains('@') || self.password.len() < 8 || self.password.len() > 1024 {
            return Err(problem::bad_login());
        }

        Ok(())
    }
}

/// Free-form profile fields; absent fields stay untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub organization: Option<String>,
}

impl ProfileUpdate {
    pub fn into_set_document(self) -> Document {
        let mut set = Document::new();
        if let Some(name) = self.name {
            set.insert("name", name);
        }
        if let Some(phone) = self.phone {
            set.insert("phone", phone);
        }
        if let Some(bio) = self.bio {
            set.insert("bio", bio);
        }
        if let Some(organization) = self.organization {
            set.insert("organization", organization);
        }
        set
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserCreatedResponse {
    pub id: Uuid,
    pub role: Role,
    pub status: MentorStatus,
}

impl From<User> for UserCreatedResponse {
    fn from(user: User) -> Self {
        UserCreatedResponse {
            id: user.id,
            role: user.role,
            status: user.status,
        }
    }
}

pub trait UserDbExt {
    /// Provision an account. The configured admin e-mail list decides the
    /// admin role here, at creation time, instead of an email comparison on
    /// every login.
    async fn create_user(
        &self,
        signup: UserSignupData,
        admin_emails: impl AsRef<[String]>,
        salt: &Salt,
    ) -> Result<(UserRoleToken, User), Problem>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem>;
    async fn list_users(&self) -> Result<Vec<User>, Problem>;
    async fn list_waitlisted_mentors(&self) -> Result<Vec<User>, Problem>;

    async fn set_mentor_status(&self, id: Uuid, status: MentorStatus) -> Result<User, Problem>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<(), Problem>;
    async fn set_password_hash(&self, id: Uuid, pw_hash: PasswordHash) -> Result<(), Problem>;

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
}

impl UserDbExt for Database {
    async fn create_user(
        &self,
        signup: UserSignupData,
        admin_emails: impl AsRef<[String]>,
        salt: &Salt,
    ) -> Result<(UserRoleToken, User), Problem> {
        if self.find_user_by_email(&signup.email).await?.is_some() {
            return Err(problem::bad_email(
                signup.email.to_string(),
                "Email already registered.",
            ));
        }

        let role = if admin_emails.as_ref().contains(&signup.email) {
            Role::Admin
        } else {
            match signup.role {
                SignupRole::Student => Role::Student,
                SignupRole::Mentor => Role::Mentor,
            }
        };

        let mut user = User::new(&signup.email, &signup.name, &signup.password, role, salt);
        user.organization = signup.organization;
        user.phone = signup.phone;

        let urt = UserRoleToken::new(&user);

        self.collection(USER_COLLECTION_NAME)
            .insert_one(
                bson::to_document(&user).expect("User must be serializable to BSON"),
                None,
            )
            .await
            .map_err(Problem::from)?;

        Ok((urt, user))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_email(email.as_ref()), None)
            .await
            .map_err(Problem::from)
    }

    async fn list_users(&self) -> Result<Vec<User>, Problem> {
        with_retries(LIST_RETRIES, LIST_BACKOFF, || collect_users(self, None)).await
    }

    async fn list_waitlisted_mentors(&self) -> Result<Vec<User>, Problem> {
        with_retries(LIST_RETRIES, LIST_BACKOFF, || {
            collect_users(self, Some(filter::mentor_waitlist()))
        })
        .await
    }

    async fn set_mentor_status(&self, id: Uuid, status: MentorStatus) -> Result<User, Problem> {
        let updated = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$set": { "status": status.to_string() } },
                mongodb::options::FindOneAndUpdateOptions::builder()
                    .return_document(mongodb::options::ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)?;

        updated.ok_or_else(|| problem::not_found(id))
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<(), Problem> {
        let set = update.into_set_document();
        if set.is_empty() {
            return Ok(());
        }

        let result = self
            .collection::<User>(USER_COLLECTION_NAME)
            .update_one(filter::by_id(id), doc! { "$set": set }, None)
            .await
            .map_err(Problem::from)?;

        if result.matched_count == 0 {
            return Err(problem::not_found(id));
        }

        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, pw_hash: PasswordHash) -> Result<(), Problem> {
        let result = self
            .collection::<User>(USER_COLLECTION_NAME)
            .update_one(
                filter::by_id(id),
                doc! { "$set": { "pw_hash": Bson::from(pw_hash) } },
                None,
            )
            .await
            .map_err(Problem::from)?;

        if result.matched_count == 0 {
            return Err(problem::not_found(id));
        }

        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }
}

async fn collect_users(db: &Database, filter: Option<Document>) -> Result<Vec<User>, Problem> {
    let mut cursor = db
        .collection::<Document>(USER_COLLECTION_NAME)
        .find(filter, None)
        .await
        .map_err(Problem::from)?;

    let mut users: Vec<User> = vec![];
    while let Some(document) = cursor.next().await {
        match document.map(Bson::Document).map(from_bson::<User>) {
            Ok(Ok(user)) => users.push(user),
            Ok(Err(_)) => {
                // show must go on?
                tracing::warn!("Unable to deserialize User document.")
            }
            Err(e) => return Err(Problem::from(e)),
        }
    }

    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(role: SignupRole) -> UserSignupData {
        UserSignupData {
            email: "mira@example.com".to_string(),
            name: "Mira".to_string(),
            password: "not-a-dictionary-word".to_string(),
            role,
            organization: match role {
                SignupRole::Mentor => "Open Mentoring e.V.".to_string(),
                SignupRole::Student => String::new(),
            },
            phone: String::new(),
        }
    }

    #[test]
    fn valid_signup_data_passes() {
        signup(SignupRole::Student)
            .validate()
            .expect("valid student");
        signup(SignupRole::Mentor).validate().expect("valid mentor");
    }

    #[test]
    fn signup_validation_rejects_bad_fields() {
        let mut bad_email = signup(SignupRole::Student);
        bad_email.email = "not-an-address".to_string();
        assert!(bad_email.validate().is_err());

        let mut short_password = signup(SignupRole::Student);
        short_password.password = "short".to_string();
        assert!(short_password.validate().is_err());

        let mut empty_name = signup(SignupRole::Student);
        empty_name.name = "  ".to_string();
        assert!(empty_name.validate().is_err());

        let mut mentor_without_org = signup(SignupRole::Mentor);
        mentor_without_org.organization = String::new();
        assert!(mentor_without_org.validate().is_err());
    }

    #[test]
    fn signup_ids_are_stable_per_email() {
        let a = signup(SignupRole::Student);
        let b = signup(SignupRole::Mentor);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn profile_update_sets_only_provided_fields() {
        let set = ProfileUpdate {
            bio: Some("Hi!".to_string()),
            ..Default::default()
        }
        .into_set_document();

        assert_eq!(set.len(), 1);
        assert_eq!(set.get_str("bio"), Ok("Hi!"));

        assert!(ProfileUpdate::default().into_set_document().is_empty());
    }
}
