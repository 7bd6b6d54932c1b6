//! Conditional writes for enrollment records.
//!
//! The store has no per-array-element update, so every mutation re-states
//! the expected prior state in its filter. A write that matched nothing
//! lost a race to another actor and comes back as [`WriteResult::Conflict`]
//! instead of overwriting whatever the other actor did.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::Database;
use uuid::Uuid;

use super::{Enrollment, EnrollmentStatus, ViewStatus};
use crate::data::user::db::{problem as user_problem, USER_COLLECTION_NAME};
use crate::data::user::{filter, User};
use crate::resp::problem::Problem;
use crate::util::uuid_binary;

/// Outcome of a guarded write.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteResult {
    Applied,
    /// The record was not in the expected prior state; carries what it is
    /// now so callers can re-render instead of retrying blindly.
    Conflict(ViewStatus),
}

fn record_filter(user: Uuid, course: Uuid, expected: EnrollmentStatus) -> Document {
    doc! {
        "_id": uuid_binary(user),
        "enrolled": {
            "$elemMatch": {
                "id": uuid_binary(course),
                "status": expected.to_string(),
            }
        }
    }
}

/// Outcome of a push whose guard didn't match. Only a missing user document
/// is an error; an existing user reports whatever the pair looks like now,
/// including `absent` when the entry was withdrawn while the push raced.
fn push_conflict(
    subject: Uuid,
    user: Option<&User>,
    course: Uuid,
) -> Result<WriteResult, Problem> {
    match user {
        None => Err(user_problem::not_found(subject)),
        Some(u) => Ok(WriteResult::Conflict(super::status_for(&u.enrolled, course))),
    }
}

fn transition_update(next: EnrollmentStatus, now: DateTime<Utc>) -> Document {
    let mut set = doc! { "enrolled.$.status": next.to_string() };
    match next {
        // Stamp the state change the cooldown policy reads back.
        EnrollmentStatus::Rejected => {
            set.insert("enrolled.$.rejected_at", now.to_rfc3339());
        }
        EnrollmentStatus::Requested => {
            set.insert("enrolled.$.requested_at", now.to_rfc3339());
        }
        EnrollmentStatus::Enrolled => {}
    }
    doc! { "$set": set }
}

pub trait EnrollmentDbExt {
    /// Append a fresh `requested` entry, guarded against a second entry for
    /// the same course ever being created.
    async fn push_request(&self, user: Uuid, entry: &Enrollment) -> Result<WriteResult, Problem>;

    /// Move the entry for `course` from `expected` to `next`. Fails with a
    /// conflict when the entry is no longer in `expected`.
    async fn transition_record(
        &self,
        user: Uuid,
        course: Uuid,
        expected: EnrollmentStatus,
        next: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<WriteResult, Problem>;

    /// Remove the entry for `course` while it is still `requested`.
    async fn withdraw_request(&self, user: Uuid, course: Uuid) -> Result<WriteResult, Problem>;

    /// Remove every user's entries referencing a deleted course so no
    /// orphan references remain. Returns the number of users touched.
    async fn scrub_course(&self, course: Uuid) -> Result<u64, Problem>;

    /// Current state of the (user, course) pair, straight from the store.
    async fn current_status(&self, user: Uuid, course: Uuid) -> Result<ViewStatus, Problem>;
}

impl EnrollmentDbExt for Database {
    async fn push_request(&self, user: Uuid, entry: &Enrollment) -> Result<WriteResult, Problem> {
        let filter = doc! {
            "_id": uuid_binary(user),
            "enrolled": { "$not": { "$elemMatch": { "id": uuid_binary(entry.course) } } },
        };
        let update = doc! {
            "$push": {
                "enrolled": bson::to_bson(entry)
                    .expect("Enrollment must be serializable to BSON"),
            }
        };

        let result = self
            .collection::<Document>(USER_COLLECTION_NAME)
            .update_one(filter, update, None)
            .await
            .map_err(Problem::from)?;

        if result.matched_count == 1 {
            return Ok(WriteResult::Applied);
        }

        // Either the user vanished or an entry for this course already
        // exists; report which.
        let current = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find_one(filter::by_id(user), None)
            .await
            .map_err(Problem::from)?;

        push_conflict(user, current.as_ref(), entry.course)
    }

    async fn transition_record(
        &self,
        user: Uuid,
        course: Uuid,
        expected: EnrollmentStatus,
        next: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<WriteResult, Problem> {
        let result = self
            .collection::<Document>(USER_COLLECTION_NAME)
            .update_one(
                record_filter(user, course, expected),
                transition_update(next, now),
                None,
            )
            .await
            .map_err(Problem::from)?;

        if result.matched_count == 1 {
            tracing::debug!(%user, %course, from = %expected, to = %next, "enrollment transitioned");
            return Ok(WriteResult::Applied);
        }

        Ok(WriteResult::Conflict(
            self.current_status(user, course).await?,
        ))
    }

    async fn withdraw_request(&self, user: Uuid, course: Uuid) -> Result<WriteResult, Problem> {
        let update = doc! {
            "$pull": {
                "enrolled": {
                    "id": uuid_binary(course),
                    "status": EnrollmentStatus::Requested.to_string(),
                }
            }
        };

        let result = self
            .collection::<Document>(USER_COLLECTION_NAME)
            .update_one(doc! { "_id": uuid_binary(user) }, update, None)
            .await
            .map_err(Problem::from)?;

        if result.modified_count >= 1 {
            return Ok(WriteResult::Applied);
        }

        Ok(WriteResult::Conflict(
            self.current_status(user, course).await?,
        ))
    }

    async fn scrub_course(&self, course: Uuid) -> Result<u64, Problem> {
        let result = self
            .collection::<Document>(USER_COLLECTION_NAME)
            .update_many(
                doc! {},
                doc! { "$pull": { "enrolled": { "id": uuid_binary(course) } } },
                None,
            )
            .await
            .map_err(Problem::from)?;

        if result.modified_count > 0 {
            tracing::info!(%course, users = result.modified_count, "scrubbed enrollment references");
        }

        Ok(result.modified_count)
    }

    async fn current_status(&self, user: Uuid, course: Uuid) -> Result<ViewStatus, Problem> {
        let user = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find_one(filter::by_id(user), None)
            .await
            .map_err(Problem::from)?;

        Ok(user
            .map(|u| super::status_for(&u.enrolled, course))
            .unwrap_or(ViewStatus::Absent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    #[test]
    fn record_filter_restates_the_expected_state() {
        let user = Uuid::new_v4();
        let course = Uuid::new_v4();
        let filter = record_filter(user, course, EnrollmentStatus::Requested);

        assert_eq!(filter.get("_id"), Some(&uuid_binary(user)));
        let elem = filter
            .get_document("enrolled")
            .and_then(|d| d.get_document("$elemMatch"))
            .expect("guard must match on the embedded entry");
        assert_eq!(elem.get("id"), Some(&uuid_binary(course)));
        assert_eq!(elem.get("status"), Some(&Bson::String("requested".into())));
    }

    #[test]
    fn transition_update_stamps_rejections() {
        let now = Utc::now();
        let update = transition_update(EnrollmentStatus::Rejected, now);
        let set = update.get_document("$set").unwrap();

        assert_eq!(
            set.get("enrolled.$.status"),
            Some(&Bson::String("rejected".into()))
        );
        assert_eq!(
            set.get("enrolled.$.rejected_at"),
            Some(&Bson::String(now.to_rfc3339()))
        );
    }

    #[test]
    fn enrolling_does_not_touch_timestamps() {
        let update = transition_update(EnrollmentStatus::Enrolled, Utc::now());
        let set = update.get_document("$set").unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("enrolled.$.status"),
            Some(&Bson::String("enrolled".into()))
        );
    }

    #[test]
    fn failed_push_against_an_existing_user_is_a_conflict_not_a_missing_user() {
        use crate::role::Role;

        let course = Uuid::new_v4();
        let mut user = User::new(
            "sam@example.com",
            "Sam",
            "hunter2hunter2",
            Role::Student,
            &[3u8; 16],
        );

        // Entry withdrawn while the push raced: the pair is absent, but the
        // user still exists.
        assert_eq!(
            push_conflict(user.id, Some(&user), course).unwrap(),
            WriteResult::Conflict(ViewStatus::Absent)
        );

        user.enrolled
            .push(Enrollment::request(course, "Rust Basics", Utc::now()));
        assert_eq!(
            push_conflict(user.id, Some(&user), course).unwrap(),
            WriteResult::Conflict(ViewStatus::Requested)
        );

        let missing = Uuid::new_v4();
        let problem = push_conflict(missing, None, course).unwrap_err();
        assert_eq!(problem.status, rocket::http::Status::NotFound);
    }

    #[test]
    fn stored_timestamps_round_trip_through_serde() {
        let now = Utc::now();
        let parsed: DateTime<Utc> =
            serde_json::from_value(serde_json::Value::String(now.to_rfc3339()))
                .expect("raw update timestamps must deserialize as DateTime");
        assert_eq!(parsed, now);
    }
}
