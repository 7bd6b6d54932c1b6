use bson::{doc, Document};
use uuid::Uuid;

use crate::role::{MentorStatus, Role};
use crate::util::uuid_binary;

#[inline]
pub fn by_id(id: Uuid) -> Document {
    doc! { "_id": uuid_binary(id) }
}

#[inline]
pub fn by_email(email: impl ToString) -> Document {
    doc! { "email": email.to_string() }
}

/// Mentors awaiting an admin decision, the server-side counterpart of the
/// admin waitlist view.
#[inline]
pub fn mentor_waitlist() -> Document {
    doc! {
        "role": Role::Mentor.to_string(),
        "status": MentorStatus::Waitlisted.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    #[test]
    fn waitlist_filter_uses_stored_names() {
        let filter = mentor_waitlist();
        assert_eq!(filter.get("role"), Some(&Bson::String("mentor".into())));
        assert_eq!(
            filter.get("status"),
            Some(&Bson::String("waitlisted".into()))
        );
    }

    #[test]
    fn id_filter_targets_the_primary_key() {
        let id = Uuid::new_v4();
        assert_eq!(by_id(id).get("_id"), Some(&uuid_binary(id)));
    }
}
