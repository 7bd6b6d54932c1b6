use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

pub static COURSE_COLLECTION_NAME: &str = "courses";

fn default_course_status() -> String {
    "active".to_string()
}

/// A `courses` document. `status` is display-only catalog metadata; course
/// availability is decided by the owner's mentor approval, not this field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Course {
    #[serde(
        default = "Uuid::new_v4",
        rename = "_id",
        with = "bson::serde_helpers::uuid_1_as_binary"
    )]
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub organisation: String,
    #[serde(default = "default_course_status")]
    pub status: String,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub mentor: Uuid,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl Course {
    /// Case-insensitive substring match on the title, the catalog search
    /// the student view applies after a full fetch.
    pub fn title_matches(&self, search: &str) -> bool {
        if search.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&search.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(title: &str) -> Course {
        Course {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            duration: "6 weeks".to_string(),
            organisation: "Open Mentoring e.V.".to_string(),
            status: default_course_status(),
            mentor: Uuid::new_v4(),
            created: Utc::now(),
        }
    }

    #[test]
    fn title_search_is_case_insensitive_substring() {
        let c = course("Embedded Rust Fundamentals");
        assert!(c.title_matches(""));
        assert!(c.title_matches("rust"));
        assert!(c.title_matches("EMBEDDED"));
        assert!(!c.title_matches("python"));
    }

    #[test]
    fn courses_round_trip_through_bson() {
        let c = course("Distributed Systems");
        let doc = bson::to_document(&c).expect("course serializes");
        let restored: Course = bson::from_document(doc).expect("course deserializes");

        assert_eq!(restored.id, c.id);
        assert_eq!(restored.title, c.title);
        assert_eq!(restored.mentor, c.mentor);
        assert_eq!(restored.status, "active");
    }

    #[test]
    fn missing_display_fields_get_defaults() {
        let id = Uuid::new_v4();
        let mentor = Uuid::new_v4();
        let doc = bson::doc! {
            "_id": crate::util::uuid_binary(id),
            "title": "Legacy Course",
            "mentor": crate::util::uuid_binary(mentor),
        };

        let restored: Course = bson::from_document(doc).expect("legacy shape deserializes");
        assert_eq!(restored.status, "active");
        assert!(restored.description.is_empty());
    }
}
