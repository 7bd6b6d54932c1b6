use std::time::Duration;

use bson::{doc, from_bson, Bson, Document};
use chrono::Utc;
use mongodb::Database;
use rocket::futures::StreamExt;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Course, COURSE_COLLECTION_NAME};
use crate::enrollment::db::EnrollmentDbExt;
use crate::resp::problem::Problem;
use crate::util::{uuid_binary, with_retries};

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "Course is no longer available.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_title() -> Problem {
        Problem::new_untyped(Status::BadRequest, "Course title can't be empty.")
    }
}

// Catalog reads tolerate a couple of transient failures before surfacing.
const LIST_RETRIES: u32 = 3;
const LIST_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CourseCreateData {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub organisation: String,
}

impl CourseCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        if self.title.trim().is_empty() {
            return Err(problem::bad_title());
        }
        Ok(())
    }

    pub fn into_course(self, mentor: Uuid) -> Course {
        Course {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            duration: self.duration,
            organisation: self.organisation,
            status: "active".to_string(),
            mentor,
            created: Utc::now(),
        }
    }
}

/// Mutable catalog fields; ownership and creation time never change.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CourseUpdateData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub organisation: Option<String>,
}

impl CourseUpdateData {
    pub fn into_set_document(self) -> Result<Document, Problem> {
        let mut set = Document::new();
        if let Some(title) = self.title {
            if title.trim().is_empty() {
                return Err(problem::bad_title());
            }
            set.insert("title", title);
        }
        if let Some(description) = self.description {
            set.insert("description", description);
        }
        if let Some(duration) = self.duration {
            set.insert("duration", duration);
        }
        if let Some(organisation) = self.organisation {
            set.insert("organisation", organisation);
        }
        Ok(set)
    }
}

#[inline]
pub fn course_id_filter(id: Uuid) -> Document {
    doc! { "_id": uuid_binary(id) }
}

#[inline]
pub fn by_mentor(mentor: Uuid) -> Document {
    doc! { "mentor": uuid_binary(mentor) }
}

pub trait CourseDbExt {
    async fn create_course(&self, course: &Course) -> Result<(), Problem>;
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem>;

    /// Full catalog; the route layer applies search and paging on top.
    async fn list_courses(&self) -> Result<Vec<Course>, Problem>;
    async fn courses_by_mentor(&self, mentor: Uuid) -> Result<Vec<Course>, Problem>;

    async fn update_course(&self, id: Uuid, update: CourseUpdateData) -> Result<(), Problem>;

    /// Delete the course and scrub every enrollment entry referencing it,
    /// so no user is left pointing at a course that no longer exists.
    async fn delete_course(&self, id: Uuid) -> Result<(), Problem>;
}

impl CourseDbExt for Database {
    async fn create_course(&self, course: &Course) -> Result<(), Problem> {
        self.collection(COURSE_COLLECTION_NAME)
            .insert_one(
                bson::to_document(course).expect("Course must be serializable to BSON"),
                None,
            )
            .await
            .map_err(Problem::from)?;

        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem> {
        self.collection(COURSE_COLLECTION_NAME)
            .find_one(course_id_filter(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Problem> {
        with_retries(LIST_RETRIES, LIST_BACKOFF, || collect_courses(self, None)).await
    }

    async fn courses_by_mentor(&self, mentor: Uuid) -> Result<Vec<Course>, Problem> {
        with_retries(LIST_RETRIES, LIST_BACKOFF, || {
            collect_courses(self, Some(by_mentor(mentor)))
        })
        .await
    }

    async fn update_course(&self, id: Uuid, update: CourseUpdateData) -> Result<(), Problem> {
        let set = update.into_set_document()?;
        if set.is_empty() {
            return Ok(());
        }

        let result = self
            .collection::<Course>(COURSE_COLLECTION_NAME)
            .update_one(course_id_filter(id), doc! { "$set": set }, None)
            .await
            .map_err(Problem::from)?;

        if result.matched_count == 0 {
            return Err(problem::not_found(id));
        }

        Ok(())
    }

    async fn delete_course(&self, id: Uuid) -> Result<(), Problem> {
        let result = self
            .collection::<Course>(COURSE_COLLECTION_NAME)
            .delete_one(course_id_filter(id), None)
            .await
            .map_err(Problem::from)?;

        if result.deleted_count == 0 {
            return Err(problem::not_found(id));
        }

        // Referential cleanup must follow every delete, not just some flows.
        self.scrub_course(id).await?;

        Ok(())
    }
}

async fn collect_courses(db: &Database, filter: Option<Document>) -> Result<Vec<Course>, Problem> {
    let mut cursor = db
        .collection::<Document>(COURSE_COLLECTION_NAME)
        .find(filter, None)
        .await
        .map_err(Problem::from)?;

    let mut courses: Vec<Course> = vec![];
    while let Some(document) = cursor.next().await {
        match document.map(Bson::Document).map(from_bson::<Course>) {
            Ok(Ok(course)) => courses.push(course),
            Ok(Err(_)) => {
                tracing::warn!("Unable to deserialize Course document.")
            }
            Err(e) => return Err(Problem::from(e)),
        }
    }

    Ok(courses)
}
