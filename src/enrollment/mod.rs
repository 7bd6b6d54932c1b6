//! Enrollment state machine.
//!
//! Every dashboard consults this module before touching an `enrolled`
//! record; no route carries its own copy of the transition rules. The
//! decision logic is pure: callers pass the current record, the acting
//! session and the course context, and get back either the transition to
//! persist or a typed denial.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::role::{MentorStatus, Role};

pub mod db;

/// Persisted status of an enrollment record. `absent` has no stored
/// counterpart; it is the lack of a record.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Requested,
    Enrolled,
    Rejected,
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentStatus::Requested => write!(f, "requested"),
            EnrollmentStatus::Enrolled => write!(f, "enrolled"),
            EnrollmentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One entry of a user's `enrolled` sequence. The title is a denormalized
/// copy taken at request time and may go stale if the course is renamed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    #[serde(rename = "id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub course: Uuid,
    pub title: String,
    pub status: EnrollmentStatus,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn request(course: Uuid, title: impl ToString, now: DateTime<Utc>) -> Enrollment {
        Enrollment {
            course,
            title: title.to_string(),
            status: EnrollmentStatus::Requested,
            requested_at: now,
            rejected_at: None,
        }
    }
}

/// Record state as the UI sees it, including the no-record case.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ViewStatus {
    Absent,
    Requested,
    Enrolled,
    Rejected,
}

impl From<EnrollmentStatus> for ViewStatus {
    fn from(status: EnrollmentStatus) -> Self {
        match status {
            EnrollmentStatus::Requested => ViewStatus::Requested,
            EnrollmentStatus::Enrolled => ViewStatus::Enrolled,
            EnrollmentStatus::Rejected => ViewStatus::Rejected,
        }
    }
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewStatus::Absent => write!(f, "absent"),
            ViewStatus::Requested => write!(f, "requested"),
            ViewStatus::Enrolled => write!(f, "enrolled"),
            ViewStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentAction {
    Request,
    Withdraw,
    Reapply,
    Approve,
    Reject,
}

impl std::fmt::Display for EnrollmentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentAction::Request => write!(f, "request"),
            EnrollmentAction::Withdraw => write!(f, "withdraw"),
            EnrollmentAction::Reapply => write!(f, "reapply"),
            EnrollmentAction::Approve => write!(f, "approve"),
            EnrollmentAction::Reject => write!(f, "reject"),
        }
    }
}

/// The acting session, passed in explicitly so decisions are testable
/// without a live login.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user: Uuid,
    pub role: Role,
}

/// Course facts the guards need: who owns it and whether that owner is an
/// approved mentor.
#[derive(Debug, Clone, Copy)]
pub struct CourseContext {
    pub id: Uuid,
    pub mentor: Uuid,
    pub mentor_status: MentorStatus,
}

/// Minimum wait after a rejection before the same student may request the
/// course again. The default matches the 48-hour rule.
#[derive(Debug, Clone, Copy)]
pub struct ReapplyPolicy {
    pub cooldown: Duration,
}

impl ReapplyPolicy {
    pub fn hours(hours: i64) -> ReapplyPolicy {
        ReapplyPolicy {
            cooldown: Duration::hours(hours),
        }
    }
}

impl Default for ReapplyPolicy {
    fn default() -> Self {
        ReapplyPolicy::hours(48)
    }
}

/// An allowed transition. `next: None` means the record is removed and the
/// pair returns to `absent`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Decision {
    pub action: EnrollmentAction,
    pub next: Option<EnrollmentStatus>,
}

/// Why a transition was refused. Stale and no-op attempts surface as
/// `InvalidTransition` so the caller can tell the user the request was
/// already handled instead of crashing or silently overwriting.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum Denial {
    #[error("cannot {action} a record that is {current}")]
    InvalidTransition {
        action: EnrollmentAction,
        current: ViewStatus,
    },
    #[error("only the course-owning mentor may decide requests")]
    NotCourseOwner,
    #[error("only students may manage their enrollment")]
    StudentsOnly,
    #[error("enrollment records can only be changed by their owner")]
    NotOwnRecord,
    #[error("the course owner is not an approved mentor")]
    MentorNotApproved,
    #[error("reapply cooldown has {remaining} left")]
    CooldownActive { remaining: Duration },
}

fn invalid(action: EnrollmentAction, record: Option<&Enrollment>) -> Denial {
    Denial::InvalidTransition {
        action,
        current: record.map(|r| r.status.into()).unwrap_or(ViewStatus::Absent),
    }
}

/// Evaluate one action against the record of `subject` for `course`.
///
/// Pure, no I/O. The persistence layer re-checks the expected prior state
/// on write, so a decision that raced another actor still fails closed.
pub fn evaluate(
    subject: Uuid,
    record: Option<&Enrollment>,
    action: EnrollmentAction,
    actor: &Actor,
    course: &CourseContext,
    now: DateTime<Utc>,
    policy: &ReapplyPolicy,
) -> Result<Decision, Denial> {
    match action {
        EnrollmentAction::Request => {
            if !actor.role.can_request_enrollment() {
                return Err(Denial::StudentsOnly);
            }
            if actor.user != subject {
                return Err(Denial::NotOwnRecord);
            }
            if course.mentor_status != MentorStatus::Approved {
                return Err(Denial::MentorNotApproved);
            }
            match record {
                None => Ok(Decision {
                    action,
                    next: Some(EnrollmentStatus::Requested),
                }),
                Some(_) => Err(invalid(action, record)),
            }
        }
        EnrollmentAction::Withdraw => {
            if actor.user != subject {
                return Err(Denial::NotOwnRecord);
            }
            match record {
                Some(r) if r.status == EnrollmentStatus::Requested => {
                    Ok(Decision { action, next: None })
                }
                _ => Err(invalid(action, record)),
            }
        }
        EnrollmentAction::Reapply => {
            if !actor.role.can_request_enrollment() {
                return Err(Denial::StudentsOnly);
            }
            if actor.user != subject {
                return Err(Denial::NotOwnRecord);
            }
            if course.mentor_status != MentorStatus::Approved {
                return Err(Denial::MentorNotApproved);
            }
            match record {
                Some(r) if r.status == EnrollmentStatus::Rejected => {
                    // Records rejected before timestamps were stored carry no
                    // rejected_at; those are past any reasonable cooldown.
                    if let Some(rejected_at) = r.rejected_at {
                        let elapsed = now - rejected_at;
                        if elapsed < policy.cooldown {
                            return Err(Denial::CooldownActive {
                                remaining: policy.cooldown - elapsed,
                            });
                        }
                    }
                    Ok(Decision {
                        action,
                        next: Some(EnrollmentStatus::Requested),
                    })
                }
                _ => Err(invalid(action, record)),
            }
        }
        EnrollmentAction::Approve | EnrollmentAction::Reject => {
            if actor.role != Role::Mentor || actor.user != course.mentor {
                return Err(Denial::NotCourseOwner);
            }
            match record {
                Some(r) if r.status == EnrollmentStatus::Requested => Ok(Decision {
                    action,
                    next: Some(if action == EnrollmentAction::Approve {
                        EnrollmentStatus::Enrolled
                    } else {
                        EnrollmentStatus::Rejected
                    }),
                }),
                _ => Err(invalid(action, record)),
            }
        }
    }
}

/// Status of `course` within one user's entries. First matching entry wins;
/// legacy data may contain duplicates appended by unconditional array
/// unions, and those must not flip the displayed state.
pub fn status_for(entries: &[Enrollment], course: Uuid) -> ViewStatus {
    entries
        .iter()
        .find(|e| e.course == course)
        .map(|e| e.status.into())
        .unwrap_or(ViewStatus::Absent)
}

/// Drop every entry referencing `course`, returning how many were removed.
/// Used to keep local views consistent after a course is deleted; the
/// stored counterpart is [`db::EnrollmentDbExt::scrub_course`].
pub fn scrub_entries(entries: &mut Vec<Enrollment>, course: Uuid) -> usize {
    let before = entries.len();
    entries.retain(|e| e.course != course);
    before - entries.len()
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, ToSchema)]
pub struct Tally {
    pub requests: u64,
    pub enrolled: u64,
}

/// Per-course request/enrollment counts.
///
/// Building this is a full scan over every user's `enrolled` sequence, so
/// callers collect it once per fetch cycle and look courses up from the map
/// rather than rescanning per course or per render. Each (user, course)
/// pair is counted at most once even when legacy duplicates exist.
#[derive(Debug, Clone, Default)]
pub struct CourseTallies(HashMap<Uuid, Tally>);

impl CourseTallies {
    pub fn collect<'a, I>(enrollment_lists: I) -> CourseTallies
    where
        I: IntoIterator<Item = &'a [Enrollment]>,
    {
        let mut tallies: HashMap<Uuid, Tally> = HashMap::new();

        for entries in enrollment_lists {
            let mut seen: HashSet<Uuid> = HashSet::new();
            for entry in entries {
                if !seen.insert(entry.course) {
                    continue;
                }
                let tally = tallies.entry(entry.course).or_default();
                match entry.status {
                    EnrollmentStatus::Requested => tally.requests += 1,
                    EnrollmentStatus::Enrolled => tally.enrolled += 1,
                    EnrollmentStatus::Rejected => {}
                }
            }
        }

        CourseTallies(tallies)
    }

    pub fn for_course(&self, course: Uuid) -> Tally {
        self.0.get(&course).copied().unwrap_or_default()
    }

    pub fn requests_for(&self, course: Uuid) -> u64 {
        self.for_course(course).requests
    }

    pub fn enrolled_for(&self, course: Uuid) -> u64 {
        self.for_course(course).enrolled
    }

    pub fn into_inner(self) -> HashMap<Uuid, Tally> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Actor {
        Actor {
            user: Uuid::new_v4(),
            role: Role::Student,
        }
    }

    fn course_of(mentor: Uuid) -> CourseContext {
        CourseContext {
            id: Uuid::new_v4(),
            mentor,
            mentor_status: MentorStatus::Approved,
        }
    }

    fn entry(course: Uuid, status: EnrollmentStatus, now: DateTime<Utc>) -> Enrollment {
        Enrollment {
            course,
            title: "Rust for Embedded".to_string(),
            status,
            requested_at: now,
            rejected_at: match status {
                EnrollmentStatus::Rejected => Some(now),
                _ => None,
            },
        }
    }

    #[test]
    fn request_from_absent_is_allowed_once() {
        let s = student();
        let course = course_of(Uuid::new_v4());
        let now = Utc::now();
        let policy = ReapplyPolicy::default();

        let decision = evaluate(
            s.user,
            None,
            EnrollmentAction::Request,
            &s,
            &course,
            now,
            &policy,
        )
        .expect("request from absent should be allowed");
        assert_eq!(decision.next, Some(EnrollmentStatus::Requested));

        // An immediate second request against the resulting record is a no-op
        // transition and must be denied, not silently accepted.
        let requested = entry(course.id, EnrollmentStatus::Requested, now);
        let denied = evaluate(
            s.user,
            Some(&requested),
            EnrollmentAction::Request,
            &s,
            &course,
            now,
            &policy,
        )
        .unwrap_err();
        assert_eq!(
            denied,
            Denial::InvalidTransition {
                action: EnrollmentAction::Request,
                current: ViewStatus::Requested,
            }
        );
    }

    #[test]
    fn request_denied_when_owner_not_approved() {
        let s = student();
        let mut course = course_of(Uuid::new_v4());
        course.mentor_status = MentorStatus::Waitlisted;

        let denied = evaluate(
            s.user,
            None,
            EnrollmentAction::Request,
            &s,
            &course,
            Utc::now(),
            &ReapplyPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(denied, Denial::MentorNotApproved);
    }

    #[test]
    fn only_owning_mentor_decides_requests() {
        let s = student();
        let owner = Uuid::new_v4();
        let course = course_of(owner);
        let now = Utc::now();
        let requested = entry(course.id, EnrollmentStatus::Requested, now);
        let policy = ReapplyPolicy::default();

        let other_mentor = Actor {
            user: Uuid::new_v4(),
            role: Role::Mentor,
        };
        assert_eq!(
            evaluate(
                s.user,
                Some(&requested),
                EnrollmentAction::Approve,
                &other_mentor,
                &course,
                now,
                &policy,
            ),
            Err(Denial::NotCourseOwner)
        );

        // Students can't decide, not even for themselves.
        assert_eq!(
            evaluate(
                s.user,
                Some(&requested),
                EnrollmentAction::Reject,
                &s,
                &course,
                now,
                &policy,
            ),
            Err(Denial::NotCourseOwner)
        );

        let owning = Actor {
            user: owner,
            role: Role::Mentor,
        };
        let approved = evaluate(
            s.user,
            Some(&requested),
            EnrollmentAction::Approve,
            &owning,
            &course,
            now,
            &policy,
        )
        .expect("owning mentor approval");
        assert_eq!(approved.next, Some(EnrollmentStatus::Enrolled));

        let rejected = evaluate(
            s.user,
            Some(&requested),
            EnrollmentAction::Reject,
            &owning,
            &course,
            now,
            &policy,
        )
        .expect("owning mentor rejection");
        assert_eq!(rejected.next, Some(EnrollmentStatus::Rejected));
    }

    #[test]
    fn approving_an_already_enrolled_record_is_invalid() {
        let s = student();
        let owner = Uuid::new_v4();
        let course = course_of(owner);
        let now = Utc::now();
        let enrolled = entry(course.id, EnrollmentStatus::Enrolled, now);
        let owning = Actor {
            user: owner,
            role: Role::Mentor,
        };

        let denied = evaluate(
            s.user,
            Some(&enrolled),
            EnrollmentAction::Approve,
            &owning,
            &course,
            now,
            &ReapplyPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(
            denied,
            Denial::InvalidTransition {
                action: EnrollmentAction::Approve,
                current: ViewStatus::Enrolled,
            }
        );
    }

    #[test]
    fn withdraw_only_while_requested_and_only_by_owner() {
        let s = student();
        let course = course_of(Uuid::new_v4());
        let now = Utc::now();
        let requested = entry(course.id, EnrollmentStatus::Requested, now);
        let policy = ReapplyPolicy::default();

        let decision = evaluate(
            s.user,
            Some(&requested),
            EnrollmentAction::Withdraw,
            &s,
            &course,
            now,
            &policy,
        )
        .expect("withdrawing an own request");
        assert_eq!(decision.next, None);

        let someone_else = student();
        assert_eq!(
            evaluate(
                s.user,
                Some(&requested),
                EnrollmentAction::Withdraw,
                &someone_else,
                &course,
                now,
                &policy,
            ),
            Err(Denial::NotOwnRecord)
        );

        let enrolled = entry(course.id, EnrollmentStatus::Enrolled, now);
        assert!(matches!(
            evaluate(
                s.user,
                Some(&enrolled),
                EnrollmentAction::Withdraw,
                &s,
                &course,
                now,
                &policy,
            ),
            Err(Denial::InvalidTransition { .. })
        ));
    }

    #[test]
    fn reapply_honors_the_cooldown_boundary() {
        let s = student();
        let course = course_of(Uuid::new_v4());
        let rejected_at = Utc::now();
        let mut record = entry(course.id, EnrollmentStatus::Rejected, rejected_at);
        record.rejected_at = Some(rejected_at);
        let policy = ReapplyPolicy::hours(48);

        let too_soon = evaluate(
            s.user,
            Some(&record),
            EnrollmentAction::Reapply,
            &s,
            &course,
            rejected_at + Duration::hours(1),
            &policy,
        )
        .unwrap_err();
        assert!(matches!(too_soon, Denial::CooldownActive { remaining }
            if remaining == Duration::hours(47)));

        // Exactly at the boundary counts as elapsed.
        let at_boundary = evaluate(
            s.user,
            Some(&record),
            EnrollmentAction::Reapply,
            &s,
            &course,
            rejected_at + Duration::hours(48),
            &policy,
        )
        .expect("cooldown elapsed exactly");
        assert_eq!(at_boundary.next, Some(EnrollmentStatus::Requested));

        let after = evaluate(
            s.user,
            Some(&record),
            EnrollmentAction::Reapply,
            &s,
            &course,
            rejected_at + Duration::hours(49),
            &policy,
        )
        .expect("cooldown elapsed");
        assert_eq!(after.next, Some(EnrollmentStatus::Requested));
    }

    #[test]
    fn reapply_requires_a_rejected_record() {
        let s = student();
        let course = course_of(Uuid::new_v4());
        let now = Utc::now();
        let policy = ReapplyPolicy::default();

        assert!(matches!(
            evaluate(
                s.user,
                None,
                EnrollmentAction::Reapply,
                &s,
                &course,
                now,
                &policy
            ),
            Err(Denial::InvalidTransition {
                current: ViewStatus::Absent,
                ..
            })
        ));

        let requested = entry(course.id, EnrollmentStatus::Requested, now);
        assert!(matches!(
            evaluate(
                s.user,
                Some(&requested),
                EnrollmentAction::Reapply,
                &s,
                &course,
                now,
                &policy
            ),
            Err(Denial::InvalidTransition { .. })
        ));
    }

    #[test]
    fn status_for_reports_first_match() {
        let now = Utc::now();
        let course = Uuid::new_v4();
        let other = Uuid::new_v4();
        let entries = vec![
            entry(course, EnrollmentStatus::Requested, now),
            // Legacy duplicate appended by an unguarded array union.
            entry(course, EnrollmentStatus::Enrolled, now),
        ];

        assert_eq!(status_for(&entries, course), ViewStatus::Requested);
        assert_eq!(status_for(&entries, other), ViewStatus::Absent);
        assert_eq!(status_for(&[], course), ViewStatus::Absent);
    }

    #[test]
    fn tallies_count_each_pair_at_most_once() {
        let now = Utc::now();
        let course = Uuid::new_v4();

        // One user with a duplicated entry, one cleanly enrolled, one rejected.
        let duplicated = vec![
            entry(course, EnrollmentStatus::Requested, now),
            entry(course, EnrollmentStatus::Requested, now),
        ];
        let enrolled = vec![entry(course, EnrollmentStatus::Enrolled, now)];
        let rejected = vec![entry(course, EnrollmentStatus::Rejected, now)];

        let tallies = CourseTallies::collect(
            [&duplicated[..], &enrolled[..], &rejected[..]]
                .iter()
                .copied(),
        );

        assert_eq!(tallies.requests_for(course), 1);
        assert_eq!(tallies.enrolled_for(course), 1);
        assert_eq!(tallies.for_course(Uuid::new_v4()), Tally::default());
    }

    #[test]
    fn request_then_approve_scenario() {
        let s = student();
        let owner = Uuid::new_v4();
        let course = course_of(owner);
        let now = Utc::now();
        let policy = ReapplyPolicy::default();

        let requested = evaluate(
            s.user,
            None,
            EnrollmentAction::Request,
            &s,
            &course,
            now,
            &policy,
        )
        .expect("request");
        let record = entry(course.id, requested.next.unwrap(), now);

        let owning = Actor {
            user: owner,
            role: Role::Mentor,
        };
        let approved = evaluate(
            s.user,
            Some(&record),
            EnrollmentAction::Approve,
            &owning,
            &course,
            now,
            &policy,
        )
        .expect("approve");

        let record = entry(course.id, approved.next.unwrap(), now);
        let lists = vec![vec![record]];
        let tallies = CourseTallies::collect(lists.iter().map(|l| l.as_slice()));
        assert_eq!(tallies.enrolled_for(course.id), 1);
        assert_eq!(tallies.requests_for(course.id), 0);
    }

    #[test]
    fn scrubbing_removes_every_reference_to_a_deleted_course() {
        let now = Utc::now();
        let deleted = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let mut entries = vec![
            entry(kept, EnrollmentStatus::Requested, now),
            entry(deleted, EnrollmentStatus::Enrolled, now),
            entry(kept, EnrollmentStatus::Rejected, now),
        ];

        // Round-trip through BSON first; stored entries must scrub the same.
        let bson = bson::to_bson(&entries).expect("entries serialize");
        let mut restored: Vec<Enrollment> = bson::from_bson(bson).expect("entries deserialize");
        assert_eq!(restored.len(), 3);

        assert_eq!(scrub_entries(&mut restored, deleted), 1);
        assert_eq!(restored.len(), 2);
        assert!(restored.iter().all(|e| e.course != deleted));

        assert_eq!(scrub_entries(&mut entries, Uuid::new_v4()), 0);
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn stored_status_names_match_display() {
        for status in [
            EnrollmentStatus::Requested,
            EnrollmentStatus::Enrolled,
            EnrollmentStatus::Rejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}
