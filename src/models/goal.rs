use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use uuid::Uuid;

use crate::utils::errorhandler::AppError;

#[derive(Debug, Type, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "goal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Serialize, Debug, FromRow)]
pub struct Goal {
    pub goal_id: Uuid,
    pub company_id: Uuid,
    pub owner_id: Uuid,
    pub approved_by: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub progress: i32,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct CreateGoalReq {
    pub owner_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct UpdateGoalReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub progress: Option<i32>,
    pub status: Option<GoalStatus>,
}

#[derive(Deserialize)]
pub struct GoalQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub status: Option<GoalStatus>,
}

/// Resolves the status implied by a progress update. Full progress
/// completes the goal; any progress moves a not-started goal along.
pub fn status_for_progress(progress: i32, requested: Option<GoalStatus>) -> Result<Option<GoalStatus>, AppError> {
    if !(0..=100).contains(&progress) {
        return Err(AppError::validation("progress must be between 0 and 100"));
    }
    Ok(match (progress, requested) {
        (100, _) => Some(GoalStatus::Completed),
        (_, Some(status)) => Some(status),
        (0, None) => None,
        (_, None) => Some(GoalStatus::InProgress),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_progress_completes() {
        assert_eq!(status_for_progress(100, None).unwrap(), Some(GoalStatus::Completed));
        assert_eq!(
            status_for_progress(100, Some(GoalStatus::InProgress)).unwrap(),
            Some(GoalStatus::Completed)
        );
    }

    #[test]
    fn test_partial_progress() {
        assert_eq!(status_for_progress(40, None).unwrap(), Some(GoalStatus::InProgress));
        assert_eq!(status_for_progress(0, None).unwrap(), None);
        assert_eq!(
            status_for_progress(40, Some(GoalStatus::Cancelled)).unwrap(),
            Some(GoalStatus::Cancelled)
        );
    }

    #[test]
    fn test_out_of_range() {
        assert!(status_for_progress(101, None).is_err());
        assert!(status_for_progress(-1, None).is_err());
    }
}
