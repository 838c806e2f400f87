// src/models/user.rs

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::models::attempt::{AttemptStatus, ExamAttempt};

/// Portal role carried in the bearer token.
/// Accounts themselves are managed by the surrounding portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

impl Caller {
    pub fn student(user_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Student,
        }
    }

    pub fn teacher(user_id: i64) -> Self {
        Self {
            user_id,
            role: Role::Teacher,
        }
    }

    /// Teachers and admins grade, preview unpublished exams and see answer keys.
    pub fn is_grader(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }

    /// Scores and correctness stay hidden from learners until the attempt is graded.
    pub fn sees_results(&self, attempt: &ExamAttempt) -> bool {
        self.is_grader() || attempt.status == AttemptStatus::Graded
    }
}
