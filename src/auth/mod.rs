pub mod jwt;
pub mod password;

use std::{fmt, str::FromStr};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// What a console account may do. Admins can additionally assign user
/// roles and import into or delete from the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Admin,
    #[serde(rename = "staff")]
    Operator,
}

impl StaffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Operator => "staff",
        }
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "admin" => Ok(StaffRole::Admin),
            "staff" => Ok(StaffRole::Operator),
            other => Err(format!("unknown staff role '{other}' (expected admin or staff)")),
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A console account whose bearer token checked out.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedStaff {
    pub staff_id: Uuid,
    pub username: String,
    pub role: StaffRole,
}

impl AuthenticatedStaff {
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role {
            StaffRole::Admin => Ok(()),
            StaffRole::Operator => Err(AppError::forbidden()),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedStaff {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(staff) = parts.extensions.get::<AuthenticatedStaff>() {
            return Ok(staff.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let staff = AuthenticatedStaff {
            staff_id: claims.sub,
            username: claims.username,
            role: claims.role,
        };
        parts.extensions.insert(staff.clone());
        Ok(staff)
    }
}
