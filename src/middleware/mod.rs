use axum::{extract::FromRequestParts, http::request::Parts};
use std::str::FromStr;
use std::sync::Arc;

use crate::controllers::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

crate::models::status_enum!(
    /// Роль вызывающего; аутентификацию выполняет шлюз перед сервисом
    Role {
        Passenger => "PASSENGER",
        Clerk => "CLERK",
        Dispatcher => "DISPATCHER",
        Driver => "DRIVER",
        Admin => "ADMIN",
    }
);

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    /// ADMIN проходит любую проверку роли
    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if self.role == Role::Admin || allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "role {} is not allowed here",
                self.role
            )))
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

// Заголовочный extractor: X-User-Id + X-User-Role
impl FromRequestParts<Arc<crate::AppState>> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or(ApiError::Unauthorized)?;

        let role = header(parts, USER_ROLE_HEADER)
            .ok_or(ApiError::Unauthorized)
            .and_then(|raw| Role::from_str(&raw.to_ascii_uppercase()).map_err(|_| ApiError::Unauthorized))?;

        Ok(Actor { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_passes_every_role_check() {
        let admin = Actor { user_id: 1, role: Role::Admin };
        assert!(admin.require(&[Role::Dispatcher]).is_ok());

        let clerk = Actor { user_id: 2, role: Role::Clerk };
        assert!(clerk.require(&[Role::Clerk, Role::Dispatcher]).is_ok());
        assert!(matches!(clerk.require(&[Role::Driver]), Err(ApiError::Forbidden(_))));
    }
}
