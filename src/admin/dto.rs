use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ToggleStatusResponse {
    pub message: &'static str,
    pub user: User,
}
