use serde::Deserialize;

use super::repo_types::KindAffinity;

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub kind: KindAffinity,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub kind: Option<KindAffinity>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub kind: Option<KindAffinity>,
}
