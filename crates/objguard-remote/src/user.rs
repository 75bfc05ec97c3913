use serde::{Deserialize, Serialize};

/// Default representation returned by the user service. Unknown fields are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRep {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}
