use serde::Deserialize;

use crate::users::repo::Role;

/// Self-service profile update. Credential fields are present only so the
/// handler can point their senders at /update-password instead.
#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

/// Admin-side user update; the only place a role can be changed.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<Role>,
}
