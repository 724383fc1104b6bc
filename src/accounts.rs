//! Users, profiles and avatars.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::catalog::Image;
use crate::domain::value_objects::{digits_only, PasswordHash};

#[derive(Clone, Debug)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub password_hash: PasswordHash,
    pub is_staff: bool,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub password_hash: PasswordHash,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<Image>,
}

/// Partial profile update; absent fields are left untouched.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 40))]
    pub full_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom = "digits_only")]
    pub phone: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(self, profile: &mut Profile) {
        if let Some(full_name) = self.full_name { profile.full_name = full_name; }
        if let Some(email) = self.email { profile.email = Some(email); }
        if let Some(phone) = self.phone { profile.phone = Some(phone); }
    }
}
