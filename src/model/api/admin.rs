use rocket::http::Status;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{
    common::password::{hash_password, MIN_PASSWORD_LENGTH},
    db::admin::NewAdmin,
};

/// Raw admin credentials, received from a user. These are never stored directly,
/// since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl TryFrom<AdminCredentials> for NewAdmin {
    type Error = Error;

    /// Convert [`AdminCredentials`] to a new [`Admin`] by hashing the password.
    /// This enforces that the username is non-empty, and the password meets minimum length.
    fn try_from(cred: AdminCredentials) -> Result<Self, Self::Error> {
        // Check credentials are acceptable.
        if cred.username.is_empty() || cred.password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::Status(
                Status::BadRequest,
                "Illegal admin credentials".to_string(),
            ));
        }

        Ok(Self {
            password_hash: hash_password(&cred.password)?,
            username: cred.username,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_are_refused() {
        let cred = AdminCredentials {
            username: "carol".into(),
            password: "short".into(),
        };
        assert!(NewAdmin::try_from(cred).is_err());
        assert!(NewAdmin::try_from(AdminCredentials::empty()).is_err());

        let admin = NewAdmin::try_from(AdminCredentials::example3()).unwrap();
        assert_eq!(admin.username, "monsieur-foo");
        assert!(admin.verify_password("foobarbaz"));
    }
}
