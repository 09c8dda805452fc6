use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    api::admin::AdminCredentials,
    common::password::verify_password,
    mongodb::{Coll, Id},
};

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
}

impl AdminCore {
    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Ensure that at least one admin exists, creating one from the given
/// credentials if not.
///
/// This operation is idempotent.
pub async fn ensure_admin_exists(admins: &Coll<Admin>, credentials: AdminCredentials) -> Result<()> {
    if admins.find_one(None, None).await?.is_none() {
        info!("No admins found, creating bootstrap admin {}", credentials.username);
        let admin = NewAdmin::try_from(credentials)?;
        admins
            .clone_with_type::<NewAdmin>()
            .insert_one(admin, None)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use mongodb::{bson::doc, Database};
    use rocket::futures::TryStreamExt;

    #[backend_test]
    async fn bootstrap_admin_is_created_once(db: Database) {
        let admins = Coll::<Admin>::from_db(&db);
        ensure_admin_exists(&admins, AdminCredentials::example1())
            .await
            .unwrap();
        ensure_admin_exists(&admins, AdminCredentials::example2())
            .await
            .unwrap();

        let all: Vec<String> = admins
            .find(None, None)
            .await
            .unwrap()
            .map_ok(|admin| admin.admin.username)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all, vec![AdminCredentials::example1().username]);

        let admin = admins
            .find_one(doc! { "username": &AdminCredentials::example1().username }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(admin.verify_password(&AdminCredentials::example1().password));
        assert!(!admin.verify_password("wrong password"));
    }
}
