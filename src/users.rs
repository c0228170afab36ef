//! User accounts created on first sign-in, with admin-gated role mutation.

use crate::auth;
use crate::eid::Eid;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    io::ErrorKind,
    str::FromStr,
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    /// Strict: exactly "user" or "admin", nothing else.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Eid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    /// Bearer credential issued at sign-in. Never serialized into API
    /// responses.
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The admin-visible projection. Excludes credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Eid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        UserView {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

pub trait UserStore: Send + Sync {
    fn list(&self) -> anyhow::Result<Vec<User>>;
    fn get(&self, id: &Eid) -> anyhow::Result<Option<User>>;
    /// Resolve a bearer token to its user, using constant-time comparison
    /// against each stored credential.
    fn find_by_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    /// First sign-in creates the account with role `user`; every sign-in
    /// issues a fresh token. Returns the user and the new token.
    fn sign_in(&self, email: &str, name: Option<String>) -> anyhow::Result<(User, String)>;
    fn set_role(&self, id: &Eid, role: Role) -> anyhow::Result<Option<User>>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<User>>>,
    path: String,
}

const CSV_HEADERS: [&str; 6] = ["id", "email", "name", "role", "token", "created_at"];

impl BackendCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new users database at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut users = vec![];
        for record in csv_reader.records() {
            let record = record?;

            let field = |idx: usize| -> anyhow::Result<String> {
                Ok(record
                    .get(idx)
                    .ok_or_else(|| anyhow!("couldnt get column {} ({})", idx, CSV_HEADERS[idx]))?
                    .to_string())
            };

            let role = field(3)?;
            let role = Role::from_str(&role)
                .map_err(|_| anyhow!("unknown role \"{role}\" in store"))?;

            let name = field(2)?;
            let token = field(4)?;

            users.push(User {
                id: Eid::from(field(0)?),
                email: field(1)?,
                name: if name.is_empty() { None } else { Some(name) },
                role,
                token: if token.is_empty() { None } else { Some(token) },
                created_at: DateTime::parse_from_rfc3339(&field(5)?)?.with_timezone(&Utc),
            });
        }

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(users)),
            path: path.to_string(),
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let users = self.list.read().map_err(|_| anyhow!("users lock poisoned"))?;

        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for user in users.iter() {
            csv_wrt.write_record([
                user.id.to_string(),
                user.email.clone(),
                user.name.clone().unwrap_or_default(),
                user.role.to_string(),
                user.token.clone().unwrap_or_default(),
                user.created_at.to_rfc3339(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl UserStore for BackendCsv {
    fn list(&self) -> anyhow::Result<Vec<User>> {
        let users = self.list.read().map_err(|_| anyhow!("users lock poisoned"))?;
        Ok(users.clone())
    }

    fn get(&self, id: &Eid) -> anyhow::Result<Option<User>> {
        let users = self.list.read().map_err(|_| anyhow!("users lock poisoned"))?;
        Ok(users.iter().find(|u| &u.id == id).cloned())
    }

    fn find_by_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let users = self.list.read().map_err(|_| anyhow!("users lock poisoned"))?;
        Ok(users
            .iter()
            .find(|u| {
                u.token
                    .as_deref()
                    .map(|stored| auth::validate_token(token, stored))
                    .unwrap_or(false)
            })
            .cloned())
    }

    fn sign_in(&self, email: &str, name: Option<String>) -> anyhow::Result<(User, String)> {
        let token = auth::issue_token();

        let user = {
            let mut users = self.list.write().map_err(|_| anyhow!("users lock poisoned"))?;

            match users.iter_mut().find(|u| u.email == email) {
                Some(user) => {
                    if name.is_some() {
                        user.name = name;
                    }
                    user.token = Some(token.clone());
                    user.clone()
                }
                None => {
                    let user = User {
                        id: Eid::new(),
                        email: email.to_string(),
                        name,
                        role: Role::User,
                        token: Some(token.clone()),
                        created_at: Utc::now(),
                    };
                    users.push(user.clone());
                    user
                }
            }
        };

        self.save()?;
        Ok((user, token))
    }

    fn set_role(&self, id: &Eid, role: Role) -> anyhow::Result<Option<User>> {
        let updated = {
            let mut users = self.list.write().map_err(|_| anyhow!("users lock poisoned"))?;
            let Some(user) = users.iter_mut().find(|u| &u.id == id) else {
                return Ok(None);
            };
            user.role = role;
            user.clone()
        };

        self.save()?;
        Ok(Some(updated))
    }
}
