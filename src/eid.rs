use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Opaque entity id. ULID-backed, so ids sort lexicographically by
/// creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Eid(String);

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Eid {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Eid(s.to_string()))
    }
}

impl Deref for Eid {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Eid {
    fn from(fr: &str) -> Self {
        Eid(fr.to_string())
    }
}

impl From<String> for Eid {
    fn from(fr: String) -> Self {
        Eid(fr)
    }
}

impl From<Eid> for String {
    fn from(fr: Eid) -> Self {
        fr.0
    }
}

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::generate_ulid_string())
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

/// Job ids carry an `emb-` prefix so they are recognizable in logs and
/// status lookups.
pub fn new_job_id() -> String {
    format!("emb-{}", rusty_ulid::generate_ulid_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eid_roundtrip() {
        let eid = Eid::new();
        let s: String = eid.clone().into();
        assert_eq!(Eid::from(s), eid);
    }

    #[test]
    fn test_job_id_prefix() {
        assert!(new_job_id().starts_with("emb-"));
    }

    #[test]
    fn test_eids_are_unique() {
        assert_ne!(Eid::new(), Eid::new());
    }
}
