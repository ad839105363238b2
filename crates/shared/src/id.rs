use std::fmt;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// An opaque, stable identifier. Backed by a MongoDB ObjectId hex string at
/// the store boundary, but treated as an opaque string everywhere above it
/// (campaigns, leads, mailboxes, templates, steps all use this one shape).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_object_id(&self) -> Result<ObjectId, IdError> {
        ObjectId::parse_str(&self.0).map_err(|_| IdError::NotAnObjectId(self.0.clone()))
    }

    pub fn from_object_id(oid: ObjectId) -> Self {
        Self(oid.to_hex())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("'{0}' is not a valid object id")]
    NotAnObjectId(String),
}
