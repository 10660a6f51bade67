use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of identifiers in the remote service's format.
pub const UID_LEN: usize = 11;

const UID_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const UID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DraftId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EventId(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    Empty,
    InvalidFormat { value: String },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier must not be empty"),
            Self::InvalidFormat { value } => write!(f, "invalid id format: {value}"),
        }
    }
}

impl std::error::Error for IdError {}

/// Generates an identifier the remote service accepts as its own: one
/// letter followed by ten letters or digits.
pub fn generate_uid() -> String {
    let mut rng = rand::thread_rng();
    let mut value = String::with_capacity(UID_LEN);
    value.push(char::from(UID_LETTERS[rng.gen_range(0..UID_LETTERS.len())]));
    for _ in 1..UID_LEN {
        value.push(char::from(UID_CHARS[rng.gen_range(0..UID_CHARS.len())]));
    }
    value
}

pub fn is_uid(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == UID_LEN
        && bytes[0].is_ascii_alphabetic()
        && bytes.iter().all(u8::is_ascii_alphanumeric)
}

fn validate_trimmed(value: &str) -> Result<String, IdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty);
    }
    Ok(trimmed.to_string())
}

fn validate_uid(value: &str) -> Result<String, IdError> {
    let trimmed = validate_trimmed(value)?;
    if !is_uid(&trimmed) {
        return Err(IdError::InvalidFormat { value: trimmed });
    }
    Ok(trimmed)
}

macro_rules! id_type {
    ($name:ident, $validate:path) => {
        impl $name {
            pub fn new(value: impl AsRef<str>) -> Result<Self, IdError> {
                $validate(value.as_ref()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let value = String::deserialize(deserializer)?;
                Self::new(value).map_err(serde::de::Error::custom)
            }
        }
    };
}

id_type!(UserId, validate_trimmed);
id_type!(DraftId, validate_trimmed);
id_type!(EventId, validate_uid);

impl DraftId {
    /// Fresh draft ids use the event id format so promotion can keep the id.
    pub fn generate() -> Self {
        Self(generate_uid())
    }
}

impl EventId {
    pub fn generate() -> Self {
        Self(generate_uid())
    }
}

impl TryFrom<&DraftId> for EventId {
    type Error = IdError;

    fn try_from(value: &DraftId) -> Result<Self, Self::Error> {
        Self::new(value.as_str())
    }
}

impl From<&EventId> for DraftId {
    fn from(value: &EventId) -> Self {
        Self(value.0.clone())
    }
}
