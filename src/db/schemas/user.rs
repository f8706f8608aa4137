//! User document schema
//!
//! Stores citizen and admin accounts, credentials, and encrypted
//! identity-document fields.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User role
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Citizen,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "citizen" => Some(Role::Citizen),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Display name (2-50 chars)
    pub name: String,

    /// Lowercased unique email
    pub email: String,

    /// Argon2 password hash
    pub password_hash: String,

    /// Role (citizen or admin)
    #[serde(default)]
    pub role: Role,

    /// Avatar URL, defaulted from the user's name at registration
    #[serde(default)]
    pub avatar: String,

    /// Whether the account is active
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Last successful login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime>,

    /// Encrypted Aadhar number (base64 nonce || ciphertext)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aadhar_number: Option<String>,

    /// Encrypted PAN number (base64 nonce || ciphertext)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_number: Option<String>,

    /// 10-digit mobile number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Postal address (max 200 chars)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Currently valid refresh token, rotated on every refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Default avatar URL derived from the user's name initials
pub fn default_avatar(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }
    format!("https://ui-avatars.com/api/?name={encoded}&background=6366f1&color=fff&size=128")
}

impl UserDoc {
    /// Create a new citizen account
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        let avatar = default_avatar(&name);
        Self {
            _id: None,
            metadata: Metadata::new(),
            name,
            email,
            password_hash,
            role: Role::Citizen,
            avatar,
            is_active: true,
            last_login: None,
            aadhar_number: None,
            pan_number: None,
            phone_number: None,
            address: None,
            refresh_token: None,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on email
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            // Index on role for admin listings
            (
                doc! { "role": 1 },
                Some(
                    IndexOptions::builder()
                        .name("role_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!(Role::parse("citizen"), Some(Role::Citizen));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn avatar_defaults_from_name() {
        let url = default_avatar("Asha Rao");
        assert!(url.contains("Asha%20Rao"));
        assert!(url.starts_with("https://ui-avatars.com/api/"));
    }
}
