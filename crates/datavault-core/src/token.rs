//! LUKS header token carrying the operator's public key.
//!
//! The token is metadata only: it claims no keyslots, so it never
//! participates in unlocking. `cryptsetup token import` receives the
//! serialized form verbatim on its input stream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token slot id used for the operator key on every managed volume.
pub const OPERATOR_TOKEN_ID: u32 = 1;

/// `user`-typed LUKS2 token embedding the key text under `user_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "type")]
    pub kind: String,
    pub keyslots: Vec<String>,
    pub user_data: BTreeMap<String, String>,
}

impl Token {
    /// Build the operator-key token from the key file's contents.
    pub fn operator_key(key_text: &str) -> Self {
        let mut user_data = BTreeMap::new();
        user_data.insert("metadata".to_string(), key_text.to_string());
        Self {
            kind: "user".to_string(),
            keyslots: Vec::new(),
            user_data,
        }
    }

    /// The embedded key text, when present.
    pub fn metadata(&self) -> Option<&str> {
        self.user_data.get("metadata").map(String::as_str)
    }
}
