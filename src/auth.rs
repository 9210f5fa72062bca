/// Dashboard login and role-based access
///
/// Logins come from AUTH_USERS ("login:password:role,..."). A password may be
/// given as `sha256:<hex digest>` so plain text never has to sit in `.env`.
/// Admins see every data user; plain users only see the data user whose
/// `user_id` equals their login.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::users::UserProfile;

/// Access level of a dashboard login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(anyhow!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
struct Login {
    username: String,
    password_digest: [u8; 32],
    role: Role,
}

/// Configured dashboard logins
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    logins: Vec<Login>,
}

impl Authenticator {
    /// Parses "login:password:role" entries separated by commas (role is required)
    pub fn parse(raw: &str) -> Result<Self> {
        let mut logins = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            // The password sits between the first and last colon; it may contain
            // colons itself ("sha256:...").
            let (username, rest) = entry
                .split_once(':')
                .ok_or_else(|| anyhow!("Malformed AUTH_USERS entry '{}'", entry))?;
            let (password, role) = rest
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("AUTH_USERS entry for '{}' needs a role", username))?;
            let (username, password) = (username.trim(), password.trim());

            if username.is_empty() || password.is_empty() {
                return Err(anyhow!("Malformed AUTH_USERS entry for '{}'", username));
            }

            let password_digest = match password.strip_prefix("sha256:") {
                Some(hex_digest) => {
                    let bytes = hex::decode(hex_digest)
                        .with_context(|| format!("Invalid sha256 digest for '{}'", username))?;
                    bytes
                        .try_into()
                        .map_err(|_| anyhow!("sha256 digest for '{}' must be 32 bytes", username))?
                }
                None => digest(password),
            };

            logins.push(Login {
                username: username.to_string(),
                password_digest,
                role: role.parse()?,
            });
        }

        Ok(Self { logins })
    }

    /// Number of configured logins
    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    /// Returns the role for valid credentials, None otherwise
    pub fn check_login(&self, username: &str, password: &str) -> Option<Role> {
        let candidate = digest(password);
        self.logins
            .iter()
            .find(|l| l.username == username)
            .filter(|l| digests_equal(&l.password_digest, &candidate))
            .map(|l| l.role)
    }

    /// Checks an HTTP `Authorization: Basic ...` header value
    pub fn check_basic_header(&self, header: &str) -> Option<(String, Role)> {
        let (username, password) = parse_basic_auth(header)?;
        let role = self.check_login(&username, &password)?;
        Some((username, role))
    }
}

/// True if `login` with `role` may view the data of `profile`
pub fn can_view(role: Role, login: &str, profile: &UserProfile) -> bool {
    match role {
        Role::Admin => true,
        Role::User => profile.user_id == login,
    }
}

/// Decodes a Basic auth header into (username, password)
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
