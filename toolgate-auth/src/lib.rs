use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer ";

/// Which configured credential a request presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialClass {
    Standard,
    Admin,
}

impl CredentialClass {
    pub fn is_elevated(&self) -> bool {
        matches!(self, CredentialClass::Admin)
    }

    /// Admin satisfies every standard requirement.
    pub fn satisfies(&self, required: CredentialClass) -> bool {
        match required {
            CredentialClass::Standard => true,
            CredentialClass::Admin => self.is_elevated(),
        }
    }
}

/// Single opaque failure; the gate never says whether the header was malformed or the token wrong.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unauthorized")]
pub struct Unauthorized;

#[derive(Clone, Default)]
pub struct CredentialGate {
    standard: Option<String>,
    admin: Option<String>,
}

impl CredentialGate {
    pub fn new(standard: Option<String>, admin: Option<String>) -> Self {
        Self {
            standard: standard.filter(|t| !t.is_empty()),
            admin: admin.filter(|t| !t.is_empty()),
        }
    }

    /// Checks an `Authorization` header value.
    ///
    /// With no standard token configured every request is rejected.
    pub fn check(&self, authorization: Option<&str>) -> Result<CredentialClass, Unauthorized> {
        let token = authorization
            .and_then(|h| h.strip_prefix(BEARER_PREFIX))
            .filter(|t| !t.is_empty())
            .ok_or(Unauthorized)?;
        if self.standard.is_none() {
            return Err(Unauthorized);
        }
        // Compare against both so timing does not reveal which class matched.
        let is_admin = matches_token(self.admin.as_deref(), token);
        let is_standard = matches_token(self.standard.as_deref(), token);
        if is_admin {
            Ok(CredentialClass::Admin)
        } else if is_standard {
            Ok(CredentialClass::Standard)
        } else {
            Err(Unauthorized)
        }
    }

    pub fn require(
        &self,
        authorization: Option<&str>,
        required: CredentialClass,
    ) -> Result<CredentialClass, Unauthorized> {
        let class = self.check(authorization)?;
        if class.satisfies(required) {
            Ok(class)
        } else {
            Err(Unauthorized)
        }
    }
}

fn matches_token(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) => expected.as_bytes().ct_eq(presented.as_bytes()).into(),
        None => false,
    }
}
