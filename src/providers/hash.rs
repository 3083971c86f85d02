use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::Error as Argon2Error;
use argon2::password_hash::PasswordHash;
use argon2::password_hash::PasswordHasher;
use argon2::password_hash::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::Argon2;
use thiserror::Error;

pub struct HashImpl;

// needed because argon2::password_hash::Error doesn't implement std::error::Error
#[derive(Error, Debug)]
pub enum HashImplError {
    #[error("argon2 error: {}", .0.to_string())]
    Argon2Error(Argon2Error),
    #[error("no password hash stored")]
    MissingHash,
}

impl From<Argon2Error> for HashImplError {
    fn from(err: Argon2Error) -> Self {
        Self::Argon2Error(err)
    }
}

// Verified against when the username is unknown, so a miss costs the same
// as a wrong password.
const DECOY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$1GSZQW1tbJqM2Aa8h9oTsWcKMv4Vn2Jc1zHbQX1wTfQ";

impl HashImpl {
    pub fn hash(password: &str) -> Result<String, HashImplError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    pub fn verify(password: &str, hash: Option<&str>) -> Result<(), HashImplError> {
        let Some(hash) = hash else {
            let _ = Self::verify_against(password, DECOY_HASH);
            return Err(HashImplError::MissingHash);
        };

        Self::verify_against(password, hash)
    }

    fn verify_against(password: &str, hash: &str) -> Result<(), HashImplError> {
        let parsed_hash = PasswordHash::new(hash)?;
        Argon2::default().verify_password(password.as_bytes(), &parsed_hash)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies() {
        let hash = HashImpl::hash("hunter2").unwrap();
        assert!(HashImpl::verify("hunter2", Some(&hash)).is_ok());
        assert!(HashImpl::verify("hunter3", Some(&hash)).is_err());
    }

    #[test]
    fn missing_hash_never_verifies() {
        assert!(matches!(
            HashImpl::verify("anything", None),
            Err(HashImplError::MissingHash)
        ));
    }

    #[test]
    fn garbage_hash_is_an_error_not_a_panic() {
        assert!(HashImpl::verify("x", Some("not-a-phc-string")).is_err());
    }
}
