//! Token issuance and credential checks shared by both transports.

use anyhow::Result;
use courier_db::Database;
use courier_db::models::UserRow;
use courier_types::ProtocolError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Issue a fresh opaque auth token: 128 bits of OS randomness digested with
/// SHA-256 into a hex string. Issued once at registration and reused across
/// logins.
pub fn generate_token() -> String {
    let random_bytes: [u8; 16] = rand::random();
    hex::encode(Sha256::digest(random_bytes))
}

/// Create a user with a freshly generated token. Outer error is a store
/// fault; inner is the protocol reply.
pub fn register_user(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Result<String, ProtocolError>> {
    if db.get_user_by_username(username)?.is_some() {
        return Ok(Err(ProtocolError::UserExists));
    }

    let id = Uuid::new_v4().to_string();
    let token = generate_token();
    db.create_user(&id, username, password, &token)?;
    Ok(Ok(token))
}

/// Resolve a username/password pair to its user record.
pub fn validate_credentials(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Result<UserRow, ProtocolError>> {
    let Some(user) = db.get_user_by_username(username)? else {
        return Ok(Err(ProtocolError::UserNotFound));
    };
    if user.password != password {
        return Ok(Err(ProtocolError::IncorrectPassword));
    }
    Ok(Ok(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_hex_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn register_rejects_taken_username() {
        let db = Database::open_in_memory().unwrap();
        let token = register_user(&db, "alice", "pw").unwrap().unwrap();
        assert_eq!(
            db.get_user_by_token(&token).unwrap().unwrap().username,
            "alice"
        );

        assert_eq!(
            register_user(&db, "alice", "other").unwrap(),
            Err(ProtocolError::UserExists)
        );
    }

    #[test]
    fn credential_validation() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, "alice", "pw").unwrap().unwrap();

        assert!(validate_credentials(&db, "alice", "pw").unwrap().is_ok());
        assert_eq!(
            validate_credentials(&db, "alice", "wrong")
                .unwrap()
                .unwrap_err(),
            ProtocolError::IncorrectPassword
        );
        assert_eq!(
            validate_credentials(&db, "bob", "pw").unwrap().unwrap_err(),
            ProtocolError::UserNotFound
        );
    }
}
