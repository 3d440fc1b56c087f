//! SASL authentication for freshly opened connections
//!
//! An [`Authenticator`] runs its mechanism's conversation over the connection
//! before the connection is handed to the pool. Each mechanism is its own
//! type owning its credentials:
//!
//! - [`PlainAuthenticator`]: SASL/PLAIN (RFC 4616), single round trip
//! - [`ScramSha256Authenticator`]: SCRAM-SHA-256 (RFC 5802/7677):
//!   password never sent over the wire, mutual authentication, replay
//!   protection via nonces
//!
//! Wire form: the first auth request body is `mechanism NUL payload`,
//! continuation bodies are the raw payload. Reply bodies start with a status
//! byte (0 done, 1 continue, 2 error) followed by the mechanism payload.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::connection::InternalConnection;
use crate::error::{Error, Result};
use crate::message::{encode_frame, next_request_id};

const SASL_DONE: u8 = 0;
const SASL_CONTINUE: u8 = 1;
const SASL_ERROR: u8 = 2;

/// A SASL mechanism that can authenticate a fresh connection
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Mechanism name as advertised to the server (e.g. "SCRAM-SHA-256")
    fn mechanism(&self) -> &'static str;

    /// Run the mechanism's conversation on the given connection
    async fn authenticate(&self, conn: &mut dyn InternalConnection) -> Result<()>;
}

/// Send one auth frame and return the server's (status, payload)
async fn sasl_round_trip(
    conn: &mut dyn InternalConnection,
    body: Bytes,
) -> Result<(u8, Bytes)> {
    let request_id = next_request_id();
    conn.send_message(&encode_frame(request_id, body)).await?;

    let reply = conn.receive_message().await?;
    if reply.reply_header().response_to != request_id {
        return Err(Error::authentication(format!(
            "server replied to request {} instead of {}",
            reply.reply_header().response_to,
            request_id
        )));
    }

    let body = reply.into_body();
    if body.is_empty() {
        return Err(Error::authentication("empty authentication reply"));
    }
    let status = body[0];
    let payload = body.slice(1..);
    match status {
        SASL_DONE | SASL_CONTINUE => Ok((status, payload)),
        SASL_ERROR => Err(Error::authentication(
            String::from_utf8_lossy(&payload).into_owned(),
        )),
        other => Err(Error::authentication(format!(
            "unknown authentication status {}",
            other
        ))),
    }
}

fn start_body(mechanism: &str, payload: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(mechanism.len() + 1 + payload.len());
    body.put_slice(mechanism.as_bytes());
    body.put_u8(0);
    body.put_slice(payload);
    body.freeze()
}

// ============================================================================
// PLAIN
// ============================================================================

/// SASL/PLAIN authenticator.
///
/// Sends the password in the clear; only appropriate over TLS or a trusted
/// network.
pub struct PlainAuthenticator {
    username: String,
    password: String,
}

impl PlainAuthenticator {
    /// Create a PLAIN authenticator for the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Authenticator for PlainAuthenticator {
    fn mechanism(&self) -> &'static str {
        "PLAIN"
    }

    async fn authenticate(&self, conn: &mut dyn InternalConnection) -> Result<()> {
        let payload = plain_payload(&self.username, &self.password);
        let (status, _) = sasl_round_trip(conn, start_body(self.mechanism(), &payload)).await?;
        if status != SASL_DONE {
            return Err(Error::authentication(
                "server requested continuation of PLAIN exchange",
            ));
        }
        debug!("PLAIN authentication complete for '{}'", self.username);
        Ok(())
    }
}

/// RFC 4616 message: `authzid NUL authcid NUL passwd` with empty authzid
fn plain_payload(username: &str, password: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(username.len() + password.len() + 2);
    payload.push(0);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(password.as_bytes());
    payload
}

// ============================================================================
// SCRAM-SHA-256
// ============================================================================

/// SCRAM-SHA-256 authenticator (RFC 5802/7677).
///
/// The password never crosses the wire and the server proves knowledge of it
/// too (mutual authentication via the server signature).
pub struct ScramSha256Authenticator {
    username: String,
    password: String,
}

impl ScramSha256Authenticator {
    /// Create a SCRAM-SHA-256 authenticator for the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Authenticator for ScramSha256Authenticator {
    fn mechanism(&self) -> &'static str {
        "SCRAM-SHA-256"
    }

    async fn authenticate(&self, conn: &mut dyn InternalConnection) -> Result<()> {
        // Client-first
        let client_nonce = generate_nonce();
        let client_first_bare = format!("n={},r={}", escape_username(&self.username), client_nonce);
        let client_first = format!("n,,{}", client_first_bare);

        debug!("SCRAM: sending client-first");
        let (status, payload) =
            sasl_round_trip(conn, start_body(self.mechanism(), client_first.as_bytes())).await?;
        if status != SASL_CONTINUE {
            return Err(Error::authentication("server skipped SCRAM server-first"));
        }

        // Server-first
        let server_first = String::from_utf8(payload.to_vec())
            .map_err(|_| Error::authentication("invalid server-first encoding"))?;
        let (combined_nonce, salt_b64, iterations) = parse_server_first(&server_first)?;
        if !combined_nonce.starts_with(&client_nonce) {
            return Err(Error::authentication("server nonce mismatch"));
        }
        let salt =
            base64_decode(&salt_b64).map_err(|_| Error::authentication("invalid salt encoding"))?;

        // Client proof
        let salted_password = pbkdf2_sha256(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key).to_vec();

        let client_final_without_proof = format!("c=biws,r={}", combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_without_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof = xor_bytes(&client_key, &client_signature);
        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            base64_encode(&client_proof)
        );

        debug!("SCRAM: sending client-final");
        let (status, payload) = sasl_round_trip(conn, Bytes::from(client_final)).await?;
        if status != SASL_DONE {
            return Err(Error::authentication("server did not complete SCRAM exchange"));
        }

        // Server-final: verify the server signature (mutual authentication)
        let server_final = String::from_utf8(payload.to_vec())
            .map_err(|_| Error::authentication("invalid server-final encoding"))?;
        if let Some(message) = server_final.strip_prefix("e=") {
            return Err(Error::authentication(message.to_string()));
        }
        let verifier = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::authentication("missing server signature"))?;

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let expected = base64_encode(&hmac_sha256(&server_key, auth_message.as_bytes()));
        if verifier != expected {
            return Err(Error::authentication("server signature verification failed"));
        }

        debug!("SCRAM authentication complete for '{}'", self.username);
        Ok(())
    }
}

// ============================================================================
// SCRAM helper functions
// ============================================================================

/// Generate a random nonce for SCRAM authentication
fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let nonce_bytes: Vec<u8> = (0..24).map(|_| rng.gen()).collect();
    base64_encode(&nonce_bytes)
}

/// Escape username for SCRAM (RFC 5802)
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// Parse server-first message: `r=<nonce>,s=<salt>,i=<iterations>`
fn parse_server_first(server_first: &str) -> Result<(String, String, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for attr in server_first.split(',') {
        if let Some(value) = attr.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if let Some(value) = attr.strip_prefix("s=") {
            salt = Some(value.to_string());
        } else if let Some(value) = attr.strip_prefix("i=") {
            iterations = Some(
                value
                    .parse::<u32>()
                    .map_err(|_| Error::authentication("invalid iteration count"))?,
            );
        }
    }

    let nonce = nonce.ok_or_else(|| Error::authentication("missing nonce"))?;
    let salt = salt.ok_or_else(|| Error::authentication("missing salt"))?;
    let iterations = iterations.ok_or_else(|| Error::authentication("missing iterations"))?;

    Ok((nonce, salt, iterations))
}

/// PBKDF2-HMAC-SHA256 key derivation
fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut result = vec![0u8; 32];

    // U1 = PRF(Password, Salt || INT(1))
    let mut u = hmac_sha256(password, &[salt, &1u32.to_be_bytes()].concat());
    result.copy_from_slice(&u);

    // Ui = PRF(Password, Ui-1)
    for _ in 1..iterations {
        u = hmac_sha256(password, &u);
        for (r, ui) in result.iter_mut().zip(u.iter()) {
            *r ^= ui;
        }
    }

    result
}

/// HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// XOR two byte arrays
fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Base64 encode
fn base64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}

/// Base64 decode
fn base64_decode(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanism_names() {
        assert_eq!(PlainAuthenticator::new("u", "p").mechanism(), "PLAIN");
        assert_eq!(
            ScramSha256Authenticator::new("u", "p").mechanism(),
            "SCRAM-SHA-256"
        );
    }

    #[test]
    fn test_plain_payload() {
        assert_eq!(plain_payload("alice", "secret"), b"\0alice\0secret");
    }

    #[test]
    fn test_start_body() {
        let body = start_body("PLAIN", b"\0u\0p");
        assert_eq!(&body[..], b"PLAIN\0\0u\0p");
    }

    #[test]
    fn test_escape_username() {
        assert_eq!(escape_username("alice"), "alice");
        assert_eq!(escape_username("user=name"), "user=3Dname");
        assert_eq!(escape_username("user,name"), "user=2Cname");
    }

    #[test]
    fn test_parse_server_first() {
        let (nonce, salt, iterations) =
            parse_server_first("r=clientnonce+servernonce,s=c2FsdA==,i=4096").unwrap();
        assert_eq!(nonce, "clientnonce+servernonce");
        assert_eq!(salt, "c2FsdA==");
        assert_eq!(iterations, 4096);
    }

    #[test]
    fn test_parse_server_first_missing_attributes() {
        assert!(parse_server_first("s=c2FsdA==,i=4096").is_err());
        assert!(parse_server_first("r=nonce,i=4096").is_err());
        assert!(parse_server_first("r=nonce,s=c2FsdA==").is_err());
    }

    #[test]
    fn test_xor_bytes() {
        assert_eq!(xor_bytes(&[0xFF, 0x00], &[0xFF, 0xFF]), vec![0x00, 0xFF]);
        assert_eq!(xor_bytes(&[0x12, 0x34], &[0x12, 0x34]), vec![0x00, 0x00]);
    }

    #[test]
    fn test_sha256_known_value() {
        let hash = Sha256::digest(b"");
        assert_eq!(
            hex::encode(hash),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_pbkdf2_deterministic() {
        let a = pbkdf2_sha256(b"password", b"salt", 2);
        let b = pbkdf2_sha256(b"password", b"salt", 2);
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, pbkdf2_sha256(b"password", b"salt", 3));
    }

    #[test]
    fn test_generate_nonce() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();
        assert!(!nonce1.is_empty());
        assert_ne!(nonce1, nonce2);
        assert!(base64_decode(&nonce1).is_ok());
    }

    /// The proof sent by the client must verify against the stored key the
    /// way a server would check it: H(proof XOR signature) == stored key.
    #[test]
    fn test_client_proof_verifies() {
        let salted = pbkdf2_sha256(b"hunter2", b"pepper", 16);
        let client_key = hmac_sha256(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key).to_vec();

        let auth_message = b"n=alice,r=abc,r=abcdef,s=cGVwcGVy,i=16,c=biws,r=abcdef";
        let signature = hmac_sha256(&stored_key, auth_message);
        let proof = xor_bytes(&client_key, &signature);

        let recovered_key = xor_bytes(&proof, &signature);
        assert_eq!(recovered_key, client_key);
        assert_eq!(Sha256::digest(&recovered_key).to_vec(), stored_key);
    }
}
