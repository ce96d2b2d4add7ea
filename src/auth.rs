//! MySQL client authentication.
//!
//! Supports `mysql_native_password` (SHA1-based challenge-response) and
//! `caching_sha2_password`'s fast-path scramble, which is the default
//! authentication plugin on MySQL 8+.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const FOUND_ROWS: u32 = 2;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const NO_SCHEMA: u32 = 16;
    pub const COMPRESS: u32 = 32;
    pub const ODBC: u32 = 64;
    pub const LOCAL_FILES: u32 = 128;
    pub const IGNORE_SPACE: u32 = 256;
    pub const PROTOCOL_41: u32 = 512;
    pub const INTERACTIVE: u32 = 1024;
    pub const SSL: u32 = 2048;
    pub const IGNORE_SIGPIPE: u32 = 4096;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
    pub const CONNECT_ATTRS: u32 = 1 << 20;
}

pub const NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// `XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))`.
pub fn create_native_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    let mut result = Vec::with_capacity(20);
    for i in 0..20 {
        result.push(stage1[i] ^ stage3[i]);
    }

    result
}

/// `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + scramble))`,
/// used by `caching_sha2_password` when the server has the password
/// cached (fast auth path, no RSA key exchange needed).
pub fn create_caching_sha2_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha256(password.as_bytes());
    let stage2 = sha256(&stage1);

    let mut combined = stage2;
    combined.extend_from_slice(scramble);
    let stage3 = sha256(&combined);

    let mut result = Vec::with_capacity(32);
    for i in 0..32 {
        result.push(stage1[i] ^ stage3[i]);
    }

    result
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Builds an auth response for whichever plugin the server named in its
/// handshake, falling back to native password for an unrecognized or
/// empty plugin name.
pub fn create_auth_response(plugin: &str, password: &str, scramble: &[u8]) -> Vec<u8> {
    match plugin {
        CACHING_SHA2_PASSWORD => create_caching_sha2_auth_response(password, scramble),
        _ => create_native_auth_response(password, scramble),
    }
}

/// Builds the client's handshake response packet (protocol 41).
pub fn create_handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
    auth_plugin: &str,
) -> Result<Vec<u8>, std::io::Error> {
    let mut buffer = Vec::new();

    let mut capabilities = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;

    if database.is_some() {
        capabilities |= capabilities::CONNECT_WITH_DB;
    }

    buffer.write_u32::<LittleEndian>(capabilities)?;
    buffer.write_u32::<LittleEndian>(0)?; // max packet size, 0 = default
    buffer.write_u8(collation)?;
    buffer.write_all(&[0u8; 23])?; // reserved

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let plugin = if auth_plugin.is_empty() { NATIVE_PASSWORD } else { auth_plugin };
    let auth_response = create_auth_response(plugin, password, scramble);
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(plugin.as_bytes())?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_yields_empty_response() {
        assert!(create_native_auth_response("", &[1, 2, 3, 4]).is_empty());
        assert!(create_caching_sha2_auth_response("", &[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn native_auth_response_is_20_bytes() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let response = create_native_auth_response("password", &scramble);
        assert_eq!(response.len(), 20);
    }

    #[test]
    fn caching_sha2_response_is_32_bytes() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let response = create_caching_sha2_auth_response("password", &scramble);
        assert_eq!(response.len(), 32);
    }

    #[test]
    fn dispatches_by_plugin_name() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        assert_eq!(
            create_auth_response(CACHING_SHA2_PASSWORD, "password", &scramble).len(),
            32
        );
        assert_eq!(create_auth_response(NATIVE_PASSWORD, "password", &scramble).len(), 20);
        assert_eq!(create_auth_response("unknown", "password", &scramble).len(), 20);
    }

    #[test]
    fn handshake_response_has_reasonable_size() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let packet = create_handshake_response(
            "root",
            "password",
            Some("testdb"),
            &scramble,
            33,
            NATIVE_PASSWORD,
        )
        .unwrap();

        assert!(packet.len() > 50);
    }
}
