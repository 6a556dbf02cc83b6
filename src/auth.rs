//! Authentication challenge handling: cleartext, MD5 and SCRAM-SHA-256.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2_hmac;
use rand::Rng as _;
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::protocol::message::{Authentication, Password, SaslInitialResponse, SaslResponse};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";
// GS2 header for no channel binding. TLS channel binding is out of scope.
const GS2_HEADER: &str = "n,,";

type HmacSha256 = Hmac<Sha256>;

/// Answers the server's Authentication messages during the handshake.
/// One per connection attempt.
pub(crate) struct Authenticator {
    user: String,
    password: Option<String>,
    scram: Option<ScramClient>,
}

impl Authenticator {
    pub(crate) fn new(user: &str, password: Option<&str>) -> Self {
        Self {
            user: user.to_string(),
            password: password.map(str::to_string),
            scram: None,
        }
    }

    /// Produce the frontend messages answering one challenge. An empty
    /// vec means the challenge needs no reply (AuthenticationOk, SASL
    /// final verification).
    pub(crate) fn respond(&mut self, auth: Authentication) -> Result<Vec<Message>> {
        match auth {
            Authentication::Ok => Ok(vec![]),
            Authentication::CleartextPassword => {
                let password = self.password()?.to_string();
                Ok(vec![Message::Password(Password { password })])
            }
            Authentication::Md5Password { salt } => {
                let password = md5_password(&self.user, self.password()?, &salt);
                Ok(vec![Message::Password(Password { password })])
            }
            Authentication::Sasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(Error::Unsupported(format!(
                        "no supported SASL mechanism among {mechanisms:?}"
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                let first = scram.client_first_message();
                self.scram = Some(scram);
                Ok(vec![Message::SaslInitialResponse(SaslInitialResponse {
                    mechanism: SCRAM_SHA_256.to_string(),
                    data: first.into_bytes(),
                })])
            }
            Authentication::SaslContinue { data } => {
                let final_message = self.scram_mut()?.process_server_first(sasl_text(&data)?)?;
                Ok(vec![Message::SaslResponse(SaslResponse {
                    data: final_message.into_bytes(),
                })])
            }
            Authentication::SaslFinal { data } => {
                self.scram_mut()?.verify_server_final(sasl_text(&data)?)?;
                Ok(vec![])
            }
            Authentication::Other(code) => Err(Error::Unsupported(format!(
                "authentication method {code}"
            ))),
        }
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Auth("server requested a password but none was given".into()))
    }

    fn scram_mut(&mut self) -> Result<&mut ScramClient> {
        self.scram
            .as_mut()
            .ok_or_else(|| Error::Protocol("SASL challenge outside a SASL exchange".into()))
    }
}

fn sasl_text(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|e| Error::Auth(format!("non-UTF8 SASL message: {e}")))
}

/// MD5 password digest: `"md5" + md5(md5(password + user) + salt)`, all
/// hex lowercase.
pub(crate) fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = Md5::new_with_prefix(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new_with_prefix(format!("{inner:x}").as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{outer:x}")
}

/// Client side of one SCRAM-SHA-256 exchange (RFC 5802/7677).
///
/// PostgreSQL ignores the `n=` username attribute (the startup message
/// already named the user), so the client-first message carries it empty.
struct ScramClient {
    password: String,
    nonce: String,
    first_bare: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    fn new(password: &str) -> Self {
        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, &BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            nonce: nonce.to_string(),
            first_bare: format!("n=,r={nonce}"),
            auth_message: None,
            salted_password: None,
        }
    }

    fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.first_bare)
    }

    /// Consume `r=...,s=...,i=...` and produce the client-final message
    /// with the proof attached.
    fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let combined_nonce = attribute(server_first, "r=")
            .ok_or_else(|| Error::Auth("server-first message lacks nonce".into()))?;
        let salt_b64 = attribute(server_first, "s=")
            .ok_or_else(|| Error::Auth("server-first message lacks salt".into()))?;
        let iterations: u32 = attribute(server_first, "i=")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| Error::Auth("server-first message lacks iteration count".into()))?;

        if !combined_nonce.starts_with(&self.nonce) {
            return Err(Error::Auth(
                "server nonce does not extend the client nonce".into(),
            ));
        }
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| Error::Auth(format!("invalid SCRAM salt: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c={},r={combined_nonce}", BASE64.encode(GS2_HEADER));
        let auth_message = format!("{},{server_first},{without_proof}", self.first_bare);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        let mut proof = client_key;
        for (byte, signature) in proof.iter_mut().zip(client_signature) {
            *byte ^= signature;
        }

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check the `v=...` server signature against the derived server key.
    fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let signature_b64 = attribute(server_final, "v=")
            .ok_or_else(|| Error::Auth("server-final message lacks signature".into()))?;
        let signature = BASE64
            .decode(signature_b64)
            .map_err(|e| Error::Auth(format!("invalid server signature: {e}")))?;

        let salted_password = self
            .salted_password
            .ok_or_else(|| Error::Protocol("SASL final before server-first".into()))?;
        let auth_message = self
            .auth_message
            .as_ref()
            .ok_or_else(|| Error::Protocol("SASL final before server-first".into()))?;

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;
        if signature != expected {
            return Err(Error::Auth("server signature verification failed".into()));
        }
        Ok(())
    }
}

fn attribute<'a>(message: &'a str, key: &str) -> Option<&'a str> {
    message.split(',').find_map(|part| part.strip_prefix(key))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::Auth("invalid HMAC key length".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}
