// Two-step challenge-response login.
//
// The first `global.login` is expected to fail with a challenge carrying the
// hashing parameters and a provisional session. The second carries the
// hashed password on that session.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::rpc::conn::{Connection, RpcEndpoint};
use crate::rpc::envelope::ResponseError;
use crate::rpc::global;

/// Error codes a device uses to issue the login challenge.
const CHALLENGE_CODES: [i64; 2] = [268_632_079, 401];

const WATCHNET: &str = "WatchNet";

// ── AuthParams ──────────────────────────────────────────────────────

/// Hashing parameters from the first-login challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthParams {
    #[serde(default)]
    pub encryption: String,
    #[serde(default)]
    pub random: String,
    #[serde(default)]
    pub realm: String,
}

impl AuthParams {
    /// Hash the password the way the device expects for `encryption`.
    ///
    /// Unknown schemes fall back to sending the password as-is, which some
    /// legacy firmware requires.
    pub fn hash_password(&self, username: &str, password: &str) -> String {
        match self.encryption.as_str() {
            "Basic" => STANDARD.encode(format!("{username}:{password}")),
            "Default" => {
                let inner = md5_upper_hex(&format!("{username}:{}:{password}", self.realm));
                md5_upper_hex(&format!("{username}:{}:{inner}", self.random))
            }
            _ => password.to_owned(),
        }
    }

    pub fn login_type(&self) -> &'static str {
        if self.encryption == WATCHNET {
            WATCHNET
        } else {
            "Direct"
        }
    }
}

fn md5_upper_hex(input: &str) -> String {
    format!("{:X}", Md5::digest(input.as_bytes()))
}

// ── Login failures ──────────────────────────────────────────────────

/// Credential or account level reasons a device rejects a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LoginFailure {
    #[strum(to_string = "user or password not valid")]
    UserOrPasswordNotValid,
    #[strum(to_string = "user not valid")]
    UserNotValid,
    #[strum(to_string = "password not valid")]
    PasswordNotValid,
    #[strum(to_string = "user in blacklist")]
    InBlackList,
    #[strum(to_string = "user has been used")]
    HasBeenUsed,
    #[strum(to_string = "user locked")]
    HasBeenLocked,
}

/// Map a second-login error onto a known rejection reason.
///
/// Returns `None` for anything outside the fixed table; those propagate as
/// ordinary protocol errors and leave the connection eligible for retry.
pub fn classify_login_error(err: &ResponseError) -> Option<LoginFailure> {
    match err.code {
        268_632_085 => return Some(LoginFailure::UserOrPasswordNotValid),
        268_632_081 => return Some(LoginFailure::HasBeenLocked),
        _ => {}
    }

    // Message spellings are the firmware's, typos included.
    match err.message.as_str() {
        "UserNotValidt" => Some(LoginFailure::UserNotValid),
        "PasswordNotValid" => Some(LoginFailure::PasswordNotValid),
        "InBlackList" => Some(LoginFailure::InBlackList),
        "HasBeedUsed" => Some(LoginFailure::HasBeenUsed),
        "HasBeenLocked" => Some(LoginFailure::HasBeenLocked),
        _ => None,
    }
}

// ── Login ───────────────────────────────────────────────────────────

/// Run the handshake and apply the resulting state transition.
///
/// Success moves the connection to `LoggedIn`. A classified rejection moves
/// it to `Error`. Anything else moves it back to `LoggedOut`.
pub async fn login(
    endpoint: &RpcEndpoint,
    conn: &mut Connection,
    username: &str,
    password: &SecretString,
) -> Result<(), Error> {
    match handshake(endpoint, conn, username, password).await {
        Ok(()) => {
            conn.set_logged_in();
            info!(url = %endpoint.rpc_url(), username, "logged in");
            Ok(())
        }
        Err(Error::Login { reason, source }) => {
            warn!(url = %endpoint.rpc_url(), username, %reason, "login rejected");
            conn.set_error(reason, source.clone());
            Err(Error::Login { reason, source })
        }
        Err(e) => {
            debug!(url = %endpoint.rpc_url(), error = %e, "login failed");
            conn.set_logged_out();
            Err(e)
        }
    }
}

async fn handshake(
    endpoint: &RpcEndpoint,
    conn: &mut Connection,
    username: &str,
    password: &SecretString,
) -> Result<(), Error> {
    let first = global::first_login(endpoint.login_rpc(conn), username).await?;

    match &first.error {
        Some(err) if CHALLENGE_CODES.contains(&err.code) => {}
        Some(err) => {
            return Err(Error::ProtocolViolation(format!(
                "first login returned unexpected code {}: {}",
                err.code, err.message
            )));
        }
        None => {
            return Err(Error::ProtocolViolation(
                "first login did not return a challenge".into(),
            ));
        }
    }

    // A bare challenge means plaintext on the second login.
    let params = first.params.unwrap_or_default();
    conn.set_session(first.session.into_string());
    debug!(encryption = %params.encryption, "received login challenge");

    let hash = params.hash_password(username, password.expose_secret());
    let second = global::second_login(
        endpoint.login_rpc(conn),
        username,
        &hash,
        params.login_type(),
        &params.encryption,
    )
    .await;

    match second {
        Err(Error::Rpc(err) | Error::SessionInvalid(err)) => match classify_login_error(&err) {
            Some(reason) => Err(Error::Login { reason, source: err }),
            None => Err(err.into()),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn params(encryption: &str) -> AuthParams {
        AuthParams {
            encryption: encryption.into(),
            random: "1172275829".into(),
            realm: "Login to a0c50bcd05b2f03d067e530d9bf069af".into(),
        }
    }

    #[test]
    fn default_hash_matches_known_vector() {
        let hash = params("Default").hash_password("admin", "123");
        assert_eq!(hash, "2E9AD6D2DB08E0882F376A622BC76B9A");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn basic_hash_is_base64_of_credentials() {
        assert_eq!(params("Basic").hash_password("admin", "123"), "YWRtaW46MTIz");
    }

    #[test]
    fn unknown_or_unset_scheme_returns_plaintext() {
        assert_eq!(params("").hash_password("admin", "hunter2"), "hunter2");
        assert_eq!(params("WatchNet").hash_password("admin", "hunter2"), "hunter2");
    }

    #[test]
    fn login_type_follows_encryption() {
        assert_eq!(params("WatchNet").login_type(), "WatchNet");
        assert_eq!(params("Default").login_type(), "Direct");
    }

    #[test]
    fn classifies_by_code_then_message() {
        let by_code = ResponseError::new("global.login", 268_632_085, "whatever");
        assert_eq!(
            classify_login_error(&by_code),
            Some(LoginFailure::UserOrPasswordNotValid)
        );

        let locked = ResponseError::new("global.login", 268_632_081, "");
        assert_eq!(classify_login_error(&locked), Some(LoginFailure::HasBeenLocked));

        let cases = [
            ("UserNotValidt", LoginFailure::UserNotValid),
            ("PasswordNotValid", LoginFailure::PasswordNotValid),
            ("InBlackList", LoginFailure::InBlackList),
            ("HasBeedUsed", LoginFailure::HasBeenUsed),
            ("HasBeenLocked", LoginFailure::HasBeenLocked),
        ];
        for (message, expected) in cases {
            let err = ResponseError::new("global.login", 1, message);
            assert_eq!(classify_login_error(&err), Some(expected), "{message}");
        }
    }

    #[test]
    fn unknown_login_errors_are_not_classified() {
        let err = ResponseError::new("global.login", 268_632_070, "Something else");
        assert_eq!(classify_login_error(&err), None);
    }
}
