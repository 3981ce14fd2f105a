// `global.*` methods: login handshake, keepalive, logout, device clock.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Error;
use crate::rpc::RpcGen;
use crate::rpc::auth::AuthParams;
use crate::rpc::envelope::{RequestBuilder, Response};

const CLIENT_TYPE: &str = "Web3.0";

/// First `global.login` with an empty password. Sent unchecked: the
/// challenge arrives as an error.
pub async fn first_login(rb: RequestBuilder, username: &str) -> Result<Response<AuthParams>, Error> {
    rb.method("global.login")
        .params(json!({
            "userName": username,
            "password": "",
            "loginType": "Direct",
            "clientType": CLIENT_TYPE,
        }))
        .send()
        .await
}

/// Second `global.login` carrying the hashed password.
pub async fn second_login(
    rb: RequestBuilder,
    username: &str,
    password_hash: &str,
    login_type: &str,
    authority_type: &str,
) -> Result<(), Error> {
    rb.method("global.login")
        .params(json!({
            "userName": username,
            "password": password_hash,
            "loginType": login_type,
            "clientType": CLIENT_TYPE,
            "authorityType": authority_type,
        }))
        .send::<Value>()
        .await?
        .check()?;
    Ok(())
}

#[derive(Deserialize)]
struct KeepAliveParams {
    #[serde(default)]
    timeout: i64,
}

/// Extend the session. Returns the device's session timeout in seconds.
pub async fn keep_alive(rb: RequestBuilder) -> Result<i64, Error> {
    let params: Option<KeepAliveParams> = rb
        .method("global.keepAlive")
        .send_checked()
        .await?;
    Ok(params.map_or(0, |p| p.timeout))
}

pub async fn logout(rb: RequestBuilder) -> Result<bool, Error> {
    let res = rb.method("global.logout").send::<Value>().await?.check()?;
    Ok(res.result.as_bool())
}

#[derive(Deserialize)]
struct CurrentTime {
    time: String,
}

/// Device wall clock as a local `YYYY-MM-DD HH:MM:SS` string.
pub async fn current_time(rpc: &impl RpcGen) -> Result<String, Error> {
    let params: CurrentTime = rpc
        .rpc()
        .await?
        .method("global.getCurrentTime")
        .send_checked()
        .await?;
    Ok(params.time)
}
