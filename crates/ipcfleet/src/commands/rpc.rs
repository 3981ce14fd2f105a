//! `ipcfleet rpc`: send a raw authenticated RPC call.

use serde::Serialize;
use serde_json::Value;

use ipcfleet_api::RpcGen;

use crate::cli::{GlobalOpts, RpcArgs};
use crate::commands::Context;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct RpcOutput {
    method: String,
    result: i64,
    params: Value,
}

fn parse_params(raw: Option<&str>) -> Result<Value, CliError> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Value::Null),
    }
}

pub async fn handle(ctx: &Context, args: RpcArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let params = parse_params(args.params.as_deref())?;
    let client = ctx.client(&args.device).await?;

    let mut builder = RpcGen::rpc(client.rpc())
        .await
        .map_err(|e| CliError::device(&args.device, e))?
        .method(&args.method)
        .params(params);
    if let Some(object) = args.object {
        builder = builder.object(object);
    }

    let response = builder.send::<Value>().await?.check()?;
    let out = RpcOutput {
        method: args.method,
        result: response.result.value(),
        params: response.params.unwrap_or(Value::Null),
    };

    let rendered = output::render_single(
        &global.format,
        &out,
        |o| {
            let params = serde_json::to_string_pretty(&o.params).unwrap_or_default();
            output::detail(&[("Method", o.method.clone()), ("Result", o.result.to_string()), ("Params", params)])
        },
        |o| o.result.to_string(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
