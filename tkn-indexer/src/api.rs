//! The read-only query API.
//!
//! One POST endpoint at `/` dispatching on an `Action` field, mirroring the
//! node's own action protocol. Lookup failures surface as `{"error": ...}`
//! in the body, never as an HTTP error status; malformed JSON gets an empty
//! object.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use tkn_ledger::BlockHash;
use tkn_protocol::Token;

use crate::manager::ChainManager;

pub fn app_router(manager: Arc<ChainManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(dispatch))
        .layer(cors)
        .with_state(manager)
}

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(rename = "Action", alias = "action")]
    action: String,
    #[serde(rename = "Hash", alias = "hash", default)]
    hash: Option<String>,
    #[serde(rename = "Account", alias = "account", default)]
    account: Option<String>,
}

async fn dispatch(State(manager): State<Arc<ChainManager>>, body: String) -> Json<Value> {
    let Ok(request) = serde_json::from_str::<RpcRequest>(&body) else {
        return Json(json!({}));
    };
    let result = match request.action.as_str() {
        "tokens" => all_tokens(&manager).await,
        "token" => one_token(&manager, &request).await,
        "token_balances" => token_balances(&manager, &request).await,
        "token_balance" => token_balance(&manager, &request).await,
        _ => json!({}),
    };
    Json(result)
}

fn token_object(token: &Token) -> Value {
    json!({
        "Name": token.name(),
        "Supply": token.supply().to_string(),
        "Decimals": token.decimals().to_string(),
    })
}

fn parse_hash(request: &RpcRequest) -> Result<BlockHash, Value> {
    request
        .hash
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| json!({ "error": "Unable to decode hash" }))
}

async fn find_token(manager: &ChainManager, hash: BlockHash) -> Option<Token> {
    for handle in manager.chain_handles().await {
        let chain = handle.read().await;
        if let Ok(token) = chain.token(hash) {
            return Some(token.clone());
        }
    }
    None
}

async fn all_tokens(manager: &ChainManager) -> Value {
    let mut out = serde_json::Map::new();
    for handle in manager.chain_handles().await {
        let chain = handle.read().await;
        for token in chain.tokens().values() {
            out.insert(token.hash().to_string(), token_object(token));
        }
    }
    Value::Object(out)
}

async fn one_token(manager: &ChainManager, request: &RpcRequest) -> Value {
    let hash = match parse_hash(request) {
        Ok(hash) => hash,
        Err(error) => return error,
    };
    match find_token(manager, hash).await {
        Some(token) => token_object(&token),
        None => json!({ "error": "Token not found" }),
    }
}

async fn token_balances(manager: &ChainManager, request: &RpcRequest) -> Value {
    let hash = match parse_hash(request) {
        Ok(hash) => hash,
        Err(error) => return error,
    };
    match find_token(manager, hash).await {
        Some(token) => {
            let mut out = serde_json::Map::new();
            for (account, balance) in token.balances() {
                out.insert(account.to_string(), Value::String(balance.to_string()));
            }
            Value::Object(out)
        }
        None => json!({ "error": "Token not found" }),
    }
}

async fn token_balance(manager: &ChainManager, request: &RpcRequest) -> Value {
    let hash = match parse_hash(request) {
        Ok(hash) => hash,
        Err(error) => return error,
    };
    let Some(token) = find_token(manager, hash).await else {
        return json!({ "error": "Token not found" });
    };
    // an unknown or unparseable account simply holds nothing
    let balance = request
        .account
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map(|account| token.balance(&account))
        .unwrap_or(0);
    json!({ "Balance": balance.to_string() })
}
