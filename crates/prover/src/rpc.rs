//! The `rpc` module contains the [RpcClient], a minimal numbered-id JSON-RPC client over HTTP.

use crate::ProverError;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// The JSON-RPC protocol version sent in every request.
const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// The [RpcClient] posts JSON-RPC envelopes to a single endpoint. Every request is bounded by the
/// network timeout given at construction.
#[derive(Debug)]
pub struct RpcClient {
    url: Url,
    http: Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Creates a new [RpcClient] for the given endpoint.
    ///
    /// ### Takes
    /// - `url`: The HTTP endpoint of the backend.
    /// - `timeout`: The per-request network timeout.
    pub fn try_new(url: &str, timeout: Duration) -> Result<Self, ProverError> {
        let url = Url::parse(url).map_err(|e| ProverError::InvalidUrl(format!("{url}: {e}")))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            http,
            next_id: AtomicU64::new(0),
        })
    }

    /// Returns the endpoint this client talks to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends `method` with positional `params` and decodes the result into `T`.
    ///
    /// An error envelope is returned as [ProverError::Rpc] whatever the HTTP status. A non-2xx
    /// reply without an envelope is a [ProverError::Transport] error. Nothing is retried here.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ProverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method,
            params: &params,
            id,
        };

        tracing::trace!(target: "prover", "Sending `{}` (id {}) to {}", method, id, self.url);
        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;
        let status_error = response.error_for_status_ref().err();
        let body = response.bytes().await?;

        // Backends answer errors with a non-2xx status; the envelope still carries the cause.
        match (decode_response(&body, id), status_error) {
            (Err(ProverError::Decode(_) | ProverError::MissingResult), Some(e)) => Err(e.into()),
            (result, _) => result,
        }
    }
}

/// Decodes a raw JSON-RPC response body.
///
/// ### Takes
/// - `body`: The raw response body.
/// - `id`: The id of the request the body answers.
///
/// ### Returns
/// - `Ok(T)`: The decoded `result` field.
/// - `Err(ProverError)`: The body was not an envelope, carried an error, or the result did not
///   decode into `T`.
pub fn decode_response<T: DeserializeOwned>(body: &[u8], id: u64) -> Result<T, ProverError> {
    let response: RpcResponse = serde_json::from_slice(body)?;

    if let Some(err) = response.error {
        return Err(ProverError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    if response.id.is_some_and(|got| got != id) {
        tracing::warn!(target: "prover", "Response id {:?} does not match request id {}", response.id, id);
    }

    let result = response.result.ok_or(ProverError::MissingResult)?;
    Ok(serde_json::from_value(result)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{ok, StubBackend};

    #[test]
    fn request_envelope_shape() {
        let params = vec![Value::from("0xabc"), Value::from("0xdef")];
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method: "getProof",
            params: &params,
            id: 7,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": "getProof",
                "params": ["0xabc", "0xdef"],
                "id": 7
            })
        );
    }

    #[test]
    fn decodes_result() {
        let body = br#"{"jsonrpc":"2.0","result":"Processing","id":0}"#;
        let result: String = decode_response(body, 0).unwrap();
        assert_eq!(result, "Processing");
    }

    #[test]
    fn error_envelope_is_a_hard_failure() {
        let body = br#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"busy","data":{"retry":true}},"id":0}"#;
        match decode_response::<String>(body, 0) {
            Err(ProverError::Rpc {
                code,
                message,
                data,
            }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "busy");
                assert_eq!(data, Some(serde_json::json!({"retry": true})));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn wrong_shapes_fail_to_decode() {
        assert!(matches!(
            decode_response::<String>(br#"{"jsonrpc":"2.0","id":0}"#, 0),
            Err(ProverError::MissingResult)
        ));
        assert!(matches!(
            decode_response::<u64>(br#"{"jsonrpc":"2.0","result":"x","id":0}"#, 0),
            Err(ProverError::Decode(_))
        ));
        assert!(matches!(
            decode_response::<u64>(b"not json", 0),
            Err(ProverError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn call_decodes_result_over_http() {
        let backend = StubBackend::spawn(|_, params| ok(params[0].clone())).await;
        let client = RpcClient::try_new(&backend.url, Duration::from_secs(5)).unwrap();

        let first: String = client.call("echo", vec![Value::from("a")]).await.unwrap();
        let second: String = client.call("echo", vec![Value::from("b")]).await.unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
        assert_eq!(backend.calls(), vec!["echo", "echo"]);
    }

    #[tokio::test]
    async fn error_status_keeps_the_envelope_cause() {
        let backend = StubBackend::spawn(|_, _| {
            (
                500,
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": { "code": -32000, "message": "prover busy" },
                }),
            )
        })
        .await;
        let client = RpcClient::try_new(&backend.url, Duration::from_secs(5)).unwrap();

        match client.call::<String>("getProof", vec![]).await {
            Err(ProverError::Rpc { code, message, .. }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "prover busy");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_status_without_envelope_is_a_transport_error() {
        let backend = StubBackend::spawn(|_, _| (502, Value::from("bad gateway"))).await;
        let client = RpcClient::try_new(&backend.url, Duration::from_secs(5)).unwrap();

        match client.call::<String>("getProof", vec![]).await {
            Err(ProverError::Transport(e)) => {
                assert_eq!(e.status().map(|s| s.as_u16()), Some(502));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
