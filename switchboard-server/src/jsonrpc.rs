//! The JSON-RPC message layer.
//!
//! Requests and responses follow the JSON-RPC 1.0 shape the wire protocol
//! uses: a request is `{ "method", "params", "id" }` and a response is
//! `{ "result", "error", "id" }`. The dispatcher is transport-agnostic;
//! the binary feeds it newline-delimited JSON from a TCP stream.

use serde::{Deserialize, Serialize};
use serde_json::json;

use switchboard::Operation;

use crate::Server;

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The request identifier, echoed in the response. `null` marks a
    /// notification.
    #[serde(default)]
    pub id: serde_json::Value,
    /// The method name.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The identifier of the request this answers.
    pub id: serde_json::Value,
    /// The method result; `null` on failure.
    pub result: serde_json::Value,
    /// The failure description; `null` on success.
    pub error: serde_json::Value,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn result(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { id, result, error: serde_json::Value::Null }
    }

    /// A failed response.
    #[must_use]
    pub fn error(id: serde_json::Value, message: impl Into<String>) -> Self {
        Self { id, result: serde_json::Value::Null, error: json!(message.into()) }
    }
}

/// Dispatch one request against the server.
///
/// Supported methods: `transact`, `list_dbs`, `get_schema`, and `echo`.
#[must_use]
pub fn dispatch(server: &Server, request: &Request) -> Response {
    let id = request.id.clone();
    match request.method.as_str() {
        "echo" => Response::result(id, json!(request.params)),
        "list_dbs" => Response::result(id, json!(server.databases())),
        "get_schema" => {
            let Some(db) = request.params.first().and_then(serde_json::Value::as_str) else {
                return Response::error(id, "get_schema expects a database name");
            };
            match server.schema_document(db) {
                Some(document) => Response::result(id, document),
                None => Response::error(id, format!("unknown database {db:?}")),
            }
        }
        "transact" => {
            let Some((db, raw_ops)) = request.params.split_first() else {
                return Response::error(id, "transact expects a database name and operations");
            };
            let Some(db) = db.as_str() else {
                return Response::error(id, "transact expects a database name and operations");
            };
            let mut operations = Vec::with_capacity(raw_ops.len());
            for raw in raw_ops {
                match serde_json::from_value::<Operation>(raw.clone()) {
                    Ok(op) => operations.push(op),
                    Err(error) => {
                        return Response::error(id, format!("malformed operation: {error}"));
                    }
                }
            }
            let results = server.transact(db, &operations);
            Response::result(id, json!(results))
        }
        other => Response::error(id, format!("unknown method {other:?}")),
    }
}
