//! Wire envelopes.
//!
//! ```text
//! {"rpc":      {"name": "add_plants", "args": [...], "silent": false}}
//! {"rpc_resp": {"name": "add_plants", "result": ...}}
//! {"rpc_resp": {"name": "add_plants", "error": {"kind": ..., "detail": ...}}}
//! ```

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    Rpc(Request),
    RpcResp(Response),
}

impl Envelope {
    pub fn encode(&self) -> Result<String, RpcError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, RpcError> {
        Ok(serde_json::from_str(frame)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(name: impl Into<String>, result: Value) -> Self {
        Self {
            name: name.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: RpcError) -> Self {
        Self {
            name: name.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn from_outcome(name: impl Into<String>, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(name, result),
            Err(error) => Self::failed(name, error),
        }
    }

    /// A missing result decodes as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let envelope = Envelope::Rpc(Request {
            name: "has_plant".into(),
            args: vec![json!(1), json!(2)],
            silent: false,
        });

        let frame: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"rpc": {"name": "has_plant", "args": [1, 2], "silent": false}})
        );
    }

    #[test]
    fn test_error_response_wire_shape() {
        let envelope = Envelope::RpcResp(Response::failed(
            "remove_plant",
            RpcError::NotRegistered("remove_plant".into()),
        ));

        let frame: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"rpc_resp": {
                "name": "remove_plant",
                "error": {"kind": "not_registered", "detail": "remove_plant"}
            }})
        );
    }

    #[test]
    fn test_decode_tolerates_missing_optionals() {
        let envelope = Envelope::decode(r#"{"rpc":{"name":"get_all_plants"}}"#).unwrap();
        let Envelope::Rpc(request) = envelope else {
            panic!("expected a request");
        };
        assert!(request.args.is_empty());
        assert!(!request.silent);

        let envelope = Envelope::decode(r#"{"rpc_resp":{"name":"interact"}}"#).unwrap();
        let Envelope::RpcResp(response) = envelope else {
            panic!("expected a response");
        };
        assert_eq!(response.into_result(), Ok(Value::Null));

        assert!(matches!(Envelope::decode("{nope"), Err(RpcError::Codec(_))));
    }
}
