//! Result protocol: the envelope every API action produces.
//!
//! Handlers never build responses directly. They receive a [`ResultBuilder`], set the
//! terminal result (usually as their last statement) and optionally attach a payload.
//! The dispatcher then turns the builder into an immutable [`ApiResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outcome class of an API call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultCode {
    /// Request fully satisfied.
    Ok,
    /// Request understood but a precondition prevented action (e.g. job already running).
    Warn,
    /// Operation failed; the message describes the cause.
    Error,
    /// Informational, no action taken.
    Info,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::Warn => "WARN",
            ResultCode::Error => "ERROR",
            ResultCode::Info => "INFO",
        }
    }
}

impl core::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result envelope.
///
/// `message_key` and `params` are opaque to this crate; a message catalog renders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    pub code: ResultCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
}

impl ApiResult {
    pub fn new<I, P>(code: ResultCode, message_key: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            code,
            message_key: Some(message_key.into()),
            params: params.into_iter().map(Into::into).collect(),
            payload: None,
        }
    }

    /// `OK` without a message.
    pub fn ok() -> Self {
        Self {
            code: ResultCode::Ok,
            message_key: None,
            params: Vec::new(),
            payload: None,
        }
    }

    pub fn warn<I, P>(message_key: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(ResultCode::Warn, message_key, params)
    }

    pub fn error<I, P>(message_key: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(ResultCode::Error, message_key, params)
    }

    pub fn info<I, P>(message_key: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(ResultCode::Info, message_key, params)
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }
}

/// Accumulates the result of one handler invocation.
///
/// Last write wins: a second `set_result*` call replaces code, key and params, but keeps a
/// payload set earlier through [`ResultBuilder::set_response_payload`].
#[derive(Debug, Default, Clone)]
pub struct ResultBuilder {
    terminal: Option<(ResultCode, Option<String>, Vec<String>)>,
    payload: Option<JsonValue>,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result<I, P>(&mut self, code: ResultCode, message_key: impl Into<String>, params: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.terminal = Some((
            code,
            Some(message_key.into()),
            params.into_iter().map(Into::into).collect(),
        ));
    }

    pub fn set_result_ok(&mut self) {
        self.terminal = Some((ResultCode::Ok, None, Vec::new()));
    }

    pub fn set_response_payload(&mut self, payload: JsonValue) {
        self.payload = Some(payload);
    }

    /// Replace the terminal result with a prebuilt envelope (including its payload, if any).
    pub fn set(&mut self, result: ApiResult) {
        self.terminal = Some((result.code, result.message_key, result.params));
        if result.payload.is_some() {
            self.payload = result.payload;
        }
    }

    /// Whether a terminal result has been set.
    pub fn is_set(&self) -> bool {
        self.terminal.is_some()
    }

    /// Consume the builder. `None` when no terminal result was ever set.
    pub fn finish(self) -> Option<ApiResult> {
        let (code, message_key, params) = self.terminal?;
        Some(ApiResult {
            code,
            message_key,
            params,
            payload: self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn envelope_survives_serialization() {
        let result = ApiResult::new(ResultCode::Ok, "msg-x", ["3", "5"]);
        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            json!({"code": "OK", "message_key": "msg-x", "params": ["3", "5"]})
        );

        let back: ApiResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn set_result_ok_has_no_message() {
        let mut out = ResultBuilder::new();
        out.set_result_ok();
        let result = out.finish().unwrap();
        assert_eq!(result.code, ResultCode::Ok);
        assert!(result.message_key.is_none());
        assert!(result.params.is_empty());
    }

    #[test]
    fn last_write_wins_and_payload_is_kept() {
        let mut out = ResultBuilder::new();
        out.set_response_payload(json!({"id": 7}));
        out.set_result(ResultCode::Warn, "msg-first", ["a"]);
        out.set_result(ResultCode::Error, "msg-second", Vec::<String>::new());

        let result = out.finish().unwrap();
        assert_eq!(result.code, ResultCode::Error);
        assert_eq!(result.message_key.as_deref(), Some("msg-second"));
        assert!(result.params.is_empty());
        assert_eq!(result.payload, Some(json!({"id": 7})));
    }

    #[test]
    fn unset_builder_finishes_empty() {
        let mut out = ResultBuilder::new();
        out.set_response_payload(json!(1));
        assert!(!out.is_set());
        assert!(out.finish().is_none());
    }

    proptest! {
        #[test]
        fn params_are_preserved_in_order(
            params in proptest::collection::vec(".*", 0..8),
            code in prop_oneof![
                Just(ResultCode::Ok),
                Just(ResultCode::Warn),
                Just(ResultCode::Error),
                Just(ResultCode::Info),
            ],
        ) {
            let result = ApiResult::new(code, "msg-prop", params.clone());
            let back: ApiResult =
                serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
            prop_assert_eq!(back.code, code);
            prop_assert_eq!(back.params, params);
        }
    }
}
