use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::rpc::RpcError;

/// Mention targets: a single name or a list of names.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Mentions {
    One(String),
    Many(Vec<String>),
}

impl Mentions {
    pub fn into_vec(self) -> Vec<String> {
        let names = match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        };
        names.into_iter().filter(|n| !n.is_empty()).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendParams {
    pub to: Option<String>,
    pub text: Option<String>,
    pub at: Option<Mentions>,
    pub files: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendFileParams {
    pub to: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenParams {
    pub chat: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

/// A decoded inbound command.
///
/// Param fields are optional so that a missing value can be answered with a
/// structured `{ok:false}` result; fields outside the schema are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Send(SendParams),
    SendFile(SendFileParams),
    GetStatus,
    GetContacts,
    AddListen(ListenParams),
    RemoveListen(ListenParams),
    GetMediaInfo,
    Ping,
}

impl Command {
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, RpcError> {
        let params = match params {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(p) => p,
        };

        let command = match method {
            "send" => Self::Send(decode(params)?),
            "sendFile" => Self::SendFile(decode(params)?),
            "getStatus" => decode::<NoParams>(params).map(|_| Self::GetStatus)?,
            "getContacts" => decode::<NoParams>(params).map(|_| Self::GetContacts)?,
            "addListen" => Self::AddListen(decode(params)?),
            "removeListen" => Self::RemoveListen(decode(params)?),
            "getMediaInfo" => decode::<NoParams>(params).map(|_| Self::GetMediaInfo)?,
            "ping" => decode::<NoParams>(params).map(|_| Self::Ping)?,
            other => return Err(RpcError::method_not_found(other)),
        };
        Ok(command)
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{INVALID_PARAMS, METHOD_NOT_FOUND};
    use serde_json::json;

    #[test]
    fn parses_send_with_single_mention() {
        let cmd = Command::parse(
            "send",
            Some(json!({"to": "team", "text": "hi", "at": "alice"})),
        )
        .unwrap();
        match cmd {
            Command::Send(p) => {
                assert_eq!(p.to.as_deref(), Some("team"));
                assert_eq!(p.at.unwrap().into_vec(), vec!["alice"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_send_with_mention_list_and_files() {
        let cmd = Command::parse(
            "send",
            Some(json!({"to": "team", "at": ["a", "", "b"], "files": ["/tmp/x"]})),
        )
        .unwrap();
        let Command::Send(p) = cmd else { panic!("expected send") };
        assert_eq!(p.at.unwrap().into_vec(), vec!["a", "b"]);
        assert_eq!(p.files.unwrap(), vec!["/tmp/x"]);
    }

    #[test]
    fn missing_params_still_decode() {
        let cmd = Command::parse("send", None).unwrap();
        assert_eq!(cmd, Command::Send(SendParams::default()));
        let cmd = Command::parse("addListen", Some(Value::Null)).unwrap();
        assert_eq!(cmd, Command::AddListen(ListenParams::default()));
    }

    #[test]
    fn send_file_uses_camel_case() {
        let cmd = Command::parse("sendFile", Some(json!({"to": "bob", "filePath": "/a"}))).unwrap();
        let Command::SendFile(p) = cmd else { panic!("expected sendFile") };
        assert_eq!(p.file_path.as_deref(), Some("/a"));
    }

    #[test]
    fn unknown_field_is_invalid_params() {
        let err = Command::parse("send", Some(json!({"to": "bob", "colour": "red"}))).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("colour"), "got: {}", err.message);

        let err = Command::parse("ping", Some(json!({"extra": 1}))).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn unknown_method() {
        let err = Command::parse("bogus", None).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.message, "Method not found: bogus");
    }

    #[test]
    fn parameterless_methods_parse() {
        let cases = [
            ("getStatus", Command::GetStatus),
            ("getContacts", Command::GetContacts),
            ("getMediaInfo", Command::GetMediaInfo),
            ("ping", Command::Ping),
        ];
        for (method, expected) in cases {
            assert_eq!(Command::parse(method, Some(json!({}))).unwrap(), expected);
        }
    }
}
