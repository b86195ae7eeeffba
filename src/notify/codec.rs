//! Signed envelope codec for notify commands.
//!
//! An envelope is the form-encoded pair list `method`, `app_key`,
//! `sign_time`, `body`, `sign`. `body` is the base64url (padded) encoding of
//! the JSON command and `sign` covers every other pair. A fresh `sign_time`
//! is taken for every encode, so each frame carries its own signature.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE as BASE64_URL_SAFE;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::form_urlencoded;

use crate::api::unix_seconds;
use crate::notify::proto::{Command, Response};
use crate::sign::{sign, verify, SignError, SIGN_KEY};

/// Decoded form of a signed command frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub method: String,
    pub app_key: String,
    pub sign_time: u64,
    /// Base64url of the JSON-encoded command.
    pub body: String,
    pub sign: String,
}

impl Envelope {
    /// Signed pairs in wire order, without `sign`.
    pub fn unsigned_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("method", self.method.clone()),
            ("app_key", self.app_key.clone()),
            ("sign_time", self.sign_time.to_string()),
            ("body", self.body.clone()),
        ]
    }

    pub fn to_form(&self) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.unsigned_pairs() {
            form.append_pair(key, &value);
        }
        form.append_pair(SIGN_KEY, &self.sign);
        form.finish()
    }

    /// Parses a form-encoded envelope. Pair order is not significant.
    pub fn from_form(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut method = None;
        let mut app_key = None;
        let mut sign_time = None;
        let mut body = None;
        let mut signature = None;

        for (key, value) in form_urlencoded::parse(bytes) {
            let slot = match key.as_ref() {
                "method" => &mut method,
                "app_key" => &mut app_key,
                "sign_time" => &mut sign_time,
                "body" => &mut body,
                SIGN_KEY => &mut signature,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }

        let sign_time = required(sign_time, "sign_time")?;
        Ok(Self {
            method: required(method, "method")?,
            app_key: required(app_key, "app_key")?,
            sign_time: sign_time.parse().map_err(|_| {
                DecodeError::Envelope(format!("sign_time {sign_time:?} is not a unix timestamp"))
            })?,
            body: required(body, "body")?,
            sign: required(signature, SIGN_KEY)?,
        })
    }

    /// Decodes the command carried in `body`.
    pub fn command(&self) -> Result<Command, DecodeError> {
        let json = BASE64_URL_SAFE.decode(self.body.as_bytes())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, DecodeError> {
    value.ok_or_else(|| DecodeError::Envelope(format!("missing {field}")))
}

/// Encodes commands into signed envelopes and decodes server frames.
#[derive(Clone)]
pub struct Codec {
    app_key: String,
    secret: Arc<SecretString>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("app_key", &self.app_key)
            .finish_non_exhaustive()
    }
}

impl Codec {
    pub fn new(app_key: impl Into<String>, secret: SecretString) -> Self {
        Self::with_shared_secret(app_key, Arc::new(secret))
    }

    pub(crate) fn with_shared_secret(app_key: impl Into<String>, secret: Arc<SecretString>) -> Self {
        Self {
            app_key: app_key.into(),
            secret,
        }
    }

    /// Encodes `command` into a transport-ready frame signed now.
    pub fn encode(&self, command: &Command) -> Result<String, CodecError> {
        Ok(self.seal(command, unix_seconds())?.to_form())
    }

    /// Builds the signed envelope for `command` at `sign_time`.
    pub fn seal(&self, command: &Command, sign_time: u64) -> Result<Envelope, CodecError> {
        let json = serde_json::to_vec(command)?;
        let mut envelope = Envelope {
            method: command.name().to_string(),
            app_key: self.app_key.clone(),
            sign_time,
            body: BASE64_URL_SAFE.encode(json),
            sign: String::new(),
        };
        envelope.sign = sign(&envelope.unsigned_pairs(), self.secret.expose_secret())?;
        Ok(envelope)
    }

    /// Decodes an inbound server frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Response, DecodeError> {
        Ok(Response::from_slice(frame)?)
    }

    /// Parses, verifies and decodes a frame produced by [`Codec::encode`].
    ///
    /// This is the server side of the envelope and is mostly useful for
    /// tests and mock servers.
    pub fn open(&self, frame: &[u8]) -> Result<Command, DecodeError> {
        let envelope = Envelope::from_form(frame)?;
        if !verify(
            &envelope.unsigned_pairs(),
            self.secret.expose_secret(),
            &envelope.sign,
        )? {
            return Err(DecodeError::SignMismatch);
        }

        let command = envelope.command()?;
        if command.name() != envelope.method {
            return Err(DecodeError::Envelope(format!(
                "method {:?} does not match command {:?}",
                envelope.method,
                command.name()
            )));
        }
        Ok(command)
    }
}

/// Errors that prevent a command from being sent.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to sign command: {0}")]
    Sign(#[from] SignError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to verify envelope: {0}")]
    Sign(#[from] SignError),

    #[error("envelope signature mismatch")]
    SignMismatch,
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{Codec, DecodeError, Envelope};
    use crate::notify::proto::{Command, MsgData, ResponseResult};
    use crate::sign::verify;

    fn codec() -> Codec {
        Codec::new("4234", SecretString::from("4242342423434".to_string()))
    }

    fn message() -> MsgData {
        MsgData {
            group: "g1".to_string(),
            topic: "sendmsg".to_string(),
            partition: 2,
            offset: 77,
            key: None,
            data: None,
        }
    }

    #[test]
    fn envelope_fields_appear_in_wire_order() {
        let envelope = codec()
            .seal(&Command::subscribe("sendmsg"), 1_700_000_000)
            .expect("seal");
        let form = envelope.to_form();
        let keys: Vec<String> = url::form_urlencoded::parse(form.as_bytes())
            .map(|(key, _)| key.into_owned())
            .collect();
        assert_eq!(keys, ["method", "app_key", "sign_time", "body", "sign"]);
        assert_eq!(envelope.method, "subscribe");
        assert_eq!(envelope.app_key, "4234");
    }

    #[test]
    fn sign_covers_all_other_fields() {
        let envelope = codec()
            .seal(&Command::heartbeat("1".to_string()), 1_700_000_000)
            .expect("seal");
        assert!(verify(&envelope.unsigned_pairs(), "4242342423434", &envelope.sign).unwrap());

        let mut moved = envelope.clone();
        moved.sign_time += 1;
        assert!(!verify(&moved.unsigned_pairs(), "4242342423434", &moved.sign).unwrap());
    }

    #[test]
    fn body_decodes_back_to_command() {
        let command = Command::acknowledge("12".to_string(), &message());
        let frame = codec().encode(&command).expect("encode");
        let envelope = Envelope::from_form(frame.as_bytes()).expect("parse");
        assert_eq!(envelope.command().expect("body"), command);
    }

    #[test]
    fn open_accepts_reordered_pairs() {
        let command = Command::publish("3".to_string(), "t", "k", "v");
        let envelope = codec().seal(&command, 1_700_000_000).expect("seal");
        let reordered = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("sign", &envelope.sign)
            .append_pair("body", &envelope.body)
            .append_pair("app_key", &envelope.app_key)
            .append_pair("sign_time", &envelope.sign_time.to_string())
            .append_pair("method", &envelope.method)
            .finish();
        assert_eq!(codec().open(reordered.as_bytes()).expect("open"), command);
    }

    #[test]
    fn open_rejects_tampered_body() {
        let envelope = codec()
            .seal(&Command::subscribe("a"), 1_700_000_000)
            .expect("seal");
        let forged = codec()
            .seal(&Command::subscribe("b"), 1_700_000_000)
            .expect("seal");
        let tampered = Envelope {
            body: forged.body,
            ..envelope
        };
        assert!(matches!(
            codec().open(tampered.to_form().as_bytes()),
            Err(DecodeError::SignMismatch)
        ));
    }

    #[test]
    fn open_rejects_missing_fields() {
        assert!(matches!(
            codec().open(b"method=subscribe&app_key=4234"),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn encode_fails_without_secret() {
        let codec = Codec::new("4234", SecretString::from(String::new()));
        assert!(codec.encode(&Command::subscribe("a")).is_err());
    }

    #[test]
    fn decode_reports_malformed_json() {
        assert!(matches!(
            codec().decode(b"{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_reads_notifications() {
        let frame = br#"{"Command":"notify","Result":{"Group":"g1","Topic":"sendmsg","Partition":2,"Offset":77}}"#;
        let response = codec().decode(frame).expect("decode");
        assert_eq!(response.result, ResponseResult::Message(message()));
    }
}
