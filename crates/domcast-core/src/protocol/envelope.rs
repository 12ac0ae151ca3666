//! Payload envelope and wire payload shape
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "e": [sequence, version, projectId, userId, sessionId, pageId, uploadMode, isFinal],
//!   "a": [[time, eventType, ...], ...],      // analysis lane
//!   "p": [[time, eventType, ...], ...]       // playback lane, optional
//! }
//! ```
//!
//! Envelope fields are positional. `uploadMode` is `0` for an asynchronous
//! upload and `1` for a beacon sent while the page unloads; `isFinal` is `0`
//! or `1`.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::types::{Token, TokenArray};

/// How a payload left the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    #[default]
    Async,
    Beacon,
}

impl UploadMode {
    pub fn code(&self) -> i64 {
        match self {
            UploadMode::Async => 0,
            UploadMode::Beacon => 1,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UploadMode::Async),
            1 => Some(UploadMode::Beacon),
            _ => None,
        }
    }
}

/// Fixed-shape header describing a payload's origin and order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Monotonically increasing per page, starting at 1
    pub sequence: u64,
    /// Protocol version of the producer
    pub version: String,
    pub project_id: String,
    pub user_id: String,
    pub session_id: String,
    pub page_id: String,
    pub upload_mode: UploadMode,
    /// Last payload of the page
    pub is_final: bool,
}

impl Envelope {
    /// Serialize into positional wire tokens.
    pub fn to_tokens(&self) -> TokenArray {
        vec![
            Token::from(self.sequence),
            Token::from(self.version.as_str()),
            Token::from(self.project_id.as_str()),
            Token::from(self.user_id.as_str()),
            Token::from(self.session_id.as_str()),
            Token::from(self.page_id.as_str()),
            Token::Number(self.upload_mode.code()),
            Token::Number(i64::from(self.is_final)),
        ]
    }

    /// Rebuild an envelope from positional wire tokens.
    pub fn from_tokens(tokens: &[Token]) -> DecodeResult<Self> {
        let number = |index: usize, field: &str| -> DecodeResult<i64> {
            tokens
                .get(index)
                .and_then(Token::as_number)
                .ok_or_else(|| DecodeError::MalformedEnvelope(format!("{} is not a number", field)))
        };
        let text = |index: usize, field: &str| -> DecodeResult<String> {
            tokens
                .get(index)
                .and_then(Token::as_text)
                .map(str::to_string)
                .ok_or_else(|| DecodeError::MalformedEnvelope(format!("{} is not a string", field)))
        };

        let sequence = number(0, "sequence")?;
        if sequence < 0 {
            return Err(DecodeError::MalformedEnvelope(
                "sequence is negative".to_string(),
            ));
        }
        let upload_mode = UploadMode::from_code(number(6, "uploadMode")?).ok_or_else(|| {
            DecodeError::MalformedEnvelope("uploadMode is out of range".to_string())
        })?;

        Ok(Self {
            sequence: sequence as u64,
            version: text(1, "version")?,
            project_id: text(2, "projectId")?,
            user_id: text(3, "userId")?,
            session_id: text(4, "sessionId")?,
            page_id: text(5, "pageId")?,
            upload_mode,
            is_final: number(7, "isFinal")? != 0,
        })
    }
}

/// Outgoing payload as it is serialized to JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    /// Envelope tokens
    pub e: TokenArray,
    /// Analysis event arrays
    #[serde(default)]
    pub a: Vec<TokenArray>,
    /// Playback event arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<TokenArray>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            sequence: 1,
            version: "1.0.0".to_string(),
            project_id: "p1".to_string(),
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            page_id: "pg1".to_string(),
            upload_mode: UploadMode::Async,
            is_final: false,
        }
    }

    #[test]
    fn test_envelope_token_positions() {
        let json = serde_json::to_string(&sample().to_tokens()).unwrap();
        assert_eq!(json, r#"[1,"1.0.0","p1","u1","s1","pg1",0,0]"#);
    }

    #[test]
    fn test_envelope_from_tokens() {
        let tokens: TokenArray =
            serde_json::from_str(r#"[1,"1.0.0","p1","u1","s1","pg1",1,1]"#).unwrap();
        let envelope = Envelope::from_tokens(&tokens).unwrap();
        assert_eq!(envelope.sequence, 1);
        assert_eq!(envelope.page_id, "pg1");
        assert_eq!(envelope.upload_mode, UploadMode::Beacon);
        assert!(envelope.is_final);
    }

    #[test]
    fn test_envelope_rejects_wrong_types() {
        let tokens: TokenArray = serde_json::from_str(r#"["1","1.0.0"]"#).unwrap();
        assert!(matches!(
            Envelope::from_tokens(&tokens),
            Err(DecodeError::MalformedEnvelope(_))
        ));

        let short: TokenArray = serde_json::from_str(r#"[1,"1.0.0","p1"]"#).unwrap();
        assert!(Envelope::from_tokens(&short).is_err());
    }

    #[test]
    fn test_envelope_serde_is_camel_case() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"projectId\":\"p1\""));
        assert!(json.contains("\"isFinal\":false"));
    }

    #[test]
    fn test_wire_payload_omits_empty_playback() {
        let payload = WirePayload {
            e: sample().to_tokens(),
            a: vec![],
            p: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("\"p\""));
    }
}
