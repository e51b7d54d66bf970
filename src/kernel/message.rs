// (C) 2025 - Enzo Lombardi

//! Jupyter messaging protocol envelope (§6).
//!
//! Message content is kept as [`serde_json::Value`] rather than one struct
//! per `msg_type`: the kernel session dispatches on `header.msg_type` at
//! runtime (§4.4), so a closed Rust enum of content shapes would just be
//! matched right back into a dynamic dispatch anyway. Fixed request
//! builders below (`execute_request`, `complete_request`, ...) keep the
//! shape of each request's content honest without requiring every reply
//! type to be named up front.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// One message header, part of the `{header, parent_header, metadata,
/// content, buffers}` 5-tuple (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_id: String,
    pub session: String,
    pub username: String,
    pub date: String,
    pub msg_type: String,
    pub version: String,
}

impl MsgHeader {
    pub fn new(msg_type: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.into(),
            username: "euporie".to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            msg_type: msg_type.into(),
            version: "5.3".to_string(),
        }
    }
}

/// A full wire message: header, optional parent header (set on replies),
/// metadata, content, and any binary buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelMessage {
    pub header: MsgHeader,
    #[serde(default)]
    pub parent_header: Option<MsgHeader>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub content: serde_json::Value,
    #[serde(default, skip)]
    pub buffers: Vec<Vec<u8>>,
    /// The HMAC-SHA256 hex digest this message carried in from the wire,
    /// if any. `None` for messages built locally to send — a
    /// [`KernelTransport`](super::transport::KernelTransport) populates
    /// this from the signature frame that precedes the five-tuple (§6)
    /// when deserializing an incoming multipart message, and
    /// [`verify`](Self::verify) checks it before the reactor dispatches
    /// the message (§4.4, §7).
    #[serde(default, skip)]
    pub signature: Option<String>,
}

impl KernelMessage {
    pub fn request(msg_type: impl Into<String>, session: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            header: MsgHeader::new(msg_type, session),
            parent_header: None,
            metadata: serde_json::Value::Object(Default::default()),
            content,
            buffers: Vec::new(),
            signature: None,
        }
    }

    /// Attaches a wire signature, as a [`KernelTransport`](super::transport::KernelTransport)
    /// does when it parses an incoming multipart message's signature frame.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// `parent_header.msg_id`, the correlation key dispatch is keyed on
    /// (§4.4 "for each message whose `parent_header.msg_id` is known").
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }

    /// HMAC-SHA256 of `header || parent_header || metadata || content`,
    /// each JSON-serialized, as the Jupyter messaging spec requires for
    /// the wire signature preceding the 5-tuple.
    pub fn sign(&self, key: &[u8]) -> Result<String, serde_json::Error> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(serde_json::to_string(&self.header)?.as_bytes());
        mac.update(serde_json::to_string(&self.parent_header)?.as_bytes());
        mac.update(serde_json::to_string(&self.metadata)?.as_bytes());
        mac.update(serde_json::to_string(&self.content)?.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recomputes this message's HMAC under `key` and compares it to the
    /// signature it carried in from the wire. A message with no attached
    /// signature (built locally to send, never received) verifies
    /// vacuously — only incoming messages need checking (§4.4, §7).
    #[must_use]
    pub fn verify(&self, key: &[u8]) -> bool {
        match &self.signature {
            Some(sig) => self.sign(key).is_ok_and(|computed| computed == *sig),
            None => true,
        }
    }
}

// Minimal hex encoder so we don't need to pull in the `hex` crate solely
// for this — HMAC digests are fixed-size byte arrays.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_generates_fresh_msg_id() {
        let a = KernelMessage::request("execute_request", "sess", serde_json::json!({}));
        let b = KernelMessage::request("execute_request", "sess", serde_json::json!({}));
        assert_ne!(a.msg_id(), b.msg_id());
    }

    #[test]
    fn parent_msg_id_absent_without_parent_header() {
        let msg = KernelMessage::request("status", "sess", serde_json::json!({}));
        assert_eq!(msg.parent_msg_id(), None);
    }

    #[test]
    fn signature_is_deterministic_for_same_content() {
        let msg = KernelMessage::request("execute_request", "sess", serde_json::json!({"code": "1+1"}));
        let key = b"secret";
        assert_eq!(msg.sign(key).unwrap(), msg.sign(key).unwrap());
    }

    #[test]
    fn signature_changes_with_key() {
        let msg = KernelMessage::request("execute_request", "sess", serde_json::json!({"code": "1+1"}));
        assert_ne!(msg.sign(b"key-a").unwrap(), msg.sign(b"key-b").unwrap());
    }

    #[test]
    fn unsigned_message_verifies_vacuously() {
        let msg = KernelMessage::request("status", "sess", serde_json::json!({}));
        assert!(msg.verify(b"any-key"));
    }

    #[test]
    fn correctly_signed_message_verifies() {
        let key = b"secret";
        let msg = KernelMessage::request("execute_reply", "sess", serde_json::json!({"status": "ok"}));
        let sig = msg.sign(key).unwrap();
        let msg = msg.with_signature(sig);
        assert!(msg.verify(key));
    }

    #[test]
    fn tampered_or_mis_keyed_message_fails_verification() {
        let key = b"secret";
        let msg = KernelMessage::request("execute_reply", "sess", serde_json::json!({"status": "ok"}));
        let sig = msg.sign(key).unwrap();
        let msg = msg.with_signature(sig);
        assert!(!msg.verify(b"wrong-key"));
    }
}
