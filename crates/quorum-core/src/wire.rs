//! JSON wire frames
//!
//! Frames exchanged with a peer over the transport. Byte material (keys,
//! nonces, ciphertexts, tags) is base64 with the standard alphabet.
//!
//! ```text
//! {"type":"signal-handshake","action":"initiate","data":{"clientIdentityKey","clientEphemeralKey"}}
//! {"type":"signal-handshake","action":"complete","data":{"serverIdentityKey","serverEphemeralKey"}}
//! {"type":"signal-encrypted","data":{"header":{"ratchetKey","previousChainLength","messageNumber"},
//!                                    "nonce","ciphertext","authTag"}}
//! {"type":"signal-error","data":{"kind","message"}}
//! ```
//!
//! Handshake keys are passed through as raw bytes: the handshake itself
//! rejects wrong lengths with `HandshakeFailed`. Every other fixed-size field
//! is checked here and rejected with `Codec`.

use base64::{Engine, engine::general_purpose::STANDARD};
use quorum_crypto::{NONCE_SIZE, PublicKey, TAG_SIZE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::{Error, ErrorKind, Result},
    ids::{GroupId, MemberId},
    message::{EncryptedEnvelope, GroupEnvelope, MessageHeader},
};

const TYPE_HANDSHAKE: &str = "signal-handshake";
const TYPE_ENCRYPTED: &str = "signal-encrypted";
const TYPE_ERROR: &str = "signal-error";
const ACTION_INITIATE: &str = "initiate";
const ACTION_COMPLETE: &str = "complete";

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Initiator's first handshake message
    HandshakeInitiate {
        /// Initiator's long-term identity key (unchecked length)
        identity_key: Vec<u8>,
        /// Initiator's one-time ephemeral key (unchecked length)
        ephemeral_key: Vec<u8>,
    },
    /// Responder's answer to an initiate frame
    HandshakeComplete {
        /// Responder's long-term identity key (unchecked length)
        identity_key: Vec<u8>,
        /// Responder's one-time ephemeral key (unchecked length)
        ephemeral_key: Vec<u8>,
    },
    /// Pairwise ratchet message
    Encrypted(EncryptedEnvelope),
    /// Failure report for a previously received frame
    Error {
        /// Classification, tells the peer whether to re-handshake
        kind: ErrorKind,
        /// Human-readable detail, never contains key material
        message: String,
    },
}

impl Frame {
    /// Error frame describing `error`.
    pub fn from_error(error: &Error) -> Self {
        Self::Error { kind: error.kind(), message: error.to_string() }
    }

    /// Encode as JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::HandshakeInitiate { identity_key, ephemeral_key } => to_json(&OutFrame {
                kind: TYPE_HANDSHAKE,
                action: Some(ACTION_INITIATE),
                data: ClientHandshake {
                    client_identity_key: STANDARD.encode(identity_key),
                    client_ephemeral_key: STANDARD.encode(ephemeral_key),
                },
            }),
            Self::HandshakeComplete { identity_key, ephemeral_key } => to_json(&OutFrame {
                kind: TYPE_HANDSHAKE,
                action: Some(ACTION_COMPLETE),
                data: ServerHandshake {
                    server_identity_key: STANDARD.encode(identity_key),
                    server_ephemeral_key: STANDARD.encode(ephemeral_key),
                },
            }),
            Self::Encrypted(envelope) => to_json(&OutFrame {
                kind: TYPE_ENCRYPTED,
                action: None,
                data: WireEncrypted::from(envelope),
            }),
            Self::Error { kind, message } => to_json(&OutFrame {
                kind: TYPE_ERROR,
                action: None,
                data: WireError { kind: *kind, message: message.clone() },
            }),
        }
    }

    /// Decode a JSON frame.
    ///
    /// # Errors
    ///
    /// - `Codec`: malformed JSON, unknown type/action, bad base64, or a
    ///   fixed-size field (nonce, tag, ratchet key) with the wrong length
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: RawFrame = serde_json::from_slice(bytes).map_err(codec)?;

        match (raw.kind.as_str(), raw.action.as_deref()) {
            (TYPE_HANDSHAKE, Some(ACTION_INITIATE)) => {
                let data: ClientHandshake = from_value(raw.data)?;
                Ok(Self::HandshakeInitiate {
                    identity_key: decode_base64(&data.client_identity_key, "clientIdentityKey")?,
                    ephemeral_key: decode_base64(&data.client_ephemeral_key, "clientEphemeralKey")?,
                })
            },
            (TYPE_HANDSHAKE, Some(ACTION_COMPLETE)) => {
                let data: ServerHandshake = from_value(raw.data)?;
                Ok(Self::HandshakeComplete {
                    identity_key: decode_base64(&data.server_identity_key, "serverIdentityKey")?,
                    ephemeral_key: decode_base64(&data.server_ephemeral_key, "serverEphemeralKey")?,
                })
            },
            (TYPE_ENCRYPTED, _) => {
                let data: WireEncrypted = from_value(raw.data)?;
                Ok(Self::Encrypted(data.try_into()?))
            },
            (TYPE_ERROR, _) => {
                let data: WireError = from_value(raw.data)?;
                Ok(Self::Error { kind: data.kind, message: data.message })
            },
            (kind, action) => Err(Error::Codec(format!(
                "unknown frame type {kind:?} (action {action:?})"
            ))),
        }
    }
}

impl GroupEnvelope {
    /// Encode as a JSON group message.
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_json(&WireGroupEnvelope {
            group_id: self.group_id.as_str().to_owned(),
            sender_id: self.sender_id.as_str().to_owned(),
            epoch: self.epoch,
            ciphertext: STANDARD.encode(&self.ciphertext),
            nonce: STANDARD.encode(self.nonce),
            auth_tag: STANDARD.encode(self.auth_tag),
        })
    }

    /// Decode a JSON group message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireGroupEnvelope = serde_json::from_slice(bytes).map_err(codec)?;
        Ok(Self {
            group_id: GroupId::new(wire.group_id),
            sender_id: MemberId::new(wire.sender_id),
            epoch: wire.epoch,
            ciphertext: decode_base64(&wire.ciphertext, "ciphertext")?,
            nonce: decode_fixed(&wire.nonce, "nonce")?,
            auth_tag: decode_fixed(&wire.auth_tag, "authTag")?,
        })
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    action: Option<String>,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct OutFrame<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    data: T,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientHandshake {
    client_identity_key: String,
    client_ephemeral_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerHandshake {
    server_identity_key: String,
    server_ephemeral_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    ratchet_key: String,
    previous_chain_length: u32,
    message_number: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEncrypted {
    header: WireHeader,
    nonce: String,
    ciphertext: String,
    auth_tag: String,
}

impl From<&EncryptedEnvelope> for WireEncrypted {
    fn from(envelope: &EncryptedEnvelope) -> Self {
        Self {
            header: WireHeader {
                ratchet_key: STANDARD.encode(envelope.header.ratchet_key.as_bytes()),
                previous_chain_length: envelope.header.previous_chain_length,
                message_number: envelope.header.message_number,
            },
            nonce: STANDARD.encode(envelope.nonce),
            ciphertext: STANDARD.encode(&envelope.ciphertext),
            auth_tag: STANDARD.encode(envelope.auth_tag),
        }
    }
}

impl TryFrom<WireEncrypted> for EncryptedEnvelope {
    type Error = Error;

    fn try_from(wire: WireEncrypted) -> Result<Self> {
        Ok(Self {
            header: MessageHeader {
                ratchet_key: PublicKey::from_bytes(decode_fixed(
                    &wire.header.ratchet_key,
                    "ratchetKey",
                )?),
                previous_chain_length: wire.header.previous_chain_length,
                message_number: wire.header.message_number,
            },
            nonce: decode_fixed::<NONCE_SIZE>(&wire.nonce, "nonce")?,
            ciphertext: decode_base64(&wire.ciphertext, "ciphertext")?,
            auth_tag: decode_fixed::<TAG_SIZE>(&wire.auth_tag, "authTag")?,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireError {
    kind: ErrorKind,
    message: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroupEnvelope {
    group_id: String,
    sender_id: String,
    epoch: u64,
    ciphertext: String,
    nonce: String,
    auth_tag: String,
}

fn codec(error: impl std::fmt::Display) -> Error {
    Error::Codec(error.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(codec)
}

fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(codec)
}

fn decode_base64(encoded: &str, field: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|error| Error::Codec(format!("{field} is not valid base64: {error}")))
}

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N]> {
    let decoded = decode_base64(encoded, field)?;
    decoded.as_slice().try_into().map_err(|_| {
        Error::Codec(format!("{field} must be {N} bytes, got {}", decoded.len()))
    })
}
