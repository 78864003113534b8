use serde::{Deserialize, Serialize};

use crate::constants::Member;

/// Error details in a bus envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodError {
    pub code: i32,
    pub message: String,
}

/// Envelope for all bus traffic: method calls, method returns, and signals.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the receiver knows the member's payload type.
/// `signature` carries the bus type-grammar string for the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub member: Member,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MethodError>,
}

impl Message {
    /// Creates a new message with the given member and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        member: Member,
        signature: Option<&str>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            member,
            signature: signature.map(str::to_owned),
            payload: raw,
            error: None,
        })
    }

    /// Creates a broadcast signal frame.
    pub fn signal<T: Serialize>(
        id: impl Into<String>,
        member: Member,
        signature: &str,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Message::new(id, member, Some(signature), Some(payload))
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates a method-return frame answering this call.
    pub fn reply<T: Serialize>(
        &self,
        signature: &str,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Message::new(
            &self.id,
            Member::MethodReturn,
            Some(signature),
            Some(payload),
        )
    }

    /// Creates an error frame answering this call.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            member: Member::Error,
            signature: None,
            payload: None,
            error: Some(MethodError {
                code,
                message: message.into(),
            }),
        }
    }
}
