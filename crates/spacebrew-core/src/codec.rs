//! Spacebrew JSON Codec
//!
//! Every frame is a single JSON document. The message kind is identified by its
//! top-level key (`config`, `admin`, `message`, `route`, `remove`) or, for batched
//! client announcements, by being an array of `{"config": ...}` entries.
//!
//! Decoding inspects the shape exactly once and hands the inner value to serde,
//! so callers always work with the closed [`ClientMessage`] / [`ServerMessage`]
//! enums rather than raw JSON.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::types::*;
use crate::{Error, Result};

/// Encode any protocol message to a JSON frame
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| Error::EncodeError(e.to_string()))
}

/// Decode a frame sent by a client to the router
pub fn decode_client(data: &[u8]) -> Result<ClientMessage> {
    let mut object = match serde_json::from_slice::<Json>(data)? {
        Json::Object(object) => object,
        other => return Err(Error::UnknownMessage(shape_of(&other))),
    };

    if let Some(config) = object.remove("config") {
        return Ok(ClientMessage::Config(serde_json::from_value(config)?));
    }
    if let Some(message) = object.remove("message") {
        return Ok(ClientMessage::Message(serde_json::from_value(message)?));
    }
    if let Some(route) = object.remove("route") {
        return Ok(ClientMessage::Route(serde_json::from_value(route)?));
    }
    if let Some(admin) = object.remove("admin") {
        let no_msgs = object.remove("no_msgs");
        return admin_registration(admin, no_msgs).map(ClientMessage::Admin);
    }

    Err(Error::UnknownMessage(keys_of(&object)))
}

/// Decode a frame sent by the router to a client
pub fn decode_server(data: &[u8]) -> Result<ServerMessage> {
    match serde_json::from_slice::<Json>(data)? {
        Json::Array(entries) => {
            let mut clients = Vec::with_capacity(entries.len());
            for entry in entries {
                // Non-config entries in a batch are ignored
                if let Json::Object(mut object) = entry {
                    if let Some(config) = object.remove("config") {
                        clients.push(serde_json::from_value(config)?);
                    }
                }
            }
            Ok(ServerMessage::Admin(AdminEvent::Clients(clients)))
        }
        Json::Object(mut object) => {
            if let Some(message) = object.remove("message") {
                return Ok(ServerMessage::Data(serde_json::from_value(message)?));
            }
            if let Some(config) = object.remove("config") {
                let client = serde_json::from_value(config)?;
                return Ok(ServerMessage::Admin(AdminEvent::Clients(vec![client])));
            }
            if let Some(removed) = object.remove("remove") {
                return Ok(ServerMessage::Admin(AdminEvent::Removed(
                    serde_json::from_value(removed)?,
                )));
            }
            if let Some(route) = object.remove("route") {
                return Ok(ServerMessage::Admin(AdminEvent::Route(
                    serde_json::from_value(route)?,
                )));
            }
            Err(Error::UnknownMessage(keys_of(&object)))
        }
        other => Err(Error::UnknownMessage(shape_of(&other))),
    }
}

/// Admin registration arrives either flat (`{"admin": true, "no_msgs": true}`)
/// or, from older clients, as `{"admin": [{"admin": true, ...}]}`.
fn admin_registration(admin: Json, no_msgs: Option<Json>) -> Result<AdminRegistration> {
    match admin {
        Json::Bool(admin) => Ok(AdminRegistration {
            admin,
            no_msgs: no_msgs.and_then(|v| v.as_bool()).unwrap_or(false),
        }),
        Json::Array(entries) => {
            let mut registration = AdminRegistration::default();
            for entry in entries {
                let flags: AdminRegistration = serde_json::from_value(entry)?;
                registration.admin |= flags.admin;
                registration.no_msgs |= flags.no_msgs;
            }
            Ok(registration)
        }
        Json::Object(_) => Ok(serde_json::from_value(admin)?),
        other => Err(Error::UnknownMessage(format!("admin {}", shape_of(&other)))),
    }
}

fn keys_of(object: &Map<String, Json>) -> String {
    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
    format!("object with keys [{}]", keys.join(", "))
}

fn shape_of(value: &Json) -> String {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
    .to_string()
}
