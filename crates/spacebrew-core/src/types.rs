//! Protocol types and message definitions

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{Error, Result};

/// Channel data types
///
/// Anything other than the three built-in types is carried as an opaque custom tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelType {
    Boolean,
    Range,
    String,
    Custom(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Boolean => "boolean",
            ChannelType::Range => "range",
            ChannelType::String => "string",
            ChannelType::Custom(tag) => tag,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ChannelType::Custom(_))
    }
}

impl Default for ChannelType {
    /// An empty custom tag, rejected by config validation
    fn default() -> Self {
        ChannelType::Custom(String::new())
    }
}

impl From<String> for ChannelType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "boolean" => ChannelType::Boolean,
            "range" => ChannelType::Range,
            "string" => ChannelType::String,
            _ => ChannelType::Custom(s),
        }
    }
}

impl From<&str> for ChannelType {
    fn from(s: &str) -> Self {
        ChannelType::from(s.to_string())
    }
}

impl From<ChannelType> for String {
    fn from(t: ChannelType) -> Self {
        match t {
            ChannelType::Custom(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by a data message
///
/// The router never interprets values; the accessors below apply the
/// client-side conventions for each channel type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Boolean channels carry the literal strings "true"/"false"
    pub fn as_bool_flag(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => Some(s == "true"),
            _ => None,
        }
    }

    /// Range channels carry numbers, sometimes encoded as strings
    pub fn as_range(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// An outbound channel declared by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishChannel {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PublishChannel {
    pub fn new(name: &str, channel_type: impl Into<ChannelType>) -> Self {
        Self {
            name: name.to_string(),
            channel_type: channel_type.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// An inbound channel declared by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeChannel {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
}

impl SubscribeChannel {
    pub fn new(name: &str, channel_type: impl Into<ChannelType>) -> Self {
        Self {
            name: name.to_string(),
            channel_type: channel_type.into(),
        }
    }
}

/// Common shape of both channel kinds, used for validation
pub trait Channel {
    fn name(&self) -> &str;
    fn channel_type(&self) -> &ChannelType;
}

impl Channel for PublishChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &ChannelType {
        &self.channel_type
    }
}

impl Channel for SubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &ChannelType {
        &self.channel_type
    }
}

/// `{"messages": [...]}` wrapper used by the publish/subscribe blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelList<T> {
    #[serde(default = "Vec::new")]
    pub messages: Vec<T>,
}

impl<T> Default for ChannelList<T> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
        }
    }
}

impl<T> From<Vec<T>> for ChannelList<T> {
    fn from(messages: Vec<T>) -> Self {
        Self { messages }
    }
}

/// Client configuration, sent as the handshake and on every update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<ChannelList<PublishChannel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<ChannelList<SubscribeChannel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl ClientConfig {
    /// Create an empty (but valid) config
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            publish: Some(ChannelList::default()),
            subscribe: Some(ChannelList::default()),
            options: None,
        }
    }

    pub fn publish_channels(&self) -> &[PublishChannel] {
        self.publish
            .as_ref()
            .map(|list| list.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn subscribe_channels(&self) -> &[SubscribeChannel] {
        self.subscribe
            .as_ref()
            .map(|list| list.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_publish(&mut self, channel: PublishChannel) {
        self.publish
            .get_or_insert_with(ChannelList::default)
            .messages
            .push(channel);
    }

    pub fn add_subscribe(&mut self, channel: SubscribeChannel) {
        self.subscribe
            .get_or_insert_with(ChannelList::default)
            .messages
            .push(channel);
    }

    /// Check the fields the router relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("missing client name".into()));
        }
        let publish = self
            .publish
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("missing publish block".into()))?;
        let subscribe = self
            .subscribe
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("missing subscribe block".into()))?;

        validate_channels("publish", &publish.messages)?;
        validate_channels("subscribe", &subscribe.messages)
    }
}

fn validate_channels<C: Channel>(direction: &str, channels: &[C]) -> Result<()> {
    let mut seen = HashSet::new();
    for channel in channels {
        if channel.name().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{} channel without a name",
                direction
            )));
        }
        if channel.channel_type().as_str().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{} channel '{}' without a type",
                direction,
                channel.name()
            )));
        }
        if !seen.insert(channel.name()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate {} channel '{}'",
                direction,
                channel.name()
            )));
        }
    }
    Ok(())
}

/// Admin registration flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdminRegistration {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub no_msgs: bool,
}

/// A data plane message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Set by the sending client; stripped on routed delivery
    #[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub value: Value,
    /// Only present on admin monitor copies
    #[serde(rename = "remoteAddress", default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
}

impl DataMessage {
    pub fn new(name: &str, channel_type: impl Into<ChannelType>, value: impl Into<Value>) -> Self {
        Self {
            client_name: None,
            name: name.to_string(),
            channel_type: channel_type.into(),
            value: value.into(),
            remote_address: None,
        }
    }

    pub fn from_client(mut self, client_name: &str) -> Self {
        self.client_name = Some(client_name.to_string());
        self
    }
}

/// One side of a route: a specific channel on a specific client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "clientName")]
    pub client_name: String,
    #[serde(rename = "remoteAddress")]
    pub remote_address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
}

impl Endpoint {
    pub fn new(
        client_name: &str,
        remote_address: &str,
        name: &str,
        channel_type: impl Into<ChannelType>,
    ) -> Self {
        Self {
            client_name: client_name.to_string(),
            remote_address: remote_address.to_string(),
            name: name.to_string(),
            channel_type: channel_type.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}:{}",
            self.client_name, self.remote_address, self.name, self.channel_type
        )
    }
}

/// Route mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    Add,
    Remove,
}

/// Route add/remove, sent by admins and echoed to admins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCommand {
    #[serde(rename = "type")]
    pub action: RouteAction,
    pub publisher: Endpoint,
    pub subscriber: Endpoint,
}

impl RouteCommand {
    pub fn add(publisher: Endpoint, subscriber: Endpoint) -> Self {
        Self {
            action: RouteAction::Add,
            publisher,
            subscriber,
        }
    }

    pub fn remove(publisher: Endpoint, subscriber: Endpoint) -> Self {
        Self {
            action: RouteAction::Remove,
            publisher,
            subscriber,
        }
    }
}

/// Client configuration as seen by admins (includes the remote address)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "remoteAddress")]
    pub remote_address: String,
    #[serde(default)]
    pub publish: ChannelList<PublishChannel>,
    #[serde(default)]
    pub subscribe: ChannelList<SubscribeChannel>,
}

/// Identity of a removed client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedClient {
    pub name: String,
    #[serde(rename = "remoteAddress")]
    pub remote_address: String,
}

/// Client to server messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Config(ClientConfig),
    Admin(AdminRegistration),
    Message(DataMessage),
    Route(RouteCommand),
}

/// Registry and route table changes pushed to admin connections
#[derive(Debug, Clone, PartialEq)]
pub enum AdminEvent {
    /// New or updated clients, batched
    Clients(Vec<ClientDescriptor>),
    /// Removed clients
    Removed(Vec<RemovedClient>),
    /// Route added or removed
    Route(RouteCommand),
}

/// Server to client messages
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Data(DataMessage),
    Admin(AdminEvent),
}

#[derive(Serialize)]
struct ConfigEntry<'a, T> {
    config: &'a T,
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Config(config) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("config", config)?;
                map.end()
            }
            ClientMessage::Admin(admin) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("admin", &admin.admin)?;
                map.serialize_entry("no_msgs", &admin.no_msgs)?;
                map.end()
            }
            ClientMessage::Message(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            ClientMessage::Route(route) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("route", route)?;
                map.end()
            }
        }
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ServerMessage::Data(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            ServerMessage::Admin(AdminEvent::Clients(clients)) => {
                let mut seq = serializer.serialize_seq(Some(clients.len()))?;
                for client in clients {
                    seq.serialize_element(&ConfigEntry { config: client })?;
                }
                seq.end()
            }
            ServerMessage::Admin(AdminEvent::Removed(removed)) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("remove", removed)?;
                map.end()
            }
            ServerMessage::Admin(AdminEvent::Route(route)) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("route", route)?;
                map.end()
            }
        }
    }
}
