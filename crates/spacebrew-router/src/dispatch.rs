//! Dispatch engine
//!
//! Forwards a data message along every route leaving the sender's channel.
//! Delivery is at-most-once: a subscriber that is gone, closed or backed up
//! simply misses the message.

use dashmap::DashMap;
use spacebrew_core::{codec, DataMessage, ServerMessage};
use std::sync::Arc;
use tracing::trace;

use crate::admin::AdminBroadcaster;
use crate::error::{Result, RouterError};
use crate::registry::{Client, ClientRegistry};
use crate::routes::RouteTable;
use crate::session::{ConnectionId, Session};

/// Counters for one dispatched message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routes leaving the channel
    pub routes: usize,
    /// Frames queued to subscribers
    pub delivered: usize,
    /// Routes whose subscriber could not take the frame
    pub dropped: usize,
    /// Monitor copies queued to admins
    pub monitored: usize,
}

/// Borrowed view over the shared router state needed to dispatch
pub struct Dispatcher<'a> {
    registry: &'a ClientRegistry,
    routes: &'a RouteTable,
    sessions: &'a DashMap<ConnectionId, Arc<Session>>,
    admins: &'a AdminBroadcaster,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a ClientRegistry,
        routes: &'a RouteTable,
        sessions: &'a DashMap<ConnectionId, Arc<Session>>,
        admins: &'a AdminBroadcaster,
    ) -> Self {
        Self {
            registry,
            routes,
            sessions,
            admins,
        }
    }

    pub fn dispatch(&self, sender: &Client, message: &DataMessage) -> Result<DispatchReport> {
        let declared = sender
            .publish_channel(&message.name)
            .map(|c| c.channel_type == message.channel_type)
            .unwrap_or(false);
        if !declared {
            return Err(RouterError::UnknownChannel {
                client: sender.name.clone(),
                channel: message.name.clone(),
                channel_type: message.channel_type.clone(),
            });
        }

        let mut report = DispatchReport {
            monitored: self.admins.monitor(sender, message)?,
            ..Default::default()
        };

        let routes = self
            .routes
            .routes_from(&sender.name, &sender.remote_address, &message.name);
        report.routes = routes.len();

        for route in routes {
            let forwarded = DataMessage {
                client_name: None,
                name: route.subscriber.name.clone(),
                channel_type: message.channel_type.clone(),
                value: message.value.clone(),
                remote_address: None,
            };
            let frame = codec::encode(&ServerMessage::Data(forwarded))?;

            let session = self
                .registry
                .find(&route.subscriber.client_name, &route.subscriber.remote_address)
                .and_then(|client| {
                    self.sessions
                        .get(&client.connection)
                        .map(|s| Arc::clone(s.value()))
                });

            match session.map(|s| s.deliver(frame)) {
                Some(Ok(())) => report.delivered += 1,
                Some(Err(e)) => {
                    trace!("Delivery to {} dropped: {}", route.subscriber, e);
                    report.dropped += 1;
                }
                None => {
                    trace!("Delivery to {} dropped: subscriber gone", route.subscriber);
                    report.dropped += 1;
                }
            }
        }

        Ok(report)
    }
}
