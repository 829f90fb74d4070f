//! Spacebrew Client Library
//!
//! Async client for the Spacebrew publish/subscribe router.
//!
//! # Example
//!
//! ```no_run
//! use spacebrew_client::Spacebrew;
//!
//! # async fn example() -> spacebrew_client::Result<()> {
//! let sb = Spacebrew::builder()
//!     .server("localhost")
//!     .name("button")
//!     .build();
//!
//! sb.add_publish("pressed", "boolean", None)?;
//! sb.add_subscribe("light", "boolean")?;
//! sb.on_boolean(|name, value| println!("{} = {}", name, value));
//!
//! sb.connect().await?;
//! sb.send("pressed", "boolean", "true")?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod builder;
pub mod client;
pub mod error;

pub use admin::{AdminMirror, ChannelRef};
pub use builder::{ClientOptions, SpacebrewBuilder};
pub use client::Spacebrew;
pub use error::{ClientError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::{ClientOptions, SpacebrewBuilder};
    pub use crate::client::Spacebrew;
    pub use crate::error::{ClientError, Result};
    pub use spacebrew_core::{ChannelType, Endpoint, RouteAction, Value};
}
