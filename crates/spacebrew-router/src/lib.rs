//! Spacebrew Router
//!
//! The router is the central hub of a Spacebrew installation:
//! - Tracks connected clients and the channels they declare
//! - Stores the routes admins draw between publish and subscribe channels
//! - Forwards each data message along every route leaving its channel
//! - Keeps admin tools informed of client and route changes
//!
//! # Example
//!
//! ```no_run
//! use spacebrew_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default());
//!
//!     // WebSocket on the default Spacebrew port
//!     router.serve_websocket("0.0.0.0:9000").await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod routes;
pub mod session;

pub use admin::AdminBroadcaster;
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{Result, RouterError};
pub use lifecycle::RouterCore;
pub use registry::{Client, ClientKey, ClientRegistry, Direction, Registration, RegistrationKind};
pub use router::{Router, RouterConfig};
pub use routes::{AddOutcome, Route, RouteTable};
pub use session::{ConnectionId, ConnectionState, Session};
