pub mod protocol;
pub mod router;
pub mod transport;

pub use protocol::{decode, ClientFrame, Inbound};
pub use router::{RouteOutcome, Router};
pub use transport::{Connector, Link, LinkEvent, Peer, WsConnector};
