//! Viewer-facing surface: event types, the serial command queue and the
//! WebSocket endpoint

mod dispatcher;
mod handler;
mod messages;

pub use dispatcher::CommandQueue;
pub use handler::{watchlist_socket, ViewerState};
pub use messages::{QuoteKind, ViewerCommand, ViewerEvent};
