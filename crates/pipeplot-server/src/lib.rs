//! pipeplot-server — the HTTP/WebSocket surface over the core pipeline.
//!
//! Three endpoints:
//!
//! - `GET /metadata` — the process-lifetime metadata object as JSON.
//! - `GET /errors` — current terminal state for polling clients.
//! - `GET /ws2` — the framed binary stream; one session task per client.
//!
//! Sessions batch per series and flush on size or interval, so a chatty
//! stream costs few frames and a trickle still renders promptly.

mod app;
mod listen;
mod series;
mod session;

pub use app::{router, AppState, ErrorStatus};
pub use listen::{acquire_listener, open_browser, ListenError, MAX_PORT_ATTEMPTS};
pub use series::SeriesBuffers;
pub use session::SessionError;
