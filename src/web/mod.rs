pub mod dashboard;
pub mod websocket;

pub use dashboard::{apply_selection, DashboardServer, PredictRequest, PredictResponse, SelectionRequest};
pub use websocket::{ClientMessage, ServerMessage, SessionContext, WebSocketHandler};
