//! Upload client
//!
//! A transfer engine plus the transports it can run over.

pub mod direct;
pub mod engine;
pub mod http;
pub mod transport;

pub use direct::DirectTransport;
pub use engine::{
    TransferConfig, TransferEngine, TransferError, TransferEvent, TransferOutcome, UploadSource,
};
pub use http::HttpTransport;
pub use transport::{RemoteOffset, RemoteUpload, TransportError, UploadTransport};
