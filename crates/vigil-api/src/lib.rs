// vigil-api: Async client for the Vigil alarm cloud API (REST + event stream)

pub mod client;
pub mod error;
pub mod model;
pub mod stream;
pub mod transport;

pub use client::GatewayClient;
pub use error::Error;
pub use model::{
    DeviceState, Feature, Location, StateDocument, StateEntry, StreamEvent, TokenGrant,
};
pub use stream::EventStream;
pub use transport::TransportConfig;
