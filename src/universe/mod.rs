mod controller;
mod error;
mod frame;
mod transport;


pub use controller::{spawn_universe, UniverseController, UniverseEvent, UniverseListener, UniverseRuntimeConfig};
pub use error::TransportError;
pub use frame::UniverseFrame;
pub use transport::{ArtnetTransport, TransportMode};
