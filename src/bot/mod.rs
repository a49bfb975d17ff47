pub mod relay;
pub mod store;


pub use relay::{ChatRelay, IncomingMessage, RelaySettings, TurnOutcome};
pub use store::SessionStore;
