pub mod allow_list;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod gatt;
pub mod types;

pub use allow_list::AllowList;
pub use config::Config;
pub use error::{Error, Result};
pub use events::{ConnectedDevice, DomainEvent};
pub use gatt::{CharacteristicProperties, GattCharacteristicRef, GattService, GattUuid};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
