//! Transport layer module.

pub mod hid;
pub mod mock;
pub mod traits;

pub use hid::HidDeviceTransport;
pub use mock::MockTransport;
pub use traits::{HidTransport, TransportError};
