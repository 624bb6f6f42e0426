pub(crate) mod dht22;
pub(crate) mod replay;
pub(crate) mod sensor;
pub(crate) mod simulated;

pub use dht22::Dht22;
pub use replay::ReplaySource;
pub use sensor::{Sensor, SensorError};
pub use simulated::Simulated;
