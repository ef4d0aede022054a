mod flight;
pub mod key;

pub use flight::FlightCache;
