pub mod broadcast;

pub use broadcast::StatusBroadcaster;
