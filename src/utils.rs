pub mod datetime;
pub mod markdown;
pub mod net;
