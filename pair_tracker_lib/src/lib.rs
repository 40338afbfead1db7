pub mod api;
pub mod comms;
pub mod location_sample;
pub mod partner;
pub mod permission;
pub mod settings;
