// Telescope-host web service: PHD2 bridge, guide-frame rendering and LAN discovery.

pub mod discovery;
pub mod guider;
pub mod imaging;
pub mod pipeline;
pub mod server;
pub mod shutdown_signal;
pub mod web;
