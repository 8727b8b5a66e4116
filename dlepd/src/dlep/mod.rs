pub mod inst;
pub use inst::{Dlep, DlepTop, Message, peer_id_from_endpoint, serve};

pub mod client;
pub use client::{ClientChannel, ClientCommand, ClientEvent};

pub mod config;
pub use config::DlepConfig;

pub mod infobase;
pub mod peer;
pub mod timer;
pub mod tracing;
pub mod transaction;
