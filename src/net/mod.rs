//! Network ingress for the live audio stream

pub mod ingress;

pub use ingress::StreamIngress;
