//! Connection resolution and authentication probing

mod probe;
mod resolver;

pub use probe::{AuthProbe, CliAuthProbe, ProbeOutcome, extract_version, is_secret_key};
pub use resolver::{ConnectionOverrides, ConnectionResolver, EnvConnectionResolver};
