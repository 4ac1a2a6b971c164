//! Tunnel endpoints for switchline.
//!
//! Implementations of the [`TunnelEndpoint`] abstraction consumed by the
//! client engine:
//!
//! - [`TransformEndpoint`] — in-process byte transforms (`echo`,
//!   `uppercase`, `prefix:<p>`, `suffix:<s>`) behind duplex pipes
//! - [`CommandEndpoint`] — an external process with piped stdio
//!
//! [`parse_endpoint`] turns a component spec string into a boxed
//! endpoint, for CLI-style callers.

mod command;
mod error;
mod transform;

pub use command::CommandEndpoint;
pub use error::{ComponentError, ComponentResult};
pub use transform::{Transform, TransformEndpoint};

pub use switchline_core::TunnelEndpoint;

/// Builds an endpoint from a component spec.
///
/// Recognized specs: `echo`, `uppercase`, `prefix:<p>`, `suffix:<s>`,
/// and `cmd:<program> [args...]`.
///
/// # Errors
///
/// Returns [`ComponentError::UnknownComponent`] for anything else.
pub fn parse_endpoint(spec: &str) -> ComponentResult<Box<dyn TunnelEndpoint>> {
    if let Some(command_line) = spec.strip_prefix("cmd:") {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ComponentError::UnknownComponent(spec.to_string()))?;
        let endpoint = CommandEndpoint::new(program).args(parts.map(str::to_string));
        return Ok(Box::new(endpoint));
    }
    let transform: Transform = spec.parse()?;
    Ok(Box::new(TransformEndpoint::new(transform)))
}
