//! Command-line interface definition.

use std::time::Duration;

use clap::{Parser, Subcommand};

/// switchline - call endpoints through the exchange
#[derive(Debug, Parser)]
#[command(name = "switchline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Exchange URL (tcp://host:port)
    #[arg(long, short, env = "SWITCHLINE_URL", default_value = "tcp://127.0.0.1:9070")]
    pub url: String,

    /// Enable debug output
    #[arg(long, short)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register an address and answer inbound calls
    Serve {
        /// Address to register (local@domain)
        #[arg(long, short)]
        address: String,

        /// Tunnel component for inbound calls: echo, uppercase,
        /// prefix:<p>, suffix:<s>, or cmd:<program>. Without one,
        /// inbound text messages are echoed back.
        #[arg(long, short)]
        component: Option<String>,
    },

    /// Dial an address, send one message, print the reply
    Dial {
        /// Destination address (local@domain)
        #[arg(long, short)]
        to: String,

        /// Message to send after the call connects
        #[arg(long, short, default_value = "ping")]
        message: String,

        /// Seconds to wait for the dial and the reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

impl Cli {
    /// Reply/dial deadline for the `dial` command.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        match &self.command {
            Command::Dial { timeout, .. } => Duration::from_secs(*timeout),
            Command::Serve { .. } => Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_command() {
        let cli = Cli::parse_from([
            "switchline",
            "--url",
            "tcp://127.0.0.1:9999",
            "serve",
            "--address",
            "echo@example.com",
            "--component",
            "uppercase",
        ]);
        assert_eq!(cli.url, "tcp://127.0.0.1:9999");
        match cli.command {
            Command::Serve { address, component } => {
                assert_eq!(address, "echo@example.com");
                assert_eq!(component.as_deref(), Some("uppercase"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_dial_command_with_defaults() {
        let cli = Cli::parse_from(["switchline", "dial", "--to", "echo@example.com"]);
        match cli.command {
            Command::Dial {
                to,
                message,
                timeout,
            } => {
                assert_eq!(to, "echo@example.com");
                assert_eq!(message, "ping");
                assert_eq!(timeout, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
