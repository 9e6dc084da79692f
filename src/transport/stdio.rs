//! Standard input/output transport.
//!
//! # Important
//!
//! - **stdout**: protocol lines only, one JSON value per line
//! - **stderr**: logs, debug output (not parsed by the peer)
//! - **Never use `println!`** while a transactor owns stdout: a stray line
//!   corrupts the stream the peer is parsing

use super::Transport;

impl Transport {
    /// Transport over this process's stdin/stdout.
    ///
    /// tokio serves stdin from its blocking pool. A read already in flight
    /// when the loop stops keeps its thread until the next input or EOF
    /// arrives.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}
