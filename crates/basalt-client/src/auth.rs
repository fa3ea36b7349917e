use crate::connection::Connection;
use crate::error::Error;

/// Pluggable authentication seam.
///
/// Runs a negotiated command sequence on a freshly opened connection and
/// must report success before the connection enters the pool's rotation.
/// Mechanisms themselves (challenge-response, SASL, x.509) live outside
/// this crate.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, connection: &Connection) -> Result<(), Error>;
}

/// The default: no credentials, every connection is accepted as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, _connection: &Connection) -> Result<(), Error> {
        Ok(())
    }
}
