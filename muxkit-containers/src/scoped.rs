//! Scoped muxer usage that always reaches close.

use crate::traits::{Muxer, MuxerFactory};
use muxkit_core::error::Error;
use std::path::Path;
use tracing::warn;

/// Create a muxer for `path`, run `f` with it, then close it.
///
/// Close is called on every path, including when `f` fails. If `f`
/// fails its error is returned and a close failure is only logged;
/// otherwise the close result decides the outcome.
pub fn with_muxer<F, T, E>(factory: &dyn MuxerFactory, path: &Path, f: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn Muxer) -> Result<T, E>,
    E: From<Error>,
{
    let mut muxer = factory.create(path).map_err(|e| E::from(Error::from(e)))?;
    let result = f(muxer.as_mut());
    let closed = muxer.close();

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(E::from(Error::from(e))),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!(
                path = %path.display(),
                error = %close_error,
                "Failed to close muxer after an earlier error"
            );
            Err(e)
        }
    }
}
