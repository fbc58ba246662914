use std::io;

use thiserror::Error;

/// Errors reported by the CRF engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A buffer could not be grown to the requested capacity.
    #[error("out of memory")]
    OutOfMemory,
    /// The model file has a bad magic, type tag, version or layout.
    #[error("incompatible model: {0}")]
    IncompatibleModel(String),
    /// The API was driven in an order it does not support.
    #[error("internal logic error: {0}")]
    InternalLogic(String),
    /// The objective became NaN or infinite during optimization.
    #[error("overflow: the objective value is not finite")]
    Overflow,
    #[error("not found")]
    NotFound,
    #[error("not supported")]
    NotSupported,
    /// Training data was rejected.
    #[error("{0}")]
    InvalidInput(String),
    /// A named parameter was given a value it cannot accept.
    #[error("{0}")]
    InvalidParameter(String),
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Allocates a zero-filled vector, reporting allocation failure instead of aborting.
pub(crate) fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.resize(len, T::default());
    Ok(v)
}

/// Grows `v` to at least `len` elements without shrinking it.
pub(crate) fn grow<T: Clone + Default>(v: &mut Vec<T>, len: usize) -> Result<()> {
    if v.len() < len {
        v.try_reserve_exact(len - v.len())
            .map_err(|_| Error::OutOfMemory)?;
        v.resize(len, T::default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_never_shrinks() {
        let mut v: Vec<f64> = zeroed(8).unwrap();
        grow(&mut v, 4).unwrap();
        assert_eq!(v.len(), 8);
        grow(&mut v, 16).unwrap();
        assert_eq!(v.len(), 16);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidParameter("c1 must be non-negative".to_string());
        assert_eq!(err.to_string(), "c1 must be non-negative");
        let err = Error::UnknownParameter("foo".to_string());
        assert!(err.to_string().contains("unknown parameter"));
    }
}
