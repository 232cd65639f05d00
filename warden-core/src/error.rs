/// Errors produced by the `warden-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A VM name was empty or contained characters the backend rejects.
    #[error("invalid VM name {name:?}: {reason}")]
    InvalidVmName { name: String, reason: String },

    /// The host's initialization data could not be read or decoded.
    #[error("init data unavailable: {reason}")]
    InitData { reason: String },

    /// A logical file name could not be mapped to a physical path.
    #[error("cannot resolve logical file '{name}'")]
    UnresolvedFile { name: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
