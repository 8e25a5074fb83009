use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;

/// The error type shared by all parsing and making operations.
///
/// Recoverable anomalies are reported through [`Diagnostics`](crate::diag::Diagnostics)
/// instead; an `Error` is only returned when an operation cannot continue.
#[derive(Debug)]
pub enum Error {
    /// The underlying stream failed to read, write, or seek.
    Io(io::Error),
    /// A declared size exceeds the bytes actually available.
    TruncatedData,
    /// A signature or structure did not match the format.
    InvalidData,
    /// The tag or container version is not supported.
    VersionNotSupported,
    /// A text or Base64 conversion failed.
    Conversion,
    /// A progress callback requested cancellation.
    Aborted,
    /// The requested structure is not present.
    NotFound,
}

impl Error {
    /// Whether this error came from the underlying stream. Stream errors are
    /// never swallowed during best-effort parsing.
    pub(crate) fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::TruncatedData => write![f, "data is truncated"],
            Self::InvalidData => write![f, "data is invalid"],
            Self::VersionNotSupported => write![f, "version is not supported"],
            Self::Conversion => write![f, "conversion failed"],
            Self::Aborted => write![f, "operation aborted"],
            Self::NotFound => write![f, "not found"],
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        let error = match self {
            Self::Io(err) => err,
            _ => return None,
        };

        Some(error)
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Error::Io(other)
    }
}

/// The result type shared by all parsing and making operations.
pub type Result<T> = std::result::Result<T, Error>;
