use thiserror::Error;

/// HTTP-style status codes spoken by the document store.
///
/// Every public operation resolves to one of these; anything ≥ 300 is an
/// error outcome and rolls back the enclosing write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// Successful read, update, or deletion.
    Ok = 200,
    /// A new revision was stored.
    Created = 201,
    /// Malformed input: missing document id, ungrammatical revision id,
    /// unparseable JSON body.
    BadRequest = 400,
    /// Credentials missing or rejected (reserved for validators).
    Unauthorized = 401,
    /// A validator refused the revision.
    Forbidden = 403,
    /// No such document or revision.
    NotFound = 404,
    /// Stale or missing previous revision, or a live leaf in the way.
    Conflict = 409,
    /// A precondition supplied by the caller did not hold.
    PreconditionFailed = 412,
    /// The storage engine reported an error.
    ServerError = 500,
}

impl Status {
    /// Numeric code on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether this status reports success (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        (self as u16) < 300
    }

    /// Whether this status aborts a write (≥ 300).
    #[must_use]
    pub const fn is_error(self) -> bool {
        !self.is_success()
    }

    /// Map a numeric code back onto a known status.
    ///
    /// Unknown error codes collapse to `ServerError`; unknown success codes
    /// collapse to `Ok`.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            200 => Self::Ok,
            201 => Self::Created,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            412 => Self::PreconditionFailed,
            500 => Self::ServerError,
            other => {
                if other < 300 {
                    Self::Ok
                } else {
                    Self::ServerError
                }
            }
        }
    }
}

/// Primary error type for GraftDB operations.
///
/// Structured variants for the common cases, with a [`GraftError::status`]
/// mapping onto the HTTP-style codes the rest of the system speaks.
#[derive(Error, Debug)]
pub enum GraftError {
    /// Malformed request: a structural precondition on the input failed.
    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    /// A revision identifier that does not match `<generation>-<digest>`.
    #[error("bad revision id: '{revid}'")]
    BadRevisionId { revid: String },

    /// A document body failed to parse or serialize as a JSON object.
    #[error("bad JSON body: {detail}")]
    BadJson { detail: String },

    /// No such document, revision, or attachment.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A write raced a newer revision, or tried to revive a live document.
    #[error("revision conflict")]
    Conflict,

    /// A registered validator refused the revision.
    ///
    /// The status defaults to 403 but a validator may substitute any error
    /// code through its context.
    #[error("revision rejected ({}): {message}", .status.code())]
    Rejected { status: Status, message: String },

    /// The storage engine reported an error.
    ///
    /// `code` is the engine's extended result code when one was reported.
    #[error("storage failure: {message}")]
    Storage { code: Option<i32>, message: String },

    /// Filesystem error on the database file or attachment directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored schema version belongs to a future incompatible release.
    #[error("database schema version {version} is too new to open")]
    SchemaTooNew { version: i32 },

    /// A stored row failed to decode.
    #[error("corrupt row: {detail}")]
    CorruptRow { detail: String },
}

impl GraftError {
    /// Map this error to its HTTP-style status.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::BadRequest { .. } | Self::BadRevisionId { .. } | Self::BadJson { .. } => {
                Status::BadRequest
            }
            Self::NotFound { .. } => Status::NotFound,
            Self::Conflict => Status::Conflict,
            Self::Rejected { status, .. } => *status,
            Self::Storage { .. }
            | Self::Io(_)
            | Self::SchemaTooNew { .. }
            | Self::CorruptRow { .. } => Status::ServerError,
        }
    }

    /// Whether this error means "the row simply is not there".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create a bad-request error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// Create a bad-JSON error.
    pub fn bad_json(detail: impl Into<String>) -> Self {
        Self::BadJson {
            detail: detail.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a validator rejection with the default 403 status.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: Status::Forbidden,
            message: message.into(),
        }
    }

    /// Create a storage failure from an engine message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            code: None,
            message: message.into(),
        }
    }

    /// Create a corrupt-row error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::CorruptRow {
            detail: detail.into(),
        }
    }
}

/// Result type alias using `GraftError`.
pub type Result<T> = std::result::Result<T, GraftError>;
