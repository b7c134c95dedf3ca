//! Error taxonomy shared by every analysis stage.
//!
//! Each variant maps to a stable category and CLI exit code so that batch
//! drivers can tell configuration mistakes from data problems without parsing
//! message text.

pub type AnisoResult<T> = Result<T, AnisoError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InputValidation,
    IoSystem,
    Computation,
}

impl ErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InputValidation => 2,
            Self::IoSystem => 3,
            Self::Computation => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputValidation => "InputValidation",
            Self::IoSystem => "IoSystem",
            Self::Computation => "Computation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnisoError {
    /// Particle input decoded but violates the declared resolution or shape.
    #[error("particle data format invalid: {0}")]
    DataFormat(String),

    /// Particle input is missing a required named array.
    #[error("particle data missing required field '{field}'")]
    MissingField { field: String },

    /// An empty population was presented to the binning engine.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// An energy window with `lower >= upper`.
    #[error("invalid energy window: lower {lower} must be below upper {upper}")]
    InvalidWindow { lower: f64, upper: f64 },

    /// Malformed or missing job-configuration field.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("computation failed: {0}")]
    Computation(String),
}

impl AnisoError {
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat(message.into())
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::InsufficientData(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DataFormat(_)
            | Self::MissingField { .. }
            | Self::InvalidWindow { .. }
            | Self::Configuration(_) => ErrorCategory::InputValidation,
            Self::Io { .. } => ErrorCategory::IoSystem,
            Self::InsufficientData(_) | Self::Computation(_) => ErrorCategory::Computation,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.category().as_str(), self)
    }
}
