use std::fmt;

use crate::config::ConfigError;

/// Stable failure categories shared by the binaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Configuration,
    Connection,
    Agent,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Agent => "agent",
            Self::Internal => "internal",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::Connection => 3,
            Self::Agent => 4,
            Self::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every library error so binaries can map failures to exit codes.
pub trait Classified {
    fn error_class(&self) -> ErrorClass;
}

impl Classified for ConfigError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}
