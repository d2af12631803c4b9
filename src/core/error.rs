//! Purpose: Define the single error type shared by the core, the server, and the CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Stable error taxonomy; every failure a caller can observe is one of these kinds.
//! Invariants: Kind names and exit codes are stable once published; additions go at the end.
//! Invariants: Validation kinds never imply a Registry change; the previous one stays live.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Malformed,
    DuplicateName,
    InvalidDirection,
    UnknownResource,
    ResourceConflict,
    NotFound,
    Direction,
    Hardware,
    Io,
}

impl ErrorKind {
    /// True for the kinds a rejected `ApplyConfig` can report.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            ErrorKind::Malformed
                | ErrorKind::DuplicateName
                | ErrorKind::InvalidDirection
                | ErrorKind::UnknownResource
                | ErrorKind::ResourceConflict
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal",
            ErrorKind::Usage => "Usage",
            ErrorKind::Malformed => "Malformed",
            ErrorKind::DuplicateName => "DuplicateName",
            ErrorKind::InvalidDirection => "InvalidDirection",
            ErrorKind::UnknownResource => "UnknownResource",
            ErrorKind::ResourceConflict => "ResourceConflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Direction => "Direction",
            ErrorKind::Hardware => "Hardware",
            ErrorKind::Io => "Io",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "Internal" => ErrorKind::Internal,
            "Usage" => ErrorKind::Usage,
            "Malformed" => ErrorKind::Malformed,
            "DuplicateName" => ErrorKind::DuplicateName,
            "InvalidDirection" => ErrorKind::InvalidDirection,
            "UnknownResource" => ErrorKind::UnknownResource,
            "ResourceConflict" => ErrorKind::ResourceConflict,
            "NotFound" => ErrorKind::NotFound,
            "Direction" => ErrorKind::Direction,
            "Hardware" => ErrorKind::Hardware,
            "Io" => ErrorKind::Io,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    limb: Option<String>,
    resource: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            limb: None,
            resource: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn limb(&self) -> Option<&str> {
        self.limb.as_deref()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_limb(mut self, limb: impl Into<String>) -> Self {
        self.limb = Some(limb.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(limb) = &self.limb {
            write!(f, " (limb: {limb})")?;
        }
        if let Some(resource) = &self.resource {
            write!(f, " (resource: {resource})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Malformed => 3,
        ErrorKind::DuplicateName => 4,
        ErrorKind::InvalidDirection => 5,
        ErrorKind::UnknownResource => 6,
        ErrorKind::ResourceConflict => 7,
        ErrorKind::NotFound => 8,
        ErrorKind::Direction => 9,
        ErrorKind::Hardware => 10,
        ErrorKind::Io => 11,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    const ALL: [ErrorKind; 11] = [
        ErrorKind::Internal,
        ErrorKind::Usage,
        ErrorKind::Malformed,
        ErrorKind::DuplicateName,
        ErrorKind::InvalidDirection,
        ErrorKind::UnknownResource,
        ErrorKind::ResourceConflict,
        ErrorKind::NotFound,
        ErrorKind::Direction,
        ErrorKind::Hardware,
        ErrorKind::Io,
    ];

    #[test]
    fn exit_code_mapping_is_stable() {
        for (index, kind) in ALL.iter().enumerate() {
            assert_eq!(to_exit_code(*kind), index as i32 + 1);
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("Busy"), None);
    }

    #[test]
    fn only_config_failures_are_validation() {
        let validation: Vec<_> = ALL.iter().filter(|kind| kind.is_validation()).collect();
        assert_eq!(validation.len(), 5);
        assert!(!ErrorKind::NotFound.is_validation());
        assert!(!ErrorKind::Direction.is_validation());
        assert!(!ErrorKind::Hardware.is_validation());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Direction)
            .with_message("pin is output-only")
            .with_limb("red")
            .with_resource("gpio17");
        assert_eq!(
            err.to_string(),
            "Direction: pin is output-only (limb: red) (resource: gpio17)"
        );
    }
}
