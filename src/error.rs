use std::fmt;

/// Errors surfaced by the audio core.
///
/// None of these are fatal: the worst outcome of any of them is silence
/// while the host UI stays responsive.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Platform audio could not be created or resumed.
    AudioUnavailable(String),
    /// Microphone permission was refused or the input device failed.
    MicrophoneDenied(String),
    /// A note name did not resolve in the active tuning system.
    UnknownNote(String),
    /// No preset with this id exists.
    UnknownPreset(String),
    /// A configuration value was out of range or unparsable.
    InvalidConfig(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::AudioUnavailable(reason) => write!(f, "Audio unavailable: {reason}"),
            CoreError::MicrophoneDenied(reason) => write!(f, "Microphone denied: {reason}"),
            CoreError::UnknownNote(note) => write!(f, "Unknown note '{note}'"),
            CoreError::UnknownPreset(id) => write!(f, "Unknown preset '{id}'"),
            CoreError::InvalidConfig(reason) => write!(f, "Invalid config: {reason}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_value() {
        let e = CoreError::UnknownNote("H3".to_string());
        assert_eq!(e.to_string(), "Unknown note 'H3'");
    }

    #[test]
    fn json_errors_become_config_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(CoreError::from(err), CoreError::InvalidConfig(_)));
    }
}
