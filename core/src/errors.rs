use thiserror::Error;

/// Errors that can occur with finding the config directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Unable to find the config directory for freetunes.")]
    Config,
}

/// Errors that can occur while decoding an inbound signaling frame.
///
/// These are never fatal to a session, the frame is simply dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame is not a JSON object.")]
    NotAnObject,
    #[error("Frame marks the asset as ready but carries no locator.")]
    ReadyWithoutLocator,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_str_eq;
    use rstest::rstest;

    #[rstest]
    #[case(
        DirectoryError::Config.to_string(),
        "Unable to find the config directory for freetunes."
    )]
    #[case(ProtocolError::NotAnObject.to_string(), "Frame is not a JSON object.")]
    #[case(
        ProtocolError::ReadyWithoutLocator.to_string(),
        "Frame marks the asset as ready but carries no locator."
    )]
    fn test_error_messages(#[case] message: String, #[case] expected: &str) {
        assert_str_eq!(message, expected);
    }

    #[test]
    fn test_json_error_message() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let message = ProtocolError::from(err).to_string();
        assert!(message.starts_with("Frame is not valid JSON: "), "{message}");
    }
}
