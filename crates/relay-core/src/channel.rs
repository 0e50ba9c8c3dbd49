//! Channel naming rules.
//!
//! Channel names are plain identifiers. A name may carry one `!`, which marks
//! everything after it as a process-specific suffix (used for reply channels
//! created with [`ChannelLayer::new_channel`](crate::layer::ChannelLayer::new_channel)).

/// Maximum channel and group name length.
pub const MAX_NAME_LENGTH: usize = 200;

/// Separator between a channel prefix and its process-specific suffix.
pub const PROCESS_SEPARATOR: char = '!';

/// A channel identifier.
pub type ChannelId = String;

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err("Channel name too long");
    }
    let mut parts = name.splitn(2, PROCESS_SEPARATOR);
    let prefix = parts.next().unwrap_or_default();
    if prefix.is_empty() {
        return Err("Channel name needs a prefix before '!'");
    }
    if !prefix.chars().all(valid_char) {
        return Err("Channel name contains invalid characters");
    }
    if let Some(suffix) = parts.next() {
        if !suffix.chars().all(valid_char) {
            return Err("Channel name contains invalid characters");
        }
    }
    Ok(())
}

/// Validate a group name.
///
/// Group names follow the channel rules but never carry a process suffix.
///
/// # Errors
///
/// Returns an error message if the group name is invalid.
pub fn validate_group_name(name: &str) -> Result<(), &'static str> {
    if name.contains(PROCESS_SEPARATOR) {
        return Err("Group names cannot contain '!'");
    }
    validate_channel_name(name).map_err(|e| match e {
        "Channel name cannot be empty" => "Group name cannot be empty",
        "Channel name too long" => "Group name too long",
        _ => "Group name contains invalid characters",
    })
}

/// Whether the channel belongs to a single process (`prefix!suffix`).
#[must_use]
pub fn is_process_specific(name: &str) -> bool {
    name.contains(PROCESS_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("http.request").is_ok());
        assert!(validate_channel_name("websocket.receive").is_ok());
        assert!(validate_channel_name("http.response!a1B2c3").is_ok());

        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("!abc").is_err());
        assert!(validate_channel_name("has space").is_err());
        assert!(validate_channel_name("a!b!c").is_err());
        assert!(validate_channel_name("group.*").is_err());

        let long_name = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("chat-room_1").is_ok());
        assert_eq!(
            validate_group_name("room!abc"),
            Err("Group names cannot contain '!'")
        );
        assert_eq!(validate_group_name(""), Err("Group name cannot be empty"));
    }

    #[test]
    fn test_process_specific() {
        assert!(is_process_specific("http.response!xyz"));
        assert!(!is_process_specific("http.request"));
    }
}
