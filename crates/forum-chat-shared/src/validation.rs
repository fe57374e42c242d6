use crate::constants::{MAX_MESSAGE_CHARS, MAX_USERNAME_CHARS, MIN_USERNAME_CHARS};
use crate::error::ValidationError;

/// Check outbound message content. Returns the content to send.
pub fn validate_content(content: &str) -> Result<&str, ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(content)
}

pub fn validate_username(username: &str) -> Result<&str, ValidationError> {
    let username = username.trim();
    let len = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(ValidationError::InvalidUsername {
            min: MIN_USERNAME_CHARS,
            max: MAX_USERNAME_CHARS,
        });
    }
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_rules() {
        assert_eq!(validate_content("hello"), Ok("hello"));
        assert_eq!(validate_content("   \n"), Err(ValidationError::EmptyContent));
        assert!(validate_content(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert_eq!(
            validate_content(&"x".repeat(MAX_MESSAGE_CHARS + 1)),
            Err(ValidationError::ContentTooLong {
                len: MAX_MESSAGE_CHARS + 1,
                max: MAX_MESSAGE_CHARS
            })
        );
    }

    #[test]
    fn test_username_rules() {
        assert_eq!(validate_username(" bob "), Ok("bob"));
        assert!(validate_username("b").is_err());
        assert!(validate_username(&"b".repeat(31)).is_err());
    }
}
