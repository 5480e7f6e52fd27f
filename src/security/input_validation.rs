use crate::errors::{AppError, Result};

/// Validates a login cookie string before it is stored. The cookie is sent
/// verbatim as an HTTP header, so control characters are rejected outright.
pub fn validate_cookie(cookie: &str) -> Result<()> {
    if cookie.trim().is_empty() {
        return Err(AppError::Validation("Cookie cannot be empty".to_string()));
    }

    if cookie.len() > 8192 {
        return Err(AppError::Validation(
            "Cookie too long (maximum 8192 characters)".to_string(),
        ));
    }

    if cookie.chars().any(|c| c.is_control()) {
        return Err(AppError::Validation(
            "Cookie must not contain control characters".to_string(),
        ));
    }

    Ok(())
}
