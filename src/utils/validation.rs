//! Input validation helpers shared by the handlers.

use serde::de::DeserializeOwned;

use crate::utils::errorhandler::AppError;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 5000;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

pub fn validate_required_text(value: &str, field: &str, max_len: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    if value.len() > max_len {
        return Err(AppError::validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            value.len()
        )));
    }
    Ok(())
}

pub fn validate_optional_text(value: &Option<String>, field: &str, max_len: usize) -> Result<(), AppError> {
    if let Some(v) = value
        && v.len() > max_len
    {
        return Err(AppError::validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            v.len()
        )));
    }
    Ok(())
}

/// Trims and lower-cases an email, rejecting anything without exactly one
/// `@` separating two non-empty parts.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    if email.len() > MAX_EMAIL_LEN {
        return Err(AppError::validation("email is too long"));
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(email)
        }
        _ => Err(AppError::validation("invalid email format")),
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Lower-case ASCII slug: alphanumerics kept, runs of anything else become
/// a single `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub fn validate_rating(rating: i32) -> Result<(), AppError> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::validation("rating must be between 1 and 5"));
    }
    Ok(())
}

/// Parses a JSON body that clients may omit entirely.
pub fn optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ana.Silva@ACME.io ").unwrap(), "ana.silva@acme.io");
        assert!(normalize_email("ana.acme.io").is_err());
        assert!(normalize_email("@acme.io").is_err());
        assert!(normalize_email("ana@").is_err());
        assert!(normalize_email("a@b@c").is_err());
        assert!(normalize_email("an a@acme.io").is_err());
    }

    #[test]
    fn test_password_bounds() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Blue  Ocean, Ltd. "), "blue-ocean-ltd");
        assert_eq!(slugify("--x--"), "x");
    }

    #[test]
    fn test_required_text() {
        assert!(validate_required_text("  ", "title", 10).is_err());
        assert!(validate_required_text("Engineer", "title", 10).is_ok());
        assert!(validate_required_text("Senior Engineer", "title", 10).is_err());
        assert!(validate_optional_text(&None, "notes", 3).is_ok());
        assert!(validate_optional_text(&Some("long".into()), "notes", 3).is_err());
    }

    #[derive(serde::Deserialize, Default)]
    struct Notes {
        notes: Option<String>,
    }

    #[test]
    fn test_optional_body() {
        let empty: Notes = optional_body(b"").unwrap();
        assert!(empty.notes.is_none());
        let blank: Notes = optional_body(b"  \n").unwrap();
        assert!(blank.notes.is_none());
        let given: Notes = optional_body(br#"{"notes":"remote today"}"#).unwrap();
        assert_eq!(given.notes.as_deref(), Some("remote today"));
        assert!(optional_body::<Notes>(b"{notes").is_err());
    }

    #[test]
    fn test_rating() {
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(3).is_ok());
        assert!(validate_rating(6).is_err());
    }
}
