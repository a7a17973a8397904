// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Semantic field classes.
//!
//! The `is_*` predicates are used directly on path parameters; the
//! `validate_*` wrappers plug them into `#[validate(custom(...))]`.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use validator::ValidationError;

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url regex is valid"));

static DANGEROUS_HTML: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<script[^>]*>",
        r"(?i)<iframe[^>]*>",
        r"(?i)<object[^>]*>",
        r"(?i)<embed[^>]*>",
        r"(?i)<form[^>]*>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)on(load|error|click|mouseover)\s*=",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("html pattern is valid"))
    .collect()
});

pub const MAX_URL_LEN: usize = 2048;
pub const MIN_PASSWORD_LEN: usize = 8;

/// 3-50 chars of `[a-z0-9-]`, no leading, trailing or doubled hyphen.
pub fn is_valid_slug(slug: &str) -> bool {
    (3..=50).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
}

/// 24 hex characters.
pub fn is_valid_object_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Digits only once spaces, dashes, parentheses and a leading `+` are removed;
/// 10-15 digits.
pub fn is_valid_phone(phone: &str) -> bool {
    let trimmed = phone.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_valid_url(url: &str) -> bool {
    !url.is_empty() && url.len() <= MAX_URL_LEN && URL_REGEX.is_match(url)
}

/// True when no script-capable markup is present.
pub fn is_safe_html(text: &str) -> bool {
    !DANGEROUS_HTML.iter().any(|re| re.is_match(text))
}

fn class(ok: bool, code: &'static str, message: &'static str) -> Result<(), ValidationError> {
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new(code).with_message(Cow::Borrowed(message)))
    }
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    class(
        is_valid_slug(slug),
        "slug",
        "must be 3-50 lowercase letters, digits or single hyphens, not starting or ending with a hyphen",
    )
}

pub fn validate_object_id(id: &str) -> Result<(), ValidationError> {
    class(
        is_valid_object_id(id),
        "object_id",
        "must be a 24-character hex identifier",
    )
}

pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    class(
        is_valid_phone(phone),
        "phone",
        "must be a phone number with 10-15 digits",
    )
}

pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    class(is_valid_url(url), "url", "must be an http(s) URL")
}

pub fn validate_safe_html(text: &str) -> Result<(), ValidationError> {
    class(is_safe_html(text), "safe_html", "contains disallowed markup")
}

/// Password strength: length, upper, lower, digit and symbol.
pub fn check_password_strength(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err("Password must contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err("Password must contain a symbol");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_length_boundaries() {
        assert!(!is_valid_slug("ab"));
        assert!(is_valid_slug("abc"));
        assert!(is_valid_slug(&"a".repeat(50)));
        assert!(!is_valid_slug(&"a".repeat(51)));
    }

    #[test]
    fn slug_hyphen_rules() {
        assert!(is_valid_slug("ana-and-ben-2026"));
        assert!(!is_valid_slug("--bad"));
        assert!(!is_valid_slug("bad-"));
        assert!(!is_valid_slug("ana--ben"));
        assert!(!is_valid_slug("Ana-Ben"));
        assert!(!is_valid_slug("ana_ben"));
        assert!(!is_valid_slug("ana ben"));
    }

    #[test]
    fn object_ids_are_24_hex() {
        assert!(is_valid_object_id("507f1f77bcf86cd799439011"));
        assert!(is_valid_object_id("507F1F77BCF86CD799439011"));
        assert!(!is_valid_object_id("507f1f77bcf86cd79943901"));
        assert!(!is_valid_object_id("507f1f77bcf86cd79943901z"));
    }

    #[test]
    fn phone_normalization() {
        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert!(is_valid_phone("5551234567"));
        assert!(!is_valid_phone("555-1234"));
        assert!(!is_valid_phone("+1 555 123 4567 ext 9"));
        assert!(!is_valid_phone("1234567890123456"));
    }

    #[test]
    fn url_shape() {
        assert!(is_valid_url("https://ana-and-ben.example.com/story"));
        assert!(is_valid_url("http://example.com"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("https://"));
        assert!(!is_valid_url("https://exa mple.com"));
        assert!(!is_valid_url(&format!("https://e.com/{}", "a".repeat(2048))));
    }

    #[test]
    fn dangerous_markup_is_rejected() {
        assert!(is_safe_html("<p>We can't wait to <b>celebrate</b>!</p>"));
        assert!(!is_safe_html("<SCRIPT>alert(1)</SCRIPT>"));
        assert!(!is_safe_html("<iframe src=x>"));
        assert!(!is_safe_html("<a href=\"javascript:alert(1)\">x</a>"));
        assert!(!is_safe_html("<img src=x onerror=alert(1)>"));
        assert!(!is_safe_html("<div onclick = go()>"));
        assert!(!is_safe_html("<form action=/steal>"));
    }

    #[test]
    fn password_strength() {
        assert!(check_password_strength("Valid#1234").is_ok());
        assert!(check_password_strength("Sh#1").is_err());
        assert!(check_password_strength("lowercase#123").is_err());
        assert!(check_password_strength("NoDigits#here").is_err());
        assert!(check_password_strength("NoSymbol1234").is_err());
    }

    #[test]
    fn custom_validators_carry_class_codes() {
        assert!(validate_slug("ana-and-ben").is_ok());
        let err = validate_slug("--bad").unwrap_err();
        assert_eq!(err.code, "slug");
        assert!(err.message.is_some());

        assert_eq!(validate_object_id("xyz").unwrap_err().code, "object_id");
        assert_eq!(validate_phone("12").unwrap_err().code, "phone");
        assert_eq!(validate_url("ftp://x.y").unwrap_err().code, "url");
        assert_eq!(
            validate_safe_html("<script>x</script>").unwrap_err().code,
            "safe_html"
        );
    }
}
