use crate::payment::parse_amount_cents;
use crate::server::response::ApiError;

const MAX_REPO_NAME_LEN: usize = 100;
/// Upper bound on a listing price, in cents.
const MAX_PRICE_CENTS: i64 = 100_000_000;

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

fn validate_name(name: &str, entity: &str, max_len: usize) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(is_valid_name_char) {
        return Err(format!(
            "{entity} name can only contain alphanumeric characters, hyphens, underscores, and periods"
        ));
    }
    Ok(())
}

pub fn validate_repo_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Repository", MAX_REPO_NAME_LEN).map_err(ApiError::bad_request)
}

/// Parses a decimal price such as `"12.5"` or `"0"` into whole cents.
pub fn parse_price_cents(raw: &str) -> Result<i64, String> {
    let cents =
        parse_amount_cents(raw).ok_or_else(|| format!("invalid price: {:?}", raw.trim()))?;
    if cents > MAX_PRICE_CENTS {
        return Err(format!("price too large: {}", raw.trim()));
    }
    Ok(cents)
}

pub fn validate_price_cents(price_cents: i64) -> Result<(), ApiError> {
    if !(0..=MAX_PRICE_CENTS).contains(&price_cents) {
        return Err(ApiError::bad_request(format!(
            "price_cents must be between 0 and {MAX_PRICE_CENTS}"
        )));
    }
    Ok(())
}
