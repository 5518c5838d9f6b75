/// Parse a store domain, accepting a pasted URL.
///
/// Strips the scheme and anything after the host, and adds
/// `.myshopify.com` to a bare shop name.
///
/// # Examples
///
/// `example`, `example.myshopify.com` and `https://example.myshopify.com/admin`
/// all become `example.myshopify.com`.
///
/// # Errors
///
/// Returns an error message for empty input or characters that can't
/// appear in a host name.
pub fn parse_store(s: &str) -> Result<String, String> {
    let trimmed = s.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if host.is_empty() {
        return Err("Store cannot be empty".to_string());
    }

    if let Some(c) = host
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '.')
    {
        return Err(format!("Store domain contains an invalid character '{}': '{}'", c, s));
    }

    if host.contains('.') {
        Ok(host)
    } else {
        Ok(format!("{host}.myshopify.com"))
    }
}
