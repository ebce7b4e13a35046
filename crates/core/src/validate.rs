//! Request input validation.

/// Validate an S3 bucket name.
///
/// Rules (the DNS-compatible subset): 3-63 characters, lowercase letters,
/// digits, dots and hyphens, starting and ending with a letter or digit,
/// and not formatted like an IP address.
pub fn bucket_name(name: &str) -> crate::Result<()> {
    let err = |msg: &str| Err(crate::Error::InvalidBucketName(format!("{name:?}: {msg}")));

    if name.len() < 3 || name.len() > 63 {
        return err("must be between 3 and 63 characters");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return err("may only contain lowercase letters, digits, dots and hyphens");
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return err("must start and end with a letter or digit");
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return err("dots must be surrounded by letters or digits");
    }
    if name.split('.').count() == 4 && name.split('.').all(|p| p.parse::<u8>().is_ok()) {
        return err("must not be formatted like an IP address");
    }
    Ok(())
}

/// Validate an object key: non-empty and at most 1024 bytes, per the S3 limit.
pub fn object_key(key: &str) -> crate::Result<()> {
    if key.is_empty() {
        return Err(crate::Error::InvalidArgument("empty object key".into()));
    }
    if key.len() > 1024 {
        return Err(crate::Error::InvalidArgument(format!(
            "object key exceeds 1024 bytes ({})",
            key.len()
        )));
    }
    Ok(())
}
