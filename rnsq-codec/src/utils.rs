macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

const MAX_NAME_LENGTH: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// A topic name is 1-64 characters of `[.a-zA-Z0-9_-]`, optionally suffixed with `#ephemeral`.
#[inline]
pub fn is_valid_topic_name(name: &str) -> bool {
    is_valid_name(name)
}

/// Channel names follow the same rules as topic names.
#[inline]
pub fn is_valid_channel_name(name: &str) -> bool {
    is_valid_name(name)
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    !base.is_empty() && base.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

#[inline]
pub(crate) fn check_name(name: &str) -> Result<(), crate::error::EncodeError> {
    ensure!(is_valid_name(name), crate::error::EncodeError::InvalidName(name.to_owned()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert!(is_valid_topic_name("test"));
        assert!(is_valid_topic_name("orders.v1_created-2"));
        assert!(is_valid_channel_name("reader#ephemeral"));
        assert!(is_valid_topic_name(&"a".repeat(64)));

        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("#ephemeral"));
        assert!(!is_valid_topic_name("with space"));
        assert!(!is_valid_topic_name("slash/topic"));
        assert!(!is_valid_channel_name(&"a".repeat(65)));
        assert!(!is_valid_channel_name("reader#other"));
    }
}
