/**
 * Local ICE credentials, see RFC 5245 Section 15.4
 *
 * The username fragment must carry at least 24 bits of randomness and the
 * password at least 128, both drawn from the ice-char set. Alphanumerics
 * are a subset of ice-char.
 */
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const USERNAME_FRAGMENT_LENGTH: usize = 4;
pub const PASSWORD_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCredentials {
    pub username_fragment: String,
    pub password: String,
}

impl LocalCredentials {
    pub fn generate() -> Self {
        Self {
            username_fragment: random_ice_chars(USERNAME_FRAGMENT_LENGTH),
            password: random_ice_chars(PASSWORD_LENGTH),
        }
    }
}

fn random_ice_chars(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let creds = LocalCredentials::generate();
        assert_eq!(creds.username_fragment.len(), 4);
        assert_eq!(creds.password.len(), 24);
        assert!(creds.username_fragment.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(creds.password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_is_random() {
        let a = LocalCredentials::generate();
        let b = LocalCredentials::generate();
        assert_ne!(a.password, b.password);
    }
}
