use secrecy::SecretString;

/// Configuration shared across the server, assembled once at startup from the
/// CLI/environment. Business logic never reads the environment directly.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub jwt_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub rate_limit_points: u32,
    pub sensitive_rate_limit_points: u32,
    pub rate_limit_window_seconds: u64,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_seconds: 60 * 60,
            refresh_token_ttl_seconds: 7 * 24 * 60 * 60,
            rate_limit_points: 10,
            sensitive_rate_limit_points: 1,
            rate_limit_window_seconds: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(SecretString::from("sekret".to_string()));
        assert_eq!(args.jwt_secret.expose_secret(), "sekret");
        assert_eq!(args.access_token_ttl_seconds, 3600);
        assert_eq!(args.refresh_token_ttl_seconds, 604_800);
        assert_eq!(args.rate_limit_points, 10);
        assert_eq!(args.sensitive_rate_limit_points, 1);
        assert_eq!(args.rate_limit_window_seconds, 1);
    }
}
