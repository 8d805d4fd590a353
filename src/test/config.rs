#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        temp_env::with_vars_unset(
            ["RECORDS_DEBUG", "RECORDS_SESSION_TTL_HOURS", "RECORDS_MAX_PAGE_LENGTH"],
            || {
                let config = AppConfig::from_figment(&AppConfig::figment()).unwrap();
                assert_eq!(config, AppConfig::default());
            },
        );
    }

    #[test]
    #[serial]
    fn test_prefixed_environment_overrides() {
        temp_env::with_vars(
            [
                ("RECORDS_DEBUG", Some("true")),
                ("RECORDS_SESSION_TTL_HOURS", Some("2")),
                ("RECORDS_MAX_PAGE_LENGTH", Some("50")),
            ],
            || {
                let config = AppConfig::from_figment(&AppConfig::figment()).unwrap();
                assert!(config.debug);
                assert_eq!(config.session_ttl_hours, 2);
                assert_eq!(config.max_page_length, 50);
            },
        );
    }

    #[test]
    #[serial]
    fn test_unparseable_value_is_an_error() {
        temp_env::with_var("RECORDS_MAX_PAGE_LENGTH", Some("lots"), || {
            assert!(AppConfig::from_figment(&AppConfig::figment()).is_err());
        });
    }
}
