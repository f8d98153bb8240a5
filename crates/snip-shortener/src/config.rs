use clap::Args;
use jiff::SignedDuration;
use snip_core::DEFAULT_TOKEN_LIFETIME;
use typed_builder::TypedBuilder;

pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const TOKEN_LIFETIME_HOURS_ENV: &str = "SNIP_TOKEN_LIFETIME_HOURS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
pub const DEFAULT_TOKEN_LIFETIME_HOURS: u32 = 24;
pub const DEFAULT_MAX_GENERATE_ATTEMPTS: usize = 8;

/// Settings of a [`ShortenerService`](crate::ShortenerService).
#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerConfig {
    /// Prefix of the absolute short URLs returned by owner listings.
    #[builder(setter(into))]
    pub base_url: String,
    /// Lifetime of a new token and of a refreshed one.
    #[builder(default = DEFAULT_TOKEN_LIFETIME)]
    pub token_lifetime: SignedDuration,
    /// Generator draws per token before giving up on collisions.
    #[builder(default = DEFAULT_MAX_GENERATE_ATTEMPTS)]
    pub max_generate_attempts: usize,
}

/// Shortener settings, meant to be flattened into a binary's CLI.
#[derive(Debug, Clone, Args)]
pub struct ShortenerArgs {
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = TOKEN_LIFETIME_HOURS_ENV,
        default_value_t = DEFAULT_TOKEN_LIFETIME_HOURS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub token_lifetime_hours: u32,
}

impl ShortenerArgs {
    pub fn into_config(self) -> ShortenerConfig {
        ShortenerConfig::builder()
            .base_url(self.base_url)
            .token_lifetime(SignedDuration::from_hours(i64::from(
                self.token_lifetime_hours,
            )))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        shortener: ShortenerArgs,
    }

    #[test]
    fn builder_defaults() {
        let config = ShortenerConfig::builder().base_url("https://s.example").build();

        assert_eq!(config.base_url, "https://s.example");
        assert_eq!(config.token_lifetime, SignedDuration::from_hours(24));
        assert_eq!(config.max_generate_attempts, DEFAULT_MAX_GENERATE_ATTEMPTS);
    }

    #[test]
    fn args_defaults() {
        let cli = Cli::try_parse_from(["snip"]).unwrap();
        let config = cli.shortener.into_config();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.token_lifetime, SignedDuration::from_hours(24));
    }

    #[test]
    fn args_override_lifetime() {
        let cli = Cli::try_parse_from([
            "snip",
            "--base-url",
            "https://s.example/",
            "--token-lifetime-hours",
            "2",
        ])
        .unwrap();
        let config = cli.shortener.into_config();

        assert_eq!(config.base_url, "https://s.example/");
        assert_eq!(config.token_lifetime, SignedDuration::from_hours(2));
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        assert!(Cli::try_parse_from(["snip", "--token-lifetime-hours", "0"]).is_err());
    }
}
