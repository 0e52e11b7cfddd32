//! Environment layering of the configuration loader.
//!
//! These tests mutate process environment variables and therefore run
//! serially.

use std::time::Duration;

use clap::Parser;
use serial_test::serial;
use tagstash::config::{self, CacheBackendKind, CliArgs, LoadError};

fn flush_all_args(extra: &[&str]) -> CliArgs {
    let mut argv = vec!["tagstash", "cache:flush-all"];
    argv.extend_from_slice(extra);
    CliArgs::try_parse_from(argv).expect("arguments should parse")
}

struct EnvGuard(&'static [&'static str]);

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for name in self.0 {
            // SAFETY: tests touching the environment are serialised.
            unsafe { std::env::remove_var(name) };
        }
    }
}

fn set_env(pairs: &'static [(&'static str, &'static str)]) -> EnvGuard {
    static NAMES: &[&str] = &[
        "TAGSTASH__CACHE__BACKEND",
        "TAGSTASH__CACHE__REDIS_URL",
        "TAGSTASH__CACHE__DEFAULT_TTL_SECONDS",
        "TAGSTASH__APP__NAMESPACE",
    ];
    for (name, value) in pairs {
        // SAFETY: tests touching the environment are serialised.
        unsafe { std::env::set_var(name, value) };
    }
    EnvGuard(NAMES)
}

#[test]
#[serial]
fn environment_overrides_file_defaults() {
    let _guard = set_env(&[
        ("TAGSTASH__CACHE__DEFAULT_TTL_SECONDS", "30"),
        ("TAGSTASH__APP__NAMESPACE", "shop"),
    ]);

    let settings = config::load(&flush_all_args(&[])).expect("settings load");
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(30));
    assert_eq!(settings.app.namespace, "shop");
}

#[test]
#[serial]
fn command_flags_override_environment() {
    let _guard = set_env(&[
        ("TAGSTASH__CACHE__BACKEND", "redis"),
        ("TAGSTASH__CACHE__REDIS_URL", "redis://env-host/"),
    ]);

    let settings = config::load(&flush_all_args(&["--cache-backend", "memory"]))
        .expect("settings load");
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);

    let settings = config::load(&flush_all_args(&["--redis-url", "redis://cli-host/"]))
        .expect("settings load");
    assert_eq!(
        settings.cache.backend,
        CacheBackendKind::Redis {
            url: "redis://cli-host/".to_string()
        }
    );
}

#[test]
#[serial]
fn invalid_environment_values_are_reported() {
    let _guard = set_env(&[("TAGSTASH__CACHE__BACKEND", "memcached")]);

    let err = config::load(&flush_all_args(&[])).expect_err("unknown backend");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.backend",
            ..
        }
    ));
}
