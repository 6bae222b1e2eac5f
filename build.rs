//! Build script for the authgate crate.
//!
//! Loads identity provider settings at compile time so that
//! `IdentityConfig::from_env()` can read them through `option_env!()`.
//!
//! Priority order:
//! 1. Environment variables already set (e.g., from CI/CD, system env)
//! 2. Variables from `.env` file (if it exists)
//! 3. Variables from `.env.example` file (fallback for CI builds)

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-changed=.env.example");
    for var in REQUIRED_VARS.iter().chain(OPTIONAL_VARS) {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let env_file = manifest_dir.join(".env");
    let env_example_file = manifest_dir.join(".env.example");

    let env_vars_set = REQUIRED_VARS
        .iter()
        .filter(|&var| env::var(var).is_ok())
        .count();

    let (file_to_load, file_description) = if env_file.exists() {
        (Some(env_file), ".env")
    } else if env_vars_set == 0 && env_example_file.exists() {
        (Some(env_example_file), ".env.example (fallback)")
    } else {
        (None, "")
    };

    if let Some(file_path) = file_to_load {
        println!(
            "cargo:warning=Found {} file, loading identity provider configuration (environment variables take priority)",
            file_description
        );

        let contents = fs::read_to_string(&file_path).expect("Failed to read env file");

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                // Only forward our own keys; the file may carry unrelated settings.
                let known = REQUIRED_VARS.contains(&key) || OPTIONAL_VARS.contains(&key);
                if known && env::var(key).is_err() {
                    println!("cargo:rustc-env={}={}", key, value);
                }
            }
        }
    } else if env_vars_set > 0 {
        println!(
            "cargo:warning=Using identity provider configuration from environment variables ({}/{} set)",
            env_vars_set,
            REQUIRED_VARS.len()
        );
    }
}

const REQUIRED_VARS: &[&str] = &["IDENTITY_API_KEY", "IDENTITY_AUTH_DOMAIN", "IDENTITY_PROJECT_ID"];
const OPTIONAL_VARS: &[&str] = &["IDENTITY_APP_ID"];
