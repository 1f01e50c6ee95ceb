//! Stamps `pwm-play --version` with the source revision and the build day.

use std::env;
use std::process::Command;

use time::{Date, OffsetDateTime};

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    println!("cargo:rustc-env=PWM_PLAY_REVISION={}", revision());
    println!("cargo:rustc-env=PWM_PLAY_BUILD_DAY={}", build_day());
}

/// `git describe` output, or `unknown` outside a checkout.
fn revision() -> String {
    let out = match Command::new("git").args(["describe", "--always", "--dirty"]).output() {
        Ok(out) if out.status.success() => out.stdout,
        _ => return "unknown".into(),
    };
    match String::from_utf8(out) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_owned(),
        _ => "unknown".into(),
    }
}

/// Calendar day in UTC, honoring `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_day() -> Date {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
        .date()
}
