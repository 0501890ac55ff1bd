//! Target validation and normalization.
//!
//! Every run target passes through here before a descriptor is persisted.
//! Loopback, private-range, link-local, and cloud-metadata hosts are refused
//! so the generator cannot be pointed at infrastructure surfaces, regardless
//! of any proxies in front of the service.

use std::net::Ipv4Addr;

use url::{Host, Url};

use crate::error::{CoreError, CoreResult};

/// Cloud-metadata endpoints that must never be load-tested.
const METADATA_HOSTS: [&str; 4] = [
    "169.254.169.254",
    "metadata.google.internal",
    "169.254.169.123",
    "100.100.100.200",
];

/// Validates a raw target string and returns the normalized URL to drive
/// load against.
///
/// # Errors
///
/// Returns `CoreError::TargetRejected` for empty input, unparseable URLs,
/// non-HTTP(S) schemes, and blocked hosts.
pub fn validate_target(raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::target_rejected("target cannot be empty"));
    }

    let has_scheme = trimmed.contains("://");
    let candidate = if has_scheme {
        trimmed.to_string()
    } else {
        // Tentative scheme so bare hosts parse; normalization decides the
        // real one below.
        format!("http://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|err| CoreError::target_rejected(format!("invalid target: {err}")))?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(CoreError::target_rejected(format!(
            "only http and https targets are supported, got `{scheme}`"
        )));
    }

    match parsed.host() {
        Some(host) => check_host(&host)?,
        None => {
            // e.g. "10.0.0.1:8080" shapes the url crate refuses to host-parse
            let fallback = trimmed.split(':').next().unwrap_or_default();
            if fallback.is_empty() {
                return Err(CoreError::target_rejected("target host cannot be empty"));
            }
            check_host(&Host::parse(fallback).map_err(|err| {
                CoreError::target_rejected(format!("invalid target host: {err}"))
            })?)?;
        }
    }

    Ok(normalize(trimmed, has_scheme))
}

fn check_host<S: AsRef<str>>(host: &Host<S>) -> CoreResult<()> {
    match host {
        Host::Domain(domain) => {
            let domain = domain.as_ref().to_ascii_lowercase();
            if domain.is_empty() {
                return Err(CoreError::target_rejected("target host cannot be empty"));
            }
            if domain == "localhost" {
                return Err(CoreError::target_rejected(
                    "localhost and loopback addresses are not allowed",
                ));
            }
            if METADATA_HOSTS.contains(&domain.as_str()) {
                return Err(CoreError::target_rejected(
                    "metadata service addresses are not allowed",
                ));
            }
            Ok(())
        }
        Host::Ipv4(addr) => check_ipv4(*addr),
        Host::Ipv6(addr) => {
            if addr.is_loopback() {
                return Err(CoreError::target_rejected(
                    "localhost and loopback addresses are not allowed",
                ));
            }
            Ok(())
        }
    }
}

fn check_ipv4(addr: Ipv4Addr) -> CoreResult<()> {
    if addr.is_loopback() {
        return Err(CoreError::target_rejected(
            "localhost and loopback addresses are not allowed",
        ));
    }
    if addr.is_private() {
        return Err(CoreError::target_rejected(
            "private addresses are not allowed",
        ));
    }
    if addr.is_link_local() {
        return Err(CoreError::target_rejected(
            "link-local addresses are not allowed",
        ));
    }
    if METADATA_HOSTS.contains(&addr.to_string().as_str()) {
        return Err(CoreError::target_rejected(
            "metadata service addresses are not allowed",
        ));
    }
    Ok(())
}

/// Normalization rules: an explicit scheme is kept verbatim; a host with a
/// port but no scheme gets plain `http://`; bare private-shaped hosts get
/// `http://` (they rarely terminate TLS); everything else defaults to
/// `https://` so public hosts are not accidentally downgraded.
fn normalize(trimmed: &str, has_scheme: bool) -> String {
    if has_scheme {
        return trimmed.to_string();
    }
    if trimmed.contains(':') {
        return format!("http://{trimmed}");
    }
    if looks_private(trimmed) {
        return format!("http://{trimmed}");
    }
    format!("https://{trimmed}")
}

fn looks_private(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<Ipv4Addr>() {
        Ok(addr) => addr.is_private() || addr.is_loopback() || addr.is_link_local(),
        Err(_) => false,
    }
}
