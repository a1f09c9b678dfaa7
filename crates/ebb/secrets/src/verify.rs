//! Empirical verification of served artifacts
//!
//! A consumer is verified only when its live bundle is fetched and a token of
//! the secret's format is found whose fingerprint equals the expected one.

use crate::fingerprint::fingerprint_str;
use crate::format::CompiledFormat;
use ebb_cloud::{poll_until, ArtifactProbe, RetryPolicy};
use ebb_types::{Fingerprint, VerificationOutcome};
use std::time::Duration;
use tracing::{debug, instrument};

/// Classify a served body
///
/// `previous` holds fingerprints of earlier rotations; finding one of them
/// (and not the expected one) means a stale artifact is being served.
pub fn inspect(
    format: &CompiledFormat,
    body: &str,
    expected: &Fingerprint,
    previous: &[Fingerprint],
) -> VerificationOutcome {
    let mut stale = None;
    for token in format.tokens(body) {
        let found = fingerprint_str(token);
        if &found == expected {
            return VerificationOutcome::Verified;
        }
        if stale.is_none() && previous.contains(&found) {
            stale = Some(found);
        }
    }

    match stale {
        Some(served) => VerificationOutcome::Stale { served },
        None => VerificationOutcome::Missing,
    }
}

/// Fetch `url` once and classify what it serves
pub async fn probe_once(
    artifacts: &dyn ArtifactProbe,
    url: &str,
    format: &CompiledFormat,
    expected: &Fingerprint,
    previous: &[Fingerprint],
) -> VerificationOutcome {
    match artifacts.fetch(url).await {
        Ok(artifact) if (200..300).contains(&artifact.status_code) => {
            inspect(format, &artifact.body, expected, previous)
        }
        Ok(artifact) => VerificationOutcome::Unreachable {
            reason: format!("HTTP {}", artifact.status_code),
        },
        Err(e) => VerificationOutcome::Unreachable {
            reason: e.to_string(),
        },
    }
}

/// Poll until the expected fingerprint is served or the budget runs out
///
/// Every attempt first waits `propagation_delay`. Returns the final outcome
/// and the number of attempts made.
#[instrument(skip(artifacts, format, expected, previous, policy), fields(expected = %expected))]
pub async fn verify_served(
    artifacts: &dyn ArtifactProbe,
    url: &str,
    format: &CompiledFormat,
    expected: &Fingerprint,
    previous: &[Fingerprint],
    policy: &RetryPolicy,
    propagation_delay: Duration,
) -> (VerificationOutcome, u32) {
    let result = poll_until(policy, "verify_served", |attempt| async move {
        tokio::time::sleep(propagation_delay).await;
        let outcome = probe_once(artifacts, url, format, expected, previous).await;
        debug!(attempt, outcome = %outcome, "Verification attempt");
        if outcome.is_verified() {
            Ok(())
        } else {
            Err(outcome)
        }
    })
    .await;

    match result {
        Ok(((), attempts)) => (VerificationOutcome::Verified, attempts),
        Err(err) => (
            err.last.unwrap_or(VerificationOutcome::Unreachable {
                reason: "verification timed out".to_string(),
            }),
            err.attempts,
        ),
    }
}
