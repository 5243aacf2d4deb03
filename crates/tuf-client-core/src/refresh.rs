//! Timestamp, snapshot and targets refresh.
//!
//! Each role is fetched only after the previous one was accepted, and every
//! candidate goes through the same gate: signatures, type and spec version,
//! rollback, expiry, then the integrity pin declared by the role above it.
//! The refresher mutates the state it is given; callers hand it a staged copy
//! and discard that copy on error.

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::metadata::{
    IntegrityMismatch, MetaFile, RoleBody, RoleName, SignedEnvelope, SnapshotBody, TargetsBody, TimestampBody,
    SNAPSHOT_FILE, TARGETS_FILE,
};
use crate::transport::{fetch_with_timeout, FetchRequest, MetadataTransport, TransportError};
use crate::trust::{decode_body, TrustState, TrustedMetadata};

/// Refreshes the top-level roles below root.
pub struct TopLevelRefresher<'a> {
    transport: &'a dyn MetadataTransport,
    config: &'a UpdaterConfig,
    clock: &'a dyn Clock,
}

impl<'a> TopLevelRefresher<'a> {
    pub fn new(
        transport: &'a dyn MetadataTransport,
        config: &'a UpdaterConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            transport,
            config,
            clock,
        }
    }

    /// Runs timestamp, snapshot and targets updates in order.
    pub async fn refresh(&self, state: &mut TrustState) -> Result<(), UpdateError> {
        let now = self.clock.now();
        self.update_timestamp(state, now).await?;
        self.update_snapshot(state, now).await?;
        self.update_targets(state, now).await?;
        Ok(())
    }

    async fn update_timestamp(
        &self,
        state: &mut TrustState,
        now: DateTime<Utc>,
    ) -> Result<(), UpdateError> {
        let request = FetchRequest {
            role: RoleName::Timestamp,
            version: None,
            max_length: self.config.max_lengths.timestamp,
        };
        let (envelope, _) = self.fetch_envelope(&request).await?;
        state.root.verify_role(RoleName::Timestamp, &envelope)?;
        let body: TimestampBody = decode_body(&envelope)?;
        let Some(pin) = body.snapshot_pin() else {
            return Err(UpdateError::Invalid {
                role: RoleName::Timestamp,
                reason: format!("no {SNAPSHOT_FILE} entry"),
            });
        };

        if let Some(trusted) = &state.timestamp {
            check_rollback(
                RoleName::Timestamp,
                RoleName::Timestamp.file_name(),
                trusted.version(),
                body.version(),
            )?;
            if let Some(trusted_pin) = trusted.body().snapshot_pin() {
                check_rollback(
                    RoleName::Timestamp,
                    SNAPSHOT_FILE,
                    trusted_pin.version,
                    pin.version,
                )?;
            }
        }
        check_expiry(&body, now)?;

        tracing::debug!(version = body.version(), "tuf: timestamp accepted");
        state.timestamp = Some(TrustedMetadata::new(envelope, body));
        Ok(())
    }

    async fn update_snapshot(
        &self,
        state: &mut TrustState,
        now: DateTime<Utc>,
    ) -> Result<(), UpdateError> {
        let pin = state
            .timestamp
            .as_ref()
            .and_then(|timestamp| timestamp.body().snapshot_pin().cloned())
            .ok_or_else(|| UpdateError::Invalid {
                role: RoleName::Timestamp,
                reason: format!("no {SNAPSHOT_FILE} entry"),
            })?;
        let request = self.pinned_request(state, RoleName::Snapshot, &pin);
        let (envelope, bytes) = self.fetch_pinned(&request, SNAPSHOT_FILE, &pin).await?;
        state.root.verify_role(RoleName::Snapshot, &envelope)?;
        let body: SnapshotBody = decode_body(&envelope)?;

        if let Some(trusted) = &state.snapshot {
            check_rollback(
                RoleName::Snapshot,
                SNAPSHOT_FILE,
                trusted.version(),
                body.version(),
            )?;
            for (file, trusted_meta) in &trusted.body().meta {
                let Some(candidate_meta) = body.meta.get(file) else {
                    return Err(UpdateError::MetaFileRemoved {
                        role: RoleName::Snapshot,
                        file: file.clone(),
                    });
                };
                check_rollback(
                    RoleName::Snapshot,
                    file,
                    trusted_meta.version,
                    candidate_meta.version,
                )?;
            }
        }
        check_expiry(&body, now)?;
        check_pin(RoleName::Snapshot, SNAPSHOT_FILE, &pin, body.version(), &bytes)?;

        tracing::debug!(version = body.version(), "tuf: snapshot accepted");
        state.snapshot = Some(TrustedMetadata::new(envelope, body));
        Ok(())
    }

    async fn update_targets(
        &self,
        state: &mut TrustState,
        now: DateTime<Utc>,
    ) -> Result<(), UpdateError> {
        let pin = state
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.body().targets_pin().cloned())
            .ok_or_else(|| UpdateError::Invalid {
                role: RoleName::Snapshot,
                reason: format!("no {TARGETS_FILE} entry"),
            })?;
        let request = self.pinned_request(state, RoleName::Targets, &pin);
        let (envelope, bytes) = self.fetch_pinned(&request, TARGETS_FILE, &pin).await?;
        state.root.verify_role(RoleName::Targets, &envelope)?;
        let body: TargetsBody = decode_body(&envelope)?;

        if let Some(trusted) = &state.targets {
            check_rollback(
                RoleName::Targets,
                TARGETS_FILE,
                trusted.version(),
                body.version(),
            )?;
        }
        check_expiry(&body, now)?;
        check_pin(RoleName::Targets, TARGETS_FILE, &pin, body.version(), &bytes)?;

        tracing::debug!(
            version = body.version(),
            targets = body.targets.len(),
            "tuf: targets accepted"
        );
        state.targets = Some(TrustedMetadata::new(envelope, body));
        Ok(())
    }

    fn pinned_request(&self, state: &TrustState, role: RoleName, pin: &MetaFile) -> FetchRequest {
        FetchRequest {
            role,
            version: state.root.consistent_snapshot().then_some(pin.version),
            max_length: pin
                .length
                .unwrap_or_else(|| self.config.max_lengths.for_role(role)),
        }
    }

    /// Fetches a pinned file; overrunning the pinned length is a pin mismatch.
    async fn fetch_pinned(
        &self,
        request: &FetchRequest,
        file: &str,
        pin: &MetaFile,
    ) -> Result<(SignedEnvelope, Vec<u8>), UpdateError> {
        match self.fetch_envelope(request).await {
            Err(UpdateError::Transport {
                role,
                source: TransportError::TooLarge { limit },
            }) if pin.length.is_some() => Err(UpdateError::IntegrityPinMismatch {
                role,
                file: file.to_string(),
                detail: IntegrityMismatch::ExceedsLength { expected: limit },
            }),
            other => other,
        }
    }

    async fn fetch_envelope(
        &self,
        request: &FetchRequest,
    ) -> Result<(SignedEnvelope, Vec<u8>), UpdateError> {
        let bytes = fetch_with_timeout(self.transport, request, self.config.fetch_timeout)
            .await?
            .ok_or_else(|| UpdateError::MissingMetadata {
                role: request.role,
                file: request.file_name(),
            })?;
        let envelope =
            SignedEnvelope::from_slice(&bytes).map_err(|source| UpdateError::Malformed {
                role: request.role,
                source,
            })?;
        Ok((envelope, bytes))
    }
}

fn check_rollback(
    role: RoleName,
    file: &str,
    trusted: u64,
    candidate: u64,
) -> Result<(), UpdateError> {
    if candidate < trusted {
        return Err(UpdateError::Rollback {
            role,
            file: file.to_string(),
            trusted,
            candidate,
        });
    }
    Ok(())
}

fn check_expiry<T: RoleBody>(body: &T, now: DateTime<Utc>) -> Result<(), UpdateError> {
    if body.expires() <= now {
        return Err(UpdateError::Freeze {
            role: T::ROLE,
            expires: body.expires(),
        });
    }
    Ok(())
}

fn check_pin(
    role: RoleName,
    file: &str,
    pin: &MetaFile,
    version: u64,
    bytes: &[u8],
) -> Result<(), UpdateError> {
    pin.check(version, bytes)
        .map_err(|detail| UpdateError::IntegrityPinMismatch {
            role,
            file: file.to_string(),
            detail,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SystemClock};
    use crate::transport::StaticTransport;
    use crate::trust::TrustedRoot;
    use chrono::Duration;
    use serde_json::json;

    #[allow(dead_code)]
    mod fixtures {
        include!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/common/fixtures.rs"));
    }

    use fixtures::{envelope, future, past, sha256_hex, to_bytes, RoleKeySet, TopLevelFiles};

    fn state(keys: &RoleKeySet) -> TrustState {
        TrustState::new(TrustedRoot::from_slice(&keys.root(1, &future())).unwrap())
    }

    fn publish(transport: &StaticTransport, files: &TopLevelFiles) {
        transport.insert("timestamp.json", files.timestamp.clone());
        transport.insert("snapshot.json", files.snapshot.clone());
        transport.insert("targets.json", files.targets.clone());
    }

    async fn run(transport: &StaticTransport, state: &mut TrustState) -> Result<(), UpdateError> {
        let config = UpdaterConfig::default();
        TopLevelRefresher::new(transport, &config, &SystemClock)
            .refresh(state)
            .await
    }

    /// A consistent repository is adopted role by role.
    #[tokio::test]
    async fn adopts_consistent_repository() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        publish(&transport, &keys.top_level(3, &future(), &[("app.tar.gz", b"payload")]));

        let mut state = state(&keys);
        run(&transport, &mut state).await.unwrap();
        assert_eq!(state.timestamp.as_ref().unwrap().version(), 3);
        assert_eq!(state.snapshot.as_ref().unwrap().version(), 3);
        let targets = state.targets.as_ref().unwrap();
        assert_eq!(targets.version(), 3);
        targets.body().targets["app.tar.gz"]
            .verify_payload(b"payload")
            .unwrap();
        assert_eq!(
            transport.requests(),
            vec!["timestamp.json", "snapshot.json", "targets.json"]
        );
    }

    /// A missing timestamp stops the cycle before anything else is fetched.
    #[tokio::test]
    async fn missing_timestamp() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        let err = run(&transport, &mut state(&keys)).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::MissingMetadata { role: RoleName::Timestamp, ref file } if file == "timestamp.json"
        ));
        assert_eq!(transport.requests(), vec!["timestamp.json"]);
    }

    /// Older timestamps than the trusted one are a rollback.
    #[tokio::test]
    async fn timestamp_rollback() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        publish(&transport, &keys.top_level(2, &future(), &[]));
        let mut state = state(&keys);
        run(&transport, &mut state).await.unwrap();

        publish(&transport, &keys.top_level(1, &future(), &[]));
        let err = run(&transport, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Rollback {
                role: RoleName::Timestamp,
                trusted: 2,
                candidate: 1,
                ..
            }
        ));
    }

    /// A newer timestamp may not point at an older snapshot.
    #[tokio::test]
    async fn timestamp_snapshot_version_regression() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        publish(&transport, &keys.top_level(4, &future(), &[]));
        let mut state = state(&keys);
        run(&transport, &mut state).await.unwrap();

        transport.insert("timestamp.json", keys.timestamp(5, &future(), 3, None));
        let err = run(&transport, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Rollback { role: RoleName::Timestamp, ref file, trusted: 4, candidate: 3 } if file == "snapshot.json"
        ));
    }

    /// Expired metadata is refused even when correctly signed.
    #[tokio::test]
    async fn expired_timestamp_is_frozen() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        transport.insert("timestamp.json", keys.timestamp(1, &past(), 1, None));
        let err = run(&transport, &mut state(&keys)).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Freeze {
                role: RoleName::Timestamp,
                ..
            }
        ));
    }

    /// Expiry is evaluated against the injected clock.
    #[tokio::test]
    async fn expiry_uses_clock() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        publish(&transport, &keys.top_level(1, &future(), &[]));
        let config = UpdaterConfig::default();
        let clock = FixedClock(Utc::now() + Duration::days(366));
        let err = TopLevelRefresher::new(&transport, &config, &clock)
            .refresh(&mut state(&keys))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Freeze { .. }));
    }

    /// Metadata signed by the wrong role's key does not count.
    #[tokio::test]
    async fn snapshot_signed_by_wrong_role() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        let signed = json!({
            "_type": "snapshot",
            "spec_version": "1.0.31",
            "version": 1,
            "expires": future(),
            "meta": { "targets.json": { "version": 1 } }
        });
        let snapshot = to_bytes(&envelope(signed, &[&keys.targets]));
        transport.insert("timestamp.json", keys.timestamp(1, &future(), 1, None));
        transport.insert("snapshot.json", snapshot);
        let err = run(&transport, &mut state(&keys)).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::SignatureThresholdNotMet {
                role: RoleName::Snapshot,
                ..
            }
        ));
    }

    /// The snapshot version must match the timestamp's pin exactly.
    #[tokio::test]
    async fn snapshot_version_pin() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        transport.insert("timestamp.json", keys.timestamp(1, &future(), 2, None));
        transport.insert("snapshot.json", keys.snapshot(3, &future(), 1, None));
        let err = run(&transport, &mut state(&keys)).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::IntegrityPinMismatch {
                role: RoleName::Snapshot,
                detail: IntegrityMismatch::Version { expected: 2, actual: 3 },
                ..
            }
        ));
    }

    /// Validly signed targets are refused when length or digest differ from the pin.
    #[tokio::test]
    async fn targets_pin_length_and_hash() {
        let keys = RoleKeySet::new(1);
        let targets = keys.targets(5, &future(), &[("a.txt", b"a")]);
        let actual = targets.len() as u64;
        assert!(actual > 100);

        let pinned_snapshot = |meta: serde_json::Value| {
            let signed = json!({
                "_type": "snapshot",
                "spec_version": "1.0.31",
                "version": 1,
                "expires": future(),
                "meta": { "targets.json": meta }
            });
            to_bytes(&envelope(signed, &[&keys.snapshot]))
        };
        let good_hash = sha256_hex(&targets);

        let cases = [
            (
                json!({ "version": 5, "length": 100, "hashes": { "sha256": good_hash } }),
                IntegrityMismatch::ExceedsLength { expected: 100 },
            ),
            (
                json!({ "version": 5, "length": actual + 10, "hashes": { "sha256": good_hash } }),
                IntegrityMismatch::Length {
                    expected: actual + 10,
                    actual,
                },
            ),
            (
                json!({ "version": 5, "length": actual, "hashes": { "sha256": sha256_hex(b"other") } }),
                IntegrityMismatch::Hash {
                    algorithm: "sha256".into(),
                },
            ),
        ];

        for (meta, expected) in cases {
            let snapshot = pinned_snapshot(meta);
            let transport = StaticTransport::new();
            transport.insert(
                "timestamp.json",
                keys.timestamp(1, &future(), 1, Some(&snapshot)),
            );
            transport.insert("snapshot.json", snapshot);
            transport.insert("targets.json", targets.clone());

            let mut state = state(&keys);
            let err = run(&transport, &mut state).await.unwrap_err();
            match err {
                UpdateError::IntegrityPinMismatch {
                    role: RoleName::Targets,
                    detail,
                    ..
                } => assert_eq!(detail, expected),
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(state.targets.is_none());
            assert_eq!(state.snapshot.as_ref().unwrap().version(), 1);
        }
    }

    /// Files listed by the trusted snapshot may not disappear.
    #[tokio::test]
    async fn snapshot_may_not_drop_files() {
        let keys = RoleKeySet::new(1);
        let transport = StaticTransport::new();
        let with_role = |version: u64, meta: serde_json::Value| {
            let signed = json!({
                "_type": "snapshot",
                "spec_version": "1.0.31",
                "version": version,
                "expires": future(),
                "meta": meta
            });
            to_bytes(&envelope(signed, &[&keys.snapshot]))
        };
        let targets = keys.targets(1, &future(), &[]);
        transport.insert("targets.json", targets);
        transport.insert("timestamp.json", keys.timestamp(1, &future(), 1, None));
        transport.insert(
            "snapshot.json",
            with_role(
                1,
                json!({ "targets.json": { "version": 1 }, "role1.json": { "version": 1 } }),
            ),
        );
        let mut state = state(&keys);
        run(&transport, &mut state).await.unwrap();

        transport.insert("timestamp.json", keys.timestamp(2, &future(), 2, None));
        transport.insert(
            "snapshot.json",
            with_role(2, json!({ "targets.json": { "version": 1 } })),
        );
        let err = run(&transport, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::MetaFileRemoved { role: RoleName::Snapshot, ref file } if file == "role1.json"
        ));
    }

    /// Consistent snapshots request version-addressed snapshot and targets files.
    #[tokio::test]
    async fn consistent_snapshot_names() {
        let keys = RoleKeySet::new(1);
        let root = to_bytes(&envelope(
            keys.root_signed(1, &future(), true),
            &[&keys.root[0]],
        ));
        let files = keys.top_level(7, &future(), &[]);
        let transport = StaticTransport::new();
        transport.insert("timestamp.json", files.timestamp);
        transport.insert("7.snapshot.json", files.snapshot);
        transport.insert("7.targets.json", files.targets);

        let mut state = TrustState::new(TrustedRoot::from_slice(&root).unwrap());
        run(&transport, &mut state).await.unwrap();
        assert_eq!(
            transport.requests(),
            vec!["timestamp.json", "7.snapshot.json", "7.targets.json"]
        );
    }
}
