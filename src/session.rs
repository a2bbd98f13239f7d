//! Session orchestration across heterogeneous services.
//!
//! [`SessionRunner`] sequences every participating service through the
//! lifecycle phases of one experiment run, dispatching purely on the
//! capability accessors of [`Service`]; it never assumes a concrete
//! service's identity.
//!
//! The hard guarantee lives in the failure-scoped recording region: once
//! any recorder has started, no exit path (an error in a later start, in
//! the stimulus, in the timed wait, or in another recorder's stop) leaves
//! a started recorder running. The region's cleanup stops every started
//! recorder in reverse start order, attempts all of them even when one
//! stop fails, and reports stop-time errors alongside the original cause
//! rather than swallowing either.
//!
//! Exactly one orchestrator drives exactly one session at a time; two
//! orchestrators targeting the same instrument concurrently is undefined
//! behavior by precondition, not enforcement.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};

use crate::core::Service;
use crate::error::{RigError, ValidationProblem};

/// Lifecycle state of one orchestrated session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initialized,
    Tested,
    Running,
    Stopped,
    Finalized,
    Validated,
}

/// A failure inside the recording region, carrying the original cause plus
/// any errors raised while stopping started recorders during cleanup.
#[derive(Debug)]
pub struct SessionFailure {
    pub cause: anyhow::Error,
    /// `(service name, error)` for each started recorder whose cleanup
    /// stop failed. Empty when rollback itself went cleanly.
    pub stop_errors: Vec<(String, anyhow::Error)>,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session failed: {:#}", self.cause)?;
        for (name, err) in &self.stop_errors {
            write!(f, "; stopping {name} during rollback also failed: {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionFailure {}

/// Sequences recorders, the stimulus driver, and auxiliary services through
/// one session.
pub struct SessionRunner {
    recorders: Vec<Box<dyn Service>>,
    stimulus: Option<Box<dyn Service>>,
    auxiliaries: Vec<Box<dyn Service>>,
    /// How long recorders run before being stopped; must be long enough to
    /// capture one set of barcodes on the synchronization reference.
    duration: Duration,
    state: SessionState,
}

impl SessionRunner {
    pub fn new(
        recorders: Vec<Box<dyn Service>>,
        stimulus: Option<Box<dyn Service>>,
        auxiliaries: Vec<Box<dyn Service>>,
        duration: Duration,
    ) -> Self {
        Self {
            recorders,
            stimulus,
            auxiliaries,
            duration,
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the whole lifecycle. A failure inside the recording region
    /// surfaces as [`SessionFailure`] after rollback; the session is left
    /// `Stopped` and the caller may re-invoke
    /// [`finalize_all`](Self::finalize_all) /
    /// [`validate_all`](Self::validate_all) after diagnosing it.
    pub async fn run(&mut self) -> Result<()> {
        self.initialize_all().await?;
        self.test_all().await?;
        self.record().await?;
        self.propagate_sync_reference().await?;
        self.finalize_all().await?;
        self.validate_all().await?;
        Ok(())
    }

    /// Initialize every initializable service before anything else.
    /// Failures propagate immediately; nothing has been started yet, so
    /// there is nothing to roll back.
    pub async fn initialize_all(&mut self) -> Result<()> {
        for service in self.all_services() {
            let name = service.name().to_string();
            if let Some(initializable) = service.as_initializable() {
                initializable
                    .initialize()
                    .await
                    .with_context(|| format!("initializing {name}"))?;
            }
        }
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Run every testable service's readiness check. A failure aborts the
    /// session before anything is started.
    pub async fn test_all(&mut self) -> Result<()> {
        for service in self.all_services() {
            if let Some(testable) = service.as_testable() {
                testable.test().await?;
            }
        }
        self.state = SessionState::Tested;
        Ok(())
    }

    /// The failure-scoped recording region: start every startable recorder
    /// among the stoppables, start the stimulus, wait out the session, stop
    /// every started recorder. Any error triggers the rollback guarantee.
    async fn record(&mut self) -> Result<()> {
        self.state = SessionState::Running;
        let mut started: Vec<usize> = Vec::new();
        let outcome = self.recording_block(&mut started).await;
        match outcome {
            Ok(()) => {
                self.state = SessionState::Stopped;
                Ok(())
            }
            Err(cause) => {
                let stop_errors = self.stop_started(&started).await;
                self.state = SessionState::Stopped;
                Err(SessionFailure { cause, stop_errors }.into())
            }
        }
    }

    async fn recording_block(&mut self, started: &mut Vec<usize>) -> Result<()> {
        // The region covers the stoppable recorders: a recorder that cannot
        // be stopped has no business being started under rollback.
        for index in 0..self.recorders.len() {
            let service = &mut self.recorders[index];
            let name = service.name().to_string();
            if service.as_stoppable().is_none() {
                continue;
            }
            if let Some(startable) = service.as_startable() {
                startable
                    .start()
                    .await
                    .with_context(|| format!("starting {name}"))?;
                started.push(index);
            }
        }

        // All recorders are running before the stimulus begins.
        if let Some(stimulus) = &mut self.stimulus {
            let name = stimulus.name().to_string();
            if let Some(startable) = stimulus.as_startable() {
                startable
                    .start()
                    .await
                    .with_context(|| format!("starting {name}"))?;
            }
        }

        info!("session running for {:?}", self.duration);
        tokio::time::sleep(self.duration).await;

        // Normal-path stop, in start order. A recorder is removed from the
        // started set once its stop has been attempted; a failure here
        // leaves the remaining recorders to the rollback pass.
        while let Some(&index) = started.first() {
            started.remove(0);
            let service = &mut self.recorders[index];
            let name = service.name().to_string();
            if let Some(stoppable) = service.as_stoppable() {
                stoppable
                    .stop()
                    .await
                    .with_context(|| format!("stopping {name}"))?;
            }
        }
        Ok(())
    }

    /// Reverse-order stop pass over recorders that reached `Started`.
    /// Every recorder is attempted even if an earlier stop fails.
    async fn stop_started(&mut self, started: &[usize]) -> Vec<(String, anyhow::Error)> {
        let mut stop_errors = Vec::new();
        for &index in started.iter().rev() {
            let service = &mut self.recorders[index];
            let name = service.name().to_string();
            if let Some(stoppable) = service.as_stoppable() {
                if let Err(err) = stoppable.stop().await {
                    error!("rollback stop of {name} failed: {err:#}");
                    stop_errors.push((name, err));
                }
            }
        }
        stop_errors
    }

    /// Designate the first available sync source's most recent output as
    /// the shared synchronization reference and hand it to every service.
    /// Services without a declared need ignore it.
    async fn propagate_sync_reference(&mut self) -> Result<()> {
        let mut reference: Option<PathBuf> = None;
        for service in self.all_services() {
            if let Some(source) = service.as_sync_source() {
                reference = Some(source.latest_data().await?);
                break;
            }
        }
        if let Some(path) = reference {
            info!("synchronization reference: {}", path.display());
            for service in self.all_services() {
                service.set_sync_reference(&path);
            }
        }
        Ok(())
    }

    /// Collect outputs and close out every finalizable service.
    pub async fn finalize_all(&mut self) -> Result<()> {
        for service in self.all_services() {
            let name = service.name().to_string();
            if let Some(finalizable) = service.as_finalizable() {
                finalizable
                    .finalize()
                    .await
                    .with_context(|| format!("finalizing {name}"))?;
            }
        }
        self.state = SessionState::Finalized;
        Ok(())
    }

    /// Run every validatable service's post-hoc check, collecting all
    /// failures rather than stopping at the first: the full set of failing
    /// services is what the operator needs.
    pub async fn validate_all(&mut self) -> Result<()> {
        let mut problems = Vec::new();
        for service in self.all_services() {
            let name = service.name().to_string();
            if let Some(validatable) = service.as_validatable() {
                if let Err(err) = validatable.validate().await {
                    error!("validation of {name} failed: {err:#}");
                    problems.push(ValidationProblem {
                        service: name,
                        reason: format!("{err:#}"),
                    });
                }
            }
        }
        if problems.is_empty() {
            self.state = SessionState::Validated;
            Ok(())
        } else {
            Err(RigError::Validation(problems).into())
        }
    }

    fn all_services(&mut self) -> impl Iterator<Item = &mut Box<dyn Service>> + '_ {
        self.recorders
            .iter_mut()
            .chain(self.stimulus.iter_mut())
            .chain(self.auxiliaries.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Initializable, Startable, Stoppable, SyncSource, Testable, Validatable,
    };
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    type OpsLog = Arc<Mutex<Vec<String>>>;

    fn log_op(log: &OpsLog, entry: String) {
        log.lock().unwrap().push(entry);
    }

    /// Scripted participant covering any capability combination.
    struct Scripted {
        name: String,
        log: OpsLog,
        startable: bool,
        stoppable: bool,
        validatable: bool,
        fail_test: bool,
        fail_start: bool,
        fail_stop: bool,
        fail_validate: bool,
    }

    impl Scripted {
        fn recorder(name: &str, log: &OpsLog) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                startable: true,
                stoppable: true,
                validatable: false,
                fail_test: false,
                fail_start: false,
                fail_stop: false,
                fail_validate: false,
            }
        }
    }

    #[async_trait]
    impl Initializable for Scripted {
        async fn initialize(&mut self) -> Result<()> {
            log_op(&self.log, format!("{}:initialize", self.name));
            Ok(())
        }
    }

    #[async_trait]
    impl Testable for Scripted {
        async fn test(&mut self) -> Result<()> {
            log_op(&self.log, format!("{}:test", self.name));
            if self.fail_test {
                anyhow::bail!("{} test failed", self.name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Startable for Scripted {
        async fn start(&mut self) -> Result<()> {
            log_op(&self.log, format!("{}:start", self.name));
            if self.fail_start {
                anyhow::bail!("{} refused to start", self.name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Stoppable for Scripted {
        async fn stop(&mut self) -> Result<()> {
            log_op(&self.log, format!("{}:stop", self.name));
            if self.fail_stop {
                anyhow::bail!("{} refused to stop", self.name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Validatable for Scripted {
        async fn validate(&mut self) -> Result<()> {
            log_op(&self.log, format!("{}:validate", self.name));
            if self.fail_validate {
                anyhow::bail!("{} outputs inconsistent", self.name);
            }
            Ok(())
        }
    }

    impl Service for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn as_initializable(&mut self) -> Option<&mut dyn Initializable> {
            Some(self)
        }

        fn as_testable(&mut self) -> Option<&mut dyn Testable> {
            Some(self)
        }

        fn as_startable(&mut self) -> Option<&mut dyn Startable> {
            if self.startable {
                Some(self)
            } else {
                None
            }
        }

        fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
            if self.stoppable {
                Some(self)
            } else {
                None
            }
        }

        fn as_validatable(&mut self) -> Option<&mut dyn Validatable> {
            if self.validatable {
                Some(self)
            } else {
                None
            }
        }

        fn set_sync_reference(&mut self, path: &Path) {
            log_op(&self.log, format!("{}:sync_ref {}", self.name, path.display()));
        }
    }

    struct FixedSyncSource {
        path: PathBuf,
    }

    #[async_trait]
    impl SyncSource for FixedSyncSource {
        async fn latest_data(&mut self) -> Result<PathBuf> {
            Ok(self.path.clone())
        }
    }

    struct SyncService {
        source: FixedSyncSource,
    }

    impl Service for SyncService {
        fn name(&self) -> &str {
            "sync"
        }

        fn as_sync_source(&mut self) -> Option<&mut dyn SyncSource> {
            Some(&mut self.source)
        }
    }

    fn runner(
        recorders: Vec<Box<dyn Service>>,
        stimulus: Option<Box<dyn Service>>,
    ) -> SessionRunner {
        SessionRunner::new(recorders, stimulus, Vec::new(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_happy_path_orders_phases() {
        let log: OpsLog = Default::default();
        let mut session = runner(
            vec![
                Box::new(Scripted::recorder("a", &log)),
                Box::new(Scripted::recorder("b", &log)),
            ],
            Some(Box::new(Scripted::recorder("stim", &log))),
        );
        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Validated);

        let ops = log.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                "a:initialize",
                "b:initialize",
                "stim:initialize",
                "a:test",
                "b:test",
                "stim:test",
                "a:start",
                "b:start",
                "stim:start",
                "a:stop",
                "b:stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_stimulus_failure_stops_started_recorders_in_reverse() {
        let log: OpsLog = Default::default();
        let mut stim = Scripted::recorder("stim", &log);
        stim.fail_start = true;
        let mut session = runner(
            vec![
                Box::new(Scripted::recorder("a", &log)),
                Box::new(Scripted::recorder("b", &log)),
            ],
            Some(Box::new(stim)),
        );

        let err = session.run().await.unwrap_err();
        let failure = err.downcast_ref::<SessionFailure>().unwrap();
        assert!(failure.cause.to_string().contains("starting stim"));
        assert!(failure.stop_errors.is_empty());
        assert_eq!(session.state(), SessionState::Stopped);

        let ops = log.lock().unwrap().clone();
        // Exactly one stop per started recorder, reverse order.
        assert_eq!(
            ops,
            vec![
                "a:initialize",
                "b:initialize",
                "stim:initialize",
                "a:test",
                "b:test",
                "stim:test",
                "a:start",
                "b:start",
                "stim:start",
                "b:stop",
                "a:stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_start_stops_only_started() {
        let log: OpsLog = Default::default();
        let mut bad = Scripted::recorder("bad", &log);
        bad.fail_start = true;
        let mut session = runner(
            vec![
                Box::new(Scripted::recorder("a", &log)),
                Box::new(bad),
                Box::new(Scripted::recorder("never", &log)),
            ],
            None,
        );

        session.run().await.unwrap_err();
        let ops = log.lock().unwrap().clone();
        let stops: Vec<_> = ops.iter().filter(|op| op.ends_with(":stop")).collect();
        assert_eq!(stops, vec!["a:stop"]);
        assert!(!ops.contains(&"never:start".to_string()));
    }

    #[tokio::test]
    async fn test_rollback_attempts_every_recorder_even_if_stop_fails() {
        let log: OpsLog = Default::default();
        let mut sticky = Scripted::recorder("sticky", &log);
        sticky.fail_stop = true;
        let mut stim = Scripted::recorder("stim", &log);
        stim.fail_start = true;
        let mut session = runner(
            vec![
                Box::new(Scripted::recorder("a", &log)),
                Box::new(sticky),
            ],
            Some(Box::new(stim)),
        );

        let err = session.run().await.unwrap_err();
        let failure = err.downcast_ref::<SessionFailure>().unwrap();
        assert!(failure.cause.to_string().contains("starting stim"));
        assert_eq!(failure.stop_errors.len(), 1);
        assert_eq!(failure.stop_errors[0].0, "sticky");

        let ops = log.lock().unwrap().clone();
        // The failing stop did not prevent the other recorder's stop.
        assert!(ops.contains(&"sticky:stop".to_string()));
        assert!(ops.contains(&"a:stop".to_string()));
    }

    #[tokio::test]
    async fn test_readiness_failure_aborts_before_any_start() {
        let log: OpsLog = Default::default();
        let mut bad = Scripted::recorder("bad", &log);
        bad.fail_test = true;
        let mut session = runner(
            vec![
                Box::new(Scripted::recorder("a", &log)),
                Box::new(bad),
            ],
            None,
        );

        session.run().await.unwrap_err();
        assert_eq!(session.state(), SessionState::Initialized);
        let ops = log.lock().unwrap().clone();
        assert!(!ops.iter().any(|op| op.ends_with(":start")));
    }

    #[tokio::test]
    async fn test_validation_failures_are_collected_not_short_circuited() {
        let log: OpsLog = Default::default();
        let mut first = Scripted::recorder("first", &log);
        first.validatable = true;
        first.fail_validate = true;
        let mut second = Scripted::recorder("second", &log);
        second.validatable = true;
        second.fail_validate = true;
        let mut session = runner(vec![Box::new(first), Box::new(second)], None);

        let err = session.run().await.unwrap_err();
        let rig_err = err.downcast_ref::<RigError>().unwrap();
        match rig_err {
            RigError::Validation(problems) => {
                assert_eq!(problems.len(), 2);
                assert_eq!(problems[0].service, "first");
                assert_eq!(problems[1].service, "second");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let ops = log.lock().unwrap().clone();
        assert!(ops.contains(&"first:validate".to_string()));
        assert!(ops.contains(&"second:validate".to_string()));
    }

    #[tokio::test]
    async fn test_sync_reference_reaches_every_service() {
        let log: OpsLog = Default::default();
        let mut session = SessionRunner::new(
            vec![Box::new(Scripted::recorder("a", &log))],
            None,
            vec![Box::new(SyncService {
                source: FixedSyncSource {
                    path: PathBuf::from("/data/sync/latest.h5"),
                },
            })],
            Duration::from_millis(10),
        );
        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Validated);
        let ops = log.lock().unwrap().clone();
        assert!(ops.contains(&"a:sync_ref /data/sync/latest.h5".to_string()));
    }
}
