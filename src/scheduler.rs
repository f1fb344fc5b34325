//! Wall-clock polling daemon.
//!
//! Every enabled endpoint gets its own tokio task that sleeps until the next fire time,
//! then runs the blocking session call on the blocking pool under a timeout. A
//! calibrator endpoint gets a second task stepping through its ozone levels. Both
//! tasks share the session through one mutex, so a level change never interleaves
//! with a poll on the same link.
//!
//! Fire times follow `every n minutes at :SS`: the instants whose epoch minute is a
//! multiple of `n` and whose second is `SS`.

use crate::config::Settings;
use crate::endpoint::InstrumentEndpoint;
use crate::error::{AppResult, DaqError};
use crate::session::{InstrumentSession, Persistence};
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Budget for one blocking session call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// `every n minutes at :SS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub every_minutes: u32,
    pub at_second: u32,
}

impl Cadence {
    pub fn new(every_minutes: u32, at_second: u32) -> Self {
        Self {
            every_minutes: every_minutes.max(1),
            at_second: at_second.min(59),
        }
    }

    pub fn next_after(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        next_fire(now, self.every_minutes, self.at_second)
    }
}

/// First instant strictly after `now` matching the cadence.
pub fn next_fire(
    now: DateTime<Utc>,
    every_minutes: u32,
    at_second: u32,
) -> AppResult<DateTime<Utc>> {
    let every = i64::from(every_minutes.max(1));
    let second = i64::from(at_second.min(59));
    let minute = now.timestamp().div_euclid(60);
    let mut slot = minute.div_euclid(every) * every;
    if slot < minute {
        slot += every;
    }
    loop {
        let secs = slot * 60 + second;
        let candidate = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or(DaqError::TimestampOutOfRange(secs))?;
        if candidate > now {
            return Ok(candidate);
        }
        slot += every;
    }
}

/// Endless walk through calibration levels.
#[derive(Debug, Clone)]
pub struct LevelCycle {
    levels: Vec<u32>,
    position: usize,
}

impl LevelCycle {
    pub fn new(levels: Vec<u32>) -> Self {
        Self {
            levels,
            position: 0,
        }
    }
}

impl Iterator for LevelCycle {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let level = *self.levels.get(self.position)?;
        self.position = (self.position + 1) % self.levels.len();
        Some(level)
    }
}

/// A session shared between the tasks of one endpoint.
#[derive(Clone)]
pub struct SharedSession {
    name: Arc<str>,
    inner: Arc<Mutex<InstrumentSession>>,
}

impl SharedSession {
    pub fn new(session: InstrumentSession) -> Self {
        Self {
            name: Arc::from(session.name()),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `call` against the session on the blocking pool, bounded by `budget`.
    ///
    /// A call that overruns keeps the session locked until it completes; later calls
    /// queue behind it.
    pub async fn call<T, F>(&self, budget: Duration, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut InstrumentSession) -> AppResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let mut session = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            call(&mut session)
        });
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DaqError::Task(join.to_string())),
            Err(_) => Err(DaqError::Timeout {
                target: self.name.to_string(),
                budget,
            }),
        }
    }
}

struct Job {
    session: SharedSession,
    sampling: Cadence,
    calibration: Option<(Cadence, Vec<u32>)>,
}

pub struct Scheduler {
    jobs: Vec<Job>,
    call_timeout: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// One job per enabled endpoint.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let mut scheduler = Self::new();
        for config in settings.enabled_endpoints() {
            let endpoint = InstrumentEndpoint::from_config(config, settings)?;
            scheduler.add(InstrumentSession::new(endpoint));
        }
        Ok(scheduler)
    }

    pub fn with_call_timeout(mut self, budget: Duration) -> Self {
        self.call_timeout = budget;
        self
    }

    /// Schedule `session` with the cadences of its endpoint.
    pub fn add(&mut self, session: InstrumentSession) -> SharedSession {
        let endpoint = session.endpoint();
        let sampling = Cadence::new(endpoint.sampling_interval, endpoint.offset_seconds);
        let calibration = endpoint
            .calibration
            .as_ref()
            .map(|c| (Cadence::new(c.interval, c.offset_seconds), c.levels.clone()));
        let session = SharedSession::new(session);
        self.jobs.push(Job {
            session: session.clone(),
            sampling,
            calibration,
        });
        session
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Read, then apply, the configuration of every endpoint.
    pub async fn startup(&self) {
        for job in &self.jobs {
            let name = job.session.name();
            match job.session.call(self.call_timeout, |s| s.get_config()).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
                    info!(endpoint = %name, commands = outcomes.len(), failed, "get_config done");
                }
                Err(e) => error!(endpoint = %name, error = %e, "get_config failed"),
            }
            match job.session.call(self.call_timeout, |s| s.set_config()).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
                    info!(endpoint = %name, commands = outcomes.len(), failed, "set_config done");
                }
                Err(e) => error!(endpoint = %name, error = %e, "set_config failed"),
            }
        }
    }

    /// Start-up, then poll until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.startup().await;
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C");
            }
        })
        .await
    }

    /// Poll until `shutdown` resolves.
    pub async fn run_until<S>(self, shutdown: S) -> AppResult<()>
    where
        S: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        for job in &self.jobs {
            tasks.spawn(poll_loop(job.session.clone(), job.sampling, self.call_timeout));
            if let Some((cadence, levels)) = &job.calibration {
                tasks.spawn(calibration_loop(
                    job.session.clone(),
                    *cadence,
                    LevelCycle::new(levels.clone()),
                    self.call_timeout,
                ));
            }
        }
        info!(endpoints = self.jobs.len(), tasks = tasks.len(), "scheduler running");

        shutdown.await;
        info!("shutting down");
        tasks.shutdown().await;
        Ok(())
    }
}

async fn sleep_until(at: DateTime<Utc>) {
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(wait).await;
}

async fn poll_loop(session: SharedSession, cadence: Cadence, budget: Duration) {
    let name = session.name().to_string();
    loop {
        let next = match cadence.next_after(Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                error!(endpoint = %name, error = %e, "cannot schedule poll");
                return;
            }
        };
        sleep_until(next).await;
        match session.call(budget, |s| s.get_data(None, true)).await {
            Ok(reading) => match &reading.persistence {
                Persistence::Failed(e) => {
                    warn!(endpoint = %name, text = %reading.text, error = %e, "reading not saved")
                }
                _ => info!(endpoint = %name, text = %reading.text, "reading"),
            },
            Err(e) => warn!(endpoint = %name, error = %e, "poll failed"),
        }
    }
}

async fn calibration_loop(
    session: SharedSession,
    cadence: Cadence,
    mut levels: LevelCycle,
    budget: Duration,
) {
    let name = session.name().to_string();
    loop {
        let next = match cadence.next_after(Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                error!(endpoint = %name, error = %e, "cannot schedule calibration");
                return;
            }
        };
        sleep_until(next).await;
        let Some(level) = levels.next() else {
            return;
        };
        if let Err(e) = session.call(budget, move |s| s.set_o3_conc(level)).await {
            warn!(endpoint = %name, level, error = %e, "level change failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_next_fire_every_minute() {
        assert_eq!(next_fire(at(10, 58, 0), 1, 0).unwrap(), at(10, 59, 0));
        assert_eq!(next_fire(at(10, 58, 3), 1, 5).unwrap(), at(10, 58, 5));
        assert_eq!(next_fire(at(10, 58, 5), 1, 5).unwrap(), at(10, 59, 5));
    }

    #[test]
    fn test_next_fire_aligns_to_multiples() {
        assert_eq!(next_fire(at(10, 58, 0), 10, 0).unwrap(), at(11, 0, 0));
        assert_eq!(next_fire(at(11, 0, 0), 10, 30).unwrap(), at(11, 0, 30));
        assert_eq!(
            next_fire(at(23, 55, 0), 15, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_level_cycle_wraps() {
        let levels: Vec<u32> = LevelCycle::new(vec![0, 50, 100]).take(7).collect();
        assert_eq!(levels, vec![0, 50, 100, 0, 50, 100, 0]);
        assert_eq!(LevelCycle::new(Vec::new()).next(), None);
    }

    #[test]
    fn test_cadence_clamps() {
        let cadence = Cadence::new(0, 75);
        assert_eq!(cadence.every_minutes, 1);
        assert_eq!(cadence.at_second, 59);
    }
}
