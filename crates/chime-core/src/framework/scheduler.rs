//! Time-based triggers.
//!
//! The [`Scheduler`] keeps two kinds of entries:
//!
//! - **interval** entries registered with [`Scheduler::every`], firing every
//!   `interval` (at least one minute);
//! - **time-of-day** entries registered with [`Scheduler::at`], firing at a
//!   fixed minute of every hour or a fixed hour:minute of every day, in local time.
//!
//! [`Scheduler::start`] ticks once per minute. On each tick, every due entry is
//! sent to a bounded trigger queue; the send waits until the consumer takes the
//! previous trigger, so a slow consumer delays triggers instead of dropping them.
//! The consumer reads triggers with [`Scheduler::next_trigger`] and calls
//! [`Scheduler::execute`], which advances the entry and hands back the event
//! and callback to run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::foundation::error::{ScheduleError, ScheduleResult};
use crate::foundation::event::Event;
use crate::framework::handler::BoxedHandler;

/// Scheduler resolution.
pub const TICK: Duration = Duration::from_secs(60);

/// Repeat unit of a time-of-day entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Every hour at the given minute.
    Hourly,
    /// Every day at the given hour and minute.
    Daily,
}

impl Recurrence {
    pub fn period(&self) -> TimeDelta {
        match self {
            Self::Hourly => TimeDelta::hours(1),
            Self::Daily => TimeDelta::days(1),
        }
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy)]
enum Cadence {
    Every(Duration),
    At {
        recurrence: Recurrence,
        hour: u32,
        minute: u32,
    },
}

/// A registered trigger. Entries live as long as the scheduler.
pub struct ScheduleEntry {
    channel: String,
    cadence: Cadence,
    next: Mutex<DateTime<Local>>,
    handler: BoxedHandler,
}

impl ScheduleEntry {
    /// Channel the synthesized event targets.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// When the entry fires next.
    pub fn next_fire(&self) -> DateTime<Local> {
        *self.next.lock()
    }

    /// Whether the entry is due at `now`.
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        *self.next.lock() <= now
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Moves the next fire time past `now`, or returns false if the entry
    /// was not due.
    fn advance(&self, now: DateTime<Local>) -> bool {
        let mut next_fire = self.next.lock();
        if *next_fire > now {
            return false;
        }
        *next_fire = match self.cadence {
            Cadence::Every(interval) => now + interval,
            Cadence::At {
                recurrence,
                hour,
                minute,
            } => match next_occurrence(&now, recurrence, hour, minute, false) {
                Some(next) => next,
                None => now + recurrence.period(),
            },
        };
        true
    }
}

impl std::fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("channel", &self.channel)
            .field("cadence", &self.cadence)
            .field("next", &self.next_fire())
            .finish()
    }
}

/// Computes the first fire instant of a time-of-day entry registered at `now`.
///
/// The target is `hour:minute` today (or `:minute` this hour for
/// [`Recurrence::Hourly`], where `hour` is ignored). If `now` is already past
/// it, the target rolls forward by one period.
pub fn compute_first_fire<Tz: TimeZone>(
    now: &DateTime<Tz>,
    recurrence: Recurrence,
    hour: u32,
    minute: u32,
) -> ScheduleResult<DateTime<Tz>> {
    if hour > 23 || minute > 59 {
        return Err(ScheduleError::InvalidTime { hour, minute });
    }
    next_occurrence(now, recurrence, hour, minute, true).ok_or_else(|| {
        ScheduleError::NonexistentLocalTime {
            date: now.date_naive().to_string(),
            hour,
            minute,
        }
    })
}

/// Next wall-clock occurrence of the target after `now` (or at `now` when `inclusive`).
fn next_occurrence<Tz: TimeZone>(
    now: &DateTime<Tz>,
    recurrence: Recurrence,
    hour: u32,
    minute: u32,
    inclusive: bool,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let date = now.date_naive();
    let passed = |target: &DateTime<Tz>| {
        if inclusive {
            now > target
        } else {
            now >= target
        }
    };

    match recurrence {
        Recurrence::Hourly => {
            let target = resolve(&tz, date.and_hms_opt(now.hour(), minute, 0)?)?;
            if passed(&target) {
                Some(target + recurrence.period())
            } else {
                Some(target)
            }
        }
        Recurrence::Daily => {
            let target = resolve(&tz, date.and_hms_opt(hour, minute, 0)?)?;
            if passed(&target) {
                resolve(&tz, date.succ_opt()?.and_hms_opt(hour, minute, 0)?)
            } else {
                Some(target)
            }
        }
    }
}

fn resolve<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest()
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    entries: RwLock<Vec<Arc<ScheduleEntry>>>,
    triggers_tx: mpsc::Sender<Arc<ScheduleEntry>>,
    triggers_rx: AsyncMutex<mpsc::Receiver<Arc<ScheduleEntry>>>,
}

/// Interval and time-of-day trigger source. Cheap to clone; clones share entries.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                entries: RwLock::new(Vec::new()),
                triggers_tx: tx,
                triggers_rx: AsyncMutex::new(rx),
            }),
        }
    }

    /// Fires `handler` on `channel` every `interval`, first after one full interval.
    pub fn every(
        &self,
        interval: Duration,
        channel: impl Into<String>,
        handler: BoxedHandler,
    ) -> ScheduleResult<()> {
        if interval < TICK {
            return Err(ScheduleError::IntervalTooSmall { interval });
        }
        let now = self.inner.clock.now();
        self.push(ScheduleEntry {
            channel: channel.into(),
            cadence: Cadence::Every(interval),
            next: Mutex::new(now + interval),
            handler,
        });
        Ok(())
    }

    /// Fires `handler` on `channel` at `hour:minute` local time, hourly or daily.
    ///
    /// For [`Recurrence::Hourly`] only `minute` is used.
    pub fn at(
        &self,
        recurrence: Recurrence,
        hour: u32,
        minute: u32,
        channel: impl Into<String>,
        handler: BoxedHandler,
    ) -> ScheduleResult<()> {
        let first = compute_first_fire(&self.inner.clock.now(), recurrence, hour, minute)?;
        self.push(ScheduleEntry {
            channel: channel.into(),
            cadence: Cadence::At {
                recurrence,
                hour,
                minute,
            },
            next: Mutex::new(first),
            handler,
        });
        Ok(())
    }

    fn push(&self, entry: ScheduleEntry) {
        debug!(channel = %entry.channel, next = %entry.next_fire(), "schedule entry registered");
        self.inner.entries.write().push(Arc::new(entry));
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the registered entries.
    pub fn entries(&self) -> Vec<Arc<ScheduleEntry>> {
        self.inner.entries.read().clone()
    }

    /// Entries due at the current clock time, in registration order.
    pub fn due_entries(&self) -> Vec<Arc<ScheduleEntry>> {
        let now = self.inner.clock.now();
        self.inner
            .entries
            .read()
            .iter()
            .filter(|entry| entry.is_due(now))
            .cloned()
            .collect()
    }

    /// Runs the tick loop until `shutdown` is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(entries = self.len(), "scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let due = self.due_entries();
                    trace!(due = due.len(), "scheduler tick");
                    for entry in due {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("scheduler stopped");
                                return;
                            }
                            sent = self.inner.triggers_tx.send(entry) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// Waits for the next triggered entry.
    pub async fn next_trigger(&self) -> Option<Arc<ScheduleEntry>> {
        self.inner.triggers_rx.lock().await.recv().await
    }

    /// Advances `entry` and returns the synthetic event plus the callback to run.
    ///
    /// Interval entries move to `now + interval`; time-of-day entries move to
    /// the next wall-clock occurrence of their target. Returns `None` when the
    /// entry is no longer due, which happens when a slow consumer lets several
    /// ticks queue the same entry.
    pub fn execute(&self, entry: &ScheduleEntry) -> Option<(Event, BoxedHandler)> {
        let now = self.inner.clock.now();
        if !entry.advance(now) {
            trace!(channel = %entry.channel, next = %entry.next_fire(), "stale trigger skipped");
            return None;
        }
        trace!(channel = %entry.channel, next = %entry.next_fire(), "schedule entry executed");
        Some((
            Event::scheduled(entry.channel.clone()).with_received_at(now),
            Arc::clone(&entry.handler),
        ))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, NaiveDate};

    use super::*;
    use crate::foundation::event::EventKind;
    use crate::framework::handler::boxed;

    /// Clock that only moves when told to.
    struct ManualClock(Mutex<DateTime<Local>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Local::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.0.lock()
        }
    }

    fn noop() -> BoxedHandler {
        boxed(|_event: Arc<Event>| async {})
    }

    fn utc(h: u32, m: u32) -> DateTime<FixedOffset> {
        let tz = FixedOffset::east_opt(0).unwrap();
        let naive = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        tz.from_local_datetime(&naive).unwrap()
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_passed() {
        let next = compute_first_fire(&utc(20, 0), Recurrence::Daily, 19, 46).unwrap();
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!((next.hour(), next.minute()), (19, 46));
    }

    #[test]
    fn daily_stays_today_when_upcoming() {
        let next = compute_first_fire(&utc(19, 0), Recurrence::Daily, 19, 46).unwrap();
        assert_eq!(next, utc(19, 46));
    }

    #[test]
    fn hourly_ignores_hour_and_rolls_one_hour() {
        let next = compute_first_fire(&utc(10, 50), Recurrence::Hourly, 3, 15).unwrap();
        assert_eq!(next, utc(11, 15));

        let next = compute_first_fire(&utc(10, 5), Recurrence::Hourly, 3, 15).unwrap();
        assert_eq!(next, utc(10, 15));
    }

    #[test]
    fn out_of_range_time_is_rejected() {
        assert_eq!(
            compute_first_fire(&utc(10, 0), Recurrence::Daily, 24, 0),
            Err(ScheduleError::InvalidTime { hour: 24, minute: 0 })
        );
    }

    #[test]
    fn sub_minute_interval_is_rejected() {
        let scheduler = Scheduler::new();
        let err = scheduler
            .every(Duration::from_secs(59), "C1", noop())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::IntervalTooSmall { .. }));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn interval_entry_is_not_due_early() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(clock.clone());
        scheduler
            .every(Duration::from_secs(120), "C1", noop())
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(scheduler.due_entries().is_empty());

        clock.advance(Duration::from_secs(60));
        let due = scheduler.due_entries();
        assert_eq!(due.len(), 1);

        let (event, _handler) = scheduler.execute(&due[0]).unwrap();
        assert_eq!(event.channel(), "C1");
        assert_eq!(event.kind(), EventKind::Scheduled);
        assert!(scheduler.due_entries().is_empty());

        clock.advance(Duration::from_secs(120));
        assert_eq!(scheduler.due_entries().len(), 1);
    }

    #[test]
    fn time_of_day_entry_advances_to_next_occurrence() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(clock.clone());
        let minute = clock.now().minute();
        scheduler
            .at(Recurrence::Hourly, 0, minute, "C1", noop())
            .unwrap();
        let entry = &scheduler.entries()[0];
        let first = entry.next_fire();

        clock.advance(Duration::from_secs(3600));
        assert!(entry.is_due(clock.now()));
        assert!(scheduler.execute(entry).is_some());
        assert!(entry.next_fire() > clock.now());
        assert_eq!(entry.next_fire().minute(), first.minute());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_emits_due_entries() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(clock.clone());
        scheduler.every(TICK, "C1", noop()).unwrap();

        let shutdown = CancellationToken::new();
        let runner = scheduler.clone();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { runner.start(token).await });

        clock.advance(TICK);
        let entry = scheduler.next_trigger().await.unwrap();
        assert_eq!(entry.channel(), "C1");

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn queued_trigger_fires_once_per_due_period() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(clock.clone());
        scheduler.every(Duration::from_secs(600), "C1", noop()).unwrap();

        let shutdown = CancellationToken::new();
        let runner = scheduler.clone();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { runner.start(token).await });

        // Two ticks pass while nobody drains the trigger queue.
        clock.advance(Duration::from_secs(600));
        tokio::time::sleep(TICK * 2 + Duration::from_secs(1)).await;

        let first = scheduler.next_trigger().await.unwrap();
        assert!(scheduler.execute(&first).is_some());

        let second = scheduler.next_trigger().await.unwrap();
        assert!(scheduler.execute(&second).is_none());
        assert!(second.next_fire() > clock.now());

        shutdown.cancel();
        task.await.unwrap();
    }
}
