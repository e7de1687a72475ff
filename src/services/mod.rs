/// Synchronization of sun-driven schedules
use crate::clients::SunClient;
use crate::domain::{CycleReport, SunEvent, SunTimes, SyncTarget};
use crate::errors::SyncResult;
use crate::repo::ScheduleRepo;
use crate::utils::{format_delta, format_time_only, time_of_day_delta};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Owns the sun client and schedule registry; runs one cycle at a time
pub struct SyncService {
    sun_client: SunClient,
    repo: ScheduleRepo,
    targets: Vec<SyncTarget>,
    /// Sun times of the last cycle that completed, for delta reporting
    baseline: Option<SunTimes>,
    poll_counter: u64,
}

impl SyncService {
    pub fn new(sun_client: SunClient, repo: ScheduleRepo, mut targets: Vec<SyncTarget>) -> Self {
        targets.sort_by_key(|t| t.id);
        Self {
            sun_client,
            repo,
            targets,
            baseline: None,
            poll_counter: 0,
        }
    }

    #[allow(dead_code)]
    pub fn baseline(&self) -> Option<SunTimes> {
        self.baseline
    }

    #[allow(dead_code)]
    pub fn repo(&self) -> &ScheduleRepo {
        &self.repo
    }

    /// Fetch sun times and push them to every configured schedule.
    ///
    /// Sunrise targets go first, then sunset targets, each ascending by id.
    /// The first failure ends the cycle; schedules already written stay
    /// written.
    pub async fn run_cycle(&mut self) -> SyncResult<CycleReport> {
        let times = self.sun_client.lookup().await?;

        if let Some(prev) = &self.baseline {
            log_delta(&prev.sunrise, &times.sunrise, SunEvent::Sunrise);
            log_delta(&prev.sunset, &times.sunset, SunEvent::Sunset);
        }

        let mut report = CycleReport::default();
        for event in [SunEvent::Sunrise, SunEvent::Sunset] {
            self.update_batch(event, times.get(event), &mut report)
                .await?;
        }

        self.baseline = Some(times);
        Ok(report)
    }

    async fn update_batch(
        &mut self,
        event: SunEvent,
        at: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        for target in self.targets.iter().filter(|t| t.event == event) {
            if !target.is_set() {
                report.skipped += 1;
                continue;
            }

            let changed = self
                .repo
                .update_schedule_time(target.id, at)
                .await
                .map_err(|e| e.context(format!("update {} schedule ID={}", event, target.id)))?;

            if changed {
                report.updated += 1;
            } else {
                report.unchanged += 1;
            }
        }

        Ok(())
    }

    /// One timer-driven poll; failures are logged and retried next tick
    pub async fn poll(&mut self) {
        match self.run_cycle().await {
            Ok(report) => debug!(
                updated = report.updated,
                unchanged = report.unchanged,
                skipped = report.skipped,
                "Poll update #{} done",
                self.poll_counter
            ),
            Err(e) => warn!("Poll update #{} failed: {}", self.poll_counter, e),
        }
        self.poll_counter += 1;
    }

    /// Poll every `period` until `shutdown` resolves. The shutdown future is
    /// only observed between cycles. Returns the number of polls made.
    pub async fn run(&mut self, period: Duration, shutdown: impl Future<Output = ()>) -> u64 {
        info!("Sunrise/sunset poll period is {} seconds", period.as_secs());

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Entering main loop...");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Caught signal, shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.poll().await;
        }

        info!("Shutting down after {} poll(s)", self.poll_counter);
        self.poll_counter
    }
}

fn log_delta(prev: &DateTime<Utc>, latest: &DateTime<Utc>, event: SunEvent) {
    let delta = time_of_day_delta(prev, latest);
    if delta.num_seconds() == 0 {
        info!(
            "No difference in {} time ({})",
            event,
            format_time_only(prev)
        );
    } else {
        info!(
            "The {} time is {} ({})",
            event,
            format_delta(delta),
            format_time_only(latest)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::testing::{sun_body, FakeTransport};
    use crate::clients::{DATA_STALE_PERIOD, DEFAULT_SUN_SERVER_URL};
    use crate::config::PhosconConfig;
    use crate::errors::SyncError;
    use std::sync::Arc;

    const ACK: &str = r#"[{"success": {}}]"#;
    const DAY1: (&str, &str) = ("2024-03-01T05:51:07+00:00", "2024-03-01T16:32:40+00:00");
    const DAY2: (&str, &str) = ("2024-03-02T05:48:31+00:00", "2024-03-02T16:35:12+00:00");

    struct Harness {
        service: SyncService,
        sun: Arc<FakeTransport>,
        gateway: Arc<FakeTransport>,
    }

    async fn harness(targets: Vec<SyncTarget>) -> Harness {
        let gateway = Arc::new(FakeTransport::new());
        gateway.push_get(Ok(&serde_json::json!({
            "1": {"created": "2019-04-05T18:30:21", "status": "enabled", "name": "Lights on",
                  "time": "W127/T16:00:00", "localtime": "W127/T17:00:00"},
            "2": {"created": "2019-04-05T18:31:00", "status": "enabled", "name": "Lights off",
                  "time": "W127/T06:00:00", "localtime": "W127/T07:00:00"},
            "3": {"created": "2019-04-05T18:32:10", "status": "enabled", "name": "Blinds up",
                  "time": "W31/T06:30:00", "localtime": "W31/T07:30:00"}
        })
        .to_string()));
        let cfg = PhosconConfig {
            host: "gw".to_string(),
            port: 80,
            api_key: "KEY".to_string(),
        };
        let repo = ScheduleRepo::initialize(&cfg, gateway.clone()).await.unwrap();

        let sun = Arc::new(FakeTransport::new());
        let sun_client = SunClient::new(sun.clone(), DEFAULT_SUN_SERVER_URL, 59.33, 18.07);

        Harness {
            service: SyncService::new(sun_client, repo, targets),
            sun,
            gateway,
        }
    }

    fn put_urls(transport: &FakeTransport) -> Vec<String> {
        transport
            .requests()
            .into_iter()
            .filter(|r| r.method == "PUT")
            .map(|r| r.url)
            .collect()
    }

    fn sunrise(id: i64) -> SyncTarget {
        SyncTarget::new(id, SunEvent::Sunrise)
    }

    fn sunset(id: i64) -> SyncTarget {
        SyncTarget::new(id, SunEvent::Sunset)
    }

    #[tokio::test]
    async fn test_cycle_updates_sunrise_then_sunset_by_id() {
        let mut h = harness(vec![sunset(1), sunrise(3), sunrise(2)]).await;
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        for _ in 0..3 {
            h.gateway.push_put(Ok(ACK));
        }

        let report = h.service.run_cycle().await.unwrap();

        assert_eq!(report.updated, 3);
        assert_eq!(
            put_urls(&h.gateway),
            vec![
                "http://gw:80/api/KEY/schedules/2",
                "http://gw:80/api/KEY/schedules/3",
                "http://gw:80/api/KEY/schedules/1",
            ]
        );
        assert_eq!(h.service.repo().get(2).unwrap().trigger_expr, "W127/T05:51:07");
        assert_eq!(h.service.repo().get(3).unwrap().trigger_expr, "W31/T05:51:07");
        assert_eq!(h.service.repo().get(1).unwrap().trigger_expr, "W127/T16:32:40");
        assert!(h.service.baseline().is_some());
    }

    #[tokio::test]
    async fn test_repeat_cycle_writes_nothing() {
        let mut h = harness(vec![sunrise(2), sunset(1)]).await;
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        h.gateway.push_put(Ok(ACK));
        h.gateway.push_put(Ok(ACK));

        h.service.run_cycle().await.unwrap();
        let report = h.service.run_cycle().await.unwrap();

        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(h.gateway.count("PUT"), 2);
        // Second cycle was served from the sun cache
        assert_eq!(h.sun.count("GET"), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_touches_no_schedule() {
        let mut h = harness(vec![sunrise(2), sunset(1)]).await;
        h.sun.push_get(Err("dns failure"));

        let err = h.service.run_cycle().await.unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(h.gateway.count("PUT"), 0);
        assert!(h.service.baseline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sunrise_failure_skips_sunset_and_keeps_baseline() {
        let mut h = harness(vec![sunrise(2), sunrise(3), sunset(1)]).await;
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        for _ in 0..3 {
            h.gateway.push_put(Ok(ACK));
        }
        h.service.run_cycle().await.unwrap();
        let first = h.service.baseline().unwrap();

        tokio::time::advance(DATA_STALE_PERIOD).await;
        h.sun.push_get(Ok(&sun_body(DAY2.0, DAY2.1)));
        h.gateway.push_put(Err("request failed with HTTP code 502"));

        let err = h.service.run_cycle().await.unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert!(err.to_string().contains("sunrise schedule ID=2"));
        // One failed sunrise write, nothing for schedule 3 or the sunset batch
        assert_eq!(h.gateway.count("PUT"), 4);
        assert_eq!(h.service.repo().get(1).unwrap().trigger_expr, "W127/T16:32:40");
        assert_eq!(h.service.baseline(), Some(first));
    }

    #[tokio::test]
    async fn test_unknown_target_fails_fast() {
        let mut h = harness(vec![sunrise(9), sunrise(2)]).await;
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        h.gateway.push_put(Ok(ACK));

        let err = h.service.run_cycle().await.unwrap_err();

        assert!(matches!(err, SyncError::NotFound(9)));
        // Ascending order: schedule 2 was already written before 9 failed
        assert_eq!(put_urls(&h.gateway), vec!["http://gw:80/api/KEY/schedules/2"]);
        assert!(h.service.baseline().is_none());
    }

    #[tokio::test]
    async fn test_unset_targets_are_skipped() {
        let mut h = harness(vec![SyncTarget::unset(SunEvent::Sunrise), sunset(1)]).await;
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        h.gateway.push_put(Ok(ACK));

        let report = h.service.run_cycle().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(put_urls(&h.gateway), vec!["http://gw:80/api/KEY/schedules/1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_shutdown() {
        let mut h = harness(vec![sunset(1)]).await;
        let period = Duration::from_secs(600);
        h.sun.push_get(Ok(&sun_body(DAY1.0, DAY1.1)));
        h.sun.push_get(Err("timeout"));
        h.sun.push_get(Ok(&sun_body(DAY2.0, DAY2.1)));
        h.gateway.push_put(Ok(ACK));
        h.gateway.push_put(Ok(ACK));

        let shutdown = tokio::time::sleep(period * 3 + Duration::from_secs(1));
        let polls = h.service.run(period, shutdown).await;

        assert_eq!(polls, 3);
        assert_eq!(h.sun.count("GET"), 3);
        assert_eq!(h.gateway.count("PUT"), 2);
        assert_eq!(h.service.repo().get(1).unwrap().trigger_expr, "W127/T16:35:12");
    }
}
