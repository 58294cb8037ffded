//! Schedule reconciler
//!
//! Keeps the cron jobs of a `tokio-cron-scheduler` instance in sync with the
//! active schedule triggers in the store. Every pass diffs the stored triggers
//! against the in-memory registry and adds, replaces or removes jobs; the
//! process never restarts to pick up a change.

use crate::config::SchedulerConfig;
use crate::error::CronError;
use crate::runtime::engine::ExecutionEngine;
use crate::workflow::execution::{ExecutionResult, TriggeredBy};
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Registry entry for one live cron job
#[derive(Debug, Clone)]
struct ScheduledJob {
    workflow_id: String,
    cron_expression: String,
    job_id: Uuid,
}

/// Snapshot of a registered job, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredJob {
    pub trigger_id: String,
    pub workflow_id: String,
    /// Expression as stored on the trigger (standard 5-field form)
    pub cron_expression: String,
    pub job_id: Uuid,
}

/// What one reconciliation pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct LoopState {
    scheduler_started: bool,
    /// Set by `stop`, cleared by `start`. Reconciling is a no-op while set.
    stopped: bool,
    ticker: Option<JoinHandle<()>>,
}

/// Owns the job registry and the periodic reconciliation loop.
///
/// Several independent reconcilers may exist side by side (tests do this);
/// running two against the same store duplicates firings.
pub struct ScheduleReconciler {
    scheduler: RwLock<JobScheduler>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    engine: Arc<ExecutionEngine>,
    interval: Duration,
    state: Mutex<LoopState>,
}

impl ScheduleReconciler {
    pub async fn new(engine: Arc<ExecutionEngine>, config: &SchedulerConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            jobs: Mutex::new(HashMap::new()),
            engine,
            interval: config.reconcile_interval(),
            state: Mutex::new(LoopState::default()),
        })
    }

    /// Reconcile once, start the cron clock and arm the periodic loop.
    /// No-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.ticker.is_some() {
            tracing::debug!("⏰ Schedule reconciler already running");
            return Ok(());
        }

        tracing::info!("⏰ Starting schedule reconciler (every {:?})", self.interval);
        state.stopped = false;

        if let Err(e) = self.sync().await {
            tracing::warn!("⚠️ Initial schedule reconciliation failed, retrying next interval: {}", e);
        }

        if !state.scheduler_started {
            self.scheduler.read().await.start().await?;
            state.scheduler_started = true;
        }

        let reconciler: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        state.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(reconciler) = reconciler.upgrade() else {
                    break;
                };
                // Errors are already logged inside reconcile
                let _ = reconciler.reconcile().await;
            }
        }));

        tracing::info!("✅ Schedule reconciler started with {} job(s)", self.registered_job_count().await);
        Ok(())
    }

    /// Stop the loop and every registered job. In-flight executions finish.
    /// Later `reconcile` calls register nothing until `start` runs again.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.stopped = true;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }

        let mut jobs = self.jobs.lock().await;
        let drained: Vec<(String, ScheduledJob)> = jobs.drain().collect();
        for (trigger_id, job) in &drained {
            self.remove_job(trigger_id, job.job_id).await;
        }

        tracing::info!("⏹️ Schedule reconciler stopped ({} job(s) removed)", drained.len());
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.ticker.is_some()
    }

    /// Sync the registry with the active schedule triggers in the store.
    ///
    /// A failed fetch leaves every job untouched. Triggers without a schedule
    /// or with an invalid expression are skipped; if such a trigger already has
    /// a job, that job keeps running. Does nothing after `stop`.
    ///
    /// Passes never overlap: the loop state lock is held for the whole pass,
    /// so the periodic loop and API-driven calls apply their snapshots in the
    /// order they read them.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let state = self.state.lock().await;
        if state.stopped {
            tracing::debug!("⏹️ Schedule reconciler is stopped, skipping reconciliation");
            return Ok(ReconcileSummary::default());
        }

        self.sync().await
    }

    /// One reconciliation pass. The registry lock is taken before the store
    /// is read and held until every change is applied.
    async fn sync(&self) -> Result<ReconcileSummary> {
        let mut jobs = self.jobs.lock().await;

        let triggers = match self.engine.storage().get_active_schedule_triggers().await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!("❌ Could not fetch schedule triggers, keeping current jobs: {}", e);
                return Err(e);
            }
        };

        let mut summary = ReconcileSummary::default();

        let fetched: HashSet<&str> = triggers.iter().map(|t| t.id.as_str()).collect();
        let stale: Vec<String> = jobs
            .keys()
            .filter(|id| !fetched.contains(id.as_str()))
            .cloned()
            .collect();
        for trigger_id in stale {
            if let Some(job) = jobs.remove(&trigger_id) {
                self.remove_job(&trigger_id, job.job_id).await;
                summary.removed += 1;
            }
        }

        for trigger in &triggers {
            let Some(expression) = trigger.schedule_expression() else {
                tracing::debug!("⏭️ Schedule trigger {} has no 'schedule' yet", trigger.id);
                summary.skipped += 1;
                continue;
            };

            if let Some(existing) = jobs.get(&trigger.id) {
                if existing.cron_expression == expression && existing.workflow_id == trigger.workflow_id {
                    continue;
                }
            }

            let scheduler_expression = match to_scheduler_expression(expression) {
                Ok(converted) => converted,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping schedule trigger {}: {}", trigger.id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let job = match self.build_job(&trigger.id, &trigger.workflow_id, expression, &scheduler_expression) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("⚠️ Could not build cron job for trigger {}: {}", trigger.id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let replaced = jobs.remove(&trigger.id);
            if let Some(old) = &replaced {
                self.remove_job(&trigger.id, old.job_id).await;
            }

            let job_id = match self.scheduler.read().await.add(job).await {
                Ok(job_id) => job_id,
                Err(e) => {
                    tracing::error!("❌ Failed to register cron job for trigger {}: {}", trigger.id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            jobs.insert(
                trigger.id.clone(),
                ScheduledJob {
                    workflow_id: trigger.workflow_id.clone(),
                    cron_expression: expression.to_string(),
                    job_id,
                },
            );

            if replaced.is_some() {
                tracing::info!("🔥 Updated cron job for trigger {}: {}", trigger.id, expression);
                summary.updated += 1;
            } else {
                tracing::info!("➕ Registered cron job for trigger {}: {}", trigger.id, expression);
                summary.added += 1;
            }
        }

        tracing::debug!("📊 Reconciled schedules: {:?}, {} job(s) live", summary, jobs.len());
        Ok(summary)
    }

    pub async fn registered_job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Registered jobs ordered by trigger id
    pub async fn registered_jobs(&self) -> Vec<RegisteredJob> {
        let jobs = self.jobs.lock().await;
        let mut snapshot: Vec<RegisteredJob> = jobs
            .iter()
            .map(|(trigger_id, job)| RegisteredJob {
                trigger_id: trigger_id.clone(),
                workflow_id: job.workflow_id.clone(),
                cron_expression: job.cron_expression.clone(),
                job_id: job.job_id,
            })
            .collect();
        snapshot.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        snapshot
    }

    fn build_job(
        &self,
        trigger_id: &str,
        workflow_id: &str,
        cron_expression: &str,
        scheduler_expression: &str,
    ) -> Result<Job> {
        let engine = Arc::clone(&self.engine);
        let trigger_id = trigger_id.to_string();
        let workflow_id = workflow_id.to_string();
        let cron_expression = cron_expression.to_string();

        let job = Job::new_async(scheduler_expression, move |_uuid, _l| {
            let engine = Arc::clone(&engine);
            let trigger_id = trigger_id.clone();
            let workflow_id = workflow_id.clone();
            let cron_expression = cron_expression.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger {} fired for workflow {}", trigger_id, workflow_id);
                // Not awaited: the next tick must not wait on this execution
                tokio::spawn(fire_schedule_trigger(engine, trigger_id, workflow_id, cron_expression));
            })
        })?;

        Ok(job)
    }

    async fn remove_job(&self, trigger_id: &str, job_id: Uuid) {
        let scheduler = self.scheduler.read().await;
        if let Err(e) = scheduler.remove(&job_id).await {
            tracing::warn!("⚠️ Failed to remove cron job for trigger {}: {}", trigger_id, e);
        } else {
            tracing::debug!("🛑 Removed cron job for trigger {}", trigger_id);
        }
    }
}

/// Run one schedule firing and stamp the trigger when it succeeded
pub async fn fire_schedule_trigger(
    engine: Arc<ExecutionEngine>,
    trigger_id: String,
    workflow_id: String,
    cron_expression: String,
) -> ExecutionResult {
    let payload = json!({
        "triggeredAt": Utc::now().to_rfc3339(),
        "triggerId": trigger_id,
        "cronExpression": cron_expression,
    });

    engine
        .execute_for_trigger(&trigger_id, &workflow_id, TriggeredBy::Schedule, payload)
        .await
}

/// Convert a standard 5-field cron expression (minute hour day-of-month month
/// day-of-week, Sunday = 0 or 7) into the seconds-first form the job scheduler
/// parses, where Sunday = 1.
pub fn to_scheduler_expression(expression: &str) -> Result<String, CronError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.is_empty() {
        return Err(CronError::Empty);
    }
    if fields.len() != 5 {
        return Err(CronError::FieldCount {
            expression: expression.to_string(),
            found: fields.len(),
        });
    }

    let invalid = |reason: String| CronError::Invalid {
        expression: expression.to_string(),
        reason,
    };

    let day_of_week = convert_day_of_week(fields[4]).map_err(invalid)?;
    let converted = format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], day_of_week);

    cron::Schedule::from_str(&converted).map_err(|e| invalid(e.to_string()))?;
    Ok(converted)
}

/// Renumber numeric day-of-week items. Named days and `*` pass through.
fn convert_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days: BTreeSet<u32> = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((start, end)) => (parse_day(start)?, parse_day(end)?),
                None => {
                    let day = parse_day(range)?;
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range '{}' runs backwards", range));
        }

        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
}

fn parse_day(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("day-of-week '{}' out of range 0-7", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::tests::{active_workflow, fixture, Fixture};
    use crate::workflow::trigger::{TriggerType, WorkflowTrigger};
    use crate::workflow::types::{Workflow, WorkflowStatus};
    use serde_json::Value;

    #[test]
    fn converts_standard_expressions() {
        assert_eq!(to_scheduler_expression("0 9 * * 1").unwrap(), "0 0 9 * * 2");
        assert_eq!(to_scheduler_expression("0 18 * * 5").unwrap(), "0 0 18 * * 6");
        assert_eq!(to_scheduler_expression("30 8 1 * *").unwrap(), "0 30 8 1 * *");
        assert_eq!(to_scheduler_expression("0 0 * * 0").unwrap(), "0 0 0 * * 1");
        assert_eq!(to_scheduler_expression("0 0 * * 7").unwrap(), "0 0 0 * * 1");
        assert_eq!(to_scheduler_expression("0 0 * * 1-5").unwrap(), "0 0 0 * * 2,3,4,5,6");
        assert_eq!(to_scheduler_expression("0 0 * * 5-7").unwrap(), "0 0 0 * * 1,6,7");
        assert_eq!(to_scheduler_expression("0 0 * * */2").unwrap(), "0 0 0 * * 1,3,5,7");
        assert_eq!(to_scheduler_expression("*/15 * * * MON-FRI").unwrap(), "0 */15 * * * MON-FRI");
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(to_scheduler_expression("   "), Err(CronError::Empty));
        assert!(matches!(
            to_scheduler_expression("* * * *"),
            Err(CronError::FieldCount { found: 4, .. })
        ));
        assert!(matches!(to_scheduler_expression("0 0 9 * * 1"), Err(CronError::FieldCount { found: 6, .. })));
        assert!(matches!(to_scheduler_expression("61 * * * *"), Err(CronError::Invalid { .. })));
        assert!(matches!(to_scheduler_expression("0 0 * * 8"), Err(CronError::Invalid { .. })));
        assert!(matches!(to_scheduler_expression("0 0 * * 5-2"), Err(CronError::Invalid { .. })));
        assert!(matches!(to_scheduler_expression("not a cron at all"), Err(CronError::Invalid { .. })));
    }

    fn weekly_graph() -> Value {
        json!({
            "nodes": [
                { "id": "t", "type": "trigger", "subtype": "weekly" },
                { "id": "email", "type": "action", "subtype": "send_email", "data": { "note": "fired by {{triggerId}}" } }
            ],
            "edges": [{ "id": "e1", "source": "t", "target": "email" }]
        })
    }

    async fn reconciler(fx: &Fixture) -> Arc<ScheduleReconciler> {
        Arc::new(
            ScheduleReconciler::new(
                Arc::new(fx.engine.clone()),
                &SchedulerConfig { reconcile_interval_secs: 3600 },
            )
            .await
            .unwrap(),
        )
    }

    async fn schedule(fx: &Fixture, workflow: &Workflow, config: Value) -> WorkflowTrigger {
        let trigger = WorkflowTrigger::new(&workflow.id, TriggerType::Schedule, config);
        fx.storage.create_trigger(&trigger).await.unwrap();
        trigger
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removing_a_trigger_removes_its_job() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        let monday = schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        let friday = schedule(&fx, &workflow, json!({ "schedule": "0 18 * * 5" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.start().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 2);

        fx.storage.delete_trigger(&friday.id).await.unwrap();
        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(reconciler.registered_job_count().await, 1);
        assert_eq!(reconciler.registered_jobs().await[0].trigger_id, monday.id);

        reconciler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_and_incomplete_triggers_are_skipped() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        schedule(&fx, &workflow, json!({ "schedule": "61 * * * *" })).await;
        schedule(&fx, &workflow, json!({ "schedule": "every monday" })).await;
        schedule(&fx, &workflow, json!({ "timezone": "UTC" })).await;

        let reconciler = reconciler(&fx).await;
        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(reconciler.registered_job_count().await, 0);

        schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_is_idempotent() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 18 * * 5" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.start().await.unwrap();
        let once = reconciler.registered_jobs().await;
        reconciler.start().await.unwrap();
        assert_eq!(reconciler.registered_jobs().await, once);
        assert_eq!(once.len(), 2);
        assert!(reconciler.is_running().await);

        reconciler.stop().await;
        reconciler.stop().await;
        assert!(!reconciler.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_reproduces_the_same_job_set() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        schedule(&fx, &workflow, json!({ "schedule": "*/30 * * * *" })).await;

        let fresh = reconciler(&fx).await;
        fresh.start().await.unwrap();
        let expected: Vec<(String, String)> = fresh
            .registered_jobs()
            .await
            .into_iter()
            .map(|j| (j.trigger_id, j.cron_expression))
            .collect();
        fresh.stop().await;

        let restarted = reconciler(&fx).await;
        restarted.start().await.unwrap();
        restarted.stop().await;
        assert_eq!(restarted.registered_job_count().await, 0);
        restarted.start().await.unwrap();
        let actual: Vec<(String, String)> = restarted
            .registered_jobs()
            .await
            .into_iter()
            .map(|j| (j.trigger_id, j.cron_expression))
            .collect();
        assert_eq!(actual, expected);
        restarted.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cron_edit_replaces_the_job() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        let trigger = schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 18 * * 5" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.reconcile().await.unwrap();
        let before = reconciler.registered_jobs().await;

        fx.storage
            .update_trigger(&trigger.id, &json!({ "schedule": "0 10 * * 2" }), Some(true))
            .await
            .unwrap();
        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary, ReconcileSummary { updated: 1, ..Default::default() });

        let after = reconciler.registered_jobs().await;
        assert_eq!(after.len(), before.len());
        let old = before.iter().find(|j| j.trigger_id == trigger.id).unwrap();
        let new = after.iter().find(|j| j.trigger_id == trigger.id).unwrap();
        assert_eq!(new.cron_expression, "0 10 * * 2");
        assert_ne!(new.job_id, old.job_id);

        // Unchanged store: nothing to do
        assert_eq!(reconciler.reconcile().await.unwrap(), ReconcileSummary::default());

        // An invalid edit keeps the previous job running
        fx.storage
            .update_trigger(&trigger.id, &json!({ "schedule": "61 * * * *" }), None)
            .await
            .unwrap();
        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary, ReconcileSummary { skipped: 1, ..Default::default() });
        let kept = reconciler.registered_jobs().await;
        assert_eq!(kept.len(), before.len());
        let still = kept.iter().find(|j| j.trigger_id == trigger.id).unwrap();
        assert_eq!(still.job_id, new.job_id);
        assert_eq!(still.cron_expression, "0 10 * * 2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deactivation_and_pause_remove_jobs() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        let first = schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 18 * * 5" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.reconcile().await.unwrap();

        fx.storage.set_trigger_active(&first.id, false).await.unwrap();
        reconciler.reconcile().await.unwrap();
        let jobs = reconciler.registered_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs.iter().all(|j| j.trigger_id != first.id));

        fx.storage.set_workflow_status(&workflow.id, WorkflowStatus::Paused).await.unwrap();
        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stopped_reconciler_registers_nothing() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.start().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 1);
        reconciler.stop().await;

        schedule(&fx, &workflow, json!({ "schedule": "0 18 * * 5" })).await;
        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert!(!reconciler.is_running().await);
        assert_eq!(reconciler.registered_job_count().await, 0);

        reconciler.start().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 2);
        reconciler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiting_pass_reads_the_store_after_the_running_one() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        let trigger = schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.registered_job_count().await, 1);

        // Another pass owns the registry while this one is queued
        let registry = reconciler.jobs.lock().await;
        let pending = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconciler.reconcile().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.storage.set_trigger_active(&trigger.id, false).await.unwrap();
        drop(registry);

        let summary = pending.await.unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(reconciler.registered_job_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_failure_keeps_running_jobs() {
        let fx = fixture().await;
        let workflow = active_workflow(&fx.storage, weekly_graph()).await;
        schedule(&fx, &workflow, json!({ "schedule": "0 9 * * 1" })).await;

        let reconciler = reconciler(&fx).await;
        reconciler.reconcile().await.unwrap();
        let before = reconciler.registered_jobs().await;

        fx.storage.close().await;
        assert!(reconciler.reconcile().await.is_err());
        assert_eq!(reconciler.registered_jobs().await, before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn firing_is_recorded_only_on_success() {
        let fx = fixture().await;
        let engine = Arc::new(fx.engine.clone());

        let good = active_workflow(&fx.storage, weekly_graph()).await;
        let good_trigger = schedule(&fx, &good, json!({ "schedule": "0 9 * * 1" })).await;
        let result = fire_schedule_trigger(
            Arc::clone(&engine),
            good_trigger.id.clone(),
            good.id.clone(),
            "0 9 * * 1".to_string(),
        )
        .await;
        assert!(result.success);
        let stamped = fx.storage.get_trigger(&good_trigger.id).await.unwrap().unwrap();
        assert!(stamped.last_fired_at.is_some());
        {
            let calls = fx.emails.calls.lock().unwrap();
            assert_eq!(calls[0].0["note"], json!(format!("fired by {}", good_trigger.id)));
            assert_eq!(calls[0].1["cronExpression"], json!("0 9 * * 1"));
        }

        let bad = active_workflow(
            &fx.storage,
            json!({
                "nodes": [
                    { "id": "t", "type": "trigger", "subtype": "weekly" },
                    { "id": "post", "type": "action", "subtype": "post_social" }
                ],
                "edges": [{ "id": "e1", "source": "t", "target": "post" }]
            }),
        )
        .await;
        let bad_trigger = schedule(&fx, &bad, json!({ "schedule": "0 18 * * 5" })).await;
        let result = fire_schedule_trigger(engine, bad_trigger.id.clone(), bad.id.clone(), "0 18 * * 5".to_string()).await;
        assert!(!result.success);
        let untouched = fx.storage.get_trigger(&bad_trigger.id).await.unwrap().unwrap();
        assert!(untouched.last_fired_at.is_none());
    }
}
