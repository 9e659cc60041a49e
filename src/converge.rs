//! Convergence pass
//!
//! Runs the provisioning steps in order against a [`Host`] and a
//! [`SqlSession`], records what each step did, and handles service restart
//! notifications. Immediate restarts happen on the spot; delayed restarts
//! are coalesced and issued once, after the last step.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ConvergeConfig;
use crate::error::Result;
use crate::host::Host;
use crate::provision;
use crate::replication::{self, InstanceMetadata, ReplicationRole};
use crate::sql::SqlSession;
use crate::tuning::TunedConfig;

/// What a step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step changed the system
    Applied,
    /// The system already matched
    Unchanged,
    /// The step did not apply to this system
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Outcome of one named step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Result of a convergence pass
#[derive(Debug, Clone, Serialize)]
pub struct ConvergeReport {
    pub instance: String,
    pub role: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metadata: Option<InstanceMetadata>,
    pub steps: Vec<StepRecord>,
    /// Services restarted during the pass, in order
    pub restarts: Vec<String>,
}

impl ConvergeReport {
    fn new(instance: &str, role: Option<&ReplicationRole>) -> Self {
        Self {
            instance: instance.to_string(),
            role: role.map(|r| r.kind_name().to_string()),
            started_at: Utc::now(),
            finished_at: None,
            metadata: None,
            steps: Vec::new(),
            restarts: Vec::new(),
        }
    }

    /// Outcome of the first step with the given name
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|r| r.step == step)
            .map(|r| &r.outcome)
    }

    /// Whether any step changed the system
    pub fn changed(&self) -> bool {
        self.steps
            .iter()
            .any(|r| r.outcome == StepOutcome::Applied)
    }
}

/// State shared by the steps of one pass
pub struct RunContext<'a> {
    pub host: &'a dyn Host,
    pub session: &'a dyn SqlSession,
    pub config: &'a ConvergeConfig,
    pub tuned: Option<TunedConfig>,
    report: ConvergeReport,
    delayed_restarts: Vec<String>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        host: &'a dyn Host,
        session: &'a dyn SqlSession,
        config: &'a ConvergeConfig,
        tuned: Option<TunedConfig>,
        instance: &str,
        role: Option<&ReplicationRole>,
    ) -> Self {
        Self {
            host,
            session,
            config,
            tuned,
            report: ConvergeReport::new(instance, role),
            delayed_restarts: Vec::new(),
        }
    }

    /// Record the outcome of a step
    pub fn record(&mut self, step: &str, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Applied => tracing::info!(step, "Applied"),
            StepOutcome::Unchanged => tracing::debug!(step, "Up to date"),
            StepOutcome::Skipped { reason } => tracing::info!(step, reason = %reason, "Skipped"),
        }
        self.report.steps.push(StepRecord {
            step: step.to_string(),
            outcome,
        });
    }

    /// Record `Applied` or `Unchanged`
    pub fn record_change(&mut self, step: &str, changed: bool) {
        let outcome = if changed {
            StepOutcome::Applied
        } else {
            StepOutcome::Unchanged
        };
        self.record(step, outcome);
    }

    pub fn set_metadata(&mut self, metadata: InstanceMetadata) {
        self.report.metadata = Some(metadata);
    }

    /// Queue a restart for the end of the pass
    pub fn notify_delayed(&mut self, service: &str) {
        if !self.delayed_restarts.iter().any(|s| s == service) {
            tracing::debug!(service, "Queued delayed restart");
            self.delayed_restarts.push(service.to_string());
        }
    }

    /// Restart a service now. A delayed restart already queued for the same
    /// service is dropped, since this restart picks up the same changes.
    pub async fn notify_immediate(&mut self, service: &str) -> Result<()> {
        self.delayed_restarts.retain(|s| s != service);
        self.host.restart_service(service).await?;
        self.report.restarts.push(service.to_string());
        Ok(())
    }

    /// Issue the queued delayed restarts
    pub async fn flush_restarts(&mut self) -> Result<()> {
        for service in std::mem::take(&mut self.delayed_restarts) {
            self.host.restart_service(&service).await?;
            self.report.restarts.push(service);
        }
        Ok(())
    }

    /// Services with a restart still queued
    pub fn pending_restarts(&self) -> &[String] {
        &self.delayed_restarts
    }

    pub fn finish(mut self) -> ConvergeReport {
        self.report.finished_at = Some(Utc::now());
        self.report
    }
}

/// Runs one convergence pass
pub struct Converger<'a> {
    host: &'a dyn Host,
    session: &'a dyn SqlSession,
    config: &'a ConvergeConfig,
    tuned: Option<TunedConfig>,
}

impl<'a> Converger<'a> {
    pub fn new(host: &'a dyn Host, session: &'a dyn SqlSession, config: &'a ConvergeConfig) -> Self {
        Self {
            host,
            session,
            config,
            tuned: None,
        }
    }

    /// Use these tuned values instead of detecting hardware
    pub fn with_tuning(mut self, tuned: TunedConfig) -> Self {
        self.tuned = Some(tuned);
        self
    }

    /// Run the pass.
    ///
    /// Input errors (such as a slave without a master host) are returned
    /// before the host or the database is touched.
    pub async fn run(&self) -> Result<ConvergeReport> {
        let role = self.config.replication_role()?;
        let options = self.config.instance_options()?;

        let tuned = match (&self.tuned, self.config.tuning.auto) {
            (Some(tuned), _) => Some(tuned.clone()),
            (None, true) => Some(crate::tuning::auto_tune()),
            (None, false) => None,
        };

        tracing::info!(
            instance = %options.name,
            port = options.port,
            role = role.as_ref().map(|r| r.kind_name()).unwrap_or("standalone"),
            "Starting convergence pass"
        );

        let mut ctx = RunContext::new(
            self.host,
            self.session,
            self.config,
            tuned,
            &options.name,
            role.as_ref(),
        );

        let result = match &role {
            None => provision::provision(&mut ctx, &options).await,
            Some(role) => run_replicated(&mut ctx, role, &options).await,
        };

        if let Err(e) = result {
            if !ctx.pending_restarts().is_empty() {
                tracing::warn!(
                    services = ?ctx.pending_restarts(),
                    "Pass failed; queued restarts were not issued"
                );
            }
            return Err(e);
        }

        ctx.flush_restarts().await?;
        let report = ctx.finish();

        tracing::info!(
            instance = %report.instance,
            changed = report.changed(),
            restarts = report.restarts.len(),
            "Convergence pass complete"
        );
        Ok(report)
    }
}

async fn run_replicated(
    ctx: &mut RunContext<'_>,
    role: &ReplicationRole,
    options: &crate::config::InstanceOptions,
) -> Result<()> {
    let metadata = replication::configure(ctx, role, options).await?;
    ctx.set_metadata(metadata);

    if let ReplicationRole::Slave {
        password, master, ..
    } = role
    {
        replication::bootstrap_slave(ctx, master, password).await?;
    }

    Ok(())
}
