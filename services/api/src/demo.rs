use crate::infra::{
    at_midday, build_services, harbor_point, seed_demo_data, snapshot, vendor,
    LoggingReminderPublisher, ServiceLifecycle, ServiceScheduler, Services,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Args;
use coi_engine::compliance::{
    audit_to_csv, cois_to_csv, AuditQuery, AutoApplyMode, CoiFilter, CoiSubmission,
    LifecycleError, ReminderSchedule, ReviewDecision, ReviewRequest, SortOrder,
};
use coi_engine::error::AppError;
use serde::Serialize;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the walk-through starts on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// How submission verdicts are applied: advisory, approve_passing, approve_and_reject.
    #[arg(long, value_parser = parse_auto_apply, default_value = "advisory")]
    pub(crate) auto_apply: AutoApplyMode,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Date the sweep and reminder tick run at (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

fn parse_auto_apply(raw: &str) -> Result<AutoApplyMode, String> {
    AutoApplyMode::parse(raw).ok_or_else(|| {
        format!("unknown mode '{raw}'; expected advisory, approve_passing, or approve_and_reject")
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => eprintln!("failed to render JSON: {err}"),
    }
}

/// Seed certificates around `today`, then run one sweep and one reminder tick on that date.
pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let now = args.today.map(at_midday).unwrap_or_else(Utc::now);
    let Services {
        lifecycle,
        scheduler,
        ..
    } = build_services(AutoApplyMode::ApprovePassing, ReminderSchedule::default());

    seed_demo_data(&lifecycle, now)?;
    let sweep = lifecycle.sweep_expirations(now)?;
    let tick = scheduler.tick(now)?;

    print_json(&serde_json::json!({
        "today": now.date_naive(),
        "sweep": sweep,
        "reminders": tick,
    }));
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { today, auto_apply } = args;
    let now = today.map(at_midday).unwrap_or_else(Utc::now);
    let Services {
        lifecycle,
        scheduler,
        publisher,
    } = build_services(auto_apply, ReminderSchedule::default());

    println!("COI compliance demo ({})", now.date_naive());
    println!("Auto-apply mode: {auto_apply:?}");

    let outcomes = seed_demo_data(&lifecycle, now)?;
    println!("\nSubmitted certificates");
    for outcome in &outcomes {
        let view = outcome.record.status_view();
        println!(
            "- {} {} {} [{}] expires {}: {}",
            view.coi_id,
            view.owner.kind_label(),
            view.owner.id(),
            view.status,
            view.expiration_date,
            outcome.evaluation.summary()
        );
    }

    let Some(failing) = outcomes
        .iter()
        .find(|outcome| !outcome.evaluation.passed() && outcome.record.status.is_tracked())
    else {
        println!("\nNo failing certificate left pending; skipping the override walk-through");
        return finish(&lifecycle, &scheduler, &publisher, now);
    };
    let failing_id = failing.record.id.clone();

    println!("\nReviewer override on {failing_id}");
    let attempt = lifecycle.review(
        &failing_id,
        ReviewRequest {
            decision: ReviewDecision::Approve,
            reviewer_id: "u_reviewer".to_string(),
            notes: None,
        },
        now,
    );
    match attempt {
        Err(LifecycleError::OverrideReasonRequired { reasons, .. }) => {
            let codes: Vec<String> = reasons.iter().map(|reason| reason.code()).collect();
            println!("  Approval without a note refused: {}", codes.join(", "));
        }
        Err(err) => println!("  Review failed: {err}"),
        Ok(record) => println!("  Approved as {}", record.status),
    }

    if lifecycle.get(&failing_id)?.status.is_tracked() {
        let approved = lifecycle.review(
            &failing_id,
            ReviewRequest {
                decision: ReviewDecision::Approve,
                reviewer_id: "u_reviewer".to_string(),
                notes: Some("Umbrella policy on file covers the occurrence gap".to_string()),
            },
            now,
        )?;
        println!("  With override note: {}", approved.decision_rationale());
    }

    let renewal = lifecycle.submit(
        CoiSubmission {
            building_id: harbor_point(),
            owner: vendor("vendor-brightline-hvac"),
            snapshot: snapshot("Brightline HVAC Inc.", now.date_naive() + Duration::days(375)),
            attachments: Vec::new(),
        },
        now,
    )?;
    println!(
        "\nRenewal {} submitted: {}",
        renewal.record.id,
        renewal.evaluation.summary()
    );

    finish(&lifecycle, &scheduler, &publisher, now)
}

fn finish(
    lifecycle: &ServiceLifecycle,
    scheduler: &ServiceScheduler,
    publisher: &LoggingReminderPublisher,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let tick = scheduler.tick(now)?;
    println!("\nReminder tick on {}", now.date_naive());
    for reminder in &tick.emitted {
        println!(
            "- {} to {} {}: {} days left",
            reminder.threshold,
            reminder.owner.kind_label(),
            reminder.owner.id(),
            reminder.days_left
        );
    }

    let later = now + Duration::days(12);
    let sweep = lifecycle.sweep_expirations(later)?;
    let follow_up = scheduler.tick(later)?;
    println!(
        "\nTwelve days later: {} expired, {} reminder(s) sent, {} already on the ledger",
        sweep.expired.len(),
        follow_up.emitted.len(),
        follow_up.duplicates
    );
    println!("Reminders delivered in total: {}", publisher.delivered().len());

    let page = lifecycle.audit_log(&AuditQuery {
        limit: 5,
        sort: SortOrder::Desc,
        ..AuditQuery::default()
    })?;
    println!("\nLatest audit entries ({} total)", page.total);
    print_json(&page);

    let records = lifecycle.list(&CoiFilter::default())?;
    println!("\nCertificate export");
    print!("{}", cois_to_csv(&records)?);

    let entries = lifecycle.audit_entries(&AuditQuery::default())?;
    println!("\nAudit export");
    print!("{}", audit_to_csv(&entries)?);

    Ok(())
}
