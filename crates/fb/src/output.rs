use fb_core::types::{Draft, EventRecord, EventStats, EventStatus};
use fb_core::view::WorkItem;
use fb_sync::{Delivery, RecordOutcome, SyncOutcome};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

pub fn json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(status: EventStatus) -> String {
    let text = status.as_str();
    match status {
        EventStatus::Synced => text.if_supports_color(Stream::Stdout, |t| t.green()).to_string(),
        EventStatus::Error => text.if_supports_color(Stream::Stdout, |t| t.red()).to_string(),
        EventStatus::Pending => text.if_supports_color(Stream::Stdout, |t| t.yellow()).to_string(),
        EventStatus::Draft => text.if_supports_color(Stream::Stdout, |t| t.dimmed()).to_string(),
    }
}

pub fn draft(draft: &Draft) {
    println!(
        "{} ({}, {} field(s))",
        draft.id.if_supports_color(Stream::Stdout, |t| t.bold()),
        if draft.metadata.is_draft { "in progress" } else { "submitted" },
        draft.fields.len()
    );
    println!("  owner:    {}", draft.owner.display_name);
    println!("  updated:  {}", draft.last_updated.to_rfc3339());
    if let Some(section) = &draft.metadata.current_section {
        println!("  section:  {section}");
    }
    if !draft.metadata.completed_sections.is_empty() {
        println!("  done:     {}", draft.metadata.completed_sections.join(", "));
    }
    for (key, value) in &draft.fields {
        println!("  {key} = {value}");
    }
}

pub fn event(event: &EventRecord) {
    println!(
        "{} [{}] {} {}",
        event.id.if_supports_color(Stream::Stdout, |t| t.bold()),
        status(event.status),
        event.container_id,
        event.event_date
    );
    if let Some(server_id) = &event.server_id {
        println!("  server id: {server_id}");
    }
    if let Some(error) = &event.sync_error {
        println!("  error:     {error}");
    }
}

pub fn work_list(items: &[WorkItem]) {
    if items.is_empty() {
        println!("nothing recorded yet");
        return;
    }
    for item in items {
        let state = match item.status {
            Some(event_status) => status(event_status),
            None => "draft*".if_supports_color(Stream::Stdout, |t| t.cyan()).to_string(),
        };
        print!(
            "{:<11}  {:<8}  {}  {} field(s)",
            item.id,
            state,
            item.last_activity.format("%Y-%m-%d %H:%M"),
            item.field_count
        );
        if let Some(error) = &item.sync_error {
            print!("  ({error})");
        }
        println!();
    }
}

pub fn stats(stats: &EventStats) {
    println!(
        "total {}  draft {}  pending {}  synced {}  error {}",
        stats.total,
        stats.draft,
        stats.pending,
        stats.synced,
        stats.error
    );
}

pub fn record_outcome(outcome: &RecordOutcome) {
    match &outcome.delivery {
        Delivery::Synced { server_id } => println!(
            "{} {} -> {server_id}",
            "synced".if_supports_color(Stream::Stdout, |t| t.green()),
            outcome.event_id
        ),
        Delivery::Failed { reason } => println!(
            "{} {}: {reason}",
            "failed".if_supports_color(Stream::Stdout, |t| t.red()),
            outcome.event_id
        ),
    }
}

pub fn sync_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::NothingToSync { stats: totals } => {
            println!("nothing to sync");
            stats(totals);
        }
        SyncOutcome::Completed(report) => {
            for result in &report.results {
                record_outcome(result);
            }
            println!(
                "{} of {} record(s) synced",
                report.synced, report.attempted
            );
            stats(&report.stats);
        }
    }
}
