use std::time::Instant;

use serde::Serialize;

use remedi_chat::controller::{in_memory_harness, InMemoryHarness, InMemoryRecordService, TurnOutcome};
use remedi_chat::{EventContext, FixedMediaResolver, InboundEnvelope, InboundEvent};
use remedi_core::{MediaItem, SubjectId};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str,
    elapsed_ms: u128,
    details: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    status: &'static str,
    checks: Vec<SmokeCheck>,
}

/// Drives the wizard engine against the in-memory doubles: registration,
/// a pickup refill order, and a prescription upload that hits the
/// attachment cap. No network or database is touched.
pub fn run() -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "smoke",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let report = runtime.block_on(async {
        let mut checks = Vec::new();
        checks.push(run_check("registration_flow", registration_flow()).await);
        checks.push(run_check("refill_pickup_flow", refill_pickup_flow()).await);
        checks.push(run_check("prescription_upload_cap", prescription_upload_cap()).await);
        let all_pass = checks.iter().all(|check| check.status == "pass");
        SmokeReport { status: if all_pass { "pass" } else { "fail" }, checks }
    });

    let output = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|error| format!("{{\"status\":\"fail\",\"error\":\"{error}\"}}"));

    if report.status == "pass" {
        CommandResult { exit_code: 0, output }
    } else {
        CommandResult { exit_code: 7, output }
    }
}

async fn run_check<F>(name: &'static str, check: F) -> SmokeCheck
where
    F: std::future::Future<Output = Result<String, String>>,
{
    let started = Instant::now();
    match check.await {
        Ok(details) => SmokeCheck {
            name,
            status: "pass",
            elapsed_ms: started.elapsed().as_millis(),
            details,
        },
        Err(details) => SmokeCheck {
            name,
            status: "fail",
            elapsed_ms: started.elapsed().as_millis(),
            details,
        },
    }
}

fn subject() -> SubjectId {
    SubjectId("27820000000".to_owned())
}

async fn turn(
    harness: &InMemoryHarness,
    event: InboundEvent,
) -> Result<TurnOutcome, String> {
    let envelope =
        InboundEnvelope { message_id: "m-smoke".to_owned(), subject_id: subject(), event };
    harness
        .controller
        .handle(&envelope, &EventContext::new("req-smoke"))
        .await
        .map_err(|error| error.to_string())
}

async fn text(harness: &InMemoryHarness, body: &str) -> Result<TurnOutcome, String> {
    turn(harness, InboundEvent::Text { body: body.to_owned() }).await
}

async fn tap(harness: &InMemoryHarness, label: &str) -> Result<TurnOutcome, String> {
    turn(harness, InboundEvent::InteractiveChoice { chosen_label: label.to_owned() }).await
}

async fn registration_flow() -> Result<String, String> {
    let harness =
        in_memory_harness(InMemoryRecordService::unknown(), FixedMediaResolver::default());

    text(&harness, "hi").await?;
    text(&harness, "Smoke").await?;
    text(&harness, "Test").await?;
    text(&harness, "01/01/1990").await?;
    tap(&harness, "Principal member").await?;
    tap(&harness, "Private Client").await?;
    let outcome = tap(&harness, "I accept").await?;

    if outcome != TurnOutcome::Completed {
        return Err(format!("expected completion, got {outcome:?}"));
    }
    let registrations = harness.records.registrations();
    if registrations.len() != 1 {
        return Err(format!("expected 1 registration, found {}", registrations.len()));
    }
    if registrations[0].dependent_number.as_deref() != Some("00") {
        return Err("principal default-fill did not inject 00".to_owned());
    }
    Ok("registration committed with default-filled dependent number".to_owned())
}

async fn refill_pickup_flow() -> Result<String, String> {
    let harness = in_memory_harness(
        InMemoryRecordService::registered()
            .with_pharmacies(vec!["CityMed (CBD)".to_owned()]),
        FixedMediaResolver::default(),
    );

    tap(&harness, "Place an order").await?;
    tap(&harness, "Refill").await?;
    text(&harness, "ORD-2026-0001").await?;
    tap(&harness, "Pickup").await?;
    text(&harness, "1").await?;
    text(&harness, "-").await?;
    let outcome = tap(&harness, "Confirm order").await?;

    if outcome != TurnOutcome::Completed {
        return Err(format!("expected completion, got {outcome:?}"));
    }
    let orders = harness.records.orders();
    if orders.len() != 1 {
        return Err(format!("expected 1 order, found {}", orders.len()));
    }
    Ok("refill order placed for pickup".to_owned())
}

async fn prescription_upload_cap() -> Result<String, String> {
    let mut media = FixedMediaResolver::default();
    for index in 1..=6 {
        media = media.with_item(
            format!("m-{index}"),
            MediaItem { content_type: "image/jpeg".to_owned(), bytes: vec![0xFF, 0xD8] },
        );
    }
    let harness = in_memory_harness(InMemoryRecordService::registered(), media);

    tap(&harness, "Place an order").await?;
    tap(&harness, "New prescription").await?;
    for index in 1..=6 {
        turn(
            &harness,
            InboundEvent::Image {
                media_ref: format!("m-{index}"),
                mime_type: "image/jpeg".to_owned(),
            },
        )
        .await?;
    }

    let state = harness
        .states
        .get(&subject())
        .ok_or_else(|| "conversation state missing".to_owned())?;
    let flow = format!("{:?}", state.flow);
    if !flow.contains("DeliveryMethod") {
        return Err(format!("expected auto-advance to DeliveryMethod, state is {flow}"));
    }
    Ok("sixth upload auto-advanced to the delivery-method step".to_owned())
}
