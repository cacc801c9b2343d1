//! End-to-end flow through every stage with triggers routed by hand.

mod common;

use common::{Harness, ToolKind};
use reel_models::{StageName, Submission};
use reel_worker::{
    handle_event, ingest, run_gate_cycle, GateConfig, Handled, PipelineContext, PipelineError,
    PublishOutcome,
};

/// Deliver recorded triggers until none are left, in emission order.
async fn drain(h: &Harness, ctx: &PipelineContext) -> Vec<Handled> {
    let mut handled = Vec::new();
    loop {
        let events = h.sink.take();
        if events.is_empty() {
            return handled;
        }
        for event in events {
            handled.push(handle_event(ctx, &event).await.unwrap());
        }
    }
}

fn expected_compilation(h_keys: &[String]) -> Vec<u8> {
    h_keys
        .iter()
        .flat_map(|k| format!("normalized:source:https://videos.example.com/watch?v={}\n", k).into_bytes())
        .collect()
}

#[tokio::test]
async fn test_thirty_submissions_become_one_published_compilation() {
    let h = Harness::new(30);

    let ids: Vec<String> = (0..30).map(|i| format!("clip{:02}", i)).collect();
    for id in &ids {
        let url = format!("https://videos.example.com/watch?v={}", id);
        let outcome = ingest(&h.ctx, &Submission::new(url)).await.unwrap();
        assert!(outcome.is_queued());
    }
    assert_eq!(h.count(StageName::Quarantine).await, 30);

    let handled = drain(&h, &h.ctx).await;

    let normalized = handled
        .iter()
        .filter(|x| matches!(x, Handled::Normalized(_)))
        .count();
    let compiled: Vec<_> = handled
        .iter()
        .filter_map(|x| match x {
            Handled::Compiled(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    let published = handled
        .iter()
        .filter(|x| matches!(x, Handled::Published(PublishOutcome::Published { .. })))
        .count();

    assert_eq!(normalized, 30);
    assert_eq!(compiled.len(), 1, "gate fires exactly once");
    assert_eq!(compiled[0].member_count, 30);
    assert_eq!(published, 1);

    assert_eq!(h.count(StageName::Quarantine).await, 0);
    assert_eq!(h.count(StageName::Normalized).await, 0);
    assert_eq!(h.keys(StageName::Compilations).await, vec![compiled[0].name.clone()]);

    // Same-second uploads keep key order, which matches submission order here
    let content = h.read(StageName::Compilations, &compiled[0].name).await;
    assert_eq!(content, expected_compilation(&ids));

    let uploads = h.publisher.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, compiled[0].name);

    assert_eq!(h.runner.calls(ToolKind::Fetch), 30);
    assert_eq!(h.runner.calls(ToolKind::Transcode), 30);
    assert_eq!(h.runner.calls(ToolKind::Concat), 1);
    assert_eq!(h.scratch_leftovers(), 0);
    assert!(h.control_keys().await.iter().all(|k| k.starts_with("published-")));
}

#[tokio::test]
async fn test_partial_batch_waits_for_more_items() {
    let h = Harness::new(3);

    for id in ["a", "b"] {
        let url = format!("https://videos.example.com/v/{}", id);
        ingest(&h.ctx, &Submission::new(url)).await.unwrap();
    }
    let handled = drain(&h, &h.ctx).await;

    assert!(handled
        .iter()
        .any(|x| matches!(x, Handled::BatchNotReady { found: 2, required: 3 })));
    assert_eq!(h.count(StageName::Normalized).await, 2);
    assert_eq!(h.count(StageName::Compilations).await, 0);

    ingest(&h.ctx, &Submission::new("https://videos.example.com/v/c"))
        .await
        .unwrap();
    let handled = drain(&h, &h.ctx).await;

    assert_eq!(
        handled.iter().filter(|x| matches!(x, Handled::Compiled(_))).count(),
        1
    );
    assert_eq!(h.count(StageName::Normalized).await, 0);
}

#[tokio::test]
async fn test_concurrent_gate_cycles_with_lease_compile_once() {
    let h = Harness::new(30);
    h.seed_normalized(30).await;
    let peer = h.peer("other-worker");

    let (a, b) = tokio::join!(run_gate_cycle(&h.ctx), run_gate_cycle(&peer));
    let results = [a.unwrap(), b.unwrap()];

    let compiled = results
        .iter()
        .filter(|x| matches!(x, Handled::Compiled(_)))
        .count();
    let held = results
        .iter()
        .filter(|x| matches!(x, Handled::BatchHeldElsewhere { .. }))
        .count();
    assert_eq!(compiled, 1);
    assert_eq!(held, 1);
    assert_eq!(h.count(StageName::Compilations).await, 1);
    assert_eq!(h.count(StageName::Normalized).await, 0);
    assert!(h.control_keys().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_gate_cycles_without_lease_never_corrupt() {
    let h = Harness::with_gate(GateConfig::default().with_min_batch_size(30).with_lease(false));
    let seeded = h.seed_normalized(30).await;
    let peer = h.peer("other-worker");

    let (a, b) = tokio::join!(run_gate_cycle(&h.ctx), run_gate_cycle(&peer));

    let mut compiled = 0;
    for result in [a, b] {
        match result {
            Ok(Handled::Compiled(_)) => compiled += 1,
            Err(PipelineError::ConcatFailure { .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert!(compiled >= 1);

    let names = h.keys(StageName::Compilations).await;
    assert!((1..=2).contains(&names.len()));
    let expected: Vec<u8> = seeded
        .iter()
        .flat_map(|k| format!("normalized:{}\n", k).into_bytes())
        .collect();
    for name in names {
        assert_eq!(h.read(StageName::Compilations, &name).await, expected);
    }
    assert_eq!(h.count(StageName::Normalized).await, 0);
    assert_eq!(h.scratch_leftovers(), 0);
}
