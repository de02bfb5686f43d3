//! Pipeline behaviour as seen through the progress port.

#![allow(clippy::expect_used)]

use futures_util::FutureExt as _;
use llama_deploy::application::pipeline::immediate;
use llama_deploy::application::{Pipeline, StepStatus};

use crate::mocks::RecordingProgress;

#[tokio::test]
async fn test_progress_sees_every_transition_in_order() {
    let mut pipeline = Pipeline::new();
    pipeline.step("first", |_| immediate(Ok(())));
    pipeline.step_unless("second", |_| true, |_| immediate(Ok(())));
    pipeline.step("third", |_| immediate(Ok(())));

    let progress = RecordingProgress::default();
    pipeline.run(&progress).await.expect("run");

    assert_eq!(progress.total.get(), 3);
    assert_eq!(progress.advanced.get(), 3);
    assert_eq!(progress.started.borrow().as_slice(), ["first", "third"]);
    assert_eq!(progress.finished.borrow().as_slice(), ["first", "third"]);
    assert_eq!(progress.skipped.borrow().as_slice(), ["second"]);
    assert!(progress.failed.borrow().is_empty());
}

#[tokio::test]
async fn test_statuses_after_failure() {
    let mut pipeline = Pipeline::new();
    let done = pipeline.step("done", |_| immediate(Ok(1_u32)));
    let failed = pipeline.step("broken", |_| {
        immediate::<u32>(Err(anyhow::anyhow!("disk full")))
    });
    let pending = pipeline.step("never", |_| immediate(Ok(3_u32)));

    let progress = RecordingProgress::default();
    let err = pipeline.run(&progress).await.expect_err("fails");

    assert_eq!(format!("{err:#}"), "step 'broken' failed: disk full");
    let outputs = pipeline.outputs();
    assert!(matches!(outputs.status(done), Some(StepStatus::Done { .. })));
    assert_eq!(outputs.status(failed), Some(StepStatus::Failed));
    assert_eq!(outputs.status(pending), Some(StepStatus::Pending));
    assert_eq!(*outputs.get(done).expect("done output"), 1);
    assert!(outputs.try_get(pending).is_none());
    assert_eq!(progress.advanced.get(), 1);
    assert_eq!(progress.failed.borrow().as_slice(), ["broken"]);
}

#[tokio::test]
async fn test_async_step_reads_cloned_input() {
    let mut pipeline = Pipeline::new();
    let name = pipeline.step("name", |_| immediate(Ok("qwen".to_string())));
    let greeting = pipeline.step("greet", move |outs| {
        let name = outs.get(name).cloned();
        async move {
            tokio::task::yield_now().await;
            Ok(format!("hello {}", name?))
        }
        .boxed_local()
    });

    pipeline
        .run(&RecordingProgress::default())
        .await
        .expect("run");

    assert_eq!(pipeline.outputs().get(greeting).expect("greeting"), "hello qwen");
    assert!(matches!(
        pipeline.outputs().status(greeting),
        Some(StepStatus::Done { .. })
    ));
}
