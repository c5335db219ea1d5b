mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::MockServer;
use memos_client::{
    AttachmentUpload, BatchMode, BatchOutcome, CreateMemo, Error, MemoUpdate, MemosClient,
    SearchFilter, State, Visibility,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn slow_response_times_out_instead_of_hanging() {
    let server = MockServer::start().await;
    let config = server
        .token_config()
        .timeout(Duration::from_millis(200))
        .max_attempts(1)
        .build()
        .unwrap();
    let client = MemosClient::new(config).unwrap();

    let started = Instant::now();
    let error = client.get_memo("slow").await.unwrap_err();
    assert!(matches!(
        error,
        Error::Timeout {
            operation: "get_memo",
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn server_errors_are_retried_for_get() {
    let server = MockServer::start().await;
    server.state.insert_memo("1", "hello");
    server.state.fail_next.store(2, Ordering::SeqCst);
    let client = MemosClient::new(server.token_config().max_attempts(3).build().unwrap()).unwrap();

    let memo = client.get_memo("1").await.unwrap();
    assert_eq!(memo.content, "hello");
    assert_eq!(server.state.memo_gets.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let server = MockServer::start().await;
    server.state.insert_memo("1", "hello");
    server.state.fail_next.store(10, Ordering::SeqCst);
    let client = MemosClient::new(server.token_config().max_attempts(3).build().unwrap()).unwrap();

    let error = client.get_memo("1").await.unwrap_err();
    assert_eq!(error.status(), Some(503));
    assert_eq!(server.state.memo_gets.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn post_is_not_retried_by_default() {
    let server = MockServer::start().await;
    server.state.fail_next.store(1, Ordering::SeqCst);
    let client = MemosClient::new(server.token_config().max_attempts(3).build().unwrap()).unwrap();

    let error = client
        .create_memo(CreateMemo::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Api { status: 503, .. }));
    assert_eq!(server.state.memo_creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_visibility_is_a_validation_error() {
    let server = MockServer::start().await;
    let client = MemosClient::new(server.token_config().build().unwrap()).unwrap();

    let error = client.get_memo("weird").await.unwrap_err();
    let Error::Validation(validation) = error else {
        panic!("expected a validation error, got {error:?}");
    };
    assert!(validation.has_field("visibility"));
}

#[tokio::test]
async fn missing_memo_reports_status_and_resource() {
    let server = MockServer::start().await;
    let client = MemosClient::new(server.token_config().build().unwrap()).unwrap();

    let error = client.get_memo("missing").await.unwrap_err();
    match error {
        Error::Api {
            operation,
            resource,
            status,
            message,
        } => {
            assert_eq!(operation, "get_memo");
            assert_eq!(resource.as_deref(), Some("memos/missing"));
            assert_eq!(status, 404);
            assert_eq!(message, "memo not found");
        }
        other => panic!("expected an API error, got {other:?}"),
    }
}

#[tokio::test]
async fn searched_memos_carry_the_requested_tag() {
    let server = MockServer::start().await;
    let client = MemosClient::new(server.token_config().build().unwrap()).unwrap();
    client
        .create_memo(CreateMemo::new("note one").tag("x"))
        .await
        .unwrap();
    client
        .create_memo(CreateMemo::new("note two").tag("y"))
        .await
        .unwrap();

    let page = client
        .search_memos(&SearchFilter::new().tag("x"))
        .await
        .unwrap();
    assert_eq!(page.memos.len(), 1);
    assert_eq!(page.next_page_token, None);

    for found in page.memos {
        let memo = client.get_memo(found.name.as_str()).await.unwrap();
        assert!(memo.has_tag("x"));
    }
}

#[tokio::test]
async fn update_and_delete_memo() {
    let server = MockServer::start().await;
    let client = MemosClient::new(server.token_config().build().unwrap()).unwrap();
    let created = client
        .create_memo(
            CreateMemo::new("draft")
                .visibility(Visibility::Protected)
                .memo_id("draft-1"),
        )
        .await
        .unwrap();
    assert_eq!(created.name.as_str(), "memos/draft-1");
    assert_eq!(created.visibility, Visibility::Protected);

    let updated = client
        .update_memo(
            "draft-1",
            &MemoUpdate::new().content("final").tag("done").pinned(true),
        )
        .await
        .unwrap();
    assert_eq!(updated.content, "final\n\n#done");
    assert!(updated.pinned);
    assert!(updated.has_tag("done"));
    assert_eq!(updated.state, State::Normal);

    client.delete_memo("memos/draft-1").await.unwrap();
    let error = client.get_memo("draft-1").await.unwrap_err();
    assert_eq!(error.status(), Some(404));
}

async fn run_batch(mode: BatchMode) {
    let server = MockServer::start().await;
    server.state.reject_content("b");
    let client = MemosClient::new(server.token_config().batch_mode(mode).build().unwrap()).unwrap();

    let report = client
        .create_memos_batch(vec![
            CreateMemo::new("a"),
            CreateMemo::new("b"),
            CreateMemo::new("c"),
        ])
        .await;

    assert_eq!(report.len(), 3);
    let created: Vec<usize> = report.succeeded().map(|(index, _)| index).collect();
    assert_eq!(created, vec![0, 2]);
    let failed: Vec<usize> = report.failed().map(|(index, _)| index).collect();
    assert_eq!(failed, vec![1]);
    assert!(matches!(
        report.items()[1].outcome,
        BatchOutcome::Failed(Error::Api { status: 400, .. })
    ));

    let error = report.into_result().unwrap_err();
    assert!(matches!(error, Error::PartialBatchFailure { .. }));
}

#[tokio::test]
async fn sequential_batch_reports_each_item() {
    run_batch(BatchMode::Sequential).await;
}

#[tokio::test]
async fn concurrent_batch_reports_each_item_in_order() {
    run_batch(BatchMode::Concurrent { max_in_flight: 3 }).await;
}

#[tokio::test]
async fn batch_keeps_memo_whose_attachment_link_failed() {
    let server = MockServer::start().await;
    let client = MemosClient::new(server.token_config().max_attempts(1).build().unwrap()).unwrap();
    let attachment = client
        .upload_attachment(AttachmentUpload::from_bytes("notes.txt", b"hi".to_vec()))
        .await
        .unwrap();
    server.state.fail_attachment_links.store(true, Ordering::SeqCst);

    let report = client
        .create_memos_batch(vec![
            CreateMemo::new("plain"),
            CreateMemo::new("linked").attachment(attachment.name.as_str()),
        ])
        .await;

    assert_eq!(server.state.memo_creates.load(Ordering::SeqCst), 2);
    assert!(matches!(report.items()[0].outcome, BatchOutcome::Created(_)));
    match &report.items()[1].outcome {
        BatchOutcome::CreatedWithErrors { name, error } => {
            assert!(server.state.memos.lock().unwrap().contains_key(name.id()));
            assert!(matches!(
                error,
                Error::Api {
                    operation: "set_memo_attachments",
                    status: 500,
                    ..
                }
            ));
        }
        other => panic!("expected a created memo with errors, got {other:?}"),
    }
    assert_eq!(report.succeeded().count(), 2);
    assert_eq!(report.not_created().count(), 0);
    assert!(matches!(
        report.into_result(),
        Err(Error::PartialBatchFailure { .. })
    ));
}
