use async_trait::async_trait;
use bridge_cloud::{CloudError, TelemetrySender};
use bridge_ingest::{IngestError, ServerStatus, TagSession};
use bridge_pipeline::{BindingTable, CycleReport, PublishConfig, PublishLoop};
use domain::{TagBinding, TagReading, TagValue};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// 按脚本返回读取结果的会话；脚本耗尽后返回空批次并触发取消。
struct ScriptedSession {
    status: ServerStatus,
    script: VecDeque<Result<Vec<TagReading>, IngestError>>,
    reads: Arc<AtomicUsize>,
    cancel_when_exhausted: Option<CancellationToken>,
}

impl ScriptedSession {
    fn new(script: Vec<Result<Vec<TagReading>, IngestError>>) -> Self {
        Self {
            status: ServerStatus::default(),
            script: script.into(),
            reads: Arc::new(AtomicUsize::new(0)),
            cancel_when_exhausted: None,
        }
    }
}

#[async_trait]
impl TagSession for ScriptedSession {
    fn status(&self) -> &ServerStatus {
        &self.status
    }

    async fn register_tags(&mut self, _tag_names: &[String]) -> Result<(), IngestError> {
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<TagReading>, IngestError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(result) => result,
            None => {
                if let Some(cancel) = &self.cancel_when_exhausted {
                    cancel.cancel();
                }
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail_for: Option<String>,
    slow_for: Option<String>,
}

#[async_trait]
impl TelemetrySender for RecordingSender {
    async fn send(&self, connection_string: &str, body: &str) -> Result<(), CloudError> {
        if self.fail_for.as_deref() == Some(connection_string) {
            return Err(CloudError::Transport("forced failure".to_string()));
        }
        if self.slow_for.as_deref() == Some(connection_string) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.sent
            .lock()
            .await
            .push((connection_string.to_string(), body.to_string()));
        Ok(())
    }
}

fn reading(tag: &str, value: i64) -> TagReading {
    TagReading::now(tag, TagValue::I64(value))
}

fn bindings() -> BindingTable {
    BindingTable::new(vec![
        TagBinding::new("Tag1", "csA", "temp"),
        TagBinding::new("Tag2", "csB", "pressure"),
    ])
}

fn fast_config() -> PublishConfig {
    PublishConfig {
        poll_interval: Duration::from_millis(5),
        send_timeout: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn single_binding_sends_one_message() {
    let session = ScriptedSession::new(vec![Ok(vec![reading("Tag1", 42)])]);
    let sender = Arc::new(RecordingSender::default());
    let mut publish = PublishLoop::new(
        Box::new(session),
        BindingTable::new(vec![TagBinding::new("Tag1", "csA", "temp")]),
        sender.clone(),
        fast_config(),
    );

    let report = publish.run_cycle().await;
    assert_eq!(
        report,
        CycleReport {
            read_failed: false,
            readings: 1,
            sent: 1,
            failed: 0,
            unmapped: 0,
        }
    );
    let sent = sender.sent.lock().await;
    assert_eq!(sent.as_slice(), &[("csA".to_string(), r#"{"temp":42}"#.to_string())]);
}

#[tokio::test]
async fn unmapped_tag_is_skipped() {
    let session = ScriptedSession::new(vec![Ok(vec![
        reading("TagX", 7),
        reading("Tag1", 42),
        reading("Tag2", 3),
    ])]);
    let sender = Arc::new(RecordingSender::default());
    let mut publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let report = publish.run_cycle().await;
    assert_eq!(report.unmapped, 1);
    assert_eq!(report.sent, 2);

    let sent = sender.sent.lock().await;
    let targets: Vec<_> = sent.iter().map(|(cs, _)| cs.as_str()).collect();
    assert_eq!(targets, vec!["csA", "csB"]);
    assert_eq!(sent[1].1, r#"{"pressure":3}"#);
}

#[tokio::test]
async fn only_unmapped_tag_sends_nothing() {
    let session = ScriptedSession::new(vec![Ok(vec![reading("TagX", 7)])]);
    let sender = Arc::new(RecordingSender::default());
    let mut publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let report = publish.run_cycle().await;
    assert_eq!(report.unmapped, 1);
    assert_eq!(report.sent, 0);
    assert!(sender.sent.lock().await.is_empty());
}

#[tokio::test]
async fn read_failure_skips_cycle() {
    let session = ScriptedSession::new(vec![Err(IngestError::Read("server busy".to_string()))]);
    let sender = Arc::new(RecordingSender::default());
    let mut publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let report = publish.run_cycle().await;
    assert!(report.read_failed);
    assert_eq!(report.readings, 0);
    assert!(sender.sent.lock().await.is_empty());
}

#[tokio::test]
async fn send_failure_does_not_block_later_sends() {
    let session = ScriptedSession::new(vec![Ok(vec![reading("Tag1", 1), reading("Tag2", 2)])]);
    let sender = Arc::new(RecordingSender {
        fail_for: Some("csA".to_string()),
        ..RecordingSender::default()
    });
    let mut publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let report = publish.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.sent, 1);
    let sent = sender.sent.lock().await;
    assert_eq!(sent.as_slice(), &[("csB".to_string(), r#"{"pressure":2}"#.to_string())]);
}

#[tokio::test]
async fn slow_send_times_out() {
    let session = ScriptedSession::new(vec![Ok(vec![reading("Tag1", 1), reading("Tag2", 2)])]);
    let sender = Arc::new(RecordingSender {
        slow_for: Some("csA".to_string()),
        ..RecordingSender::default()
    });
    let mut publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let report = tokio::time::timeout(Duration::from_secs(2), publish.run_cycle())
        .await
        .expect("bounded by send timeout");
    assert_eq!(report.failed, 1);
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn run_survives_failures_until_cancelled() {
    let cancel = CancellationToken::new();
    let mut session = ScriptedSession::new(vec![
        Err(IngestError::Read("timeout".to_string())),
        Ok(vec![reading("TagX", 9)]),
        Ok(vec![reading("Tag1", 42)]),
    ]);
    session.cancel_when_exhausted = Some(cancel.clone());
    let reads = session.reads.clone();
    let sender = Arc::new(RecordingSender::default());
    let publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    tokio::time::timeout(Duration::from_secs(5), publish.run(cancel))
        .await
        .expect("loop stops on cancel");

    assert_eq!(reads.load(Ordering::SeqCst), 4);
    let sent = sender.sent.lock().await;
    assert_eq!(sent.as_slice(), &[("csA".to_string(), r#"{"temp":42}"#.to_string())]);
}

#[tokio::test]
async fn cancelled_before_start_reads_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let session = ScriptedSession::new(vec![Ok(vec![reading("Tag1", 1)])]);
    let reads = session.reads.clone();
    let sender = Arc::new(RecordingSender::default());
    let publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    publish.run(cancel).await;
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loop_can_run_on_spawned_task() {
    let cancel = CancellationToken::new();
    let session = ScriptedSession::new(vec![Ok(vec![reading("Tag2", 5)])]);
    let sender = Arc::new(RecordingSender::default());
    let publish = PublishLoop::new(Box::new(session), bindings(), sender.clone(), fast_config());

    let handle = tokio::spawn(publish.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("stopped")
        .expect("joined");

    let sent = sender.sent.lock().await;
    assert_eq!(sent.first().map(|(cs, _)| cs.as_str()), Some("csB"));
}
