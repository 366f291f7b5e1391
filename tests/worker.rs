//! Decode worker protocol tests
//!
//! Runs the real axum worker on an ephemeral port with a scripted decoder and
//! talks to it through the session-side client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::time::timeout;

use beacon_voice::grammar::Corpus;
use beacon_voice::model::publish_corpus;
use beacon_voice::session::{DecodeStream, StreamMessage};
use beacon_voice::worker::{
    DecodeContext, ModelLoader, SpeechModel, WorkerState, WorkerStream, serve_on,
};
use beacon_voice::{Error, Result};

const WAIT: Duration = Duration::from_secs(2);

/// Counts samples; each load is a new generation
#[derive(Default)]
struct ScriptedLoader {
    loads: AtomicUsize,
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&self, _models_dir: &Path) -> Result<Arc<dyn SpeechModel>> {
        let generation = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(ScriptedModel { generation }))
    }
}

struct ScriptedModel {
    generation: usize,
}

impl SpeechModel for ScriptedModel {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn create_context(&self) -> Box<dyn DecodeContext> {
        Box::new(ScriptedContext {
            generation: self.generation,
            samples: 0,
        })
    }
}

struct ScriptedContext {
    generation: usize,
    samples: usize,
}

#[async_trait]
impl DecodeContext for ScriptedContext {
    fn feed(&mut self, samples: &[i16]) {
        self.samples += samples.len();
    }

    async fn intermediate(&mut self) -> Result<String> {
        Ok(format!("heard {}", self.samples))
    }

    async fn finish(self: Box<Self>) -> Result<String> {
        Ok(format!("gen{}: {} samples", self.generation, self.samples))
    }
}

struct BrokenLoader;

#[async_trait]
impl ModelLoader for BrokenLoader {
    async fn load(&self, _models_dir: &Path) -> Result<Arc<dyn SpeechModel>> {
        Err(Error::Decoder("acoustic model missing".to_string()))
    }
}

async fn spawn_worker(dir: &Path, interim: Option<Duration>) -> SocketAddr {
    let state = WorkerState::init(dir.to_path_buf(), Arc::new(ScriptedLoader::default()), interim)
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_on(state, listener));
    addr
}

async fn connect(addr: SocketAddr) -> WorkerStream {
    timeout(WAIT, WorkerStream::connect(&format!("ws://{addr}/stream")))
        .await
        .unwrap()
        .unwrap()
}

async fn next_final(stream: &mut WorkerStream) -> String {
    timeout(WAIT, async {
        loop {
            match stream.next_message().await.unwrap() {
                Some(StreamMessage::Final(text)) => return text,
                Some(StreamMessage::Interim(_)) => {}
                None => panic!("worker closed the connection"),
            }
        }
    })
    .await
    .expect("timed out waiting for final transcript")
}

#[tokio::test]
async fn test_health_reports_sample_rate() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_worker(dir.path(), None).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["sampleRate"], 16000);
}

#[tokio::test]
async fn test_stream_returns_one_final_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_worker(dir.path(), None).await;
    let mut stream = connect(addr).await;

    assert_eq!(stream.sample_rate(), 16000);

    stream.start().await.unwrap();
    stream.send_audio(&[100; 1600]).await.unwrap();
    stream.send_audio(&[-100; 1600]).await.unwrap();
    stream.finish().await.unwrap();

    assert_eq!(next_final(&mut stream).await, "gen1: 3200 samples");
    stream.close().await;
}

#[tokio::test]
async fn test_interim_transcripts_while_open() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_worker(dir.path(), Some(Duration::from_millis(50))).await;
    let mut stream = connect(addr).await;

    stream.start().await.unwrap();
    stream.send_audio(&[100; 1600]).await.unwrap();

    let message = timeout(WAIT, stream.next_message()).await.unwrap().unwrap();
    assert!(matches!(message, Some(StreamMessage::Interim(text)) if text.starts_with("heard")));

    stream.finish().await.unwrap();
    assert_eq!(next_final(&mut stream).await, "gen1: 1600 samples");
}

#[tokio::test]
async fn test_audio_without_stream_is_rejected_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_worker(dir.path(), None).await;
    let mut stream = connect(addr).await;

    // Dropped by the worker; the connection stays usable
    stream.send_audio(&[100; 1600]).await.unwrap();

    stream.start().await.unwrap();
    stream.finish().await.unwrap();
    assert_eq!(next_final(&mut stream).await, "gen1: 0 samples");
}

#[tokio::test]
async fn test_new_stream_picks_up_rebuilt_model() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_worker(dir.path(), None).await;
    let mut stream = connect(addr).await;

    stream.start().await.unwrap();
    stream.finish().await.unwrap();
    assert_eq!(next_final(&mut stream).await, "gen1: 0 samples");

    let corpus: Corpus = ["ok house".to_string()].into_iter().collect();
    publish_corpus(&corpus, dir.path()).await.unwrap();

    stream.start().await.unwrap();
    stream.finish().await.unwrap();
    assert_eq!(next_final(&mut stream).await, "gen2: 0 samples");
}

#[tokio::test]
async fn test_decoder_init_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let result = WorkerState::init(dir.path().to_path_buf(), Arc::new(BrokenLoader), None).await;
    assert!(matches!(result, Err(Error::Decoder(_))));
}
