use std::path::PathBuf;

use likeness_core::source::IdentityFolder;
use likeness_core::types::IdentitySummary;
use likeness_core::{
    EnrollError, EnrollPolicy, EnrollmentCoordinator, EnrollmentReport, FaceAnalyzer, IdentityStore,
    ImageLoader, RecognitionCoordinator, RecognitionRecord, RecognizeError, Settings, SourceError,
    StoreError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("enrollment failed: {0}")]
    Enroll(#[from] EnrollError),
    #[error("recognition failed: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("image error: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: String,
        folder: PathBuf,
        replace: bool,
        reply: Reply<EnrollmentReport>,
    },
    Recognize {
        image: PathBuf,
        reply: Reply<Vec<RecognitionRecord>>,
    },
    List {
        reply: Reply<Vec<IdentitySummary>>,
    },
    Remove {
        identity: String,
        reply: Reply<usize>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll `identity` from the photos in `folder`.
    pub async fn enroll(&self, identity: String, folder: PathBuf, replace: bool) -> Result<EnrollmentReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            identity,
            folder,
            replace,
            reply,
        })
        .await
    }

    /// Recognize every face in the image at `image`.
    pub async fn recognize(&self, image: PathBuf) -> Result<Vec<RecognitionRecord>, EngineError> {
        self.request(|reply| EngineRequest::Recognize { image, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.request(|reply| EngineRequest::List { reply }).await
    }

    pub async fn remove(&self, identity: String) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Remove { identity, reply }).await
    }
}

/// Everything the engine thread owns.
struct Engine<A, S> {
    analyzer: A,
    store: S,
    enroller: EnrollmentCoordinator,
    recognizer: RecognitionCoordinator,
    loader: ImageLoader,
}

impl<A: FaceAnalyzer, S: IdentityStore> Engine<A, S> {
    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Enroll {
                identity,
                folder,
                replace,
                reply,
            } => {
                let policy = if replace {
                    EnrollPolicy::Replace
                } else {
                    EnrollPolicy::SkipExisting
                };
                let folder = IdentityFolder { identity, path: folder };
                let result = self
                    .enroller
                    .enroll_folder(&mut self.analyzer, &mut self.store, &self.loader, &folder, policy)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::Recognize { image, reply } => {
                let _ = reply.send(self.recognize(&image));
            }
            EngineRequest::List { reply } => {
                let _ = reply.send(self.store.list_all().map_err(EngineError::from));
            }
            EngineRequest::Remove { identity, reply } => {
                let result = self.store.delete_by_identity(&identity).map_err(EngineError::from);
                if let Ok(removed) = &result {
                    tracing::info!(identity, removed, "identity removed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn recognize(&mut self, image: &std::path::Path) -> Result<Vec<RecognitionRecord>, EngineError> {
        let source = self.loader.load(image)?;
        Ok(self
            .recognizer
            .recognize(&mut self.analyzer, &self.store, &source.image)?)
    }
}

/// Spawn the engine on a dedicated OS thread that owns the analyzer and the
/// store. Requests are handled one at a time, so store writes never overlap.
pub fn spawn_engine<A, S>(
    analyzer: A,
    store: S,
    settings: &Settings,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
    S: IdentityStore + Send + 'static,
{
    let mut engine = Engine {
        analyzer,
        store,
        enroller: EnrollmentCoordinator::from_settings(settings),
        recognizer: RecognitionCoordinator::from_settings(settings),
        loader: ImageLoader::new(settings.max_image_dimension),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.handle(request);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
