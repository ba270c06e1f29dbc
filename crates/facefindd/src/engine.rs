use facefind_core::session::NO_FACE_NOTICE;
use facefind_core::{
    resolve_gallery, CameraDevice, CaptureOutcome, CaptureSession, Cart, CartLineItem, DeviceStats, Event, EventId,
    EventRef, FaceExtractor, FilterKind, GalleryError, GalleryStore, GalleryView, MatchConfig, ModelGate, ModelStatus,
    Photo, PhotoId, Price, PurchaseTier, SessionError, SessionState,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("no gallery is open")]
    NoGallery,
    #[error("photo {0} is not in the visible gallery")]
    PhotoNotVisible(PhotoId),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// The attendee's current view of the open gallery.
#[derive(Debug, Serialize)]
pub struct GallerySnapshot {
    pub event: Event,
    pub filter: Option<FilterKind>,
    pub notice: Option<&'static str>,
    pub photos: Vec<Photo>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureReport {
    Matched {
        kind: FilterKind,
        shown: usize,
        notice: Option<&'static str>,
    },
    NoFace {
        notice: &'static str,
    },
}

#[derive(Debug, Serialize)]
pub struct CartSummary {
    pub items: Vec<CartLineItem>,
    pub total: Price,
}

impl CartSummary {
    fn of(cart: &Cart) -> Self {
        Self {
            items: cart.items().to_vec(),
            total: cart.total(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub session: SessionState,
    pub model: ModelStatus,
    pub camera: DeviceStats,
    pub event_id: Option<EventId>,
    pub cart_items: usize,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    OpenEvent { target: EventRef, reply: Reply<GallerySnapshot> },
    StartSearch { reply: Reply<()> },
    Capture { reply: Reply<CaptureReport> },
    CancelSearch { reply: Reply<()> },
    Visible { reply: Reply<GallerySnapshot> },
    AddToCart { photo_id: PhotoId, tier: PurchaseTier, reply: Reply<(bool, CartSummary)> },
    Cart { reply: Reply<CartSummary> },
    ClearCart { reply: Reply<()> },
    Checkout { reply: Reply<CartSummary> },
    Status { reply: Reply<EngineStatus> },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Resolve an event and make its gallery the current view.
    pub async fn open_event(&self, target: EventRef) -> Result<GallerySnapshot, EngineError> {
        self.request(|reply| EngineRequest::OpenEvent { target, reply }).await
    }

    pub async fn start_search(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartSearch { reply }).await
    }

    pub async fn capture(&self) -> Result<CaptureReport, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await
    }

    pub async fn cancel_search(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::CancelSearch { reply }).await
    }

    pub async fn visible(&self) -> Result<GallerySnapshot, EngineError> {
        self.request(|reply| EngineRequest::Visible { reply }).await
    }

    /// Returns whether a new line was added, and the resulting cart.
    pub async fn add_to_cart(&self, photo_id: PhotoId, tier: PurchaseTier) -> Result<(bool, CartSummary), EngineError> {
        self.request(|reply| EngineRequest::AddToCart { photo_id, tier, reply }).await
    }

    pub async fn cart(&self) -> Result<CartSummary, EngineError> {
        self.request(|reply| EngineRequest::Cart { reply }).await
    }

    pub async fn clear_cart(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ClearCart { reply }).await
    }

    pub async fn checkout(&self) -> Result<CartSummary, EngineError> {
        self.request(|reply| EngineRequest::Checkout { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

struct Engine<C: CameraDevice> {
    session: CaptureSession<C>,
    store: Arc<dyn GalleryStore>,
    view: Option<GalleryView>,
    cart: Cart,
}

impl<C: CameraDevice> Engine<C> {
    async fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::OpenEvent { target, reply } => {
                let _ = reply.send(self.open_event(target).await);
            }
            EngineRequest::StartSearch { reply } => {
                let result = match self.view {
                    Some(_) => self.session.start().await.map_err(EngineError::from),
                    None => Err(EngineError::NoGallery),
                };
                let _ = reply.send(result);
            }
            EngineRequest::Capture { reply } => {
                let _ = reply.send(self.capture().await);
            }
            EngineRequest::CancelSearch { reply } => {
                if let Some(view) = self.view.as_mut() {
                    self.session.cancel(view);
                }
                let _ = reply.send(Ok(()));
            }
            EngineRequest::Visible { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineRequest::AddToCart { photo_id, tier, reply } => {
                let _ = reply.send(self.add_to_cart(photo_id, tier));
            }
            EngineRequest::Cart { reply } => {
                let _ = reply.send(Ok(CartSummary::of(&self.cart)));
            }
            EngineRequest::ClearCart { reply } => {
                self.cart.clear();
                let _ = reply.send(Ok(()));
            }
            EngineRequest::Checkout { reply } => {
                let items = self.cart.complete_checkout();
                let total = items.iter().map(|i| i.unit_price).sum();
                let _ = reply.send(Ok(CartSummary { items, total }));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(Ok(EngineStatus {
                    session: self.session.state(),
                    model: self.session.model_status(),
                    camera: self.session.stats(),
                    event_id: self.view.as_ref().map(|v| v.event().id.clone()),
                    cart_items: self.cart.item_count(),
                }));
            }
        }
    }

    async fn open_event(&mut self, target: EventRef) -> Result<GallerySnapshot, EngineError> {
        let view = resolve_gallery(self.store.as_ref(), &target).await?;
        // A search on the previous gallery cannot outlive it.
        if let Some(old) = self.view.as_mut() {
            if !matches!(self.session.state(), SessionState::Idle { .. }) {
                self.session.cancel(old);
            }
        }
        self.session.clear_result();
        self.view = Some(view);
        self.snapshot()
    }

    async fn capture(&mut self) -> Result<CaptureReport, EngineError> {
        let view = self.view.as_mut().ok_or(EngineError::NoGallery)?;
        let report = match self.session.capture(view).await? {
            CaptureOutcome::Matched(filter) => CaptureReport::Matched {
                kind: filter.kind,
                shown: filter.photo_ids.len(),
                notice: filter.notice(),
            },
            CaptureOutcome::NoFace => CaptureReport::NoFace { notice: NO_FACE_NOTICE },
        };
        Ok(report)
    }

    fn snapshot(&self) -> Result<GallerySnapshot, EngineError> {
        let view = self.view.as_ref().ok_or(EngineError::NoGallery)?;
        Ok(GallerySnapshot {
            event: view.event().clone(),
            filter: view.filter().map(|f| f.kind),
            notice: view.filter().and_then(|f| f.notice()),
            photos: view.visible().into_iter().cloned().collect(),
        })
    }

    fn add_to_cart(&mut self, photo_id: PhotoId, tier: PurchaseTier) -> Result<(bool, CartSummary), EngineError> {
        let view = self.view.as_ref().ok_or(EngineError::NoGallery)?;
        let photo = view
            .visible()
            .into_iter()
            .find(|p| p.id == photo_id)
            .ok_or(EngineError::PhotoNotVisible(photo_id))?;
        let added = self.cart.add_photo(view.event(), photo, tier).is_some();
        tracing::info!(photo_id = %photo.id, tier = tier.label(), added, "cart add");
        Ok((added, CartSummary::of(&self.cart)))
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread runs its own single-threaded runtime, so camera calls never
/// stall the D-Bus executor. The camera is released when the last handle
/// is dropped and the thread exits.
pub fn spawn_engine<C>(
    camera: C,
    extractor: Arc<dyn FaceExtractor>,
    model: ModelGate,
    match_config: MatchConfig,
    store: Arc<dyn GalleryStore>,
) -> std::io::Result<EngineHandle>
where
    C: CameraDevice + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facefind-engine".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "engine runtime failed to start");
                    return;
                }
            };
            let mut engine = Engine {
                session: CaptureSession::new(camera, extractor, model, match_config),
                store,
                view: None,
                cart: Cart::new(),
            };
            tracing::info!("engine thread started");
            rt.block_on(async {
                while let Some(req) = rx.recv().await {
                    engine.handle(req).await;
                }
            });
            let stats = engine.session.stats();
            drop(engine);
            tracing::info!(acquired = stats.acquired, released = stats.released, "engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
