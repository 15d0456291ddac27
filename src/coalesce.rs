//! Opt-in de-duplication of concurrent work for the same cache identifier.

use crate::transform::ImageHandle;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;

type InFlight = Shared<BoxFuture<'static, Option<ImageHandle>>>;

/// Maps identifiers to the computation currently producing them. Requests
/// arriving while one is pending await it instead of starting their own.
#[derive(Default)]
pub struct Coalescer {
    inflight: Mutex<HashMap<String, InFlight>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `id`, or joins the run already in progress.
    pub async fn run<F>(&self, id: &str, work: F) -> Option<ImageHandle>
    where
        F: Future<Output = Option<ImageHandle>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(id) {
                Some(pending) => {
                    tracing::debug!("Joining in-flight computation for {}", id);
                    pending.clone()
                }
                None => {
                    let shared = work.boxed().shared();
                    inflight.insert(id.to_string(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight.get(id).is_some_and(|current| current.ptr_eq(&shared)) {
            inflight.remove(id);
        }
        result
    }

    pub async fn pending(&self) -> usize {
        self.inflight.lock().await.len()
    }
}
