//! Bounded pool of browser-automation sessions.
//!
//! Launching Chrome is by far the most expensive step of a crawl, so
//! sessions are reused across tasks. The pool hands out at most `max_size`
//! sessions at a time; a task holds exactly one `SessionGuard` for its
//! duration and the guard returns the session on every exit path, error
//! paths included. A poisoned session is disposed instead of returned, and
//! the freed permit lets the next acquire launch a replacement, so capacity
//! never leaks.

use crate::config::Config;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Creates and disposes the pooled sessions. The pool is generic over this
/// so its checkout semantics are testable without launching Chrome.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + 'static;

    async fn create(&self) -> Result<Self::Session>;
    async fn dispose(&self, session: Self::Session);
}

/// A live headless-Chrome handle plus the spawned task that pumps its CDP
/// event stream.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("failed to close browser cleanly: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Launches headless-Chrome sessions according to the crawl configuration.
pub struct BrowserFactory {
    headless: bool,
}

impl BrowserFactory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            headless: config.headless,
        }
    }
}

#[async_trait]
impl SessionFactory for BrowserFactory {
    type Session = BrowserSession;

    async fn create(&self) -> Result<BrowserSession> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1280, 1024)
            .arg("--disable-notifications")
            .arg("--lang=ko-KR");
        if !self.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(ScraperError::Config)?;

        let (browser, mut handler) = Browser::launch(browser_config).await?;
        // The handler stream must be polled for the CDP connection to make
        // progress; it ends when the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        debug!("launched new browser session");
        Ok(BrowserSession {
            browser,
            handler_task,
        })
    }

    async fn dispose(&self, session: BrowserSession) {
        session.close().await;
    }
}

pub struct SessionPool<F: SessionFactory> {
    factory: Arc<F>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<F::Session>>>,
    closed: Arc<AtomicBool>,
}

impl<F: SessionFactory> SessionPool<F> {
    /// The pool starts with all slots deferred: sessions are launched on
    /// first checkout, up to `max_size` live at once.
    pub fn new(factory: F, max_size: usize) -> Self {
        Self {
            factory: Arc::new(factory),
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(max_size))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Waits for a free slot, then hands out an idle session or launches a
    /// new one. The returned guard gives exclusive use of the session until
    /// it is dropped.
    pub async fn acquire(&self) -> Result<SessionGuard<F>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScraperError::Session("pool is shut down".into()));
        }
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScraperError::Session("pool is shut down".into()))?;

        let reused = self.idle.lock().unwrap_or_else(|p| p.into_inner()).pop();
        let session = match reused {
            Some(session) => session,
            None => self.factory.create().await?,
        };

        Ok(SessionGuard {
            session: Some(session),
            poisoned: false,
            idle: Arc::clone(&self.idle),
            closed: Arc::clone(&self.closed),
            factory: Arc::clone(&self.factory),
            runtime: tokio::runtime::Handle::current(),
            _permit: permit,
        })
    }

    /// Closes every idle session and refuses further checkouts. The
    /// orchestrator calls this as the final step of every run, including
    /// cancelled ones; guards still in flight dispose their sessions on
    /// drop once the pool is closed.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let sessions: Vec<F::Session> = {
            let mut idle = self.idle.lock().unwrap_or_else(|p| p.into_inner());
            idle.drain(..).collect()
        };
        for session in sessions {
            self.factory.dispose(session).await;
        }
        debug!("session pool shut down");
    }

    #[cfg(test)]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Scoped checkout of one session. Dropping the guard returns the session
/// to the pool, or disposes it when poisoned or the pool has shut down.
pub struct SessionGuard<F: SessionFactory> {
    session: Option<F::Session>,
    poisoned: bool,
    idle: Arc<Mutex<Vec<F::Session>>>,
    closed: Arc<AtomicBool>,
    factory: Arc<F>,
    runtime: tokio::runtime::Handle,
    _permit: OwnedSemaphorePermit,
}

impl<F: SessionFactory> SessionGuard<F> {
    /// Marks the session as unusable; it will be disposed instead of
    /// returned to the pool.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }
}

impl<F: SessionFactory> Deref for SessionGuard<F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().unwrap_or_else(|| unreachable!("session taken only in Drop"))
    }
}

impl<F: SessionFactory> DerefMut for SessionGuard<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().unwrap_or_else(|| unreachable!("session taken only in Drop"))
    }
}

impl<F: SessionFactory> Drop for SessionGuard<F> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.poisoned || self.closed.load(Ordering::Acquire) {
            // Disposal is async and Drop is not; hand it to the runtime.
            let factory = Arc::clone(&self.factory);
            self.runtime.spawn(async move {
                factory.dispose(session).await;
            });
        } else {
            self.idle.lock().unwrap_or_else(|p| p.into_inner()).push(session);
        }
        // _permit drops after this, freeing the slot either way.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Factory that tracks how many sessions are live and how many were
    /// ever created; sessions are plain ids.
    struct CountingFactory {
        created: AtomicUsize,
        live: AtomicUsize,
        high_water: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for Arc<CountingFactory> {
        type Session = usize;

        async fn create(&self) -> Result<usize> {
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(live, Ordering::SeqCst);
            Ok(id)
        }

        async fn dispose(&self, _session: usize) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn five_tasks_on_two_slots_never_exceed_two_sessions() {
        let factory = Arc::new(CountingFactory::new());
        let pool = Arc::new(SessionPool::new(Arc::clone(&factory), 2));
        let checked_out = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = Arc::clone(&pool);
            let checked_out = Arc::clone(&checked_out);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let guard = pool.acquire().await.unwrap();
                let now = checked_out.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                checked_out.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(factory.created.load(Ordering::SeqCst) <= 2);
        pool.shutdown().await;
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sessions_are_reused_across_checkouts() {
        let factory = Arc::new(CountingFactory::new());
        let pool = SessionPool::new(Arc::clone(&factory), 2);

        for _ in 0..4 {
            let guard = pool.acquire().await.unwrap();
            drop(guard);
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn poisoned_session_is_replaced_without_leaking_capacity() {
        let factory = Arc::new(CountingFactory::new());
        let pool = SessionPool::new(Arc::clone(&factory), 1);

        let mut guard = pool.acquire().await.unwrap();
        guard.poison();
        drop(guard);
        // Give the spawned disposal a beat to run.
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The single slot is free again and a fresh session is launched.
        let guard = pool.acquire().await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        drop(guard);
        pool.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn acquire_after_shutdown_fails() {
        let factory = Arc::new(CountingFactory::new());
        let pool = SessionPool::new(factory, 1);
        pool.shutdown().await;
        assert!(pool.acquire().await.is_err());
    }
}
