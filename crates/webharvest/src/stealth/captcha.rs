//! Out-of-band CAPTCHA hand-off.
//!
//! In CAPTCHA mode the orchestrator opens a headful browser, reads the
//! page's site key and sends a [`CaptchaRequest`] to whoever holds the
//! receiving end (a terminal prompt, a solver service, ...). The fetch then
//! waits without a timeout until the request is resolved or the hand-off is
//! cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{HarvestError, Result};

/// A page waiting for a human (or solver) to clear its CAPTCHA.
#[derive(Debug)]
pub struct CaptchaRequest {
    pub url: String,
    pub site_key: Option<String>,
    resolved: oneshot::Sender<()>,
    abandoned: CancellationToken,
}

impl CaptchaRequest {
    /// Signal that the CAPTCHA in the browser window has been solved.
    pub fn resolve(self) {
        let _ = self.resolved.send(());
    }

    /// Cancelled once the fetch stops waiting for this request.
    pub fn abandoned(&self) -> CancellationToken {
        self.abandoned.clone()
    }
}

/// Sending half of the hand-off channel, shared with the orchestrator.
///
/// Two levels of cancellation: [`interrupt`](Self::interrupt) abandons the
/// waits in flight only, while the [`cancel_token`](Self::cancel_token)
/// ends the current and every later wait.
#[derive(Debug, Clone)]
pub struct CaptchaHandoff {
    tx: mpsc::Sender<CaptchaRequest>,
    shutdown: CancellationToken,
    current: Arc<Mutex<CancellationToken>>,
    waiting: Arc<AtomicUsize>,
}

/// Counts a wait as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CaptchaHandoff {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CaptchaRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let shutdown = CancellationToken::new();
        (
            Self {
                tx,
                current: Arc::new(Mutex::new(shutdown.child_token())),
                shutdown,
                waiting: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Token that aborts the current and every later wait when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Abandon the waits in flight; the next wait starts fresh.
    ///
    /// Returns whether any wait was in flight.
    pub fn interrupt(&self) -> bool {
        let waiting = self.waiting.load(Ordering::SeqCst) > 0;
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        waiting
    }

    /// Token for a new wait, replacing one spent by an earlier interrupt.
    fn wait_token(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = self.shutdown.child_token();
        }
        current.clone()
    }

    /// Publish a request and wait for it to be resolved.
    pub async fn wait_for_resolution(&self, url: &str, site_key: Option<String>) -> Result<()> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.waiting);
        let cancel = self.wait_token();
        let abandoned = cancel.child_token();
        // Fires on every exit path so the resolver stops prompting.
        let _abandon = abandoned.clone().drop_guard();

        let (resolved, done) = oneshot::channel();
        let request = CaptchaRequest {
            url: url.to_string(),
            site_key,
            resolved,
            abandoned,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(HarvestError::CaptchaUnresolved(format!("cancelled before hand-off of {url}")));
            }
            sent = self.tx.send(request) => {
                sent.map_err(|_| HarvestError::CaptchaUnresolved("no CAPTCHA resolver is listening".into()))?;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(HarvestError::CaptchaUnresolved(format!("cancelled while waiting on {url}")))
            }
            outcome = done => {
                outcome.map_err(|_| HarvestError::CaptchaUnresolved(format!("resolver dropped the request for {url}")))
            }
        }
    }
}

fn site_key_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"data-sitekey\s*=\s*["']([^"']+)["']"#,
            r#"["']?sitekey["']?\s*[:=]\s*["']([0-9A-Za-z_-]{20,})["']"#,
            r#"(?:recaptcha|hcaptcha)[^"']*[?&]k=([0-9A-Za-z_-]{20,})"#,
            r#"hcaptcha[^"']*[?&#]sitekey=([0-9A-Za-z_-]{20,})"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("site key regex is valid"))
        .collect()
    })
}

/// Read the page-specific site key from rendered HTML.
pub fn extract_site_key(html: &str) -> Option<String> {
    site_key_patterns()
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_from_data_attribute() {
        let html = r#"<div class="g-recaptcha" data-sitekey="6LcAbCdEfGhIjKlMnOpQrStUvWxYz0123456789"></div>"#;
        assert_eq!(
            extract_site_key(html).as_deref(),
            Some("6LcAbCdEfGhIjKlMnOpQrStUvWxYz0123456789")
        );
    }

    #[test]
    fn test_site_key_from_script_assignment() {
        let html = r#"<script>grecaptcha.render('box', { sitekey: '6LdXyZ_abcdefghijklmnopqrstu' });</script>"#;
        assert_eq!(
            extract_site_key(html).as_deref(),
            Some("6LdXyZ_abcdefghijklmnopqrstu")
        );
    }

    #[test]
    fn test_site_key_from_frame_src() {
        let html = r#"<iframe src="https://www.google.com/recaptcha/api2/anchor?ar=1&k=6LeFrAmEkEy_0123456789abcd&co=x"></iframe>"#;
        assert_eq!(
            extract_site_key(html).as_deref(),
            Some("6LeFrAmEkEy_0123456789abcd")
        );
    }

    #[test]
    fn test_no_site_key() {
        assert_eq!(extract_site_key("<p>plain page</p>"), None);
    }

    #[tokio::test]
    async fn test_resolution_unblocks_wait() {
        let (handoff, mut rx) = CaptchaHandoff::channel(1);
        let solver = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.url, "https://example.com/login");
            assert_eq!(request.site_key.as_deref(), Some("key"));
            request.resolve();
        });
        handoff
            .wait_for_resolution("https://example.com/login", Some("key".into()))
            .await
            .unwrap();
        solver.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_wait() {
        let (handoff, mut rx) = CaptchaHandoff::channel(1);
        let token = handoff.cancel_token();
        let holder = tokio::spawn(async move {
            // Receive but never resolve.
            let request = rx.recv().await.unwrap();
            token.cancel();
            request
        });
        let err = handoff
            .wait_for_resolution("https://example.com", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "captcha_unresolved");
        drop(holder.await.unwrap());
        assert!(handoff.is_cancelled());
    }

    #[tokio::test]
    async fn test_interrupt_only_abandons_the_wait_in_flight() {
        let (handoff, mut rx) = CaptchaHandoff::channel(1);
        assert!(!handoff.interrupt());

        let interrupter = handoff.clone();
        let first = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            let abandoned = request.abandoned();
            assert!(interrupter.interrupt());
            abandoned.cancelled().await;
            rx
        });
        let err = handoff
            .wait_for_resolution("https://example.com/1", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "captcha_unresolved");
        let mut rx = first.await.unwrap();

        let solver = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert!(!request.abandoned().is_cancelled());
            request.resolve();
        });
        handoff
            .wait_for_resolution("https://example.com/2", None)
            .await
            .unwrap();
        solver.await.unwrap();
        assert!(!handoff.is_cancelled());
    }

    #[tokio::test]
    async fn test_request_is_abandoned_once_wait_ends() {
        let (handoff, mut rx) = CaptchaHandoff::channel(1);
        let solver = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            let abandoned = request.abandoned();
            request.resolve();
            abandoned.cancelled().await;
        });
        handoff
            .wait_for_resolution("https://example.com", None)
            .await
            .unwrap();
        solver.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_unresolved() {
        let (handoff, rx) = CaptchaHandoff::channel(1);
        drop(rx);
        let err = handoff.wait_for_resolution("https://example.com", None).await;
        assert!(matches!(err, Err(HarvestError::CaptchaUnresolved(_))));
    }
}
