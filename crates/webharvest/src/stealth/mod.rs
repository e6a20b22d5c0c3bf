// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stealth toolkit applied to a browsing context before navigation.
//!
//! A [`StealthProfile`] picks a user agent and viewport from the configured
//! pools, carries the extra request headers, and optionally installs a
//! script that hides the usual automation fingerprints. [`simulate_human`]
//! scrolls, moves the pointer and hovers with short random pauses.

pub mod captcha;
pub mod challenge;

use std::collections::BTreeMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{StealthSettings, Viewport};
use crate::error::Result;
use crate::renderer::RenderContext;

/// Evaluated on every new document when automation masking is enabled.
pub const AUTOMATION_MASK_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

const FALLBACK_VIEWPORT: Viewport = Viewport {
    width: 1366,
    height: 768,
};

/// Identity a single browsing context presents to the site.
#[derive(Debug, Clone, PartialEq)]
pub struct StealthProfile {
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    pub headers: BTreeMap<String, String>,
    pub mask_automation: bool,
}

impl StealthProfile {
    /// Draw a user agent and viewport at random from the pools.
    pub fn random(settings: &StealthSettings, viewports: &[Viewport]) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user_agent: settings.user_agents.choose(&mut rng).cloned(),
            viewport: viewports.choose(&mut rng).copied().unwrap_or(FALLBACK_VIEWPORT),
            headers: settings.extra_headers.clone(),
            mask_automation: settings.mask_automation,
        }
    }

    /// Configure the context. Must run before the first navigation.
    pub async fn apply(&self, ctx: &dyn RenderContext) -> Result<()> {
        if let Some(ua) = &self.user_agent {
            ctx.set_user_agent(ua).await?;
        }
        ctx.set_viewport(self.viewport).await?;
        if !self.headers.is_empty() {
            ctx.set_extra_headers(&self.headers).await?;
        }
        if self.mask_automation {
            ctx.add_init_script(AUTOMATION_MASK_SCRIPT).await?;
        }
        tracing::debug!(
            "stealth profile applied ({}x{}, ua={})",
            self.viewport.width,
            self.viewport.height,
            self.user_agent.as_deref().unwrap_or("default")
        );
        Ok(())
    }
}

struct HumanGestures {
    scroll_px: u32,
    pointer: (u32, u32),
    pauses_ms: [u64; 3],
}

impl HumanGestures {
    fn draw() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            scroll_px: rng.gen_range(200..900),
            pointer: (rng.gen_range(50..900), rng.gen_range(50..600)),
            pauses_ms: [
                rng.gen_range(50..250),
                rng.gen_range(50..250),
                rng.gen_range(50..250),
            ],
        }
    }
}

/// Scroll, move the pointer and hover over whatever sits under it.
pub async fn simulate_human(ctx: &dyn RenderContext) -> Result<()> {
    let g = HumanGestures::draw();
    let (x, y) = g.pointer;

    ctx.execute_js(&format!(
        "window.scrollBy({{ top: {}, behavior: 'smooth' }}); true",
        g.scroll_px
    ))
    .await?;
    tokio::time::sleep(Duration::from_millis(g.pauses_ms[0])).await;

    ctx.execute_js(&format!(
        "document.dispatchEvent(new MouseEvent('mousemove', \
         {{ bubbles: true, clientX: {x}, clientY: {y} }})); true"
    ))
    .await?;
    tokio::time::sleep(Duration::from_millis(g.pauses_ms[1])).await;

    ctx.execute_js(&format!(
        "(() => {{ const el = document.elementFromPoint({x}, {y}); \
         if (el) {{ el.dispatchEvent(new MouseEvent('mouseover', \
         {{ bubbles: true, clientX: {x}, clientY: {y} }})); }} return true; }})()"
    ))
    .await?;
    tokio::time::sleep(Duration::from_millis(g.pauses_ms[2])).await;

    Ok(())
}
