//! Clearance harvest: once the orchestrator reports the page cleared, pull
//! the cookie jar, the user agent, and optionally the rendered markup out of
//! the session.

use std::collections::HashMap;

use anyhow::Result;

use crate::core::types::BypassOutcome;
use crate::session::BypassSession;

pub async fn harvest(
    session: &mut dyn BypassSession,
    attempts: u32,
    capture_html: bool,
) -> Result<BypassOutcome> {
    let jar = session.cookie_jar().await?;
    let mut cookies = HashMap::with_capacity(jar.len());
    for (name, value) in jar {
        // Name collisions resolve last-write-wins, the cookie store's own rule.
        cookies.insert(name, value);
    }

    let user_agent = session.user_agent().await?;
    let html = if capture_html {
        Some(session.page_html().await?)
    } else {
        None
    };

    Ok(BypassOutcome {
        cleared: true,
        attempts,
        cookies,
        user_agent,
        html,
    })
}
