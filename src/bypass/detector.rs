//! Challenge detection: one probe script collects the page signals, a pure
//! classifier maps them to a [`ChallengeState`].

use serde::Deserialize;

/// Transient classification of the current page. Derived per poll, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// An unresolved interstitial is on the page.
    Active,
    /// Neither the challenge signature nor an error signature matches.
    Cleared,
    /// Unrecognized or not-yet-readable page state; keep polling.
    Indeterminate,
}

/// Signals collected from the live page in a single evaluation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageSignals {
    pub title: String,
    /// An iframe pointing at a known challenge platform is present.
    #[serde(default)]
    pub challenge_frame: bool,
    /// The verification widget container is in the DOM.
    #[serde(default)]
    pub widget: bool,
    /// Leading slice of the visible body text, lowercased.
    #[serde(default)]
    pub body_probe: String,
    /// `document.readyState === 'complete'`.
    #[serde(default)]
    pub ready: bool,
}

/// Collects [`PageSignals`] as a JSON string. DOM-based rather than raw-HTML
/// matching, which holds up better against dynamically injected challenges.
pub const PROBE_JS: &str = r#"(() => {
    const title = (document.title || '').toLowerCase();
    const frames = Array.from(document.querySelectorAll('iframe'))
        .map(f => ((f.getAttribute('src') || '') + ' ' + (f.getAttribute('title') || '')).toLowerCase())
        .join(' ');
    const challengeFrame = frames.includes('challenges.cloudflare.com')
        || frames.includes('/cdn-cgi/challenge-platform/')
        || frames.includes('challenge');
    const widget = document.querySelector('div.cf-turnstile, #turnstile-wrapper') !== null;
    const body = ((document.body && document.body.innerText) || '').toLowerCase();
    return JSON.stringify({
        title,
        challenge_frame: challengeFrame,
        widget,
        body_probe: body.slice(0, 400),
        ready: document.readyState === 'complete'
    });
})()"#;

const CHALLENGE_TITLE_MARKERS: &[&str] = &[
    "just a moment",
    "verifying you are human",
    "checking your browser",
];

const CHALLENGE_BODY_MARKERS: &[&str] = &[
    "checking your browser",
    "verify you are human",
    "checking if the site connection is secure",
    "needs to review the security of your connection",
];

// Vendor block pages. Not a challenge, but never content either — the
// orchestrator keeps polling these until the budget runs out.
const ERROR_TITLE_MARKERS: &[&str] = &["access denied", "attention required", "blocked"];

/// Map page signals to a challenge state.
pub fn classify(signals: &PageSignals) -> ChallengeState {
    let title = signals.title.to_ascii_lowercase();
    let body = signals.body_probe.to_ascii_lowercase();

    if signals.challenge_frame || signals.widget {
        return ChallengeState::Active;
    }
    if CHALLENGE_TITLE_MARKERS.iter().any(|m| title.contains(m))
        || CHALLENGE_BODY_MARKERS.iter().any(|m| body.contains(m))
    {
        return ChallengeState::Active;
    }
    if ERROR_TITLE_MARKERS.iter().any(|m| title.contains(m)) {
        return ChallengeState::Indeterminate;
    }
    if !signals.ready || (title.is_empty() && body.trim().is_empty()) {
        return ChallengeState::Indeterminate;
    }
    ChallengeState::Cleared
}
