//! Dissectors: turn one framed `Event` into a `Frame`, then run
//! protocol-specific vulnerability checks against the dissected fields plus
//! whatever `CredentialScanner` found in the raw bytes.

mod binary_frame;
mod http;
mod plaintext;
mod sql;
mod structured;

pub use binary_frame::BinaryFrameDissector;
pub use http::HttpDissector;
pub use plaintext::PlainTextDissector;
pub use sql::SqlDissector;
pub use structured::StructuredDissector;

use crate::model::{Credential, DissectionError, Event, Frame, Target, Vulnerability};

/// A protocol dissector. Implementations are zero-state structs registered
/// into an ordered list (`Registry`), mirroring the `BoundaryDetector`
/// family's interface-polymorphism-over-inheritance design.
pub trait Dissector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap pre-check: does this event look like this protocol, and how
    /// confident are we (0.0..=1.0)?
    fn identify(&self, event: &Event) -> (bool, f32);

    /// Parses the event into a `Frame`. Must not panic; a
    /// malformed-but-identified message yields `DissectionError` rather
    /// than dropping the event — callers still route it to the generic
    /// credential scan.
    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError>;

    /// Protocol-specific vulnerability checks combining dissected fields
    /// and whatever `CredentialScanner` already found in the raw bytes.
    fn find_vulnerabilities(
        &self,
        frame: &Frame,
        credentials: &[Credential],
        target: &Target,
    ) -> Vec<Vulnerability>;

    /// Session correlation id, if this protocol carries one (used only by
    /// cross-frame checks).
    fn extract_session_id(&self, _frame: &Frame) -> Option<String> {
        None
    }
}

/// Minimum identification confidence required to let a dissector claim an
/// event: the highest confidence at or above this threshold wins. Set at
/// the catch-all plaintext dissector's own confidence (0.1) so that
/// dissector always has something to win against when nothing else
/// identifies.
pub const IDENTIFY_THRESHOLD: f32 = 0.1;

/// The immutable, construct-once set of registered dissectors (Design
/// Notes §9: "the built-in dissector registry... must be constructed once
/// at engine start and treated as immutable").
pub struct Registry {
    dissectors: Vec<Box<dyn Dissector>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            dissectors: vec![
                Box::new(HttpDissector),
                Box::new(BinaryFrameDissector),
                Box::new(StructuredDissector),
                Box::new(SqlDissector),
                // Catch-all, lowest confidence: always last so every
                // unmatched byte slice still reaches the credential
                // scanner via a generic Frame.
                Box::new(PlainTextDissector),
            ],
        }
    }

    /// Picks the highest-confidence dissector at or above
    /// `IDENTIFY_THRESHOLD` and dissects with it.
    pub fn dissect(&self, event: &Event) -> Option<Result<Frame, DissectionError>> {
        let mut best: Option<(&dyn Dissector, f32)> = None;
        for d in &self.dissectors {
            let (matches, confidence) = d.identify(event);
            if matches && confidence >= IDENTIFY_THRESHOLD {
                if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                    best = Some((d.as_ref(), confidence));
                }
            }
        }
        best.map(|(d, _)| d.dissect(event))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Dissector> {
        self.dissectors.iter().map(|b| b.as_ref())
    }

    /// The full per-event pipeline: pick the best-identified dissector,
    /// dissect, then run its vulnerability checks against the resulting
    /// `Frame` plus whatever the `CredentialScanner` already found in the
    /// raw bytes. `None` for the frame means either nothing identified the
    /// event above threshold, or dissection failed (a data-quality
    /// condition, not terminal); credential-derived findings are still
    /// returned by the caller separately in that case.
    pub fn process(
        &self,
        event: &Event,
        credentials: &[Credential],
        target: &Target,
    ) -> (Option<Frame>, Vec<Vulnerability>) {
        let mut best: Option<(&dyn Dissector, f32)> = None;
        for d in &self.dissectors {
            let (matches, confidence) = d.identify(event);
            if matches && confidence >= IDENTIFY_THRESHOLD {
                if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                    best = Some((d.as_ref(), confidence));
                }
            }
        }
        let Some((d, _)) = best else {
            return (None, Vec::new());
        };
        match d.dissect(event) {
            Ok(frame) => {
                let vulns = d.find_vulnerabilities(&frame, credentials, target);
                (Some(frame), vulns)
            }
            Err(_) => (None, Vec::new()),
        }
    }
}
