//! Per-request access and overlay decisions.
//!
//! The image service consults a [`Policy`] after parsing a request and
//! before canonicalizing it. Overlays returned here become part of the
//! operation list, and therefore of the derivative fingerprint.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::geometry::Rectangle;
use crate::operation::Watermark;

/// What the policy gets to know about a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Authorization and overlay hooks.
pub trait Policy: Send + Sync {
    fn is_authorized(&self, identifier: &str, context: &RequestContext) -> bool;

    fn watermark_for(&self, identifier: &str, context: &RequestContext) -> Option<Watermark>;

    /// Regions, in full-image coordinates, to black out.
    fn redactions_for(&self, identifier: &str, context: &RequestContext) -> Vec<Rectangle>;
}

/// Authorizes everything and adds no overlays.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Policy for AllowAll {
    fn is_authorized(&self, _identifier: &str, _context: &RequestContext) -> bool {
        true
    }

    fn watermark_for(&self, _identifier: &str, _context: &RequestContext) -> Option<Watermark> {
        None
    }

    fn redactions_for(&self, _identifier: &str, _context: &RequestContext) -> Vec<Rectangle> {
        Vec::new()
    }
}

/// Policy fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    denied: HashSet<String>,
    watermark: Option<Watermark>,
    redactions: HashMap<String, Vec<Rectangle>>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, identifier: impl Into<String>) -> Self {
        self.denied.insert(identifier.into());
        self
    }

    /// Watermark every image.
    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn redact(mut self, identifier: impl Into<String>, region: Rectangle) -> Self {
        self.redactions
            .entry(identifier.into())
            .or_default()
            .push(region);
        self
    }
}

impl Policy for StaticPolicy {
    fn is_authorized(&self, identifier: &str, _context: &RequestContext) -> bool {
        !self.denied.contains(identifier)
    }

    fn watermark_for(&self, _identifier: &str, _context: &RequestContext) -> Option<Watermark> {
        self.watermark.clone()
    }

    fn redactions_for(&self, identifier: &str, _context: &RequestContext) -> Vec<Rectangle> {
        self.redactions.get(identifier).cloned().unwrap_or_default()
    }
}

/// Parse `identifier=x,y,w,h`.
pub fn parse_redaction(value: &str) -> Result<(String, Rectangle), String> {
    let (identifier, rect) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected identifier=x,y,w,h, got '{}'", value))?;
    let numbers: Vec<u32> = rect
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad redaction '{}': {}", value, e))?;
    match numbers[..] {
        [x, y, w, h] if w > 0 && h > 0 && !identifier.is_empty() => {
            Ok((identifier.to_string(), Rectangle::new(x, y, w, h)))
        }
        _ => Err(format!("bad redaction '{}': need a non-empty x,y,w,h", value)),
    }
}
