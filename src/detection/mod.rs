//! # Detection — PPE-Gated Clock-in Jobs
//!
//! A field worker's clock-in is only created after an inference job checks the
//! submitted photo for protective equipment. The flow spans several requests
//! and possibly several processes, so all shared state lives in the
//! [`EphemeralStore`](crate::ephemeral::EphemeralStore):
//!
//! 1. [`dispatch::Dispatcher::submit`] enqueues the image and writes the *origin* record
//!    (`user_id`, submission time), returning a [`JobHandle`] immediately.
//! 2. [`dispatch::Dispatcher::attach_context`] writes the *context* record (project,
//!    coordinates, address) whenever the caller has it. Last write wins.
//! 3. A [`runner::Runner`] pops the job, runs the [`Detector`], applies the
//!    [`ApprovalPolicy`], stores the photo, and writes a terminal [`JobOutcome`].
//! 4. [`resolver::Resolver::poll`] joins outcome + origin + context under a
//!    per-handle lock, creates the clock-in on approval, and clears every
//!    ephemeral key for the handle.
//!
//! The inference function itself sits behind the [`Detector`] trait so that
//! tests run against a scripted fake; [`HttpDetector`] talks to a model server.

pub mod dispatch;
pub mod resolver;
pub mod runner;

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{DetectionConfig, PolicyConfig};
use crate::error::{Result, WorkflowError};
use crate::models::{Address, Detection};

// ── Handles and ephemeral payloads ─────────────────────────────

/// Opaque token correlating submission, context attachment, and polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(Uuid);

impl JobHandle {
    pub fn new() -> Self {
        JobHandle(Uuid::new_v4())
    }

    pub fn as_uuid(self) -> Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(JobHandle)
            .map_err(|_| WorkflowError::validation(format!("malformed job handle '{}'", s)))
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work item on the shared queue. The image travels base64-encoded so the
/// queue payload stays plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub handle: JobHandle,
    pub user_id: Uuid,
    pub image_b64: String,
}

impl QueuedJob {
    pub fn new(handle: JobHandle, user_id: Uuid, image: &[u8]) -> Self {
        QueuedJob {
            handle,
            user_id,
            image_b64: base64::engine::general_purpose::STANDARD.encode(image),
        }
    }

    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.image_b64)
            .map_err(|e| WorkflowError::InferenceFailure(format!("corrupt job payload: {}", e)))
    }
}

/// Written at submission time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOrigin {
    pub user_id: Uuid,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// Caller-supplied augmentation. Every field is optional; an absent record
/// means "no additional context".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub project_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
}

impl JobContext {
    pub fn address(&self) -> Address {
        Address {
            state: self.state.clone(),
            city: self.city.clone(),
            street: self.street.clone(),
            street_number: self.street_number.clone(),
            postal_code: self.postal_code.clone(),
        }
    }
}

/// Terminal result written by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        user_id: Uuid,
        detections: Vec<Detection>,
        approved: bool,
        photo_path: String,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Success { approved: true, .. } => "approved",
            JobOutcome::Success { approved: false, .. } => "rejected",
            JobOutcome::Failed { .. } => "failed",
        }
    }
}

/// What the store knows about a handle.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Done(JobOutcome),
}

// ── Approval gate ──────────────────────────────────────────────

/// Lowercase, trim, and turn inner whitespace into underscores, so
/// "Not Helmet" and "not_helmet" compare equal.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Decides whether a set of detections lets a clock-in through.
pub trait ApprovalPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn approve(&self, detections: &[Detection]) -> bool;
}

/// Rejects when any label marks missing equipment. Zero detections approve.
#[derive(Debug, Clone)]
pub struct NegativePrefix {
    prefix: String,
}

impl NegativePrefix {
    pub fn new(prefix: &str) -> Self {
        NegativePrefix {
            prefix: normalize_label(prefix),
        }
    }
}

impl ApprovalPolicy for NegativePrefix {
    fn name(&self) -> &'static str {
        "negative_prefix"
    }

    fn approve(&self, detections: &[Detection]) -> bool {
        !detections
            .iter()
            .any(|d| normalize_label(&d.label).starts_with(&self.prefix))
    }
}

/// Approves only when every required label was detected.
#[derive(Debug, Clone)]
pub struct RequiredLabels {
    labels: Vec<String>,
}

impl RequiredLabels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RequiredLabels {
            labels: labels
                .into_iter()
                .map(|l| normalize_label(l.as_ref()))
                .collect(),
        }
    }
}

impl ApprovalPolicy for RequiredLabels {
    fn name(&self) -> &'static str {
        "required_labels"
    }

    fn approve(&self, detections: &[Detection]) -> bool {
        let seen: Vec<String> = detections.iter().map(|d| normalize_label(&d.label)).collect();
        self.labels.iter().all(|l| seen.contains(l))
    }
}

pub fn policy_from_config(cfg: &PolicyConfig) -> Box<dyn ApprovalPolicy> {
    match cfg {
        PolicyConfig::NegativePrefix { prefix } => Box::new(NegativePrefix::new(prefix)),
        PolicyConfig::RequiredLabels { labels } => Box::new(RequiredLabels::new(labels)),
    }
}

// ── Inference ──────────────────────────────────────────────────

/// The opaque inference function: image bytes in, labeled detections out.
///
/// Called from a blocking thread; implementations may block.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &[u8]) -> Result<Vec<Detection>>;
}

/// Image container recognised from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }
}

/// Sniff the image format. Anything unrecognised is a decode error.
pub fn sniff_image(bytes: &[u8]) -> Result<ImageKind> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Ok(ImageKind::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Ok(ImageKind::Png)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Ok(ImageKind::Webp)
    } else {
        Err(WorkflowError::InferenceFailure(
            "image could not be decoded: unsupported or corrupt format".to_string(),
        ))
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    image: String,
    conf: f64,
    iou: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Calls an HTTP model server with `{image, conf, iou}` and reads back
/// `{detections: [{label, confidence}]}`.
pub struct HttpDetector {
    url: String,
    confidence: f64,
    iou: f64,
    agent: ureq::Agent,
}

impl HttpDetector {
    pub fn new(url: &str, cfg: &DetectionConfig) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_connect(Some(Duration::from_secs(5)))
                .timeout_global(Some(Duration::from_secs(cfg.timeout_secs)))
                .build(),
        );
        HttpDetector {
            url: url.to_string(),
            confidence: cfg.confidence,
            iou: cfg.iou,
            agent,
        }
    }
}

impl Detector for HttpDetector {
    fn detect(&self, image: &[u8]) -> Result<Vec<Detection>> {
        let kind = sniff_image(image)?;
        let payload = InferenceRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            conf: self.confidence,
            iou: self.iou,
            format: Some(kind.extension()),
        };
        let mut resp = self
            .agent
            .post(&self.url)
            .send_json(&payload)
            .map_err(|e| WorkflowError::InferenceFailure(format!("detector request failed: {}", e)))?;
        let body: InferenceResponse = resp
            .body_mut()
            .read_json()
            .map_err(|e| WorkflowError::InferenceFailure(format!("bad detector response: {}", e)))?;
        Ok(body.detections)
    }
}

/// Stand-in used when no detector URL is configured: every job fails.
pub struct UnconfiguredDetector;

impl Detector for UnconfiguredDetector {
    fn detect(&self, _image: &[u8]) -> Result<Vec<Detection>> {
        Err(WorkflowError::InferenceFailure(
            "no detector configured".to_string(),
        ))
    }
}

pub fn detector_from_config(cfg: &DetectionConfig) -> Box<dyn Detector> {
    match cfg.detector_url.as_deref() {
        Some(url) => Box::new(HttpDetector::new(url, cfg)),
        None => Box::new(UnconfiguredDetector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn normalize_handles_case_and_spaces() {
        assert_eq!(normalize_label("Not Helmet"), "not_helmet");
        assert_eq!(normalize_label("  VEST "), "vest");
        assert_eq!(normalize_label("not  safety   glasses"), "not_safety_glasses");
    }

    #[test]
    fn negative_prefix_rejects_missing_equipment() {
        let policy = NegativePrefix::new("not_");
        assert!(policy.approve(&[det("helmet"), det("vest")]));
        assert!(!policy.approve(&[det("helmet"), det("not_vest")]));
        assert!(!policy.approve(&[det("Not Helmet")]));
    }

    #[test]
    fn negative_prefix_approves_empty_detections() {
        assert!(NegativePrefix::new("not_").approve(&[]));
    }

    #[test]
    fn required_labels_need_every_label() {
        let policy = RequiredLabels::new(["helmet", "Vest"]);
        assert!(policy.approve(&[det("helmet"), det("vest"), det("gloves")]));
        assert!(!policy.approve(&[det("helmet")]));
        assert!(!policy.approve(&[]));
    }

    #[test]
    fn policy_from_config_picks_named_predicate() {
        let p = policy_from_config(&PolicyConfig::default());
        assert_eq!(p.name(), "negative_prefix");
        let p = policy_from_config(&PolicyConfig::RequiredLabels {
            labels: vec!["helmet".into()],
        });
        assert_eq!(p.name(), "required_labels");
    }

    #[test]
    fn sniff_recognises_common_formats() {
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap(), ImageKind::Jpeg);
        assert_eq!(sniff_image(b"\x89PNG\r\n\x1a\n....").unwrap(), ImageKind::Png);
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 ").unwrap(), ImageKind::Webp);
        assert!(matches!(
            sniff_image(b"hello world"),
            Err(WorkflowError::InferenceFailure(_))
        ));
    }

    #[test]
    fn handle_parse_rejects_garbage() {
        let h = JobHandle::new();
        assert_eq!(JobHandle::parse(&h.to_string()).unwrap(), h);
        assert!(matches!(
            JobHandle::parse("nope"),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let out = JobOutcome::Failed {
            error: "boom".into(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        let back: JobOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn queued_job_round_trips_image() {
        let job = QueuedJob::new(JobHandle::new(), Uuid::new_v4(), &[1, 2, 3]);
        assert_eq!(job.image_bytes().unwrap(), vec![1, 2, 3]);
    }
}
