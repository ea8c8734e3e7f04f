//! Performance timelines for narration
//!
//! The narration pipeline produces a JSON timeline of segments, each naming an
//! animation state, an expression and an intensity. Text around the JSON is
//! tolerated. A timeline that fails validation is replaced by a four-part
//! fallback so the character always has something to perform.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_ANIMATION: &str = "idle";
pub const DEFAULT_EXPRESSION: &str = "neutral";
pub const DEFAULT_INTENSITY: f32 = 0.5;

/// Seconds of narration per spoken word (150 words per minute)
const SECONDS_PER_WORD: f32 = 0.4;
const MIN_DURATION: f32 = 3.0;
const MAX_DURATION: f32 = 120.0;

const MAX_SEGMENTS: usize = 10;
const MIN_SEGMENTS: usize = 3;
/// Seconds of slack between metadata duration and the narration length
const DURATION_TOLERANCE: f32 = 2.0;
/// Seconds of slack for segment ends, timeline end and gaps
const TIMELINE_TOLERANCE: f32 = 1.0;
/// Latest acceptable start of the first segment
const MAX_LEAD_IN: f32 = 0.5;
const TRANSCRIPT_PREVIEW_CHARS: usize = 100;

const REQUIRED_FIELDS: [&str; 5] = ["startTime", "endTime", "animation", "expression", "intensity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityLevel {
    Low,
    Medium,
    High,
}

impl IntensityLevel {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(IntensityLevel::Low),
            "medium" => Some(IntensityLevel::Medium),
            "high" => Some(IntensityLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptMetadata {
    /// Seconds
    pub duration: f32,
    pub transcript: String,
    pub intensity: Option<IntensityLevel>,
    pub style: Option<String>,
    pub notes: Option<String>,
    /// True when the timeline was generated locally
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSegment {
    pub start_time: f32,
    pub end_time: f32,
    pub animation: String,
    pub expression: String,
    /// 0..=1
    pub intensity: f32,
    #[serde(default)]
    pub notes: String,
}

impl ScriptSegment {
    pub fn new(
        start_time: f32,
        end_time: f32,
        animation: &str,
        expression: &str,
        intensity: f32,
        notes: &str,
    ) -> Self {
        Self {
            start_time,
            end_time,
            animation: animation.to_string(),
            expression: expression.to_string(),
            intensity,
            notes: notes.to_string(),
        }
    }

    #[inline]
    fn contains(&self, time: f32) -> bool {
        time >= self.start_time && time < self.end_time
    }
}

/// Names a timeline may refer to
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptVocabulary {
    pub animations: Vec<String>,
    pub expressions: Vec<String>,
}

impl Default for ScriptVocabulary {
    fn default() -> Self {
        Self {
            animations: [
                "idle",
                "walkRelaxed",
                "walkThink",
                "run",
                "sitTalk",
                "spellcast",
                "relax",
            ]
            .map(String::from)
            .to_vec(),
            expressions: ["neutral", "smile", "laugh", "shocked", "angry", "confused"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl ScriptVocabulary {
    fn knows_animation(&self, name: &str) -> bool {
        self.animations.iter().any(|a| a == name)
    }

    fn knows_expression(&self, name: &str) -> bool {
        self.expressions.iter().any(|e| e == name)
    }
}

/// A problem found while validating a raw timeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptIssue {
    #[error("script must be an object")]
    NotAnObject,
    #[error("missing 'metadata' section")]
    MissingMetadata,
    #[error("metadata missing 'duration'")]
    MissingDuration,
    #[error("metadata duration must be positive, got {0}")]
    NonPositiveDuration(f32),
    #[error("duration mismatch: expected ~{expected}s, got {got}s")]
    DurationMismatch { expected: f32, got: f32 },
    #[error("metadata missing 'transcript'")]
    MissingTranscript,
    #[error("metadata intensity must be 'low', 'medium', or 'high', got '{0}'")]
    BadIntensityLevel(String),
    #[error("timeline is empty or missing")]
    EmptyTimeline,
    #[error("timeline must be a list")]
    TimelineNotList,
    #[error("timeline has too many segments ({0} > 10)")]
    TooManySegments(usize),
    #[error("timeline should have at least 3 segments, got {0}")]
    TooFewSegments(usize),
    #[error("segment {0} must be an object")]
    SegmentNotObject(usize),
    #[error("segment {index} missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("segment {index} {field} must be numeric")]
    NotNumeric { index: usize, field: &'static str },
    #[error("segment {0} startTime cannot be negative")]
    NegativeStart(usize),
    #[error("segment {0} endTime must be after startTime")]
    EndBeforeStart(usize),
    #[error("segment {0} endTime exceeds duration")]
    EndPastDuration(usize),
    #[error("segment {index} has invalid animation '{name}'")]
    UnknownAnimation { index: usize, name: String },
    #[error("segment {index} has invalid expression '{name}'")]
    UnknownExpression { index: usize, name: String },
    #[error("segment {index} intensity must be between 0.0 and 1.0, got {value}")]
    IntensityOutOfRange { index: usize, value: f32 },
    #[error("timeline should start near 0 seconds")]
    LateStart,
    #[error("timeline ends at {end}s but expected duration is {expected}s")]
    EarlyEnd { end: f32, expected: f32 },
    #[error("gap in timeline after segment {0}")]
    Gap(usize),
}

/// Cut the outermost `{...}` out of text that may carry prose around it
pub fn extract_json_object(text: &str) -> Result<&str, EngineError> {
    let start = text.find('{').ok_or(EngineError::NoJsonObject)?;
    let end = text.rfind('}').ok_or(EngineError::NoJsonObject)?;
    if end <= start {
        return Err(EngineError::NoJsonObject);
    }
    Ok(&text[start..=end])
}

/// Parse the JSON object embedded in `text` without interpreting it
pub fn parse_raw(text: &str) -> Result<Value, EngineError> {
    let json = extract_json_object(text)?;
    serde_json::from_str(json).map_err(|source| EngineError::Parse {
        what: "animation script",
        source,
    })
}

/// Narration length guessed from word count, clamped to [3, 120] seconds
pub fn estimate_duration(text: &str) -> f32 {
    let words = text.split_whitespace().count() as f32;
    (words * SECONDS_PER_WORD).clamp(MIN_DURATION, MAX_DURATION)
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f32> {
    map.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

fn truthy_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Every problem with a raw timeline; empty means it can be performed as-is
pub fn validate(
    raw: &Value,
    expected_duration: f32,
    vocabulary: &ScriptVocabulary,
) -> Vec<ScriptIssue> {
    let mut issues = Vec::new();

    let Some(script) = raw.as_object() else {
        issues.push(ScriptIssue::NotAnObject);
        return issues;
    };

    match script.get("metadata").and_then(Value::as_object) {
        Some(metadata) if !metadata.is_empty() => {
            validate_metadata(metadata, expected_duration, &mut issues)
        }
        _ => issues.push(ScriptIssue::MissingMetadata),
    }

    let timeline = match script.get("timeline") {
        None | Some(Value::Null) => {
            issues.push(ScriptIssue::EmptyTimeline);
            return issues;
        }
        Some(Value::Array(segments)) if segments.is_empty() => {
            issues.push(ScriptIssue::EmptyTimeline);
            return issues;
        }
        Some(Value::Array(segments)) => segments,
        Some(_) => {
            issues.push(ScriptIssue::TimelineNotList);
            return issues;
        }
    };

    if timeline.len() > MAX_SEGMENTS {
        issues.push(ScriptIssue::TooManySegments(timeline.len()));
    }
    if timeline.len() < MIN_SEGMENTS {
        issues.push(ScriptIssue::TooFewSegments(timeline.len()));
    }

    for (index, segment) in timeline.iter().enumerate() {
        match segment.as_object() {
            Some(segment) => {
                validate_segment(segment, index, expected_duration, vocabulary, &mut issues)
            }
            None => issues.push(ScriptIssue::SegmentNotObject(index)),
        }
    }

    validate_continuity(timeline, expected_duration, &mut issues);
    issues
}

fn validate_metadata(
    metadata: &Map<String, Value>,
    expected_duration: f32,
    issues: &mut Vec<ScriptIssue>,
) {
    match number(metadata, "duration") {
        None => issues.push(ScriptIssue::MissingDuration),
        Some(duration) if duration <= 0.0 => {
            issues.push(ScriptIssue::NonPositiveDuration(duration))
        }
        Some(duration) if (duration - expected_duration).abs() > DURATION_TOLERANCE => {
            issues.push(ScriptIssue::DurationMismatch {
                expected: expected_duration,
                got: duration,
            })
        }
        Some(_) => {}
    }

    if truthy_str(metadata, "transcript").is_none() {
        issues.push(ScriptIssue::MissingTranscript);
    }

    if let Some(level) = truthy_str(metadata, "intensity") {
        if IntensityLevel::parse(level).is_none() {
            issues.push(ScriptIssue::BadIntensityLevel(level.to_string()));
        }
    }
}

fn validate_segment(
    segment: &Map<String, Value>,
    index: usize,
    expected_duration: f32,
    vocabulary: &ScriptVocabulary,
    issues: &mut Vec<ScriptIssue>,
) {
    for field in REQUIRED_FIELDS {
        if !segment.contains_key(field) {
            issues.push(ScriptIssue::MissingField { index, field });
        }
    }

    let present = |key: &str| segment.get(key).filter(|v| !v.is_null());
    for field in ["startTime", "endTime", "intensity"] {
        if present(field).is_some_and(|v| !v.is_number()) {
            issues.push(ScriptIssue::NotNumeric { index, field });
        }
    }

    if let (Some(start), Some(end)) = (number(segment, "startTime"), number(segment, "endTime")) {
        if start < 0.0 {
            issues.push(ScriptIssue::NegativeStart(index));
        }
        if end <= start {
            issues.push(ScriptIssue::EndBeforeStart(index));
        }
        if end > expected_duration + TIMELINE_TOLERANCE {
            issues.push(ScriptIssue::EndPastDuration(index));
        }
    }

    if let Some(name) = truthy_str(segment, "animation") {
        if !vocabulary.knows_animation(name) {
            issues.push(ScriptIssue::UnknownAnimation {
                index,
                name: name.to_string(),
            });
        }
    }

    if let Some(name) = truthy_str(segment, "expression") {
        if !vocabulary.knows_expression(name) {
            issues.push(ScriptIssue::UnknownExpression {
                index,
                name: name.to_string(),
            });
        }
    }

    if let Some(value) = number(segment, "intensity") {
        if !(0.0..=1.0).contains(&value) {
            issues.push(ScriptIssue::IntensityOutOfRange { index, value });
        }
    }
}

fn validate_continuity(timeline: &[Value], expected_duration: f32, issues: &mut Vec<ScriptIssue>) {
    let time = |segment: &Value, key: &str| {
        segment
            .as_object()
            .and_then(|s| number(s, key))
            .unwrap_or(0.0)
    };

    let (Some(first), Some(last)) = (timeline.first(), timeline.last()) else {
        return;
    };

    if time(first, "startTime") > MAX_LEAD_IN {
        issues.push(ScriptIssue::LateStart);
    }

    let end = time(last, "endTime");
    if end < expected_duration - TIMELINE_TOLERANCE {
        issues.push(ScriptIssue::EarlyEnd {
            end,
            expected: expected_duration,
        });
    }

    for (index, pair) in timeline.windows(2).enumerate() {
        if time(&pair[1], "startTime") - time(&pair[0], "endTime") > TIMELINE_TOLERANCE {
            issues.push(ScriptIssue::Gap(index));
        }
    }
}

/// A sanitized, performable timeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationScript {
    #[serde(default)]
    pub metadata: ScriptMetadata,
    #[serde(default)]
    pub timeline: Vec<ScriptSegment>,
}

impl AnimationScript {
    /// Parse JSON embedded in `text` and repair missing or out-of-range
    /// segment fields. Non-object segments are dropped.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        Ok(Self::sanitize(&parse_raw(text)?))
    }

    /// Normalize a raw timeline value
    pub fn sanitize(raw: &Value) -> Self {
        let empty = Map::new();
        let script = raw.as_object().unwrap_or(&empty);
        let metadata = script
            .get("metadata")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let metadata = ScriptMetadata {
            duration: number(metadata, "duration").unwrap_or(0.0),
            transcript: truthy_str(metadata, "transcript").unwrap_or_default().to_string(),
            intensity: truthy_str(metadata, "intensity").and_then(IntensityLevel::parse),
            style: truthy_str(metadata, "style").map(str::to_string),
            notes: truthy_str(metadata, "notes").map(str::to_string),
            fallback: metadata
                .get("fallback")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        let timeline = script
            .get("timeline")
            .and_then(Value::as_array)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(Value::as_object)
                    .map(sanitize_segment)
                    .collect()
            })
            .unwrap_or_default();

        Self { metadata, timeline }
    }

    /// Four-part default performance spanning `duration` seconds
    pub fn fallback(duration: f32, transcript: &str) -> Self {
        log::info!("Generating fallback animation script for {:.1}s", duration);
        let at = |fraction: f32| duration * fraction;

        let transcript = if transcript.chars().count() > TRANSCRIPT_PREVIEW_CHARS {
            let preview: String = transcript.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
            format!("{preview}...")
        } else {
            transcript.to_string()
        };

        Self {
            metadata: ScriptMetadata {
                duration,
                transcript,
                intensity: Some(IntensityLevel::Medium),
                style: Some("comedic".to_string()),
                notes: Some("Generated using fallback pattern".to_string()),
                fallback: true,
            },
            timeline: vec![
                ScriptSegment::new(0.0, at(0.25), "idle", "neutral", 0.5, "Opening"),
                ScriptSegment::new(at(0.25), at(0.5), "sitTalk", "smile", 0.7, "Building"),
                ScriptSegment::new(at(0.5), at(0.75), "spellcast", "laugh", 0.9, "Climax"),
                ScriptSegment::new(at(0.75), duration, "relax", "smile", 0.6, "Closing"),
            ],
        }
    }

    /// Full pipeline: parse, validate, and fall back on any issue
    pub fn load(
        text: &str,
        transcript: &str,
        expected_duration: f32,
        vocabulary: &ScriptVocabulary,
    ) -> Self {
        let raw = match parse_raw(text) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("Animation script unusable ({}); using fallback", err);
                return Self::fallback(expected_duration, transcript);
            }
        };

        let issues = validate(&raw, expected_duration, vocabulary);
        if !issues.is_empty() {
            log::warn!("Animation script validation found {} issue(s):", issues.len());
            for issue in &issues {
                log::warn!("  - {}", issue);
            }
            return Self::fallback(expected_duration, transcript);
        }

        let script = Self::sanitize(&raw);
        log::info!("Animation script loaded with {} segments", script.timeline.len());
        script
    }

    /// Seconds until the performance is over
    pub fn duration(&self) -> f32 {
        self.timeline
            .iter()
            .map(|segment| segment.end_time)
            .fold(self.metadata.duration.max(0.0), f32::max)
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.fallback
    }
}

fn sanitize_segment(segment: &Map<String, Value>) -> ScriptSegment {
    let text = |key: &str, default: &str| {
        segment
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let intensity = match segment.get("intensity") {
        Some(value) => value
            .as_f64()
            .map(|v| (v as f32).clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_INTENSITY),
        None => DEFAULT_INTENSITY,
    };

    ScriptSegment {
        start_time: number(segment, "startTime").unwrap_or(0.0),
        end_time: number(segment, "endTime").unwrap_or(0.0),
        animation: text("animation", DEFAULT_ANIMATION),
        expression: text("expression", DEFAULT_EXPRESSION),
        intensity,
        notes: text("notes", ""),
    }
}

// ============================================================================
// Playback
// ============================================================================

/// What the character should be doing from now on
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCue {
    pub segment: usize,
    pub animation: String,
    pub expression: String,
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    Cue(ScriptCue),
    Finished,
}

/// Walks a timeline on the narration clock
pub struct ScriptPlayer {
    script: AnimationScript,
    time: f32,
    active: Option<usize>,
    finished: bool,
}

impl ScriptPlayer {
    pub fn new(script: AnimationScript) -> Self {
        Self {
            script,
            time: 0.0,
            active: None,
            finished: false,
        }
    }

    pub fn script(&self) -> &AnimationScript {
        &self.script
    }

    /// Seconds since the script started
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_segment(&self) -> Option<&ScriptSegment> {
        self.active.and_then(|i| self.script.timeline.get(i))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance by `delta` seconds; reports a segment change or the end.
    ///
    /// Segments skipped over by a large delta are not reported. Inside a gap
    /// the previous segment stays in effect.
    pub fn update(&mut self, delta: f32) -> Option<ScriptEvent> {
        if self.finished {
            return None;
        }
        if delta.is_finite() {
            self.time += delta.max(0.0);
        }

        if self.time >= self.script.duration() {
            self.finished = true;
            self.active = None;
            return Some(ScriptEvent::Finished);
        }

        let current = self
            .script
            .timeline
            .iter()
            .rposition(|segment| segment.contains(self.time))?;
        if self.active == Some(current) {
            return None;
        }

        self.active = Some(current);
        let segment = &self.script.timeline[current];
        Some(ScriptEvent::Cue(ScriptCue {
            segment: current,
            animation: segment.animation.clone(),
            expression: segment.expression.clone(),
            intensity: segment.intensity,
        }))
    }
}
